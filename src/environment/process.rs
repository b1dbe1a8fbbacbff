//! Per-session tool server processes
//!
//! Each session gets its own tool server process listening on a freshly
//! allocated port. Provisioning returns once `GET /health` answers.
//!
//! `{port}` and `{session_id}` in the configured arguments are substituted
//! before spawning, e.g. `--port {port}`.

use std::process::Stdio;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{check_health, EnvironmentError, EnvironmentHandle, Provisioner};

/// Configuration for spawned tool servers
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Executable to run
    pub program: String,
    /// Arguments; `{port}` and `{session_id}` are substituted
    pub args: Vec<String>,
    /// Host the tool server binds to
    pub host: String,
    /// First port handed out; later environments get the following ports
    pub base_port: u16,
    /// How long to wait for the first healthy response
    pub ready_timeout: Duration,
    /// Delay between health probes
    pub poll_interval: Duration,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            program: "toolserver".to_string(),
            args: vec!["--port".to_string(), "{port}".to_string()],
            host: "127.0.0.1".to_string(),
            base_port: 18080,
            ready_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Spawns one tool server process per environment
pub struct ProcessProvisioner {
    config: ProcessConfig,
    next_port: AtomicU16,
    http: reqwest::Client,
}

impl ProcessProvisioner {
    pub fn new(config: ProcessConfig) -> Result<Self, EnvironmentError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .map_err(|e| EnvironmentError::Spawn(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            next_port: AtomicU16::new(config.base_port),
            config,
            http,
        })
    }

    /// Allocate the next port for a new environment
    fn allocate_port(&self) -> u16 {
        self.next_port.fetch_add(1, Ordering::SeqCst)
    }

    fn render_args(&self, port: u16, session_id: &str) -> Vec<String> {
        self.config
            .args
            .iter()
            .map(|arg| {
                arg.replace("{port}", &port.to_string())
                    .replace("{session_id}", session_id)
            })
            .collect()
    }

    /// Poll `/health` until it answers, the process exits, or the timeout expires
    async fn wait_until_ready(&self, handle: &mut EnvironmentHandle) -> Result<(), EnvironmentError> {
        let start = Instant::now();

        loop {
            if let Some(status) = handle.try_exit_status()? {
                return Err(EnvironmentError::Spawn(format!(
                    "tool server exited during startup with {}",
                    status
                )));
            }

            match check_health(&self.http, &handle.endpoint).await {
                Ok(()) => return Ok(()),
                Err(e) => debug!(env_id = %handle.id, error = %e, "Environment not ready yet"),
            }

            if start.elapsed() > self.config.ready_timeout {
                return Err(EnvironmentError::NotReady(self.config.ready_timeout));
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

#[async_trait]
impl Provisioner for ProcessProvisioner {
    fn name(&self) -> &str {
        "process"
    }

    async fn provision(&self, session_id: &str) -> Result<EnvironmentHandle, EnvironmentError> {
        let start = Instant::now();
        let env_id = format!("env-{}", Uuid::now_v7());
        let port = self.allocate_port();
        let endpoint = format!("http://{}:{}", self.config.host, port);

        info!(env_id = %env_id, session_id, port, program = %self.config.program, "Spawning environment");

        let child = Command::new(&self.config.program)
            .args(self.render_args(port, session_id))
            .env("SESSION_ID", session_id)
            .env("TOOL_SERVER_PORT", port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EnvironmentError::Spawn(format!("{}: {}", self.config.program, e)))?;

        let mut handle = EnvironmentHandle::with_process(env_id, endpoint, child);

        if let Err(e) = self.wait_until_ready(&mut handle).await {
            warn!(env_id = %handle.id, error = %e, "Environment failed to become ready");
            handle.mark_failed(e.to_string());
            if let Err(kill_err) = handle.shutdown().await {
                warn!(env_id = %handle.id, error = %kill_err, "Failed to stop unready environment");
            }
            return Err(e);
        }

        handle.mark_ready();
        info!(
            env_id = %handle.id,
            pid = ?handle.pid(),
            ready_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Environment ready"
        );
        Ok(handle)
    }

    async fn teardown(&self, mut handle: EnvironmentHandle) -> Result<(), EnvironmentError> {
        let id = handle.id.clone();
        handle
            .shutdown()
            .await
            .map_err(|e| EnvironmentError::Teardown {
                id: id.clone(),
                reason: e.to_string(),
            })?;
        info!(env_id = %id, "Environment destroyed");
        Ok(())
    }
}
