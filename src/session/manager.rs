//! Session Manager - lifecycle of sessions and their environments
//!
//! ```text
//! create_session ──► provision (bounded) ──► Ready
//!                                              │
//! run_task ─────► Running ──► Orchestrator ────┘ (back to Ready)
//!                    │
//! delete_session ──► cancel run ──► teardown ──► Stopped
//! ```
//!
//! Each session sits in its own slot so runs in different sessions never
//! contend on a shared lock. The session map lock is only held to look up,
//! insert or purge slots.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::state::{Session, SessionStatus, SessionSummary};
use super::SessionError;
use crate::agent::{Agent, Orchestrator, TaskStatus};
use crate::environment::{check_health, EnvironmentError, EnvironmentHandle, Provisioner};
use crate::metrics::{ENV_PROVISION_DURATION, SESSIONS};

/// Configuration for the SessionManager
#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    /// Upper bound on environment provisioning
    pub provision_timeout: Duration,
    /// Probe the environment's `/health` before every task run
    pub health_check_before_run: bool,
    /// Longest accepted task text, in characters
    pub max_task_len: usize,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            provision_timeout: Duration::from_secs(150),
            health_check_before_run: false,
            max_task_len: 10_000,
        }
    }
}

/// Result of a task run, as reported to callers
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub session_id: String,
    pub status: TaskStatus,
    pub result: String,
    /// Model calls made by this run
    pub turns: usize,
    /// Tool calls made by this run
    pub tool_calls: u64,
    /// Tool calls made by the session so far
    pub session_tool_calls: u64,
    pub trace_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentHealth {
    pub session_id: String,
    pub environment_endpoint: String,
    pub healthy: bool,
}

struct SessionSlot {
    session: Mutex<Session>,
    environment: Mutex<Option<EnvironmentHandle>>,
    /// Present while a task run is in flight
    cancel: Mutex<Option<watch::Sender<bool>>>,
}

impl SessionSlot {
    fn new(session: Session) -> Self {
        Self {
            session: Mutex::new(session),
            environment: Mutex::new(None),
            cancel: Mutex::new(None),
        }
    }
}

/// Move a session to `next`, keeping the status gauge in step
fn set_status(session: &mut Session, next: SessionStatus) -> Result<(), SessionError> {
    let previous = session
        .transition(next)
        .map_err(|e| SessionError::not_ready(e, &session.id))?;
    SESSIONS.with_label_values(&[previous.as_str()]).dec();
    SESSIONS.with_label_values(&[next.as_str()]).inc();
    debug!(session_id = %session.id, from = %previous, to = %next, "Session transition");
    Ok(())
}

/// Manages every session and the environment each one owns
pub struct SessionManager {
    agent: Arc<Agent>,
    provisioner: Arc<dyn Provisioner>,
    config: SessionManagerConfig,
    sessions: RwLock<HashMap<String, Arc<SessionSlot>>>,
    http: reqwest::Client,
}

impl SessionManager {
    /// Create a new SessionManager
    ///
    /// # Arguments
    /// * `agent` - Shared agent configuration, catalog and clients
    /// * `provisioner` - Creates and destroys session environments
    /// * `config` - Provisioning and validation limits
    pub fn new(
        agent: Arc<Agent>,
        provisioner: Arc<dyn Provisioner>,
        config: SessionManagerConfig,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            agent,
            provisioner,
            config,
            sessions: RwLock::new(HashMap::new()),
            http,
        })
    }

    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    async fn slot(&self, id: &str) -> Result<Arc<SessionSlot>, SessionError> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    /// Create a session and provision its environment
    ///
    /// Provisioning failure leaves the session in Failed and returns the
    /// error; there is no retry.
    pub async fn create_session(&self, name: Option<String>) -> Result<Session, SessionError> {
        let session = Session::new(name);
        let id = session.id.clone();
        SESSIONS.with_label_values(&[SessionStatus::Pending.as_str()]).inc();

        let slot = Arc::new(SessionSlot::new(session));
        self.sessions.write().await.insert(id.clone(), slot.clone());

        set_status(&mut *slot.session.lock().await, SessionStatus::Provisioning)?;
        info!(session_id = %id, provisioner = %self.provisioner.name(), "Provisioning session environment");

        let start = Instant::now();
        let provisioned = match tokio::time::timeout(
            self.config.provision_timeout,
            self.provisioner.provision(&id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(EnvironmentError::NotReady(self.config.provision_timeout)),
        };
        ENV_PROVISION_DURATION
            .with_label_values(&[self.provisioner.name()])
            .observe(start.elapsed().as_secs_f64());

        let mut session = slot.session.lock().await;
        match provisioned {
            Ok(handle) => {
                session.environment_endpoint = Some(handle.endpoint.clone());
                *slot.environment.lock().await = Some(handle);
                set_status(&mut session, SessionStatus::Ready)?;
                info!(
                    session_id = %id,
                    endpoint = ?session.environment_endpoint,
                    provision_ms = start.elapsed().as_millis() as u64,
                    "Session ready"
                );
                Ok(session.clone())
            }
            Err(e) => {
                error!(session_id = %id, error = %e, "Environment provisioning failed");
                session.failure = Some(e.to_string());
                set_status(&mut session, SessionStatus::Failed)?;
                Err(SessionError::ProvisioningFailed { id, source: e })
            }
        }
    }

    /// Run a task to completion in a Ready session
    pub async fn run_task(&self, id: &str, task: &str) -> Result<TaskReport, SessionError> {
        let slot = self.slot(id).await?;
        let task = task.trim();
        if task.is_empty() {
            return Err(SessionError::InvalidTask("task must not be empty".to_string()));
        }
        if task.chars().count() > self.config.max_task_len {
            return Err(SessionError::InvalidTask(format!(
                "task exceeds {} characters",
                self.config.max_task_len
            )));
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);

        let (history, next_index, endpoint) = {
            let mut session = slot.session.lock().await;
            if session.status != SessionStatus::Ready {
                return Err(SessionError::NotReady {
                    id: id.to_string(),
                    status: session.status,
                });
            }
            let endpoint = session.environment_endpoint.clone().unwrap_or_default();
            set_status(&mut session, SessionStatus::Running)?;
            *slot.cancel.lock().await = Some(cancel_tx);
            (session.history.clone(), session.next_turn_index, endpoint)
        };

        if self.config.health_check_before_run {
            if let Err(e) = check_health(&self.http, &endpoint).await {
                warn!(session_id = %id, error = %e, "Environment failed pre-run health check");
                slot.cancel.lock().await.take();
                let mut session = slot.session.lock().await;
                if session.status == SessionStatus::Running {
                    set_status(&mut session, SessionStatus::Ready)?;
                }
                return Err(SessionError::EnvironmentUnhealthy {
                    id: id.to_string(),
                    reason: e.to_string(),
                });
            }
        }

        info!(session_id = %id, history_turns = history.len(), "Running task");
        let orchestrator = Orchestrator::new(
            self.agent.clone(),
            Arc::new(self.agent.router(id, &endpoint)),
        );
        let outcome = orchestrator.run(task, &history, next_index, cancel_rx).await;

        slot.cancel.lock().await.take();

        let mut session = slot.session.lock().await;
        // A delete during the run has already moved the session on
        if session.status == SessionStatus::Running {
            set_status(&mut session, SessionStatus::Ready)?;
        }

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(mut e) => {
                let (turns, tool_calls) = e.take_completed();
                if !turns.is_empty() {
                    info!(session_id = %id, turns = turns.len(), tool_calls, "Keeping turns completed before the run failed");
                    session.append_turns(turns, tool_calls);
                }
                return Err(e.into());
            }
        };
        session.record_run(outcome.new_turns, outcome.tool_calls);

        Ok(TaskReport {
            session_id: id.to_string(),
            status: outcome.status,
            result: outcome.result,
            turns: outcome.turns,
            tool_calls: outcome.tool_calls,
            session_tool_calls: session.tool_call_count,
            trace_id: outcome.trace_id,
        })
    }

    /// Stop a session and tear down its environment
    ///
    /// Deleting a Stopping or Stopped session returns it unchanged. A running
    /// task is cancelled first.
    pub async fn delete_session(&self, id: &str) -> Result<Session, SessionError> {
        let slot = self.slot(id).await?;

        {
            let mut session = slot.session.lock().await;
            match session.status {
                SessionStatus::Stopping | SessionStatus::Stopped => return Ok(session.clone()),
                SessionStatus::Pending | SessionStatus::Provisioning => {
                    return Err(SessionError::NotReady {
                        id: id.to_string(),
                        status: session.status,
                    })
                }
                SessionStatus::Ready | SessionStatus::Running | SessionStatus::Failed => {
                    set_status(&mut session, SessionStatus::Stopping)?;
                }
            }
        }

        if let Some(cancel) = slot.cancel.lock().await.take() {
            info!(session_id = %id, "Cancelling running task before delete");
            let _ = cancel.send(true);
        }

        let teardown = match slot.environment.lock().await.take() {
            Some(handle) => self.provisioner.teardown(handle).await,
            None => Ok(()),
        };

        if let Err(e) = self.agent.artifacts().remove_session(id).await {
            warn!(session_id = %id, error = %e, "Failed to remove session artifacts");
        }

        let mut session = slot.session.lock().await;
        match teardown {
            Ok(()) => {
                set_status(&mut session, SessionStatus::Stopped)?;
                info!(session_id = %id, "Session stopped");
            }
            Err(e) => {
                error!(session_id = %id, error = %e, "Environment teardown failed");
                session.failure = Some(e.to_string());
                set_status(&mut session, SessionStatus::Failed)?;
            }
        }
        Ok(session.clone())
    }

    pub async fn get_session(&self, id: &str) -> Result<Session, SessionError> {
        let slot = self.slot(id).await?;
        let session = slot.session.lock().await;
        Ok(session.clone())
    }

    /// Summaries of every session, newest first
    pub async fn list_sessions(&self, status: Option<SessionStatus>) -> Vec<SessionSummary> {
        let slots: Vec<Arc<SessionSlot>> = self.sessions.read().await.values().cloned().collect();

        let mut summaries = Vec::with_capacity(slots.len());
        for slot in slots {
            let session = slot.session.lock().await;
            if status.map_or(true, |wanted| session.status == wanted) {
                summaries.push(session.summary());
            }
        }

        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        summaries
    }

    /// Signal the in-flight task run of a session to stop
    pub async fn cancel_task(&self, id: &str) -> Result<(), SessionError> {
        let slot = self.slot(id).await?;
        let status = slot.session.lock().await.status;
        if status != SessionStatus::Running {
            return Err(SessionError::NotReady {
                id: id.to_string(),
                status,
            });
        }

        if let Some(cancel) = slot.cancel.lock().await.as_ref() {
            let _ = cancel.send(true);
            info!(session_id = %id, "Task cancellation requested");
        }
        Ok(())
    }

    /// Clear the conversation history of a Ready session
    ///
    /// Counters and turn numbering carry on from where they were.
    pub async fn reset_history(&self, id: &str) -> Result<Session, SessionError> {
        let slot = self.slot(id).await?;
        let mut session = slot.session.lock().await;
        if session.status != SessionStatus::Ready {
            return Err(SessionError::NotReady {
                id: id.to_string(),
                status: session.status,
            });
        }

        let cleared = session.history.len();
        session.history.clear();
        session.touch();
        info!(session_id = %id, cleared, "Session history reset");
        Ok(session.clone())
    }

    /// Probe the environment of a Ready or Running session
    pub async fn environment_health(&self, id: &str) -> Result<EnvironmentHealth, SessionError> {
        let slot = self.slot(id).await?;
        let endpoint = {
            let session = slot.session.lock().await;
            match (&session.environment_endpoint, session.status.is_active()) {
                (Some(endpoint), true) => endpoint.clone(),
                _ => {
                    return Err(SessionError::NotReady {
                        id: id.to_string(),
                        status: session.status,
                    })
                }
            }
        };

        check_health(&self.http, &endpoint)
            .await
            .map_err(|e| SessionError::EnvironmentUnhealthy {
                id: id.to_string(),
                reason: e.to_string(),
            })?;

        Ok(EnvironmentHealth {
            session_id: id.to_string(),
            environment_endpoint: endpoint,
            healthy: true,
        })
    }

    /// Sessions whose environment is up (Ready or Running)
    pub async fn active_count(&self) -> usize {
        let slots: Vec<Arc<SessionSlot>> = self.sessions.read().await.values().cloned().collect();
        let mut active = 0;
        for slot in slots {
            if slot.session.lock().await.status.is_active() {
                active += 1;
            }
        }
        active
    }

    /// Forget Stopped and Failed sessions idle for longer than `max_age`
    ///
    /// # Returns
    /// Number of sessions purged
    pub async fn cleanup_stale_sessions(&self, max_age: Duration) -> usize {
        let now = Utc::now();
        let slots: Vec<(String, Arc<SessionSlot>)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, slot)| (id.clone(), slot.clone()))
            .collect();

        let mut stale = Vec::new();
        for (id, slot) in slots {
            let session = slot.session.lock().await;
            let idle = (now - session.last_activity).to_std().unwrap_or_default();
            if session.status.is_terminal() && idle >= max_age {
                stale.push((id, session.status));
            }
        }

        if stale.is_empty() {
            return 0;
        }

        let mut sessions = self.sessions.write().await;
        for (id, status) in &stale {
            sessions.remove(id);
            SESSIONS.with_label_values(&[status.as_str()]).dec();
        }
        drop(sessions);

        for (id, status) in &stale {
            if *status == SessionStatus::Failed {
                if let Err(e) = self.agent.artifacts().remove_session(id).await {
                    warn!(session_id = %id, error = %e, "Failed to remove session artifacts");
                }
            }
        }

        info!(purged = stale.len(), "Purged stale sessions");
        stale.len()
    }

    /// Start the background task that purges stale sessions
    pub fn start_reaper(
        manager: Arc<SessionManager>,
        interval: Duration,
        max_age: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                manager.cleanup_stale_sessions(max_age).await;
            }
        })
    }

    /// Delete every session that still holds an environment
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        info!(sessions = ids.len(), "Shutting down sessions");

        for id in ids {
            match self.delete_session(&id).await {
                Ok(_) => {}
                Err(SessionError::NotReady { status, .. }) => {
                    warn!(session_id = %id, %status, "Session still provisioning at shutdown");
                }
                Err(e) => warn!(session_id = %id, error = %e, "Failed to stop session"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::config::AgentConfig;
    use crate::environment::StaticProvisioner;
    use crate::model::{ModelClient, ModelError, ModelOutput, ModelRequest};
    use crate::tools::{ArtifactStore, Catalog, EnvironmentTools};

    struct EchoModel;

    #[async_trait]
    impl ModelClient for EchoModel {
        fn model(&self) -> &str {
            "echo"
        }

        async fn complete(&self, request: ModelRequest<'_>) -> Result<ModelOutput, ModelError> {
            Ok(ModelOutput::final_answer(format!(
                "answered {}",
                request.prompt.unwrap_or_default()
            )))
        }
    }

    struct BrokenProvisioner;

    #[async_trait]
    impl Provisioner for BrokenProvisioner {
        fn name(&self) -> &str {
            "broken"
        }

        async fn provision(&self, _session_id: &str) -> Result<EnvironmentHandle, EnvironmentError> {
            Err(EnvironmentError::Spawn("no capacity left".to_string()))
        }

        async fn teardown(&self, _handle: EnvironmentHandle) -> Result<(), EnvironmentError> {
            Ok(())
        }
    }

    fn manager(provisioner: Arc<dyn Provisioner>, dir: &tempfile::TempDir) -> SessionManager {
        let local = EnvironmentTools::new(Duration::from_secs(1), Duration::from_secs(1)).unwrap();
        let agent = Agent::from_catalog(
            AgentConfig::default(),
            Arc::new(Catalog::default()),
            Arc::new(EchoModel),
            Arc::new(local),
            Arc::new(ArtifactStore::new(dir.path())),
        );
        SessionManager::new(Arc::new(agent), provisioner, SessionManagerConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_run() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(Arc::new(StaticProvisioner::new("http://env")), &dir);

        let session = manager.create_session(Some("demo".into())).await.unwrap();
        assert_eq!(session.status, SessionStatus::Ready);
        assert_eq!(session.environment_endpoint.as_deref(), Some("http://env"));

        let report = manager.run_task(&session.id, "  say hi ").await.unwrap();
        assert_eq!(report.status, TaskStatus::Completed);
        assert_eq!(report.result, "answered say hi");

        let after = manager.get_session(&session.id).await.unwrap();
        assert_eq!(after.status, SessionStatus::Ready);
        assert_eq!(after.history.len(), 1);
        assert_eq!(after.task_count, 1);
    }

    #[tokio::test]
    async fn test_provisioning_failure_marks_failed() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(Arc::new(BrokenProvisioner), &dir);

        let err = manager.create_session(None).await.unwrap_err();
        assert_eq!(err.code(), "provisioning_failed");

        let sessions = manager.list_sessions(Some(SessionStatus::Failed)).await;
        assert_eq!(sessions.len(), 1);
        assert!(sessions[0].failure.as_deref().unwrap().contains("no capacity left"));
    }

    #[tokio::test]
    async fn test_invalid_task_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(Arc::new(StaticProvisioner::default()), &dir);
        let session = manager.create_session(None).await.unwrap();

        let err = manager.run_task(&session.id, "   ").await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidTask(_)));

        let long = "x".repeat(10_001);
        let err = manager.run_task(&session.id, &long).await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidTask(_)));
    }

    #[tokio::test]
    async fn test_reset_keeps_counters() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(Arc::new(StaticProvisioner::default()), &dir);
        let session = manager.create_session(None).await.unwrap();
        manager.run_task(&session.id, "first").await.unwrap();

        let reset = manager.reset_history(&session.id).await.unwrap();
        assert!(reset.history.is_empty());
        assert_eq!(reset.task_count, 1);
        assert_eq!(reset.next_turn_index, 1);
    }

    #[tokio::test]
    async fn test_cancel_requires_running() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(Arc::new(StaticProvisioner::default()), &dir);
        let session = manager.create_session(None).await.unwrap();

        let err = manager.cancel_task(&session.id).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::NotReady { status: SessionStatus::Ready, .. }
        ));
    }

    #[tokio::test]
    async fn test_stale_sessions_are_purged() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(Arc::new(StaticProvisioner::default()), &dir);
        let stopped = manager.create_session(None).await.unwrap();
        let live = manager.create_session(None).await.unwrap();
        manager.delete_session(&stopped.id).await.unwrap();

        assert_eq!(manager.cleanup_stale_sessions(Duration::from_secs(3600)).await, 0);
        assert_eq!(manager.cleanup_stale_sessions(Duration::ZERO).await, 1);

        assert!(matches!(
            manager.get_session(&stopped.id).await,
            Err(SessionError::NotFound(_))
        ));
        assert!(manager.get_session(&live.id).await.is_ok());
        assert_eq!(manager.active_count().await, 1);
    }
}
