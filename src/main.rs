//! toolvisor server
//!
//! Loads the provider file, discovers tools, and serves the session API.
//!
//! ```text
//! toolvisor --settings mcp_servers.json --environment process --toolserver-program ./toolserver
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::{info, warn};

use toolvisor::api::{create_router, ApiState};
use toolvisor::environment::{
    EnvironmentPool, ProcessConfig, ProcessProvisioner, Provisioner, StaticProvisioner,
};
use toolvisor::model::anthropic::{AnthropicClient, AnthropicConfig};
use toolvisor::model::ollama::{OllamaClient, DEFAULT_OLLAMA_URL};
use toolvisor::model::ModelClient;
use toolvisor::provider::{HttpProviderClient, ProviderClient, ProviderTimeouts};
use toolvisor::session::SessionManagerConfig;
use toolvisor::telemetry::{init_tracing, shutdown_tracing};
use toolvisor::tools::{ArtifactStore, EnvironmentTools};
use toolvisor::{Agent, AgentConfig, ProviderSettings, SessionManager};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModelBackend {
    Anthropic,
    Ollama,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EnvironmentMode {
    /// Every session shares one tool server URL
    Static,
    /// One spawned tool server process per session
    Process,
    /// Spawned processes kept warm in a pool
    Pool,
}

#[derive(Debug, Parser)]
#[command(name = "toolvisor", version, about = "Tool orchestration server for model-driven tasks")]
struct Args {
    /// Address the HTTP API listens on
    #[arg(long, env = "TOOLVISOR_BIND", default_value = "0.0.0.0:3000")]
    bind: SocketAddr,

    /// Provider file in the `mcpServers` layout
    #[arg(long, env = "TOOLVISOR_SETTINGS", default_value = "mcp_servers.json")]
    settings: PathBuf,

    #[arg(long, value_enum, env = "TOOLVISOR_MODEL_BACKEND", default_value = "anthropic")]
    model_backend: ModelBackend,

    /// Model identifier (backend default when omitted)
    #[arg(long, env = "TOOLVISOR_MODEL")]
    model: Option<String>,

    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    anthropic_api_key: Option<String>,

    #[arg(long, env = "ANTHROPIC_BASE_URL")]
    anthropic_base_url: Option<String>,

    #[arg(long, env = "OLLAMA_URL", default_value = DEFAULT_OLLAMA_URL)]
    ollama_url: String,

    /// Maximum model calls per task run
    #[arg(long, env = "TOOLVISOR_MAX_TURNS", default_value_t = 25)]
    max_turns: usize,

    /// Bound on each tool dispatch, in seconds
    #[arg(long, env = "TOOLVISOR_TOOL_TIMEOUT", default_value_t = 180)]
    tool_timeout_secs: u64,

    /// Outputs larger than this many bytes become artifacts
    #[arg(long, env = "TOOLVISOR_INLINE_LIMIT", default_value_t = 16 * 1024)]
    inline_limit: usize,

    /// Comma-separated tool allow-list (all tools when omitted)
    #[arg(long, env = "TOOLVISOR_ALLOW_TOOLS", value_delimiter = ',')]
    allow_tools: Option<Vec<String>>,

    #[arg(long, env = "TOOLVISOR_ARTIFACT_DIR", default_value = "./artifacts")]
    artifact_dir: PathBuf,

    #[arg(long, value_enum, env = "TOOLVISOR_ENVIRONMENT", default_value = "static")]
    environment: EnvironmentMode,

    /// Tool server URL for the static environment mode
    #[arg(long, env = "TOOLVISOR_ENVIRONMENT_URL", default_value = "http://localhost:8080")]
    environment_url: String,

    /// Tool server executable for the process and pool modes
    #[arg(long, env = "TOOLVISOR_TOOLSERVER_PROGRAM", default_value = "toolserver")]
    toolserver_program: String,

    /// Tool server arguments; `{port}` and `{session_id}` are substituted
    #[arg(long, env = "TOOLVISOR_TOOLSERVER_ARGS", value_delimiter = ' ', default_value = "--port {port}")]
    toolserver_args: Vec<String>,

    #[arg(long, env = "TOOLVISOR_BASE_PORT", default_value_t = 18080)]
    base_port: u16,

    /// Warm environments kept ready in pool mode
    #[arg(long, env = "TOOLVISOR_POOL_WARM", default_value_t = 2)]
    pool_warm: usize,

    /// Maximum environments (warm + active) in pool mode
    #[arg(long, env = "TOOLVISOR_POOL_MAX", default_value_t = 10)]
    pool_max: usize,

    /// Bound on environment provisioning, in seconds
    #[arg(long, env = "TOOLVISOR_PROVISION_TIMEOUT", default_value_t = 150)]
    provision_timeout_secs: u64,

    /// Probe the environment before every task run
    #[arg(long, env = "TOOLVISOR_HEALTH_CHECK_BEFORE_RUN")]
    health_check_before_run: bool,

    /// Stopped sessions are purged after this many seconds
    #[arg(long, env = "TOOLVISOR_SESSION_MAX_AGE", default_value_t = 24 * 60 * 60)]
    session_max_age_secs: u64,

    /// OTLP gRPC endpoint for trace export (e.g. http://localhost:4317)
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,

    /// Emit JSON log lines
    #[arg(long, env = "TOOLVISOR_JSON_LOGS")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = Args::parse();

    init_tracing("toolvisor", args.otlp_endpoint.as_deref(), args.json_logs)?;

    let result = run(args).await;
    if let Err(e) = &result {
        tracing::error!(error = %e, "toolvisor exited with an error");
    }

    shutdown_tracing();
    result
}

async fn run(args: Args) -> Result<(), BoxError> {
    let settings = ProviderSettings::load(&args.settings)?;
    let mut providers: Vec<Arc<dyn ProviderClient>> = Vec::with_capacity(settings.providers.len());
    for config in settings.providers {
        let client = HttpProviderClient::new(config, ProviderTimeouts::default())?;
        providers.push(Arc::new(client));
    }

    let model = build_model(&args)?;
    let config = AgentConfig {
        model: model.model().to_string(),
        max_turns: args.max_turns,
        tool_timeout: Duration::from_secs(args.tool_timeout_secs),
        inline_limit: args.inline_limit,
        allowed_tools: args.allow_tools.clone(),
        ..AgentConfig::default()
    };

    let local = EnvironmentTools::new(Duration::from_secs(10), config.tool_timeout)?;
    let artifacts = ArtifactStore::new(&args.artifact_dir);

    let agent = Arc::new(
        Agent::build(
            config,
            providers,
            model,
            Arc::new(local),
            Arc::new(artifacts),
        )
        .await,
    );

    let catalog = agent.catalog();
    if !catalog.unavailable_providers().is_empty() {
        warn!(
            providers = ?catalog.unavailable_providers(),
            "Some providers are unavailable; their tools are not in the catalog"
        );
    }
    for collision in catalog.collisions() {
        warn!(
            tool = %collision.name,
            kept = %collision.kept_source,
            dropped = %collision.dropped_source,
            "Tool name collision"
        );
    }

    let (provisioner, pool) = build_provisioner(&args).await?;

    let sessions = Arc::new(SessionManager::new(
        agent,
        provisioner,
        SessionManagerConfig {
            provision_timeout: Duration::from_secs(args.provision_timeout_secs),
            health_check_before_run: args.health_check_before_run,
            ..SessionManagerConfig::default()
        },
    )?);

    let max_age = Duration::from_secs(args.session_max_age_secs);
    let reaper = SessionManager::start_reaper(
        sessions.clone(),
        Duration::from_secs(60).min(max_age.max(Duration::from_secs(1))),
        max_age,
    );
    let replenisher = pool
        .as_ref()
        .map(|pool| EnvironmentPool::start_replenisher(pool.clone(), Duration::from_secs(5)));

    let app = create_router(ApiState::new(sessions.clone()));
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    info!(addr = %args.bind, "toolvisor listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    reaper.abort();
    if let Some(replenisher) = replenisher {
        replenisher.abort();
    }
    sessions.shutdown().await;
    if let Some(pool) = pool {
        pool.shutdown().await;
    }

    Ok(())
}

fn build_model(args: &Args) -> Result<Arc<dyn ModelClient>, BoxError> {
    match args.model_backend {
        ModelBackend::Anthropic => {
            let api_key = args.anthropic_api_key.clone().unwrap_or_default();
            let mut config = AnthropicConfig::new(
                api_key,
                args.model.clone().unwrap_or_else(|| AgentConfig::default().model),
            );
            if let Some(base_url) = &args.anthropic_base_url {
                config.base_url = base_url.clone();
            }
            Ok(Arc::new(AnthropicClient::new(config)?))
        }
        ModelBackend::Ollama => {
            let model = args.model.clone().unwrap_or_else(|| "qwen3".to_string());
            Ok(Arc::new(OllamaClient::new(
                &args.ollama_url,
                model,
                Duration::from_secs(300),
            )?))
        }
    }
}

async fn build_provisioner(
    args: &Args,
) -> Result<(Arc<dyn Provisioner>, Option<Arc<EnvironmentPool>>), BoxError> {
    let process_config = || ProcessConfig {
        program: args.toolserver_program.clone(),
        args: args.toolserver_args.clone(),
        base_port: args.base_port,
        ..ProcessConfig::default()
    };

    match args.environment {
        EnvironmentMode::Static => {
            info!(endpoint = %args.environment_url, "Using static environment");
            let provisioner: Arc<dyn Provisioner> =
                Arc::new(StaticProvisioner::new(&args.environment_url));
            Ok((provisioner, None))
        }
        EnvironmentMode::Process => {
            let provisioner: Arc<dyn Provisioner> =
                Arc::new(ProcessProvisioner::new(process_config())?);
            Ok((provisioner, None))
        }
        EnvironmentMode::Pool => {
            let inner = Arc::new(ProcessProvisioner::new(process_config())?);
            let pool = Arc::new(EnvironmentPool::new(inner, args.pool_warm, args.pool_max));
            pool.initialize().await;
            let provisioner: Arc<dyn Provisioner> = pool.clone();
            Ok((provisioner, Some(pool)))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
