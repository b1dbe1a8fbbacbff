//! Prometheus metrics for the orchestration core
//!
//! All metrics live in the default registry and are exposed as text by
//! `GET /metrics` through [`gather_text`].

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, Encoder, Histogram, HistogramVec, IntCounterVec, IntGauge,
    IntGaugeVec, TextEncoder,
};

lazy_static! {
    // ─────────────────────────────────────────────────────────────────────────────
    // Agent Loop Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Task runs by terminal status.
    ///
    /// Labels:
    /// - status: "completed", "max_turns_reached", "unexpected_stop", "cancelled", "error"
    pub static ref AGENT_TASKS: IntCounterVec = register_int_counter_vec!(
        "toolvisor_agent_tasks_total",
        "Agent task runs by terminal status",
        &["status"]
    ).expect("failed to register AGENT_TASKS metric");

    /// Model calls made per task run.
    pub static ref AGENT_TURNS: Histogram = register_histogram!(
        "toolvisor_agent_turns",
        "Model calls per task run",
        vec![1.0, 2.0, 3.0, 5.0, 8.0, 13.0, 25.0, 50.0]
    ).expect("failed to register AGENT_TURNS metric");

    /// Model call latency by model.
    pub static ref MODEL_CALL_DURATION: HistogramVec = register_histogram_vec!(
        "toolvisor_model_call_duration_seconds",
        "Latency of a single model call",
        &["model"],
        vec![0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
    ).expect("failed to register MODEL_CALL_DURATION metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Tool Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Tool dispatches.
    ///
    /// Labels:
    /// - tool: Tool name as requested by the model
    /// - target: "local", a provider id, or "none" when the tool is unknown
    /// - status: "ok" or the error code
    pub static ref TOOL_CALLS: IntCounterVec = register_int_counter_vec!(
        "toolvisor_tool_calls_total",
        "Tool dispatches by tool, target and status",
        &["tool", "target", "status"]
    ).expect("failed to register TOOL_CALLS metric");

    /// Tool dispatch latency, including normalization.
    pub static ref TOOL_CALL_DURATION: HistogramVec = register_histogram_vec!(
        "toolvisor_tool_call_duration_seconds",
        "Latency of a single tool dispatch",
        &["target"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 180.0]
    ).expect("failed to register TOOL_CALL_DURATION metric");

    /// Provider discovery outcomes at catalog build time.
    pub static ref PROVIDER_DISCOVERY: IntCounterVec = register_int_counter_vec!(
        "toolvisor_provider_discovery_total",
        "Provider tools/list outcomes",
        &["provider", "status"]
    ).expect("failed to register PROVIDER_DISCOVERY metric");

    /// Tools in the active catalog.
    pub static ref CATALOG_TOOLS: IntGauge = register_int_gauge!(
        "toolvisor_catalog_tools",
        "Tools registered in the catalog"
    ).expect("failed to register CATALOG_TOOLS metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Session & Environment Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Sessions per lifecycle status.
    pub static ref SESSIONS: IntGaugeVec = register_int_gauge_vec!(
        "toolvisor_sessions",
        "Sessions by lifecycle status",
        &["status"]
    ).expect("failed to register SESSIONS metric");

    /// Time to provision an environment (spawn + ready).
    pub static ref ENV_PROVISION_DURATION: HistogramVec = register_histogram_vec!(
        "toolvisor_environment_provision_duration_seconds",
        "Environment provisioning latency",
        &["provisioner"],
        vec![0.01, 0.1, 0.5, 1.0, 2.5, 5.0, 15.0, 30.0, 60.0, 150.0]
    ).expect("failed to register ENV_PROVISION_DURATION metric");

    /// Environments waiting in the warm pool.
    pub static ref POOL_WARM_ENVIRONMENTS: IntGauge = register_int_gauge!(
        "toolvisor_pool_warm_environments",
        "Pre-provisioned environments waiting in the pool"
    ).expect("failed to register POOL_WARM_ENVIRONMENTS metric");

    /// Environments handed out by the pool and not yet torn down.
    pub static ref POOL_ACTIVE_ENVIRONMENTS: IntGauge = register_int_gauge!(
        "toolvisor_pool_active_environments",
        "Pool environments currently owned by a session"
    ).expect("failed to register POOL_ACTIVE_ENVIRONMENTS metric");
}

/// Render every registered metric in the Prometheus text format
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8(buffer).unwrap_or_default()
}
