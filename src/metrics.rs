//! Prometheus metrics
//!
//! All metrics are registered in the default registry on first use;
//! [`render`] produces the text exposition format.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram, register_histogram_vec, register_int_counter, CounterVec,
    Encoder, Histogram, HistogramVec, IntCounter, TextEncoder,
};

lazy_static! {
    // ─────────────────────────────────────────────────────────────────────────────
    // Agent Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Agent runs by termination.
    ///
    /// Labels:
    /// - termination: "final_response", "turn_budget_exhausted", "deadline_exceeded", "fatal_error"
    pub static ref AGENT_RUNS: CounterVec = register_counter_vec!(
        "codeagent_agent_runs_total",
        "Agent runs by termination",
        &["termination"]
    ).expect("failed to register AGENT_RUNS metric");

    /// Completion turns used per run.
    pub static ref AGENT_TURNS: Histogram = register_histogram!(
        "codeagent_agent_turns",
        "Completion turns per agent run",
        vec![1.0, 2.0, 3.0, 4.0, 5.0, 8.0, 13.0]
    ).expect("failed to register AGENT_TURNS metric");

    /// Tool calls by tool name and outcome ("ok" or "error").
    pub static ref TOOL_CALLS: CounterVec = register_counter_vec!(
        "codeagent_tool_calls_total",
        "Tool calls executed by the agent",
        &["tool", "outcome"]
    ).expect("failed to register TOOL_CALLS metric");

    /// Completion API latency by model.
    pub static ref LLM_CALL_DURATION: HistogramVec = register_histogram_vec!(
        "codeagent_llm_call_duration_seconds",
        "Completion API call duration",
        &["model"],
        vec![0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
    ).expect("failed to register LLM_CALL_DURATION metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Sandbox Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Sandbox operations by operation and outcome.
    ///
    /// Labels:
    /// - op: "create", "connect", "hydrate", "install", "start", "restart", "stop"
    /// - outcome: "ok" or "error"
    pub static ref SANDBOX_OPS: CounterVec = register_counter_vec!(
        "codeagent_sandbox_operations_total",
        "Sandbox lifecycle operations",
        &["op", "outcome"]
    ).expect("failed to register SANDBOX_OPS metric");

    /// Sandbox operation duration by operation.
    pub static ref SANDBOX_OP_DURATION: HistogramVec = register_histogram_vec!(
        "codeagent_sandbox_operation_duration_seconds",
        "Sandbox lifecycle operation duration",
        &["op"],
        vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 180.0, 600.0]
    ).expect("failed to register SANDBOX_OP_DURATION metric");

    /// Hot restarts that fell back to a full recreate.
    pub static ref RESTART_FALLBACKS: IntCounter = register_int_counter!(
        "codeagent_restart_fallbacks_total",
        "Hot restarts that fell back to stop and recreate"
    ).expect("failed to register RESTART_FALLBACKS metric");
}

/// Record one sandbox operation
pub fn observe_sandbox_op(op: &str, ok: bool, elapsed: std::time::Duration) {
    SANDBOX_OPS
        .with_label_values(&[op, if ok { "ok" } else { "error" }])
        .inc();
    SANDBOX_OP_DURATION.with_label_values(&[op]).observe(elapsed.as_secs_f64());
}

/// Render every registered metric in the Prometheus text format
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
