//! Prometheus metrics for the agent loop
//!
//! All metrics live in the default registry; `gather_metrics()` renders them
//! in the text exposition format.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder,
    HistogramVec, IntCounter, IntCounterVec, TextEncoder,
};

lazy_static! {
    // ─────────────────────────────────────────────────────────────────────────────
    // Decisions
    // ─────────────────────────────────────────────────────────────────────────────

    /// Decisions returned by the engine.
    ///
    /// Labels:
    /// - action: "code", "fixError" or "stop"
    pub static ref AGENT_DECISIONS: IntCounterVec = register_int_counter_vec!(
        "notebook_agent_decisions_total",
        "Actions chosen by the decision engine",
        &["action"]
    ).expect("failed to register AGENT_DECISIONS metric");

    /// Model answers outside the offered set, coerced to "code".
    pub static ref DECISION_COERCIONS: IntCounter = register_int_counter!(
        "notebook_agent_decision_coercions_total",
        "Decisions coerced to code because the model chose an unavailable action"
    ).expect("failed to register DECISION_COERCIONS metric");

    /// Latency of the decision call, by provider.
    pub static ref DECISION_CALL_DURATION: HistogramVec = register_histogram_vec!(
        "notebook_agent_decision_call_duration_seconds",
        "Time spent waiting on the decision model",
        &["provider"],
        vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).expect("failed to register DECISION_CALL_DURATION metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Cycles & execution
    // ─────────────────────────────────────────────────────────────────────────────

    /// Finished query cycles.
    ///
    /// Labels:
    /// - outcome: "stopped", "aborted", "quota_exceeded", "provider_error"
    pub static ref AGENT_CYCLES: IntCounterVec = register_int_counter_vec!(
        "notebook_agent_cycles_total",
        "Query cycles by terminal outcome",
        &["outcome"]
    ).expect("failed to register AGENT_CYCLES metric");

    /// Executor runs by action and final state.
    ///
    /// Labels:
    /// - action: "code" or "fixError"
    /// - status: "completed", "aborted", "errored"
    pub static ref EXECUTIONS: IntCounterVec = register_int_counter_vec!(
        "notebook_agent_executions_total",
        "Executor streams by action and final state",
        &["action", "status"]
    ).expect("failed to register EXECUTIONS metric");

    /// Output chunks surfaced to the caller.
    pub static ref EXECUTION_CHUNKS: IntCounterVec = register_int_counter_vec!(
        "notebook_agent_execution_chunks_total",
        "Output chunks streamed from the execution backend",
        &["action"]
    ).expect("failed to register EXECUTION_CHUNKS metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Quota
    // ─────────────────────────────────────────────────────────────────────────────

    /// Anonymous calls refused because the budget ran out.
    pub static ref QUOTA_DENIED: IntCounter = register_int_counter!(
        "notebook_agent_quota_denied_total",
        "Anonymous calls refused by the usage budget"
    ).expect("failed to register QUOTA_DENIED metric");
}

/// Render every registered metric in Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
