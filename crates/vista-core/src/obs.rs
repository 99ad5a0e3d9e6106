//! Structured observability hooks for Vista request lifecycles.
//!
//! Every event carries a stable `event = "..."` field so log pipelines (and
//! log-stream subscribers) can filter on it.

use tracing::{info, warn, Span};

/// Request-scoped span, attached to async work with
/// [`tracing::Instrument::instrument`].
///
/// ```ignore
/// svc.build(entry, &opts).instrument(obs::request_span("build")).await
/// ```
pub fn request_span(operation: &'static str) -> Span {
    tracing::info_span!("vista.request", op = operation)
}

pub fn emit_build_published(entry: &str, version: &str, size: usize) {
    info!(event = "build.published", entry = %entry, version = %version, size = size);
}

/// Capability issued. The signature itself is never logged.
pub fn emit_capability_issued(path: &str, expiry: i64) {
    info!(event = "capability.issued", path = %path, expiry = expiry);
}

pub fn emit_capability_denied(reason: &str) {
    warn!(event = "capability.denied", reason = %reason);
}

pub fn emit_vcs_invoked(subcommand: &str, exit_code: Option<i32>, duration_ms: u64) {
    info!(
        event = "vcs.invoked",
        subcommand = %subcommand,
        exit_code = ?exit_code,
        duration_ms = duration_ms,
    );
}

pub fn emit_vcs_timeout(subcommand: &str, limit_ms: u64) {
    warn!(event = "vcs.timeout", subcommand = %subcommand, limit_ms = limit_ms);
}

/// A log-stream subscriber fell `capacity` lines behind and was dropped.
pub fn emit_log_subscriber_lagged(subscriber: u64, capacity: usize) {
    warn!(event = "logs.subscriber_lagged", subscriber = subscriber, capacity = capacity);
}

pub fn emit_agent_stream_finished(events: u64, terminal: &str) {
    info!(event = "agent.stream_finished", events = events, terminal = %terminal);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_span_metadata() {
        let span = request_span("build");
        // Disabled when no subscriber is installed; the name is still fixed.
        if let Some(meta) = span.metadata() {
            assert_eq!(meta.name(), "vista.request");
        }
    }
}
