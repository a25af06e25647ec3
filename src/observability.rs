//! Structured event stream for traces and metrics.
//!
//! Every orchestrator and worker step emits one of these events with the
//! job id as correlation key. Emission is best-effort: it goes straight to
//! `tracing` and must never be allowed to block or fail the critical path,
//! so every function here is synchronous and infallible.

use std::time::Duration;

use uuid::Uuid;

/// One point in the orchestrator/worker event taxonomy (see spec §4.9).
/// Kept as an enum (rather than a free-form string) so call sites can't
/// typo an event name, while `as_str` still gives the wire-stable name
/// used in log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    JobStarted,
    ClassificationStarted,
    ClassificationCompleted,
    ClassificationFailed,
    WorkerStarted,
    WorkerCommitted,
    WorkerFailed,
    ToolInvoked,
    ModelRetry,
    JobFinalized,
    DuplicateDeliveryIgnored,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::JobStarted => "job_started",
            EventKind::ClassificationStarted => "classification_started",
            EventKind::ClassificationCompleted => "classification_completed",
            EventKind::ClassificationFailed => "classification_failed",
            EventKind::WorkerStarted => "worker_started",
            EventKind::WorkerCommitted => "worker_committed",
            EventKind::WorkerFailed => "worker_failed",
            EventKind::ToolInvoked => "tool_invoked",
            EventKind::ModelRetry => "model_retry",
            EventKind::JobFinalized => "job_finalized",
            EventKind::DuplicateDeliveryIgnored => "duplicate_delivery_ignored",
        }
    }
}

/// Emits a bare job-correlated event with no extra fields.
pub fn job_event(kind: EventKind, job_id: Uuid) {
    tracing::info!(event = kind.as_str(), job_id = %job_id);
}

/// Emits a per-symbol classification event.
pub fn classification_event(kind: EventKind, job_id: Uuid, symbol: &str) {
    tracing::info!(event = kind.as_str(), job_id = %job_id, symbol);
}

/// Emits a per-worker lifecycle event.
pub fn worker_event(kind: EventKind, job_id: Uuid, worker: &str) {
    tracing::info!(event = kind.as_str(), job_id = %job_id, worker);
}

/// Emits `worker_failed` with the reason attached.
pub fn worker_failed(job_id: Uuid, worker: &str, reason: &str) {
    tracing::info!(
        event = EventKind::WorkerFailed.as_str(),
        job_id = %job_id,
        worker,
        reason,
    );
}

/// Emits `tool_invoked` with duration and output size, per §4.9.
pub fn tool_invoked(job_id: Uuid, tool: &str, duration: Duration, size: usize) {
    tracing::info!(
        event = EventKind::ToolInvoked.as_str(),
        job_id = %job_id,
        tool,
        duration_ms = duration.as_millis() as u64,
        size,
    );
}

/// Emits `model_retry` with the attempt number and the reason the call was
/// retried (e.g. "rate_limit", "timeout").
pub fn model_retry(job_id: Uuid, attempt: u32, reason: &str) {
    tracing::info!(
        event = EventKind::ModelRetry.as_str(),
        job_id = %job_id,
        attempt,
        reason,
    );
}

/// Emits `job_finalized` with the terminal status and per-worker outcome
/// count.
pub fn job_finalized(job_id: Uuid, status: &str, workers_ok: usize, workers_total: usize) {
    tracing::info!(
        event = EventKind::JobFinalized.as_str(),
        job_id = %job_id,
        status,
        workers_ok,
        workers_total,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_names_match_the_spec_taxonomy() {
        assert_eq!(EventKind::JobStarted.as_str(), "job_started");
        assert_eq!(
            EventKind::DuplicateDeliveryIgnored.as_str(),
            "duplicate_delivery_ignored"
        );
        assert_eq!(EventKind::JobFinalized.as_str(), "job_finalized");
    }
}
