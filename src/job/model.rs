//! The `Job` entity and its status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::portfolio::PortfolioSnapshot;

/// The kind of analysis a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    PortfolioAnalysis,
    RetirementOnly,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::PortfolioAnalysis => "portfolio_analysis",
            JobKind::RetirementOnly => "retirement_only",
        }
    }
}

/// The job's lifecycle status. Transitions are monotonic along
/// `Pending -> Running -> (Completed|Failed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Whether this status is terminal — `completed` or `failed` payload
    /// slots are frozen once reached.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether `self -> next` is one of the allowed transitions: a strict
    /// subset of `{pending->running, running->completed, running->failed}`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// The named payload slots a worker may own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotName {
    Report,
    Charts,
    Retirement,
    Summary,
}

impl SlotName {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotName::Report => "report",
            SlotName::Charts => "charts",
            SlotName::Retirement => "retirement",
            SlotName::Summary => "summary",
        }
    }
}

/// Request payload snapshot stored verbatim on job creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestPayload {
    pub portfolio: PortfolioSnapshot,
}

/// Per-worker status recorded in the finalized summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSummary {
    pub worker: String,
    pub ok: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// The orchestrator-produced summary written to the `summary` slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub workers: Vec<WorkerSummary>,
}

/// One end-to-end analysis job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub user_ref: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub request_payload: RequestPayload,
    pub report_payload: Option<String>,
    pub charts_payload: Option<serde_json::Value>,
    pub retirement_payload: Option<serde_json::Value>,
    pub summary_payload: Option<Summary>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Whether a given slot has been committed.
    pub fn has_slot(&self, slot: SlotName) -> bool {
        match slot {
            SlotName::Report => self.report_payload.is_some(),
            SlotName::Charts => self
                .charts_payload
                .as_ref()
                .and_then(|v| v.as_object())
                .is_some_and(|o| !o.is_empty()),
            SlotName::Retirement => self.retirement_payload.is_some(),
            SlotName::Summary => self.summary_payload.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_to_running_is_allowed() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Running));
    }

    #[test]
    fn running_to_completed_or_failed_is_allowed() {
        assert!(JobStatus::Running.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn terminal_states_cannot_transition() {
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn pending_cannot_skip_to_completed() {
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
    }

    #[test]
    fn status_round_trips_through_display_and_from_str() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            let s = status.to_string();
            assert_eq!(s.parse::<JobStatus>().unwrap(), status);
        }
    }
}
