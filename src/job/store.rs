//! The job store: a `JobStore` trait plus a Postgres-backed implementation.

use async_trait::async_trait;
use chrono::Utc;
use deadpool_postgres::Pool;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::error::{DatabaseError, JobStoreError};

use super::model::{Job, JobKind, JobStatus, RequestPayload, SlotName, Summary};

/// Abstraction over job persistence so the orchestrator and workers never
/// depend on the concrete backend.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_job(
        &self,
        user_ref: &str,
        kind: JobKind,
        request: RequestPayload,
    ) -> Result<Job, JobStoreError>;

    async fn get_job(&self, id: Uuid) -> Result<Job, JobStoreError>;

    /// Transition a job's status. Rejects any transition not allowed by
    /// `JobStatus::can_transition_to`.
    async fn update_status(
        &self,
        id: Uuid,
        next: JobStatus,
        error: Option<&str>,
    ) -> Result<(), JobStoreError>;

    /// Commit a worker's result into its owning slot. Each slot is owned by
    /// exactly one worker kind; callers never need to coordinate writes to
    /// different slots on the same job.
    async fn set_slot(&self, id: Uuid, slot: SlotValue) -> Result<(), JobStoreError>;
}

/// The value being committed to a named slot.
#[derive(Debug, Clone)]
pub enum SlotValue {
    Report(String),
    /// Charts are merged key-by-key into the existing `charts_payload`
    /// object rather than overwritten, since the chart worker commits
    /// incrementally across several model turns.
    Charts(serde_json::Map<String, serde_json::Value>),
    Retirement(serde_json::Value),
    Summary(Summary),
}

impl SlotValue {
    fn name(&self) -> SlotName {
        match self {
            SlotValue::Report(_) => SlotName::Report,
            SlotValue::Charts(_) => SlotName::Charts,
            SlotValue::Retirement(_) => SlotName::Retirement,
            SlotValue::Summary(_) => SlotName::Summary,
        }
    }
}

/// Postgres-backed `JobStore`.
pub struct PostgresJobStore {
    pool: Pool,
}

impl PostgresJobStore {
    pub async fn new(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let pool = config.connect_pool().await?;
        Ok(Self { pool })
    }

    /// Build a store atop an already-connected pool, e.g. one shared with
    /// the startup migration runner.
    pub fn from_pool(pool: Pool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Result<deadpool_postgres::Object, JobStoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| JobStoreError::BackendUnavailable(e.to_string()))
    }

    fn row_to_job(row: &tokio_postgres::Row) -> Result<Job, JobStoreError> {
        let status_str: String = row.get("status");
        let status: JobStatus = status_str
            .parse()
            .map_err(|e: String| JobStoreError::Database(DatabaseError::Migration(e)))?;
        let kind_str: String = row.get("kind");
        let kind = match kind_str.as_str() {
            "retirement_only" => JobKind::RetirementOnly,
            _ => JobKind::PortfolioAnalysis,
        };
        let request_json: serde_json::Value = row.get("request_payload");
        let request_payload: RequestPayload = serde_json::from_value(request_json)
            .map_err(|e| JobStoreError::Database(DatabaseError::Serialization(e)))?;
        let summary_json: Option<serde_json::Value> = row.get("summary_payload");
        let summary_payload = summary_json
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| JobStoreError::Database(DatabaseError::Serialization(e)))?;

        Ok(Job {
            id: row.get("id"),
            user_ref: row.get("user_ref"),
            kind,
            status,
            request_payload,
            report_payload: row.get("report_payload"),
            charts_payload: row.get("charts_payload"),
            retirement_payload: row.get("retirement_payload"),
            summary_payload,
            error: row.get("error"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
        })
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn create_job(
        &self,
        user_ref: &str,
        kind: JobKind,
        request: RequestPayload,
    ) -> Result<Job, JobStoreError> {
        let conn = self.conn().await?;
        let id = Uuid::new_v4();
        let now = Utc::now();
        let request_json = serde_json::to_value(&request)
            .map_err(|e| JobStoreError::Database(DatabaseError::Serialization(e)))?;

        conn.execute(
            r#"
            INSERT INTO jobs (
                id, user_ref, kind, status, request_payload, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $6)
            "#,
            &[
                &id,
                &user_ref,
                &kind.as_str(),
                &JobStatus::Pending.as_str(),
                &request_json,
                &now,
            ],
        )
        .await
        .map_err(|e| JobStoreError::Database(DatabaseError::Query(e)))?;

        Ok(Job {
            id,
            user_ref: user_ref.to_string(),
            kind,
            status: JobStatus::Pending,
            request_payload: request,
            report_payload: None,
            charts_payload: None,
            retirement_payload: None,
            summary_payload: None,
            error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        })
    }

    async fn get_job(&self, id: Uuid) -> Result<Job, JobStoreError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                r#"
                SELECT id, user_ref, kind, status, request_payload, report_payload,
                       charts_payload, retirement_payload, summary_payload, error,
                       created_at, updated_at, started_at, completed_at
                FROM jobs WHERE id = $1
                "#,
                &[&id],
            )
            .await
            .map_err(|e| JobStoreError::Database(DatabaseError::Query(e)))?;

        match row {
            Some(row) => Self::row_to_job(&row),
            None => Err(JobStoreError::NotFound { id }),
        }
    }

    async fn update_status(
        &self,
        id: Uuid,
        next: JobStatus,
        error: Option<&str>,
    ) -> Result<(), JobStoreError> {
        let conn = self.conn().await?;

        // The only status this transition is valid from. Folding that into
        // the UPDATE's WHERE clause (rather than checking with a separate
        // SELECT first) makes the pending->running lease in §5 atomic: two
        // concurrent deliveries of the same job can both race to call this,
        // but only one UPDATE can match `status = 'pending'` and affect a
        // row, so only one ever transitions and the loser sees
        // `InvalidTransition` instead of silently clobbering the winner.
        let required_from = match next {
            JobStatus::Running => JobStatus::Pending,
            JobStatus::Completed | JobStatus::Failed => JobStatus::Running,
            JobStatus::Pending => {
                return Err(JobStoreError::InvalidTransition {
                    id,
                    from: "any",
                    to: next.as_str(),
                });
            }
        };

        let now = Utc::now();
        let started_at = if next == JobStatus::Running {
            Some(now)
        } else {
            None
        };
        let completed_at = if next.is_terminal() { Some(now) } else { None };

        let rows = conn
            .execute(
                r#"
            UPDATE jobs
            SET status = $2, error = $3, updated_at = $4,
                started_at = COALESCE($5, started_at),
                completed_at = COALESCE($6, completed_at)
            WHERE id = $1 AND status = $7
            "#,
                &[
                    &id,
                    &next.as_str(),
                    &error,
                    &now,
                    &started_at,
                    &completed_at,
                    &required_from.as_str(),
                ],
            )
            .await
            .map_err(|e| JobStoreError::Database(DatabaseError::Query(e)))?;

        if rows == 0 {
            // Either the job doesn't exist, or it's not in `required_from`
            // any more (already transitioned, possibly by a racing
            // delivery). Fetch the current status so the error is useful.
            let current = self.get_job(id).await?;
            return Err(JobStoreError::InvalidTransition {
                id,
                from: current.status.as_str(),
                to: next.as_str(),
            });
        }

        Ok(())
    }

    async fn set_slot(&self, id: Uuid, slot: SlotValue) -> Result<(), JobStoreError> {
        let mut conn = self.conn().await?;
        let now = Utc::now();
        let slot_name = slot.name();

        match slot {
            SlotValue::Report(text) => {
                conn.execute(
                    "UPDATE jobs SET report_payload = $2, updated_at = $3 WHERE id = $1",
                    &[&id, &text, &now],
                )
                .await
                .map_err(|e| JobStoreError::Database(DatabaseError::Query(e)))?;
            }
            SlotValue::Charts(incoming) => {
                // Several chart-worker turns merge into the same slot, so the
                // read-modify-write has to happen under a row lock — two
                // concurrent commits (e.g. a redelivered job racing the
                // original) must not clobber each other's keys.
                let txn = conn
                    .transaction()
                    .await
                    .map_err(|e| JobStoreError::Database(DatabaseError::Query(e)))?;

                let existing: Option<serde_json::Value> = txn
                    .query_one(
                        "SELECT charts_payload FROM jobs WHERE id = $1 FOR UPDATE",
                        &[&id],
                    )
                    .await
                    .map_err(|e| JobStoreError::Database(DatabaseError::Query(e)))?
                    .get("charts_payload");

                let mut merged = existing
                    .and_then(|v| v.as_object().cloned())
                    .unwrap_or_default();
                for (key, value) in incoming {
                    merged.insert(key, value);
                }
                let merged_value = serde_json::Value::Object(merged);

                txn.execute(
                    "UPDATE jobs SET charts_payload = $2, updated_at = $3 WHERE id = $1",
                    &[&id, &merged_value, &now],
                )
                .await
                .map_err(|e| JobStoreError::Database(DatabaseError::Query(e)))?;

                txn.commit()
                    .await
                    .map_err(|e| JobStoreError::Database(DatabaseError::Query(e)))?;
            }
            SlotValue::Retirement(value) => {
                conn.execute(
                    "UPDATE jobs SET retirement_payload = $2, updated_at = $3 WHERE id = $1",
                    &[&id, &value, &now],
                )
                .await
                .map_err(|e| JobStoreError::Database(DatabaseError::Query(e)))?;
            }
            SlotValue::Summary(summary) => {
                let value = serde_json::to_value(&summary)
                    .map_err(|e| JobStoreError::Database(DatabaseError::Serialization(e)))?;
                conn.execute(
                    "UPDATE jobs SET summary_payload = $2, updated_at = $3 WHERE id = $1",
                    &[&id, &value, &now],
                )
                .await
                .map_err(|e| JobStoreError::Database(DatabaseError::Query(e)))?;
            }
        }

        tracing::debug!(job_id = %id, slot = slot_name.as_str(), "committed result slot");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portfolio::PortfolioSnapshot;

    fn request() -> RequestPayload {
        RequestPayload {
            portfolio: PortfolioSnapshot::empty(),
        }
    }

    #[test]
    fn slot_value_names_match_their_kind() {
        assert_eq!(SlotValue::Report(String::new()).name(), SlotName::Report);
        assert_eq!(
            SlotValue::Charts(serde_json::Map::new()).name(),
            SlotName::Charts
        );
        assert_eq!(
            SlotValue::Retirement(serde_json::Value::Null).name(),
            SlotName::Retirement
        );
        assert_eq!(
            SlotValue::Summary(Summary { workers: vec![] }).name(),
            SlotName::Summary
        );
    }

    #[test]
    fn request_payload_round_trips_through_json() {
        let req = request();
        let value = serde_json::to_value(&req).unwrap();
        let back: RequestPayload = serde_json::from_value(value).unwrap();
        assert!(back.portfolio.is_cash_only());
    }
}
