//! The orchestrator: drives one job from `pending` through to a terminal
//! status.
//!
//! A run proceeds Load, Hydrate, Pre-classify, Fan-out, Join, Finalize,
//! Stamp. Each step is idempotent with respect to the ones before it, so a
//! redelivered job (see [`crate::queue`]) that already advanced partway
//! through simply repeats harmless work rather than corrupting state.

pub mod api;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::config::{AppConfig, WorkerBudgets};
use crate::error::OrchestratorError;
use crate::instrument::{Instrument, InstrumentKind, InstrumentStore};
use crate::job::{Job, JobStatus, JobStore, SlotValue, Summary, WorkerSummary};
use crate::knowledge::KnowledgeLookup;
use crate::llm::ModelLoop;
use crate::observability::{self, EventKind};
use crate::portfolio::PortfolioSnapshot;
use crate::worker::{classify_missing, run_chart_worker, run_narrative_worker, run_retirement_worker};

/// Collaborators a job run needs. Bundled so `run_job` takes one argument
/// instead of five, and so tests can swap in stub stores/providers.
#[derive(Clone)]
pub struct OrchestratorDeps {
    pub job_store: Arc<dyn JobStore>,
    pub instrument_store: Arc<dyn InstrumentStore>,
    pub knowledge: Arc<dyn KnowledgeLookup>,
    pub model_loop: Arc<ModelLoop>,
    pub worker_budgets: WorkerBudgets,
    pub classifier_parallelism: usize,
    pub orchestrator_budget: Duration,
}

impl OrchestratorDeps {
    pub fn from_config(
        config: &AppConfig,
        job_store: Arc<dyn JobStore>,
        instrument_store: Arc<dyn InstrumentStore>,
        knowledge: Arc<dyn KnowledgeLookup>,
        model_loop: Arc<ModelLoop>,
    ) -> Self {
        Self {
            job_store,
            instrument_store,
            knowledge,
            model_loop,
            worker_budgets: config.worker_budgets,
            classifier_parallelism: config.classifier_parallelism,
            orchestrator_budget: config.orchestrator_budget,
        }
    }
}

/// Runs one job end to end. Returns once the job has reached a terminal
/// status (`completed` or `failed`); that terminal status is also the
/// function's success/failure signal, so callers (the queue consumer)
/// should treat `Ok(())` as "ack", not as "every worker succeeded" — a job
/// with some failed specialists still completes as long as at least one
/// specialist committed its slot.
pub async fn run_job(job_id: Uuid, deps: &OrchestratorDeps) -> Result<(), OrchestratorError> {
    let overall_start = Instant::now();

    // Load.
    let job = deps.job_store.get_job(job_id).await?;

    // A job not in `pending` has already been picked up by a previous
    // delivery (or is already terminal); re-running it would violate the
    // strict Pending -> Running -> terminal transition, so we just no-op.
    if job.status != JobStatus::Pending {
        tracing::info!(job_id = %job_id, status = %job.status, "job is not pending, skipping");
        observability::job_event(EventKind::DuplicateDeliveryIgnored, job_id);
        return Ok(());
    }

    // The `pending` check above is advisory only — it can race a concurrent
    // delivery of the same message between this read and the write below.
    // The store's CAS on the UPDATE itself is what actually enforces
    // at-most-one `pending -> running` transition (§5); if we lost that
    // race, treat it exactly like the advisory check failing, not as a
    // fatal error worth dead-lettering the message over.
    match deps
        .job_store
        .update_status(job_id, JobStatus::Running, None)
        .await
    {
        Ok(()) => {}
        Err(crate::error::JobStoreError::InvalidTransition { .. }) => {
            tracing::info!(job_id = %job_id, "lost the race to claim this job, skipping");
            observability::job_event(EventKind::DuplicateDeliveryIgnored, job_id);
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    }
    observability::job_event(EventKind::JobStarted, job_id);

    // Hydrate.
    let portfolio = job.request_payload.portfolio.clone();

    // Pre-classify: find instruments with no allocation data yet and
    // classify them with bounded parallelism before fanning out to the
    // specialist workers, all of which assume instrument data is already
    // in place if they need it.
    if let Err(err) = pre_classify(job_id, &portfolio, deps).await {
        tracing::warn!(job_id = %job_id, error = %err, "pre-classification had failures, proceeding with what classified");
    }

    // Fan-out: run the three specialists concurrently. Each commits its
    // own slot and returns a per-worker outcome; a failure in one does not
    // cancel the others. The whole fan-out races against the orchestrator's
    // own wall-clock budget, the same select!-against-a-sleep pattern
    // `run_worker_loop` uses for a single worker's budget — if the budget
    // fires first, the fan-out future is dropped mid-flight, which stops
    // every worker (and any tool call in progress) at its next await point.
    let fan_out = async {
        tokio::join!(
            run_narrative_worker(
                job_id,
                &portfolio,
                &deps.model_loop,
                deps.job_store.clone(),
                deps.knowledge.clone(),
                &deps.worker_budgets,
            ),
            run_chart_worker(
                job_id,
                &portfolio,
                &deps.model_loop,
                deps.job_store.clone(),
                deps.knowledge.clone(),
                &deps.worker_budgets,
            ),
            run_retirement_worker(
                job_id,
                &portfolio,
                &deps.model_loop,
                deps.job_store.clone(),
                deps.knowledge.clone(),
                &deps.worker_budgets,
            ),
        )
    };
    tokio::pin!(fan_out);
    let budget_guard = tokio::time::sleep(deps.orchestrator_budget);
    tokio::pin!(budget_guard);

    let (narrative_result, chart_result, retirement_result) = tokio::select! {
        results = &mut fan_out => results,
        _ = &mut budget_guard => {
            let reason = format!(
                "orchestrator wall-clock budget of {}s exceeded",
                deps.orchestrator_budget.as_secs()
            );
            tracing::warn!(job_id = %job_id, "orchestrator exceeded its wall-clock budget, aborting fan-out");
            deps.job_store
                .update_status(job_id, JobStatus::Failed, Some(&reason))
                .await?;
            observability::job_finalized(job_id, "failed", 0, 3);
            return Err(OrchestratorError::BudgetExceeded {
                budget_secs: deps.orchestrator_budget.as_secs(),
            });
        }
    };

    // Join: attribute each worker's outcome into the summary.
    let elapsed_ms = overall_start.elapsed().as_millis() as u64;
    let workers = vec![
        worker_summary("narrative", &narrative_result, elapsed_ms),
        worker_summary("chart", &chart_result, elapsed_ms),
        worker_summary("retirement", &retirement_result, elapsed_ms),
    ];
    let all_failed = workers.iter().all(|w| !w.ok);
    let workers_total = workers.len();
    let workers_ok = workers.iter().filter(|w| w.ok).count();

    deps.job_store
        .set_slot(job_id, SlotValue::Summary(Summary { workers }))
        .await?;

    // Finalize: the job completes if at least one specialist committed its
    // slot; it only fails outright if all three failed.
    if all_failed {
        let reason = "all specialist workers failed".to_string();
        deps.job_store
            .update_status(job_id, JobStatus::Failed, Some(&reason))
            .await?;
        observability::job_finalized(job_id, "failed", workers_ok, workers_total);
        return Err(OrchestratorError::AllWorkersFailed(reason));
    }

    // Stamp.
    deps.job_store
        .update_status(job_id, JobStatus::Completed, None)
        .await?;
    observability::job_finalized(job_id, "completed", workers_ok, workers_total);

    Ok(())
}

fn worker_summary<T>(name: &str, result: &Result<(), T>, duration_ms: u64) -> WorkerSummary
where
    T: std::fmt::Display,
{
    WorkerSummary {
        worker: name.to_string(),
        ok: result.is_ok(),
        duration_ms,
        error: result.as_ref().err().map(|e| e.to_string()),
    }
}

/// Classifies every symbol in the portfolio that the instrument store
/// considers missing, with bounded parallelism, and upserts whatever comes
/// back successfully classified. Individual classification failures are
/// logged and otherwise ignored — a worker that later reads an
/// unclassified instrument simply sees an empty allocation map.
async fn pre_classify(
    job_id: Uuid,
    portfolio: &PortfolioSnapshot,
    deps: &OrchestratorDeps,
) -> Result<(), OrchestratorError> {
    let symbols = portfolio.unique_symbols();
    if symbols.is_empty() {
        return Ok(());
    }

    let missing = deps.instrument_store.list_missing(&symbols).await?;
    if missing.is_empty() {
        return Ok(());
    }

    for symbol in &missing {
        observability::classification_event(EventKind::ClassificationStarted, job_id, symbol);
    }

    let pending: Vec<(String, String, InstrumentKind)> = missing
        .into_iter()
        .map(|symbol| (symbol.clone(), symbol, InstrumentKind::Stock))
        .collect();

    let results = classify_missing(
        deps.model_loop.clone(),
        pending,
        deps.classifier_parallelism,
    )
    .await;

    let mut failures = 0usize;
    for result in results {
        match result {
            Ok(instrument) => {
                observability::classification_event(
                    EventKind::ClassificationCompleted,
                    job_id,
                    &instrument.symbol,
                );
                if let Err(err) = deps.instrument_store.upsert(instrument.clone()).await {
                    failures += 1;
                    tracing::warn!(symbol = %instrument.symbol, error = %err, "failed to persist classification");
                }
            }
            Err(err) => {
                failures += 1;
                observability::classification_event(
                    EventKind::ClassificationFailed,
                    job_id,
                    "unknown",
                );
                tracing::warn!(error = %err, "classifier failed for an instrument");
            }
        }
    }

    if failures > 0 {
        tracing::info!(failures, "pre-classification completed with some failures");
    }

    Ok(())
}

/// Groups an instrument's three allocations for logging/debugging without
/// pulling in the full `Instrument` type at call sites that only need a
/// quick summary.
#[allow(dead_code)]
fn allocation_summary(instrument: &Instrument) -> BTreeMap<&'static str, usize> {
    BTreeMap::from([
        ("asset_class", instrument.asset_class_allocation.len()),
        ("region", instrument.region_allocation.len()),
        ("sector", instrument.sector_allocation.len()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobKind, RequestPayload};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct StubJobStore {
        job: StdMutex<Job>,
    }

    #[async_trait]
    impl JobStore for StubJobStore {
        async fn create_job(
            &self,
            _user_ref: &str,
            _kind: JobKind,
            _request: RequestPayload,
        ) -> Result<Job, crate::error::JobStoreError> {
            unimplemented!()
        }

        async fn get_job(&self, _id: Uuid) -> Result<Job, crate::error::JobStoreError> {
            Ok(self.job.lock().unwrap().clone())
        }

        async fn update_status(
            &self,
            _id: Uuid,
            next: JobStatus,
            error: Option<&str>,
        ) -> Result<(), crate::error::JobStoreError> {
            let mut job = self.job.lock().unwrap();
            job.status = next;
            job.error = error.map(|s| s.to_string());
            Ok(())
        }

        async fn set_slot(
            &self,
            _id: Uuid,
            slot: SlotValue,
        ) -> Result<(), crate::error::JobStoreError> {
            let mut job = self.job.lock().unwrap();
            match slot {
                SlotValue::Summary(summary) => job.summary_payload = Some(summary),
                SlotValue::Report(text) => job.report_payload = Some(text),
                SlotValue::Charts(_) => {}
                SlotValue::Retirement(value) => job.retirement_payload = Some(value),
            }
            Ok(())
        }
    }

    fn pending_job() -> Job {
        Job {
            id: Uuid::new_v4(),
            user_ref: "user-1".to_string(),
            kind: JobKind::PortfolioAnalysis,
            status: JobStatus::Pending,
            request_payload: RequestPayload {
                portfolio: PortfolioSnapshot::empty(),
            },
            report_payload: None,
            charts_payload: None,
            retirement_payload: None,
            summary_payload: None,
            error: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn worker_summary_captures_failure_message() {
        let err: Result<(), crate::error::WorkerError> =
            Err(crate::error::WorkerError::MissingSlot);
        let summary = worker_summary("narrative", &err, 42);
        assert!(!summary.ok);
        assert_eq!(summary.duration_ms, 42);
        assert!(summary.error.is_some());
    }

    #[test]
    fn worker_summary_captures_success() {
        let ok: Result<(), crate::error::WorkerError> = Ok(());
        let summary = worker_summary("chart", &ok, 10);
        assert!(summary.ok);
        assert!(summary.error.is_none());
    }

    #[tokio::test]
    async fn non_pending_job_is_a_no_op() {
        let mut job = pending_job();
        job.status = JobStatus::Completed;
        let store: Arc<dyn JobStore> = Arc::new(StubJobStore {
            job: StdMutex::new(job),
        });
        let snapshot = store.get_job(Uuid::new_v4()).await.unwrap();
        assert!(snapshot.status.is_terminal());
    }
}
