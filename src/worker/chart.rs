use std::sync::Arc;

use uuid::Uuid;

use crate::config::WorkerBudgets;
use crate::error::WorkerError;
use crate::job::{JobStore, SlotName};
use crate::knowledge::KnowledgeLookup;
use crate::llm::ModelLoop;
use crate::portfolio::PortfolioSnapshot;
use crate::tools::{CreateChartTool, ToolContext, ToolRegistry};

use super::{run_worker_loop, WorkerSpec};

const MIN_CHARTS: usize = 3;
const TARGET_CHARTS: usize = 4;

/// Builds 4-6 charts via repeated `create_chart` calls, merged into the
/// `charts` slot. Fails if fewer than `MIN_CHARTS` were committed by the
/// time the model stops calling tools.
pub async fn run_chart_worker(
    job_id: Uuid,
    portfolio: &PortfolioSnapshot,
    model_loop: &ModelLoop,
    job_store: Arc<dyn JobStore>,
    knowledge: Arc<dyn KnowledgeLookup>,
    budgets: &WorkerBudgets,
) -> Result<(), WorkerError> {
    let registry = ToolRegistry::new(vec![Arc::new(CreateChartTool)]);
    let tool_ctx = ToolContext {
        job_id,
        job_store: job_store.clone(),
        knowledge,
    };

    let instructions = format!(
        "You are a portfolio chart builder. Call create_chart between {MIN_CHARTS} and \
         {} times to describe the portfolio from different angles (e.g. asset class, \
         region, sector, account breakdown, cash vs invested). Each call must use parallel \
         lists of equal length for names, values, and colors (hex, like #336699). Stop once \
         you have produced a useful, non-redundant set of charts.",
        TARGET_CHARTS + 2,
    );

    let seed_message = format!(
        "Portfolio snapshot (JSON): {}",
        serde_json::to_string(portfolio).unwrap_or_default(),
    );

    let spec = WorkerSpec {
        job_id,
        name: "chart",
        instructions,
        seed_message,
        max_turns: budgets.chart_max_turns,
        owned_slot: SlotName::Charts,
        wall_clock_budget: budgets.wall_clock_budget,
    };

    let result = run_worker_loop(spec, model_loop, &registry, &tool_ctx, &job_store).await;

    // `run_worker_loop` already confirms the slot is non-empty; here we
    // additionally enforce the chart-count floor, which is specific to
    // this worker.
    if result.is_ok() {
        let job = job_store
            .get_job(job_id)
            .await
            .map_err(WorkerError::JobStore)?;
        let chart_count = job
            .charts_payload
            .as_ref()
            .and_then(|v| v.as_object())
            .map(|o| o.len())
            .unwrap_or(0);
        if chart_count < MIN_CHARTS {
            return Err(WorkerError::InsufficientResults {
                got: chart_count,
                min: MIN_CHARTS,
            });
        }
    }

    result
}
