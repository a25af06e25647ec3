use std::sync::Arc;

use uuid::Uuid;

use crate::config::WorkerBudgets;
use crate::error::WorkerError;
use crate::job::{JobStore, SlotName};
use crate::knowledge::KnowledgeLookup;
use crate::llm::ModelLoop;
use crate::portfolio::PortfolioSnapshot;
use crate::tools::{CommitReportTool, FetchKnowledgeTool, ToolContext, ToolRegistry};

use super::{run_worker_loop, WorkerSpec};

/// Writes a markdown analysis to the `report` slot, using
/// `fetch_knowledge` to ground its narrative and `commit_report` to deliver
/// the final text.
pub async fn run_narrative_worker(
    job_id: Uuid,
    portfolio: &PortfolioSnapshot,
    model_loop: &ModelLoop,
    job_store: Arc<dyn JobStore>,
    knowledge: Arc<dyn KnowledgeLookup>,
    budgets: &WorkerBudgets,
) -> Result<(), WorkerError> {
    let registry = ToolRegistry::new(vec![
        Arc::new(FetchKnowledgeTool),
        Arc::new(CommitReportTool),
    ]);
    let tool_ctx = ToolContext {
        job_id,
        job_store: job_store.clone(),
        knowledge,
    };

    let instructions = "You are a financial narrative writer. Use fetch_knowledge to ground \
         claims in retrieved context where it helps, then call commit_report exactly once with \
         a complete markdown analysis of the portfolio. Do not call commit_report more than \
         once."
        .to_string();

    let seed_message = format!(
        "Portfolio summary: {} accounts, {} positions, total cash {}.\nFull snapshot (JSON): {}",
        portfolio.accounts.len(),
        portfolio.position_count(),
        portfolio.total_cash(),
        serde_json::to_string(portfolio).unwrap_or_default(),
    );

    let spec = WorkerSpec {
        job_id,
        name: "narrative",
        instructions,
        seed_message,
        max_turns: budgets.narrative_max_turns,
        owned_slot: SlotName::Report,
        wall_clock_budget: budgets.wall_clock_budget,
    };

    run_worker_loop(spec, model_loop, &registry, &tool_ctx, &job_store).await
}
