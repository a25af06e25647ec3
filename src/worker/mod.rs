//! The worker runtime: seeds a prompt, runs the tool loop, enforces
//! max-turns and the result-commit rule.

mod chart;
mod classifier;
mod narrative;
mod retirement;

pub use chart::run_chart_worker;
pub use classifier::{classify_missing, run_classifier};
pub use narrative::run_narrative_worker;
pub use retirement::run_retirement_worker;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::WorkerError;
use crate::job::{JobStore, SlotName};
use crate::llm::{ChatMessage, ModelLoop, TurnOutcome};
use crate::observability::{self, EventKind};
use crate::tools::{ToolContext, ToolRegistry};

/// One worker's parameters: a job id, the portfolio snapshot baked into the
/// seed prompt, the instruction block, the tools it may call, a turn cap,
/// and the slot it owns.
pub struct WorkerSpec {
    pub job_id: Uuid,
    /// Name used in observability events and the finalized summary
    /// (`narrative`, `chart`, `retirement`).
    pub name: &'static str,
    pub instructions: String,
    pub seed_message: String,
    pub max_turns: u32,
    pub owned_slot: SlotName,
    pub wall_clock_budget: Duration,
}

/// Runs the tool-mode loop for one worker and enforces the result-commit
/// rule: once the model loop terminates (final reply or max-turns), the
/// worker checks that its owned slot was written by one of its tool calls.
/// If the slot is still empty, the worker fails — even if the model
/// produced a plausible-looking final reply.
pub async fn run_worker_loop(
    spec: WorkerSpec,
    model_loop: &ModelLoop,
    registry: &ToolRegistry,
    tool_ctx: &ToolContext,
    job_store: &Arc<dyn JobStore>,
) -> Result<(), WorkerError> {
    observability::worker_event(EventKind::WorkerStarted, spec.job_id, spec.name);

    let cancel = CancellationToken::new();
    let budget_guard = tokio::time::sleep(spec.wall_clock_budget);
    tokio::pin!(budget_guard);

    let mut messages = vec![
        ChatMessage::system(spec.instructions),
        ChatMessage::user(spec.seed_message),
    ];
    let schemas = registry.schemas();
    let tools: Vec<_> = schemas
        .into_iter()
        .map(|s| crate::llm::ToolDefinition {
            name: s.name,
            description: s.description,
            parameters: s.parameters,
        })
        .collect();

    let mut turn = 0;
    let result = 'turns: loop {
        if turn >= spec.max_turns {
            break 'turns Err(WorkerError::Llm(crate::error::LlmError::MaxTurnsExceeded {
                max_turns: spec.max_turns,
            }));
        }
        turn += 1;

        let outcome = tokio::select! {
            outcome = model_loop.run_turn(spec.job_id, messages.clone(), &tools, &cancel) => outcome,
            _ = &mut budget_guard => {
                cancel.cancel();
                break 'turns Err(WorkerError::BudgetExceeded {
                    budget_secs: spec.wall_clock_budget.as_secs(),
                });
            }
        };

        match outcome {
            Ok(TurnOutcome::Done(_text)) => break 'turns Ok(()),
            Ok(TurnOutcome::ToolCalls(calls)) => {
                for call in calls {
                    let started = Instant::now();
                    let invocation = registry.invoke(&call.name, call.arguments, tool_ctx).await;
                    match invocation {
                        Ok(output) => {
                            messages.push(ChatMessage::assistant(format!(
                                "(called {})",
                                call.name
                            )));
                            messages.push(ChatMessage::tool_result(call.id, output.text));
                        }
                        Err(err) => {
                            tracing::warn!(job_id = %spec.job_id, tool = %call.name, elapsed_ms = started.elapsed().as_millis() as u64, error = %err, "tool invocation failed");
                            break 'turns Err(WorkerError::Llm(crate::error::LlmError::ToolError(
                                err.to_string(),
                            )));
                        }
                    }
                }
            }
            Err(err) => break 'turns Err(WorkerError::Llm(err)),
        }
    };

    // The result-commit rule applies regardless of how the loop ended: even
    // a worker whose model call errored out after already committing its
    // slot is treated as successful (slot content wins).
    let job = job_store
        .get_job(spec.job_id)
        .await
        .map_err(WorkerError::JobStore)?;

    if job.has_slot(spec.owned_slot) {
        observability::worker_event(EventKind::WorkerCommitted, spec.job_id, spec.name);
        return Ok(());
    }

    match result {
        Ok(()) => {
            observability::worker_failed(spec.job_id, spec.name, "missing slot at loop end");
            Err(WorkerError::MissingSlot)
        }
        Err(err) => {
            observability::worker_failed(spec.job_id, spec.name, &err.to_string());
            Err(err)
        }
    }
}
