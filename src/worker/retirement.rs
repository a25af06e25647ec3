use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::config::WorkerBudgets;
use crate::error::WorkerError;
use crate::job::{JobStore, SlotName};
use crate::knowledge::KnowledgeLookup;
use crate::llm::ModelLoop;
use crate::portfolio::PortfolioSnapshot;
use crate::tools::{CommitRetirementTool, ToolContext, ToolRegistry};

use super::{run_worker_loop, WorkerSpec};

const SIMULATION_PATHS: usize = 2_000;
const SIMULATION_YEARS: u32 = 40;

/// A Monte-Carlo projection of retirement outcomes. Computed deterministically
/// before the worker's model loop starts; the loop only narrates it.
#[derive(Debug, Clone, Serialize)]
pub struct RetirementProjection {
    pub success_probability: f64,
    pub percentile_10: f64,
    pub percentile_50: f64,
    pub percentile_90: f64,
    pub years_to_depletion: Option<u32>,
}

/// Deterministic, O(portfolio size) Monte-Carlo-style projection. Uses a
/// fixed linear-congruential sequence rather than a system RNG so the same
/// portfolio always yields the same projection — useful for testing and for
/// keeping this pure CPU work free of any suspension point.
pub fn project_retirement(portfolio: &PortfolioSnapshot) -> RetirementProjection {
    let invested: f64 = portfolio
        .accounts
        .iter()
        .flat_map(|a| a.positions.iter())
        .map(|p| p.quantity.to_string().parse::<f64>().unwrap_or(0.0))
        .sum();
    let cash: f64 = portfolio
        .total_cash()
        .to_string()
        .parse()
        .unwrap_or(0.0);
    let starting_balance = invested * 100.0 + cash;
    let spending_target = portfolio
        .goals
        .annual_spending_target
        .map(|d| d.to_string().parse::<f64>().unwrap_or(40_000.0))
        .unwrap_or(40_000.0);

    if starting_balance <= 0.0 {
        return RetirementProjection {
            success_probability: 0.0,
            percentile_10: 0.0,
            percentile_50: 0.0,
            percentile_90: 0.0,
            years_to_depletion: Some(0),
        };
    }

    let mut seed: u64 = (starting_balance as u64).wrapping_mul(2_654_435_761).wrapping_add(1);
    let mut ending_balances = Vec::with_capacity(SIMULATION_PATHS);
    let mut successes = 0usize;

    for _ in 0..SIMULATION_PATHS {
        let mut balance = starting_balance;
        let mut depleted_at = None;
        for year in 0..SIMULATION_YEARS {
            seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            let noise = ((seed >> 33) as f64 / u32::MAX as f64) - 0.5;
            let annual_return = 0.06 + noise * 0.3;
            balance = balance * (1.0 + annual_return) - spending_target;
            if balance <= 0.0 && depleted_at.is_none() {
                depleted_at = Some(year + 1);
            }
        }
        if depleted_at.is_none() {
            successes += 1;
        }
        ending_balances.push((balance.max(0.0), depleted_at));
    }

    ending_balances.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
    let percentile = |p: f64| -> f64 {
        let idx = ((ending_balances.len() as f64 - 1.0) * p).round() as usize;
        ending_balances[idx].0
    };

    let years_to_depletion = ending_balances
        .iter()
        .filter_map(|(_, d)| *d)
        .min();

    RetirementProjection {
        success_probability: successes as f64 / SIMULATION_PATHS as f64 * 100.0,
        percentile_10: percentile(0.10),
        percentile_50: percentile(0.50),
        percentile_90: percentile(0.90),
        years_to_depletion,
    }
}

/// Narrates a pre-computed projection and commits it via `commit_retirement`.
pub async fn run_retirement_worker(
    job_id: Uuid,
    portfolio: &PortfolioSnapshot,
    model_loop: &ModelLoop,
    job_store: Arc<dyn JobStore>,
    knowledge: Arc<dyn KnowledgeLookup>,
    budgets: &WorkerBudgets,
) -> Result<(), WorkerError> {
    let registry = ToolRegistry::new(vec![Arc::new(CommitRetirementTool)]);
    let tool_ctx = ToolContext {
        job_id,
        job_store: job_store.clone(),
        knowledge,
    };

    let projection = project_retirement(portfolio);
    let projection_json = serde_json::to_string(&projection).unwrap_or_default();

    let instructions = "You are a retirement planning analyst. You are given a pre-computed \
         Monte-Carlo projection; do not attempt to recompute it. Write a short markdown \
         narrative interpreting the projection, then call commit_retirement exactly once with \
         that narrative and the exact projection_json you were given."
        .to_string();

    let seed_message = format!(
        "Projection (JSON, already computed): {projection_json}\nGoals: retirement_age={:?}, \
         annual_spending_target={:?}",
        portfolio.goals.retirement_age, portfolio.goals.annual_spending_target,
    );

    let spec = WorkerSpec {
        job_id,
        name: "retirement",
        instructions,
        seed_message,
        max_turns: budgets.retirement_max_turns,
        owned_slot: SlotName::Retirement,
        wall_clock_budget: budgets.wall_clock_budget,
    };

    run_worker_loop(spec, model_loop, &registry, &tool_ctx, &job_store).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portfolio::{Account, Goals, Position};
    use rust_decimal_macros::dec;

    #[test]
    fn cash_only_portfolio_projects_depletion_risk() {
        let portfolio = PortfolioSnapshot {
            accounts: vec![Account {
                name: "checking".into(),
                cash_balance: dec!(1000),
                cash_interest_rate: dec!(0.01),
                positions: vec![],
            }],
            goals: Goals::default(),
        };
        let projection = project_retirement(&portfolio);
        assert!(projection.success_probability < 50.0);
    }

    #[test]
    fn invested_portfolio_produces_ordered_percentiles() {
        let portfolio = PortfolioSnapshot {
            accounts: vec![Account {
                name: "401k".into(),
                cash_balance: dec!(5000),
                cash_interest_rate: dec!(0.02),
                positions: vec![Position {
                    symbol: "SPY".into(),
                    quantity: dec!(1000),
                }],
            }],
            goals: Goals::default(),
        };
        let projection = project_retirement(&portfolio);
        assert!(projection.percentile_10 <= projection.percentile_50);
        assert!(projection.percentile_50 <= projection.percentile_90);
    }

    #[test]
    fn projection_is_deterministic_for_the_same_input() {
        let portfolio = PortfolioSnapshot {
            accounts: vec![Account {
                name: "401k".into(),
                cash_balance: dec!(5000),
                cash_interest_rate: dec!(0.02),
                positions: vec![Position {
                    symbol: "SPY".into(),
                    quantity: dec!(100),
                }],
            }],
            goals: Goals::default(),
        };
        let a = project_retirement(&portfolio);
        let b = project_retirement(&portfolio);
        assert_eq!(a.success_probability, b.success_probability);
    }
}
