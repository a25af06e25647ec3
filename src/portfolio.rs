//! Portfolio snapshot types.
//!
//! The snapshot is derived per job run and never persisted on its own —
//! it is hydrated from the job's `request_payload` and the instrument
//! store, then held in memory for the duration of the orchestrator run.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One brokerage/retirement account within a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub name: String,
    pub cash_balance: Decimal,
    pub cash_interest_rate: Decimal,
    #[serde(default)]
    pub positions: Vec<Position>,
}

/// A holding of a given instrument within an account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: Decimal,
}

/// A user's goals, used by the retirement projector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Goals {
    pub retirement_age: Option<u32>,
    pub annual_spending_target: Option<Decimal>,
}

/// The hydrated, in-memory view of a job's portfolio.
///
/// Constructed once by the orchestrator during the Hydrate step and passed
/// by reference to every worker; workers never fetch it through tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub goals: Goals,
}

impl PortfolioSnapshot {
    /// Construct an explicit empty snapshot. Avoids the mutable-default
    /// pitfall of a `Vec::new()` shared across clones — callers always get
    /// a fresh `Vec`.
    pub fn empty() -> Self {
        Self {
            accounts: Vec::new(),
            goals: Goals::default(),
        }
    }

    /// The unique set of instrument symbols referenced by any position, in
    /// lexicographic order for determinism.
    pub fn unique_symbols(&self) -> Vec<String> {
        let set: BTreeSet<String> = self
            .accounts
            .iter()
            .flat_map(|a| a.positions.iter())
            .map(|p| p.symbol.clone())
            .collect();
        set.into_iter().collect()
    }

    /// Total cash across all accounts.
    pub fn total_cash(&self) -> Decimal {
        self.accounts.iter().map(|a| a.cash_balance).sum()
    }

    /// Total number of positions across all accounts (portfolio size, used
    /// to bound downstream O(portfolio size) work).
    pub fn position_count(&self) -> usize {
        self.accounts.iter().map(|a| a.positions.len()).sum()
    }

    /// True when the portfolio has no positions at all (the "cash-only"
    /// boundary case).
    pub fn is_cash_only(&self) -> bool {
        self.position_count() == 0
    }
}

impl Default for PortfolioSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snapshot() -> PortfolioSnapshot {
        PortfolioSnapshot {
            accounts: vec![
                Account {
                    name: "401k".into(),
                    cash_balance: dec!(5000),
                    cash_interest_rate: dec!(0.02),
                    positions: vec![
                        Position {
                            symbol: "SPY".into(),
                            quantity: dec!(100),
                        },
                        Position {
                            symbol: "SPY".into(),
                            quantity: dec!(10),
                        },
                    ],
                },
                Account {
                    name: "brokerage".into(),
                    cash_balance: dec!(1000),
                    cash_interest_rate: dec!(0.01),
                    positions: vec![Position {
                        symbol: "NEWX".into(),
                        quantity: dec!(5),
                    }],
                },
            ],
            goals: Goals::default(),
        }
    }

    #[test]
    fn unique_symbols_deduplicates_across_accounts() {
        let snap = snapshot();
        assert_eq!(snap.unique_symbols(), vec!["NEWX".to_string(), "SPY".to_string()]);
    }

    #[test]
    fn total_cash_sums_all_accounts() {
        let snap = snapshot();
        assert_eq!(snap.total_cash(), dec!(6000));
    }

    #[test]
    fn empty_snapshot_is_cash_only() {
        let snap = PortfolioSnapshot::empty();
        assert!(snap.is_cash_only());
    }

    #[test]
    fn snapshot_with_positions_is_not_cash_only() {
        let snap = snapshot();
        assert!(!snap.is_cash_only());
        assert_eq!(snap.position_count(), 3);
    }
}
