//! The `Instrument` entity and its closed classification vocabularies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Asset classes an instrument may be allocated across.
pub const ASSET_CLASSES: &[&str] = &["equity", "fixed_income", "cash", "real_estate", "commodity"];

/// Regions an instrument may be allocated across.
pub const REGIONS: &[&str] = &["north_america", "europe", "asia_pacific", "emerging_markets"];

/// Sectors an instrument may be allocated across.
pub const SECTORS: &[&str] = &[
    "technology",
    "financials",
    "healthcare",
    "consumer",
    "industrials",
    "energy",
    "utilities",
    "materials",
    "other",
];

/// The kind of tradable entity an instrument represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentKind {
    Etf,
    Stock,
    MutualFund,
    Bond,
}

/// A mapping from a closed-vocabulary key to a non-negative allocation
/// percentage. Values across the map must sum to 100 within tolerance.
pub type AllocationMap = BTreeMap<String, f64>;

const SUM_TOLERANCE: f64 = 0.01;

/// A tradable financial reference entity with fixed classification
/// vocabularies for asset class, region, and sector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub display_name: String,
    pub kind: InstrumentKind,
    pub asset_class_allocation: AllocationMap,
    pub region_allocation: AllocationMap,
    pub sector_allocation: AllocationMap,
    pub updated_at: DateTime<Utc>,
}

impl Instrument {
    /// Whether every allocation map on this instrument satisfies the
    /// sum-to-100 and closed-vocabulary invariants.
    pub fn validate(&self) -> Result<(), String> {
        validate_allocation(&self.asset_class_allocation, ASSET_CLASSES, "asset_class")?;
        validate_allocation(&self.region_allocation, REGIONS, "region")?;
        validate_allocation(&self.sector_allocation, SECTORS, "sector")?;
        Ok(())
    }

    /// Whether this instrument is missing any of its three allocation maps
    /// — the condition the orchestrator uses to find rows needing
    /// classification.
    pub fn is_missing_classification(&self) -> bool {
        self.asset_class_allocation.is_empty()
            || self.region_allocation.is_empty()
            || self.sector_allocation.is_empty()
    }
}

pub fn validate_allocation(
    map: &AllocationMap,
    vocabulary: &[&str],
    label: &str,
) -> Result<(), String> {
    if map.is_empty() {
        return Err(format!("{label} allocation is empty"));
    }
    for key in map.keys() {
        if !vocabulary.contains(&key.as_str()) {
            return Err(format!("{label} allocation has unknown key: {key}"));
        }
    }
    let sum: f64 = map.values().sum();
    if (sum - 100.0).abs() > SUM_TOLERANCE {
        return Err(format!(
            "{label} allocation sums to {sum}, expected 100 +/- {SUM_TOLERANCE}"
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_instrument() -> Instrument {
        Instrument {
            symbol: "SPY".into(),
            display_name: "SPDR S&P 500 ETF".into(),
            kind: InstrumentKind::Etf,
            asset_class_allocation: BTreeMap::from([("equity".to_string(), 100.0)]),
            region_allocation: BTreeMap::from([("north_america".to_string(), 100.0)]),
            sector_allocation: BTreeMap::from([
                ("technology".to_string(), 40.0),
                ("financials".to_string(), 30.0),
                ("other".to_string(), 30.0),
            ]),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn valid_instrument_passes_validation() {
        assert!(valid_instrument().validate().is_ok());
    }

    #[test]
    fn allocation_sum_outside_tolerance_is_rejected() {
        let mut inst = valid_instrument();
        inst.asset_class_allocation
            .insert("equity".to_string(), 90.0);
        assert!(inst.validate().is_err());
    }

    #[test]
    fn unknown_vocabulary_key_is_rejected() {
        let mut inst = valid_instrument();
        inst.region_allocation = BTreeMap::from([("moon".to_string(), 100.0)]);
        assert!(inst.validate().is_err());
    }

    #[test]
    fn empty_allocation_map_is_missing_classification() {
        let mut inst = valid_instrument();
        inst.sector_allocation.clear();
        assert!(inst.is_missing_classification());
    }

    #[test]
    fn sum_within_tolerance_is_accepted() {
        let mut inst = valid_instrument();
        inst.asset_class_allocation
            .insert("equity".to_string(), 100.005);
        assert!(inst.validate().is_ok());
    }
}
