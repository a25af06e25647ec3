//! Instrument reference data and classification vocabularies.

mod model;
mod store;

pub use model::{
    AllocationMap, Instrument, InstrumentKind, ASSET_CLASSES, REGIONS, SECTORS,
};
pub use store::{InstrumentStore, PostgresInstrumentStore};
