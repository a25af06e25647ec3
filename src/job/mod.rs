//! Job entity, status state machine, and persistence.

mod model;
mod store;

pub use model::{Job, JobKind, JobStatus, RequestPayload, SlotName, Summary, WorkerSummary};
pub use store::{JobStore, PostgresJobStore, SlotValue};
