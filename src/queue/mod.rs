//! Job queue: at-least-once delivery of job ids to the orchestrator, with a
//! dead-letter policy for poison messages.
//!
//! Mirrors the channel abstraction the agent uses for inbound messages
//! (receive a batch, ack what succeeded, let redelivery handle the rest)
//! but the unit of work here is a job id rather than a chat message.

mod consumer;
mod memory;

pub use consumer::run_consumer;
pub use memory::InMemoryJobQueue;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::QueueError;

/// One in-flight delivery of a job id.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub job_id: Uuid,
    /// Opaque receipt used to ack or dead-letter this specific delivery.
    pub receipt: String,
    /// How many times this job id has been delivered, including this one.
    pub receive_count: u32,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job id for processing.
    async fn enqueue(&self, job_id: Uuid) -> Result<(), QueueError>;

    /// Receive up to `max` messages. Returns fewer than `max` (possibly
    /// zero) if fewer are available; never blocks indefinitely.
    async fn receive(&self, max: usize) -> Result<Vec<QueueMessage>, QueueError>;

    /// Acknowledge successful processing, removing the message for good.
    async fn ack(&self, message: &QueueMessage) -> Result<(), QueueError>;

    /// Move a message to the dead-letter queue after it has exceeded the
    /// configured receive count, or after an unrecoverable processing
    /// error.
    async fn dead_letter(&self, message: QueueMessage, reason: &str) -> Result<(), QueueError>;
}
