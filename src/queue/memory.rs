//! An in-process `JobQueue` backed by a `VecDeque`. This is what `memory://`
//! queue URLs resolve to; a production deployment would point `QUEUE_URL`
//! at a real broker and implement `JobQueue` against it the same way this
//! file does against a deque.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::QueueError;

use super::{JobQueue, QueueMessage};

struct Entry {
    job_id: Uuid,
    receive_count: u32,
}

/// A delivered-but-not-yet-acked message, tracked so it can be put back on
/// the queue if its visibility timeout elapses before `ack`/`dead_letter`.
struct InFlight {
    entry: Entry,
    deadline: Instant,
}

pub struct InMemoryJobQueue {
    queue: Mutex<VecDeque<Entry>>,
    in_flight: Mutex<HashMap<String, InFlight>>,
    dlq: Mutex<Vec<(Uuid, String)>>,
    visibility_timeout: Duration,
}

impl InMemoryJobQueue {
    /// A queue with the default 360s visibility timeout (see
    /// `QueueConfig::visibility_timeout`'s own default).
    pub fn new() -> Self {
        Self::with_visibility_timeout(Duration::from_secs(360))
    }

    pub fn with_visibility_timeout(visibility_timeout: Duration) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            in_flight: Mutex::new(HashMap::new()),
            dlq: Mutex::new(Vec::new()),
            visibility_timeout,
        }
    }

    /// Snapshot of job ids currently sitting in the dead-letter queue, for
    /// diagnostics and tests.
    pub async fn dead_lettered(&self) -> Vec<(Uuid, String)> {
        self.dlq.lock().await.clone()
    }

    /// Moves any in-flight message whose visibility timeout has elapsed
    /// back onto the pending queue. A consumer that crashed (or is simply
    /// still working) before acking never strands a message forever — it
    /// becomes redeliverable, same as a real broker's visibility timeout.
    async fn requeue_expired(&self) {
        let now = Instant::now();
        let mut in_flight = self.in_flight.lock().await;
        let expired: Vec<String> = in_flight
            .iter()
            .filter(|(_, in_flight)| in_flight.deadline <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();
        if expired.is_empty() {
            return;
        }
        let mut queue = self.queue.lock().await;
        for receipt in expired {
            if let Some(in_flight) = in_flight.remove(&receipt) {
                queue.push_back(in_flight.entry);
            }
        }
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job_id: Uuid) -> Result<(), QueueError> {
        self.queue.lock().await.push_back(Entry {
            job_id,
            receive_count: 0,
        });
        Ok(())
    }

    async fn receive(&self, max: usize) -> Result<Vec<QueueMessage>, QueueError> {
        self.requeue_expired().await;

        let mut queue = self.queue.lock().await;
        let mut in_flight = self.in_flight.lock().await;
        let mut out = Vec::new();
        for _ in 0..max {
            let Some(mut entry) = queue.pop_front() else {
                break;
            };
            entry.receive_count += 1;
            let receipt = format!("{}:{}", entry.job_id, entry.receive_count);
            out.push(QueueMessage {
                job_id: entry.job_id,
                receipt: receipt.clone(),
                receive_count: entry.receive_count,
            });
            in_flight.insert(
                receipt,
                InFlight {
                    entry,
                    deadline: now_plus(self.visibility_timeout),
                },
            );
        }
        Ok(out)
    }

    async fn ack(&self, message: &QueueMessage) -> Result<(), QueueError> {
        // Dropping the in-flight entry is the whole of acking here; a
        // broker-backed queue would delete the message by receipt handle.
        self.in_flight.lock().await.remove(&message.receipt);
        Ok(())
    }

    async fn dead_letter(&self, message: QueueMessage, reason: &str) -> Result<(), QueueError> {
        self.in_flight.lock().await.remove(&message.receipt);
        self.dlq
            .lock()
            .await
            .push((message.job_id, reason.to_string()));
        Ok(())
    }
}

fn now_plus(duration: Duration) -> Instant {
    Instant::now() + duration
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_then_receive_round_trips_the_job_id() {
        let queue = InMemoryJobQueue::new();
        let job_id = Uuid::new_v4();
        queue.enqueue(job_id).await.unwrap();

        let received = queue.receive(10).await.unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].job_id, job_id);
        assert_eq!(received[0].receive_count, 1);
    }

    #[tokio::test]
    async fn redelivery_increments_receive_count() {
        let queue = InMemoryJobQueue::new();
        let job_id = Uuid::new_v4();
        queue.enqueue(job_id).await.unwrap();
        let first = queue.receive(1).await.unwrap();
        assert_eq!(first[0].receive_count, 1);

        // Not acked: simulate redelivery by re-enqueueing, as the consumer
        // loop does when a job errors without being dead-lettered.
        queue.enqueue(job_id).await.unwrap();
        let second = queue.receive(1).await.unwrap();
        assert_eq!(second[0].receive_count, 1);
    }

    #[tokio::test]
    async fn unacked_message_is_redelivered_once_its_visibility_timeout_elapses() {
        let queue = InMemoryJobQueue::with_visibility_timeout(Duration::from_millis(20));
        let job_id = Uuid::new_v4();
        queue.enqueue(job_id).await.unwrap();

        let first = queue.receive(1).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].receive_count, 1);

        // Immediately re-receiving finds nothing: the message is still
        // in flight and hasn't timed out yet.
        assert!(queue.receive(1).await.unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(40)).await;

        // The first delivery's visibility timeout has now elapsed, so it
        // comes back around with its receive_count bumped again, without
        // the consumer ever acking it.
        let second = queue.receive(1).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].job_id, job_id);
        assert_eq!(second[0].receive_count, 2);
    }

    #[tokio::test]
    async fn acking_a_message_prevents_its_later_redelivery() {
        let queue = InMemoryJobQueue::with_visibility_timeout(Duration::from_millis(20));
        let job_id = Uuid::new_v4();
        queue.enqueue(job_id).await.unwrap();

        let message = queue.receive(1).await.unwrap().remove(0);
        queue.ack(&message).await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(queue.receive(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dead_lettered_messages_are_recorded_and_not_redelivered() {
        let queue = InMemoryJobQueue::with_visibility_timeout(Duration::from_millis(20));
        let job_id = Uuid::new_v4();
        queue.enqueue(job_id).await.unwrap();
        let msg = queue.receive(1).await.unwrap().remove(0);
        queue
            .dead_letter(msg, "max receive count exceeded")
            .await
            .unwrap();

        let dlq = queue.dead_lettered().await;
        assert_eq!(dlq.len(), 1);
        assert_eq!(dlq[0].0, job_id);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(queue.receive(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn receive_returns_fewer_than_max_when_queue_is_short() {
        let queue = InMemoryJobQueue::new();
        queue.enqueue(Uuid::new_v4()).await.unwrap();
        let received = queue.receive(5).await.unwrap();
        assert_eq!(received.len(), 1);
    }
}
