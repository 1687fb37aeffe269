//! Job queue - at-least-once delivery of notification jobs
//!
//! A claimed job stays owned by the queue until it is acked; a failed job is
//! retried until `max_attempts`, then dead-lettered.

mod spool;

pub use spool::SpoolJobQueue;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::Mutex;

use crate::types::NotificationJob;

/// A job as held by the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedJob {
    pub id: String,
    pub name: String,
    pub payload: NotificationJob,
    pub attempts: u32,
    pub enqueued_at: i64,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl QueuedJob {
    pub fn new(name: &str, payload: NotificationJob) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            payload,
            attempts: 0,
            enqueued_at: chrono::Utc::now().timestamp(),
            last_error: None,
        }
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, name: &str, payload: NotificationJob) -> Result<String>;

    /// Take the oldest pending job, if any
    async fn claim(&self) -> Result<Option<QueuedJob>>;

    /// The job completed; remove it for good
    async fn ack(&self, job: &QueuedJob) -> Result<()>;

    /// The job failed; retry later or dead-letter it
    async fn fail(&self, job: &QueuedJob, reason: &str) -> Result<()>;
}

/// In-process queue for dry runs and tests. Not durable.
pub struct MemoryJobQueue {
    max_attempts: u32,
    pending: Mutex<VecDeque<QueuedJob>>,
    dead: Mutex<Vec<QueuedJob>>,
}

impl MemoryJobQueue {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            pending: Mutex::new(VecDeque::new()),
            dead: Mutex::new(Vec::new()),
        }
    }

    pub async fn pending(&self) -> Vec<QueuedJob> {
        self.pending.lock().await.iter().cloned().collect()
    }

    pub async fn dead_letters(&self) -> Vec<QueuedJob> {
        self.dead.lock().await.clone()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, name: &str, payload: NotificationJob) -> Result<String> {
        let job = QueuedJob::new(name, payload);
        let id = job.id.clone();
        self.pending.lock().await.push_back(job);
        Ok(id)
    }

    async fn claim(&self) -> Result<Option<QueuedJob>> {
        Ok(self.pending.lock().await.pop_front())
    }

    async fn ack(&self, _job: &QueuedJob) -> Result<()> {
        Ok(())
    }

    async fn fail(&self, job: &QueuedJob, reason: &str) -> Result<()> {
        let mut job = job.clone();
        job.attempts += 1;
        job.last_error = Some(reason.to_string());
        if job.attempts >= self.max_attempts {
            tracing::warn!(job_id = %job.id, attempts = job.attempts, "Job dead-lettered");
            self.dead.lock().await.push(job);
        } else {
            self.pending.lock().await.push_back(job);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(pool_id: u64) -> NotificationJob {
        NotificationJob {
            pool_id,
            chain: "base".to_string(),
        }
    }

    #[tokio::test]
    async fn memory_queue_is_fifo() {
        let queue = MemoryJobQueue::new(3);
        queue.enqueue("notify-winners", job(1)).await.unwrap();
        queue.enqueue("notify-winners", job(2)).await.unwrap();

        assert_eq!(queue.claim().await.unwrap().unwrap().payload, job(1));
        assert_eq!(queue.claim().await.unwrap().unwrap().payload, job(2));
        assert!(queue.claim().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_queue_dead_letters_after_max_attempts() {
        let queue = MemoryJobQueue::new(2);
        queue.enqueue("notify-winners", job(1)).await.unwrap();

        let claimed = queue.claim().await.unwrap().unwrap();
        queue.fail(&claimed, "boom").await.unwrap();
        let retried = queue.claim().await.unwrap().unwrap();
        assert_eq!(retried.attempts, 1);

        queue.fail(&retried, "boom again").await.unwrap();
        assert!(queue.claim().await.unwrap().is_none());
        let dead = queue.dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].last_error.as_deref(), Some("boom again"));
    }
}
