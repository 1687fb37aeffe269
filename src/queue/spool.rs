//! Durable directory spool
//!
//! Layout: `{root}/pending/{enqueued_at}-{id}.json`, `{root}/claimed/...`, `{root}/dead/...`.
//! A claim moves the file to `claimed/`; jobs left there by a crash are
//! returned to `pending/` by `recover()`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{JobQueue, QueuedJob};
use crate::types::NotificationJob;

pub struct SpoolJobQueue {
    root: PathBuf,
    max_attempts: u32,
    lock: Mutex<()>,
}

impl SpoolJobQueue {
    pub async fn open(root: impl Into<PathBuf>, max_attempts: u32) -> Result<Self> {
        let root = root.into();
        for dir in ["pending", "claimed", "dead"] {
            tokio::fs::create_dir_all(root.join(dir))
                .await
                .with_context(|| format!("Failed to create spool dir {}", root.join(dir).display()))?;
        }
        let queue = Self {
            root,
            max_attempts: max_attempts.max(1),
            lock: Mutex::new(()),
        };
        queue.recover().await?;
        Ok(queue)
    }

    fn file_name(job: &QueuedJob) -> String {
        format!("{:012}-{}.json", job.enqueued_at.max(0), job.id)
    }

    fn dir(&self, state: &str) -> PathBuf {
        self.root.join(state)
    }

    /// Return jobs abandoned in `claimed/` to `pending/`.
    pub async fn recover(&self) -> Result<usize> {
        let _guard = self.lock.lock().await;
        let claimed = Self::list(&self.dir("claimed")).await?;
        for path in &claimed {
            if let Some(name) = path.file_name() {
                tokio::fs::rename(path, self.dir("pending").join(name)).await?;
            }
        }
        if !claimed.is_empty() {
            info!(count = claimed.len(), "Recovered claimed jobs into pending");
        }
        Ok(claimed.len())
    }

    pub async fn pending_count(&self) -> Result<usize> {
        Ok(Self::list(&self.dir("pending")).await?.len())
    }

    pub async fn dead_count(&self) -> Result<usize> {
        Ok(Self::list(&self.dir("dead")).await?.len())
    }

    async fn list(dir: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .with_context(|| format!("Failed to list {}", dir.display()))?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                paths.push(path);
            }
        }
        // Names start with the zero-padded enqueue time
        paths.sort();
        Ok(paths)
    }

    async fn write_job(path: &Path, job: &QueuedJob) -> Result<()> {
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(job)?).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl JobQueue for SpoolJobQueue {
    async fn enqueue(&self, name: &str, payload: NotificationJob) -> Result<String> {
        let _guard = self.lock.lock().await;
        let job = QueuedJob::new(name, payload);
        let path = self.dir("pending").join(Self::file_name(&job));
        Self::write_job(&path, &job)
            .await
            .context("Failed to enqueue job")?;
        info!(
            job_id = %job.id,
            name = %job.name,
            chain = %job.payload.chain,
            pool_id = job.payload.pool_id,
            "📨 Job enqueued"
        );
        Ok(job.id)
    }

    async fn claim(&self) -> Result<Option<QueuedJob>> {
        let _guard = self.lock.lock().await;
        for path in Self::list(&self.dir("pending")).await? {
            let raw = tokio::fs::read(&path).await?;
            let job: QueuedJob = match serde_json::from_slice(&raw) {
                Ok(job) => job,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Unreadable job moved to dead letters");
                    if let Some(name) = path.file_name() {
                        tokio::fs::rename(&path, self.dir("dead").join(name)).await?;
                    }
                    continue;
                }
            };
            tokio::fs::rename(&path, self.dir("claimed").join(Self::file_name(&job))).await?;
            return Ok(Some(job));
        }
        Ok(None)
    }

    async fn ack(&self, job: &QueuedJob) -> Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.dir("claimed").join(Self::file_name(job));
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to ack {}", path.display())),
        }
    }

    async fn fail(&self, job: &QueuedJob, reason: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let claimed = self.dir("claimed").join(Self::file_name(job));

        let mut job = job.clone();
        job.attempts += 1;
        job.last_error = Some(reason.to_string());

        let target = if job.attempts >= self.max_attempts {
            warn!(job_id = %job.id, attempts = job.attempts, reason = %reason, "Job dead-lettered");
            self.dir("dead")
        } else {
            self.dir("pending")
        };
        Self::write_job(&target.join(Self::file_name(&job)), &job).await?;
        match tokio::fs::remove_file(&claimed).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to release {}", claimed.display())),
        }
    }
}
