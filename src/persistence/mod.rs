//! Archive Store
//!
//! Durable JSON documents per (chain, poolId): the predictions of a pool and,
//! once settled, its results. Writes are whole-document overwrites.

mod audit;

pub use audit::{SettlementAuditLog, SettlementAuditRecord};

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

use crate::types::{ArchivedPool, NotificationCounters};

/// Storage of archived pools and fan-out counters
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    async fn load(&self, chain: &str, pool_id: u64) -> Result<Option<ArchivedPool>>;

    async fn save(&self, archived: &ArchivedPool) -> Result<()>;

    async fn load_counters(&self, chain: &str) -> Result<NotificationCounters>;

    async fn save_counters(&self, chain: &str, counters: &NotificationCounters) -> Result<()>;
}

/// Archive on the local filesystem
///
/// Layout: `{root}/{chain}/pools/{pool_id}.json`, `{root}/{chain}/stats/notifications.json`.
pub struct FileArchiveStore {
    root: PathBuf,
}

impl FileArchiveStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn pool_path(&self, chain: &str, pool_id: u64) -> PathBuf {
        self.root
            .join(chain)
            .join("pools")
            .join(format!("{}.json", pool_id))
    }

    fn counters_path(&self, chain: &str) -> PathBuf {
        self.root.join(chain).join("stats").join("notifications.json")
    }

    async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
        match tokio::fs::read_to_string(path).await {
            Ok(json) => {
                let value = serde_json::from_str(&json)
                    .with_context(|| format!("Corrupt archive document {}", path.display()))?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    /// Write via a temp file + rename so readers never see a partial document.
    async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let json = serde_json::to_string_pretty(value)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl ArchiveStore for FileArchiveStore {
    async fn load(&self, chain: &str, pool_id: u64) -> Result<Option<ArchivedPool>> {
        Self::read_json(&self.pool_path(chain, pool_id)).await
    }

    async fn save(&self, archived: &ArchivedPool) -> Result<()> {
        let path = self.pool_path(&archived.chain, archived.pool.pool_id);
        Self::write_json(&path, archived).await?;
        debug!(
            chain = %archived.chain,
            pool_id = archived.pool.pool_id,
            path = %path.display(),
            settled = archived.results.is_some(),
            "💾 Pool archived"
        );
        Ok(())
    }

    async fn load_counters(&self, chain: &str) -> Result<NotificationCounters> {
        Ok(Self::read_json(&self.counters_path(chain))
            .await?
            .unwrap_or_default())
    }

    async fn save_counters(&self, chain: &str, counters: &NotificationCounters) -> Result<()> {
        Self::write_json(&self.counters_path(chain), counters).await
    }
}

/// In-process archive, used for dry runs and tests
#[derive(Default)]
pub struct MemoryArchiveStore {
    pools: RwLock<HashMap<(String, u64), ArchivedPool>>,
    counters: RwLock<HashMap<String, NotificationCounters>>,
}

impl MemoryArchiveStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArchiveStore for MemoryArchiveStore {
    async fn load(&self, chain: &str, pool_id: u64) -> Result<Option<ArchivedPool>> {
        Ok(self
            .pools
            .read()
            .await
            .get(&(chain.to_string(), pool_id))
            .cloned())
    }

    async fn save(&self, archived: &ArchivedPool) -> Result<()> {
        self.pools.write().await.insert(
            (archived.chain.clone(), archived.pool.pool_id),
            archived.clone(),
        );
        Ok(())
    }

    async fn load_counters(&self, chain: &str) -> Result<NotificationCounters> {
        Ok(self
            .counters
            .read()
            .await
            .get(chain)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_counters(&self, chain: &str, counters: &NotificationCounters) -> Result<()> {
        self.counters
            .write()
            .await
            .insert(chain.to_string(), counters.clone());
        Ok(())
    }
}
