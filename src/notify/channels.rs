//! Winner contact channels

use anyhow::{Context, Result};
use async_trait::async_trait;
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Where a winner wants to be told
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Channel {
    Webhook { url: String },
}

#[async_trait]
pub trait ChannelRegistry: Send + Sync {
    async fn channel_for(&self, address: &Address) -> Result<Option<Channel>>;
}

/// Registry read once from a JSON map of `address -> channel`
#[derive(Debug, Default)]
pub struct FileChannelRegistry {
    channels: HashMap<Address, Channel>,
}

impl FileChannelRegistry {
    /// Load from `path`; a missing file yields an empty registry.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "No channels file, winners will not be notified");
            return Ok(Self::default());
        }
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read channels file {}", path.display()))?;
        let registry = Self::from_json(&json)
            .with_context(|| format!("Invalid channels file {}", path.display()))?;
        info!(path = %path.display(), channels = registry.len(), "📇 Loaded winner channels");
        Ok(registry)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let raw: HashMap<String, Channel> = serde_json::from_str(json)?;
        let mut channels = HashMap::with_capacity(raw.len());
        for (address, channel) in raw {
            let parsed = Address::from_str(address.trim())
                .with_context(|| format!("Invalid address '{}'", address))?;
            channels.insert(parsed, channel);
        }
        Ok(Self { channels })
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[async_trait]
impl ChannelRegistry for FileChannelRegistry {
    async fn channel_for(&self, address: &Address) -> Result<Option<Channel>> {
        Ok(self.channels.get(address).cloned())
    }
}

#[derive(Debug, Default)]
pub struct MemoryChannelRegistry {
    channels: RwLock<HashMap<Address, Channel>>,
}

impl MemoryChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, address: Address, channel: Channel) {
        self.channels.write().await.insert(address, channel);
    }
}

#[async_trait]
impl ChannelRegistry for MemoryChannelRegistry {
    async fn channel_for(&self, address: &Address) -> Result<Option<Channel>> {
        Ok(self.channels.read().await.get(address).cloned())
    }
}
