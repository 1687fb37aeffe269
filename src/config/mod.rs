//! Configuration management for PoolSettler
//!
//! Loads from YAML files + environment variables via .env

mod types;

pub use types::*;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use ethers::types::Address;
use serde::Deserialize;

use crate::types::{MarketClass, MarketHours};

/// Environment variable holding the admin signing key
pub const ADMIN_KEY_VAR: &str = "ADMIN_PRIVATE_KEY";

/// Largest power of ten that fits a `u128` base-unit amount
const MAX_TOKEN_DECIMALS: u32 = 38;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub oracle: OracleConfig,
    pub ledger: LedgerConfig,
    pub archive: ArchiveConfig,
    pub queue: QueueConfig,
    pub notifications: NotificationConfig,
    pub markets: MarketsConfig,
    #[serde(default)]
    pub chains: Vec<ChainConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Version tag for logging
    pub tag: String,
    /// Seconds between settlement sweeps
    pub sweep_interval_secs: u64,
    /// "pretty" or "json"
    pub log_format: String,
    /// Compute and log settlements without writing anything
    pub dry_run: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OracleConfig {
    /// Pyth Hermes endpoint
    pub hermes_url: String,
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// How long to wait for a write receipt before treating it as unconfirmed
    pub receipt_timeout_secs: u64,
    /// Prediction ids per paginated read
    pub prediction_page_size: u64,
    /// Provider polling interval in milliseconds
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
    /// Root directory of archived pool documents
    pub data_dir: String,
    /// Settlement audit CSV, empty to disable
    pub audit_csv: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Spool directory of the notification queue
    pub spool_dir: String,
    /// Attempts before a job is dead-lettered
    pub max_attempts: u32,
    /// Job name for winner notifications
    pub job_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    /// Run the fan-out worker after each sweep
    pub enabled: bool,
    /// JSON map of address -> channel
    pub channels_file: String,
    /// Environment variable holding the webhook HMAC secret
    pub signing_secret_env: String,
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketsConfig {
    /// Assets traded around the clock
    pub continuous: Vec<String>,
    /// Assets traded Monday to Friday
    pub weekdays: Vec<String>,
}

impl MarketsConfig {
    /// Non-empty asset classes, continuous first
    pub fn classes(&self) -> Vec<MarketClass> {
        [
            (MarketHours::Continuous, &self.continuous),
            (MarketHours::Weekdays, &self.weekdays),
        ]
        .into_iter()
        .filter(|(_, assets)| !assets.is_empty())
        .map(|(hours, assets)| MarketClass {
            hours,
            assets: assets.clone(),
        })
        .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// Short name used in archive paths and jobs
    pub name: String,
    pub chain_id: u64,
    pub rpc_url: String,
    /// Pool contract address
    pub contract_address: String,
    /// ERC-20 stake token address
    pub stake_token: String,
    /// Stake token decimals, for display amounts
    #[serde(default = "default_token_decimals")]
    pub stake_token_decimals: u32,
    /// Stake tiers in token base units, as decimal strings
    pub stake_amounts: Vec<String>,
}

fn default_token_decimals() -> u32 {
    18
}

impl ChainConfig {
    pub fn stake_token_address(&self) -> Result<Address> {
        self.stake_token
            .parse()
            .with_context(|| format!("Invalid stake_token '{}' for chain {}", self.stake_token, self.name))
    }

    pub fn stake_tiers(&self) -> Result<Vec<u128>> {
        self.stake_amounts
            .iter()
            .map(|raw| {
                raw.trim()
                    .parse::<u128>()
                    .with_context(|| format!("Invalid stake amount '{}' for chain {}", raw, self.name))
            })
            .collect()
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty()
            || !self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            bail!("Chain name '{}' must be non-empty [A-Za-z0-9_-]", self.name);
        }
        self.contract_address
            .parse::<Address>()
            .with_context(|| format!("Invalid contract_address for chain {}", self.name))?;
        self.stake_token_address()?;
        if self.stake_token_decimals > MAX_TOKEN_DECIMALS {
            bail!(
                "Chain {} stake_token_decimals {} exceeds {}",
                self.name,
                self.stake_token_decimals,
                MAX_TOKEN_DECIMALS
            );
        }
        let tiers = self.stake_tiers()?;
        if tiers.is_empty() || tiers.contains(&0) {
            bail!("Chain {} needs at least one non-zero stake amount", self.name);
        }
        Ok(())
    }
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Config::builder()
            // Service defaults
            .set_default("service.tag", env!("CARGO_PKG_VERSION"))?
            .set_default("service.sweep_interval_secs", 60)?
            .set_default("service.log_format", "pretty")?
            .set_default("service.dry_run", false)?
            // Oracle defaults
            .set_default("oracle.hermes_url", "https://hermes.pyth.network")?
            .set_default("oracle.timeout_ms", 10_000)?
            // Ledger defaults
            .set_default("ledger.receipt_timeout_secs", 120)?
            .set_default("ledger.prediction_page_size", 100)?
            .set_default("ledger.poll_interval_ms", 2_000)?
            // Archive defaults
            .set_default("archive.data_dir", "./data/archive")?
            .set_default("archive.audit_csv", "./data/settlements.csv")?
            // Queue defaults
            .set_default("queue.spool_dir", "./data/queue")?
            .set_default("queue.max_attempts", 5)?
            .set_default("queue.job_name", "notify-winners")?
            // Notification defaults
            .set_default("notifications.enabled", true)?
            .set_default("notifications.channels_file", "./config/channels.json")?
            .set_default("notifications.signing_secret_env", "WEBHOOK_SIGNING_SECRET")?
            .set_default("notifications.timeout_ms", 5_000)?
            // Market defaults
            .set_default("markets.continuous", vec!["BTC", "ETH", "SOL", "XRP"])?
            .set_default("markets.weekdays", vec!["AAPL", "TSLA", "EURUSD", "XAUUSD"])?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (POOLSETTLER_*)
            .add_source(Environment::with_prefix("POOLSETTLER").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;
        Ok(app_config)
    }

    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.ledger.prediction_page_size == 0 {
            bail!("ledger.prediction_page_size must be positive");
        }
        if self.queue.max_attempts == 0 {
            bail!("queue.max_attempts must be positive");
        }
        for chain in &self.chains {
            chain.validate()?;
        }
        for asset in self.markets.continuous.iter().chain(&self.markets.weekdays) {
            if crate::oracle::feed_id(asset).is_none() {
                let known: Vec<&str> = crate::oracle::registered_assets().collect();
                bail!(
                    "Market asset {} has no registered oracle feed (known: {})",
                    asset,
                    known.join(", ")
                );
            }
        }
        Ok(())
    }

    /// Generate a digest of the config (without secrets) for logging
    pub fn digest(&self) -> String {
        let chains: Vec<&str> = self.chains.iter().map(|c| c.name.as_str()).collect();
        format!(
            "tag={} chains={:?} continuous={:?} weekdays={:?} sweep={}s dry_run={}",
            self.service.tag,
            chains,
            self.markets.continuous,
            self.markets.weekdays,
            self.service.sweep_interval_secs,
            self.service.dry_run
        )
    }

    /// Validate required environment variables and return the admin key
    pub fn admin_private_key(&self) -> Result<String> {
        let pk = std::env::var(ADMIN_KEY_VAR)
            .with_context(|| format!("Required environment variable {} is not set", ADMIN_KEY_VAR))?;
        validate_private_key(&pk)?;
        Ok(pk)
    }

    /// Optional webhook signing secret
    pub fn webhook_secret(&self) -> Option<String> {
        std::env::var(&self.notifications.signing_secret_env)
            .ok()
            .filter(|s| !s.trim().is_empty())
    }
}

fn validate_private_key(pk: &str) -> Result<()> {
    if !pk.starts_with("0x") || pk.len() != 66 || hex::decode(&pk[2..]).is_err() {
        bail!("{} must be a hex string with 0x prefix (66 chars total)", ADMIN_KEY_VAR);
    }
    Ok(())
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
