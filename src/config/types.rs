//! Configuration types and re-exports

pub use super::{
    AppConfig, ArchiveConfig, ChainConfig, LedgerConfig, MarketsConfig, NotificationConfig,
    OracleConfig, QueueConfig, ServiceConfig,
};
