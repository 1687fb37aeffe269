//! Settlement audit trail (append-only CSV)

use anyhow::{Context, Result};
use csv::WriterBuilder;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// One settled pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementAuditRecord {
    pub timestamp: i64,
    pub chain: String,
    pub pool_id: u64,
    pub asset: String,
    pub snapshot_time: u64,
    pub snapshot_price: String,
    pub no_of_predictions: u64,
    pub no_of_winners: u64,
    pub win_amount: String,
    /// Winner prediction ids joined with ';'
    pub winner_prediction_ids: String,
    pub tx_hash: String,
}

pub struct SettlementAuditLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl SettlementAuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, record: &SettlementAuditRecord) -> Result<()> {
        let _guard = self.lock.lock().await;

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).context("Failed to create audit directory")?;
        }
        let file_has_data = self.path.exists()
            && fs::metadata(&self.path).map(|m| m.len() > 0).unwrap_or(false);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context("Failed to open audit CSV")?;

        let mut writer = WriterBuilder::new()
            .has_headers(!file_has_data)
            .from_writer(file);
        writer
            .serialize(record)
            .context("Failed to write audit record")?;
        writer.flush().context("Failed to flush audit writer")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pool_id: u64) -> SettlementAuditRecord {
        SettlementAuditRecord {
            timestamp: 1_760_000_000,
            chain: "base".to_string(),
            pool_id,
            asset: "BTC".to_string(),
            snapshot_time: 1_760_000_000,
            snapshot_price: "6140993501000".to_string(),
            no_of_predictions: 3,
            no_of_winners: 1,
            win_amount: "285".to_string(),
            winner_prediction_ids: "12".to_string(),
            tx_hash: "0xabc".to_string(),
        }
    }

    #[tokio::test]
    async fn header_is_written_once() {
        let path = std::env::temp_dir().join(format!(
            "poolsettler_audit_{}.csv",
            uuid::Uuid::new_v4()
        ));
        let log = SettlementAuditLog::new(&path);
        log.append(&record(1)).await.unwrap();
        log.append(&record(2)).await.unwrap();

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(&path)
            .unwrap();
        let rows: Vec<SettlementAuditRecord> =
            reader.deserialize().collect::<Result<_, _>>().unwrap();
        assert_eq!(rows, vec![record(1), record(2)]);

        let _ = std::fs::remove_file(&path);
    }
}
