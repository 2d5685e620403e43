//! Append-only transaction log used for crash recovery of atomic writes.
//!
//! One JSON record per line under `<transaction_dir>/tx_<epoch>.log`.
//! Status changes append a fresh record for the same `tx_id`; replay takes
//! the last record per id.

use std::collections::BTreeMap;
use std::fs::File;
use std::fs::OpenOptions;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Deserialize;
use serde::Serialize;

use crate::error::MorfxErr;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    RolledBack,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub tx_id: String,
    pub target_path: PathBuf,
    pub tmp_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,
    pub status: TransactionStatus,
    pub start_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct TransactionLog {
    dir: PathBuf,
    // Lazily opened so a server that never writes never creates the
    // directory. Holds the current log file for the life of the process.
    current: Mutex<Option<(PathBuf, File)>>,
}

impl TransactionLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            current: Mutex::new(None),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append one record, creating the log file on first use.
    pub fn append(&self, tx: &Transaction) -> Result<()> {
        let mut guard = self
            .current
            .lock()
            .map_err(|_| MorfxErr::Internal("transaction log mutex poisoned".to_string()))?;
        if guard.is_none() {
            std::fs::create_dir_all(&self.dir)
                .map_err(|e| MorfxErr::fs("creating transaction log dir", e))?;
            let epoch = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            let path = self.dir.join(format!("tx_{epoch}.log"));
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| MorfxErr::fs("opening transaction log", e))?;
            *guard = Some((path, file));
        }
        if let Some((_, file)) = guard.as_mut() {
            let line = serde_json::to_string(tx)
                .map_err(|e| MorfxErr::Internal(format!("serializing transaction: {e}")))?;
            writeln!(file, "{line}").map_err(|e| MorfxErr::fs("appending transaction", e))?;
            file.sync_data()
                .map_err(|e| MorfxErr::fs("syncing transaction log", e))?;
        }
        Ok(())
    }

    /// Last-record-wins view across every `tx_*.log` in the directory,
    /// including files left behind by earlier runs.
    pub fn replay(&self) -> Result<BTreeMap<String, Transaction>> {
        let mut transactions = BTreeMap::new();
        for path in self.log_files()? {
            let file = match File::open(&path) {
                Ok(f) => f,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(MorfxErr::fs("opening transaction log", e)),
            };
            for line in BufReader::new(file).lines() {
                let line = line.map_err(|e| MorfxErr::fs("reading transaction log", e))?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Transaction>(&line) {
                    Ok(tx) => {
                        transactions.insert(tx.tx_id.clone(), tx);
                    }
                    Err(e) => {
                        // A torn final line after a crash is expected; skip it.
                        tracing::warn!("skipping malformed transaction record: {e}");
                    }
                }
            }
        }
        Ok(transactions)
    }

    /// Path of the log file this process is appending to, if any writes
    /// happened yet.
    pub fn current_path(&self) -> Option<PathBuf> {
        self.current
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|(path, _)| path.clone()))
    }

    pub fn pending(&self) -> Result<Vec<Transaction>> {
        Ok(self
            .replay()?
            .into_values()
            .filter(|tx| tx.status == TransactionStatus::Pending)
            .collect())
    }

    fn log_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(MorfxErr::fs("listing transaction log dir", e)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| MorfxErr::fs("listing transaction log dir", e))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with("tx_") && name.ends_with(".log") {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }
}

pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now()
        .to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}
