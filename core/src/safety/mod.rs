//! The safety layer: batch/size/confidence validation, integrity hashing,
//! advisory file locks, atomic writes with backup, and rollback/recovery
//! through the transaction log.

mod atomic;
mod locks;
mod txlog;

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

pub use atomic::WriteHandle;
pub use locks::FileLock;
pub use txlog::Transaction;
pub use txlog::TransactionLog;
pub use txlog::TransactionStatus;
pub(crate) use txlog::now_rfc3339;

use crate::config::ConfidenceMode;
use crate::config::SafetyConfig;
use crate::digest::sha256_hex;
use crate::error::MorfxErr;
use crate::error::Result;

/// A batch of files about to be written, with the evidence needed to decide
/// whether writing them is allowed.
#[derive(Debug, Clone, Default)]
pub struct SafetyOperation {
    pub files: Vec<FileCheck>,
    pub global_confidence: f64,
}

#[derive(Debug, Clone)]
pub struct FileCheck {
    pub path: PathBuf,
    pub size: u64,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct IntegrityCheck {
    pub path: PathBuf,
    pub expected: String,
}

pub struct SafetyManager {
    cfg: SafetyConfig,
    locks: Arc<locks::LockRegistry>,
    txlog: Arc<TransactionLog>,
}

impl SafetyManager {
    pub fn new(cfg: SafetyConfig) -> Self {
        let txlog = Arc::new(TransactionLog::new(cfg.transaction_dir.clone()));
        Self {
            cfg,
            locks: Arc::new(locks::LockRegistry::default()),
            txlog,
        }
    }

    pub fn config(&self) -> &SafetyConfig {
        &self.cfg
    }

    pub fn backup_path(&self, path: &Path) -> PathBuf {
        atomic::backup_path(&self.cfg, path)
    }

    /// Enforce the batch limits, in order: file count, per-file size, total
    /// size, then confidence per the configured mode.
    pub fn validate_operation(&self, op: &SafetyOperation) -> Result<()> {
        if op.files.len() > self.cfg.max_files {
            return Err(MorfxErr::TooManyFiles {
                count: op.files.len(),
                limit: self.cfg.max_files,
            });
        }
        for file in &op.files {
            if file.size > self.cfg.max_file_size {
                return Err(MorfxErr::FileTooLarge {
                    path: file.path.clone(),
                    size: file.size,
                    limit: self.cfg.max_file_size,
                });
            }
        }
        let total: u64 = op.files.iter().map(|f| f.size).sum();
        if total > self.cfg.max_total_size {
            return Err(MorfxErr::TotalSizeTooLarge {
                total,
                limit: self.cfg.max_total_size,
            });
        }

        let per_file = matches!(
            self.cfg.confidence_mode,
            ConfidenceMode::PerFile | ConfidenceMode::Both
        );
        let global = matches!(
            self.cfg.confidence_mode,
            ConfidenceMode::Global | ConfidenceMode::Both
        );
        if per_file {
            for file in &op.files {
                if file.confidence < self.cfg.per_file_threshold {
                    return Err(MorfxErr::PerFileConfidenceLow {
                        path: file.path.clone(),
                        score: file.confidence,
                        threshold: self.cfg.per_file_threshold,
                    });
                }
            }
        }
        if global && op.global_confidence < self.cfg.global_threshold {
            return Err(MorfxErr::ConfidenceTooLow {
                score: op.global_confidence,
                threshold: self.cfg.global_threshold,
            });
        }
        Ok(())
    }

    /// Recompute SHA-256 for each file and compare to the recorded digest.
    /// A no-op when integrity checks are disabled.
    pub fn validate_file_integrity(&self, checks: &[IntegrityCheck]) -> Result<()> {
        if !self.cfg.integrity_checks {
            return Ok(());
        }
        for check in checks {
            let actual = match std::fs::read(&check.path) {
                Ok(bytes) => sha256_hex(&bytes),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => "absent".to_string(),
                Err(e) => return Err(MorfxErr::fs("reading file for integrity check", e)),
            };
            if actual != check.expected {
                return Err(MorfxErr::FileModified {
                    path: check.path.clone(),
                    expected: check.expected.clone(),
                    actual,
                });
            }
        }
        Ok(())
    }

    /// Acquire the advisory lock for `path`, waiting up to the configured
    /// `lock_timeout`.
    pub async fn lock_file(&self, path: &Path) -> Result<FileLock> {
        locks::acquire(self.locks.clone(), path, self.cfg.lock_timeout).await
    }

    /// Write `content` to `path` through the three-phase sequence and return
    /// the commit/rollback handle. The new bytes are visible as soon as this
    /// returns; the handle only decides whether they survive.
    pub fn atomic_write(&self, path: &Path, content: &[u8]) -> Result<WriteHandle> {
        atomic::atomic_write(&self.cfg, &self.txlog, path, content)
    }

    /// Restore every transaction still `pending` in the log. Returns how
    /// many were rolled back.
    pub fn rollback_all(&self) -> Result<usize> {
        let pending = self.txlog.pending()?;
        let count = pending.len();
        for tx in pending {
            self.rollback_recorded(tx)?;
        }
        Ok(count)
    }

    /// Restore one recorded transaction from its backup, or remove the
    /// target if it had none.
    pub fn rollback_transaction(&self, tx_id: &str) -> Result<()> {
        let mut transactions = self.txlog.replay()?;
        let tx = transactions
            .remove(tx_id)
            .ok_or_else(|| MorfxErr::Internal(format!("unknown transaction: {tx_id}")))?;
        self.rollback_recorded(tx)
    }

    fn rollback_recorded(&self, mut tx: Transaction) -> Result<()> {
        match &tx.backup_path {
            Some(backup) if backup.exists() => {
                std::fs::rename(backup, &tx.target_path)
                    .map_err(|e| MorfxErr::fs("restoring backup", e))?;
            }
            _ => match std::fs::remove_file(&tx.target_path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(MorfxErr::fs("removing rolled-back target", e)),
            },
        }
        let _ = std::fs::remove_file(&tx.tmp_path);
        tx.status = TransactionStatus::RolledBack;
        tx.end_time = Some(txlog::now_rfc3339());
        self.txlog.append(&tx)
    }

    /// Retention sweep: drop backups of completed transactions older than
    /// `backup_retention` and prune log files whose entries are all
    /// terminal and old.
    pub fn sweep_transactions(&self) -> Result<()> {
        let transactions = self.txlog.replay()?;
        let cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(self.cfg.backup_retention)
                .unwrap_or_else(|_| chrono::Duration::seconds(5));

        let mut all_old_terminal = true;
        for tx in transactions.values() {
            let old_terminal = tx.status != TransactionStatus::Pending
                && tx
                    .end_time
                    .as_deref()
                    .and_then(|t| chrono::DateTime::parse_from_rfc3339(t).ok())
                    .map(|t| t.with_timezone(&chrono::Utc))
                    .is_some_and(|t| t < cutoff);
            if !old_terminal {
                all_old_terminal = false;
                continue;
            }
            if tx.status == TransactionStatus::Completed
                && let Some(backup) = &tx.backup_path
            {
                let _ = std::fs::remove_file(backup);
            }
        }

        if all_old_terminal && !transactions.is_empty() {
            let current = self.txlog.current_path();
            for path in self.log_files_for_prune()? {
                if Some(&path) != current.as_ref() {
                    let _ = std::fs::remove_file(&path);
                }
            }
        }
        Ok(())
    }

    fn log_files_for_prune(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let entries = match std::fs::read_dir(self.txlog.dir()) {
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
        Ok(files)
    }
}
