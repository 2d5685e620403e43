//! Three-phase atomic file writes: write temp, back up the current bytes,
//! rename over the target. Until [`WriteHandle::commit`] the write is
//! reversible; [`WriteHandle::rollback`] puts the prior bytes back.

use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::SafetyConfig;
use crate::error::MorfxErr;
use crate::error::Result;

use super::txlog::Transaction;
use super::txlog::TransactionLog;
use super::txlog::TransactionStatus;
use super::txlog::now_rfc3339;

#[derive(Debug)]
struct Snapshot {
    bytes: Vec<u8>,
    mode: Option<u32>,
}

/// Outcome of a successful [`atomic_write`]. The bytes are already in place;
/// the handle decides whether they stay. Dropping a handle without deciding
/// leaves the transaction `pending` in the log, which is exactly what crash
/// recovery rolls back.
#[derive(Debug)]
pub struct WriteHandle {
    inner: Option<HandleInner>,
}

#[derive(Debug)]
enum HandleInner {
    Direct,
    Atomic {
        tx: Transaction,
        log: Arc<TransactionLog>,
        target: PathBuf,
        backup: Option<PathBuf>,
        prior: Option<Snapshot>,
    },
}

impl WriteHandle {
    /// Keep the new bytes. Marks the transaction completed; backup files are
    /// removed later by the retention sweep.
    pub fn commit(mut self) -> Result<()> {
        match self.inner.take() {
            None | Some(HandleInner::Direct) => Ok(()),
            Some(HandleInner::Atomic { mut tx, log, .. }) => {
                tx.status = TransactionStatus::Completed;
                tx.end_time = Some(now_rfc3339());
                log.append(&tx)
            }
        }
    }

    /// Restore the target to its pre-write state.
    pub fn rollback(mut self) -> Result<()> {
        match self.inner.take() {
            None | Some(HandleInner::Direct) => Ok(()),
            Some(HandleInner::Atomic {
                mut tx,
                log,
                target,
                backup,
                prior,
            }) => {
                restore_target(&target, backup.as_deref(), prior.as_ref())?;
                tx.status = TransactionStatus::RolledBack;
                tx.end_time = Some(now_rfc3339());
                log.append(&tx)
            }
        }
    }

    fn direct() -> Self {
        Self {
            inner: Some(HandleInner::Direct),
        }
    }
}

fn restore_target(target: &Path, backup: Option<&Path>, prior: Option<&Snapshot>) -> Result<()> {
    if let Some(backup) = backup {
        // Rename is atomic and consumes the backup in the same step.
        return std::fs::rename(backup, target).map_err(|e| MorfxErr::fs("restoring backup", e));
    }
    match prior {
        Some(snapshot) => {
            std::fs::write(target, &snapshot.bytes)
                .map_err(|e| MorfxErr::fs("restoring prior bytes", e))?;
            if let Some(mode) = snapshot.mode {
                set_file_mode(target, mode).map_err(|e| MorfxErr::fs("restoring prior mode", e))?;
            }
            Ok(())
        }
        None => match std::fs::remove_file(target) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MorfxErr::fs("removing rolled-back target", e)),
        },
    }
}

pub(crate) fn backup_path(cfg: &SafetyConfig, path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(&cfg.backup_suffix);
    PathBuf::from(s)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(format!(".tmp.{:08x}", rand::random::<u32>()));
    PathBuf::from(s)
}

#[cfg(unix)]
fn file_mode(path: &Path) -> std::io::Result<u32> {
    use std::os::unix::fs::PermissionsExt;
    Ok(std::fs::metadata(path)?.permissions().mode())
}

#[cfg(not(unix))]
fn file_mode(_path: &Path) -> std::io::Result<u32> {
    Ok(0)
}

#[cfg(unix)]
fn set_file_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_file_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

fn snapshot(path: &Path) -> Result<Option<Snapshot>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(MorfxErr::fs("snapshotting target", e)),
    };
    let mode = if cfg!(unix) {
        Some(file_mode(path).map_err(|e| MorfxErr::fs("reading target metadata", e))?)
    } else {
        None
    };
    Ok(Some(Snapshot { bytes, mode }))
}

pub(crate) fn atomic_write(
    cfg: &SafetyConfig,
    log: &Arc<TransactionLog>,
    path: &Path,
    content: &[u8],
) -> Result<WriteHandle> {
    if !cfg.atomic_writes {
        std::fs::write(path, content).map_err(|e| MorfxErr::fs("writing target", e))?;
        return Ok(WriteHandle::direct());
    }

    let prior = snapshot(path)?;

    let backup = if cfg.backups && prior.is_some() {
        let backup = backup_path(cfg, path);
        std::fs::copy(path, &backup).map_err(|source| MorfxErr::BackupFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Some(backup)
    } else {
        None
    };

    let tmp = tmp_path(path);
    if let Err(e) = write_tmp(&tmp, content, prior.as_ref()) {
        cleanup(&tmp, backup.as_deref());
        return Err(e);
    }

    let mut tx = Transaction {
        tx_id: format!("tx_{}", uuid::Uuid::new_v4().simple()),
        target_path: path.to_path_buf(),
        tmp_path: tmp.clone(),
        backup_path: backup.clone(),
        status: TransactionStatus::Pending,
        start_time: now_rfc3339(),
        end_time: None,
        error: None,
    };
    if let Err(e) = log.append(&tx) {
        cleanup(&tmp, backup.as_deref());
        return Err(e);
    }

    if let Err(e) = std::fs::rename(&tmp, path) {
        cleanup(&tmp, backup.as_deref());
        tx.status = TransactionStatus::Failed;
        tx.end_time = Some(now_rfc3339());
        tx.error = Some(e.to_string());
        if let Err(log_err) = log.append(&tx) {
            tracing::warn!("failed to record failed transaction: {log_err}");
        }
        return Err(MorfxErr::AtomicWriteFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        });
    }

    // Persist the rename itself. Not every filesystem supports fsync on a
    // directory handle, so failure is advisory.
    if let Some(parent) = path.parent()
        && let Ok(dir) = std::fs::File::open(parent)
    {
        let _ = dir.sync_all();
    }

    Ok(WriteHandle {
        inner: Some(HandleInner::Atomic {
            tx,
            log: log.clone(),
            target: path.to_path_buf(),
            backup,
            prior,
        }),
    })
}

fn write_tmp(tmp: &Path, content: &[u8], prior: Option<&Snapshot>) -> Result<()> {
    let mut file = std::fs::File::create(tmp).map_err(|e| MorfxErr::fs("creating temp file", e))?;
    file.write_all(content)
        .map_err(|e| MorfxErr::fs("writing temp file", e))?;
    file.sync_all()
        .map_err(|e| MorfxErr::fs("syncing temp file", e))?;
    if let Some(mode) = prior.and_then(|s| s.mode) {
        set_file_mode(tmp, mode).map_err(|e| MorfxErr::fs("propagating target mode", e))?;
    }
    Ok(())
}

fn cleanup(tmp: &Path, backup: Option<&Path>) {
    let _ = std::fs::remove_file(tmp);
    if let Some(backup) = backup {
        let _ = std::fs::remove_file(backup);
    }
}
