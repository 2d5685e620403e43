//! Advisory file locks realized as PID sentinel files.
//!
//! A lock on `p` is the file `p.lock` containing the holder's PID. Locks
//! from processes that are no longer alive are treated as stale and
//! reclaimed. An in-process set keeps two tasks in this process from
//! holding the same path at once.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use crate::error::MorfxErr;
use crate::error::Result;

const LOCK_SUFFIX: &str = ".lock";
const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Default, Debug)]
pub(crate) struct LockRegistry {
    held: Mutex<HashSet<PathBuf>>,
}

impl LockRegistry {
    fn try_reserve(&self, path: &Path) -> Result<bool> {
        let mut held = self
            .held
            .lock()
            .map_err(|_| MorfxErr::Internal("lock registry mutex poisoned".to_string()))?;
        Ok(held.insert(path.to_path_buf()))
    }

    fn unreserve(&self, path: &Path) {
        if let Ok(mut held) = self.held.lock() {
            held.remove(path);
        }
    }
}

/// A held lock. Dropping releases it; call [`FileLock::release`] to observe
/// removal errors.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    sentinel: PathBuf,
    registry: Arc<LockRegistry>,
    released: bool,
}

impl FileLock {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(mut self) -> Result<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.registry.unreserve(&self.path);
        match std::fs::remove_file(&self.sentinel) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MorfxErr::fs("removing lock sentinel", e)),
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.release_inner();
    }
}

pub(crate) async fn acquire(
    registry: Arc<LockRegistry>,
    path: &Path,
    timeout: Duration,
) -> Result<FileLock> {
    let sentinel = sentinel_path(path);
    let deadline = Instant::now() + timeout;

    loop {
        if registry.try_reserve(path)? {
            match try_create_sentinel(&sentinel) {
                Ok(()) => {
                    return Ok(FileLock {
                        path: path.to_path_buf(),
                        sentinel,
                        registry,
                        released: false,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    registry.unreserve(path);
                    if reap_if_stale(&sentinel)? {
                        // Stale sentinel removed; retry immediately.
                        continue;
                    }
                }
                Err(e) => {
                    registry.unreserve(path);
                    return Err(MorfxErr::fs("creating lock sentinel", e));
                }
            }
        }

        if Instant::now() >= deadline {
            return Err(MorfxErr::LockTimeout {
                path: path.to_path_buf(),
            });
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn sentinel_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(LOCK_SUFFIX);
    PathBuf::from(s)
}

fn try_create_sentinel(sentinel: &Path) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(sentinel)?;
    write!(file, "{}", std::process::id())?;
    file.sync_all()
}

/// Remove the sentinel when its recorded owner is gone. An unreadable or
/// unparseable PID also counts as stale. Returns true when removed.
fn reap_if_stale(sentinel: &Path) -> Result<bool> {
    let contents = match std::fs::read_to_string(sentinel) {
        Ok(contents) => contents,
        // Raced with a release; the caller retries.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(MorfxErr::fs("reading lock sentinel", e)),
    };

    let stale = match contents.trim().parse::<u32>() {
        Ok(pid) => !process_alive(pid),
        Err(_) => true,
    };
    if !stale {
        return Ok(false);
    }

    match std::fs::remove_file(sentinel) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(MorfxErr::fs("removing stale lock sentinel", e)),
    }
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    let ret = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if ret == 0 {
        return true;
    }
    // EPERM means the process exists but belongs to someone else.
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    // No cheap liveness probe; err on the side of respecting the lock.
    true
}
