//! Advisory single-writer lock for a run directory.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::{LedgerError, LedgerResult};

/// Default time to wait for a concurrent writer.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// A lock held longer than this is treated as abandoned.
pub const STALE_LOCK_AGE: Duration = Duration::from_secs(15 * 60);

const RETRY_START: Duration = Duration::from_millis(10);
const RETRY_MAX: Duration = Duration::from_millis(250);

/// RAII guard over `<run_dir>/.ledger.lock`.
///
/// The lock file is created with create-new semantics and removed on drop.
/// It records the holder's pid and acquisition time; a waiter breaks the
/// lock when that holder is gone or the lock is older than
/// [`STALE_LOCK_AGE`].
#[derive(Debug)]
pub struct LedgerLock {
    path: PathBuf,
}

/// Parsed contents of a lock file.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Holder {
    pid: u32,
    acquired: DateTime<Utc>,
}

impl Holder {
    fn current() -> Self {
        Self {
            pid: std::process::id(),
            acquired: Utc::now(),
        }
    }

    fn render(&self) -> String {
        format!("pid={} acquired={}", self.pid, self.acquired.to_rfc3339())
    }

    fn parse(text: &str) -> Option<Self> {
        let mut pid = None;
        let mut acquired = None;
        for part in text.split_whitespace() {
            if let Some(v) = part.strip_prefix("pid=") {
                pid = v.parse().ok();
            } else if let Some(v) = part.strip_prefix("acquired=") {
                acquired = DateTime::parse_from_rfc3339(v)
                    .ok()
                    .map(|t| t.with_timezone(&Utc));
            }
        }
        Some(Self {
            pid: pid?,
            acquired: acquired?,
        })
    }
}

impl LedgerLock {
    /// Acquire the lock, retrying with backoff until `timeout` elapses.
    /// Stale locks are removed with a warning and do not count as held.
    pub fn acquire(path: &Path, timeout: Duration) -> LedgerResult<Self> {
        let start = Instant::now();
        let mut delay = RETRY_START;

        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(file) => {
                    let guard = Self {
                        path: path.to_path_buf(),
                    };
                    // Dropping the guard on error removes the half-written file.
                    write_holder(file, &Holder::current())
                        .map_err(|e| LedgerError::io(path, e))?;
                    debug!(lock = %path.display(), "ledger lock acquired");
                    return Ok(guard);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if break_if_stale(path)? {
                        continue;
                    }
                    let waited = start.elapsed();
                    if waited >= timeout {
                        return Err(LedgerError::LockTimeout {
                            path: path.to_path_buf(),
                            waited_ms: waited.as_millis() as u64,
                        });
                    }
                    std::thread::sleep(delay.min(timeout - waited));
                    delay = (delay * 2).min(RETRY_MAX);
                }
                Err(e) => return Err(LedgerError::io(path, e)),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn write_holder(mut file: fs::File, holder: &Holder) -> std::io::Result<()> {
    writeln!(file, "{}", holder.render())?;
    file.sync_all()
}

/// Remove the lock at `path` if its holder is dead or it is too old.
/// Returns whether it was removed.
fn break_if_stale(path: &Path) -> LedgerResult<bool> {
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(LedgerError::io(path, e)),
    };

    let reason = match Holder::parse(&text) {
        Some(holder) if !process_alive(holder.pid) => {
            format!("holder pid {} is not running", holder.pid)
        }
        Some(holder) if age_of(holder.acquired) > STALE_LOCK_AGE => {
            format!("held by pid {} since {}", holder.pid, holder.acquired.to_rfc3339())
        }
        Some(_) => return Ok(false),
        // Unreadable contents: a holder may be between create and write.
        None => match file_age(path) {
            Some(age) if age > STALE_LOCK_AGE => "lock file is unreadable and old".to_string(),
            _ => return Ok(false),
        },
    };

    // Another waiter may have replaced it since it was read.
    if fs::read_to_string(path).ok().as_deref() != Some(text.as_str()) {
        return Ok(false);
    }
    warn!(lock = %path.display(), reason = %reason, "breaking stale ledger lock");
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
        Err(e) => Err(LedgerError::io(path, e)),
    }
}

fn age_of(acquired: DateTime<Utc>) -> Duration {
    (Utc::now() - acquired).to_std().unwrap_or(Duration::ZERO)
}

fn file_age(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    SystemTime::now().duration_since(modified).ok()
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: signal 0 performs the existence and permission check only.
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    // Only the age bound applies here.
    true
}

impl Drop for LedgerLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), error = %e, "failed to release ledger lock");
        }
    }
}
