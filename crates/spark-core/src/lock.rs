//! Reusable exclusive-lock utility shared by the queue (C1), the cognitive
//! store (C3), and the quarantine writer (C6).
//!
//! Grounded in `original_source/lib/cognitive_learner.py`'s `_insights_lock`:
//! an `O_CREAT|O_EXCL` lock file, a bounded spin-wait, and a stale-age
//! takeover so a crashed writer can never wedge the system forever. Every
//! acquisition is RAII — the lock file is removed on all exit paths via
//! `Drop`, matching the REDESIGN FLAGS guidance in spec.md §9.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

/// Default age after which an orphaned lock file is considered abandoned
/// by a crashed writer and cleared by the next acquirer.
pub const DEFAULT_STALE_AGE: Duration = Duration::from_secs(60);

/// An acquired (or best-effort-acquired) exclusive lock on `path`.
///
/// If acquisition timed out without success, `acquired` is `false` and the
/// caller should treat the protected operation as unsafe to perform (the
/// queue's `capture` falls back to the overflow sidecar in that case).
pub struct FileLock {
    path: PathBuf,
    file: Option<File>,
    acquired: bool,
}

impl FileLock {
    /// Attempts to acquire the lock at `path`, spinning for up to `timeout`.
    /// A lock file older than `stale_age` is treated as abandoned and
    /// removed before the next attempt.
    pub fn acquire(path: impl AsRef<Path>, timeout: Duration, stale_age: Duration) -> Self {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }

        let start = Instant::now();
        loop {
            match OpenOptions::new()
                .create_new(true)
                .write(true)
                .custom_flags(libc::O_EXCL)
                .open(&path)
            {
                Ok(mut file) => {
                    use std::io::Write;
                    let _ = write!(file, "pid={} ts={:?}\n", std::process::id(), SystemTime::now());
                    return Self { path, file: Some(file), acquired: true };
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if Self::is_stale(&path, stale_age) {
                        let _ = fs::remove_file(&path);
                        continue;
                    }
                    if start.elapsed() >= timeout {
                        return Self { path, file: None, acquired: false };
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(_) => return Self { path, file: None, acquired: false },
            }
        }
    }

    fn is_stale(path: &Path, stale_age: Duration) -> bool {
        let Ok(meta) = fs::metadata(path) else { return false };
        let Ok(modified) = meta.modified() else { return false };
        SystemTime::now()
            .duration_since(modified)
            .map(|age| age >= stale_age)
            .unwrap_or(false)
    }

    pub fn is_acquired(&self) -> bool {
        self.acquired
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        self.file = None;
        if self.acquired {
            let _ = fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquires_and_releases() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("x.lock");
        {
            let lock = FileLock::acquire(&lock_path, Duration::from_millis(50), DEFAULT_STALE_AGE);
            assert!(lock.is_acquired());
            assert!(lock_path.exists());
        }
        assert!(!lock_path.exists());
    }

    #[test]
    fn second_acquirer_times_out_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("x.lock");
        let _first = FileLock::acquire(&lock_path, Duration::from_millis(50), DEFAULT_STALE_AGE);
        let second = FileLock::acquire(&lock_path, Duration::from_millis(30), DEFAULT_STALE_AGE);
        assert!(!second.is_acquired());
    }

    #[test]
    fn stale_lock_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("x.lock");
        fs::write(&lock_path, b"pid=999999").unwrap();
        let old = SystemTime::now() - Duration::from_secs(120);
        let ft = filetime_from(old);
        let _ = filetime_set(&lock_path, ft);
        let lock = FileLock::acquire(&lock_path, Duration::from_millis(50), Duration::from_secs(60));
        assert!(lock.is_acquired());
    }

    // Minimal local shims so the test doesn't need an extra dependency just
    // to backdate a file's mtime.
    fn filetime_from(t: SystemTime) -> SystemTime {
        t
    }
    fn filetime_set(path: &Path, t: SystemTime) -> io::Result<()> {
        let f = OpenOptions::new().write(true).open(path)?;
        f.set_modified(t)
    }
}
