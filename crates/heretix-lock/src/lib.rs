//! Advisory file locking with crash recovery, plus a pinning lockfile that
//! detects provider/model drift between runs against the same cache
//! directory.
//!
//! Locking is per run-key (derived from claim + provider + model + seed) and
//! coordinates `heretix` processes sharing a cache directory; it is not a
//! security boundary.

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::time::{SystemTime, UNIX_EPOCH};

thread_local! {
    static THREAD_HOME: RefCell<Option<Utf8PathBuf>> = const { RefCell::new(None) };
}

const DEFAULT_STALE_THRESHOLD_SECS: u64 = 3600;

/// Lock information stored in the lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub created_at: u64,
    pub run_key: String,
    pub heretix_version: String,
}

/// Pins provider/model/schema identity for a cache directory so a later run
/// against stale cached samples can be flagged instead of silently mixing
/// results from two different models.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeretixLock {
    pub schema_version: String,
    pub created_at: DateTime<Utc>,
    pub provider: String,
    pub model: String,
}

/// Context for the current run, compared against a loaded [`HeretixLock`].
#[derive(Debug, Clone)]
pub struct RunContext {
    pub provider: String,
    pub model: String,
    pub schema_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftPair {
    pub locked: String,
    pub current: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LockDrift {
    pub provider: Option<DriftPair>,
    pub model: Option<DriftPair>,
    pub schema_version: Option<DriftPair>,
}

impl LockDrift {
    fn is_empty(&self) -> bool {
        self.provider.is_none() && self.model.is_none() && self.schema_version.is_none()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("concurrent run detected for `{run_key}` (pid {pid}, created {created_ago} ago)")]
    ConcurrentExecution {
        run_key: String,
        pid: u32,
        created_ago: String,
    },

    #[error("stale lock detected for `{run_key}` (pid {pid}, age {age_secs}s); use force to override")]
    StaleLock {
        run_key: String,
        pid: u32,
        age_secs: u64,
    },

    #[error("lock file is corrupted or invalid: {reason}")]
    CorruptedLock { reason: String },

    #[error("failed to acquire lock: {reason}")]
    AcquisitionFailed { reason: String },

    #[error("failed to release lock: {reason}")]
    ReleaseFailed { reason: String },

    #[error("io error during lock operation: {0}")]
    Io(#[from] io::Error),
}

fn write_file_atomic(path: &Utf8PathBuf, content: &str) -> Result<(), io::Error> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no parent directory"))?;
    fs::create_dir_all(parent)?;
    let temp_path = parent.join(format!(".{}.tmp", path.file_name().unwrap_or("file")));
    fs::write(&temp_path, content)?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

fn heretix_home() -> Utf8PathBuf {
    if let Some(tl) = THREAD_HOME.with(|tl| tl.borrow().clone()) {
        return tl;
    }
    if let Ok(p) = std::env::var("HERETIX_HOME") {
        return Utf8PathBuf::from(p);
    }
    Utf8PathBuf::from(".heretix")
}

fn run_root(run_key: &str) -> Utf8PathBuf {
    heretix_home().join("runs").join(run_key)
}

fn ensure_dir_all(path: &Utf8PathBuf) -> Result<(), io::Error> {
    if !path.as_std_path().exists() {
        fs::create_dir_all(path.as_std_path())?;
    }
    Ok(())
}

#[cfg(any(test, feature = "test-utils"))]
pub fn set_thread_home_for_tests(path: Utf8PathBuf) {
    THREAD_HOME.with(|tl| *tl.borrow_mut() = Some(path));
}

#[cfg(test)]
pub fn with_isolated_home() -> tempfile::TempDir {
    let td = tempfile::TempDir::new().expect("failed to create temp dir");
    let p = Utf8PathBuf::from_path_buf(td.path().to_path_buf()).unwrap();
    set_thread_home_for_tests(p);
    td
}

impl HeretixLock {
    #[must_use]
    pub fn new(provider: String, model: String) -> Self {
        Self {
            schema_version: "1".to_string(),
            created_at: Utc::now(),
            provider,
            model,
        }
    }

    #[must_use]
    pub fn detect_drift(&self, current: &RunContext) -> Option<LockDrift> {
        let mut drift = LockDrift::default();
        if self.provider != current.provider {
            drift.provider = Some(DriftPair {
                locked: self.provider.clone(),
                current: current.provider.clone(),
            });
        }
        if self.model != current.model {
            drift.model = Some(DriftPair {
                locked: self.model.clone(),
                current: current.model.clone(),
            });
        }
        if self.schema_version != current.schema_version {
            drift.schema_version = Some(DriftPair {
                locked: self.schema_version.clone(),
                current: current.schema_version.clone(),
            });
        }
        if drift.is_empty() { None } else { Some(drift) }
    }

    pub fn load(run_key: &str) -> Result<Option<Self>, io::Error> {
        let lock_path = Self::lock_path(run_key);
        if !lock_path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&lock_path)?;
        let lock: Self = serde_json::from_str(&content)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(Some(lock))
    }

    pub fn save(&self, run_key: &str) -> Result<(), io::Error> {
        let lock_path = Self::lock_path_utf8(run_key);
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        write_file_atomic(&lock_path, &json).map_err(io::Error::other)
    }

    fn lock_path(run_key: &str) -> PathBuf {
        Self::lock_path_utf8(run_key).into_std_path_buf()
    }

    fn lock_path_utf8(run_key: &str) -> Utf8PathBuf {
        run_root(run_key).join("pin.json")
    }
}

/// Advisory exclusive lock held for the duration of one run against a given
/// run key. Released automatically on drop.
pub struct FileLock {
    lock_path: PathBuf,
    _fd_lock: Option<Box<RwLock<fs::File>>>,
    lock_info: LockInfo,
}

impl FileLock {
    /// Attempts to acquire an exclusive lock for `run_key`, using atomic
    /// `create_new` semantics to avoid TOCTOU races with other processes
    /// racing to acquire the same lock.
    pub fn acquire(run_key: &str, force: bool, ttl_seconds: Option<u64>) -> Result<Self, LockError> {
        let root = run_root(run_key);
        ensure_dir_all(&root).map_err(|e| LockError::AcquisitionFailed {
            reason: format!("failed to create run directory: {e}"),
        })?;

        let lock_path = Self::get_lock_path(run_key);
        let ttl = ttl_seconds.unwrap_or(DEFAULT_STALE_THRESHOLD_SECS);
        Self::acquire_with_retry(run_key, &lock_path, force, ttl, 3)
    }

    fn acquire_with_retry(
        run_key: &str,
        lock_path: &Path,
        force: bool,
        ttl_seconds: u64,
        max_retries: u32,
    ) -> Result<Self, LockError> {
        for attempt in 0..max_retries {
            let lock_info = LockInfo {
                pid: process::id(),
                created_at: now_secs(),
                run_key: run_key.to_string(),
                heretix_version: env!("CARGO_PKG_VERSION").to_string(),
            };

            match fs::OpenOptions::new().create_new(true).write(true).open(lock_path) {
                Ok(lock_file) => return Self::finalize_lock(lock_path.to_path_buf(), lock_file, lock_info),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    Self::check_existing_lock(lock_path, run_key, force, ttl_seconds)?;
                    Self::try_remove_stale_lock(lock_path, run_key)?;
                    match fs::OpenOptions::new().create_new(true).write(true).open(lock_path) {
                        Ok(lock_file) => {
                            return Self::finalize_lock(lock_path.to_path_buf(), lock_file, lock_info);
                        }
                        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                            if attempt + 1 < max_retries {
                                let delay_ms = 10u64.saturating_mul(2u64.saturating_pow(attempt));
                                std::thread::sleep(std::time::Duration::from_millis(delay_ms.min(100)));
                                continue;
                            }
                            return Err(LockError::AcquisitionFailed {
                                reason: format!(
                                    "max retries exceeded for `{run_key}`: another process acquired the lock after stale removal"
                                ),
                            });
                        }
                        Err(e) => {
                            return Err(LockError::AcquisitionFailed {
                                reason: format!("failed to create lock for `{run_key}` after removing stale lock: {e}"),
                            });
                        }
                    }
                }
                Err(e) => {
                    return Err(LockError::AcquisitionFailed {
                        reason: format!("failed to create lock file for `{run_key}` at `{}`: {e}", lock_path.display()),
                    });
                }
            }
        }
        Err(LockError::AcquisitionFailed {
            reason: format!("max retries ({max_retries}) exceeded for lock acquisition on `{run_key}`"),
        })
    }

    fn finalize_lock(lock_path: PathBuf, lock_file: fs::File, lock_info: LockInfo) -> Result<Self, LockError> {
        let lock_json = serde_json::to_string_pretty(&lock_info).map_err(|e| LockError::AcquisitionFailed {
            reason: format!("failed to serialize lock info for `{}`: {e}", lock_info.run_key),
        })?;

        let mut rw_lock = Box::new(RwLock::new(lock_file));
        {
            let fd_lock = rw_lock.try_write().map_err(|_| LockError::ConcurrentExecution {
                run_key: lock_info.run_key.clone(),
                pid: 0,
                created_ago: "unknown".to_string(),
            })?;
            let mut file_ref = &*fd_lock;
            file_ref.write_all(lock_json.as_bytes()).map_err(|e| LockError::AcquisitionFailed {
                reason: format!("failed to write lock info for `{}`: {e}", lock_info.run_key),
            })?;
            file_ref.flush().map_err(|e| LockError::AcquisitionFailed {
                reason: format!("failed to flush lock file for `{}`: {e}", lock_info.run_key),
            })?;
            file_ref.sync_all().map_err(|e| LockError::AcquisitionFailed {
                reason: format!("failed to sync lock file for `{}`: {e}", lock_info.run_key),
            })?;
        }

        Ok(Self { lock_path, _fd_lock: Some(rw_lock), lock_info })
    }

    fn try_remove_stale_lock(lock_path: &Path, run_key: &str) -> Result<(), LockError> {
        let timestamp = now_millis();
        let pid = process::id();
        let stale_path = lock_path.with_extension(format!("stale.{timestamp}.{pid}"));
        match fs::rename(lock_path, &stale_path) {
            Ok(()) => {
                let _ = fs::remove_file(&stale_path);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LockError::AcquisitionFailed {
                reason: format!("failed to rename stale lock for `{run_key}`: {e}"),
            }),
        }
    }

    #[must_use]
    pub fn exists(run_key: &str) -> bool {
        Self::get_lock_path(run_key).exists()
    }

    pub fn get_lock_info(run_key: &str) -> Result<Option<LockInfo>, LockError> {
        let lock_path = Self::get_lock_path(run_key);
        if !lock_path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&lock_path).map_err(|e| LockError::CorruptedLock {
            reason: format!("failed to read lock file: {e}"),
        })?;
        let info: LockInfo = serde_json::from_str(&content)
            .map_err(|e| LockError::CorruptedLock { reason: format!("failed to parse lock file: {e}") })?;
        Ok(Some(info))
    }

    pub fn release(mut self) -> Result<(), LockError> {
        self._fd_lock.take();
        if self.lock_path.exists() {
            fs::remove_file(&self.lock_path).map_err(|e| LockError::ReleaseFailed {
                reason: format!("failed to remove lock file: {e}"),
            })?;
        }
        Ok(())
    }

    #[must_use]
    pub fn run_key(&self) -> &str {
        &self.lock_info.run_key
    }

    #[must_use]
    pub const fn lock_info(&self) -> &LockInfo {
        &self.lock_info
    }

    fn get_lock_path(run_key: &str) -> PathBuf {
        run_root(run_key).as_std_path().join(".lock")
    }

    fn check_existing_lock(lock_path: &Path, run_key: &str, force: bool, ttl_seconds: u64) -> Result<(), LockError> {
        const MAX_READ_RETRIES: u32 = 3;
        const READ_RETRY_DELAY_MS: u64 = 10;

        for attempt in 0..MAX_READ_RETRIES {
            let content = match fs::read_to_string(lock_path) {
                Ok(content) => content,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
                Err(e) => {
                    if attempt + 1 < MAX_READ_RETRIES {
                        std::thread::sleep(std::time::Duration::from_millis(READ_RETRY_DELAY_MS));
                        continue;
                    }
                    return Err(LockError::CorruptedLock {
                        reason: format!("failed to read existing lock for `{run_key}`: {e}"),
                    });
                }
            };

            if content.is_empty() {
                if attempt + 1 < MAX_READ_RETRIES {
                    std::thread::sleep(std::time::Duration::from_millis(READ_RETRY_DELAY_MS));
                    continue;
                }
                return Err(LockError::CorruptedLock {
                    reason: format!("lock file for `{run_key}` is empty (may be initializing)"),
                });
            }

            match serde_json::from_str::<LockInfo>(&content) {
                Ok(existing) => return Self::validate_existing_lock(&existing, run_key, force, ttl_seconds),
                Err(e) => {
                    let incomplete = e.is_eof() || (content.starts_with('{') && !content.contains('}'));
                    if incomplete && attempt + 1 < MAX_READ_RETRIES {
                        std::thread::sleep(std::time::Duration::from_millis(READ_RETRY_DELAY_MS));
                        continue;
                    }
                    return Err(LockError::CorruptedLock {
                        reason: format!("failed to parse existing lock for `{run_key}`: {e}"),
                    });
                }
            }
        }
        unreachable!("check_existing_lock loop exhausted without returning")
    }

    fn validate_existing_lock(existing: &LockInfo, run_key: &str, force: bool, ttl_seconds: u64) -> Result<(), LockError> {
        let now = now_secs();
        let age = now.saturating_sub(existing.created_at);
        let is_stale = age > ttl_seconds;

        if Self::is_process_running(existing.pid) {
            if force {
                return Ok(());
            }
            return Err(LockError::ConcurrentExecution {
                run_key: run_key.to_string(),
                pid: existing.pid,
                created_ago: Self::format_duration_since(existing.created_at),
            });
        }

        if is_stale {
            if force {
                Ok(())
            } else {
                Err(LockError::StaleLock { run_key: run_key.to_string(), pid: existing.pid, age_secs: age })
            }
        } else if force {
            Ok(())
        } else {
            Err(LockError::ConcurrentExecution {
                run_key: run_key.to_string(),
                pid: existing.pid,
                created_ago: Self::format_duration_since(existing.created_at),
            })
        }
    }

    fn is_process_running(pid: u32) -> bool {
        #[cfg(unix)]
        {
            let rc = unsafe { libc::kill(pid as i32, 0) };
            if rc == 0 {
                true
            } else {
                matches!(io::Error::last_os_error().raw_os_error(), Some(code) if code == libc::EPERM)
            }
        }
        #[cfg(not(unix))]
        {
            true
        }
    }

    fn format_duration_since(timestamp: u64) -> String {
        let duration = now_secs().saturating_sub(timestamp);
        if duration < 60 {
            format!("{duration}s")
        } else if duration < 3600 {
            format!("{}m", duration / 60)
        } else if duration < 86400 {
            format!("{}h", duration / 3600)
        } else {
            format!("{}d", duration / 86400)
        }
    }
}

impl std::fmt::Debug for FileLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLock")
            .field("lock_path", &self.lock_path)
            .field("lock_info", &self.lock_info)
            .field("_fd_lock", &"<RwLock>")
            .finish()
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        self._fd_lock.take();
        if self.lock_path.exists() {
            let _ = fs::remove_file(&self.lock_path);
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

fn now_millis() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis()
}

/// Cleanup helpers used by the CLI's cache-clearing commands.
pub mod utils {
    use super::{DEFAULT_STALE_THRESHOLD_SECS, FileLock, LockError, fs, now_secs};

    pub fn can_clean(run_key: &str, force: bool, ttl_seconds: Option<u64>) -> Result<(), LockError> {
        let ttl = ttl_seconds.unwrap_or(DEFAULT_STALE_THRESHOLD_SECS);
        if let Some(info) = FileLock::get_lock_info(run_key)? {
            if FileLock::is_process_running(info.pid) {
                if force {
                    return Ok(());
                }
                return Err(LockError::ConcurrentExecution {
                    run_key: run_key.to_string(),
                    pid: info.pid,
                    created_ago: FileLock::format_duration_since(info.created_at),
                });
            }
            if !force {
                let age = now_secs().saturating_sub(info.created_at);
                if age <= ttl {
                    return Err(LockError::StaleLock { run_key: run_key.to_string(), pid: info.pid, age_secs: age });
                }
            }
        }
        Ok(())
    }

    pub fn force_remove_lock(run_key: &str) -> Result<(), LockError> {
        let lock_path = FileLock::get_lock_path(run_key);
        if lock_path.exists() {
            fs::remove_file(&lock_path).map_err(|e| LockError::ReleaseFailed {
                reason: format!("failed to force remove lock: {e}"),
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_test_env() -> tempfile::TempDir {
        with_isolated_home()
    }

    #[test]
    fn lock_acquisition_and_release() {
        let _home = setup_test_env();
        let run_key = "claim-hash-acquisition";

        let lock = FileLock::acquire(run_key, false, None).unwrap();
        assert_eq!(lock.run_key(), run_key);
        assert!(FileLock::exists(run_key));

        assert!(FileLock::acquire(run_key, false, None).is_err());

        lock.release().unwrap();
        assert!(!FileLock::exists(run_key));

        let _lock2 = FileLock::acquire(run_key, false, None).unwrap();
    }

    #[test]
    fn automatic_cleanup_on_drop() {
        let _home = setup_test_env();
        let run_key = "claim-hash-cleanup";
        {
            let _lock = FileLock::acquire(run_key, false, None).unwrap();
            assert!(FileLock::exists(run_key));
        }
        assert!(!FileLock::exists(run_key));
    }

    #[test]
    fn force_overrides_stale_lock() {
        let _home = setup_test_env();
        let run_key = "claim-hash-stale";
        let lock_path = FileLock::get_lock_path(run_key);
        fs::create_dir_all(lock_path.parent().unwrap()).unwrap();

        let stale = LockInfo {
            pid: 999_999,
            created_at: 0,
            run_key: run_key.to_string(),
            heretix_version: "0.1.0".to_string(),
        };
        fs::write(&lock_path, serde_json::to_string(&stale).unwrap()).unwrap();

        let lock = FileLock::acquire(run_key, true, Some(1)).unwrap();
        assert_eq!(lock.run_key(), run_key);
    }

    #[test]
    fn lockfile_detects_provider_drift() {
        let pin = HeretixLock::new("anthropic".to_string(), "claude-3-5-sonnet".to_string());
        let current = RunContext {
            provider: "openai".to_string(),
            model: "claude-3-5-sonnet".to_string(),
            schema_version: "1".to_string(),
        };
        let drift = pin.detect_drift(&current).unwrap();
        assert!(drift.provider.is_some());
        assert!(drift.model.is_none());
    }

    #[test]
    fn lockfile_roundtrips_through_disk() {
        let _home = setup_test_env();
        let run_key = "claim-hash-pin";
        let pin = HeretixLock::new("anthropic".to_string(), "claude-3-5-sonnet".to_string());
        pin.save(run_key).unwrap();
        let loaded = HeretixLock::load(run_key).unwrap().unwrap();
        assert_eq!(loaded.provider, "anthropic");
    }
}
