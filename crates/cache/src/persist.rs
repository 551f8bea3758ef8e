//! Bounded-retry persistence of a cache file.

use crate::file::CacheFile;
use implmap_kernels::{DispatchError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistPolicy {
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for PersistPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 50,
        }
    }
}

impl PersistPolicy {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_retry_delay_ms(mut self, delay_ms: u64) -> Self {
        self.retry_delay_ms = delay_ms;
        self
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Write the file atomically (temp file plus rename), retrying transient
/// failures. Returns the number of attempts used.
pub fn persist_with_retry(cache: &CacheFile, path: &Path, policy: &PersistPolicy) -> Result<u32> {
    let bytes = cache.to_bytes();
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match write_atomic(path, &bytes) {
            Ok(()) => {
                info!(
                    path = %path.display(),
                    records = cache.len(),
                    bytes = bytes.len(),
                    attempt,
                    "persisted implementation cache"
                );
                return Ok(attempt);
            }
            Err(source) if attempt >= max_attempts => {
                return Err(DispatchError::SerializationIo {
                    attempts: attempt,
                    source,
                });
            }
            Err(err) => {
                warn!(path = %path.display(), attempt, error = %err, "cache write failed, retrying");
                thread::sleep(policy.retry_delay());
            }
        }
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

/// Remove a cache file; a missing file is fine.
pub fn discard(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use implmap_kernels::ObjectType;
    use std::path::PathBuf;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("implmap-persist-{}-{name}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn persists_and_reloads() {
        let dir = scratch("ok");
        let path = dir.join("nested").join("impls.bin");
        let mut cache = CacheFile::new();
        cache.push(ObjectType::from_tag(0x0002_0001).unwrap(), vec![9; 16]);

        let attempts = persist_with_retry(&cache, &path, &PersistPolicy::default()).unwrap();
        assert_eq!(attempts, 1);
        assert_eq!(CacheFile::load(&path).unwrap(), Some(cache));
        assert!(!path.with_extension("tmp").exists());

        discard(&path).unwrap();
        discard(&path).unwrap();
        assert!(CacheFile::load(&path).unwrap().is_none());
    }

    #[test]
    fn exhausted_retries_report_attempts() {
        let dir = scratch("blocked");
        let blocker = dir.join("not-a-dir");
        fs::write(&blocker, b"x").unwrap();
        let path = blocker.join("impls.bin");

        let policy = PersistPolicy::default()
            .with_max_attempts(3)
            .with_retry_delay_ms(1);
        let err = persist_with_retry(&CacheFile::new(), &path, &policy).unwrap_err();
        match err {
            DispatchError::SerializationIo { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn policy_fills_missing_fields_from_defaults() {
        let policy: PersistPolicy = serde_json::from_str(r#"{"max_attempts": 5}"#).unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.retry_delay(), Duration::from_millis(50));
    }
}
