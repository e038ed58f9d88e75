//! Opening input files.
//!
//! Inputs are often produced by another build step that may still hold them
//! open, so opening goes through a bounded retry loop on the calling thread:
//! one attempt, then [`RetryPolicy::attempts`] more separated by
//! [`RetryPolicy::delay`], then a final attempt whose error is returned.

use crate::error::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::thread;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Bounded retry for opening contended files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of retries between the first and the final attempt
    pub attempts: u32,
    /// Delay before each retry
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Creates a new policy with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of retries
    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Sets the delay before each retry
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Total number of open attempts including the first and the final one
    pub fn total_attempts(&self) -> u32 {
        self.attempts.saturating_add(2)
    }
}

/// Trait for opening input files
///
/// The engine only needs a readable handle; implementations decide how the
/// file is shared with other processes.
pub trait SourceOpener: Send + Sync {
    /// Opens `path` for reading
    fn open(&self, path: &Path) -> io::Result<File>;
}

/// Opens files read-only while letting other readers share them
#[derive(Debug, Clone, Copy, Default)]
pub struct SharedReadOpener;

impl SourceOpener for SharedReadOpener {
    fn open(&self, path: &Path) -> io::Result<File> {
        let mut options = OpenOptions::new();
        options.read(true);
        #[cfg(windows)]
        {
            use std::os::windows::fs::OpenOptionsExt;
            // FILE_SHARE_READ
            options.share_mode(0x0000_0001);
        }
        options.open(path)
    }
}

/// Opens `path` through `opener`, retrying per `policy`
pub fn open_with_retry(
    opener: &dyn SourceOpener,
    path: &Path,
    policy: &RetryPolicy,
) -> Result<File> {
    match opener.open(path) {
        Ok(file) => return Ok(file),
        Err(e) => warn!("error reading file '{}': {} - retrying...", path.display(), e),
    }

    for attempt in 1..=policy.attempts {
        thread::sleep(policy.delay);
        match opener.open(path) {
            Ok(file) => {
                debug!("Opened {} on retry {}", path.display(), attempt);
                return Ok(file);
            }
            Err(e) => trace!("Retry {} for {} failed: {}", attempt, path.display(), e),
        }
    }

    opener.open(path).map_err(|source| Error::FileOpen {
        path: path.to_path_buf(),
        attempts: policy.total_attempts(),
        source,
    })
}
