//! Persistent state for Kiln.
//!
//! Kiln keeps exactly one durable artifact between runs: the queue of
//! virtual network addresses that have not been leased yet. This crate
//! provides the store directory layout (`StoreLayout`) with its format
//! version marker, an exclusive/shared file lock (`QueueLock`), and a
//! generic on-disk FIFO (`DurableQueue`) keyed by insertion order.

pub mod layout;
pub mod lock;
pub mod queue;

pub use layout::{StoreLayout, STORE_FORMAT_VERSION};
pub use lock::QueueLock;
pub use queue::{DurableQueue, QueueEntry};

use std::path::Path;
use thiserror::Error;

/// Fsync a directory so that a preceding `rename()` or `unlink()` is durable.
///
/// POSIX does not guarantee directory entry durability without it, even
/// where common filesystem defaults make it likely.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("lock acquisition failed: {0}")]
    LockFailed(String),
    #[error("store format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("queue at {0} is not initialized")]
    QueueMissing(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_display_lock_failed() {
        let e = StoreError::LockFailed("reason".to_owned());
        assert!(e.to_string().contains("reason"));
    }

    #[test]
    fn store_error_display_version_mismatch() {
        let e = StoreError::VersionMismatch {
            expected: 2,
            found: 1,
        };
        let msg = e.to_string();
        assert!(msg.contains('2'));
        assert!(msg.contains('1'));
    }

    #[test]
    fn store_error_display_queue_missing() {
        let e = StoreError::QueueMissing("/tmp/q".to_owned());
        assert!(e.to_string().contains("/tmp/q"));
    }
}
