use crate::lock::QueueLock;
use crate::{fsync_dir, StoreError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

const META_FILE: &str = "queue.json";
const LOCK_FILE: &str = ".lock";
const ENTRY_SUFFIX: &str = ".entry";

/// A single persisted queue element.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry<T> {
    pub seq: u64,
    pub enqueued_at: String,
    pub item: T,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueMeta {
    /// Last sequence number handed out. Never decreases, so insertion order
    /// survives the queue running empty.
    tail: u64,
}

/// Durable FIFO queue stored as one JSON file per element.
///
/// Entry files are named by a zero-padded sequence number, so directory
/// order equals insertion order. Every mutation holds an exclusive
/// [`QueueLock`]; concurrent processes and threads serialize on it.
pub struct DurableQueue<T> {
    dir: PathBuf,
    _item: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for DurableQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableQueue")
            .field("dir", &self.dir)
            .finish()
    }
}

impl<T: Serialize + DeserializeOwned> DurableQueue<T> {
    /// Open the queue rooted at `dir`, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let queue = Self {
            dir,
            _item: PhantomData,
        };
        let _lock = QueueLock::exclusive(&queue.lock_path())?;
        if !queue.meta_path().exists() {
            queue.write_meta(&QueueMeta::default())?;
            debug!("created queue at {}", queue.dir.display());
        }
        Ok(queue)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append one item. Returns its sequence number.
    pub fn enqueue(&self, item: &T) -> Result<u64, StoreError> {
        let _lock = QueueLock::exclusive(&self.lock_path())?;
        let mut meta = self.read_meta()?;
        let seq = self.append(&mut meta, item)?;
        self.write_meta(&meta)?;
        Ok(seq)
    }

    /// Append every item in order under a single lock. Returns the number
    /// of items written.
    pub fn extend<'a, I>(&self, items: I) -> Result<usize, StoreError>
    where
        I: IntoIterator<Item = &'a T>,
        T: 'a,
    {
        let _lock = QueueLock::exclusive(&self.lock_path())?;
        let mut meta = self.read_meta()?;
        let mut count = 0;
        for item in items {
            self.append(&mut meta, item)?;
            count += 1;
        }
        self.write_meta(&meta)?;
        Ok(count)
    }

    /// Remove and return the oldest item. There is no undo.
    pub fn dequeue(&self) -> Result<Option<T>, StoreError> {
        let _lock = QueueLock::exclusive(&self.lock_path())?;
        for path in self.entry_paths()? {
            let Some(entry) = self.read_entry(&path) else {
                let _ = fs::remove_file(&path);
                continue;
            };
            fs::remove_file(&path)?;
            fsync_dir(&self.dir)?;
            debug!("dequeued seq {} from {}", entry.seq, self.dir.display());
            return Ok(Some(entry.item));
        }
        Ok(None)
    }

    /// Return the oldest item without removing it.
    pub fn peek(&self) -> Result<Option<T>, StoreError> {
        let _lock = QueueLock::shared(&self.lock_path())?;
        for path in self.entry_paths()? {
            if let Some(entry) = self.read_entry(&path) {
                return Ok(Some(entry.item));
            }
        }
        Ok(None)
    }

    /// All readable entries, oldest first.
    pub fn peek_all(&self) -> Result<Vec<QueueEntry<T>>, StoreError> {
        let _lock = QueueLock::shared(&self.lock_path())?;
        Ok(self
            .entry_paths()?
            .iter()
            .filter_map(|p| self.read_entry(p))
            .collect())
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        let _lock = QueueLock::shared(&self.lock_path())?;
        Ok(self
            .entry_paths()?
            .iter()
            .filter(|p| self.read_entry(p).is_some())
            .count())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Total number of items ever enqueued.
    pub fn issued(&self) -> Result<u64, StoreError> {
        let _lock = QueueLock::shared(&self.lock_path())?;
        Ok(self.read_meta()?.tail)
    }

    /// Drop every pending entry. Sequence numbers keep counting.
    pub fn clear(&self) -> Result<usize, StoreError> {
        let _lock = QueueLock::exclusive(&self.lock_path())?;
        let paths = self.entry_paths()?;
        for path in &paths {
            fs::remove_file(path)?;
        }
        fsync_dir(&self.dir)?;
        Ok(paths.len())
    }

    fn append(&self, meta: &mut QueueMeta, item: &T) -> Result<u64, StoreError> {
        let seq = meta.tail + 1;
        let entry = QueueEntry {
            seq,
            enqueued_at: chrono::Utc::now().to_rfc3339(),
            item,
        };
        self.write_atomic(&self.entry_path(seq), &serde_json::to_vec_pretty(&entry)?)?;
        meta.tail = seq;
        Ok(seq)
    }

    fn entry_path(&self, seq: u64) -> PathBuf {
        self.dir.join(format!("{seq:020}{ENTRY_SUFFIX}"))
    }

    fn meta_path(&self) -> PathBuf {
        self.dir.join(META_FILE)
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    fn entry_paths(&self) -> Result<Vec<PathBuf>, StoreError> {
        let mut paths = Vec::new();
        for dir_entry in fs::read_dir(&self.dir)? {
            let path = dir_entry?.path();
            let is_entry = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(ENTRY_SUFFIX) && !n.starts_with('.'));
            if is_entry {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Decode an entry. Undecodable entries are skipped here and only
    /// removed by mutations holding the exclusive lock.
    fn read_entry(&self, path: &Path) -> Option<QueueEntry<T>> {
        let content = match fs::read(path) {
            Ok(c) => c,
            Err(e) => {
                warn!("unreadable queue entry {}: {e}", path.display());
                return None;
            }
        };
        match serde_json::from_slice(&content) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("corrupt queue entry {}: {e}", path.display());
                None
            }
        }
    }

    fn read_meta(&self) -> Result<QueueMeta, StoreError> {
        let path = self.meta_path();
        if !path.exists() {
            return Err(StoreError::QueueMissing(self.dir.display().to_string()));
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn write_meta(&self, meta: &QueueMeta) -> Result<(), StoreError> {
        self.write_atomic(&self.meta_path(), &serde_json::to_vec_pretty(meta)?)
    }

    fn write_atomic(&self, dest: &Path, content: &[u8]) -> Result<(), StoreError> {
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content)?;
        tmp.as_file().sync_all()?;
        tmp.persist(dest).map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(&self.dir)?;
        Ok(())
    }
}
