use crate::CoreError;
use kiln_runtime::DiskFile;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Scratch directory and disk file owned by one build.
///
/// Both are removed when the scope is finalized, explicitly or on drop.
/// If the disk was built and an output path is given, the disk is moved
/// there first.
#[derive(Debug)]
pub struct ResourceScope {
    dir: Option<TempDir>,
    disk_path: PathBuf,
    file: Option<File>,
    built: bool,
    finalized: bool,
}

impl ResourceScope {
    /// Create `<root>/<prefix>-<random>` and the disk file inside it.
    pub fn open(root: &Path, prefix: &str, disk: &DiskFile) -> Result<Self, CoreError> {
        fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{prefix}-"))
            .tempdir_in(root)?;

        let (file, disk_path) = match *disk {
            DiskFile::Named(name) => {
                let path = dir.path().join(name);
                (File::create(&path)?, path)
            }
            DiskFile::Temporary { prefix: disk_prefix } => tempfile::Builder::new()
                .prefix(disk_prefix)
                .tempfile_in(dir.path())?
                .keep()
                .map_err(|e| e.error)?,
        };
        debug!("opened scratch disk {}", disk_path.display());

        Ok(Self {
            dir: Some(dir),
            disk_path,
            file: Some(file),
            built: false,
            finalized: false,
        })
    }

    /// Writable handle on the disk file until [`close_disk`](Self::close_disk).
    pub fn disk_file(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("disk file already closed"))
    }

    pub fn disk_path(&self) -> &Path {
        &self.disk_path
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_ref().map(TempDir::path)
    }

    /// Flush and close the disk file. The path stays valid.
    pub fn close_disk(&mut self) -> io::Result<()> {
        if let Some(file) = self.file.take() {
            file.sync_all()?;
        }
        Ok(())
    }

    /// Record that the disk holds a complete image and may be saved.
    pub fn mark_built(&mut self) {
        self.built = true;
    }

    /// Release everything the scope owns. Returns where the disk was saved.
    ///
    /// Relocation only happens for a built disk. Its failure is returned,
    /// but cleanup runs regardless. Calling this again is a no-op.
    pub fn finalize(&mut self, output: Option<&Path>) -> Result<Option<PathBuf>, CoreError> {
        if self.finalized {
            return Ok(None);
        }
        self.finalized = true;

        // Close errors are moot once the disk is discarded or copied.
        drop(self.file.take());

        let saved = match output {
            Some(dest) if self.built => relocate(&self.disk_path, dest).map(Some),
            Some(dest) => {
                debug!("disk was never built; not saving to {}", dest.display());
                Ok(None)
            }
            None => Ok(None),
        };

        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("failed to remove scratch directory {}: {e}", path.display());
                }
            }
        }

        saved
    }
}

impl Drop for ResourceScope {
    fn drop(&mut self) {
        if !self.finalized {
            let _ = self.finalize(None);
        }
    }
}

fn relocate(src: &Path, dest: &Path) -> Result<PathBuf, CoreError> {
    info!("copying disk to {}", dest.display());
    if let Err(e) = fs::rename(src, dest) {
        // rename fails across filesystems
        debug!("rename to {} failed ({e}); copying instead", dest.display());
        if let Err(source) = fs::copy(src, dest) {
            discard_partial(dest);
            return Err(CoreError::Relocation {
                dest: dest.to_path_buf(),
                source,
            });
        }
    }
    info!("disk saved to {}", dest.display());
    Ok(dest.to_path_buf())
}

/// Remove whatever a failed copy left at `dest`.
fn discard_partial(dest: &Path) {
    if let Err(e) = fs::remove_file(dest) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("failed to remove partial disk at {}: {e}", dest.display());
        }
    }
}
