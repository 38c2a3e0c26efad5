//! Disk build pipeline.
//!
//! The image construction engine and the package format live outside Kiln;
//! this module defines the interfaces it consumes from them and the fixed
//! sequence a build runs through: lease addresses for declared networks,
//! compile the package's file tree, bind an image builder to the target
//! format, negotiate the image size, and encode the image into the disk file.

use crate::network::AddressAllocator;
use crate::{BuildError, CoreError};
use kiln_runtime::DiskFormat;
use kiln_schema::{BuildConfig, KernelOptions, NetworkLease};
use std::fs::File;
use std::io;
use tracing::{debug, info, warn};

const MIB: u64 = 1024 * 1024;

/// Read-only view of a package's contents.
pub trait FileTree {
    /// Total bytes of file content in the tree.
    fn content_size(&self) -> u64;
}

/// Source of a package. `close` must only be called once the disk is built.
pub trait PackageReader: Send {
    fn file_tree(&self) -> &dyn FileTree;
    fn close(&mut self) -> io::Result<()>;
}

/// Turns a file tree into a guest filesystem.
pub trait FsCompiler: Send {
    /// Bytes the compiled filesystem occupies.
    fn compiled_size(&self) -> u64;
}

/// Encodes a compiled filesystem and a kernel into a bootable image.
pub trait ImageBuilder: Send {
    /// Smallest image that holds the filesystem and kernel for `config`.
    fn minimum_size(&self, config: &BuildConfig) -> Result<u64, BuildError>;

    fn set_size(&mut self, bytes: u64);

    fn build(
        &mut self,
        format: DiskFormat,
        target: &mut File,
        config: &BuildConfig,
    ) -> Result<(), BuildError>;

    /// Identifier of the kernel build that was embedded. Known only after
    /// [`build`](Self::build) succeeded.
    fn kernel_used(&self) -> Option<String>;

    fn close(&mut self) -> Result<(), BuildError>;
}

/// Factory for the pipeline's compiler and builder stages.
pub trait ImageEngine: Send + Sync {
    fn compiler(&self, tree: &dyn FileTree) -> Result<Box<dyn FsCompiler>, BuildError>;

    fn builder(
        &self,
        compiler: Box<dyn FsCompiler>,
        kernel: KernelOptions,
        default_mtu: u32,
    ) -> Result<Box<dyn ImageBuilder>, BuildError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    pub kernel: Option<String>,
    pub size: u64,
    pub leases: Vec<NetworkLease>,
}

/// Final image size in bytes.
///
/// A declared size must cover `minimum`; without one, `minimum` is rounded
/// up to a whole MiB.
pub fn negotiate_size(declared_mib: Option<u64>, minimum: u64) -> Result<u64, BuildError> {
    match declared_mib {
        Some(mib) => {
            let requested = mib.saturating_mul(MIB);
            if requested < minimum {
                return Err(BuildError::SizeTooSmall { requested, minimum });
            }
            Ok(requested)
        }
        None => minimum
            .div_ceil(MIB)
            .max(1)
            .checked_mul(MIB)
            .ok_or(BuildError::SizeOverflow { minimum }),
    }
}

/// Closes the builder on every exit path.
struct BuilderGuard {
    builder: Box<dyn ImageBuilder>,
    closed: bool,
}

impl BuilderGuard {
    fn close(mut self) -> Result<(), BuildError> {
        self.closed = true;
        self.builder.close()
    }
}

impl Drop for BuilderGuard {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.builder.close() {
                warn!("failed to close image builder: {e}");
            }
        }
    }
}

/// Build a disk image for `config` into `target`.
///
/// Declared network interfaces are resolved through `allocator` first and
/// the leases written back into `config`.
pub fn build_disk(
    engine: &dyn ImageEngine,
    reader: &dyn PackageReader,
    allocator: &AddressAllocator,
    format: DiskFormat,
    kernel: KernelOptions,
    config: &mut BuildConfig,
    target: &mut File,
) -> Result<BuildOutcome, CoreError> {
    let leases = if config.networks.is_empty() {
        Vec::new()
    } else {
        allocator.assign(config)?
    };

    let compiler = engine.compiler(reader.file_tree())?;
    let mut guard = BuilderGuard {
        builder: engine.builder(compiler, kernel, format.default_mtu())?,
        closed: false,
    };

    let minimum = guard.builder.minimum_size(config)?;
    let size = negotiate_size(config.vm.disk_size_mib, minimum)?;
    debug!("negotiated disk size {size} bytes (minimum {minimum})");
    guard.builder.set_size(size);

    guard.builder.build(format, target, config)?;
    let kernel_used = guard.builder.kernel_used();
    guard.close()?;

    info!("built {format} disk of {size} bytes");
    Ok(BuildOutcome {
        kernel: kernel_used,
        size,
        leases,
    })
}
