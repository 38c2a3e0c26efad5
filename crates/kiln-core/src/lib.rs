//! Build-and-launch orchestration for Kiln.
//!
//! This crate composes the schema, store, and runtime crates into the
//! `Orchestrator`: it validates the selected backend, acquires a
//! `ResourceScope` for the build's scratch directory and disk file, drives
//! the disk build pipeline (leasing network addresses from the
//! `AddressAllocator` when the configuration declares interfaces), and hands
//! the finished disk to the backend's virtualizer.

pub mod mock;
pub mod network;
pub mod orchestrator;
pub mod pipeline;
pub mod scope;

pub use network::{address_pool, AddressAllocator, BRIDGE_IP, SUBNET_MASK};
pub use orchestrator::{BuildRequest, Orchestrator, RunOptions, RunReport};
pub use pipeline::{
    build_disk, negotiate_size, BuildOutcome, FileTree, FsCompiler, ImageBuilder, ImageEngine,
    PackageReader,
};
pub use scope::ResourceScope;

use std::path::PathBuf;
use thiserror::Error;

/// Failure inside the disk build pipeline. No partial image is usable.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("disk size of {requested} bytes is below the {minimum} bytes the image needs")]
    SizeTooSmall { requested: u64, minimum: u64 },
    #[error("image minimum of {minimum} bytes cannot be rounded to a whole MiB")]
    SizeOverflow { minimum: u64 },
    #[error("{stage} failed: {message}")]
    Stage {
        stage: &'static str,
        message: String,
    },
    #[error("build I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    pub fn stage(stage: &'static str, message: impl Into<String>) -> Self {
        Self::Stage {
            stage,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{reason}")]
    BackendUnavailable { backend: String, reason: String },
    #[error("no network addresses left to lease")]
    NetworkExhausted,
    #[error("failed to build disk: {0}")]
    Build(#[from] BuildError),
    #[error("failed to close package reader: {0}")]
    ReaderClose(#[source] std::io::Error),
    #[error("failed to configure virtualizer: {0}")]
    Configuration(#[source] kiln_runtime::RuntimeError),
    #[error("failed to start virtualizer: {0}")]
    Start(#[source] kiln_runtime::RuntimeError),
    #[error("failed to save disk to {}: {source}", dest.display())]
    Relocation {
        dest: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("configuration error: {0}")]
    Config(#[from] kiln_schema::ConfigError),
    #[error("store error: {0}")]
    Store(#[from] kiln_store::StoreError),
    #[error("runtime error: {0}")]
    Runtime(#[from] kiln_runtime::RuntimeError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
