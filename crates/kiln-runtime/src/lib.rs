//! Hypervisor backends for Kiln.
//!
//! This crate describes what the orchestrator needs to know about each
//! supported hypervisor: a static `BackendDescriptor` table (disk format,
//! disk file naming, host OS restriction, bridge and GUI peculiarities),
//! the per-backend runtime configuration and its marshaling, the
//! `VirtualizerDriver` / `Virtualizer` traits implemented by the actual
//! hypervisor integrations, the virtualizer lifecycle state machine,
//! prerequisite probes, host bridge provisioning, and a mock driver.

pub mod backend;
pub mod config;
pub mod format;
pub mod host;
pub mod lifecycle;
pub mod mock;
pub mod prereq;

pub use backend::{
    descriptor, BackendDescriptor, BackendKind, BackendRegistry, DiskFile, Virtualizer,
    VirtualizerDriver, DESCRIPTORS,
};
pub use config::{
    BackendConfig, FirecrackerConfig, HyperVConfig, QemuConfig, VirtualBoxConfig, VmwareConfig,
};
pub use format::DiskFormat;
pub use host::{
    current_os, CommandOutput, CommandRunner, LinuxBridge, SystemRunner, BRIDGE_DEVICE,
};
pub use lifecycle::{validate_transition, VirtState};
pub use prereq::{check_backend_prereqs, command_exists, format_missing, MissingPrereq};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unknown backend '{0}' (expected one of: vmware, firecracker, hyperv, virtualbox, qemu)")]
    UnknownBackend(String),
    #[error("no driver registered for backend '{0}'")]
    NotRegistered(String),
    #[error("invalid virtualizer state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("backend configuration rejected: {0}")]
    Config(String),
    #[error("virtualizer failed to start: {0}")]
    StartFailed(String),
    #[error("bridge device error: {0}")]
    Bridge(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
