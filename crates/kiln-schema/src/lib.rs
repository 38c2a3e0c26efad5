//! Build configuration schema for Kiln.
//!
//! This crate defines what a build request is configured with: the TOML
//! build configuration (`BuildConfig`) with its `[vm]`, `[system]` and
//! `[[network]]` sections, the defaults and validation applied before a disk
//! is built, the kernel boot options passed to the image builder, and the
//! `NetworkLease` value handed out by the address allocator.

pub mod config;
pub mod network;

pub use config::{
    parse_config_file, parse_config_str, BuildConfig, KernelOptions, SystemSection, VmSection,
    DEFAULT_CPUS, DEFAULT_KERNEL, DEFAULT_RAM_MIB, MAX_NETWORKS,
};
pub use network::{NetworkInterface, NetworkLease, DEFAULT_MTU};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("failed to render config: {0}")]
    RenderToml(#[from] toml::ser::Error),
    #[error("vm.{field} must be greater than zero")]
    ZeroResource { field: &'static str },
    #[error("too many network interfaces: {count} declared, at most {max} supported")]
    TooManyNetworks { count: usize, max: usize },
    #[error("network[{index}].{field} is not a valid IPv4 address: '{value}'")]
    InvalidAddress {
        index: usize,
        field: &'static str,
        value: String,
    },
    #[error("network[{index}] is partially configured: ip, gateway and mask must be set together")]
    PartialNetwork { index: usize },
    #[error("network[{index}].mtu must be between 576 and 9000, got {mtu}")]
    InvalidMtu { index: usize, mtu: u32 },
}
