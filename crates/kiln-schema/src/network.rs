use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// Default MTU applied to network interfaces that do not declare one.
pub const DEFAULT_MTU: u32 = 1500;

/// One `[[network]]` slot of a build configuration.
///
/// Addresses are kept as strings so a partially written config round-trips
/// unchanged; [`BuildConfig::validate`](crate::BuildConfig::validate) checks
/// that they parse.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct NetworkInterface {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,
}

impl NetworkInterface {
    /// True when the slot carries a full address/gateway/mask triple.
    pub fn is_resolved(&self) -> bool {
        self.ip.is_some() && self.gateway.is_some() && self.mask.is_some()
    }

    /// Overwrite the slot's address triple with an allocated lease.
    pub fn apply_lease(&mut self, lease: &NetworkLease) {
        self.ip = Some(lease.ip.to_string());
        self.gateway = Some(lease.gateway.to_string());
        self.mask = Some(lease.mask.to_string());
    }
}

/// A concrete address assignment for one network interface.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkLease {
    pub ip: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub mask: Ipv4Addr,
}

impl fmt::Display for NetworkLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (gateway {}, mask {})", self.ip, self.gateway, self.mask)
    }
}
