//! Per-backend runtime configuration handed to a virtualizer's `initialize`.

use crate::backend::BackendKind;
use crate::RuntimeError;
use serde::{Deserialize, Serialize};

pub const NAT_NETWORK: &str = "nat";
pub const DEFAULT_HYPERV_SWITCH: &str = "Default Switch";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VmwareConfig {
    pub headless: bool,
    pub network_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FirecrackerConfig {}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HyperVConfig {
    pub headless: bool,
    pub switch_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VirtualBoxConfig {
    pub headless: bool,
    pub network_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QemuConfig {
    pub headless: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum BackendConfig {
    Vmware(VmwareConfig),
    Firecracker(FirecrackerConfig),
    HyperV(HyperVConfig),
    VirtualBox(VirtualBoxConfig),
    Qemu(QemuConfig),
}

impl BackendConfig {
    /// The configuration Kiln uses for `kind`. `gui` requests a display
    /// window; firecracker has none and ignores it.
    pub fn for_backend(kind: BackendKind, gui: bool) -> Self {
        let headless = !gui;
        match kind {
            BackendKind::Vmware => BackendConfig::Vmware(VmwareConfig {
                headless,
                network_type: NAT_NETWORK.to_owned(),
            }),
            BackendKind::Firecracker => BackendConfig::Firecracker(FirecrackerConfig {}),
            BackendKind::HyperV => BackendConfig::HyperV(HyperVConfig {
                headless,
                switch_name: DEFAULT_HYPERV_SWITCH.to_owned(),
            }),
            BackendKind::VirtualBox => BackendConfig::VirtualBox(VirtualBoxConfig {
                headless,
                network_type: NAT_NETWORK.to_owned(),
            }),
            BackendKind::Qemu => BackendConfig::Qemu(QemuConfig { headless }),
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            BackendConfig::Vmware(_) => BackendKind::Vmware,
            BackendConfig::Firecracker(_) => BackendKind::Firecracker,
            BackendConfig::HyperV(_) => BackendKind::HyperV,
            BackendConfig::VirtualBox(_) => BackendKind::VirtualBox,
            BackendConfig::Qemu(_) => BackendKind::Qemu,
        }
    }

    /// `None` for backends without a display setting.
    pub fn headless(&self) -> Option<bool> {
        match self {
            BackendConfig::Vmware(c) => Some(c.headless),
            BackendConfig::HyperV(c) => Some(c.headless),
            BackendConfig::VirtualBox(c) => Some(c.headless),
            BackendConfig::Qemu(c) => Some(c.headless),
            BackendConfig::Firecracker(_) => None,
        }
    }

    pub fn marshal(&self) -> Result<Vec<u8>, RuntimeError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn unmarshal(bytes: &[u8]) -> Result<Self, RuntimeError> {
        serde_json::from_slice(bytes)
            .map_err(|e| RuntimeError::Config(format!("invalid backend configuration: {e}")))
    }
}
