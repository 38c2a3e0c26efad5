use crate::network::{NetworkInterface, DEFAULT_MTU};
use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;

pub const DEFAULT_CPUS: u32 = 1;
pub const DEFAULT_RAM_MIB: u64 = 256;
pub const DEFAULT_KERNEL: &str = "latest";
pub const MAX_NETWORKS: usize = 4;

const MIN_MTU: u32 = 576;
const MAX_MTU: u32 = 9000;

/// Declarative configuration of the VM a package is built into.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    #[serde(default)]
    pub vm: VmSection,
    #[serde(default)]
    pub system: SystemSection,
    #[serde(default, rename = "network", skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<NetworkInterface>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct VmSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ram_mib: Option<u64>,
    /// Requested disk size. The image builder may derive a larger minimum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_size_mib: Option<u64>,
    /// Kernel build to embed, or the identifier of the one that was embedded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SystemSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

/// Boot-time kernel switches passed through to the image builder.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct KernelOptions {
    /// Boot into a shell instead of the package's program.
    pub shell: bool,
    /// Record the session.
    pub record: bool,
}

impl BuildConfig {
    /// Fill every unset field that has a default.
    pub fn apply_defaults(&mut self) {
        self.vm.cpus.get_or_insert(DEFAULT_CPUS);
        self.vm.ram_mib.get_or_insert(DEFAULT_RAM_MIB);
        if self.vm.kernel.as_deref().is_none_or(str::is_empty) {
            self.vm.kernel = Some(DEFAULT_KERNEL.to_owned());
        }
        for iface in &mut self.networks {
            iface.mtu.get_or_insert(DEFAULT_MTU);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.vm.cpus == Some(0) {
            return Err(ConfigError::ZeroResource { field: "cpus" });
        }
        if self.vm.ram_mib == Some(0) {
            return Err(ConfigError::ZeroResource { field: "ram_mib" });
        }
        if self.vm.disk_size_mib == Some(0) {
            return Err(ConfigError::ZeroResource {
                field: "disk_size_mib",
            });
        }

        if self.networks.len() > MAX_NETWORKS {
            return Err(ConfigError::TooManyNetworks {
                count: self.networks.len(),
                max: MAX_NETWORKS,
            });
        }

        for (index, iface) in self.networks.iter().enumerate() {
            let fields = [
                ("ip", &iface.ip),
                ("gateway", &iface.gateway),
                ("mask", &iface.mask),
            ];
            let set = fields.iter().filter(|(_, v)| v.is_some()).count();
            if set != 0 && set != fields.len() {
                return Err(ConfigError::PartialNetwork { index });
            }
            for (field, value) in fields {
                if let Some(value) = value {
                    if value.parse::<Ipv4Addr>().is_err() {
                        return Err(ConfigError::InvalidAddress {
                            index,
                            field,
                            value: value.clone(),
                        });
                    }
                }
            }
            if let Some(mtu) = iface.mtu {
                if !(MIN_MTU..=MAX_MTU).contains(&mtu) {
                    return Err(ConfigError::InvalidMtu { index, mtu });
                }
            }
        }

        Ok(())
    }

    /// Apply defaults and validate in one step.
    pub fn with_defaults(mut self) -> Result<Self, ConfigError> {
        self.apply_defaults();
        self.validate()?;
        Ok(self)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

pub fn parse_config_str(input: &str) -> Result<BuildConfig, ConfigError> {
    Ok(toml::from_str(input)?)
}

pub fn parse_config_file(path: impl AsRef<Path>) -> Result<BuildConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config_str(&content)
}
