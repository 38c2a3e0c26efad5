use serde::{Deserialize, Serialize};
use std::fmt;

/// Binary disk format the image builder encodes into.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum DiskFormat {
    Raw,
    VmdkSparse,
    VhdDynamic,
}

impl DiskFormat {
    pub fn id(self) -> &'static str {
        match self {
            DiskFormat::Raw => "raw",
            DiskFormat::VmdkSparse => "vmdk-sparse",
            DiskFormat::VhdDynamic => "vhd-dynamic",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            DiskFormat::Raw => "raw",
            DiskFormat::VmdkSparse => "vmdk",
            DiskFormat::VhdDynamic => "vhd",
        }
    }

    /// MTU the image builder configures on interfaces that declare none.
    pub fn default_mtu(self) -> u32 {
        match self {
            DiskFormat::Raw | DiskFormat::VmdkSparse | DiskFormat::VhdDynamic => 1500,
        }
    }
}

impl fmt::Display for DiskFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}
