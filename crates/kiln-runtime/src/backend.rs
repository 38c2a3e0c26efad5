use crate::format::DiskFormat;
use crate::host::LinuxBridge;
use crate::lifecycle::VirtState;
use crate::RuntimeError;
use kiln_schema::BuildConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Vmware,
    Firecracker,
    HyperV,
    VirtualBox,
    Qemu,
}

impl BackendKind {
    pub const ALL: [BackendKind; 5] = [
        BackendKind::Vmware,
        BackendKind::Firecracker,
        BackendKind::HyperV,
        BackendKind::VirtualBox,
        BackendKind::Qemu,
    ];

    pub fn id(self) -> &'static str {
        match self {
            BackendKind::Vmware => "vmware",
            BackendKind::Firecracker => "firecracker",
            BackendKind::HyperV => "hyperv",
            BackendKind::VirtualBox => "virtualbox",
            BackendKind::Qemu => "qemu",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for BackendKind {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vmware" => Ok(BackendKind::Vmware),
            "firecracker" => Ok(BackendKind::Firecracker),
            "hyperv" | "hyper-v" => Ok(BackendKind::HyperV),
            "virtualbox" => Ok(BackendKind::VirtualBox),
            "qemu" => Ok(BackendKind::Qemu),
            _ => Err(RuntimeError::UnknownBackend(s.to_owned())),
        }
    }
}

/// How the disk file inside a build's scratch directory is named.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskFile {
    /// Fixed name. Some hypervisors refuse files without the right extension.
    Named(&'static str),
    /// Randomly suffixed name starting with `prefix`.
    Temporary { prefix: &'static str },
}

/// Static facts about one hypervisor backend.
#[derive(Debug, Clone, Copy)]
pub struct BackendDescriptor {
    pub kind: BackendKind,
    /// Host OS family (as in `std::env::consts::OS`) the backend is limited to.
    pub required_os: Option<&'static str>,
    pub disk_format: DiskFormat,
    pub disk_file: DiskFile,
    /// A host bridge device must exist before the first VM starts.
    pub needs_bridge: bool,
    pub supports_gui: bool,
    /// The embedded kernel identifier is written back into the config.
    pub pins_kernel: bool,
    pub unavailable_reason: &'static str,
    pub platform_reason: &'static str,
}

const TEMP_DISK: DiskFile = DiskFile::Temporary { prefix: "disk" };

pub static DESCRIPTORS: [BackendDescriptor; 5] = [
    BackendDescriptor {
        kind: BackendKind::Vmware,
        required_os: None,
        disk_format: DiskFormat::VmdkSparse,
        disk_file: DiskFile::Named("disk.vmdk"),
        needs_bridge: false,
        supports_gui: true,
        pins_kernel: false,
        unavailable_reason: "vmware is not installed on your system",
        platform_reason: "",
    },
    BackendDescriptor {
        kind: BackendKind::Firecracker,
        required_os: Some("linux"),
        disk_format: DiskFormat::Raw,
        disk_file: TEMP_DISK,
        needs_bridge: true,
        supports_gui: false,
        pins_kernel: true,
        unavailable_reason: "firecracker is not installed on your system",
        platform_reason: "firecracker is only available on linux",
    },
    BackendDescriptor {
        kind: BackendKind::HyperV,
        required_os: Some("windows"),
        disk_format: DiskFormat::VhdDynamic,
        disk_file: DiskFile::Named("disk.vhd"),
        needs_bridge: false,
        supports_gui: true,
        pins_kernel: false,
        unavailable_reason: "hyper-v is not enabled on your system",
        platform_reason: "hyper-v is only available on windows systems",
    },
    BackendDescriptor {
        kind: BackendKind::VirtualBox,
        required_os: None,
        disk_format: DiskFormat::VmdkSparse,
        disk_file: TEMP_DISK,
        needs_bridge: false,
        supports_gui: true,
        pins_kernel: false,
        unavailable_reason: "virtualbox not found installed on system",
        platform_reason: "",
    },
    BackendDescriptor {
        kind: BackendKind::Qemu,
        required_os: None,
        disk_format: DiskFormat::Raw,
        disk_file: TEMP_DISK,
        needs_bridge: false,
        supports_gui: true,
        pins_kernel: false,
        unavailable_reason: "qemu not installed on system",
        platform_reason: "",
    },
];

pub fn descriptor(kind: BackendKind) -> &'static BackendDescriptor {
    match kind {
        BackendKind::Vmware => &DESCRIPTORS[0],
        BackendKind::Firecracker => &DESCRIPTORS[1],
        BackendKind::HyperV => &DESCRIPTORS[2],
        BackendKind::VirtualBox => &DESCRIPTORS[3],
        BackendKind::Qemu => &DESCRIPTORS[4],
    }
}

impl BackendDescriptor {
    /// True when the backend can run on `os` at all.
    pub fn supports_os(&self, os: &str) -> bool {
        self.required_os.is_none_or(|required| required == os)
    }
}

/// A single VM instance produced by a driver.
pub trait Virtualizer: Send {
    fn state(&self) -> VirtState;

    /// Hand the marshaled backend configuration to the instance. Must be
    /// called exactly once, before [`start`](Self::start).
    fn initialize(&mut self, config: &[u8]) -> Result<(), RuntimeError>;

    fn start(&mut self, disk: &Path, config: &BuildConfig, name: &str)
        -> Result<(), RuntimeError>;
}

/// Hypervisor integration: availability probe and instance factory.
pub trait VirtualizerDriver: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn is_available(&self) -> bool;

    fn disk_format(&self) -> DiskFormat {
        descriptor(self.kind()).disk_format
    }

    fn alloc(&self) -> Box<dyn Virtualizer>;

    /// Host bridge device behind the default bridge methods.
    fn host_bridge(&self) -> LinuxBridge {
        LinuxBridge::default()
    }

    /// Whether the host bridge device exists. Only consulted for backends
    /// whose descriptor sets `needs_bridge`.
    fn bridge_exists(&self) -> bool {
        self.host_bridge().exists()
    }

    /// Create the host bridge device at `address`.
    fn provision_bridge(&self, address: Ipv4Addr) -> Result<(), RuntimeError> {
        self.host_bridge().provision(address)
    }
}

/// Drivers available to the orchestrator, keyed by backend.
#[derive(Default)]
pub struct BackendRegistry {
    drivers: BTreeMap<BackendKind, Box<dyn VirtualizerDriver>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver, replacing any previous driver for the same backend.
    pub fn register(&mut self, driver: Box<dyn VirtualizerDriver>) {
        self.drivers.insert(driver.kind(), driver);
    }

    #[must_use]
    pub fn with(mut self, driver: Box<dyn VirtualizerDriver>) -> Self {
        self.register(driver);
        self
    }

    pub fn get(&self, kind: BackendKind) -> Result<&dyn VirtualizerDriver, RuntimeError> {
        self.drivers
            .get(&kind)
            .map(Box::as_ref)
            .ok_or_else(|| RuntimeError::NotRegistered(kind.to_string()))
    }

    pub fn kinds(&self) -> Vec<BackendKind> {
        self.drivers.keys().copied().collect()
    }
}
