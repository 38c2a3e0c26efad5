use crate::RuntimeError;
use std::fmt;
use std::io;
use std::net::Ipv4Addr;
use std::process::Command;
use std::sync::Arc;
use tracing::{debug, info};

/// Host bridge device VMs attach to on backends that need one.
pub const BRIDGE_DEVICE: &str = "kiln0";

/// Host OS family, as reported by `std::env::consts::OS`.
pub fn current_os() -> &'static str {
    std::env::consts::OS
}

/// Exit status and diagnostics of one host command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stderr: String,
}

/// Runs host commands on behalf of [`LinuxBridge`].
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput>;
}

/// Spawns the real process.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput> {
        let output = Command::new(program).args(args).output()?;
        Ok(CommandOutput {
            success: output.status.success(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// A Linux bridge device managed through iproute2.
#[derive(Clone)]
pub struct LinuxBridge {
    pub name: String,
    runner: Arc<dyn CommandRunner>,
}

impl fmt::Debug for LinuxBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinuxBridge")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Default for LinuxBridge {
    fn default() -> Self {
        Self::new(BRIDGE_DEVICE)
    }
}

impl LinuxBridge {
    pub fn new(name: &str) -> Self {
        Self::with_runner(name, Arc::new(SystemRunner))
    }

    pub fn with_runner(name: &str, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            name: name.to_owned(),
            runner,
        }
    }

    pub fn exists(&self) -> bool {
        self.runner
            .run("ip", &["link", "show", self.name.as_str()])
            .is_ok_and(|o| o.success)
    }

    /// Create the bridge, assign `address` on a /24 and bring it up.
    pub fn provision(&self, address: Ipv4Addr) -> Result<(), RuntimeError> {
        let cidr = format!("{address}/24");
        info!("creating bridge device {} at {cidr}", self.name);
        self.ip(&["link", "add", "name", &self.name, "type", "bridge"])?;
        self.ip(&["addr", "add", &cidr, "dev", &self.name])?;
        self.ip(&["link", "set", &self.name, "up"])?;
        Ok(())
    }

    fn ip(&self, args: &[&str]) -> Result<(), RuntimeError> {
        debug!("ip {}", args.join(" "));
        let output = self.runner.run("ip", args).map_err(|e| {
            RuntimeError::Bridge(format!("failed to run ip for {}: {e}", self.name))
        })?;
        if output.success {
            return Ok(());
        }
        Err(RuntimeError::Bridge(format!(
            "ip {} failed: {}",
            args.join(" "),
            output.stderr.trim()
        )))
    }
}
