use crate::backend::{BackendKind, Virtualizer, VirtualizerDriver};
use crate::host::{CommandOutput, CommandRunner};
use crate::lifecycle::{validate_transition, VirtState};
use crate::RuntimeError;
use kiln_schema::BuildConfig;
use std::collections::BTreeSet;
use std::io;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// One recorded `start` call, with the disk observed at call time.
#[derive(Debug, Clone)]
pub struct StartCall {
    pub disk: PathBuf,
    pub disk_existed: bool,
    pub disk_len: u64,
    pub config: BuildConfig,
    pub name: String,
}

/// Everything a [`MockDriver`] and its instances were asked to do.
#[derive(Debug, Default)]
pub struct MockLog {
    pub availability_probes: usize,
    pub allocs: usize,
    pub bridge_present: bool,
    pub bridge_provisioned: Vec<Ipv4Addr>,
    pub initialized: Vec<Vec<u8>>,
    pub started: Vec<StartCall>,
}

fn lock(log: &Mutex<MockLog>) -> Result<MutexGuard<'_, MockLog>, RuntimeError> {
    log.lock()
        .map_err(|e| RuntimeError::StartFailed(format!("mutex poisoned: {e}")))
}

/// In-memory driver for tests: never touches a hypervisor.
pub struct MockDriver {
    kind: BackendKind,
    available: bool,
    fail_initialize: bool,
    fail_start: bool,
    log: Arc<Mutex<MockLog>>,
}

impl MockDriver {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            available: true,
            fail_initialize: false,
            fail_start: false,
            log: Arc::new(Mutex::new(MockLog {
                bridge_present: true,
                ..MockLog::default()
            })),
        }
    }

    #[must_use]
    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    #[must_use]
    pub fn without_bridge(self) -> Self {
        if let Ok(mut log) = self.log.lock() {
            log.bridge_present = false;
        }
        self
    }

    #[must_use]
    pub fn failing_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    #[must_use]
    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Shared handle on the call log; stays valid after the driver is boxed.
    pub fn log(&self) -> Arc<Mutex<MockLog>> {
        Arc::clone(&self.log)
    }
}

impl VirtualizerDriver for MockDriver {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn is_available(&self) -> bool {
        if let Ok(mut log) = self.log.lock() {
            log.availability_probes += 1;
        }
        self.available
    }

    fn alloc(&self) -> Box<dyn Virtualizer> {
        if let Ok(mut log) = self.log.lock() {
            log.allocs += 1;
        }
        Box::new(MockVirtualizer {
            state: VirtState::Uninitialized,
            fail_initialize: self.fail_initialize,
            fail_start: self.fail_start,
            log: Arc::clone(&self.log),
        })
    }

    fn bridge_exists(&self) -> bool {
        self.log.lock().map(|l| l.bridge_present).unwrap_or(false)
    }

    fn provision_bridge(&self, address: Ipv4Addr) -> Result<(), RuntimeError> {
        let mut log = lock(&self.log)?;
        log.bridge_provisioned.push(address);
        log.bridge_present = true;
        Ok(())
    }
}

pub struct MockVirtualizer {
    state: VirtState,
    fail_initialize: bool,
    fail_start: bool,
    log: Arc<Mutex<MockLog>>,
}

impl Virtualizer for MockVirtualizer {
    fn state(&self) -> VirtState {
        self.state
    }

    fn initialize(&mut self, config: &[u8]) -> Result<(), RuntimeError> {
        validate_transition(self.state, VirtState::Initialized)?;
        lock(&self.log)?.initialized.push(config.to_vec());
        if self.fail_initialize {
            return Err(RuntimeError::Config("mock initialize rejected".to_owned()));
        }
        self.state = VirtState::Initialized;
        Ok(())
    }

    fn start(&mut self, disk: &Path, config: &BuildConfig, name: &str) -> Result<(), RuntimeError> {
        validate_transition(self.state, VirtState::Running)?;
        let meta = std::fs::metadata(disk).ok();
        lock(&self.log)?.started.push(StartCall {
            disk: disk.to_path_buf(),
            disk_existed: meta.is_some(),
            disk_len: meta.map_or(0, |m| std::fs::Metadata::len(&m)),
            config: config.clone(),
            name: name.to_owned(),
        });
        if self.fail_start {
            return Err(RuntimeError::StartFailed("mock start refused".to_owned()));
        }
        self.state = VirtState::Running;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct RunnerState {
    calls: Vec<String>,
    links: BTreeSet<String>,
}

/// Command runner that records iproute2 invocations instead of running
/// them. `ip link show <dev>` succeeds once `ip link add name <dev>` was
/// recorded.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    fail_subcommand: Option<&'static str>,
    state: Mutex<RunnerState>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every `ip <subcommand> ...` call.
    #[must_use]
    pub fn failing(mut self, subcommand: &'static str) -> Self {
        self.fail_subcommand = Some(subcommand);
        self
    }

    /// Command lines seen so far, program first.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().map(|s| s.calls.clone()).unwrap_or_default()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| io::Error::other(format!("runner poisoned: {e}")))?;
        state.calls.push(format!("{program} {}", args.join(" ")));

        if args.first().copied() == self.fail_subcommand {
            return Ok(CommandOutput {
                success: false,
                stderr: "RTNETLINK answers: Operation not permitted\n".to_owned(),
            });
        }
        let success = match args {
            ["link", "show", dev] => state.links.contains(*dev),
            ["link", "add", "name", dev, ..] => {
                state.links.insert((*dev).to_owned());
                true
            }
            _ => true,
        };
        Ok(CommandOutput {
            success,
            stderr: String::new(),
        })
    }
}
