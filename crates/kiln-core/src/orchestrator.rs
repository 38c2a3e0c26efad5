use crate::network::{AddressAllocator, BRIDGE_IP};
use crate::pipeline::{build_disk, BuildOutcome, ImageEngine, PackageReader};
use crate::scope::ResourceScope;
use crate::CoreError;
use kiln_runtime::{
    current_os, descriptor, BackendConfig, BackendDescriptor, BackendKind, BackendRegistry,
    VirtualizerDriver,
};
use kiln_schema::{BuildConfig, KernelOptions, NetworkLease};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Pass-through switches from the user.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Open a display window. Backends without a display ignore it.
    pub gui: bool,
    pub shell: bool,
    pub record: bool,
}

impl RunOptions {
    fn kernel_options(self) -> KernelOptions {
        KernelOptions {
            shell: self.shell,
            record: self.record,
        }
    }
}

/// One build-and-run invocation.
pub struct BuildRequest {
    pub reader: Box<dyn PackageReader>,
    pub config: BuildConfig,
    pub backend: BackendKind,
    /// Display name of the VM.
    pub name: String,
    /// Where to save the built disk, if anywhere.
    pub disk_output: Option<PathBuf>,
    pub options: RunOptions,
}

/// Outcome of a successful run.
#[derive(Debug)]
pub struct RunReport {
    pub backend: BackendKind,
    /// Scratch location the VM was started from. Removed by the time the
    /// report is returned.
    pub disk_path: PathBuf,
    pub saved_to: Option<PathBuf>,
    pub kernel: Option<String>,
    pub leases: Vec<NetworkLease>,
    /// Saving the disk failed after the VM was started.
    pub relocation_error: Option<CoreError>,
}

/// Builds a disk for a request and launches it on the selected backend.
///
/// Holds no per-run state; concurrent runs share only the allocator.
pub struct Orchestrator {
    registry: BackendRegistry,
    engine: Box<dyn ImageEngine>,
    allocator: Arc<AddressAllocator>,
    scratch_root: PathBuf,
    host_os: String,
}

impl Orchestrator {
    pub fn new(
        registry: BackendRegistry,
        engine: Box<dyn ImageEngine>,
        allocator: Arc<AddressAllocator>,
    ) -> Self {
        Self {
            registry,
            engine,
            allocator,
            scratch_root: std::env::temp_dir(),
            host_os: current_os().to_owned(),
        }
    }

    /// Directory scratch scopes are created in. Defaults to the system
    /// temp directory.
    #[must_use]
    pub fn scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = root.into();
        self
    }

    #[must_use]
    pub fn host_os(mut self, os: &str) -> Self {
        os.clone_into(&mut self.host_os);
        self
    }

    /// Fail fast if `kind` cannot run here. Allocates nothing.
    pub fn check_backend(&self, kind: BackendKind) -> Result<&dyn VirtualizerDriver, CoreError> {
        let desc = descriptor(kind);
        let unavailable = |reason: String| CoreError::BackendUnavailable {
            backend: kind.to_string(),
            reason,
        };

        if !desc.supports_os(&self.host_os) {
            return Err(unavailable(desc.platform_reason.to_owned()));
        }
        let driver = self
            .registry
            .get(kind)
            .map_err(|e| unavailable(e.to_string()))?;
        if !driver.is_available() {
            return Err(unavailable(desc.unavailable_reason.to_owned()));
        }
        Ok(driver)
    }

    pub fn run(&self, request: BuildRequest) -> Result<RunReport, CoreError> {
        let BuildRequest {
            mut reader,
            mut config,
            backend,
            name,
            disk_output,
            options,
        } = request;
        let desc = descriptor(backend);

        let driver = self.check_backend(backend)?;
        if desc.needs_bridge && !driver.bridge_exists() {
            info!("bridge device missing; provisioning at {BRIDGE_IP}");
            driver.provision_bridge(BRIDGE_IP)?;
        }
        if options.gui && !desc.supports_gui {
            warn!("{backend} has no graphical display; running headless");
        }

        config.apply_defaults();
        config.validate()?;

        let mut scope = ResourceScope::open(
            &self.scratch_root,
            &format!("kiln-{backend}"),
            &desc.disk_file,
        )?;
        debug!("{backend} run '{name}' using {}", scope.disk_path().display());

        let result = self.build_and_start(
            driver,
            desc,
            &mut scope,
            reader.as_mut(),
            &mut config,
            &name,
            options,
        );
        let relocation = scope.finalize(disk_output.as_deref());

        match result {
            Ok(outcome) => {
                let (saved_to, relocation_error) = match relocation {
                    Ok(saved) => (saved, None),
                    Err(e) => {
                        error!("{e}");
                        (None, Some(e))
                    }
                };
                Ok(RunReport {
                    backend,
                    disk_path: scope.disk_path().to_path_buf(),
                    saved_to,
                    kernel: outcome.kernel,
                    leases: outcome.leases,
                    relocation_error,
                })
            }
            Err(e) => {
                if let Err(relocation_err) = relocation {
                    error!("{relocation_err}");
                }
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build_and_start(
        &self,
        driver: &dyn VirtualizerDriver,
        desc: &BackendDescriptor,
        scope: &mut ResourceScope,
        reader: &mut dyn PackageReader,
        config: &mut BuildConfig,
        name: &str,
        options: RunOptions,
    ) -> Result<BuildOutcome, CoreError> {
        let format = driver.disk_format();
        let outcome = build_disk(
            self.engine.as_ref(),
            &*reader,
            &self.allocator,
            format,
            options.kernel_options(),
            config,
            scope.disk_file()?,
        )?;
        scope.mark_built();

        if desc.pins_kernel {
            match &outcome.kernel {
                Some(kernel) => {
                    debug!("pinning kernel {kernel}");
                    config.vm.kernel = Some(kernel.clone());
                }
                None => warn!(
                    "image builder reported no kernel identifier; {} keeps kernel {:?}",
                    desc.kind,
                    config.vm.kernel.as_deref().unwrap_or_default()
                ),
            }
        }

        scope.close_disk()?;
        reader.close().map_err(CoreError::ReaderClose)?;

        let backend_config = BackendConfig::for_backend(desc.kind, options.gui)
            .marshal()
            .map_err(CoreError::Configuration)?;
        let mut vm = driver.alloc();
        vm.initialize(&backend_config)
            .map_err(CoreError::Configuration)?;

        info!("starting {} VM '{name}'", desc.kind);
        vm.start(scope.disk_path(), config, name)
            .map_err(CoreError::Start)?;
        Ok(outcome)
    }
}
