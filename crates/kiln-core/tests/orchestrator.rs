//! End-to-end orchestration runs against mock drivers and a mock image engine.

use kiln_core::mock::{EngineLog, FailAt, MockEngine, MockReader, ReaderLog};
use kiln_core::{
    AddressAllocator, BuildError, BuildRequest, CoreError, Orchestrator, RunOptions, BRIDGE_IP,
};
use kiln_runtime::mock::{MockDriver, MockLog, RecordingRunner};
use kiln_runtime::{
    BackendConfig, BackendKind, BackendRegistry, CommandRunner, LinuxBridge, Virtualizer,
    VirtualizerDriver, BRIDGE_DEVICE,
};
use kiln_schema::{BuildConfig, NetworkInterface};
use kiln_store::StoreLayout;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const PAYLOAD: &[u8] = b"kiln-mock-image";

struct Harness {
    orchestrator: Orchestrator,
    driver: Arc<Mutex<MockLog>>,
    engine: Arc<Mutex<EngineLog>>,
    allocator: Arc<AddressAllocator>,
    store: TempDir,
    scratch: TempDir,
}

impl Harness {
    fn new(driver: MockDriver, engine: MockEngine, host_os: &str) -> Self {
        let store = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let allocator = Arc::new(AddressAllocator::new(StoreLayout::new(store.path())));
        let driver_log = driver.log();
        let engine_log = engine.log();
        let orchestrator = Orchestrator::new(
            BackendRegistry::new().with(Box::new(driver)),
            Box::new(engine),
            Arc::clone(&allocator),
        )
        .scratch_root(scratch.path())
        .host_os(host_os);
        Self {
            orchestrator,
            driver: driver_log,
            engine: engine_log,
            allocator,
            store,
            scratch,
        }
    }

    fn linux(driver: MockDriver) -> Self {
        Self::new(driver, MockEngine::new(), "linux")
    }

    fn scratch_is_empty(&self) -> bool {
        std::fs::read_dir(self.scratch.path()).unwrap().count() == 0
    }

    fn pool_touched(&self) -> bool {
        self.store.path().join("network").exists()
    }
}

fn request(backend: BackendKind, reader: MockReader, config: BuildConfig) -> BuildRequest {
    BuildRequest {
        reader: Box::new(reader),
        config,
        backend,
        name: "demo".to_owned(),
        disk_output: None,
        options: RunOptions::default(),
    }
}

fn with_networks(n: usize) -> BuildConfig {
    BuildConfig {
        networks: vec![NetworkInterface::default(); n],
        ..BuildConfig::default()
    }
}

fn reader_log(reader: &MockReader) -> Arc<Mutex<ReaderLog>> {
    reader.log()
}

#[test]
fn qemu_without_networks_runs_headless() {
    let h = Harness::linux(MockDriver::new(BackendKind::Qemu));
    let reader = MockReader::new(512);
    let rlog = reader_log(&reader);

    let report = h
        .orchestrator
        .run(request(BackendKind::Qemu, reader, BuildConfig::default()))
        .unwrap();

    let log = h.driver.lock().unwrap();
    assert_eq!(log.initialized.len(), 1);
    let config = BackendConfig::unmarshal(&log.initialized[0]).unwrap();
    assert_eq!(config.kind(), BackendKind::Qemu);
    assert_eq!(config.headless(), Some(true));

    assert_eq!(log.started.len(), 1);
    let start = &log.started[0];
    assert_eq!(start.disk, report.disk_path);
    assert!(start.disk_existed);
    assert_eq!(start.disk_len, PAYLOAD.len() as u64);
    assert_eq!(start.name, "demo");

    assert!(report.leases.is_empty());
    assert!(report.saved_to.is_none());
    assert!(!report.disk_path.exists());
    assert!(h.scratch_is_empty());
    assert!(!h.pool_touched());

    let rlog = rlog.lock().unwrap();
    assert_eq!(rlog.closes, 1);
    assert_eq!(rlog.used_after_close, 0);
}

#[test]
fn gui_request_disables_headless() {
    let h = Harness::linux(MockDriver::new(BackendKind::VirtualBox));
    let mut req = request(
        BackendKind::VirtualBox,
        MockReader::new(1),
        BuildConfig::default(),
    );
    req.options.gui = true;
    h.orchestrator.run(req).unwrap();

    let log = h.driver.lock().unwrap();
    let config = BackendConfig::unmarshal(&log.initialized[0]).unwrap();
    assert_eq!(config.headless(), Some(false));
}

#[test]
fn unavailable_backend_allocates_nothing() {
    let h = Harness::linux(MockDriver::new(BackendKind::Qemu).unavailable());
    let err = h
        .orchestrator
        .run(request(BackendKind::Qemu, MockReader::new(1), with_networks(2)))
        .unwrap_err();

    assert!(matches!(err, CoreError::BackendUnavailable { .. }));
    assert_eq!(err.to_string(), "qemu not installed on system");
    assert!(h.scratch_is_empty());
    assert!(!h.pool_touched());
    assert!(!h.allocator.is_open());
    assert_eq!(h.driver.lock().unwrap().allocs, 0);
    assert_eq!(h.engine.lock().unwrap().compilers, 0);
}

#[test]
fn unregistered_backend_is_unavailable() {
    let h = Harness::linux(MockDriver::new(BackendKind::Qemu));
    let err = h
        .orchestrator
        .run(request(
            BackendKind::Vmware,
            MockReader::new(1),
            BuildConfig::default(),
        ))
        .unwrap_err();
    assert!(matches!(err, CoreError::BackendUnavailable { .. }));
    assert!(h.scratch_is_empty());
}

#[test]
fn firecracker_off_linux_fails_before_scratch() {
    let h = Harness::new(
        MockDriver::new(BackendKind::Firecracker),
        MockEngine::new(),
        "macos",
    );
    let err = h
        .orchestrator
        .run(request(
            BackendKind::Firecracker,
            MockReader::new(1),
            with_networks(1),
        ))
        .unwrap_err();

    assert_eq!(err.to_string(), "firecracker is only available on linux");
    assert!(h.scratch_is_empty());
    assert!(!h.pool_touched());
    assert_eq!(h.driver.lock().unwrap().availability_probes, 0);
}

#[test]
fn hyperv_requires_windows() {
    let h = Harness::linux(MockDriver::new(BackendKind::HyperV));
    let err = h
        .orchestrator
        .run(request(
            BackendKind::HyperV,
            MockReader::new(1),
            BuildConfig::default(),
        ))
        .unwrap_err();
    assert_eq!(err.to_string(), "hyper-v is only available on windows systems");
}

#[test]
fn hyperv_uses_named_vhd_disk() {
    let h = Harness::new(
        MockDriver::new(BackendKind::HyperV),
        MockEngine::new(),
        "windows",
    );
    h.orchestrator
        .run(request(
            BackendKind::HyperV,
            MockReader::new(1),
            BuildConfig::default(),
        ))
        .unwrap();

    let log = h.driver.lock().unwrap();
    assert_eq!(log.started[0].disk.file_name().unwrap(), "disk.vhd");
    match BackendConfig::unmarshal(&log.initialized[0]).unwrap() {
        BackendConfig::HyperV(c) => assert_eq!(c.switch_name, "Default Switch"),
        other => panic!("unexpected config {other:?}"),
    }
    let engine = h.engine.lock().unwrap();
    assert_eq!(engine.builds[0].0, kiln_runtime::DiskFormat::VhdDynamic);
}

#[test]
fn firecracker_provisions_bridge_and_pins_kernel() {
    let h = Harness::new(
        MockDriver::new(BackendKind::Firecracker).without_bridge(),
        MockEngine::new().kernel(Some("6.1.102-fc")),
        "linux",
    );
    let report = h
        .orchestrator
        .run(request(
            BackendKind::Firecracker,
            MockReader::new(1),
            with_networks(1),
        ))
        .unwrap();

    let log = h.driver.lock().unwrap();
    assert_eq!(log.bridge_provisioned, vec![BRIDGE_IP]);
    assert_eq!(log.started.len(), 1);
    assert_eq!(log.started[0].config.vm.kernel.as_deref(), Some("6.1.102-fc"));
    assert_eq!(report.kernel.as_deref(), Some("6.1.102-fc"));
    assert_eq!(report.leases.len(), 1);
}

#[test]
fn firecracker_without_kernel_identifier_keeps_requested_kernel() {
    let h = Harness::new(
        MockDriver::new(BackendKind::Firecracker),
        MockEngine::new().kernel(None),
        "linux",
    );
    let report = h
        .orchestrator
        .run(request(
            BackendKind::Firecracker,
            MockReader::new(1),
            BuildConfig::default(),
        ))
        .unwrap();

    assert_eq!(report.kernel, None);
    let log = h.driver.lock().unwrap();
    assert_eq!(log.started[0].config.vm.kernel.as_deref(), Some("latest"));
}

/// Firecracker driver that keeps the default bridge handling and runs
/// iproute2 through a recording runner.
struct HostBridgeDriver {
    inner: MockDriver,
    runner: Arc<RecordingRunner>,
}

impl VirtualizerDriver for HostBridgeDriver {
    fn kind(&self) -> BackendKind {
        BackendKind::Firecracker
    }

    fn is_available(&self) -> bool {
        true
    }

    fn alloc(&self) -> Box<dyn Virtualizer> {
        self.inner.alloc()
    }

    fn host_bridge(&self) -> LinuxBridge {
        let runner: Arc<dyn CommandRunner> = self.runner.clone();
        LinuxBridge::with_runner(BRIDGE_DEVICE, runner)
    }
}

#[test]
fn default_driver_provisions_host_bridge() {
    let store = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let runner = Arc::new(RecordingRunner::new());
    let inner = MockDriver::new(BackendKind::Firecracker);
    let driver_log = inner.log();
    let orchestrator = Orchestrator::new(
        BackendRegistry::new().with(Box::new(HostBridgeDriver {
            inner,
            runner: Arc::clone(&runner),
        })),
        Box::new(MockEngine::new()),
        Arc::new(AddressAllocator::new(StoreLayout::new(store.path()))),
    )
    .scratch_root(scratch.path())
    .host_os("linux");

    orchestrator
        .run(request(
            BackendKind::Firecracker,
            MockReader::new(1),
            BuildConfig::default(),
        ))
        .unwrap();

    assert_eq!(
        runner.calls(),
        vec![
            "ip link show kiln0",
            "ip link add name kiln0 type bridge",
            "ip addr add 10.26.10.1/24 dev kiln0",
            "ip link set kiln0 up",
        ]
    );
    assert_eq!(driver_log.lock().unwrap().started.len(), 1);
}

#[test]
fn default_driver_bridge_failure_aborts_before_scratch() {
    let scratch = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();
    let runner = Arc::new(RecordingRunner::new().failing("link"));
    let orchestrator = Orchestrator::new(
        BackendRegistry::new().with(Box::new(HostBridgeDriver {
            inner: MockDriver::new(BackendKind::Firecracker),
            runner,
        })),
        Box::new(MockEngine::new()),
        Arc::new(AddressAllocator::new(StoreLayout::new(store.path()))),
    )
    .scratch_root(scratch.path())
    .host_os("linux");

    let err = orchestrator
        .run(request(
            BackendKind::Firecracker,
            MockReader::new(1),
            BuildConfig::default(),
        ))
        .unwrap_err();
    assert!(matches!(err, CoreError::Runtime(_)));
    assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
}

#[test]
fn firecracker_with_bridge_skips_provisioning() {
    let h = Harness::linux(MockDriver::new(BackendKind::Firecracker));
    let mut req = request(
        BackendKind::Firecracker,
        MockReader::new(1),
        BuildConfig::default(),
    );
    req.options.gui = true;
    h.orchestrator.run(req).unwrap();

    let log = h.driver.lock().unwrap();
    assert!(log.bridge_provisioned.is_empty());
    let config = BackendConfig::unmarshal(&log.initialized[0]).unwrap();
    assert_eq!(config.kind(), BackendKind::Firecracker);
    assert_eq!(config.headless(), None);
}

#[test]
fn other_backends_keep_requested_kernel() {
    let h = Harness::linux(MockDriver::new(BackendKind::Qemu));
    h.orchestrator
        .run(request(
            BackendKind::Qemu,
            MockReader::new(1),
            BuildConfig::default(),
        ))
        .unwrap();
    let log = h.driver.lock().unwrap();
    assert_eq!(log.started[0].config.vm.kernel.as_deref(), Some("latest"));
}

#[test]
fn defaults_reach_builder_and_virtualizer() {
    let h = Harness::linux(MockDriver::new(BackendKind::Vmware));
    h.orchestrator
        .run(request(
            BackendKind::Vmware,
            MockReader::new(1),
            BuildConfig::default(),
        ))
        .unwrap();

    let engine = h.engine.lock().unwrap();
    assert_eq!(engine.builds[0].1.vm.cpus, Some(1));
    assert_eq!(engine.builds[0].1.vm.ram_mib, Some(256));
    assert_eq!(engine.default_mtu, Some(1500));
    let log = h.driver.lock().unwrap();
    assert_eq!(log.started[0].config.vm.ram_mib, Some(256));
    assert_eq!(log.started[0].disk.file_name().unwrap(), "disk.vmdk");
}

#[test]
fn kernel_options_pass_through() {
    let h = Harness::linux(MockDriver::new(BackendKind::Qemu));
    let mut req = request(BackendKind::Qemu, MockReader::new(1), BuildConfig::default());
    req.options.shell = true;
    req.options.record = true;
    h.orchestrator.run(req).unwrap();

    let options = h.engine.lock().unwrap().kernel_options.unwrap();
    assert!(options.shell);
    assert!(options.record);
}

#[test]
fn networks_are_leased_in_declaration_order() {
    let h = Harness::linux(MockDriver::new(BackendKind::Vmware));
    let report = h
        .orchestrator
        .run(request(
            BackendKind::Vmware,
            MockReader::new(1),
            with_networks(3),
        ))
        .unwrap();

    let ips: Vec<Ipv4Addr> = report.leases.iter().map(|l| l.ip).collect();
    assert_eq!(
        ips,
        vec![
            Ipv4Addr::new(10, 26, 10, 2),
            Ipv4Addr::new(10, 26, 10, 3),
            Ipv4Addr::new(10, 26, 10, 4),
        ]
    );
    for lease in &report.leases {
        assert_eq!(lease.gateway, BRIDGE_IP);
        assert_eq!(lease.mask, Ipv4Addr::new(255, 255, 255, 0));
    }

    let log = h.driver.lock().unwrap();
    let started = &log.started[0].config.networks;
    assert_eq!(started[0].ip.as_deref(), Some("10.26.10.2"));
    assert_eq!(started[2].ip.as_deref(), Some("10.26.10.4"));
    assert_eq!(h.allocator.remaining().unwrap(), 250);
}

#[test]
fn build_failure_after_leasing_cleans_up() {
    let h = Harness::new(
        MockDriver::new(BackendKind::Qemu),
        MockEngine::new().failing_at(FailAt::Build),
        "linux",
    );
    let reader = MockReader::new(1);
    let rlog = reader_log(&reader);

    let err = h
        .orchestrator
        .run(request(BackendKind::Qemu, reader, with_networks(2)))
        .unwrap_err();

    assert!(matches!(err, CoreError::Build(BuildError::Stage { .. })));
    assert!(h.scratch_is_empty());
    // leases are not returned
    assert_eq!(h.allocator.remaining().unwrap(), 251);
    assert_eq!(h.engine.lock().unwrap().closed_builders, 1);
    assert_eq!(rlog.lock().unwrap().closes, 0);
    assert_eq!(h.driver.lock().unwrap().allocs, 0);
}

#[test]
fn failed_build_is_never_saved() {
    let h = Harness::new(
        MockDriver::new(BackendKind::Qemu),
        MockEngine::new().failing_at(FailAt::Build),
        "linux",
    );
    let out = tempfile::tempdir().unwrap();
    let dest = out.path().join("disk.raw");
    let mut req = request(BackendKind::Qemu, MockReader::new(1), BuildConfig::default());
    req.disk_output = Some(dest.clone());

    assert!(h.orchestrator.run(req).is_err());
    assert!(!dest.exists());
}

#[test]
fn undersized_disk_is_a_build_failure() {
    let h = Harness::new(
        MockDriver::new(BackendKind::Qemu),
        MockEngine::new().minimum_size(8 * 1024 * 1024),
        "linux",
    );
    let mut config = BuildConfig::default();
    config.vm.disk_size_mib = Some(1);

    let err = h
        .orchestrator
        .run(request(BackendKind::Qemu, MockReader::new(1), config))
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Build(BuildError::SizeTooSmall { .. })
    ));
    assert_eq!(h.engine.lock().unwrap().closed_builders, 1);
    assert!(h.scratch_is_empty());
}

#[test]
fn builder_close_failure_aborts() {
    let h = Harness::new(
        MockDriver::new(BackendKind::Qemu),
        MockEngine::new().failing_at(FailAt::Close),
        "linux",
    );
    let err = h
        .orchestrator
        .run(request(
            BackendKind::Qemu,
            MockReader::new(1),
            BuildConfig::default(),
        ))
        .unwrap_err();
    assert!(matches!(err, CoreError::Build(_)));
    assert_eq!(h.engine.lock().unwrap().closed_builders, 1);
    assert_eq!(h.driver.lock().unwrap().allocs, 0);
}

#[test]
fn reader_close_failure_stops_before_virtualizer() {
    let h = Harness::linux(MockDriver::new(BackendKind::Qemu));
    let err = h
        .orchestrator
        .run(request(
            BackendKind::Qemu,
            MockReader::new(1).failing_close(),
            BuildConfig::default(),
        ))
        .unwrap_err();
    assert!(matches!(err, CoreError::ReaderClose(_)));
    assert_eq!(h.driver.lock().unwrap().allocs, 0);
    assert!(h.scratch_is_empty());
}

#[test]
fn rejected_initialize_is_configuration_failure() {
    let h = Harness::linux(MockDriver::new(BackendKind::Qemu).failing_initialize());
    let reader = MockReader::new(1);
    let rlog = reader_log(&reader);
    let err = h
        .orchestrator
        .run(request(BackendKind::Qemu, reader, BuildConfig::default()))
        .unwrap_err();

    assert!(matches!(err, CoreError::Configuration(_)));
    assert_eq!(rlog.lock().unwrap().closes, 1);
    assert!(h.driver.lock().unwrap().started.is_empty());
    assert!(h.scratch_is_empty());
}

#[test]
fn successful_run_saves_disk() {
    let h = Harness::linux(MockDriver::new(BackendKind::Qemu));
    let out = tempfile::tempdir().unwrap();
    let dest = out.path().join("demo.raw");
    let mut req = request(BackendKind::Qemu, MockReader::new(1), BuildConfig::default());
    req.disk_output = Some(dest.clone());

    let report = h.orchestrator.run(req).unwrap();
    assert_eq!(report.saved_to.as_deref(), Some(dest.as_path()));
    assert!(report.relocation_error.is_none());
    assert_eq!(std::fs::read(&dest).unwrap(), PAYLOAD);
    assert!(h.scratch_is_empty());
}

#[test]
fn relocation_failure_does_not_fail_run() {
    let h = Harness::linux(MockDriver::new(BackendKind::Qemu));
    let dest: PathBuf = h.scratch.path().join("no").join("such").join("disk.raw");
    let mut req = request(BackendKind::Qemu, MockReader::new(1), BuildConfig::default());
    req.disk_output = Some(dest.clone());

    let report = h.orchestrator.run(req).unwrap();
    assert!(report.saved_to.is_none());
    assert!(matches!(
        report.relocation_error,
        Some(CoreError::Relocation { ref dest, .. }) if dest.ends_with("disk.raw")
    ));
    assert_eq!(h.driver.lock().unwrap().started.len(), 1);
    assert!(!dest.exists());
    assert!(h.scratch_is_empty());
}

#[test]
fn start_failure_still_saves_built_disk() {
    let h = Harness::linux(MockDriver::new(BackendKind::Qemu).failing_start());
    let out = tempfile::tempdir().unwrap();
    let dest = out.path().join("demo.raw");
    let mut req = request(BackendKind::Qemu, MockReader::new(1), BuildConfig::default());
    req.disk_output = Some(dest.clone());

    let err = h.orchestrator.run(req).unwrap_err();
    assert!(matches!(err, CoreError::Start(_)));
    assert_eq!(std::fs::read(&dest).unwrap(), PAYLOAD);
    assert!(h.scratch_is_empty());
}

#[test]
fn invalid_config_rejected_before_scratch() {
    let h = Harness::linux(MockDriver::new(BackendKind::Qemu));
    let mut config = BuildConfig::default();
    config.vm.cpus = Some(0);
    let err = h
        .orchestrator
        .run(request(BackendKind::Qemu, MockReader::new(1), config))
        .unwrap_err();
    assert!(matches!(err, CoreError::Config(_)));
    assert!(h.scratch_is_empty());
}

#[test]
fn concurrent_runs_get_distinct_addresses() {
    let h = Harness::linux(MockDriver::new(BackendKind::Qemu));
    let orchestrator = &h.orchestrator;

    let mut ips: Vec<Ipv4Addr> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                s.spawn(move || {
                    orchestrator
                        .run(request(
                            BackendKind::Qemu,
                            MockReader::new(1),
                            with_networks(2),
                        ))
                        .unwrap()
                        .leases
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .map(|l| l.ip)
            .collect()
    });

    ips.sort();
    ips.dedup();
    assert_eq!(ips.len(), 8);
    assert_eq!(h.driver.lock().unwrap().started.len(), 4);
    assert!(h.scratch_is_empty());
}

#[test]
fn exhausted_pool_fails_run() {
    let h = Harness::linux(MockDriver::new(BackendKind::Qemu));
    for _ in 0..253 {
        h.allocator.allocate().unwrap();
    }
    let err = h
        .orchestrator
        .run(request(BackendKind::Qemu, MockReader::new(1), with_networks(1)))
        .unwrap_err();
    assert!(matches!(err, CoreError::NetworkExhausted));
    assert!(h.scratch_is_empty());
}
