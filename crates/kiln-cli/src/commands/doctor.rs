use super::{skip_prereqs, EXIT_FAILURE, EXIT_SUCCESS};
use kiln_core::AddressAllocator;
use kiln_runtime::{check_backend_prereqs, current_os, format_missing, LinuxBridge, DESCRIPTORS};
use kiln_store::StoreLayout;
use std::path::Path;

pub fn run(
    store_path: &Path,
    allocator: &AddressAllocator,
    json_output: bool,
) -> Result<u8, String> {
    let mut checks: Vec<Check> = Vec::new();
    let mut all_pass = true;

    let os = current_os();
    checks.push(Check::info("host_os", &format!("Host OS: {os}")));
    check_backends(os, &mut checks, &mut all_pass);
    if os == "linux" {
        check_bridge(&mut checks);
    }

    let layout = StoreLayout::new(store_path);
    if layout.is_initialized() {
        checks.push(Check::pass("store_exists", "Store directory exists"));
        check_store(&layout, allocator, &mut checks, &mut all_pass);
    } else {
        checks.push(Check::info(
            "store_exists",
            "Store not initialized (will be created on first address lease)",
        ));
    }

    print_results(&checks, all_pass, json_output)
}

fn check_backends(os: &str, checks: &mut Vec<Check>, all_pass: &mut bool) {
    if skip_prereqs() {
        checks.push(Check::info(
            "backend_prereqs",
            "Backend prerequisite checks skipped (KILN_SKIP_PREREQS=1)",
        ));
        return;
    }

    let mut ready = 0;
    for desc in &DESCRIPTORS {
        let id = desc.kind.id();
        let name = format!("backend_{id}");
        if !desc.supports_os(os) {
            checks.push(Check::info(&name, &format!("{id}: {}", desc.platform_reason)));
            continue;
        }
        let missing = check_backend_prereqs(desc.kind);
        if missing.is_empty() {
            ready += 1;
            checks.push(Check::pass(&name, &format!("{id}: ready")));
        } else {
            checks.push(Check::warn(&name, &format!("{id}: {}", format_missing(&missing))));
        }
    }

    if ready == 0 {
        *all_pass = false;
        checks.push(Check::fail(
            "backend_prereqs",
            "No backend can run on this host",
        ));
    }
}

fn check_bridge(checks: &mut Vec<Check>) {
    let bridge = LinuxBridge::default();
    if bridge.exists() {
        checks.push(Check::pass(
            "bridge",
            &format!("Bridge device {} present", bridge.name),
        ));
    } else {
        checks.push(Check::info(
            "bridge",
            &format!(
                "Bridge device {} absent (created on first firecracker run)",
                bridge.name
            ),
        ));
    }
}

fn check_store(
    layout: &StoreLayout,
    allocator: &AddressAllocator,
    checks: &mut Vec<Check>,
    all_pass: &mut bool,
) {
    if let Err(e) = layout.verify_version() {
        *all_pass = false;
        checks.push(Check::fail(
            "store_version",
            &format!("Store version check failed: {e}"),
        ));
        return;
    }
    checks.push(Check::pass("store_version", "Store format version valid"));

    match allocator.remaining() {
        Ok(0) => checks.push(Check::warn(
            "address_pool",
            "Address pool exhausted (run `kiln network reset`)",
        )),
        Ok(n) => checks.push(Check::pass(
            "address_pool",
            &format!("{n} network addresses available"),
        )),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "address_pool",
                &format!("Cannot read address pool: {e}"),
            ));
        }
    }
}

fn print_results(checks: &[Check], all_pass: bool, json_output: bool) -> Result<u8, String> {
    if json_output {
        let json = serde_json::json!({
            "healthy": all_pass,
            "checks": checks.iter().map(|c| serde_json::json!({
                "name": c.name,
                "status": c.status,
                "message": c.message,
            })).collect::<Vec<_>>(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&json).map_err(|e| e.to_string())?
        );
    } else {
        println!("Kiln Doctor\n");
        for check in checks {
            let icon = match check.status {
                "pass" => "✓",
                "fail" => "✗",
                "warn" => "⚠",
                _ => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        println!();
        if all_pass {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if all_pass { EXIT_SUCCESS } else { EXIT_FAILURE })
}

struct Check {
    name: String,
    status: &'static str,
    message: String,
}

impl Check {
    fn new(name: &str, status: &'static str, message: &str) -> Self {
        Self {
            name: name.to_owned(),
            status,
            message: message.to_owned(),
        }
    }

    fn pass(name: &str, message: &str) -> Self {
        Self::new(name, "pass", message)
    }

    fn fail(name: &str, message: &str) -> Self {
        Self::new(name, "fail", message)
    }

    fn warn(name: &str, message: &str) -> Self {
        Self::new(name, "warn", message)
    }

    fn info(name: &str, message: &str) -> Self {
        Self::new(name, "info", message)
    }
}
