use super::{colorize_status, json_pretty, skip_prereqs, EXIT_SUCCESS};
use kiln_runtime::{check_backend_prereqs, current_os, BackendDescriptor, DiskFile, DESCRIPTORS};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct BackendRow {
    pub id: &'static str,
    pub disk_format: &'static str,
    pub disk_file: String,
    pub required_os: Option<&'static str>,
    pub needs_bridge: bool,
    pub supports_gui: bool,
    pub status: &'static str,
    pub missing: Vec<&'static str>,
}

/// Status of one backend on this host. Tool probes are skipped when
/// `probe` is false.
pub fn backend_row(desc: &BackendDescriptor, os: &str, probe: bool) -> BackendRow {
    let mut missing = Vec::new();
    let status = if !desc.supports_os(os) {
        "unsupported"
    } else if !probe {
        "unchecked"
    } else {
        missing = check_backend_prereqs(desc.kind)
            .iter()
            .map(|m| m.name)
            .collect();
        if missing.is_empty() {
            "ready"
        } else {
            "missing-tools"
        }
    };

    BackendRow {
        id: desc.kind.id(),
        disk_format: desc.disk_format.id(),
        disk_file: match desc.disk_file {
            DiskFile::Named(name) => name.to_owned(),
            DiskFile::Temporary { prefix } => format!("{prefix}*"),
        },
        required_os: desc.required_os,
        needs_bridge: desc.needs_bridge,
        supports_gui: desc.supports_gui,
        status,
        missing,
    }
}

pub fn run(json: bool) -> Result<u8, String> {
    let probe = !skip_prereqs();
    let os = current_os();
    let rows: Vec<BackendRow> = DESCRIPTORS
        .iter()
        .map(|d| backend_row(d, os, probe))
        .collect();

    if json {
        println!("{}", json_pretty(&rows)?);
        return Ok(EXIT_SUCCESS);
    }

    println!(
        "{:<12} {:<22} {:<10} {:<8} STATUS",
        "BACKEND", "DISK FORMAT", "DISK FILE", "OS"
    );
    for row in &rows {
        println!(
            "{:<12} {:<22} {:<10} {:<8} {}",
            row.id,
            row.disk_format,
            row.disk_file,
            row.required_os.unwrap_or("any"),
            colorize_status(row.status)
        );
        if !row.missing.is_empty() {
            println!("{:<12} missing: {}", "", row.missing.join(", "));
        }
    }
    Ok(EXIT_SUCCESS)
}
