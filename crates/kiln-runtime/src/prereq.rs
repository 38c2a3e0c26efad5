use crate::backend::BackendKind;
use std::fmt;
use std::process::Command;

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: &'static str,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

pub fn command_exists(name: &str) -> bool {
    let locator = if cfg!(windows) { "where" } else { "which" };
    Command::new(locator)
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn require(missing: &mut Vec<MissingPrereq>, prereq: MissingPrereq) {
    if !command_exists(prereq.name) {
        missing.push(prereq);
    }
}

/// Check the host tools a backend needs. Empty list means all are present.
pub fn check_backend_prereqs(kind: BackendKind) -> Vec<MissingPrereq> {
    let mut missing = Vec::new();

    match kind {
        BackendKind::Vmware => require(
            &mut missing,
            MissingPrereq {
                name: "vmrun",
                purpose: "controlling VMware Workstation/Fusion VMs",
                install_hint: "install VMware Workstation Pro or VMware Fusion",
            },
        ),
        BackendKind::Firecracker => {
            require(
                &mut missing,
                MissingPrereq {
                    name: "firecracker",
                    purpose: "running microVMs",
                    install_hint: "download a release from github.com/firecracker-microvm/firecracker",
                },
            );
            require(
                &mut missing,
                MissingPrereq {
                    name: "ip",
                    purpose: "creating the host bridge device",
                    install_hint: "part of iproute2 (usually pre-installed)",
                },
            );
        }
        BackendKind::HyperV => require(
            &mut missing,
            MissingPrereq {
                name: "powershell",
                purpose: "driving Hyper-V cmdlets",
                install_hint: "enable the Hyper-V feature and its PowerShell module",
            },
        ),
        BackendKind::VirtualBox => require(
            &mut missing,
            MissingPrereq {
                name: "VBoxManage",
                purpose: "controlling VirtualBox VMs",
                install_hint: "install VirtualBox from virtualbox.org or your package manager",
            },
        ),
        BackendKind::Qemu => {
            require(
                &mut missing,
                MissingPrereq {
                    name: "qemu-system-x86_64",
                    purpose: "running x86_64 guests",
                    install_hint: "apt install qemu-system-x86 | dnf install qemu-kvm | brew install qemu",
                },
            );
            require(
                &mut missing,
                MissingPrereq {
                    name: "qemu-img",
                    purpose: "inspecting disk images",
                    install_hint: "apt install qemu-utils | dnf install qemu-img | brew install qemu",
                },
            );
        }
    }

    missing
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nKiln requires these tools to launch VMs on the selected backend.");
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_prereq_display() {
        let m = MissingPrereq {
            name: "qemu-img",
            purpose: "inspecting disk images",
            install_hint: "apt install qemu-utils",
        };
        let s = format!("{m}");
        assert!(s.contains("qemu-img"));
        assert!(s.contains("inspecting disk images"));
        assert!(s.contains("apt install qemu-utils"));
    }

    #[test]
    fn format_missing_produces_readable_output() {
        let items = vec![
            MissingPrereq {
                name: "firecracker",
                purpose: "microVMs",
                install_hint: "download",
            },
            MissingPrereq {
                name: "ip",
                purpose: "bridge",
                install_hint: "iproute2",
            },
        ];
        let output = format_missing(&items);
        assert!(output.contains("missing prerequisites:"));
        assert!(output.contains("firecracker"));
        assert!(output.contains("iproute2"));
    }

    #[test]
    fn nonexistent_command_is_missing() {
        assert!(!command_exists("kiln-definitely-not-a-real-binary"));
    }

    #[test]
    fn probe_names_are_tools() {
        // Every missing entry must name the probed tool, never an empty string.
        for kind in BackendKind::ALL {
            for m in check_backend_prereqs(kind) {
                assert!(!m.name.is_empty());
            }
        }
    }
}
