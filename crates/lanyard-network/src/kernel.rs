//! Host kernel preconditions.

use std::path::Path;
use std::process::Command;

use lanyard_common::paths::{IPV4_FORWARD, PROC_MODULES};
use lanyard_common::{LanyardError, LanyardResult};

use crate::modes::DriverKind;

/// Whether `module` appears in a `/proc/modules` style listing.
///
/// # Errors
///
/// Returns an error if the listing cannot be read.
pub fn module_loaded(modules: &Path, module: &str) -> LanyardResult<bool> {
    let listing = std::fs::read_to_string(modules)?;
    Ok(listing
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .any(|name| name == module))
}

/// Make sure the kernel module backing `kind` is loaded.
///
/// A `modprobe` is attempted first; its outcome is ignored since the module
/// may be built in or already loaded.
///
/// # Errors
///
/// Returns [`LanyardError::KernelSupport`] if the module is not listed
/// afterwards.
#[cfg(target_os = "linux")]
pub fn kernel_support(kind: DriverKind) -> LanyardResult<()> {
    let module = kind.as_str();
    match Command::new("modprobe").arg(module).output() {
        Ok(output) if !output.status.success() => {
            tracing::debug!(
                module,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "modprobe failed"
            );
        }
        Err(e) => tracing::debug!(module, error = %e, "Failed to run modprobe"),
        Ok(_) => {}
    }

    if module_loaded(Path::new(PROC_MODULES), module)? {
        tracing::debug!(module, "Kernel module present");
        Ok(())
    } else {
        Err(LanyardError::KernelSupport {
            module: module.to_string(),
        })
    }
}

#[cfg(not(target_os = "linux"))]
pub fn kernel_support(kind: DriverKind) -> LanyardResult<()> {
    Err(LanyardError::KernelSupport {
        module: kind.as_str().to_string(),
    })
}

/// Enable IPv4 forwarding at `path` unless it is already on.
///
/// # Errors
///
/// Returns an error if the sysctl cannot be read or written.
pub fn ensure_ip_forwarding_at(path: &Path) -> LanyardResult<()> {
    let current = std::fs::read_to_string(path)?;
    if current.trim_start().starts_with('1') {
        return Ok(());
    }
    std::fs::write(path, "1\n")?;
    tracing::info!(path = %path.display(), "IP forwarding enabled");
    Ok(())
}

/// Enable IPv4 forwarding on the host.
///
/// # Errors
///
/// Returns an error if the sysctl cannot be read or written.
pub fn ensure_ip_forwarding() -> LanyardResult<()> {
    ensure_ip_forwarding_at(Path::new(IPV4_FORWARD))
}
