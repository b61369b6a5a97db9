//! Virtual interface creation on a parent interface.
//!
//! All kernel access goes through [`LinkOps`], so the driver core can be
//! exercised without touching the host's link table.

use std::net::IpAddr;

use async_trait::async_trait;
use ipnet::IpNet;
use lanyard_common::{LanyardError, LanyardResult};

use crate::modes::LinkMode;

/// Prefix of generated host-side interface names.
pub const HOST_IFACE_PREFIX: &str = "veth";

/// Number of random characters after [`HOST_IFACE_PREFIX`].
pub const HOST_IFACE_LEN: usize = 7;

/// Prefix the runtime uses to name the interface inside the sandbox.
pub const CONTAINER_IFACE_PREFIX: &str = "eth";

const NAME_ATTEMPTS: usize = 3;

/// Link and route operations on the host.
#[async_trait]
pub trait LinkOps: Send + Sync {
    /// Kernel index of the named link, `None` if it does not exist.
    async fn link_index(&self, name: &str) -> LanyardResult<Option<u32>>;

    /// Create a macvlan or ipvlan link on top of `parent_index`.
    async fn add_link(&self, name: &str, parent_index: u32, mode: LinkMode) -> LanyardResult<()>;

    /// Delete the named link.
    ///
    /// Returns [`LanyardError::InterfaceNotFound`] when it is already gone.
    async fn delete_link(&self, name: &str) -> LanyardResult<()>;

    /// Install a route to `dst` via `gateway` out of link `oif`.
    async fn add_route(&self, dst: IpNet, gateway: IpAddr, oif: u32) -> LanyardResult<()>;

    /// Remove a route previously installed with [`LinkOps::add_route`].
    async fn delete_route(&self, dst: IpNet, gateway: IpAddr, oif: u32) -> LanyardResult<()>;
}

/// Check if a link exists in the default namespace.
pub async fn validate_host_iface(ops: &dyn LinkOps, name: &str) -> LanyardResult<bool> {
    Ok(ops.link_index(name).await?.is_some())
}

/// Create a virtual link named `name` on `parent` and return its name.
///
/// The link is created in the default namespace; moving it into a sandbox
/// is left to the runtime.
///
/// # Errors
///
/// Returns [`LanyardError::InterfaceNotFound`] if the parent is missing and
/// [`LanyardError::DeviceCreation`] if the kernel rejects the link.
pub async fn create_virtual_interface(
    ops: &dyn LinkOps,
    name: &str,
    parent: &str,
    mode: LinkMode,
) -> LanyardResult<String> {
    let Some(parent_index) = ops.link_index(parent).await? else {
        return Err(LanyardError::InterfaceNotFound {
            name: parent.to_string(),
        });
    };

    if let Err(e) = ops.add_link(name, parent_index, mode).await {
        tracing::error!(
            name,
            parent,
            mode = %mode,
            error = %e,
            "Failed to create {} link",
            mode.kind()
        );
        return Err(match e {
            err @ LanyardError::DeviceCreation { .. } => err,
            other => LanyardError::DeviceCreation {
                kind: mode.kind().as_str(),
                name: name.to_string(),
                message: other.to_string(),
            },
        });
    }

    tracing::info!(name, parent, mode = %mode, "{} interface created", mode.kind());
    Ok(name.to_string())
}

/// Random interface name: `prefix` followed by `len` lowercase hex digits.
#[must_use]
pub fn random_iface_name(prefix: &str, len: usize) -> String {
    let uuid = uuid::Uuid::new_v4();
    let mut suffix = hex::encode(uuid.as_bytes());
    suffix.truncate(len);
    format!("{prefix}{suffix}")
}

/// Generate an interface name that is not present on the host.
///
/// # Errors
///
/// Returns [`LanyardError::InterfaceNameExhausted`] if every candidate was
/// already taken.
pub async fn generate_iface_name(
    ops: &dyn LinkOps,
    prefix: &str,
    len: usize,
) -> LanyardResult<String> {
    for _ in 0..NAME_ATTEMPTS {
        let name = random_iface_name(prefix, len);
        if ops.link_index(&name).await?.is_none() {
            return Ok(name);
        }
        tracing::debug!(name, "Generated interface name already in use");
    }
    Err(LanyardError::InterfaceNameExhausted {
        prefix: prefix.to_string(),
    })
}
