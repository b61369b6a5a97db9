//! Routing advertisement for routed (ipvlan l3) networks.
//!
//! A routed network's subnets are only reachable once a routing daemon
//! announces them to its peers. [`RoutingManager`] is the capability set the
//! driver needs from such a daemon; [`RoutingProvider`] builds managers for
//! a parent interface and backend.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use ipnet::IpNet;
use lanyard_common::{LanyardError, LanyardResult};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::link::LinkOps;

pub mod gobgp;

pub use gobgp::GobgpManager;

/// Control address of the routing daemon when none is configured.
pub const DEFAULT_CONTROL_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Routing daemon implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingBackend {
    /// GoBGP, driven through its `gobgp` client.
    Gobgp,
}

impl RoutingBackend {
    /// Backend name as used in network options.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Gobgp => "gobgp",
        }
    }
}

impl fmt::Display for RoutingBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoutingBackend {
    type Err = LanyardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gobgp" => Ok(Self::Gobgp),
            other => Err(LanyardError::UnknownRoutingBackend {
                name: other.to_string(),
            }),
        }
    }
}

/// Operations the driver needs from a routing daemon.
#[async_trait]
pub trait RoutingManager: Send + Sync {
    /// Backend this manager talks to.
    fn backend(&self) -> RoutingBackend;

    /// Watch the daemon for routes learned from peers and mirror them into
    /// the host routing table until `shutdown` flips to `true`.
    async fn start_monitoring(&self, shutdown: watch::Receiver<bool>) -> LanyardResult<()>;

    /// Announce ownership of `prefix`.
    async fn advertise_route(&self, prefix: IpNet) -> LanyardResult<()>;

    /// Retract a previously announced `prefix`.
    async fn withdraw_route(&self, prefix: IpNet) -> LanyardResult<()>;
}

/// Builds routing managers for a parent interface.
pub trait RoutingProvider: Send + Sync {
    /// Create a manager for `backend` bound to `parent_iface`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be set up.
    fn connect(
        &self,
        backend: RoutingBackend,
        parent_iface: &str,
    ) -> LanyardResult<Arc<dyn RoutingManager>>;
}

/// Provider for the backends compiled into this crate.
pub struct DaemonRoutingProvider {
    links: Arc<dyn LinkOps>,
    control_addr: IpAddr,
    gobgp_bin: PathBuf,
}

impl DaemonRoutingProvider {
    /// Create a provider that reaches daemons at `control_addr`.
    pub fn new(links: Arc<dyn LinkOps>, control_addr: IpAddr) -> Self {
        Self {
            links,
            control_addr,
            gobgp_bin: PathBuf::from(gobgp::DEFAULT_GOBGP_BIN),
        }
    }

    /// Use a specific `gobgp` client binary.
    #[must_use]
    pub fn with_gobgp_bin(mut self, bin: impl Into<PathBuf>) -> Self {
        self.gobgp_bin = bin.into();
        self
    }
}

impl RoutingProvider for DaemonRoutingProvider {
    fn connect(
        &self,
        backend: RoutingBackend,
        parent_iface: &str,
    ) -> LanyardResult<Arc<dyn RoutingManager>> {
        match backend {
            RoutingBackend::Gobgp => {
                tracing::info!(
                    parent = parent_iface,
                    control = %self.control_addr,
                    "Routing manager is gobgp"
                );
                Ok(Arc::new(GobgpManager::new(
                    parent_iface,
                    self.control_addr,
                    self.gobgp_bin.clone(),
                    Arc::clone(&self.links),
                )))
            }
        }
    }
}
