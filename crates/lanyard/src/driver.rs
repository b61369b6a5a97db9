//! The driver core: network and endpoint lifecycle.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use lanyard_common::{EndpointId, LanyardError, LanyardResult, NetworkId};
use lanyard_network::{
    CONTAINER_IFACE_PREFIX, DriverKind, HOST_IFACE_LEN, HOST_IFACE_PREFIX, IpNet, LinkOps,
    MacAddr6, RoutingBackend, RoutingManager, RoutingProvider, create_virtual_interface,
    generate_iface_name, generate_mac_from_ip, validate_host_iface,
};
use parking_lot::Mutex;

use crate::config::{NetworkConfiguration, Options};
use crate::network::{AddressPool, Endpoint, Network};
use crate::outcome::{Degraded, Outcome};
use crate::session::RoutingSessions;

/// Scope of the state a driver keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Networks exist on this host only.
    Local,
}

impl Scope {
    /// Name announced to the runtime.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
        }
    }
}

/// Capabilities announced to the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Data scope.
    pub scope: Scope,
}

/// What the runtime needs to move a joined endpoint into its sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinInfo {
    /// Host-side interface to move into the sandbox.
    pub src_name: String,
    /// Prefix of the interface name inside the sandbox.
    pub dst_prefix: String,
    /// Default IPv4 gateway.
    pub gateway: Option<IpAddr>,
    /// Default IPv6 gateway.
    pub gateway_v6: Option<IpAddr>,
}

/// Addresses handed over with an endpoint creation request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointRequest {
    /// IPv4 address with prefix.
    pub address: Option<IpNet>,
    /// IPv6 address with prefix.
    pub address_v6: Option<IpNet>,
    /// Caller chosen hardware address.
    pub mac: Option<MacAddr6>,
}

/// A macvlan or ipvlan network driver.
///
/// The driver owns the network table. Link and routing side effects go
/// through the injected [`LinkOps`] and [`RoutingProvider`].
pub struct Driver {
    kind: DriverKind,
    links: Arc<dyn LinkOps>,
    routing: Arc<dyn RoutingProvider>,
    networks: Mutex<HashMap<NetworkId, Arc<Network>>>,
    sessions: RoutingSessions,
}

impl Driver {
    /// Create a driver of the given kind.
    pub fn new(
        kind: DriverKind,
        links: Arc<dyn LinkOps>,
        routing: Arc<dyn RoutingProvider>,
    ) -> Self {
        tracing::info!(driver = %kind, "Driver initialized");
        Self {
            kind,
            links,
            routing,
            networks: Mutex::new(HashMap::new()),
            sessions: RoutingSessions::default(),
        }
    }

    /// Driver kind.
    #[must_use]
    pub const fn kind(&self) -> DriverKind {
        self.kind
    }

    /// Driver type name.
    #[must_use]
    pub const fn driver_type(&self) -> &'static str {
        self.kind.as_str()
    }

    /// Capabilities announced at registration.
    #[must_use]
    pub const fn capabilities(&self) -> Capabilities {
        Capabilities {
            scope: Scope::Local,
        }
    }

    /// Look up a network.
    #[must_use]
    pub fn network(&self, id: &NetworkId) -> Option<Arc<Network>> {
        self.networks.lock().get(id).cloned()
    }

    /// Ids of all registered networks.
    #[must_use]
    pub fn network_ids(&self) -> Vec<NetworkId> {
        self.networks.lock().keys().cloned().collect()
    }

    /// Number of live routing sessions.
    #[must_use]
    pub fn routing_sessions(&self) -> usize {
        self.sessions.len()
    }

    fn get_network(&self, id: &NetworkId) -> LanyardResult<Arc<Network>> {
        self.network(id).ok_or_else(|| LanyardError::NetworkNotFound {
            id: id.to_string(),
        })
    }

    /// Create a network.
    ///
    /// Routed networks with a routing manager attach to the routing session
    /// of their parent interface and advertise every subnet. Failures there
    /// are reported in the outcome rather than failing the creation.
    ///
    /// # Errors
    ///
    /// - invalid id or options, or no `host_iface` option
    /// - [`LanyardError::InterfaceNotFound`] if the parent is missing
    /// - [`LanyardError::NetworkExists`] for a duplicate id
    /// - [`LanyardError::ConfigConflict`] if the configured range or a pool
    ///   overlaps another network on the same parent
    pub async fn create_network(
        &self,
        id: &str,
        options: &Options,
        ipv4: &[AddressPool],
        ipv6: &[AddressPool],
    ) -> LanyardResult<Outcome<()>> {
        let id = NetworkId::new(id)?;
        let config = NetworkConfiguration::parse(self.kind, options)?;

        if config.host_iface.is_empty() {
            return Err(LanyardError::MissingHostInterface {
                driver: self.kind.as_str(),
            });
        }
        if !validate_host_iface(self.links.as_ref(), &config.host_iface).await? {
            return Err(LanyardError::InterfaceNotFound {
                name: config.host_iface,
            });
        }

        let network = Arc::new(Network::new(id.clone(), config, ipv4, ipv6));
        self.register(&network)?;

        let config = network.config();
        for subnet in network.subnets().iter().chain(network.subnets_v6()) {
            tracing::debug!(
                network = %id,
                driver = %self.kind,
                mode = %config.mode,
                subnet = %subnet,
                host_iface = %config.host_iface,
                "Network subnet added"
            );
        }

        let mut outcome = Outcome::ok();
        if let Some(backend) = routed_backend(config) {
            match self
                .sessions
                .attach(self.routing.as_ref(), &config.host_iface, backend, &id)
            {
                Ok(manager) => advertise_all(manager.as_ref(), &network, &mut outcome).await,
                Err(e) => {
                    tracing::warn!(
                        network = %id,
                        %backend,
                        error = %e,
                        "Failed to set up routing session"
                    );
                    outcome.push(Degraded::MonitorStart {
                        backend,
                        host_iface: config.host_iface.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            network = %id,
            driver = %self.kind,
            mode = %config.mode,
            host_iface = %config.host_iface,
            "Network created"
        );
        Ok(outcome)
    }

    fn register(&self, network: &Arc<Network>) -> LanyardResult<()> {
        let mut networks = self.networks.lock();
        if networks.contains_key(network.id()) {
            return Err(LanyardError::NetworkExists {
                id: network.id().to_string(),
            });
        }
        let config = network.config();
        if let Some(existing) = networks
            .values()
            .find(|n| n.config().host_iface == config.host_iface && n.conflicts_with(network))
        {
            return Err(LanyardError::ConfigConflict {
                network: network.id().to_string(),
                existing: existing.id().to_string(),
                host_iface: config.host_iface.clone(),
            });
        }
        networks.insert(network.id().clone(), Arc::clone(network));
        Ok(())
    }

    /// Delete a network.
    ///
    /// Routed networks withdraw every subnet first. Endpoints still
    /// registered are dropped without touching their interfaces.
    ///
    /// # Errors
    ///
    /// Returns [`LanyardError::NetworkNotFound`] for an unknown id.
    pub async fn delete_network(&self, id: &str) -> LanyardResult<Outcome<()>> {
        let id = NetworkId::new(id)?;
        let network = self.get_network(&id)?;
        let config = network.config();

        let mut outcome = Outcome::ok();
        let backend = routed_backend(config);
        if let Some(backend) = backend {
            if let Some(manager) = self.sessions.manager(&config.host_iface, backend) {
                withdraw_all(manager.as_ref(), &network, &mut outcome).await;
            }
        }

        self.networks.lock().remove(&id);

        if let Some(backend) = backend {
            if let Some(stopped) = self.sessions.detach(&config.host_iface, backend, &id) {
                stopped.join().await;
            }
        }

        let remaining = network.endpoint_count();
        if remaining > 0 {
            tracing::debug!(network = %id, endpoints = remaining, "Network deleted with endpoints");
        }
        tracing::info!(network = %id, driver = %self.kind, "Network deleted");
        Ok(outcome)
    }

    /// Create an endpoint.
    ///
    /// Returns the hardware address if the driver generated it.
    ///
    /// # Errors
    ///
    /// - [`LanyardError::MissingAddress`] without an IPv4 address
    /// - [`LanyardError::NoMatchingSubnet`] if an address is outside every
    ///   subnet of the network
    /// - [`LanyardError::EndpointExists`] for a duplicate id
    pub async fn create_endpoint(
        &self,
        nid: &str,
        eid: &str,
        request: EndpointRequest,
    ) -> LanyardResult<Option<MacAddr6>> {
        let (nid, eid) = lanyard_common::id::validate_ids(nid, eid)?;
        let network = self.get_network(&nid)?;

        let Some(address) = request.address else {
            return Err(LanyardError::MissingAddress {
                endpoint: eid.to_string(),
            });
        };
        for addr in std::iter::once(&address).chain(&request.address_v6) {
            if network.subnet_for(addr).is_none() {
                return Err(LanyardError::NoMatchingSubnet {
                    address: addr.to_string(),
                    network: nid.to_string(),
                });
            }
        }

        let generated = request.mac.is_none();
        let mac = request
            .mac
            .unwrap_or_else(|| generate_mac_from_ip(address.addr()));

        let endpoint = Endpoint {
            id: eid.clone(),
            mac,
            address,
            address_v6: request.address_v6,
            src_name: String::new(),
            sandbox_key: None,
        };
        if !network.insert_endpoint(endpoint) {
            return Err(LanyardError::EndpointExists { id: eid.to_string() });
        }

        tracing::debug!(
            network = %nid,
            endpoint = %eid,
            address = %address,
            mac = %mac,
            "Endpoint allocated"
        );
        Ok(generated.then_some(mac))
    }

    /// Delete an endpoint and its host-side interface if one is left.
    ///
    /// A missing interface is expected once the sandbox is gone. Other
    /// removal errors are reported in the outcome.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an unknown network or endpoint.
    pub async fn delete_endpoint(&self, nid: &str, eid: &str) -> LanyardResult<Outcome<()>> {
        let (nid, eid) = lanyard_common::id::validate_ids(nid, eid)?;
        let network = self.get_network(&nid)?;
        let endpoint = network
            .remove_endpoint(&eid)
            .ok_or_else(|| LanyardError::EndpointNotFound { id: eid.to_string() })?;

        let mut outcome = Outcome::ok();
        if !endpoint.src_name.is_empty() {
            match self.links.delete_link(&endpoint.src_name).await {
                Ok(()) => tracing::debug!(name = %endpoint.src_name, "Endpoint interface removed"),
                Err(LanyardError::InterfaceNotFound { .. }) => {
                    tracing::debug!(name = %endpoint.src_name, "Endpoint interface already gone");
                }
                Err(e) => {
                    tracing::warn!(
                        name = %endpoint.src_name,
                        error = %e,
                        "Failed to remove endpoint interface"
                    );
                    outcome.push(Degraded::InterfaceCleanup {
                        name: endpoint.src_name.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::debug!(network = %nid, endpoint = %eid, "Endpoint deleted");
        Ok(outcome)
    }

    /// Create the endpoint's host-side interface for a sandbox.
    ///
    /// The link is created in the default namespace; moving it into the
    /// sandbox under [`JoinInfo::dst_prefix`] is up to the runtime.
    ///
    /// # Errors
    ///
    /// - a not-found error for an unknown network or endpoint
    /// - [`LanyardError::EndpointAlreadyJoined`] if the endpoint has a sandbox
    /// - name generation or link creation errors
    pub async fn join(&self, nid: &str, eid: &str, sandbox_key: &str) -> LanyardResult<JoinInfo> {
        let (nid, eid) = lanyard_common::id::validate_ids(nid, eid)?;
        let network = self.get_network(&nid)?;
        let endpoint = network
            .endpoint(&eid)
            .ok_or_else(|| LanyardError::EndpointNotFound { id: eid.to_string() })?;
        if endpoint.is_joined() {
            return Err(LanyardError::EndpointAlreadyJoined { id: eid.to_string() });
        }

        let config = network.config();
        let links = self.links.as_ref();
        let candidate = generate_iface_name(links, HOST_IFACE_PREFIX, HOST_IFACE_LEN).await?;
        let src_name =
            create_virtual_interface(links, &candidate, &config.host_iface, config.mode).await?;

        let bound = network.with_endpoint(&eid, |ep| {
            if ep.is_joined() {
                return false;
            }
            ep.src_name.clone_from(&src_name);
            ep.sandbox_key = Some(sandbox_key.to_string());
            true
        });
        match bound {
            Some(true) => {}
            raced => {
                // The endpoint changed while the link was being created
                if let Err(e) = self.links.delete_link(&src_name).await {
                    tracing::warn!(
                        name = %src_name,
                        error = %e,
                        "Failed to remove unused interface"
                    );
                }
                return Err(if raced.is_none() {
                    LanyardError::EndpointNotFound { id: eid.to_string() }
                } else {
                    LanyardError::EndpointAlreadyJoined { id: eid.to_string() }
                });
            }
        }

        let info = JoinInfo {
            src_name,
            dst_prefix: CONTAINER_IFACE_PREFIX.to_string(),
            gateway: network.gateway(),
            gateway_v6: network.gateway_v6(),
        };
        if let (Some(subnet), Some(gw)) = (network.subnets().first(), info.gateway) {
            tracing::debug!(subnet = %subnet.prefix(), gateway = %gw, "Endpoint joined subnet");
        }
        tracing::info!(
            network = %nid,
            endpoint = %eid,
            src_name = %info.src_name,
            "Endpoint joined"
        );
        Ok(info)
    }

    /// Detach an endpoint from its sandbox.
    ///
    /// The host-side interface name is kept so deletion can still clean up.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an unknown network or endpoint.
    pub async fn leave(&self, nid: &str, eid: &str) -> LanyardResult<()> {
        let (nid, eid) = lanyard_common::id::validate_ids(nid, eid)?;
        let network = self.get_network(&nid)?;
        network
            .with_endpoint(&eid, |ep| ep.sandbox_key = None)
            .ok_or_else(|| LanyardError::EndpointNotFound { id: eid.to_string() })?;
        tracing::debug!(network = %nid, endpoint = %eid, "Endpoint left");
        Ok(())
    }

    /// Operational data of an endpoint. Nothing live is tracked.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed ids.
    pub async fn endpoint_oper_info(
        &self,
        nid: &str,
        eid: &str,
    ) -> LanyardResult<HashMap<String, serde_json::Value>> {
        lanyard_common::id::validate_ids(nid, eid)?;
        Ok(HashMap::new())
    }

    /// Discovery notification. Ignored.
    ///
    /// # Errors
    ///
    /// Never fails.
    pub async fn discover_new(&self, discovery_type: i64) -> LanyardResult<()> {
        tracing::trace!(discovery_type, "Ignoring discovery event");
        Ok(())
    }

    /// Discovery removal notification. Ignored.
    ///
    /// # Errors
    ///
    /// Never fails.
    pub async fn discover_delete(&self, discovery_type: i64) -> LanyardResult<()> {
        tracing::trace!(discovery_type, "Ignoring discovery removal");
        Ok(())
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("kind", &self.kind)
            .field("networks", &self.networks.lock().len())
            .field("sessions", &self.sessions)
            .finish_non_exhaustive()
    }
}

fn routed_backend(config: &NetworkConfiguration) -> Option<RoutingBackend> {
    config
        .routing_manager
        .filter(|_| config.mode.is_routed())
}

async fn advertise_all(
    manager: &dyn RoutingManager,
    network: &Network,
    outcome: &mut Outcome<()>,
) {
    for prefix in network.prefixes() {
        if let Err(e) = manager.advertise_route(prefix).await {
            tracing::warn!(
                network = %network.id(),
                %prefix,
                error = %e,
                "Failed to advertise subnet"
            );
            outcome.push(Degraded::Advertise {
                prefix,
                error: e.to_string(),
            });
        }
    }
}

async fn withdraw_all(
    manager: &dyn RoutingManager,
    network: &Network,
    outcome: &mut Outcome<()>,
) {
    for prefix in network.prefixes() {
        if let Err(e) = manager.withdraw_route(prefix).await {
            tracing::warn!(
                network = %network.id(),
                %prefix,
                error = %e,
                "Failed to withdraw subnet"
            );
            outcome.push(Degraded::Withdraw {
                prefix,
                error: e.to_string(),
            });
        }
    }
}
