//! Networks and their endpoints.

use std::collections::HashMap;
use std::net::IpAddr;

use lanyard_common::{EndpointId, NetworkId};
use lanyard_network::{IpNet, MacAddr6, Subnet, match_subnet};
use parking_lot::Mutex;

use crate::config::NetworkConfiguration;

/// An address pool handed over by the runtime's IPAM at network creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressPool {
    /// Pool prefix.
    pub pool: IpNet,
    /// Gateway address inside the pool.
    pub gateway: Option<IpAddr>,
}

impl AddressPool {
    /// Pool without a gateway.
    #[must_use]
    pub const fn new(pool: IpNet) -> Self {
        Self {
            pool,
            gateway: None,
        }
    }

    /// Set the gateway.
    #[must_use]
    pub const fn with_gateway(mut self, gateway: IpAddr) -> Self {
        self.gateway = Some(gateway);
        self
    }
}

/// One container-facing attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Endpoint id.
    pub id: EndpointId,
    /// Hardware address, supplied or derived from `address`.
    pub mac: MacAddr6,
    /// IPv4 address with prefix.
    pub address: IpNet,
    /// IPv6 address with prefix.
    pub address_v6: Option<IpNet>,
    /// Host-side interface created by join, empty before.
    pub src_name: String,
    /// Sandbox the endpoint is joined to.
    pub sandbox_key: Option<String>,
}

impl Endpoint {
    /// Whether the endpoint is attached to a sandbox.
    #[must_use]
    pub const fn is_joined(&self) -> bool {
        self.sandbox_key.is_some()
    }
}

/// One virtual network bound to a parent interface.
///
/// Subnets are fixed at creation and read without locking. The endpoint
/// table is guarded by the network's own mutex, which is never held across
/// link operations.
#[derive(Debug)]
pub struct Network {
    id: NetworkId,
    config: NetworkConfiguration,
    subnets: Vec<Subnet>,
    subnets_v6: Vec<Subnet>,
    endpoints: Mutex<HashMap<EndpointId, Endpoint>>,
}

impl Network {
    /// Build a network from its configuration and IPAM pools.
    ///
    /// Pool order is kept, so the first pool's gateway is the default one.
    #[must_use]
    pub fn new(
        id: NetworkId,
        config: NetworkConfiguration,
        ipv4: &[AddressPool],
        ipv6: &[AddressPool],
    ) -> Self {
        let to_subnets = |pools: &[AddressPool]| {
            pools
                .iter()
                .map(|p| Subnet::new(p.pool, p.gateway))
                .collect::<Vec<_>>()
        };
        Self {
            id,
            config,
            subnets: to_subnets(ipv4),
            subnets_v6: to_subnets(ipv6),
            endpoints: Mutex::new(HashMap::new()),
        }
    }

    /// Network id.
    #[must_use]
    pub const fn id(&self) -> &NetworkId {
        &self.id
    }

    /// Validated configuration.
    #[must_use]
    pub const fn config(&self) -> &NetworkConfiguration {
        &self.config
    }

    /// IPv4 subnets in pool order.
    #[must_use]
    pub fn subnets(&self) -> &[Subnet] {
        &self.subnets
    }

    /// IPv6 subnets in pool order.
    #[must_use]
    pub fn subnets_v6(&self) -> &[Subnet] {
        &self.subnets_v6
    }

    /// Every subnet prefix, IPv4 first.
    pub fn prefixes(&self) -> impl Iterator<Item = IpNet> + '_ {
        self.subnets
            .iter()
            .chain(&self.subnets_v6)
            .map(Subnet::prefix)
    }

    /// Subnet owning `addr`, searching the family of the address.
    #[must_use]
    pub fn subnet_for(&self, addr: &IpNet) -> Option<&Subnet> {
        match addr {
            IpNet::V4(_) => match_subnet(&self.subnets, addr),
            IpNet::V6(_) => match_subnet(&self.subnets_v6, addr),
        }
    }

    /// Gateway reported to joining endpoints: the first IPv4 pool's.
    #[must_use]
    pub fn gateway(&self) -> Option<IpAddr> {
        self.subnets.first().and_then(Subnet::gateway)
    }

    /// IPv6 gateway reported to joining endpoints: the first IPv6 pool's.
    #[must_use]
    pub fn gateway_v6(&self) -> Option<IpAddr> {
        self.subnets_v6.first().and_then(Subnet::gateway)
    }

    /// Whether two networks claim overlapping IPv4 ranges, either through
    /// their configured range or their pools.
    #[must_use]
    pub fn conflicts_with(&self, other: &Self) -> bool {
        self.config.conflicts_with(&other.config)
            || self.subnets.iter().any(|a| {
                other.subnets.iter().any(|b| {
                    let (a, b) = (a.prefix(), b.prefix());
                    a.contains(&b) || b.contains(&a)
                })
            })
    }

    /// Copy of an endpoint.
    #[must_use]
    pub fn endpoint(&self, id: &EndpointId) -> Option<Endpoint> {
        self.endpoints.lock().get(id).cloned()
    }

    /// Number of registered endpoints.
    #[must_use]
    pub fn endpoint_count(&self) -> usize {
        self.endpoints.lock().len()
    }

    /// Register an endpoint unless the id is taken.
    pub(crate) fn insert_endpoint(&self, endpoint: Endpoint) -> bool {
        let mut endpoints = self.endpoints.lock();
        if endpoints.contains_key(&endpoint.id) {
            return false;
        }
        endpoints.insert(endpoint.id.clone(), endpoint);
        true
    }

    pub(crate) fn remove_endpoint(&self, id: &EndpointId) -> Option<Endpoint> {
        self.endpoints.lock().remove(id)
    }

    /// Run `f` on a registered endpoint under the network lock.
    pub(crate) fn with_endpoint<R>(
        &self,
        id: &EndpointId,
        f: impl FnOnce(&mut Endpoint) -> R,
    ) -> Option<R> {
        self.endpoints.lock().get_mut(id).map(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanyard_network::DriverKind;

    fn network(ipv4: &[AddressPool], ipv6: &[AddressPool]) -> Network {
        let config = NetworkConfiguration {
            host_iface: "eth0".to_string(),
            ..NetworkConfiguration::new(DriverKind::Macvlan)
        };
        Network::new(NetworkId::new("n1").unwrap(), config, ipv4, ipv6)
    }

    fn pool(cidr: &str, gw: Option<&str>) -> AddressPool {
        let p = AddressPool::new(cidr.parse().unwrap());
        match gw {
            Some(gw) => p.with_gateway(gw.parse().unwrap()),
            None => p,
        }
    }

    #[test]
    fn first_pool_gateway_is_default() {
        let n = network(
            &[
                pool("10.0.0.0/24", Some("10.0.0.1")),
                pool("10.0.1.0/24", Some("10.0.1.1")),
            ],
            &[],
        );
        assert_eq!(n.gateway(), Some("10.0.0.1".parse().unwrap()));
        assert_eq!(n.gateway_v6(), None);
    }

    #[test]
    fn gateway_override_is_not_reported() {
        let config = NetworkConfiguration {
            host_iface: "eth0".to_string(),
            default_gateway_ipv4: Some("10.0.0.254".parse().unwrap()),
            ..NetworkConfiguration::new(DriverKind::Macvlan)
        };
        let n = Network::new(
            NetworkId::new("n1").unwrap(),
            config,
            &[pool("10.0.0.0/24", Some("10.0.0.1"))],
            &[],
        );
        assert_eq!(n.gateway(), Some("10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn pools_conflict() {
        let a = network(&[pool("10.0.0.0/16", None)], &[]);
        let b = network(&[pool("10.0.5.0/24", None), pool("10.2.0.0/24", None)], &[]);
        let c = network(&[pool("10.1.0.0/24", None)], &[pool("fd00::/64", None)]);
        let d = network(&[], &[pool("fd00::/64", None)]);
        assert!(a.conflicts_with(&b));
        assert!(b.conflicts_with(&a));
        assert!(!a.conflicts_with(&c));
        // IPv6 pools are not compared
        assert!(!c.conflicts_with(&d));
    }

    #[test]
    fn no_gateway_on_first_pool() {
        let n = network(
            &[pool("10.0.0.0/24", None), pool("10.0.1.0/24", Some("10.0.1.1"))],
            &[],
        );
        assert_eq!(n.gateway(), None);
    }

    #[test]
    fn lookup_by_family() {
        let n = network(
            &[pool("10.0.0.0/24", None)],
            &[pool("fd00::/64", Some("fd00::1"))],
        );
        assert!(n.subnet_for(&"10.0.0.9/24".parse().unwrap()).is_some());
        assert!(n.subnet_for(&"fd00::9/64".parse().unwrap()).is_some());
        assert!(n.subnet_for(&"fd01::9/64".parse().unwrap()).is_none());
        assert_eq!(n.gateway_v6(), Some("fd00::1".parse().unwrap()));
        assert_eq!(n.prefixes().count(), 2);
    }

    #[test]
    fn endpoint_ids_are_unique() {
        let n = network(&[pool("10.0.0.0/24", None)], &[]);
        let ep = Endpoint {
            id: EndpointId::new("e1").unwrap(),
            mac: MacAddr6::new(2, 0x42, 10, 0, 0, 5),
            address: "10.0.0.5/24".parse().unwrap(),
            address_v6: None,
            src_name: String::new(),
            sandbox_key: None,
        };
        assert!(n.insert_endpoint(ep.clone()));
        assert!(!n.insert_endpoint(ep));
        assert_eq!(n.endpoint_count(), 1);
    }
}
