//! Subnets and address-to-subnet matching.

use std::fmt;
use std::net::IpAddr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

/// A network prefix with an optional gateway.
///
/// Subnets are built once from the address pools handed over at network
/// creation and never change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    prefix: IpNet,
    gateway: Option<IpAddr>,
}

impl Subnet {
    /// Create a subnet. The prefix is normalized to its network address.
    #[must_use]
    pub fn new(prefix: IpNet, gateway: Option<IpAddr>) -> Self {
        Self {
            prefix: prefix.trunc(),
            gateway,
        }
    }

    /// The network prefix.
    #[must_use]
    pub const fn prefix(&self) -> IpNet {
        self.prefix
    }

    /// The gateway, if the pool carried one.
    #[must_use]
    pub const fn gateway(&self) -> Option<IpAddr> {
        self.gateway
    }

    /// Whether `addr` belongs to this subnet.
    ///
    /// The prefix lengths must be equal before containment is checked, so an
    /// address announced as a /16 never lands in a /24 that happens to
    /// contain it.
    #[must_use]
    pub fn matches(&self, addr: &IpNet) -> bool {
        self.prefix.prefix_len() == addr.prefix_len() && self.prefix.contains(&addr.addr())
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.gateway {
            Some(gw) => write!(f, "{} gw {}", self.prefix, gw),
            None => write!(f, "{}", self.prefix),
        }
    }
}

/// Return the first subnet `addr` belongs to.
#[must_use]
pub fn match_subnet<'a>(subnets: &'a [Subnet], addr: &IpNet) -> Option<&'a Subnet> {
    subnets.iter().find(|s| s.matches(addr))
}

/// Whether any two subnets of the same family overlap.
#[must_use]
pub fn has_overlap(subnets: &[Subnet]) -> bool {
    subnets.iter().enumerate().any(|(i, a)| {
        subnets[i + 1..].iter().any(|b| {
            a.prefix.contains(&b.prefix.network()) || b.prefix.contains(&a.prefix.network())
        })
    })
}
