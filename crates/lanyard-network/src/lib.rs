//! # lanyard-network
//!
//! Networking primitives for the lanyard driver.
//!
//! This crate holds everything the driver core needs from the host:
//! subnet matching, MAC derivation, macvlan/ipvlan link creation over
//! netlink, kernel feature probes, and routing advertisement for routed
//! networks.

#![warn(missing_docs)]

pub mod kernel;
pub mod link;
pub mod mac;
pub mod modes;
pub mod netlink;
pub mod routing;
pub mod subnet;

pub use kernel::{ensure_ip_forwarding, kernel_support};
pub use link::{
    CONTAINER_IFACE_PREFIX, HOST_IFACE_LEN, HOST_IFACE_PREFIX, LinkOps, create_virtual_interface,
    generate_iface_name, validate_host_iface,
};
pub use mac::generate_mac_from_ip;
pub use modes::{DriverKind, IpvlanMode, LinkMode, MacvlanMode};
pub use netlink::NetlinkLinks;
pub use routing::{
    DEFAULT_CONTROL_ADDR, DaemonRoutingProvider, RoutingBackend, RoutingManager, RoutingProvider,
};
pub use subnet::{Subnet, match_subnet};

pub use ipnet::{IpNet, Ipv4Net, Ipv6Net};
pub use macaddr::MacAddr6;
