//! # lanyard
//!
//! Core of the lanyard macvlan/ipvlan network driver.
//!
//! The [`Driver`] owns the network and endpoint tables and implements the
//! lifecycle the orchestration runtime drives:
//!
//! ```text
//! create network -> create endpoint -> join -> leave -> delete endpoint -> delete network
//! ```
//!
//! Host access is injected: links through [`lanyard_network::LinkOps`] and
//! routing daemons through [`lanyard_network::RoutingProvider`].

#![warn(missing_docs)]

pub mod config;
pub mod driver;
pub mod network;
pub mod outcome;
pub mod session;

pub use config::{NetworkConfiguration, Options};
pub use driver::{Capabilities, Driver, EndpointRequest, JoinInfo, Scope};
pub use network::{AddressPool, Endpoint, Network};
pub use outcome::{Degraded, Outcome};
