//! rtnetlink implementation of [`LinkOps`].

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use async_trait::async_trait;
use futures::TryStreamExt;
use ipnet::IpNet;
use lanyard_common::{LanyardError, LanyardResult};
use rtnetlink::packet_route::link::{
    InfoData, InfoIpVlan, InfoKind, IpVlanMode, LinkMessage, MacVlanMode,
};
use rtnetlink::packet_route::route::RouteMessage;
use rtnetlink::{LinkMacVlan, LinkMessageBuilder, LinkUnspec, RouteMessageBuilder};

use crate::link::LinkOps;
use crate::modes::{IpvlanMode, LinkMode, MacvlanMode};

fn macvlan_mode(mode: MacvlanMode) -> MacVlanMode {
    match mode {
        MacvlanMode::Bridge => MacVlanMode::Bridge,
        MacvlanMode::Private => MacVlanMode::Private,
        MacvlanMode::Vepa => MacVlanMode::Vepa,
        MacvlanMode::Passthru => MacVlanMode::Passthrough,
    }
}

fn ipvlan_mode(mode: IpvlanMode) -> IpVlanMode {
    match mode {
        IpvlanMode::L2 => IpVlanMode::L2,
        IpvlanMode::L3 => IpVlanMode::L3,
    }
}

// rtnetlink ships no ipvlan builder
fn ipvlan_message(name: &str, parent_index: u32, mode: IpvlanMode) -> LinkMessage {
    LinkMessageBuilder::<LinkUnspec>::new_with_info_kind(InfoKind::IpVlan)
        .name(name.to_string())
        .link(parent_index)
        .set_info_data(InfoData::IpVlan(vec![InfoIpVlan::Mode(ipvlan_mode(mode))]))
        .build()
}

fn link_message(name: &str, parent_index: u32, mode: LinkMode) -> LinkMessage {
    match mode {
        LinkMode::Macvlan(m) => LinkMacVlan::new(name, parent_index, macvlan_mode(m)).build(),
        LinkMode::Ipvlan(m) => ipvlan_message(name, parent_index, m),
    }
}

fn netlink_err(e: &rtnetlink::Error) -> LanyardError {
    LanyardError::Netlink {
        message: e.to_string(),
    }
}

fn is_no_device(e: &rtnetlink::Error) -> bool {
    e.to_string().contains("No such device")
}

fn route_message(dst: IpNet, gateway: IpAddr, oif: u32) -> LanyardResult<RouteMessage> {
    match (dst, gateway) {
        (IpNet::V4(net), IpAddr::V4(gw)) => Ok(RouteMessageBuilder::<Ipv4Addr>::new()
            .destination_prefix(net.network(), net.prefix_len())
            .gateway(gw)
            .output_interface(oif)
            .build()),
        (IpNet::V6(net), IpAddr::V6(gw)) => Ok(RouteMessageBuilder::<Ipv6Addr>::new()
            .destination_prefix(net.network(), net.prefix_len())
            .gateway(gw)
            .output_interface(oif)
            .build()),
        _ => Err(LanyardError::Internal {
            message: format!("route {dst} via {gateway}: address family mismatch"),
        }),
    }
}

/// Persistent netlink connection used for all link and route operations.
pub struct NetlinkLinks {
    handle: rtnetlink::Handle,
    // Keep the connection task alive
    _conn_task: tokio::task::JoinHandle<()>,
}

impl NetlinkLinks {
    /// Open a netlink connection. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the netlink socket cannot be opened.
    pub fn new() -> LanyardResult<Self> {
        let (conn, handle, _) = rtnetlink::new_connection()?;
        let conn_task = tokio::spawn(conn);
        Ok(Self {
            handle,
            _conn_task: conn_task,
        })
    }
}

#[async_trait]
impl LinkOps for NetlinkLinks {
    async fn link_index(&self, name: &str) -> LanyardResult<Option<u32>> {
        let mut links = self
            .handle
            .link()
            .get()
            .match_name(name.to_string())
            .execute();
        match links.try_next().await {
            Ok(Some(msg)) => Ok(Some(msg.header.index)),
            Ok(None) => Ok(None),
            // The kernel answers a name lookup for a missing link with ENODEV
            Err(e) if is_no_device(&e) => Ok(None),
            Err(e) => Err(netlink_err(&e)),
        }
    }

    async fn add_link(&self, name: &str, parent_index: u32, mode: LinkMode) -> LanyardResult<()> {
        self.handle
            .link()
            .add(link_message(name, parent_index, mode))
            .execute()
            .await
            .map_err(|e| LanyardError::DeviceCreation {
                kind: mode.kind().as_str(),
                name: name.to_string(),
                message: e.to_string(),
            })
    }

    async fn delete_link(&self, name: &str) -> LanyardResult<()> {
        let Some(index) = self.link_index(name).await? else {
            return Err(LanyardError::InterfaceNotFound {
                name: name.to_string(),
            });
        };
        match self.handle.link().del(index).execute().await {
            Ok(()) => {
                tracing::debug!(name, "Interface deleted");
                Ok(())
            }
            Err(e) if is_no_device(&e) => Err(LanyardError::InterfaceNotFound {
                name: name.to_string(),
            }),
            Err(e) => Err(netlink_err(&e)),
        }
    }

    async fn add_route(&self, dst: IpNet, gateway: IpAddr, oif: u32) -> LanyardResult<()> {
        let route = route_message(dst, gateway, oif)?;
        match self.handle.route().add(route).execute().await {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("File exists") => {
                tracing::debug!(%dst, %gateway, "Route already present");
                Ok(())
            }
            Err(e) => Err(netlink_err(&e)),
        }
    }

    async fn delete_route(&self, dst: IpNet, gateway: IpAddr, oif: u32) -> LanyardResult<()> {
        let route = route_message(dst, gateway, oif)?;
        self.handle
            .route()
            .del(route)
            .execute()
            .await
            .map_err(|e| netlink_err(&e))
    }
}
