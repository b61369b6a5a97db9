//! Remote network-driver plugin protocol.
//!
//! The runtime POSTs JSON bodies to `/Plugin.Activate` and
//! `/NetworkDriver.*` over the plugin's unix socket. Field names follow the
//! runtime's PascalCase wire format.

pub mod server;

use std::collections::HashMap;

use lanyard::{AddressPool, EndpointRequest, Options};
use lanyard_common::{LanyardError, LanyardResult};
use lanyard_network::{IpNet, MacAddr6};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActivateResponse {
    pub implements: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CapabilitiesResponse {
    pub scope: &'static str,
    pub connectivity_scope: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IpamData {
    #[serde(default)]
    pub address_space: String,
    pub pool: String,
    #[serde(default)]
    pub gateway: String,
    #[serde(default)]
    pub aux_addresses: HashMap<String, String>,
}

impl TryFrom<&IpamData> for AddressPool {
    type Error = LanyardError;

    fn try_from(data: &IpamData) -> LanyardResult<Self> {
        let pool = parse_cidr("Pool", &data.pool)?;
        let pool = Self::new(pool);
        if data.gateway.is_empty() {
            return Ok(pool);
        }
        // Gateways arrive in CIDR form, plain addresses are accepted too
        let gateway = data
            .gateway
            .parse::<IpNet>()
            .map(|net| net.addr())
            .or_else(|_| data.gateway.parse::<IpAddr>())
            .map_err(|e| LanyardError::bad_options(format!("Gateway {:?}: {e}", data.gateway)))?;
        Ok(pool.with_gateway(gateway))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateNetworkRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    #[serde(default)]
    pub options: Option<Options>,
    #[serde(rename = "IPv4Data", default)]
    pub ipv4_data: Option<Vec<IpamData>>,
    #[serde(rename = "IPv6Data", default)]
    pub ipv6_data: Option<Vec<IpamData>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct EndpointInterface {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address: String,
    #[serde(rename = "AddressIPv6", default, skip_serializing_if = "String::is_empty")]
    pub address_ipv6: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mac_address: String,
}

impl TryFrom<&EndpointInterface> for EndpointRequest {
    type Error = LanyardError;

    fn try_from(iface: &EndpointInterface) -> LanyardResult<Self> {
        let optional_cidr = |field: &str, value: &str| {
            if value.is_empty() {
                Ok(None)
            } else {
                parse_cidr(field, value).map(Some)
            }
        };
        let mac = if iface.mac_address.is_empty() {
            None
        } else {
            Some(iface.mac_address.parse::<MacAddr6>().map_err(|e| {
                LanyardError::bad_options(format!("MacAddress {:?}: {e}", iface.mac_address))
            })?)
        };
        Ok(Self {
            address: optional_cidr("Address", &iface.address)?,
            address_v6: optional_cidr("AddressIPv6", &iface.address_ipv6)?,
            mac,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateEndpointRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    #[serde(rename = "EndpointID")]
    pub endpoint_id: String,
    #[serde(default)]
    pub interface: Option<EndpointInterface>,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateEndpointResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interface: Option<EndpointInterface>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EndpointRequestIds {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    #[serde(rename = "EndpointID")]
    pub endpoint_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct EndpointOperInfoResponse {
    pub value: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JoinRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    #[serde(rename = "EndpointID")]
    pub endpoint_id: String,
    #[serde(default)]
    pub sandbox_key: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct InterfaceName {
    pub src_name: String,
    pub dst_prefix: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct JoinResponse {
    pub interface_name: InterfaceName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    #[serde(rename = "GatewayIPv6", skip_serializing_if = "Option::is_none")]
    pub gateway_ipv6: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DiscoveryRequest {
    #[serde(default)]
    pub discovery_type: i64,
}

/// Empty success body.
#[derive(Debug, Default, Serialize)]
pub struct Empty {}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(rename = "Err")]
    pub err: String,
}

fn parse_cidr(field: &str, value: &str) -> LanyardResult<IpNet> {
    value
        .parse()
        .map_err(|e| LanyardError::bad_options(format!("{field} {value:?}: {e}")))
}
