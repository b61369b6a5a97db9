//! Per-network configuration.
//!
//! The runtime hands network options over as a JSON object. Driver specific
//! settings live under [`GENERIC_DATA`], either as a flat string map of
//! labels (`-o host_iface=eth0`) or as a structured configuration object.
//! Well-known runtime flags sit next to it at the top level.

use std::net::{Ipv4Addr, Ipv6Addr};

use lanyard_common::{LanyardError, LanyardResult};
use lanyard_network::routing::RoutingBackend;
use lanyard_network::{DriverKind, Ipv4Net, Ipv6Net, LinkMode};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Network options as delivered by the runtime.
pub type Options = Map<String, Value>;

/// Key holding driver specific options.
pub const GENERIC_DATA: &str = "com.docker.network.generic";

/// Key holding the runtime's IPv6 toggle.
pub const ENABLE_IPV6: &str = "com.docker.network.enable_ipv6";

/// Label naming the parent interface.
pub const HOST_IFACE_OPT: &str = "host_iface";

/// Label naming the routing manager backend.
pub const ROUTING_MANAGER_OPT: &str = "routing_manager";

/// Validated configuration of one network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfiguration {
    /// Parent interface on the host.
    pub host_iface: String,
    /// Link mode for endpoints of this network.
    pub mode: LinkMode,
    /// Network IPv4 range.
    pub address_ipv4: Option<Ipv4Net>,
    /// Network IPv6 range.
    pub address_ipv6: Option<Ipv6Net>,
    /// Restricted container IPv4 range, a subset of `address_ipv4`.
    pub fixed_cidr: Option<Ipv4Net>,
    /// Restricted container IPv6 range.
    pub fixed_cidr_v6: Option<Ipv6Net>,
    /// IPv6 enabled by the runtime.
    pub enable_ipv6: bool,
    /// Masquerade outbound traffic.
    pub enable_ip_masquerade: bool,
    /// Inter-container communication.
    pub enable_icc: bool,
    /// Link MTU, 0 for the parent's.
    pub mtu: i32,
    /// Default IPv4 gateway override.
    pub default_gateway_ipv4: Option<Ipv4Addr>,
    /// Default IPv6 gateway override.
    pub default_gateway_ipv6: Option<Ipv6Addr>,
    /// Routing daemon announcing the subnets of a routed network.
    pub routing_manager: Option<RoutingBackend>,
}

impl NetworkConfiguration {
    /// Empty configuration in the driver's default mode.
    #[must_use]
    pub const fn new(kind: DriverKind) -> Self {
        Self {
            host_iface: String::new(),
            mode: kind.default_mode(),
            address_ipv4: None,
            address_ipv6: None,
            fixed_cidr: None,
            fixed_cidr_v6: None,
            enable_ipv6: false,
            enable_ip_masquerade: false,
            enable_icc: false,
            mtu: 0,
            default_gateway_ipv4: None,
            default_gateway_ipv6: None,
            routing_manager: None,
        }
    }

    /// Parse and validate network options.
    ///
    /// Generic data is parsed first, then well-known top-level flags are
    /// applied on top of it.
    ///
    /// # Errors
    ///
    /// Returns [`LanyardError::BadOptions`] for option shapes the parser does
    /// not recognize, and any error from [`NetworkConfiguration::validate`].
    pub fn parse(kind: DriverKind, options: &Options) -> LanyardResult<Self> {
        let mut config = match options.get(GENERIC_DATA) {
            Some(Value::Null) | None => Self::new(kind),
            Some(generic) => Self::parse_generic(kind, generic)?,
        };

        if let Some(val) = options.get(ENABLE_IPV6) {
            config.enable_ipv6 = val.as_bool().ok_or_else(|| {
                LanyardError::bad_options(format!("{ENABLE_IPV6} must be a boolean, got {val}"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    fn parse_generic(kind: DriverKind, data: &Value) -> LanyardResult<Self> {
        match data {
            Value::Object(map) if !is_structured(map) => {
                let mut config = Self {
                    enable_icc: true,
                    enable_ip_masquerade: true,
                    ..Self::new(kind)
                };
                config.from_labels(kind, map)?;
                Ok(config)
            }
            Value::Object(_) => {
                let structured: StructuredConfig = serde_json::from_value(data.clone())
                    .map_err(|e| LanyardError::bad_options(e.to_string()))?;
                structured.into_config(kind)
            }
            other => Err(LanyardError::bad_options(format!(
                "do not recognize network configuration format: {}",
                json_type(other)
            ))),
        }
    }

    /// Bind the known labels; other labels are ignored.
    fn from_labels(&mut self, kind: DriverKind, labels: &Map<String, Value>) -> LanyardResult<()> {
        let known = [HOST_IFACE_OPT, ROUTING_MANAGER_OPT, kind.mode_option()];
        for (label, value) in labels {
            let label = label.as_str();
            if !known.contains(&label) {
                continue;
            }
            let Some(value) = value.as_str() else {
                return Err(LanyardError::bad_options(format!(
                    "failed to parse {label} value: {value} (expected a string)"
                )));
            };
            match label {
                HOST_IFACE_OPT => self.host_iface = value.to_string(),
                ROUTING_MANAGER_OPT => self.routing_manager = parse_routing_manager(value)?,
                _ => {
                    self.mode = LinkMode::parse(kind, value)?;
                    tracing::debug!(driver = %kind, mode = value, "Driver mode selected");
                }
            }
        }
        Ok(())
    }

    /// Check the invariants between the address fields.
    ///
    /// # Errors
    ///
    /// - [`LanyardError::InvalidMtu`] for a negative MTU
    /// - [`LanyardError::InvalidContainerSubnet`] if `fixed_cidr` is not a
    ///   subset of `address_ipv4`
    /// - [`LanyardError::InvalidGateway`] if a default gateway lies outside
    ///   its range
    pub fn validate(&self) -> LanyardResult<()> {
        if self.mtu < 0 {
            return Err(LanyardError::InvalidMtu { mtu: self.mtu });
        }

        if let Some(address) = self.address_ipv4 {
            if let Some(fixed) = self.fixed_cidr {
                if !address.contains(&fixed.network()) || address.prefix_len() > fixed.prefix_len()
                {
                    return Err(LanyardError::InvalidContainerSubnet);
                }
            }
            if let Some(gw) = self.default_gateway_ipv4 {
                if !address.contains(&gw) {
                    return Err(LanyardError::InvalidGateway);
                }
            }
        }

        if self.enable_ipv6 {
            if let Some(gw) = self.default_gateway_ipv6 {
                if !self.fixed_cidr_v6.is_some_and(|fixed| fixed.contains(&gw)) {
                    return Err(LanyardError::InvalidGateway);
                }
            }
        }
        Ok(())
    }

    /// Whether two configurations claim overlapping IPv4 ranges.
    #[must_use]
    pub fn conflicts_with(&self, other: &Self) -> bool {
        match (self.address_ipv4, other.address_ipv4) {
            (Some(a), Some(b)) => a.contains(&b.network()) || b.contains(&a.network()),
            _ => false,
        }
    }
}

fn parse_routing_manager(value: &str) -> LanyardResult<Option<RoutingBackend>> {
    if value.is_empty() {
        Ok(None)
    } else {
        value.parse().map(Some)
    }
}

// Field names of the structured form, aliases included.
const STRUCTURED_FIELDS: &[&str] = &[
    "AddressIPv4",
    "AddressIPv6",
    "FixedCIDR",
    "FixedCIDRv6",
    "EnableIPv6",
    "EnableIPMasquerade",
    "EnableICC",
    "Mtu",
    "DefaultGatewayIPv4",
    "DefaultGatewayIPv6",
    "HostIface",
    "Mode",
    "MacvlanMode",
    "IpvlanMode",
    "RoutingManager",
];

fn is_structured(map: &Map<String, Value>) -> bool {
    map.keys().any(|k| STRUCTURED_FIELDS.contains(&k.as_str()))
}

const fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StructuredConfig {
    #[serde(rename = "AddressIPv4")]
    address_ipv4: Option<Ipv4Net>,
    #[serde(rename = "AddressIPv6")]
    address_ipv6: Option<Ipv6Net>,
    #[serde(rename = "FixedCIDR")]
    fixed_cidr: Option<Ipv4Net>,
    #[serde(rename = "FixedCIDRv6")]
    fixed_cidr_v6: Option<Ipv6Net>,
    #[serde(rename = "EnableIPv6", default)]
    enable_ipv6: bool,
    #[serde(rename = "EnableIPMasquerade", default)]
    enable_ip_masquerade: bool,
    #[serde(rename = "EnableICC", default)]
    enable_icc: bool,
    #[serde(default)]
    mtu: i32,
    #[serde(rename = "DefaultGatewayIPv4")]
    default_gateway_ipv4: Option<Ipv4Addr>,
    #[serde(rename = "DefaultGatewayIPv6")]
    default_gateway_ipv6: Option<Ipv6Addr>,
    #[serde(default)]
    host_iface: String,
    #[serde(default, alias = "MacvlanMode", alias = "IpvlanMode")]
    mode: String,
    #[serde(default)]
    routing_manager: String,
}

impl StructuredConfig {
    fn into_config(self, kind: DriverKind) -> LanyardResult<NetworkConfiguration> {
        Ok(NetworkConfiguration {
            host_iface: self.host_iface,
            mode: LinkMode::parse(kind, &self.mode)?,
            address_ipv4: self.address_ipv4,
            address_ipv6: self.address_ipv6,
            fixed_cidr: self.fixed_cidr,
            fixed_cidr_v6: self.fixed_cidr_v6,
            enable_ipv6: self.enable_ipv6,
            enable_ip_masquerade: self.enable_ip_masquerade,
            enable_icc: self.enable_icc,
            mtu: self.mtu,
            default_gateway_ipv4: self.default_gateway_ipv4,
            default_gateway_ipv6: self.default_gateway_ipv6,
            routing_manager: parse_routing_manager(&self.routing_manager)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanyard_common::ErrorKind;
    use lanyard_network::subnet::has_overlap;
    use lanyard_network::{IpvlanMode, MacvlanMode, Subnet};
    use proptest::prelude::*;
    use serde_json::json;

    fn options(value: Value) -> Options {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn base() -> NetworkConfiguration {
        NetworkConfiguration {
            host_iface: "eth0".to_string(),
            ..NetworkConfiguration::new(DriverKind::Ipvlan)
        }
    }

    #[test]
    fn labels() {
        let opts = options(json!({
            GENERIC_DATA: {
                "host_iface": "eth1",
                "ipvlan_mode": "l3",
                "routing_manager": "gobgp",
                "unrelated": "ignored"
            },
            ENABLE_IPV6: true
        }));
        let config = NetworkConfiguration::parse(DriverKind::Ipvlan, &opts).unwrap();
        assert_eq!(config.host_iface, "eth1");
        assert_eq!(config.mode, LinkMode::Ipvlan(IpvlanMode::L3));
        assert_eq!(config.routing_manager, Some(RoutingBackend::Gobgp));
        assert!(config.enable_ipv6);
        assert!(config.enable_icc);
        assert!(config.enable_ip_masquerade);
    }

    #[test]
    fn mode_label_is_per_driver() {
        let opts = options(json!({
            GENERIC_DATA: { "host_iface": "eth0", "ipvlan_mode": "l3" }
        }));
        // An ipvlan mode label means nothing to macvlan
        let config = NetworkConfiguration::parse(DriverKind::Macvlan, &opts).unwrap();
        assert_eq!(config.mode, LinkMode::Macvlan(MacvlanMode::Bridge));
    }

    #[test]
    fn unsupported_mode() {
        let opts = options(json!({
            GENERIC_DATA: { "host_iface": "eth0", "macvlan_mode": "l9" }
        }));
        let err = NetworkConfiguration::parse(DriverKind::Macvlan, &opts).unwrap_err();
        assert!(matches!(err, LanyardError::UnsupportedMode { .. }));
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn unknown_routing_manager_is_an_error() {
        let opts = options(json!({
            GENERIC_DATA: { "host_iface": "eth0", "routing_manager": "bird" }
        }));
        let err = NetworkConfiguration::parse(DriverKind::Ipvlan, &opts).unwrap_err();
        assert!(matches!(err, LanyardError::UnknownRoutingBackend { .. }));
    }

    #[test]
    fn structured() {
        let opts = options(json!({
            GENERIC_DATA: {
                "HostIface": "eth0",
                "Mode": "private",
                "AddressIPv4": "10.0.0.0/16",
                "FixedCIDR": "10.0.1.0/24",
                "DefaultGatewayIPv4": "10.0.0.1",
                "Mtu": 1400
            }
        }));
        let config = NetworkConfiguration::parse(DriverKind::Macvlan, &opts).unwrap();
        assert_eq!(config.mode, LinkMode::Macvlan(MacvlanMode::Private));
        assert_eq!(config.mtu, 1400);
        assert_eq!(config.fixed_cidr, Some("10.0.1.0/24".parse().unwrap()));
        assert!(!config.enable_icc);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let opts = options(json!({
            GENERIC_DATA: { "host_iface": "eth0", "Vendor.Tag": "x", "foo": 1, "bar": null }
        }));
        let config = NetworkConfiguration::parse(DriverKind::Ipvlan, &opts).unwrap();
        assert_eq!(config.host_iface, "eth0");
        assert!(config.enable_icc);

        let opts = options(json!({
            GENERIC_DATA: { "HostIface": "eth0", "IpvlanMode": "l3", "Bogus": 1 }
        }));
        let config = NetworkConfiguration::parse(DriverKind::Ipvlan, &opts).unwrap();
        assert_eq!(config.host_iface, "eth0");
        assert_eq!(config.mode, LinkMode::Ipvlan(IpvlanMode::L3));
        assert!(!config.enable_icc);
    }

    #[test]
    fn unrecognized_shapes() {
        for generic in [json!("host_iface=eth0"), json!(["eth0"]), json!(7)] {
            let opts = options(json!({ GENERIC_DATA: generic }));
            let err = NetworkConfiguration::parse(DriverKind::Ipvlan, &opts).unwrap_err();
            assert!(matches!(err, LanyardError::BadOptions { .. }), "{err}");
        }
        let opts = options(json!({ GENERIC_DATA: { "HostIface": "eth0", "Mtu": "big" } }));
        assert!(NetworkConfiguration::parse(DriverKind::Ipvlan, &opts).is_err());
        let opts = options(json!({ GENERIC_DATA: { "host_iface": "eth0", "ipvlan_mode": 3 } }));
        assert!(NetworkConfiguration::parse(DriverKind::Ipvlan, &opts).is_err());
        let opts = options(json!({ ENABLE_IPV6: "yes" }));
        assert!(NetworkConfiguration::parse(DriverKind::Ipvlan, &opts).is_err());
    }

    #[test]
    fn missing_generic_data_is_empty() {
        let config = NetworkConfiguration::parse(DriverKind::Ipvlan, &Options::new()).unwrap();
        assert!(config.host_iface.is_empty());
    }

    #[test]
    fn negative_mtu() {
        let config = NetworkConfiguration {
            mtu: -1,
            ..base()
        };
        assert!(matches!(
            config.validate(),
            Err(LanyardError::InvalidMtu { mtu: -1 })
        ));
    }

    #[test]
    fn fixed_cidr_must_be_subset() {
        let outside = NetworkConfiguration {
            address_ipv4: Some("10.0.0.0/24".parse().unwrap()),
            fixed_cidr: Some("10.1.0.0/24".parse().unwrap()),
            ..base()
        };
        assert!(matches!(
            outside.validate(),
            Err(LanyardError::InvalidContainerSubnet)
        ));

        let wider = NetworkConfiguration {
            address_ipv4: Some("10.0.0.0/24".parse().unwrap()),
            fixed_cidr: Some("10.0.0.0/16".parse().unwrap()),
            ..base()
        };
        assert!(matches!(
            wider.validate(),
            Err(LanyardError::InvalidContainerSubnet)
        ));

        let inside = NetworkConfiguration {
            address_ipv4: Some("10.0.0.0/16".parse().unwrap()),
            fixed_cidr: Some("10.0.3.0/24".parse().unwrap()),
            ..base()
        };
        assert!(inside.validate().is_ok());
    }

    #[test]
    fn gateway_must_be_inside() {
        let config = NetworkConfiguration {
            address_ipv4: Some("10.0.0.0/24".parse().unwrap()),
            default_gateway_ipv4: Some("10.0.1.1".parse().unwrap()),
            ..base()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, LanyardError::InvalidGateway));
        assert_eq!(err.kind(), ErrorKind::ConfigurationInvalid);
    }

    #[test]
    fn ipv6_gateway_needs_fixed_cidr() {
        let mut config = NetworkConfiguration {
            enable_ipv6: true,
            default_gateway_ipv6: Some("fd00::1".parse().unwrap()),
            ..base()
        };
        assert!(matches!(config.validate(), Err(LanyardError::InvalidGateway)));
        config.fixed_cidr_v6 = Some("fd00::/64".parse().unwrap());
        assert!(config.validate().is_ok());
        config.enable_ipv6 = false;
        config.fixed_cidr_v6 = None;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn conflicts() {
        let a = NetworkConfiguration {
            address_ipv4: Some("10.0.0.0/16".parse().unwrap()),
            ..base()
        };
        let b = NetworkConfiguration {
            address_ipv4: Some("10.0.5.0/24".parse().unwrap()),
            ..base()
        };
        let c = NetworkConfiguration {
            address_ipv4: Some("10.1.0.0/24".parse().unwrap()),
            ..base()
        };
        assert!(a.conflicts_with(&b));
        assert!(b.conflicts_with(&a));
        assert!(!a.conflicts_with(&c));
        assert!(!a.conflicts_with(&base()));
    }

    proptest! {
        #[test]
        fn conflict_is_symmetric_overlap(
            a in any::<u32>(),
            a_len in 8u8..=30,
            b in any::<u32>(),
            b_len in 8u8..=30,
        ) {
            let net = |addr: u32, len| Ipv4Net::new(Ipv4Addr::from(addr), len).unwrap().trunc();
            let (a, b) = (net(a, a_len), net(b, b_len));
            let with = |range| NetworkConfiguration {
                address_ipv4: Some(range),
                ..base()
            };
            let forward = with(a).conflicts_with(&with(b));
            prop_assert_eq!(forward, with(b).conflicts_with(&with(a)));
            let subnets = [Subnet::new(a.into(), None), Subnet::new(b.into(), None)];
            prop_assert_eq!(forward, has_overlap(&subnets));
        }
    }
}
