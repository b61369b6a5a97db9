//! Driver types and their link modes.
//!
//! Both driver types share the same lifecycle; they differ only in the
//! link type created on the parent interface and in the mode vocabulary
//! accepted for it.

use std::fmt;
use std::str::FromStr;

use lanyard_common::{LanyardError, LanyardResult};
use serde::{Deserialize, Serialize};

/// Virtual link type created on the parent interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// Macvlan (MAC-based sub-interfaces).
    Macvlan,
    /// IPvlan (IP-based sub-interfaces).
    Ipvlan,
}

impl DriverKind {
    /// Driver type name, also the kernel module name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Macvlan => "macvlan",
            Self::Ipvlan => "ipvlan",
        }
    }

    /// Option key selecting the link mode, e.g. `ipvlan_mode`.
    #[must_use]
    pub const fn mode_option(&self) -> &'static str {
        match self {
            Self::Macvlan => "macvlan_mode",
            Self::Ipvlan => "ipvlan_mode",
        }
    }

    /// Mode used when the network options name none.
    #[must_use]
    pub const fn default_mode(&self) -> LinkMode {
        match self {
            Self::Macvlan => LinkMode::Macvlan(MacvlanMode::Bridge),
            Self::Ipvlan => LinkMode::Ipvlan(IpvlanMode::L2),
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DriverKind {
    type Err = LanyardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "macvlan" => Ok(Self::Macvlan),
            "ipvlan" => Ok(Self::Ipvlan),
            other => Err(LanyardError::bad_options(format!(
                "unknown driver type: {other}"
            ))),
        }
    }
}

/// Macvlan mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MacvlanMode {
    /// Bridge mode (endpoints on one parent can talk directly).
    Bridge,
    /// Private mode (isolated from each other).
    Private,
    /// VEPA mode (requires a reflective external switch).
    Vepa,
    /// Passthrough mode (single endpoint per parent).
    Passthru,
}

impl MacvlanMode {
    /// Mode name as used in network options.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Bridge => "bridge",
            Self::Private => "private",
            Self::Vepa => "vepa",
            Self::Passthru => "passthru",
        }
    }
}

/// IPvlan mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpvlanMode {
    /// L2 mode (bridged, shares the parent's broadcast domain).
    L2,
    /// L3 mode (routed through the parent).
    L3,
}

impl IpvlanMode {
    /// Mode name as used in network options.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::L2 => "l2",
            Self::L3 => "l3",
        }
    }
}

/// A validated link mode for one driver type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkMode {
    /// Macvlan link.
    Macvlan(MacvlanMode),
    /// IPvlan link.
    Ipvlan(IpvlanMode),
}

impl LinkMode {
    /// Resolve a mode name for the given driver type.
    ///
    /// An empty name selects the driver's default mode.
    ///
    /// # Errors
    ///
    /// Returns [`LanyardError::UnsupportedMode`] for names outside the
    /// driver's vocabulary.
    pub fn parse(kind: DriverKind, mode: &str) -> LanyardResult<Self> {
        let parsed = match (kind, mode) {
            (_, "") => Some(kind.default_mode()),
            (DriverKind::Macvlan, "bridge") => Some(Self::Macvlan(MacvlanMode::Bridge)),
            (DriverKind::Macvlan, "private") => Some(Self::Macvlan(MacvlanMode::Private)),
            (DriverKind::Macvlan, "vepa") => Some(Self::Macvlan(MacvlanMode::Vepa)),
            (DriverKind::Macvlan, "passthru") => Some(Self::Macvlan(MacvlanMode::Passthru)),
            (DriverKind::Ipvlan, "l2") => Some(Self::Ipvlan(IpvlanMode::L2)),
            (DriverKind::Ipvlan, "l3") => Some(Self::Ipvlan(IpvlanMode::L3)),
            _ => None,
        };
        parsed.ok_or_else(|| LanyardError::UnsupportedMode {
            driver: kind.as_str(),
            mode: mode.to_string(),
        })
    }

    /// Driver type this mode belongs to.
    #[must_use]
    pub const fn kind(&self) -> DriverKind {
        match self {
            Self::Macvlan(_) => DriverKind::Macvlan,
            Self::Ipvlan(_) => DriverKind::Ipvlan,
        }
    }

    /// Mode name as used in network options.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Macvlan(m) => m.as_str(),
            Self::Ipvlan(m) => m.as_str(),
        }
    }

    /// Whether endpoint subnets are routed through the parent rather than
    /// bridged onto its link. Only routed networks advertise their subnets.
    #[must_use]
    pub const fn is_routed(&self) -> bool {
        matches!(self, Self::Ipvlan(IpvlanMode::L3))
    }
}

impl fmt::Display for LinkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_macvlan_mode() {
        assert_eq!(MacvlanMode::Bridge.as_str(), "bridge");
        assert_eq!(MacvlanMode::Private.as_str(), "private");
        assert_eq!(
            LinkMode::parse(DriverKind::Macvlan, "vepa").unwrap(),
            LinkMode::Macvlan(MacvlanMode::Vepa)
        );
    }

    #[test]
    fn test_ipvlan_mode() {
        assert_eq!(IpvlanMode::L2.as_str(), "l2");
        assert_eq!(IpvlanMode::L3.as_str(), "l3");
        assert!(LinkMode::parse(DriverKind::Ipvlan, "l3").unwrap().is_routed());
        assert!(!LinkMode::parse(DriverKind::Ipvlan, "l2").unwrap().is_routed());
    }

    #[test]
    fn empty_mode_is_default() {
        assert_eq!(
            LinkMode::parse(DriverKind::Macvlan, "").unwrap(),
            LinkMode::Macvlan(MacvlanMode::Bridge)
        );
        assert_eq!(
            LinkMode::parse(DriverKind::Ipvlan, "").unwrap(),
            LinkMode::Ipvlan(IpvlanMode::L2)
        );
    }

    #[test]
    fn modes_do_not_cross_driver_types() {
        let err = LinkMode::parse(DriverKind::Ipvlan, "bridge").unwrap_err();
        assert!(matches!(
            err,
            LanyardError::UnsupportedMode { driver: "ipvlan", .. }
        ));
        assert!(LinkMode::parse(DriverKind::Macvlan, "l3").is_err());
    }

    #[test]
    fn driver_kind_round_trip() {
        assert_eq!("ipvlan".parse::<DriverKind>().unwrap(), DriverKind::Ipvlan);
        assert_eq!(DriverKind::Macvlan.mode_option(), "macvlan_mode");
        assert!("bridge".parse::<DriverKind>().is_err());
    }
}
