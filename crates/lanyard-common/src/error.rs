//! Common error types for the lanyard driver.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`LanyardError`].
pub type LanyardResult<T> = Result<T, LanyardError>;

/// Broad failure classes reported to the orchestration runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed ids, missing mandatory options, unrecognized option shapes.
    InvalidInput,
    /// MTU, subnet or gateway invariants violated.
    ConfigurationInvalid,
    /// Unknown network, endpoint or host interface.
    NotFound,
    /// The request collides with existing state.
    ResourceConflict,
    /// The kernel refused to create a network device.
    DeviceCreation,
    /// The routing daemon rejected or could not be reached.
    RoutingPlane,
    /// The host lacks a required kernel feature.
    HostEnvironment,
    /// Anything else.
    Internal,
}

/// Errors produced by the driver and its collaborators.
#[derive(Error, Diagnostic, Debug)]
pub enum LanyardError {
    /// Network id rejected.
    #[error("Invalid network id: {id:?}")]
    #[diagnostic(
        code(lanyard::network::invalid_id),
        help("Network ids must be 1-128 characters of [A-Za-z0-9._-]")
    )]
    InvalidNetworkId {
        /// The rejected id.
        id: String,
    },

    /// Endpoint id rejected.
    #[error("Invalid endpoint id: {id:?}")]
    #[diagnostic(
        code(lanyard::endpoint::invalid_id),
        help("Endpoint ids must be 1-128 characters of [A-Za-z0-9._-]")
    )]
    InvalidEndpointId {
        /// The rejected id.
        id: String,
    },

    /// No parent interface was given for a new network.
    #[error("{driver} requires an interface from the host to be specified")]
    #[diagnostic(
        code(lanyard::config::missing_host_iface),
        help("Pass the parent interface as a driver option, for example -o host_iface=eth0")
    )]
    MissingHostInterface {
        /// Driver type name.
        driver: &'static str,
    },

    /// Options blob has a shape the parser does not understand.
    #[error("Bad network options: {message}")]
    #[diagnostic(code(lanyard::config::bad_options))]
    BadOptions {
        /// What was wrong.
        message: String,
    },

    /// Mode name outside the driver's vocabulary.
    #[error("Unsupported {driver} mode: {mode}")]
    #[diagnostic(code(lanyard::config::unsupported_mode))]
    UnsupportedMode {
        /// Driver type name.
        driver: &'static str,
        /// The rejected mode.
        mode: String,
    },

    /// Routing backend name not known to this build.
    #[error("Unknown routing manager: {name}")]
    #[diagnostic(
        code(lanyard::config::unknown_routing_manager),
        help("Known routing managers: gobgp")
    )]
    UnknownRoutingBackend {
        /// The rejected backend name.
        name: String,
    },

    /// Endpoint creation without an address.
    #[error("Create endpoint {endpoint} was not passed an interface IP address")]
    #[diagnostic(code(lanyard::endpoint::missing_address))]
    MissingAddress {
        /// Endpoint id.
        endpoint: String,
    },

    /// MTU below zero.
    #[error("Invalid MTU number: {mtu}")]
    #[diagnostic(code(lanyard::config::invalid_mtu))]
    InvalidMtu {
        /// The rejected value.
        mtu: i32,
    },

    /// Container subnet not a subset of the network address range.
    #[error("Container subnet must be a subset of the network address range")]
    #[diagnostic(code(lanyard::config::invalid_container_subnet))]
    InvalidContainerSubnet,

    /// Default gateway outside its subnet.
    #[error("Default gateway must be inside the corresponding subnet")]
    #[diagnostic(code(lanyard::config::invalid_gateway))]
    InvalidGateway,

    /// Network id not registered.
    #[error("Network not found: {id}")]
    #[diagnostic(code(lanyard::network::not_found))]
    NetworkNotFound {
        /// Network id.
        id: String,
    },

    /// Endpoint id not registered in its network.
    #[error("Endpoint not found: {id}")]
    #[diagnostic(code(lanyard::endpoint::not_found))]
    EndpointNotFound {
        /// Endpoint id.
        id: String,
    },

    /// Host interface lookup failed.
    #[error("The requested interface [ {name} ] was not found on the host")]
    #[diagnostic(code(lanyard::link::not_found))]
    InterfaceNotFound {
        /// Interface name.
        name: String,
    },

    /// Network id already registered.
    #[error("Network already exists: {id}")]
    #[diagnostic(code(lanyard::network::exists))]
    NetworkExists {
        /// Network id.
        id: String,
    },

    /// Endpoint id already registered.
    #[error("Endpoint already exists: {id}")]
    #[diagnostic(code(lanyard::endpoint::exists))]
    EndpointExists {
        /// Endpoint id.
        id: String,
    },

    /// Join on an endpoint that already has a sandbox.
    #[error("Endpoint {id} is already joined to a sandbox")]
    #[diagnostic(code(lanyard::endpoint::already_joined))]
    EndpointAlreadyJoined {
        /// Endpoint id.
        id: String,
    },

    /// Address does not fall inside any subnet of the network.
    #[error("No matching subnet for IP {address} in network {network}")]
    #[diagnostic(code(lanyard::endpoint::no_matching_subnet))]
    NoMatchingSubnet {
        /// The offending address.
        address: String,
        /// Network id.
        network: String,
    },

    /// New network overlaps an existing one on the same parent interface.
    #[error("Network {network} conflicts with existing network {existing} on {host_iface}")]
    #[diagnostic(code(lanyard::network::conflict))]
    ConfigConflict {
        /// The network being created.
        network: String,
        /// The network it overlaps.
        existing: String,
        /// Shared parent interface.
        host_iface: String,
    },

    /// Kernel refused the new device.
    #[error("Error creating {kind} link {name}: {message}")]
    #[diagnostic(
        code(lanyard::link::create_failed),
        help(
            "Ensure there are no stale links on the parent interface and remove them with \
             'ip link del <name>'"
        )
    )]
    DeviceCreation {
        /// Link type.
        kind: &'static str,
        /// Requested device name.
        name: String,
        /// Underlying OS error.
        message: String,
    },

    /// Every generated interface name was already taken.
    #[error("Could not generate a free interface name with prefix {prefix}")]
    #[diagnostic(code(lanyard::link::name_exhausted))]
    InterfaceNameExhausted {
        /// Name prefix.
        prefix: String,
    },

    /// Netlink request failed.
    #[error("Netlink error: {message}")]
    #[diagnostic(code(lanyard::netlink))]
    Netlink {
        /// Underlying error text.
        message: String,
    },

    /// Routing daemon failure.
    #[error("Routing manager {backend} failed: {message}")]
    #[diagnostic(code(lanyard::routing))]
    Routing {
        /// Backend name.
        backend: &'static str,
        /// What went wrong.
        message: String,
    },

    /// Required kernel module missing.
    #[error("Kernel module {module} is not available")]
    #[diagnostic(
        code(lanyard::kernel_support),
        help("Load the module with 'modprobe' or run on a kernel built with it")
    )]
    KernelSupport {
        /// Module name.
        module: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(lanyard::io))]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(lanyard::serialization))]
    Serialization(String),

    /// Internal error (should not happen).
    #[error("Internal error: {message}")]
    #[diagnostic(code(lanyard::internal))]
    Internal {
        /// The error message.
        message: String,
    },
}

impl LanyardError {
    /// Classify the error into the failure classes the runtime sees.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidNetworkId { .. }
            | Self::InvalidEndpointId { .. }
            | Self::MissingHostInterface { .. }
            | Self::BadOptions { .. }
            | Self::UnsupportedMode { .. }
            | Self::UnknownRoutingBackend { .. }
            | Self::MissingAddress { .. }
            | Self::Serialization(_) => ErrorKind::InvalidInput,
            Self::InvalidMtu { .. } | Self::InvalidContainerSubnet | Self::InvalidGateway => {
                ErrorKind::ConfigurationInvalid
            }
            Self::NetworkNotFound { .. }
            | Self::EndpointNotFound { .. }
            | Self::InterfaceNotFound { .. } => ErrorKind::NotFound,
            Self::NetworkExists { .. }
            | Self::EndpointExists { .. }
            | Self::EndpointAlreadyJoined { .. }
            | Self::NoMatchingSubnet { .. }
            | Self::ConfigConflict { .. } => ErrorKind::ResourceConflict,
            Self::DeviceCreation { .. }
            | Self::InterfaceNameExhausted { .. }
            | Self::Netlink { .. } => ErrorKind::DeviceCreation,
            Self::Routing { .. } => ErrorKind::RoutingPlane,
            Self::KernelSupport { .. } => ErrorKind::HostEnvironment,
            Self::Io(_) | Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Shorthand for [`LanyardError::BadOptions`].
    pub fn bad_options(message: impl Into<String>) -> Self {
        Self::BadOptions {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for LanyardError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
