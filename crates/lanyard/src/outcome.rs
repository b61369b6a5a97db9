//! Results of lifecycle operations with best-effort side effects.
//!
//! Route advertisement and interface cleanup never fail the operation that
//! triggers them. Their failures are collected as [`Degraded`] entries so
//! callers can tell a clean success from a degraded one.

use std::fmt;

use lanyard_network::IpNet;
use lanyard_network::RoutingBackend;

/// A secondary effect that failed while the operation itself succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Degraded {
    /// A subnet could not be announced.
    Advertise {
        /// The subnet.
        prefix: IpNet,
        /// Routing daemon error.
        error: String,
    },
    /// A subnet could not be retracted.
    Withdraw {
        /// The subnet.
        prefix: IpNet,
        /// Routing daemon error.
        error: String,
    },
    /// No routing session could be set up for the network's parent.
    MonitorStart {
        /// Requested backend.
        backend: RoutingBackend,
        /// Parent interface.
        host_iface: String,
        /// Setup error.
        error: String,
    },
    /// The endpoint's host-side interface could not be removed.
    InterfaceCleanup {
        /// Interface name.
        name: String,
        /// Removal error.
        error: String,
    },
}

impl fmt::Display for Degraded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Advertise { prefix, error } => write!(f, "advertise {prefix}: {error}"),
            Self::Withdraw { prefix, error } => write!(f, "withdraw {prefix}: {error}"),
            Self::MonitorStart {
                backend,
                host_iface,
                error,
            } => write!(f, "{backend} session on {host_iface}: {error}"),
            Self::InterfaceCleanup { name, error } => write!(f, "remove {name}: {error}"),
        }
    }
}

/// Value of a successful operation plus any degraded side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct Outcome<T> {
    /// Operation result.
    pub value: T,
    /// Side effects that failed.
    pub degraded: Vec<Degraded>,
}

impl<T> Outcome<T> {
    /// A clean outcome.
    pub const fn new(value: T) -> Self {
        Self {
            value,
            degraded: Vec::new(),
        }
    }

    /// Whether any side effect failed.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }

    /// Record a failed side effect.
    pub fn push(&mut self, degraded: Degraded) {
        self.degraded.push(degraded);
    }
}

impl Outcome<()> {
    /// A clean outcome without a value.
    pub const fn ok() -> Self {
        Self::new(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_and_degraded() {
        let mut outcome = Outcome::ok();
        assert!(!outcome.is_degraded());
        outcome.push(Degraded::Withdraw {
            prefix: "10.0.0.0/24".parse().unwrap(),
            error: "connection refused".to_string(),
        });
        assert!(outcome.is_degraded());
        assert_eq!(
            outcome.degraded[0].to_string(),
            "withdraw 10.0.0.0/24: connection refused"
        );
    }
}
