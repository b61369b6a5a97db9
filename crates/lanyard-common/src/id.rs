//! Network and endpoint identifier validation.
//!
//! Ids are opaque strings handed over by the orchestration runtime. They
//! are validated once at the driver boundary so the rest of the driver can
//! treat them as trusted keys.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{LanyardError, LanyardResult};

/// Maximum length of a network or endpoint id.
pub const MAX_ID_LENGTH: usize = 128;

fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_LENGTH
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $error:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Create a new id, validating the format.
            ///
            /// # Errors
            ///
            /// Returns an error if the id is empty, too long, or contains
            /// characters outside `[A-Za-z0-9._-]`.
            pub fn new(id: impl Into<String>) -> LanyardResult<Self> {
                let id = id.into();
                if !is_valid_id(&id) {
                    return Err(LanyardError::$error { id });
                }
                Ok(Self(id))
            }

            /// Get the id as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = LanyardError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = LanyardError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::new(s)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id!(
    /// A validated network id.
    NetworkId,
    InvalidNetworkId
);

define_id!(
    /// A validated endpoint id.
    EndpointId,
    InvalidEndpointId
);

/// Validate a network/endpoint id pair in one step.
///
/// # Errors
///
/// Returns the error for whichever id is invalid, network first.
pub fn validate_ids(nid: &str, eid: &str) -> LanyardResult<(NetworkId, EndpointId)> {
    Ok((NetworkId::new(nid)?, EndpointId::new(eid)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn valid_ids() {
        assert!(NetworkId::new("n1").is_ok());
        assert!(NetworkId::new("3f1c9a0e5b7d").is_ok());
        assert!(EndpointId::new("ep_1.a-b").is_ok());
    }

    #[test]
    fn invalid_ids() {
        assert!(matches!(
            NetworkId::new(""),
            Err(LanyardError::InvalidNetworkId { .. })
        ));
        assert!(matches!(
            EndpointId::new("has space"),
            Err(LanyardError::InvalidEndpointId { .. })
        ));
        assert!(NetworkId::new("a".repeat(MAX_ID_LENGTH + 1)).is_err());
    }

    #[test]
    fn validate_pair_reports_network_first() {
        assert!(matches!(
            validate_ids("", ""),
            Err(LanyardError::InvalidNetworkId { .. })
        ));
        assert!(matches!(
            validate_ids("n1", ""),
            Err(LanyardError::InvalidEndpointId { .. })
        ));
    }

    #[test]
    fn serde_rejects_invalid() {
        let ok: NetworkId = serde_json::from_str("\"n1\"").unwrap();
        assert_eq!(ok.as_str(), "n1");
        assert!(serde_json::from_str::<NetworkId>("\"\"").is_err());
    }

    proptest! {
        #[test]
        fn accepts_charset(id in "[A-Za-z0-9._-]{1,128}") {
            prop_assert!(NetworkId::new(id).is_ok());
        }
    }
}
