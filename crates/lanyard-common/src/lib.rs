//! # lanyard-common
//!
//! Shared types for the lanyard network driver.
//!
//! This crate provides functionality used across all lanyard crates:
//! - The common error type and its failure classification
//! - Validated network and endpoint identifiers
//! - Standard filesystem paths for the plugin socket

#![warn(missing_docs)]

pub mod error;
pub mod id;
pub mod paths;

pub use error::{ErrorKind, LanyardError, LanyardResult};
pub use id::{EndpointId, NetworkId};
pub use paths::PluginPaths;
