//! Common types for cni-migration: errors, the migration config and Kubernetes helpers

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod kube_utils;

pub use config::Config;
pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
