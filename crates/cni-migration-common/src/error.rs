//! Error types shared by the migration steps and their Kubernetes plumbing
//!
//! Errors are structured with fields so the orchestrator can wrap them with
//! the step index and still print a single descriptive line.

use std::path::PathBuf;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for cluster inspection and mutation
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Migration config file could not be read, parsed or validated
    #[error("config error in {}: {message}", path.display())]
    Config {
        /// Path of the config file
        path: PathBuf,
        /// Description of what's invalid
        message: String,
    },

    /// Helm invocation failed
    #[error("helm error [{context}]: {message}")]
    Helm {
        /// Helm operation that failed (e.g., "status", "upgrade")
        context: String,
        /// Description of what failed
        message: String,
    },

    /// knet-stress connectivity check failed
    #[error("connectivity check failed: {message}")]
    Connectivity {
        /// Description of which pods are unhealthy
        message: String,
    },

    /// A blocking wait was interrupted by the operator
    #[error("operation cancelled [{context}]")]
    Cancelled {
        /// What was being waited on
        context: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "wait_for_rollout")
        context: String,
    },
}

impl Error {
    /// Create a config error for the given file
    pub fn config(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::Config {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create a helm error with the failing operation as context
    pub fn helm(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Helm {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Create a connectivity error
    pub fn connectivity(msg: impl Into<String>) -> Self {
        Self::Connectivity {
            message: msg.into(),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(context: impl Into<String>) -> Self {
        Self::Cancelled {
            context: context.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Whether this error is a Kubernetes 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Kube { source: kube::Error::Api(e) } if e.code == 404)
    }

    /// Whether retrying the same request may succeed (throttling, server errors)
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Kube { source: kube::Error::Api(e) } if e.code == 429 || e.code >= 500)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_names_the_file() {
        let err = Error::config("/etc/migration.yaml", "missing field `labels`");
        assert_eq!(
            err.to_string(),
            "config error in /etc/migration.yaml: missing field `labels`"
        );
    }

    #[test]
    fn internal_error_without_context_uses_unknown() {
        let err = Error::internal("boom");
        assert_eq!(err.to_string(), "internal error [unknown]: boom");
    }

    #[test]
    fn helm_error_carries_operation() {
        let err = Error::helm("upgrade", "release is locked");
        assert_eq!(err.to_string(), "helm error [upgrade]: release is locked");
    }

    #[test]
    fn only_api_404_is_not_found() {
        let not_found = Error::Kube {
            source: kube::Error::Api(kube::error::ErrorResponse {
                status: "Failure".to_string(),
                message: "daemonsets.apps \"aws-node\" not found".to_string(),
                reason: "NotFound".to_string(),
                code: 404,
            }),
        };
        assert!(not_found.is_not_found());

        let forbidden = Error::Kube {
            source: kube::Error::Api(kube::error::ErrorResponse {
                status: "Failure".to_string(),
                message: "forbidden".to_string(),
                reason: "Forbidden".to_string(),
                code: 403,
            }),
        };
        assert!(!forbidden.is_not_found());
        assert!(!Error::internal("x").is_not_found());
    }

    fn api_error(code: u16) -> Error {
        Error::Kube {
            source: kube::Error::Api(kube::error::ErrorResponse {
                status: "Failure".to_string(),
                message: format!("status {}", code),
                reason: String::new(),
                code,
            }),
        }
    }

    #[test]
    fn throttling_and_server_errors_are_transient() {
        assert!(api_error(429).is_transient());
        assert!(api_error(503).is_transient());
        assert!(!api_error(404).is_transient());
        assert!(!api_error(403).is_transient());
        assert!(!Error::internal("x").is_transient());
    }
}
