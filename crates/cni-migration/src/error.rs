//! Error types for the migration CLI

use cni_migration_common::Error as CommonError;

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
///
/// Step failures carry the global step ordinal so the operator can resume
/// with the right `-N` flag.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Common(#[from] CommonError),

    #[error("invalid step selection: {message}")]
    Selection { message: String },

    #[error("invalid pipeline: {message}")]
    Pipeline { message: String },

    #[error("step {index} ({name}) failed: {source}")]
    StepFailed {
        index: usize,
        name: &'static str,
        #[source]
        source: CommonError,
    },

    #[error("step {index} ({name}) not ready")]
    StepNotReady { index: usize, name: &'static str },

    #[error("step {index} ({name}) run failed: {source}")]
    StepRun {
        index: usize,
        name: &'static str,
        #[source]
        source: CommonError,
    },

    #[error("invalid log level '{level}': {message}")]
    LogLevel { level: String, message: String },
}

impl Error {
    pub fn selection(message: impl Into<String>) -> Self {
        Error::Selection {
            message: message.into(),
        }
    }

    pub fn pipeline(message: impl Into<String>) -> Self {
        Error::Pipeline {
            message: message.into(),
        }
    }

    /// Global ordinal of the failing step, if the error came from one
    pub fn step_index(&self) -> Option<usize> {
        match self {
            Error::StepFailed { index, .. }
            | Error::StepNotReady { index, .. }
            | Error::StepRun { index, .. } => Some(*index),
            _ => None,
        }
    }
}
