//! Unified error handling for the planflow library
//!
//! Each concern owns a typed error (`EngineError`, `ToolError`, `CollaboratorError`,
//! `TransitionError`, `ConfigError`); this module holds the crate-wide error that
//! host-facing APIs such as the run registry return, plus the checkpoint storage errors.

use crate::config::ConfigError;
use crate::workflow::{EngineError, RunId};
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the planflow library
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PlanflowError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_yaml::Error),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Checkpoint storage failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A workflow engine operation failed
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// No run is registered or checkpointed under the identifier
    #[error("Run not found: {0}")]
    RunNotFound(String),

    /// Other errors
    #[error("{0}")]
    Other(String),

    /// Generic error with context
    #[error("{message}")]
    Context {
        /// What was being attempted
        message: String,
        /// The underlying failure
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl PlanflowError {
    /// Returns the engine error when this wraps one
    pub fn as_engine_error(&self) -> Option<&EngineError> {
        match self {
            PlanflowError::Engine(e) => Some(e),
            _ => None,
        }
    }
}

/// Checkpoint storage errors
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// No checkpoint exists for the run
    #[error("No checkpoint stored for run '{run_id}'")]
    NotFound {
        /// Run the lookup was for
        run_id: RunId,
    },

    /// A checkpoint arrived with a sequence that is not newer than the stored one
    #[error("Stale checkpoint for run '{run_id}': stored sequence {stored}, attempted {attempted}")]
    StaleCheckpoint {
        /// Run the write was for
        run_id: RunId,
        /// Sequence already persisted
        stored: u64,
        /// Sequence of the rejected write
        attempted: u64,
    },

    /// Invalid storage path
    #[error("Invalid storage path: {path}")]
    InvalidPath {
        /// Offending path
        path: PathBuf,
    },

    /// IO error while reading or writing a checkpoint
    #[error("Checkpoint IO error: {0}")]
    Io(#[from] io::Error),

    /// Checkpoint could not be encoded or decoded
    #[error("Checkpoint encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for planflow operations
pub type Result<T> = std::result::Result<T, PlanflowError>;

/// Extension trait for adding context to errors
pub trait ErrorContext<T> {
    /// Add context to an error
    fn context<S: Into<String>>(self, msg: S) -> Result<T>;

    /// Add context with a closure that's only called on error
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context<S: Into<String>>(self, msg: S) -> Result<T> {
        self.map_err(|e| PlanflowError::Context {
            message: msg.into(),
            source: Box::new(e),
        })
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| PlanflowError::Context {
            message: f().into(),
            source: Box::new(e),
        })
    }
}

/// Error chain formatter for detailed error reporting
pub struct ErrorChain<'a>(&'a dyn std::error::Error);

impl<'a> fmt::Display for ErrorChain<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Error: {}", self.0)?;

        let mut current = self.0.source();
        let mut level = 1;

        while let Some(err) = current {
            writeln!(f, "{:indent$}Caused by: {}", "", err, indent = level * 2)?;
            current = err.source();
            level += 1;
        }

        Ok(())
    }
}

/// Extension trait for error types to format the full error chain
pub trait ErrorChainExt {
    /// Format the full error chain
    fn error_chain(&self) -> ErrorChain<'_>;
}

impl<E: std::error::Error> ErrorChainExt for E {
    fn error_chain(&self) -> ErrorChain<'_> {
        ErrorChain(self)
    }
}
