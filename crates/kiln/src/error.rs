//! Error types shared across the pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while resolving, building, loading or driving a compiled model.
#[derive(Debug, Error)]
pub enum KilnError {
    /// The requested model key is not in the registry.
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    /// Configuration that cannot be used, such as a zero token budget.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An external tool exited unsuccessfully.
    #[error("{tool} failed with exit code {code:?}: {stderr}")]
    ToolFailed {
        /// Name of the tool that was invoked.
        tool: String,
        /// Exit code, if the process exited normally.
        code: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },

    /// An artifact that should exist after a pipeline step is missing.
    #[error("Missing artifact: {}", .0.display())]
    MissingArtifact(PathBuf),

    /// A call into the loaded runtime module failed.
    #[error("Runtime call `{function}` failed: {message}")]
    Runtime {
        /// Entry point that was invoked.
        function: &'static str,
        /// Message reported by the runtime.
        message: String,
    },

    /// The runtime host sent something that does not follow the protocol.
    #[error("Runtime protocol error: {0}")]
    Protocol(String),

    /// Tokenizer load, encode or decode failure.
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, KilnError>;
