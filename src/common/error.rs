//! Error types for the stress test manager
//!
//! Every error belongs to one [`ErrorClass`]. Configuration and transport
//! errors are scoped to a single participant and never stop the run; only
//! fatal errors abort it.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// How an error propagates through a test run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad or incomplete participant configuration; that participant fails
    Configuration,
    /// Remote session could not be started or talked to
    Transport,
    /// A launch task died or was cancelled
    Orchestration,
    /// The whole run cannot continue
    Fatal,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Transport => write!(f, "transport"),
            Self::Orchestration => write!(f, "orchestration"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// Main error type for the stress test manager
#[derive(Error, Debug)]
pub enum Error {
    // === Configuration Errors ===
    #[error("Client {client}: {what} has unexpanded macros: {value}")]
    UnexpandedMacros {
        client: String,
        what: String,
        value: String,
    },

    #[error("Client {client}: TEST_HOST not specified")]
    MissingHost { client: String },

    #[error("Client {client}: launcher command is empty")]
    MissingLauncher { client: String },

    #[error("Client {client}: invalid {key} '{value}', expected a non-negative number")]
    InvalidNumber {
        client: String,
        key: String,
        value: String,
    },

    #[error("Unknown participant '{0}'. Expected a <name>.env file under the test directory")]
    UnknownClient(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === Transport Errors ===
    #[error("Client {client}: failed to start remote session on {host}: {source}")]
    SpawnFailed {
        client: String,
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("Client {client}: remote session error: {message}")]
    Communication { client: String, message: String },

    #[error("Remote kill on {host} failed: {message}")]
    RemoteKillFailed { host: String, message: String },

    #[error("Remote shell '{0}' not found in PATH")]
    RemoteShellNotFound(String),

    // === Orchestration Errors ===
    #[error("Client {0}: launch cancelled")]
    Cancelled(String),

    #[error("Client {client}: launch task failed: {message}")]
    TaskFailed { client: String, message: String },

    // === Fatal Errors ===
    #[error("Test directory not found: {}", .0.display())]
    TestRootNotFound(PathBuf),

    #[error("Test directory {} defines no clients or servers", .0.display())]
    NoParticipants(PathBuf),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    #[error("Failed to write file '{path}': {error}")]
    FileWrite { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Classify this error for propagation decisions
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::UnexpandedMacros { .. }
            | Error::MissingHost { .. }
            | Error::MissingLauncher { .. }
            | Error::InvalidNumber { .. }
            | Error::UnknownClient(_)
            | Error::Config(_)
            | Error::ConfigParse(_) => ErrorClass::Configuration,

            Error::SpawnFailed { .. }
            | Error::Communication { .. }
            | Error::RemoteKillFailed { .. }
            | Error::RemoteShellNotFound(_) => ErrorClass::Transport,

            Error::Cancelled(_) | Error::TaskFailed { .. } => ErrorClass::Orchestration,

            Error::TestRootNotFound(_)
            | Error::NoParticipants(_)
            | Error::Io(_)
            | Error::FileRead { .. }
            | Error::FileWrite { .. }
            | Error::Json(_)
            | Error::Internal(_) => ErrorClass::Fatal,
        }
    }

    /// Create an invalid number error for a client config key
    pub fn invalid_number(client: &str, key: &str, value: &str) -> Self {
        Self::InvalidNumber {
            client: client.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    /// Create an unexpanded macros error
    pub fn unexpanded(client: &str, what: &str, value: &str) -> Self {
        Self::UnexpandedMacros {
            client: client.to_string(),
            what: what.to_string(),
            value: value.to_string(),
        }
    }

    /// Create a communication error
    pub fn communication(client: &str, message: impl Into<String>) -> Self {
        Self::Communication {
            client: client.to_string(),
            message: message.into(),
        }
    }

    /// Create a file write error
    pub fn file_write(path: &std::path::Path, error: impl std::fmt::Display) -> Self {
        Self::FileWrite {
            path: path.display().to_string(),
            error: error.to_string(),
        }
    }
}
