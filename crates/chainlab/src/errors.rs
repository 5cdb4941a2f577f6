//! Error types for tool provisioning and test-context orchestration

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while provisioning tools or orchestrating a test
/// session. Each variant maps to a different operator remedy: a missing tool
/// is installed, an exhausted port range is widened, a crashed server is
/// investigated.
#[derive(Debug, Error)]
pub enum SetupError {
    /// The tool distribution could not be downloaded or installed
    #[error("tool '{name}-{version}' is unavailable: {reason}")]
    ToolUnavailable {
        /// Tool name as it appears in the registry
        name: String,
        /// Requested version
        version: String,
        /// What went wrong (network failure, unexpected artifact, ...)
        reason: String,
    },

    /// Installation completed but the expected executable is missing
    #[error("tool '{name}-{version}' install is corrupt: expected executable at {path}")]
    ToolInstallCorrupt {
        /// Tool name as it appears in the registry
        name: String,
        /// Requested version
        version: String,
        /// Path where the executable was expected
        path: PathBuf,
    },

    /// Every port in the configured range is taken or unbindable
    #[error("no free port available in range [{lo}, {hi}]")]
    NoPortAvailable { lo: u16, hi: u16 },

    /// The configured port range is malformed
    #[error("invalid port range [{lo}, {hi}]")]
    InvalidPortRange { lo: u16, hi: u16 },

    /// The server process did not become ready in time
    #[error("server on port {port} did not become ready within {timeout:?}")]
    ServerStartTimeout { port: u16, timeout: Duration },

    /// The server process exited after reaching the ready state
    #[error("server at {endpoint} exited unexpectedly")]
    ServerCrashed { endpoint: String },

    /// A client can only be bound to a server in the ready state
    #[error("cannot bind client: server is {state}")]
    ClientBindError { state: String },

    /// The snapshot id was not issued by the current server, or was
    /// invalidated by a restart
    #[error("snapshot {id} is not valid on this server")]
    InvalidSnapshot { id: String },

    /// An operation was issued against a handle in the wrong state
    #[error("cannot {operation} while server is {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    /// Malformed configuration value (account string, path, ...)
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A compiled contract artifact could not be parsed
    #[error("malformed contract artifact {path}: {reason}")]
    BadArtifact { path: PathBuf, reason: String },

    /// RPC transport or protocol error
    #[error("rpc error: {0}")]
    Rpc(String),

    /// IO error occurred during file or process operations
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SetupError>;
