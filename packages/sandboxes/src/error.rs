// ABOUTME: Error types for sandbox provisioning and file access
// ABOUTME: Covers port allocation, image pulls, container start, exec phases, and workspace IO

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::engine::EngineError;

/// Exec phase a command failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecPhase {
    Install,
    DevServer,
}

impl fmt::Display for ExecPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecPhase::Install => write!(f, "install"),
            ExecPhase::DevServer => write!(f, "devserver"),
        }
    }
}

/// Filesystem operation that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    Mkdir,
    Read,
    Write,
    Remove,
}

impl fmt::Display for IoOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoOp::Mkdir => write!(f, "mkdir"),
            IoOp::Read => write!(f, "read"),
            IoOp::Write => write!(f, "write"),
            IoOp::Remove => write!(f, "remove"),
        }
    }
}

/// Main error type for sandbox operations
#[derive(Error, Debug)]
pub enum SandboxError {
    /// The OS could not hand out a free port
    #[error("No free port available: {0}")]
    PortExhausted(String),

    /// Image could neither be found locally nor pulled
    #[error("Failed to pull image: {0}")]
    ImagePullFailure(String),

    /// Container could not be created or started
    #[error("Container failed to start: {0}")]
    ContainerStartFailure(String),

    /// A command executed inside the container failed
    #[error("{phase} command failed: {message}")]
    ExecFailure { phase: ExecPhase, message: String },

    /// Dev server never accepted requests before the deadline
    #[error("Dev server on port {port} did not become ready within {seconds} seconds")]
    ReadinessTimeout { port: u16, seconds: u64 },

    /// Filesystem failure inside a sandbox tree
    #[error("I/O error during {op} on {}: {source}", path.display())]
    Io {
        op: IoOp,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No registry record for this id
    #[error("Sandbox not found: {0}")]
    SandboxNotFound(String),

    /// Requested file does not exist in the sandbox tree
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Path is empty or escapes the sandbox root
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Request rejected before any work was done
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Container engine failure outside a specific phase
    #[error("Container engine error: {0}")]
    Engine(#[from] EngineError),

    /// Provisioning was cancelled by teardown
    #[error("Provisioning cancelled: {0}")]
    Cancelled(String),
}

impl SandboxError {
    pub(crate) fn io(op: IoOp, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SandboxError::Io {
            op,
            path: path.into(),
            source,
        }
    }

    /// Message recorded on a failed sandbox.
    ///
    /// Phase failures surface the underlying engine text unchanged so polling
    /// clients see what the engine reported.
    pub fn detail(&self) -> String {
        match self {
            SandboxError::ImagePullFailure(message)
            | SandboxError::ContainerStartFailure(message) => message.clone(),
            SandboxError::ExecFailure { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Type alias for Results that return SandboxError
pub type Result<T> = std::result::Result<T, SandboxError>;
