// ABOUTME: Container engine trait used by the orchestrator
// ABOUTME: Abstracts image resolution, container lifecycle and command execution

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;

pub mod docker;

pub use docker::DockerEngine;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Image error: {0}")]
    ImageError(String),

    #[error("Container error: {0}")]
    ContainerError(String),

    #[error("Exec error: {0}")]
    ExecError(String),
}

impl EngineError {
    /// Text reported by the engine, without the variant prefix
    pub fn message(&self) -> String {
        match self {
            EngineError::ConnectionError(message)
            | EngineError::ImageError(message)
            | EngineError::ContainerError(message)
            | EngineError::ExecError(message) => message.clone(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Container configuration for a sandbox
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// Project root inside the container
    pub working_dir: String,
    /// Sandbox tree on the host, bind-mounted read-write at `working_dir`
    pub host_path: String,
    pub host_port: u16,
    pub container_port: u16,
    /// Process keeping the container alive between execs
    pub command: Option<Vec<String>>,
    pub labels: HashMap<String, String>,
}

/// Command to run inside a started container
#[derive(Debug, Clone, Default)]
pub struct ExecCommand {
    pub cmd: Vec<String>,
    pub working_dir: Option<String>,
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StreamType {
    Stdout,
    Stderr,
}

impl StreamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamType::Stdout => "stdout",
            StreamType::Stderr => "stderr",
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutputChunk {
    pub stream: StreamType,
    pub data: Vec<u8>,
}

impl OutputChunk {
    pub fn stdout(data: impl Into<Vec<u8>>) -> Self {
        Self {
            stream: StreamType::Stdout,
            data: data.into(),
        }
    }

    pub fn stderr(data: impl Into<Vec<u8>>) -> Self {
        Self {
            stream: StreamType::Stderr,
            data: data.into(),
        }
    }
}

/// Combined stdout/stderr of an exec; ends when the process exits or the connection closes
pub type OutputStream = Pin<Box<dyn Stream<Item = Result<OutputChunk>> + Send>>;

/// A started exec whose output can be drained
pub struct ExecSession {
    pub id: String,
    pub output: OutputStream,
}

/// Engine able to run sandbox containers
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Check whether an image exists locally
    async fn image_exists(&self, image: &str) -> Result<bool>;

    /// Pull an image, returning once the pull stream completes
    async fn pull_image(&self, image: &str) -> Result<()>;

    /// Create a container without starting it
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    /// Start a created container
    async fn start_container(&self, container_id: &str) -> Result<()>;

    /// Start a command in a running container and attach to its output
    async fn exec(&self, container_id: &str, command: &ExecCommand) -> Result<ExecSession>;

    /// Exit code of a finished exec, `None` while it is still running
    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>>;

    /// Stop a container; an already stopped container is not an error
    async fn stop_container(&self, container_id: &str, timeout_secs: u64) -> Result<()>;

    /// Remove a container; an already removed container is not an error
    async fn remove_container(&self, container_id: &str, force: bool) -> Result<()>;
}
