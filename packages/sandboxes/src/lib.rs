// ABOUTME: Sandbox lifecycle orchestration for previewbox
// ABOUTME: Materializes generated projects and runs their dev servers in Docker containers

pub mod engine;
pub mod error;
pub mod manager;
pub mod orchestrator;
pub mod port;
pub mod probe;
pub mod reaper;
pub mod registry;
pub mod settings;
pub mod status;
pub mod types;
pub mod workspace;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-export commonly used types
pub use engine::{ContainerEngine, DockerEngine, EngineError};
pub use error::{ExecPhase, IoOp, Result, SandboxError};
pub use manager::SandboxManager;
pub use orchestrator::{Orchestrator, ProvisionRequest};
pub use port::PortAllocator;
pub use probe::ReadinessProbe;
pub use reaper::Reaper;
pub use registry::{InMemorySandboxStore, SandboxStore};
pub use settings::{parse_command, ProvisionSettings};
pub use status::SandboxStatus;
pub use types::{SandboxPhase, SandboxRecord};
pub use workspace::SandboxWorkspace;
