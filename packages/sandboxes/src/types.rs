// ABOUTME: Core type definitions for sandbox provisioning
// ABOUTME: Defines the per-sandbox registry record and its lifecycle phases

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Provisioning phase of a sandbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxPhase {
    /// Record registered, pipeline not yet running
    Created,
    /// Inspecting or pulling the container image
    ImageResolving,
    /// Creating and starting the container
    Starting,
    /// Running the dependency install command
    InstallingDeps,
    /// Dev server launched, waiting for it to accept requests
    LaunchingServer,
    /// Dev server confirmed reachable
    Ready,
    /// Provisioning failed
    Errored,
    /// Torn down by the reaper
    Stopped,
}

impl SandboxPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SandboxPhase::Created => "created",
            SandboxPhase::ImageResolving => "image_resolving",
            SandboxPhase::Starting => "starting",
            SandboxPhase::InstallingDeps => "installing_deps",
            SandboxPhase::LaunchingServer => "launching_server",
            SandboxPhase::Ready => "ready",
            SandboxPhase::Errored => "errored",
            SandboxPhase::Stopped => "stopped",
        }
    }

    /// Whether the pipeline can no longer advance from this phase
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SandboxPhase::Ready | SandboxPhase::Errored | SandboxPhase::Stopped
        )
    }
}

impl fmt::Display for SandboxPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry record, one per sandbox id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxRecord {
    pub id: String,
    /// Host port reserved for this sandbox
    pub port: u16,
    /// Port the dev server listens on inside the container
    pub listen_port: u16,
    pub phase: SandboxPhase,
    pub is_server_ready: bool,
    pub has_error: bool,
    pub error_message: Option<String>,
    pub container_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SandboxRecord {
    /// New pending record; the dev server is expected on the same port inside the container
    pub fn new(id: impl Into<String>, port: u16) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            port,
            listen_port: port,
            phase: SandboxPhase::Created,
            is_server_ready: false,
            has_error: false,
            error_message: None,
            container_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn server_url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }

    /// Record an unrecoverable failure.
    ///
    /// `is_server_ready` is forced so pollers leave the progress state.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.phase = SandboxPhase::Errored;
        self.has_error = true;
        self.is_server_ready = true;
        self.error_message = Some(message.into());
    }
}
