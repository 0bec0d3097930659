// ABOUTME: Entry point tying port allocation, materialization, provisioning and teardown together
// ABOUTME: The HTTP layer talks only to SandboxManager

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::ContainerEngine;
use crate::error::{IoOp, Result, SandboxError};
use crate::orchestrator::{Orchestrator, ProvisionRequest};
use crate::port::PortAllocator;
use crate::probe::ReadinessProbe;
use crate::reaper::Reaper;
use crate::registry::SandboxStore;
use crate::settings::ProvisionSettings;
use crate::status::SandboxStatus;
use crate::types::SandboxRecord;
use crate::workspace::SandboxWorkspace;

/// Creates sandboxes and serves their status and files
pub struct SandboxManager {
    store: Arc<dyn SandboxStore>,
    workspace: SandboxWorkspace,
    ports: Arc<PortAllocator>,
    orchestrator: Arc<Orchestrator>,
    reaper: Arc<Reaper>,
}

impl SandboxManager {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        store: Arc<dyn SandboxStore>,
        workspace: SandboxWorkspace,
        settings: ProvisionSettings,
    ) -> Self {
        let orchestrator = Orchestrator::new(engine.clone(), store.clone(), settings);
        Self::assemble(engine, store, workspace, orchestrator)
    }

    /// Same as [`SandboxManager::new`] with a custom readiness probe
    pub fn with_probe(
        engine: Arc<dyn ContainerEngine>,
        store: Arc<dyn SandboxStore>,
        workspace: SandboxWorkspace,
        settings: ProvisionSettings,
        probe: ReadinessProbe,
    ) -> Self {
        let orchestrator =
            Orchestrator::new(engine.clone(), store.clone(), settings).with_probe(probe);
        Self::assemble(engine, store, workspace, orchestrator)
    }

    fn assemble(
        engine: Arc<dyn ContainerEngine>,
        store: Arc<dyn SandboxStore>,
        workspace: SandboxWorkspace,
        orchestrator: Orchestrator,
    ) -> Self {
        let orchestrator = Arc::new(orchestrator);
        let ports = Arc::new(PortAllocator::new());
        let reaper = Arc::new(Reaper::new(
            engine,
            store.clone(),
            workspace.clone(),
            orchestrator.clone(),
            ports.clone(),
        ));

        Self {
            store,
            workspace,
            ports,
            orchestrator,
            reaper,
        }
    }

    /// Create a sandbox from a file map and start provisioning it.
    ///
    /// Returns once the tree is on disk and the record is registered; the
    /// container comes up in the background.
    pub async fn create(&self, files: HashMap<String, String>) -> Result<SandboxRecord> {
        if files.is_empty() {
            return Err(SandboxError::InvalidRequest(
                "Files are required".to_string(),
            ));
        }

        let sandbox_id = Uuid::new_v4().to_string();
        let port = self.ports.allocate()?;

        let host_path = match self.materialize(&sandbox_id, &files).await {
            Ok(path) => path,
            Err(e) => {
                self.ports.release(port);
                return Err(e);
            }
        };

        let record = SandboxRecord::new(sandbox_id.clone(), port);
        if !self.store.insert_new(record.clone()).await {
            self.ports.release(port);
            return Err(SandboxError::InvalidRequest(format!(
                "sandbox id {} is already registered",
                sandbox_id
            )));
        }

        self.orchestrator.spawn(ProvisionRequest {
            sandbox_id: sandbox_id.clone(),
            host_path,
            port,
            listen_port: record.listen_port,
        });

        info!(
            "Created sandbox {} with {} files on port {}",
            sandbox_id,
            files.len(),
            port
        );
        Ok(record)
    }

    /// Write the tree and return its absolute path; a partial tree is removed on failure
    async fn materialize(
        &self,
        sandbox_id: &str,
        files: &HashMap<String, String>,
    ) -> Result<std::path::PathBuf> {
        let result = async {
            self.workspace.materialize(sandbox_id, files).await?;
            let sandbox_dir = self.workspace.sandbox_dir(sandbox_id)?;
            tokio::fs::canonicalize(&sandbox_dir)
                .await
                .map_err(|e| SandboxError::io(IoOp::Read, &sandbox_dir, e))
        }
        .await;

        if result.is_err() {
            if let Err(cleanup) = self.workspace.remove(sandbox_id).await {
                warn!(
                    "Failed to remove partial tree for sandbox {}: {}",
                    sandbox_id, cleanup
                );
            }
        }
        result
    }

    pub async fn get(&self, sandbox_id: &str) -> Option<SandboxRecord> {
        self.store.get(sandbox_id).await
    }

    pub async fn status(&self, sandbox_id: &str) -> SandboxStatus {
        SandboxStatus::from_record(self.store.get(sandbox_id).await.as_ref())
    }

    pub async fn read_file(&self, sandbox_id: &str, file_path: &str) -> Result<String> {
        self.require(sandbox_id).await?;
        self.workspace.read_file(sandbox_id, file_path).await
    }

    pub async fn write_file(&self, sandbox_id: &str, file_path: &str, content: &str) -> Result<()> {
        self.require(sandbox_id).await?;
        self.workspace
            .write_file(sandbox_id, file_path, content)
            .await
    }

    /// Create or overwrite several files of a live sandbox, creating directories as needed
    pub async fn apply_files(
        &self,
        sandbox_id: &str,
        files: &HashMap<String, String>,
    ) -> Result<usize> {
        self.require(sandbox_id).await?;
        if files.is_empty() {
            return Err(SandboxError::InvalidRequest(
                "Files are required".to_string(),
            ));
        }

        self.workspace.materialize(sandbox_id, files).await?;
        Ok(files.len())
    }

    pub async fn list_files(&self, sandbox_id: &str) -> Result<HashMap<String, String>> {
        self.require(sandbox_id).await?;
        self.workspace.list_project_files(sandbox_id).await
    }

    pub async fn teardown(&self, sandbox_id: &str) -> Result<SandboxRecord> {
        self.reaper.teardown(sandbox_id).await
    }

    /// Tear down every live sandbox, used on server shutdown
    pub async fn shutdown(&self) {
        let removed = self.reaper.teardown_all().await;
        info!("Shut down {} sandboxes", removed.len());
    }

    /// Start the periodic expiry sweep; `None` when `ttl` is zero
    pub fn start_reaper(&self, interval: Duration, ttl: Duration) -> Option<JoinHandle<()>> {
        Arc::clone(&self.reaper).start(interval, ttl)
    }

    async fn require(&self, sandbox_id: &str) -> Result<()> {
        match self.store.get(sandbox_id).await {
            Some(_) => Ok(()),
            None => Err(SandboxError::SandboxNotFound(sandbox_id.to_string())),
        }
    }
}
