// ABOUTME: Sandbox teardown and periodic expiry of old sandboxes
// ABOUTME: Removes the container, the on-disk tree and the registry record

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::engine::ContainerEngine;
use crate::error::{Result, SandboxError};
use crate::orchestrator::{container_name, Orchestrator};
use crate::port::PortAllocator;
use crate::registry::SandboxStore;
use crate::types::{SandboxPhase, SandboxRecord};
use crate::workspace::SandboxWorkspace;

/// Tears sandboxes down on request, on expiry and at shutdown
pub struct Reaper {
    engine: Arc<dyn ContainerEngine>,
    store: Arc<dyn SandboxStore>,
    workspace: SandboxWorkspace,
    orchestrator: Arc<Orchestrator>,
    ports: Arc<PortAllocator>,
}

impl Reaper {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        store: Arc<dyn SandboxStore>,
        workspace: SandboxWorkspace,
        orchestrator: Arc<Orchestrator>,
        ports: Arc<PortAllocator>,
    ) -> Self {
        Self {
            engine,
            store,
            workspace,
            orchestrator,
            ports,
        }
    }

    /// Tear one sandbox down.
    ///
    /// Cancels provisioning, stops and removes the container, deletes the
    /// tree and evicts the record. A container or tree that is already gone
    /// is not an error. If the container cannot be removed the record is
    /// kept and marked failed so the teardown can be retried and pollers
    /// stop waiting on it.
    pub async fn teardown(&self, sandbox_id: &str) -> Result<SandboxRecord> {
        let mut record = self
            .store
            .get(sandbox_id)
            .await
            .ok_or_else(|| SandboxError::SandboxNotFound(sandbox_id.to_string()))?;

        info!("Tearing down sandbox {}", sandbox_id);
        self.orchestrator.cancel(sandbox_id);

        // The name also covers a container created after the id was last recorded
        let container = record
            .container_id
            .clone()
            .unwrap_or_else(|| container_name(sandbox_id));
        let grace = self.orchestrator.settings().stop_grace_secs;

        if let Err(e) = self.engine.stop_container(&container, grace).await {
            warn!("Failed to stop container {}: {}", container, e);
        }
        if let Err(e) = self.engine.remove_container(&container, true).await {
            error!("Failed to remove container {}: {}", container, e);
            let message = format!("teardown failed: {}", e.message());
            self.store
                .update(sandbox_id, Box::new(move |record| record.fail(message)))
                .await;
            return Err(e.into());
        }

        self.workspace.remove(sandbox_id).await?;
        self.store.delete(sandbox_id).await;
        self.ports.release(record.port);

        record.phase = SandboxPhase::Stopped;
        info!("Sandbox {} torn down", sandbox_id);
        Ok(record)
    }

    /// Tear down every sandbox created more than `ttl` ago; returns the removed ids
    pub async fn sweep_expired(&self, ttl: Duration) -> Vec<String> {
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return Vec::new();
        };
        let cutoff = Utc::now() - ttl;

        let expired: Vec<String> = self
            .store
            .list()
            .await
            .into_iter()
            .filter(|record| record.created_at < cutoff)
            .map(|record| record.id)
            .collect();

        self.teardown_each(expired).await
    }

    /// Tear down every registered sandbox
    pub async fn teardown_all(&self) -> Vec<String> {
        let ids = self
            .store
            .list()
            .await
            .into_iter()
            .map(|record| record.id)
            .collect();
        self.teardown_each(ids).await
    }

    async fn teardown_each(&self, ids: Vec<String>) -> Vec<String> {
        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            match self.teardown(&id).await {
                Ok(_) => removed.push(id),
                // Removed concurrently by an explicit delete
                Err(SandboxError::SandboxNotFound(_)) => {}
                Err(e) => error!("Failed to tear down sandbox {}: {}", id, e),
            }
        }
        removed
    }

    /// Start the periodic expiry sweep.
    ///
    /// Returns `None` when `ttl` is zero. Errors are logged and never stop
    /// the loop.
    pub fn start(self: Arc<Self>, interval: Duration, ttl: Duration) -> Option<JoinHandle<()>> {
        if ttl.is_zero() {
            info!("Sandbox expiry disabled");
            return None;
        }

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            info!(
                "Started sandbox reaper (interval: {} minutes, ttl: {} minutes)",
                interval.as_secs() / 60,
                ttl.as_secs() / 60
            );

            loop {
                ticker.tick().await;

                let removed = self.sweep_expired(ttl).await;
                if removed.is_empty() {
                    debug!("Reaper sweep found no expired sandboxes");
                } else {
                    info!(
                        "Reaped {} expired sandboxes: {:?}",
                        removed.len(),
                        removed
                    );
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemorySandboxStore;
    use crate::settings::ProvisionSettings;
    use crate::status::SandboxStatus;
    use crate::testing::FakeEngine;
    use tempfile::TempDir;

    struct Fixture {
        engine: Arc<FakeEngine>,
        store: Arc<InMemorySandboxStore>,
        workspace: SandboxWorkspace,
        reaper: Reaper,
        _temp_dir: TempDir,
    }

    fn fixture(engine: FakeEngine) -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let engine = Arc::new(engine);
        let store = Arc::new(InMemorySandboxStore::new());
        let workspace = SandboxWorkspace::new(temp_dir.path());
        let orchestrator = Arc::new(Orchestrator::new(
            engine.clone(),
            store.clone(),
            ProvisionSettings::default(),
        ));
        let reaper = Reaper::new(
            engine.clone(),
            store.clone(),
            workspace.clone(),
            orchestrator,
            Arc::new(PortAllocator::new()),
        );

        Fixture {
            engine,
            store,
            workspace,
            reaper,
            _temp_dir: temp_dir,
        }
    }

    async fn seed(fixture: &Fixture, id: &str, age: chrono::Duration) {
        let files = std::collections::HashMap::from([("src/a.ts".to_string(), "a".to_string())]);
        fixture.workspace.materialize(id, &files).await.unwrap();

        let mut record = SandboxRecord::new(id, 4000);
        record.created_at = Utc::now() - age;
        record.container_id = Some(format!("container-{}", id));
        fixture.store.set(record).await;
    }

    #[tokio::test]
    async fn test_teardown_removes_container_tree_and_record() {
        let fixture = fixture(FakeEngine::new());
        seed(&fixture, "sbx", chrono::Duration::zero()).await;

        let record = fixture.reaper.teardown("sbx").await.unwrap();

        assert_eq!(record.phase, SandboxPhase::Stopped);
        assert!(fixture.store.get("sbx").await.is_none());
        assert!(!fixture.workspace.sandbox_dir("sbx").unwrap().exists());
        assert_eq!(fixture.engine.removed_containers(), vec!["container-sbx"]);
    }

    #[tokio::test]
    async fn test_teardown_without_container_uses_name() {
        let fixture = fixture(FakeEngine::new());
        fixture.store.set(SandboxRecord::new("sbx", 4000)).await;

        fixture.reaper.teardown("sbx").await.unwrap();
        assert_eq!(fixture.engine.removed_containers(), vec!["previewbox-sbx"]);
    }

    #[tokio::test]
    async fn test_teardown_unknown_sandbox() {
        let fixture = fixture(FakeEngine::new());
        let result = fixture.reaper.teardown("nope").await;
        assert!(matches!(result, Err(SandboxError::SandboxNotFound(_))));
    }

    #[tokio::test]
    async fn test_failed_container_removal_keeps_record() {
        let fixture = fixture(FakeEngine::new().with_remove_error("daemon unreachable"));
        seed(&fixture, "sbx", chrono::Duration::zero()).await;

        let result = fixture.reaper.teardown("sbx").await;
        assert!(matches!(result, Err(SandboxError::Engine(_))));
        assert!(fixture.workspace.sandbox_dir("sbx").unwrap().exists());

        let record = fixture.store.get("sbx").await.unwrap();
        assert_eq!(record.phase, SandboxPhase::Errored);
        assert_eq!(
            record.error_message.as_deref(),
            Some("teardown failed: daemon unreachable")
        );
        let status = SandboxStatus::from_record(Some(&record));
        assert_eq!(status.as_str(), "failed");
        assert_ne!(status, SandboxStatus::Progress);
    }

    #[tokio::test]
    async fn test_sweep_only_removes_expired() {
        let fixture = fixture(FakeEngine::new());
        seed(&fixture, "old", chrono::Duration::minutes(90)).await;
        seed(&fixture, "fresh", chrono::Duration::minutes(5)).await;

        let removed = fixture
            .reaper
            .sweep_expired(Duration::from_secs(60 * 60))
            .await;

        assert_eq!(removed, vec!["old".to_string()]);
        assert!(fixture.store.get("old").await.is_none());
        assert!(fixture.store.get("fresh").await.is_some());
    }

    #[tokio::test]
    async fn test_teardown_all() {
        let fixture = fixture(FakeEngine::new());
        seed(&fixture, "a", chrono::Duration::zero()).await;
        seed(&fixture, "b", chrono::Duration::zero()).await;

        let mut removed = fixture.reaper.teardown_all().await;
        removed.sort();
        assert_eq!(removed, vec!["a".to_string(), "b".to_string()]);
        assert!(fixture.store.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_zero_ttl_disables_loop() {
        let fixture = fixture(FakeEngine::new());
        let reaper = Arc::new(fixture.reaper);
        assert!(reaper
            .start(Duration::from_secs(300), Duration::ZERO)
            .is_none());
    }
}
