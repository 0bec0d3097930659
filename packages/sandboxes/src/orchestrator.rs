// ABOUTME: Provisioning pipeline taking a sandbox from image resolution to a ready dev server
// ABOUTME: Runs one tracked, cancellable task per sandbox and records every outcome in the registry

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::{ContainerEngine, ContainerSpec, ExecCommand, ExecSession, OutputChunk};
use crate::error::{ExecPhase, Result, SandboxError};
use crate::probe::ReadinessProbe;
use crate::registry::SandboxStore;
use crate::settings::ProvisionSettings;
use crate::types::SandboxPhase;

/// Label marking containers owned by previewbox
pub const MANAGED_LABEL: &str = "previewbox.managed";
/// Label carrying the sandbox id
pub const SANDBOX_ID_LABEL: &str = "previewbox.sandbox_id";

/// Polls of the exec inspect endpoint after an output stream ends
const EXIT_CODE_POLLS: usize = 20;
const EXIT_CODE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Container name for a sandbox
pub fn container_name(sandbox_id: &str) -> String {
    format!("previewbox-{}", sandbox_id)
}

/// Everything the pipeline needs to provision one sandbox
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub sandbox_id: String,
    /// Absolute path of the materialized tree on the host
    pub host_path: PathBuf,
    /// Host port published for the dev server
    pub port: u16,
    /// Port the dev server listens on inside the container
    pub listen_port: u16,
}

/// Drives sandbox containers through the provisioning phases
pub struct Orchestrator {
    engine: Arc<dyn ContainerEngine>,
    store: Arc<dyn SandboxStore>,
    settings: ProvisionSettings,
    probe: ReadinessProbe,
    tasks: Mutex<HashMap<String, CancellationToken>>,
}

impl Orchestrator {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        store: Arc<dyn SandboxStore>,
        settings: ProvisionSettings,
    ) -> Self {
        let probe = ReadinessProbe::new(settings.probe_host.clone(), settings.probe_deadline);
        Self {
            engine,
            store,
            settings,
            probe,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the readiness probe
    pub fn with_probe(mut self, probe: ReadinessProbe) -> Self {
        self.probe = probe;
        self
    }

    pub fn settings(&self) -> &ProvisionSettings {
        &self.settings
    }

    /// Spawn the provisioning pipeline for a registered sandbox.
    ///
    /// Returns immediately. Failures are recorded on the sandbox record, never
    /// returned to the caller.
    pub fn spawn(self: &Arc<Self>, request: ProvisionRequest) {
        let token = CancellationToken::new();
        let mut tasks = self.lock_tasks();
        if let Some(previous) = tasks.insert(request.sandbox_id.clone(), token.clone()) {
            warn!(
                "Replacing in-flight pipeline for sandbox {}",
                request.sandbox_id
            );
            previous.cancel();
        }

        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let sandbox_id = request.sandbox_id.clone();
            let outcome = tokio::select! {
                _ = token.cancelled() => Err(SandboxError::Cancelled(sandbox_id.clone())),
                result = orchestrator.provision(&request, &token) => result,
            };

            match outcome {
                Ok(()) => {}
                Err(SandboxError::Cancelled(_)) => {
                    info!("Provisioning cancelled for sandbox {}", sandbox_id);
                }
                Err(e) => {
                    error!("Provisioning failed for sandbox {}: {}", sandbox_id, e);
                    let message = e.detail();
                    orchestrator
                        .store
                        .update(
                            &sandbox_id,
                            Box::new(move |record| {
                                // Keep the first reported failure
                                let message = match record.error_message.take() {
                                    Some(first) if record.has_error => first,
                                    _ => message,
                                };
                                record.fail(message);
                            }),
                        )
                        .await;
                }
            }
        });
    }

    /// Cancel the pipeline and dev-server watcher of a sandbox; returns false if none was tracked
    pub fn cancel(&self, sandbox_id: &str) -> bool {
        match self.lock_tasks().remove(sandbox_id) {
            Some(token) => {
                token.cancel();
                debug!("Cancelled tasks for sandbox {}", sandbox_id);
                true
            }
            None => false,
        }
    }

    pub fn is_tracked(&self, sandbox_id: &str) -> bool {
        self.lock_tasks().contains_key(sandbox_id)
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn provision(&self, request: &ProvisionRequest, token: &CancellationToken) -> Result<()> {
        let sandbox_id = request.sandbox_id.as_str();

        self.set_phase(sandbox_id, SandboxPhase::ImageResolving).await;
        self.resolve_image().await?;

        self.set_phase(sandbox_id, SandboxPhase::Starting).await;
        let container_id = self.start_container(request).await?;

        self.set_phase(sandbox_id, SandboxPhase::InstallingDeps).await;
        self.install_dependencies(sandbox_id, &container_id).await?;

        self.set_phase(sandbox_id, SandboxPhase::LaunchingServer).await;
        let dev_server_failed = self
            .launch_dev_server(request, &container_id, token.child_token())
            .await?;

        tokio::select! {
            result = self.probe.wait_ready(request.port) => result?,
            _ = dev_server_failed.cancelled() => {
                return Err(SandboxError::ExecFailure {
                    phase: ExecPhase::DevServer,
                    message: "dev server stopped before accepting requests".to_string(),
                });
            }
        }
        self.mark_ready(sandbox_id).await;
        Ok(())
    }

    async fn set_phase(&self, sandbox_id: &str, phase: SandboxPhase) {
        info!("Sandbox {} entering phase {}", sandbox_id, phase);
        self.store
            .update(sandbox_id, Box::new(move |record| record.phase = phase))
            .await;
    }

    async fn mark_ready(&self, sandbox_id: &str) {
        let updated = self
            .store
            .update(
                sandbox_id,
                Box::new(|record| {
                    // A dev server that already crashed stays failed
                    if !record.has_error {
                        record.phase = SandboxPhase::Ready;
                        record.is_server_ready = true;
                    }
                }),
            )
            .await;

        if let Some(record) = updated {
            if record.phase == SandboxPhase::Ready {
                info!(
                    "Sandbox {} server started successfully at {}",
                    sandbox_id,
                    record.server_url()
                );
            }
        }
    }

    async fn resolve_image(&self) -> Result<()> {
        let image = self.settings.image.as_str();

        let exists = self
            .engine
            .image_exists(image)
            .await
            .map_err(|e| SandboxError::ImagePullFailure(e.message()))?;
        if exists {
            debug!("Image {} found locally", image);
            return Ok(());
        }

        match tokio::time::timeout(self.settings.pull_timeout, self.engine.pull_image(image)).await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SandboxError::ImagePullFailure(e.message())),
            Err(_) => Err(SandboxError::ImagePullFailure(format!(
                "pull of {} timed out after {} seconds",
                image,
                self.settings.pull_timeout.as_secs()
            ))),
        }
    }

    async fn start_container(&self, request: &ProvisionRequest) -> Result<String> {
        let labels = HashMap::from([
            (MANAGED_LABEL.to_string(), "true".to_string()),
            (SANDBOX_ID_LABEL.to_string(), request.sandbox_id.clone()),
        ]);
        let keepalive = &self.settings.keepalive_command;

        let spec = ContainerSpec {
            name: container_name(&request.sandbox_id),
            image: self.settings.image.clone(),
            working_dir: self.settings.workdir.clone(),
            host_path: request.host_path.to_string_lossy().into_owned(),
            host_port: request.port,
            container_port: request.listen_port,
            command: (!keepalive.is_empty()).then(|| keepalive.clone()),
            labels,
        };

        let container_id = self
            .engine
            .create_container(&spec)
            .await
            .map_err(|e| SandboxError::ContainerStartFailure(e.message()))?;

        let recorded_id = container_id.clone();
        self.store
            .update(
                &request.sandbox_id,
                Box::new(move |record| record.container_id = Some(recorded_id)),
            )
            .await;

        self.engine
            .start_container(&container_id)
            .await
            .map_err(|e| SandboxError::ContainerStartFailure(e.message()))?;

        info!(
            "Container {} started for sandbox {} on port {}",
            container_id, request.sandbox_id, request.port
        );
        Ok(container_id)
    }

    async fn install_dependencies(&self, sandbox_id: &str, container_id: &str) -> Result<()> {
        let install_failure = |message: String| SandboxError::ExecFailure {
            phase: ExecPhase::Install,
            message,
        };

        let command = ExecCommand {
            cmd: self.settings.install_command.clone(),
            working_dir: Some(self.settings.workdir.clone()),
            env: HashMap::new(),
        };
        let session = self
            .engine
            .exec(container_id, &command)
            .await
            .map_err(|e| install_failure(e.message()))?;
        let exec_id = session.id.clone();

        let last_line = match tokio::time::timeout(
            self.settings.install_timeout,
            drain_output(sandbox_id, ExecPhase::Install, session),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(install_failure(format!(
                    "install timed out after {} seconds",
                    self.settings.install_timeout.as_secs()
                )))
            }
        };

        match wait_exit_code(self.engine.as_ref(), &exec_id).await {
            Ok(Some(0)) => {}
            Ok(Some(code)) => {
                let mut message = format!("install exited with code {}", code);
                if let Some(line) = last_line {
                    message.push_str(": ");
                    message.push_str(&line);
                }
                return Err(install_failure(message));
            }
            Ok(None) => warn!(
                "Install exit code for sandbox {} unavailable, assuming success",
                sandbox_id
            ),
            Err(e) => return Err(install_failure(e.message())),
        }

        info!("Dependencies installed for sandbox {}", sandbox_id);
        Ok(())
    }

    /// Start the dev server without waiting on it; its output is drained in the background.
    ///
    /// The returned token is cancelled if the dev server fails.
    async fn launch_dev_server(
        &self,
        request: &ProvisionRequest,
        container_id: &str,
        token: CancellationToken,
    ) -> Result<CancellationToken> {
        let command = ExecCommand {
            cmd: self.settings.dev_command.clone(),
            working_dir: Some(self.settings.workdir.clone()),
            env: HashMap::from([("PORT".to_string(), request.listen_port.to_string())]),
        };

        let session = self
            .engine
            .exec(container_id, &command)
            .await
            .map_err(|e| SandboxError::ExecFailure {
                phase: ExecPhase::DevServer,
                message: e.message(),
            })?;
        info!(
            "Dev server launched for sandbox {} (exec {})",
            request.sandbox_id, session.id
        );

        let failed = CancellationToken::new();
        let failed_signal = failed.clone();
        let engine = Arc::clone(&self.engine);
        let store = Arc::clone(&self.store);
        let sandbox_id = request.sandbox_id.clone();
        tokio::spawn(async move {
            let exec_id = session.id.clone();
            let outcome = tokio::select! {
                _ = token.cancelled() => return,
                result = drain_output(&sandbox_id, ExecPhase::DevServer, session) => result,
            };

            let failure = match outcome {
                Err(e) => Some(e.detail()),
                Ok(_) => match wait_exit_code(engine.as_ref(), &exec_id).await {
                    Ok(Some(0)) | Ok(None) => {
                        info!("Dev server for sandbox {} exited", sandbox_id);
                        None
                    }
                    Ok(Some(code)) => Some(format!("dev server exited with code {}", code)),
                    Err(e) => {
                        warn!(
                            "Could not inspect dev server exit for sandbox {}: {}",
                            sandbox_id, e
                        );
                        None
                    }
                },
            };

            if let Some(message) = failure {
                if token.is_cancelled() {
                    return;
                }
                error!("Dev server failed for sandbox {}: {}", sandbox_id, message);
                failed_signal.cancel();
                store
                    .update(
                        &sandbox_id,
                        Box::new(move |record| {
                            record.has_error = true;
                            record.phase = SandboxPhase::Errored;
                            record.error_message = Some(message);
                        }),
                    )
                    .await;
            }
        });

        Ok(failed)
    }
}

/// Log every output line at debug and return the last non-empty one
async fn drain_output(
    sandbox_id: &str,
    phase: ExecPhase,
    mut session: ExecSession,
) -> Result<Option<String>> {
    let mut last_line = None;

    while let Some(chunk) = session.output.next().await {
        let chunk: OutputChunk = chunk.map_err(|e| SandboxError::ExecFailure {
            phase,
            message: e.message(),
        })?;

        for line in String::from_utf8_lossy(&chunk.data).lines() {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            debug!("[{} {} {}] {}", sandbox_id, phase, chunk.stream.as_str(), line);
            last_line = Some(line.to_string());
        }
    }

    Ok(last_line)
}

/// The exec can still report running for a moment after its stream closes
async fn wait_exit_code(
    engine: &dyn ContainerEngine,
    exec_id: &str,
) -> std::result::Result<Option<i64>, crate::engine::EngineError> {
    for _ in 0..EXIT_CODE_POLLS {
        if let Some(code) = engine.exec_exit_code(exec_id).await? {
            return Ok(Some(code));
        }
        tokio::time::sleep(EXIT_CODE_POLL_INTERVAL).await;
    }
    Ok(None)
}
