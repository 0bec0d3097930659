// ABOUTME: Test helpers for sandbox provisioning
// ABOUTME: In-memory container engine with scripted outcomes, plus polling and HTTP stub helpers

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::engine::{
    ContainerEngine, ContainerSpec, EngineError, ExecCommand, ExecSession, OutputChunk,
    Result as EngineResult,
};
use crate::registry::SandboxStore;
use crate::types::SandboxRecord;

/// Call received by [`FakeEngine`]
#[derive(Debug, Clone)]
pub enum EngineCall {
    ImageExists(String),
    Pull(String),
    Create(ContainerSpec),
    Start(String),
    Exec(ExecCommand),
    Stop(String),
    Remove(String),
}

#[derive(Default)]
struct Script {
    image_missing: bool,
    pull_error: Option<String>,
    start_error: Option<String>,
    install_exit_code: i64,
    install_output: Vec<String>,
    install_stream_error: Option<String>,
    dev_server_error: Option<String>,
    remove_error: Option<String>,
}

/// Container engine that never touches Docker.
///
/// The first exec of a container is treated as the install command and
/// completes immediately (unless held); the second is the dev server and
/// runs until the test ends.
pub struct FakeEngine {
    script: Script,
    install_gate: Option<Arc<Notify>>,
    calls: Mutex<Vec<EngineCall>>,
    exit_codes: Mutex<HashMap<String, Option<i64>>>,
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            script: Script {
                install_output: vec!["added 312 packages in 4s".to_string()],
                ..Default::default()
            },
            install_gate: None,
            calls: Mutex::new(Vec::new()),
            exit_codes: Mutex::new(HashMap::new()),
        }
    }

    /// Image is absent locally and the pull fails with `message`
    pub fn with_pull_error(mut self, message: &str) -> Self {
        self.script.image_missing = true;
        self.script.pull_error = Some(message.to_string());
        self
    }

    /// Image is absent locally and the pull succeeds
    pub fn with_missing_image(mut self) -> Self {
        self.script.image_missing = true;
        self
    }

    pub fn with_start_error(mut self, message: &str) -> Self {
        self.script.start_error = Some(message.to_string());
        self
    }

    pub fn with_install_exit_code(mut self, code: i64, last_line: &str) -> Self {
        self.script.install_exit_code = code;
        self.script.install_output = vec![last_line.to_string()];
        self
    }

    pub fn with_install_stream_error(mut self, message: &str) -> Self {
        self.script.install_stream_error = Some(message.to_string());
        self
    }

    pub fn with_dev_server_error(mut self, message: &str) -> Self {
        self.script.dev_server_error = Some(message.to_string());
        self
    }

    pub fn with_remove_error(mut self, message: &str) -> Self {
        self.script.remove_error = Some(message.to_string());
        self
    }

    /// Install output stays open until [`FakeEngine::release_install`]
    pub fn hold_install(mut self) -> Self {
        self.install_gate = Some(Arc::new(Notify::new()));
        self
    }

    pub fn release_install(&self) {
        if let Some(gate) = &self.install_gate {
            gate.notify_one();
        }
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.lock_calls().clone()
    }

    pub fn created_specs(&self) -> Vec<ContainerSpec> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                EngineCall::Create(spec) => Some(spec),
                _ => None,
            })
            .collect()
    }

    pub fn exec_commands(&self) -> Vec<ExecCommand> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                EngineCall::Exec(command) => Some(command),
                _ => None,
            })
            .collect()
    }

    pub fn removed_containers(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                EngineCall::Remove(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: EngineCall) {
        self.lock_calls().push(call);
    }

    fn lock_calls(&self) -> std::sync::MutexGuard<'_, Vec<EngineCall>> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn install_session(&self, exec_id: String) -> ExecSession {
        let mut items: Vec<EngineResult<OutputChunk>> = self
            .script
            .install_output
            .iter()
            .map(|line| Ok(OutputChunk::stdout(format!("{}\n", line))))
            .collect();
        if let Some(message) = &self.script.install_stream_error {
            items.push(Err(EngineError::ExecError(message.clone())));
        }

        let gate = self.install_gate.clone();
        let output = futures::stream::once(async move {
            if let Some(gate) = gate {
                gate.notified().await;
            }
            futures::stream::iter(items)
        })
        .flatten()
        .boxed();

        ExecSession {
            id: exec_id,
            output,
        }
    }

    fn dev_server_session(&self, exec_id: String) -> ExecSession {
        let output = match &self.script.dev_server_error {
            Some(message) => futures::stream::iter(vec![
                Ok(OutputChunk::stdout("> next dev\n")),
                Err(EngineError::ExecError(message.clone())),
            ])
            .boxed(),
            None => futures::stream::pending().boxed(),
        };

        ExecSession {
            id: exec_id,
            output,
        }
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn image_exists(&self, image: &str) -> EngineResult<bool> {
        self.record(EngineCall::ImageExists(image.to_string()));
        Ok(!self.script.image_missing)
    }

    async fn pull_image(&self, image: &str) -> EngineResult<()> {
        self.record(EngineCall::Pull(image.to_string()));
        match &self.script.pull_error {
            Some(message) => Err(EngineError::ImageError(message.clone())),
            None => Ok(()),
        }
    }

    async fn create_container(&self, spec: &ContainerSpec) -> EngineResult<String> {
        self.record(EngineCall::Create(spec.clone()));
        let created = self
            .calls()
            .iter()
            .filter(|call| matches!(call, EngineCall::Create(_)))
            .count();
        Ok(format!("container-{}", created))
    }

    async fn start_container(&self, container_id: &str) -> EngineResult<()> {
        self.record(EngineCall::Start(container_id.to_string()));
        match &self.script.start_error {
            Some(message) => Err(EngineError::ContainerError(message.clone())),
            None => Ok(()),
        }
    }

    async fn exec(&self, container_id: &str, command: &ExecCommand) -> EngineResult<ExecSession> {
        self.record(EngineCall::Exec(command.clone()));

        let mut exit_codes = self.exit_codes.lock().unwrap_or_else(|p| p.into_inner());
        let exec_id = format!("{}-exec-{}", container_id, exit_codes.len() + 1);
        let is_install = !exit_codes
            .keys()
            .any(|id| id.starts_with(&format!("{}-exec-", container_id)));

        if is_install {
            exit_codes.insert(exec_id.clone(), Some(self.script.install_exit_code));
            Ok(self.install_session(exec_id))
        } else {
            exit_codes.insert(exec_id.clone(), None);
            Ok(self.dev_server_session(exec_id))
        }
    }

    async fn exec_exit_code(&self, exec_id: &str) -> EngineResult<Option<i64>> {
        let exit_codes = self.exit_codes.lock().unwrap_or_else(|p| p.into_inner());
        exit_codes
            .get(exec_id)
            .copied()
            .ok_or_else(|| EngineError::ExecError(format!("no such exec: {}", exec_id)))
    }

    async fn stop_container(&self, container_id: &str, _timeout_secs: u64) -> EngineResult<()> {
        self.record(EngineCall::Stop(container_id.to_string()));
        Ok(())
    }

    async fn remove_container(&self, container_id: &str, _force: bool) -> EngineResult<()> {
        self.record(EngineCall::Remove(container_id.to_string()));
        match &self.script.remove_error {
            Some(message) => Err(EngineError::ContainerError(message.clone())),
            None => Ok(()),
        }
    }
}

/// Poll the store until `predicate` holds for the record, panicking after 10 seconds
pub async fn wait_for_record<F>(store: &dyn SandboxStore, sandbox_id: &str, predicate: F) -> SandboxRecord
where
    F: Fn(&SandboxRecord) -> bool,
{
    wait_for_record_within(store, sandbox_id, Duration::from_secs(10), predicate).await
}

pub async fn wait_for_record_within<F>(
    store: &dyn SandboxStore,
    sandbox_id: &str,
    timeout: Duration,
    predicate: F,
) -> SandboxRecord
where
    F: Fn(&SandboxRecord) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(record) = store.get(sandbox_id).await {
            if predicate(&record) {
                return record;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            panic!(
                "sandbox {} never reached the expected state: {:?}",
                sandbox_id,
                store.get(sandbox_id).await
            );
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Answer every HTTP request on `127.0.0.1:port` with an empty 200, standing in for a dev server
pub async fn serve_http_stub(port: u16) -> std::io::Result<JoinHandle<()>> {
    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    Ok(tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                    .await;
            });
        }
    }))
}
