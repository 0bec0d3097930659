// ABOUTME: Readiness probe for sandbox dev servers
// ABOUTME: Polls the published port over HTTP with exponential backoff until a deadline

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{Result, SandboxError};

const INITIAL_BACKOFF: Duration = Duration::from_millis(250);
const MAX_BACKOFF: Duration = Duration::from_secs(5);
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(2);

/// Waits until something answers HTTP on a host port.
///
/// Any response, whatever its status, counts as ready: dev servers commonly
/// answer 404 or redirect on `/` while compiling. A bare TCP accept does not
/// count because the engine's port proxy accepts before the server listens.
#[derive(Debug, Clone)]
pub struct ReadinessProbe {
    client: reqwest::Client,
    host: String,
    deadline: Duration,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl ReadinessProbe {
    pub fn new(host: impl Into<String>, deadline: Duration) -> Self {
        let client = match reqwest::Client::builder().timeout(ATTEMPT_TIMEOUT).build() {
            Ok(client) => client,
            Err(e) => {
                warn!("Failed to build readiness client, using defaults: {}", e);
                reqwest::Client::new()
            }
        };

        Self {
            client,
            host: host.into(),
            deadline,
            initial_backoff: INITIAL_BACKOFF,
            max_backoff: MAX_BACKOFF,
        }
    }

    /// Override the backoff bounds
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max.max(initial);
        self
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Poll `port` until it answers or the deadline passes
    pub async fn wait_ready(&self, port: u16) -> Result<()> {
        let url = format!("http://{}:{}/", self.host, port);
        let started = Instant::now();
        let mut backoff = self.initial_backoff;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.client.get(&url).timeout(ATTEMPT_TIMEOUT).send().await {
                Ok(response) => {
                    debug!(
                        "Readiness probe for {} answered {} after {} attempts",
                        url,
                        response.status(),
                        attempt
                    );
                    return Ok(());
                }
                Err(e) => debug!("Readiness probe attempt {} for {}: {}", attempt, url, e),
            }

            let elapsed = started.elapsed();
            if elapsed >= self.deadline {
                return Err(SandboxError::ReadinessTimeout {
                    port,
                    seconds: self.deadline.as_secs(),
                });
            }

            let remaining = self.deadline - elapsed;
            tokio::time::sleep(backoff.min(remaining)).await;
            backoff = (backoff * 2).min(self.max_backoff);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn serve_not_found(listener: TcpListener) {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                    .await;
            });
        }
    }

    #[tokio::test]
    async fn test_any_http_response_is_ready() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(serve_not_found(listener));

        let probe = ReadinessProbe::new("127.0.0.1", Duration::from_secs(5));
        probe.wait_ready(port).await.unwrap();
    }

    #[tokio::test]
    async fn test_server_starting_late_is_detected() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
            serve_not_found(listener).await;
        });

        let probe = ReadinessProbe::new("127.0.0.1", Duration::from_secs(10))
            .with_backoff(Duration::from_millis(50), Duration::from_millis(200));
        probe.wait_ready(port).await.unwrap();
    }

    #[tokio::test]
    async fn test_deadline_expiry_is_readiness_timeout() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let probe = ReadinessProbe::new("127.0.0.1", Duration::from_millis(300))
            .with_backoff(Duration::from_millis(50), Duration::from_millis(100));
        let result = probe.wait_ready(port).await;

        assert!(matches!(
            result,
            Err(SandboxError::ReadinessTimeout { port: p, .. }) if p == port
        ));
    }
}
