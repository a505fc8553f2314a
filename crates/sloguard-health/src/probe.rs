//! HTTP readiness probes.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

/// Readiness check against a deployed service.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// `true` when `target` reports ready.
    async fn probe(&self, target: &str) -> bool;
}

/// Result of a single HTTP probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The endpoint returned 2xx.
    Healthy,
    /// The endpoint answered with a non-2xx status.
    Unhealthy,
    /// No answer: connection error or timeout.
    Failed,
}

impl ProbeResult {
    pub fn is_ready(&self) -> bool {
        matches!(self, ProbeResult::Healthy)
    }
}

/// GETs the target URL; ready on 2xx.
#[derive(Debug, Clone)]
pub struct HttpReadinessProbe {
    timeout: Duration,
}

impl Default for HttpReadinessProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl HttpReadinessProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl HealthProbe for HttpReadinessProbe {
    async fn probe(&self, target: &str) -> bool {
        http_probe(target, self.timeout).await.is_ready()
    }
}

/// Split `http://host:port/path` (scheme optional) into address and path.
fn split_target(target: &str) -> (&str, &str) {
    let rest = target.strip_prefix("http://").unwrap_or(target);
    match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, "/"),
    }
}

/// Perform one HTTP GET against `target` within `timeout`.
pub async fn http_probe(target: &str, timeout: Duration) -> ProbeResult {
    let (address, path) = split_target(target);
    let uri = format!("http://{address}{path}");

    let result = tokio::time::timeout(timeout, async {
        let stream = match tokio::net::TcpStream::connect(address).await {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, %uri, "readiness probe connection failed");
                return ProbeResult::Failed;
            }
        };

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
            Ok(pair) => pair,
            Err(e) => {
                debug!(error = %e, %uri, "readiness probe handshake failed");
                return ProbeResult::Failed;
            }
        };

        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = match http::Request::builder()
            .method("GET")
            .uri(&uri)
            .header("host", address)
            .header("user-agent", "sloguard-health/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
        {
            Ok(req) => req,
            Err(e) => {
                debug!(error = %e, %uri, "invalid readiness probe request");
                return ProbeResult::Failed;
            }
        };

        match sender.send_request(req).await {
            Ok(resp) if resp.status().is_success() => ProbeResult::Healthy,
            Ok(resp) => {
                debug!(status = %resp.status(), %uri, "readiness probe non-2xx");
                ProbeResult::Unhealthy
            }
            Err(e) => {
                debug!(error = %e, %uri, "readiness probe request failed");
                ProbeResult::Failed
            }
        }
    })
    .await;

    result.unwrap_or_else(|_| {
        debug!(%uri, "readiness probe timed out");
        ProbeResult::Failed
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response per connection.
    async fn serve(status_line: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let response =
                        format!("HTTP/1.1 {status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });
        addr
    }

    #[test]
    fn split_targets() {
        assert_eq!(split_target("http://10.0.0.1:8080/health"), ("10.0.0.1:8080", "/health"));
        assert_eq!(split_target("localhost:80"), ("localhost:80", "/"));
    }

    #[tokio::test]
    async fn ready_on_2xx() {
        let addr = serve("200 OK").await;
        let result = http_probe(&format!("http://{addr}/health"), Duration::from_secs(2)).await;
        assert_eq!(result, ProbeResult::Healthy);
        assert!(HttpReadinessProbe::new(Duration::from_secs(2)).probe(&addr).await);
    }

    #[tokio::test]
    async fn not_ready_on_5xx() {
        let addr = serve("503 Service Unavailable").await;
        let result = http_probe(&addr, Duration::from_secs(2)).await;
        assert_eq!(result, ProbeResult::Unhealthy);
        assert!(!result.is_ready());
    }

    #[tokio::test]
    async fn failed_when_nothing_listens() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        assert_eq!(
            http_probe(&addr, Duration::from_secs(2)).await,
            ProbeResult::Failed
        );
    }

    #[tokio::test]
    async fn failed_on_timeout() {
        // Accepts but never answers.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        assert_eq!(
            http_probe(&addr, Duration::from_millis(200)).await,
            ProbeResult::Failed
        );
    }
}
