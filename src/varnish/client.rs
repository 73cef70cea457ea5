//! Ban/PURGE wire client.
//!
//! Speaks the purge dialect the generated VCL expects: a request with the
//! configured purge method, `X-Purge-Method: regex`, the origin host, and a
//! cache-tag prefix, answered by a `200` status line. Targets are purged
//! concurrently and independently; one hung or refusing instance never
//! blocks the rest.

use std::fmt;
use std::time::{Duration, Instant};

use futures::future::join_all;
use metrics::{counter, histogram};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};
use url::Url;

use crate::config::VarnishSettings;

const METRIC_PURGE: &str = "macp_purge_request_total";
const METRIC_PURGE_MS: &str = "macp_purge_dispatch_ms";

/// Pattern that bans every object on a target.
pub const CATCH_ALL_PATTERN: &str = "/.*";

/// One reverse-proxy instance to purge.
#[derive(Debug, Clone)]
pub struct PurgeTarget {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for PurgeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Error)]
pub enum PurgeError {
    #[error("connection to {target} failed: {source}")]
    Connect {
        target: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{target} timed out after {timeout_ms} ms")]
    Timeout { target: String, timeout_ms: u64 },
    #[error("io error talking to {target}: {source}")]
    Io {
        target: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{target} rejected purge: {status_line}")]
    Protocol { target: String, status_line: String },
}

/// Outcome of one purge fan-out. A partially failed fan-out is still
/// useful: the reachable targets have been purged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PurgeReport {
    pub attempted: usize,
    pub succeeded: usize,
}

impl PurgeReport {
    pub fn is_complete(&self) -> bool {
        self.succeeded == self.attempted
    }

    pub fn is_partial(&self) -> bool {
        self.succeeded > 0 && !self.is_complete()
    }
}

pub struct VarnishClient {
    targets: Vec<PurgeTarget>,
    purge_method: String,
    timeout: Duration,
    cache_tag_prefix: String,
    origin_host: String,
}

impl VarnishClient {
    pub fn new(settings: &VarnishSettings) -> Self {
        Self {
            targets: settings.targets.clone(),
            purge_method: settings.purge_method.clone(),
            timeout: settings.timeout,
            cache_tag_prefix: settings.cache_tag_prefix.clone(),
            origin_host: settings.host.clone(),
        }
    }

    /// Purge one URL's path+query on every target.
    pub async fn purge_url(&self, url: &str) -> PurgeReport {
        if url.trim().is_empty() {
            warn!("ignoring purge request for empty url");
            return PurgeReport::default();
        }
        let (path_query, host) = match Url::parse(url) {
            Ok(parsed) => {
                let mut path_query = parsed.path().to_string();
                if let Some(query) = parsed.query() {
                    path_query.push('?');
                    path_query.push_str(query);
                }
                let host = parsed
                    .host_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| self.origin_host.clone());
                (path_query, host)
            }
            Err(_) if url.starts_with('/') => (url.to_string(), self.origin_host.clone()),
            Err(err) => {
                warn!(url = %url, error = %err, "cannot purge unparseable url");
                return PurgeReport::default();
            }
        };
        self.dispatch(&path_query, &host).await
    }

    /// Ban every object on every target.
    pub async fn purge_all(&self) -> PurgeReport {
        self.dispatch(CATCH_ALL_PATTERN, &self.origin_host).await
    }

    async fn dispatch(&self, path_query: &str, host: &str) -> PurgeReport {
        let started = Instant::now();
        let attempts = join_all(
            self.targets
                .iter()
                .map(|target| self.send_purge(target, path_query, host)),
        )
        .await;

        let mut report = PurgeReport {
            attempted: attempts.len(),
            succeeded: 0,
        };
        for (target, result) in self.targets.iter().zip(attempts) {
            match result {
                Ok(()) => {
                    report.succeeded += 1;
                    counter!(METRIC_PURGE, "outcome" => "ok").increment(1);
                    debug!(target = %target, path = path_query, "purge accepted");
                }
                Err(err) => {
                    counter!(METRIC_PURGE, "outcome" => "error").increment(1);
                    warn!(target = %target, path = path_query, error = %err, "purge target skipped");
                }
            }
        }
        histogram!(METRIC_PURGE_MS).record(started.elapsed().as_secs_f64() * 1000.0);
        report
    }

    /// One time-boxed purge exchange. A hung target resolves as a timeout
    /// failure; it is never retried within the same invalidation.
    async fn send_purge(
        &self,
        target: &PurgeTarget,
        path_query: &str,
        host: &str,
    ) -> Result<(), PurgeError> {
        match timeout(self.timeout, self.exchange(target, path_query, host)).await {
            Ok(result) => result,
            Err(_) => Err(PurgeError::Timeout {
                target: target.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }

    async fn exchange(
        &self,
        target: &PurgeTarget,
        path_query: &str,
        host: &str,
    ) -> Result<(), PurgeError> {
        let stream = TcpStream::connect((target.host.as_str(), target.port))
            .await
            .map_err(|source| PurgeError::Connect {
                target: target.to_string(),
                source,
            })?;
        let mut stream = BufReader::new(stream);

        let request = format!(
            "{method} {path_query} HTTP/1.1\r\n\
             X-Purge-Method: regex\r\n\
             X-MACP-Host: {host}\r\n\
             X-MACP-Cache-Tags: {tags}\r\n\
             Host: {host}\r\n\
             Connection: Close\r\n\r\n",
            method = self.purge_method,
            tags = self.cache_tag_prefix,
        );
        stream
            .write_all(request.as_bytes())
            .await
            .map_err(|source| PurgeError::Io {
                target: target.to_string(),
                source,
            })?;

        // the status line alone decides the outcome
        let mut status_line = String::new();
        stream
            .read_line(&mut status_line)
            .await
            .map_err(|source| PurgeError::Io {
                target: target.to_string(),
                source,
            })?;

        if status_line.split_whitespace().nth(1) == Some("200") {
            Ok(())
        } else {
            Err(PurgeError::Protocol {
                target: target.to_string(),
                status_line: status_line.trim_end().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::Mutex;

    use super::*;

    /// Listener that answers every connection with `status_line` and
    /// records the requests it received.
    async fn spawn_target(status_line: &'static str) -> (PurgeTarget, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("local addr").port();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = requests.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let seen = seen.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 2048];
                    let n = socket.read(&mut buf).await.unwrap_or(0);
                    seen.lock()
                        .await
                        .push(String::from_utf8_lossy(&buf[..n]).to_string());
                    let _ = socket.write_all(status_line.as_bytes()).await;
                });
            }
        });
        (
            PurgeTarget {
                host: "127.0.0.1".to_string(),
                port,
            },
            requests,
        )
    }

    fn client(targets: Vec<PurgeTarget>) -> VarnishClient {
        VarnishClient {
            targets,
            purge_method: "PURGE".to_string(),
            timeout: Duration::from_millis(500),
            cache_tag_prefix: "96aa".to_string(),
            origin_host: "example.com".to_string(),
        }
    }

    #[tokio::test]
    async fn purge_url_sends_the_documented_wire_format() {
        let (target, requests) = spawn_target("HTTP/1.1 200 Banned\r\n\r\n").await;
        let client = client(vec![target]);

        let report = client
            .purge_url("http://example.com/blog/post-1?tag=news")
            .await;
        assert!(report.is_complete());
        assert_eq!(report.attempted, 1);

        let seen = requests.lock().await;
        let request = seen.first().expect("request recorded");
        assert!(request.starts_with("PURGE /blog/post-1?tag=news HTTP/1.1\r\n"));
        assert!(request.contains("X-Purge-Method: regex\r\n"));
        assert!(request.contains("X-MACP-Host: example.com\r\n"));
        assert!(request.contains("X-MACP-Cache-Tags: 96aa\r\n"));
        assert!(request.contains("Host: example.com\r\n"));
        assert!(request.contains("Connection: Close\r\n"));
    }

    #[tokio::test]
    async fn purge_all_uses_the_catch_all_pattern() {
        let (target, requests) = spawn_target("HTTP/1.1 200 Banned\r\n\r\n").await;
        let client = client(vec![target]);

        let report = client.purge_all().await;
        assert!(report.is_complete());

        let seen = requests.lock().await;
        assert!(seen.first().expect("request").starts_with("PURGE /.* HTTP/1.1\r\n"));
    }

    #[tokio::test]
    async fn unreachable_target_does_not_abort_the_others() {
        let (alive, requests) = spawn_target("HTTP/1.1 200 Banned\r\n\r\n").await;
        let dead = PurgeTarget {
            host: "127.0.0.1".to_string(),
            port: 1, // nothing listens here
        };
        let client = client(vec![dead, alive]);

        let report = client.purge_all().await;
        assert_eq!(report.attempted, 2);
        assert_eq!(report.succeeded, 1);
        assert!(report.is_partial());
        assert_eq!(requests.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn non_success_status_counts_as_failure() {
        let (target, _requests) = spawn_target("HTTP/1.1 405 Not allowed.\r\n\r\n").await;
        let client = client(vec![target]);

        let report = client.purge_url("http://example.com/").await;
        assert_eq!(report.succeeded, 0);
    }

    #[tokio::test]
    async fn hung_target_is_bounded_by_the_timeout() {
        // accepts connections but never answers
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("local addr").port();
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                // hold the socket open without responding
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    drop(socket);
                });
            }
        });

        let client = client(vec![PurgeTarget {
            host: "127.0.0.1".to_string(),
            port,
        }]);
        let started = Instant::now();
        let report = client.purge_all().await;
        assert_eq!(report.succeeded, 0);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn empty_url_is_ignored() {
        let client = client(Vec::new());
        let report = client.purge_url("").await;
        assert_eq!(report.attempted, 0);
    }

    #[tokio::test]
    async fn relative_url_purges_against_the_origin_host() {
        let (target, requests) = spawn_target("HTTP/1.1 200 Banned\r\n\r\n").await;
        let client = client(vec![target]);

        let report = client.purge_url("/blog/post-1").await;
        assert!(report.is_complete());

        let seen = requests.lock().await;
        let request = seen.first().expect("request");
        assert!(request.starts_with("PURGE /blog/post-1 HTTP/1.1\r\n"));
        assert!(request.contains("Host: example.com\r\n"));
    }
}
