// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! [`Sink`] that pushes log lines to Grafana Loki.
//!
//! Lines are buffered into a single stream and sent through the JSON push
//! API:
//!
//! ```text
//! {"streams":[{"stream":{<labels>},"values":[["<unix ns>","<line>"], ...]}]}
//! ```
//!
//! A batch is sent inline when it reaches [`MAX_BATCH_ENTRIES`] lines or
//! [`MAX_BATCH_BYTES`] bytes, and otherwise on `sync` and `shutdown`.
//! Timer driven flushing is not used because the host freezes the process
//! between invocations.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{StatusCode, Url};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::{BasicAuth, LokiConfig};
use crate::logs::constants::{MAX_BATCH_BYTES, MAX_BATCH_ENTRIES};
use crate::logs::sink::{Sink, SinkError};

const PUSH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryStrategy {
    /// Retry immediately, up to the given number of attempts.
    Immediate(u64),
    /// Retry up to `attempts` times, sleeping `delay_ms * attempt` in between.
    LinearBackoff(u64, u64),
}

impl RetryStrategy {
    fn max_attempts(&self) -> u64 {
        match *self {
            RetryStrategy::Immediate(attempts) | RetryStrategy::LinearBackoff(attempts, _) => {
                attempts.max(1)
            }
        }
    }

    fn delay(&self, attempt: u64) -> Option<Duration> {
        match *self {
            RetryStrategy::Immediate(_) => None,
            RetryStrategy::LinearBackoff(_, delay_ms) => {
                Some(Duration::from_millis(delay_ms.saturating_mul(attempt)))
            }
        }
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        RetryStrategy::LinearBackoff(3, 500)
    }
}

#[derive(Debug, Default)]
struct Batch {
    values: Vec<(String, String)>,
    bytes: usize,
}

impl Batch {
    fn push(&mut self, line: String) {
        self.bytes += line.len();
        self.values.push((unix_nanos(), line));
    }

    fn is_full(&self) -> bool {
        self.values.len() >= MAX_BATCH_ENTRIES || self.bytes >= MAX_BATCH_BYTES
    }

    fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Serialize)]
struct PushRequest<'a> {
    streams: [Stream<'a>; 1],
}

#[derive(Serialize)]
struct Stream<'a> {
    stream: &'a BTreeMap<String, String>,
    values: &'a [(String, String)],
}

fn unix_nanos() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default()
        .to_string()
}

pub struct LokiSink {
    client: reqwest::Client,
    endpoint: Url,
    auth: Option<BasicAuth>,
    labels: BTreeMap<String, String>,
    key: String,
    retry_strategy: RetryStrategy,
    batch: Mutex<Batch>,
    closed: AtomicBool,
}

impl LokiSink {
    pub fn new(
        config: &LokiConfig,
        function_name: &str,
        https_proxy: Option<&str>,
    ) -> Result<Self, SinkError> {
        let mut builder = reqwest::Client::builder().timeout(PUSH_TIMEOUT);
        if let Some(proxy) = https_proxy {
            let proxy =
                reqwest::Proxy::https(proxy).map_err(|e| SinkError::Client(e.to_string()))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| SinkError::Client(e.to_string()))?;

        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let key = format!("{function_name}-{millis}-{}.log", uuid::Uuid::new_v4());

        info!("Sending logs to: {}", config.endpoint);

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            auth: config.auth.clone(),
            labels: config.labels.clone(),
            key,
            retry_strategy: RetryStrategy::default(),
            batch: Mutex::new(Batch::default()),
            closed: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn with_retry_strategy(mut self, retry_strategy: RetryStrategy) -> Self {
        self.retry_strategy = retry_strategy;
        self
    }

    /// Correlation key identifying this execution environment's stream of
    /// pushes in the extension's own logs.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    fn encode(&self, batch: &Batch) -> Result<Vec<u8>, SinkError> {
        let request = PushRequest {
            streams: [Stream {
                stream: &self.labels,
                values: &batch.values,
            }],
        };
        Ok(serde_json::to_vec(&request)?)
    }

    /// Takes the current batch out of the buffer and sends it. The lock is
    /// released before any network I/O.
    async fn send_pending(&self) -> Result<(), SinkError> {
        let batch = std::mem::take(&mut *self.batch.lock().await);
        if batch.is_empty() {
            return Ok(());
        }
        let count = batch.values.len();
        let result = self.send(&batch).await;
        match &result {
            Ok(()) => debug!("LOKI | Pushed {count} lines for {}", self.key),
            Err(e) => error!("LOKI | Dropping {count} lines for {}: {e}", self.key),
        }
        result
    }

    async fn send(&self, batch: &Batch) -> Result<(), SinkError> {
        let body = self.encode(batch)?;
        let max_attempts = self.retry_strategy.max_attempts();
        let mut attempts = 0;

        loop {
            attempts += 1;
            let mut request = self
                .client
                .post(self.endpoint.clone())
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone());
            if let Some(auth) = &self.auth {
                request = request.basic_auth(&auth.username, Some(&auth.password));
            }

            match request.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(());
                    }
                    let text = resp.text().await.unwrap_or_default();
                    let permanent =
                        status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS;
                    if permanent || attempts >= max_attempts {
                        return Err(SinkError::Rejected { status, body: text });
                    }
                    warn!("LOKI | Push attempt {attempts} returned {status}, retrying");
                }
                Err(e) => {
                    if attempts >= max_attempts {
                        return Err(SinkError::Transport {
                            attempts,
                            message: e.to_string(),
                        });
                    }
                    warn!("LOKI | Push attempt {attempts} failed, retrying: {e}");
                }
            }

            if let Some(delay) = self.retry_strategy.delay(attempts) {
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[async_trait]
impl Sink for LokiSink {
    async fn push_log(&self, line: String) -> Result<(), SinkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SinkError::Closed);
        }
        let full = {
            let mut batch = self.batch.lock().await;
            batch.push(line);
            batch.is_full()
        };
        if full {
            self.send_pending().await?;
        }
        Ok(())
    }

    async fn sync(&self) -> Result<(), SinkError> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        self.send_pending().await
    }

    async fn shutdown(&self) -> Result<(), SinkError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            debug!("LOKI | Sink already shut down");
            return Ok(());
        }
        self.send_pending().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn test_config(url: &str) -> LokiConfig {
        LokiConfig {
            endpoint: Url::parse(&format!("{url}/loki/api/v1/push")).unwrap(),
            auth: None,
            labels: BTreeMap::from([
                ("job".to_string(), "lambda".to_string()),
                ("function_name".to_string(), "fn".to_string()),
            ]),
        }
    }

    fn test_sink(config: &LokiConfig) -> LokiSink {
        LokiSink::new(config, "fn", None)
            .unwrap()
            .with_retry_strategy(RetryStrategy::Immediate(2))
    }

    #[test]
    fn test_key_format() {
        let sink = test_sink(&test_config("http://localhost:3100"));
        assert!(sink.key().starts_with("fn-"));
        assert!(sink.key().ends_with(".log"));
    }

    #[test]
    fn test_encode_payload() {
        let sink = test_sink(&test_config("http://localhost:3100"));
        let batch = Batch {
            values: vec![("1".to_string(), "hello".to_string())],
            bytes: 5,
        };

        let payload: serde_json::Value =
            serde_json::from_slice(&sink.encode(&batch).unwrap()).unwrap();

        assert_eq!(
            payload,
            json!({
                "streams": [{
                    "stream": {"function_name": "fn", "job": "lambda"},
                    "values": [["1", "hello"]]
                }]
            })
        );
    }

    #[test]
    fn test_retry_strategy() {
        assert_eq!(RetryStrategy::Immediate(0).max_attempts(), 1);
        assert_eq!(RetryStrategy::Immediate(3).delay(2), None);
        assert_eq!(
            RetryStrategy::LinearBackoff(3, 10).delay(2),
            Some(Duration::from_millis(20))
        );
    }

    #[tokio::test]
    async fn test_push_is_buffered_until_sync() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/loki/api/v1/push")
            .match_header("content-type", "application/json")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(r#""stream":\{"function_name":"fn","job":"lambda"\}"#.to_string()),
                Matcher::Regex(r#"\["\d+","first"\],\["\d+","second"\]"#.to_string()),
            ]))
            .with_status(204)
            .expect(1)
            .create_async()
            .await;

        let sink = test_sink(&test_config(&server.url()));
        sink.push_log("first".to_string()).await.unwrap();
        sink.push_log("second".to_string()).await.unwrap();
        sink.sync().await.unwrap();
        // Nothing left to send.
        sink.sync().await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_basic_auth_header() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/loki/api/v1/push")
            .match_header("authorization", "Basic dXNlcjpwYXNz")
            .with_status(204)
            .create_async()
            .await;

        let mut config = test_config(&server.url());
        config.auth = Some(BasicAuth {
            username: "user".to_string(),
            password: "pass".to_string(),
        });
        let sink = test_sink(&config);
        sink.push_log("line".to_string()).await.unwrap();
        sink.sync().await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_full_batch_is_sent_inline() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/loki/api/v1/push")
            .with_status(204)
            .expect(1)
            .create_async()
            .await;

        let sink = test_sink(&test_config(&server.url()));
        for i in 0..MAX_BATCH_ENTRIES {
            sink.push_log(format!("line {i}")).await.unwrap();
        }

        mock.assert_async().await;
        assert!(sink.batch.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/loki/api/v1/push")
            .with_status(400)
            .with_body("entry out of order")
            .expect(1)
            .create_async()
            .await;

        let sink = test_sink(&test_config(&server.url()));
        sink.push_log("line".to_string()).await.unwrap();
        let err = sink.sync().await.unwrap_err();

        match err {
            SinkError::Rejected { status, body } => {
                assert_eq!(status, StatusCode::BAD_REQUEST);
                assert_eq!(body, "entry out of order");
            }
            other => panic!("unexpected error: {other}"),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/loki/api/v1/push")
            .with_status(503)
            .expect(2)
            .create_async()
            .await;

        let sink = test_sink(&test_config(&server.url()));
        sink.push_log("line".to_string()).await.unwrap();
        assert!(sink.sync().await.is_err());

        mock.assert_async().await;
        // The failed batch is dropped, not resent.
        assert!(sink.batch.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_flushes_and_is_idempotent() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/loki/api/v1/push")
            .with_status(204)
            .expect(1)
            .create_async()
            .await;

        let sink = test_sink(&test_config(&server.url()));
        sink.push_log("last words".to_string()).await.unwrap();
        sink.shutdown().await.unwrap();
        sink.shutdown().await.unwrap();

        mock.assert_async().await;
        assert!(matches!(
            sink.push_log("too late".to_string()).await,
            Err(SinkError::Closed)
        ));
    }
}
