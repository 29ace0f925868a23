//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use deck_orchestrator::config::OrchestratorConfig;
use deck_orchestrator::remote::{ConnectionFactory, Mutation, Transport};
use deck_orchestrator::resilience::OperationClass;
use deck_orchestrator::{OrchestratorContext, OrchestratorError, OrchestratorResult, WorkItem};

/// Failure a mock call can be scripted to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Transient,
    Fatal,
    Transport,
}

impl Fault {
    fn into_error(self) -> OrchestratorError {
        match self {
            Fault::Transient => OrchestratorError::transient("503 service unavailable"),
            Fault::Fatal => OrchestratorError::fatal("400 invalid request"),
            Fault::Transport => OrchestratorError::transport("connection reset by peer"),
        }
    }
}

/// In-memory remote that records overlap per document and in-flight peaks.
#[derive(Default)]
pub struct MockTransport {
    latency: Duration,
    fail_when_concurrent: Option<Fault>,
    scripted: Mutex<HashMap<String, VecDeque<Fault>>>,
    failing_documents: Mutex<HashMap<String, Fault>>,
    active_per_document: Mutex<HashMap<String, usize>>,
    calls_per_token: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    overlaps: AtomicUsize,
    calls: AtomicUsize,
    applied: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Calls whose first mutation targets `token` fail with `faults` in order,
    /// then succeed.
    pub fn fail_token(self, token: &str, faults: &[Fault]) -> Self {
        self.scripted
            .lock()
            .unwrap()
            .insert(token.to_string(), faults.iter().copied().collect());
        self
    }

    /// Every call against `document_id` fails with `fault`.
    pub fn fail_document(self, document_id: &str, fault: Fault) -> Self {
        self.failing_documents
            .lock()
            .unwrap()
            .insert(document_id.to_string(), fault);
        self
    }

    /// Calls entering while another call is in flight fail with `fault`.
    pub fn fail_when_concurrent(mut self, fault: Fault) -> Self {
        self.fail_when_concurrent = Some(fault);
        self
    }

    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, token: &str) -> usize {
        self.calls_per_token.lock().unwrap().get(token).copied().unwrap_or(0)
    }

    /// Requests applied by successful calls, sorted.
    pub fn applied(&self) -> Vec<String> {
        let mut applied = self.applied.lock().unwrap().clone();
        applied.sort();
        applied
    }

    fn fault_for(&self, document_id: &str, token: &str, in_flight: usize) -> Option<Fault> {
        if let Some(fault) = self.fail_when_concurrent {
            if in_flight > 1 {
                return Some(fault);
            }
        }
        if let Some(fault) = self.failing_documents.lock().unwrap().get(document_id) {
            return Some(*fault);
        }
        self.scripted
            .lock()
            .unwrap()
            .get_mut(token)
            .and_then(|faults| faults.pop_front())
    }
}

/// Decrements the in-flight counters however the call ends.
struct Active<'a> {
    mock: &'a MockTransport,
    document_id: String,
}

impl Drop for Active<'_> {
    fn drop(&mut self) {
        self.mock.in_flight.fetch_sub(1, Ordering::SeqCst);
        if let Some(count) = self.mock.active_per_document.lock().unwrap().get_mut(&self.document_id) {
            *count -= 1;
        }
    }
}

fn request_token(request: &Value) -> String {
    ["replaceAllText", "replaceAllShapesWithImage"]
        .iter()
        .find_map(|kind| request[*kind]["containsText"]["text"].as_str())
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl Transport for MockTransport {
    async fn batch_update(&self, document_id: &str, requests: Vec<Value>) -> OrchestratorResult<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        {
            let mut active = self.active_per_document.lock().unwrap();
            let count = active.entry(document_id.to_string()).or_insert(0);
            *count += 1;
            if *count > 1 {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
        }
        let _active = Active {
            mock: self,
            document_id: document_id.to_string(),
        };

        let token = requests.first().map(request_token).unwrap_or_default();
        *self.calls_per_token.lock().unwrap().entry(token.clone()).or_insert(0) += 1;

        if let Some(fault) = self.fault_for(document_id, &token, in_flight) {
            return Err(fault.into_error());
        }

        tokio::time::sleep(self.latency).await;
        self.applied
            .lock()
            .unwrap()
            .extend(requests.iter().map(|r| format!("{}:{}", document_id, r)));
        Ok(json!({ "presentationId": document_id, "replies": vec![json!({}); requests.len()] }))
    }
}

/// Hands every pool entry the same mock.
pub struct SharedFactory(pub Arc<MockTransport>);

impl ConnectionFactory for SharedFactory {
    fn connect(&self) -> OrchestratorResult<Arc<dyn Transport>> {
        Ok(self.0.clone())
    }
}

/// Config tuned for fast tests: tiny backoff, generous waits.
pub fn test_config(max_concurrency: usize) -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.concurrency.max_concurrency = max_concurrency;
    config.circuit_breaker.failure_threshold = 3;
    config.retries.backoff_ms = 1;
    config.retries.max_backoff_ms = 5;
    config.pool.size = max_concurrency.max(1);
    config.pool.acquire_timeout_ms = 5_000;
    config.locks.timeout_ms = 10_000;
    config.remote.request_timeout_ms = 2_000;
    config
}

pub fn context(config: OrchestratorConfig, mock: &Arc<MockTransport>) -> Arc<OrchestratorContext> {
    Arc::new(OrchestratorContext::new(config, Arc::new(SharedFactory(mock.clone()))).unwrap())
}

/// `count` text-replace items spread round-robin over `keys` documents.
/// Item `i` replaces token `{{t<i>}}`.
pub fn text_items(keys: usize, count: usize) -> Vec<WorkItem> {
    (0..count)
        .map(|i| {
            WorkItem::new(
                format!("deck-{}", i % keys),
                OperationClass::text_replace(),
                vec![Mutation::replace_text(token(i), format!("value {i}"))],
            )
        })
        .collect()
}

pub fn token(i: usize) -> String {
    format!("{{{{t{i}}}}}")
}

// Consume headers and body so closing the socket does not reset the client.
async fn read_request(socket: &mut tokio::net::TcpStream) {
    let mut data = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        data.extend_from_slice(&chunk[..n]);

        let text = String::from_utf8_lossy(&data);
        if let Some(header_end) = text.find("\r\n\r\n") {
            let content_length = text[..header_end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if data.len() >= header_end + 4 + content_length {
                return;
            }
        }
    }
}

/// Start a programmable HTTP backend on an ephemeral port.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        read_request(&mut socket).await;

                        let (status, body) = f().await;
                        let status_text = match status {
                            200 => "200 OK",
                            400 => "400 Bad Request",
                            429 => "429 Too Many Requests",
                            500 => "500 Internal Server Error",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let response_str = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}
