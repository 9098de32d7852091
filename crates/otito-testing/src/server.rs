use super::expectation::{Expectation, MockResponse};
use super::matcher::RequestMatcher;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

type GenericError = Box<dyn std::error::Error + Send + Sync>;
type Result<T> = std::result::Result<T, GenericError>;

/// A mock ingestion API.
///
/// Every request is recorded. Requests are answered by the most recently
/// registered matching expectation, or with `404` when none matches.
pub struct MockIngestServer {
    addr: SocketAddr,
    state: Arc<Mutex<ServerState>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

#[derive(Default)]
struct ServerState {
    expectations: Vec<Expectation>,
    received: Vec<RecordedRequest>,
    unmatched: Vec<RecordedRequest>,
}

/// A request received by the mock server
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: http::Method,
    pub path: String,
    pub headers: http::HeaderMap,
    pub body: Bytes,
}

impl RecordedRequest {
    /// Parse the body as JSON
    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.body).ok()
    }

    /// Messages of a batch envelope, empty if the body is not one
    pub fn messages(&self) -> Vec<serde_json::Value> {
        self.json()
            .and_then(|mut v| v.get_mut("messages").map(serde_json::Value::take))
            .and_then(|v| match v {
                serde_json::Value::Array(items) => Some(items),
                _ => None,
            })
            .unwrap_or_default()
    }
}

impl MockIngestServer {
    /// Start a new mock server on a random local port
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let state = Arc::new(Mutex::new(ServerState::default()));
        let state_clone = state.clone();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            let mut stop_future = shutdown_rx;

            loop {
                tokio::select! {
                    res = listener.accept() => {
                        match res {
                            Ok((stream, _)) => {
                                let io = TokioIo::new(stream);
                                let state = state_clone.clone();

                                tokio::spawn(async move {
                                    if let Err(err) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                                        .serve_connection(io, service_fn(move |req| handle_request(req, state.clone())))
                                        .await
                                    {
                                        tracing::debug!(error = %err, "Mock ingest connection error");
                                    }
                                });
                            }
                            Err(e) => tracing::debug!(error = %e, "Mock ingest accept error"),
                        }
                    }
                    _ = &mut stop_future => {
                        break;
                    }
                }
            }
        });

        Ok(Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    /// Base URL to configure as the ingestion endpoint
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Every request received, in arrival order
    pub fn received_requests(&self) -> Vec<RecordedRequest> {
        lock(&self.state).received.clone()
    }

    /// Every message received across all batch envelopes, in arrival order
    pub fn received_messages(&self) -> Vec<serde_json::Value> {
        self.received_requests()
            .iter()
            .flat_map(RecordedRequest::messages)
            .collect()
    }

    /// Requests that didn't match any expectation
    pub fn unmatched_requests(&self) -> Vec<RecordedRequest> {
        lock(&self.state).unmatched.clone()
    }

    /// Add an expectation
    pub fn expect(&self, matcher: RequestMatcher) -> ExpectationBuilder {
        ExpectationBuilder {
            server: self.state.clone(),
            expectation: Some(Expectation::new(matcher)),
        }
    }

    /// Accept every batch upload
    pub fn accept_all(&self) {
        self.expect(RequestMatcher::batch_upload());
    }

    /// Verify that all expectations were met
    ///
    /// # Panics
    ///
    /// Panics when an expectation's call count is out of bounds.
    pub fn verify(&self) {
        let state = lock(&self.state);
        for exp in &state.expectations {
            assert!(
                exp.times.is_satisfied_by(exp.call_count),
                "Expectation {:?} expected {:?} calls, got {}",
                exp.matcher,
                exp.times,
                exp.call_count
            );
        }
    }
}

impl Drop for MockIngestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Registers its expectation when dropped
pub struct ExpectationBuilder {
    server: Arc<Mutex<ServerState>>,
    expectation: Option<Expectation>,
}

impl ExpectationBuilder {
    pub fn respond_with(mut self, response: MockResponse) -> Self {
        self.expectation = self.expectation.take().map(|e| e.respond_with(response));
        self
    }

    pub fn times(mut self, n: usize) -> Self {
        self.expectation = self.expectation.take().map(|e| e.times(n));
        self
    }

    pub fn never(self) -> Self {
        self.times(0)
    }
}

impl Drop for ExpectationBuilder {
    fn drop(&mut self) {
        if let Some(exp) = self.expectation.take() {
            lock(&self.server).expectations.push(exp);
        }
    }
}

fn lock(state: &Mutex<ServerState>) -> MutexGuard<'_, ServerState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<Mutex<ServerState>>,
) -> Result<Response<Full<Bytes>>> {
    let (parts, body) = req.into_parts();
    let body_bytes = body.collect().await?.to_bytes();

    let recorded = RecordedRequest {
        method: parts.method.clone(),
        path: parts.uri.path().to_string(),
        headers: parts.headers.clone(),
        body: body_bytes.clone(),
    };

    let mut state_guard = lock(&state);
    state_guard.received.push(recorded.clone());

    // Later expectations override earlier ones
    let matching_idx = state_guard
        .expectations
        .iter()
        .rposition(|exp| {
            exp.matcher
                .matches(&parts.method, parts.uri.path(), &parts.headers, &body_bytes)
        });

    let Some(idx) = matching_idx else {
        state_guard.unmatched.push(recorded);
        return Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("No expectation matched")))?);
    };

    let exp = &mut state_guard.expectations[idx];
    exp.call_count += 1;

    let mut response = Response::builder().status(exp.response.status);
    for (k, v) in &exp.response.headers {
        response = response.header(k, v);
    }

    Ok(response.body(Full::new(exp.response.body.clone()))?)
}
