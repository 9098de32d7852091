//! Demo server with traffic capture.
//!
//! Configure with `OTITO_*` variables (or a `.env` file), then:
//!
//! ```text
//! OTITO_API_KEY=sk_test_... cargo run -p capture-server
//! curl -X POST localhost:8080/echo -d 'hello'
//! ```
//!
//! `CAPTURE_SERVER_ADDR` sets the listen address, `LOG_FORMAT=json` switches
//! to JSON logs. Ctrl-C stops accepting connections, drains in-flight
//! requests and publishes whatever is still buffered.

use bytes::Bytes;
use http::{header, HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use otito_core::env::{load_dotenv, CaptureSettings};
use otito_core::{MessageStore, PeerAddr};
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::{Layer, ServiceExt};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const DEFAULT_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_APP_ID: &str = "capture-server";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    load_dotenv();
    init_tracing();

    let addr: SocketAddr = std::env::var("CAPTURE_SERVER_ADDR")
        .unwrap_or_else(|_| DEFAULT_ADDR.to_string())
        .parse()?;

    let config = CaptureSettings::from_env()?
        .into_builder()?
        .app_id_fn(|parts| {
            parts
                .headers
                .get("x-app-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or(DEFAULT_APP_ID)
                .to_string()
        })
        .filter_fn(|parts| parts.uri.path() != "/health")
        .build()?;

    let store = MessageStore::from_config(config)?;
    let service = store.layer().layer(tower::service_fn(routes));

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Capture server listening");

    let shutdown = CancellationToken::new();
    let connections = TaskTracker::new();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            res = listener.accept() => {
                let (stream, remote_addr) = match res {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "Accept error");
                        continue;
                    }
                };

                let io = TokioIo::new(stream);
                let service = service.clone();
                let token = shutdown.clone();

                connections.spawn(async move {
                    let svc = hyper::service::service_fn(move |mut req: Request<Incoming>| {
                        req.extensions_mut().insert(PeerAddr(remote_addr));
                        service.clone().oneshot(req)
                    });

                    let conn = http1::Builder::new().serve_connection(io, svc);
                    tokio::pin!(conn);

                    let result = tokio::select! {
                        res = conn.as_mut() => res,
                        _ = token.cancelled() => {
                            conn.as_mut().graceful_shutdown();
                            conn.await
                        }
                    };
                    if let Err(err) = result {
                        error!(%remote_addr, error = %err, "Connection error");
                    }
                });
            }
            _ = &mut ctrl_c => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    drop(listener);
    shutdown.cancel();
    connections.close();
    if tokio::time::timeout(SHUTDOWN_GRACE, connections.wait())
        .await
        .is_err()
    {
        warn!(
            open = connections.len(),
            "Connections still open after grace period"
        );
    }

    if let Err(e) = store.close().await {
        error!(error = %e, "Final capture flush failed");
    }
    info!("Capture server stopped");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,otito_core=debug"));
    let registry = tracing_subscriber::registry().with(filter);

    if matches!(std::env::var("LOG_FORMAT").as_deref(), Ok("json")) {
        let _ = registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init();
    } else {
        let _ = registry.with(tracing_subscriber::fmt::layer()).try_init();
    }
}

async fn routes(req: Request<Full<Bytes>>) -> Result<Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();

    let response = match (&parts.method, parts.uri.path()) {
        (&Method::GET, "/") => json_response(
            StatusCode::OK,
            json!({ "status": true, "message": "capture server" }),
        ),
        (&Method::GET, "/health") => Response::new(Full::new(Bytes::from_static(b"ok"))),
        (&Method::POST, "/echo") => {
            let body = body.collect().await.map(|c| c.to_bytes()).unwrap_or_default();
            let mut response = Response::new(Full::new(body));
            if let Some(content_type) = parts.headers.get(header::CONTENT_TYPE) {
                response
                    .headers_mut()
                    .insert(header::CONTENT_TYPE, content_type.clone());
            }
            response
        }
        _ => json_response(
            StatusCode::NOT_FOUND,
            json!({ "status": false, "message": "not found" }),
        ),
    };

    Ok(response)
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}
