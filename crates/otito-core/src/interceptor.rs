//! Capture middleware.
//!
//! [`CaptureLayer`] wraps any `tower::Service` that handles
//! `http::Request<Full<Bytes>>`. For each request it:
//!
//! 1. buffers the whole request body (rejecting bodies over the limit),
//! 2. calls the downstream service with an identical, unconsumed body,
//! 3. buffers the whole response body and rebuilds the response from the
//!    same parts, so status, headers and bytes reach the client unchanged,
//! 4. if the filter accepts the request, builds a [`CaptureRecord`] and
//!    hands it to the [`BatchBuffer`] on a background task.
//!
//! Streaming responses are fully materialized before being forwarded.
//!
//! ```ignore
//! use otito_core::{CaptureConfig, MessageStore};
//! use tower::ServiceBuilder;
//!
//! let store = MessageStore::from_config(
//!     CaptureConfig::builder().api_key("sk_live_...").build()?,
//! )?;
//!
//! let service = ServiceBuilder::new()
//!     .layer(store.layer())
//!     .service(my_handler);
//!
//! // on shutdown
//! store.close().await?;
//! ```

use bytes::Bytes;
use http::{header, Request, Response};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{BoxError, Layer, Service};

use crate::buffer::BatchBuffer;
use crate::config::CaptureConfig;
use crate::error::CaptureError;
use crate::record::{CaptureRecord, HttpDefinition};

/// Tower layer that captures traffic into a [`BatchBuffer`].
#[derive(Clone)]
pub struct CaptureLayer {
    config: Arc<CaptureConfig>,
    buffer: BatchBuffer,
}

impl CaptureLayer {
    /// Create a layer feeding the given buffer.
    pub fn new(config: Arc<CaptureConfig>, buffer: BatchBuffer) -> Self {
        Self { config, buffer }
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Get a reference to the buffer.
    pub fn buffer(&self) -> &BatchBuffer {
        &self.buffer
    }
}

impl<S> Layer<S> for CaptureLayer {
    type Service = CaptureService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CaptureService {
            inner,
            config: self.config.clone(),
            buffer: self.buffer.clone(),
        }
    }
}

/// Service produced by [`CaptureLayer`].
#[derive(Clone)]
pub struct CaptureService<S> {
    inner: S,
    config: Arc<CaptureConfig>,
    buffer: BatchBuffer,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for CaptureService<S>
where
    S: Service<Request<Full<Bytes>>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send + 'static,
    ReqBody: Body + Send + 'static,
    ReqBody::Data: Send,
    ReqBody::Error: Into<BoxError>,
    ResBody: Body + Send + 'static,
    ResBody::Data: Send,
    ResBody::Error: Into<BoxError>,
{
    type Response = Response<Full<Bytes>>;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        // The ready service goes into the future; a fresh clone stays behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let config = self.config.clone();
        let buffer = self.buffer.clone();

        Box::pin(async move {
            let (parts, body) = req.into_parts();

            let request_body = match read_request_body(&parts, body, config.max_body_size()).await
            {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(
                        method = %parts.method,
                        path = parts.uri.path(),
                        error = %e,
                        "Request rejected before capture"
                    );
                    return Ok::<_, BoxError>(e.into_response());
                }
            };

            let downstream = Request::from_parts(parts.clone(), Full::new(request_body.clone()));
            let response = inner
                .call(downstream)
                .await
                .map_err(Into::<BoxError>::into)?;

            let (response_parts, response_body) = response.into_parts();
            let response_body = response_body
                .collect()
                .await
                .map_err(Into::<BoxError>::into)?
                .to_bytes();

            let status = response_parts.status;
            let response_headers = response_parts.headers.clone();
            let replay = Response::from_parts(response_parts, Full::new(response_body.clone()));

            if !config.should_record(&parts) {
                tracing::trace!(path = parts.uri.path(), "Request filtered out of capture");
                return Ok(replay);
            }

            let record = CaptureRecord::new(parts.method.as_str(), parts.uri.path())
                .with_app(config.app_id(&parts))
                .with_ip_address(config.ip_strategy().resolve(&parts))
                .with_status(status.as_u16())
                .with_request(HttpDefinition::new(parts.headers, request_body))
                .with_response(HttpDefinition::new(response_headers, response_body));

            buffer.append_in_background(record);

            Ok::<_, BoxError>(replay)
        })
    }
}

/// Buffer the full request body, enforcing the optional size limit.
async fn read_request_body<B>(
    parts: &http::request::Parts,
    body: B,
    limit: Option<usize>,
) -> Result<Bytes, CaptureError>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    let Some(limit) = limit else {
        return body
            .collect()
            .await
            .map(|collected| collected.to_bytes())
            .map_err(|e| CaptureError::BodyRead(Into::<BoxError>::into(e).to_string()));
    };

    // Fast path: a declared length over the limit
    let declared = parts
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > limit) {
        return Err(CaptureError::BodyTooLarge { limit });
    }

    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            Err(CaptureError::BodyTooLarge { limit })
        }
        Err(e) => Err(CaptureError::BodyRead(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ip::PeerAddr;
    use crate::mask::MASK;
    use crate::publisher::MemoryPublisher;
    use http::{HeaderValue, Method, StatusCode};
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tower::{service_fn, ServiceExt};

    fn setup(
        builder: crate::config::CaptureConfigBuilder,
    ) -> (CaptureLayer, MemoryPublisher) {
        let config = builder.api_key("test-key").build().unwrap();
        let publisher = MemoryPublisher::new();
        let buffer = BatchBuffer::new(
            config.flush_threshold(),
            config.masker().clone(),
            publisher.clone(),
        );
        (CaptureLayer::new(Arc::new(config), buffer), publisher)
    }

    async fn echo(req: Request<Full<Bytes>>) -> Result<Response<Full<Bytes>>, Infallible> {
        let body = req.into_body().collect().await.unwrap().to_bytes();
        Ok(Response::builder()
            .status(StatusCode::CREATED)
            .header("content-type", "application/octet-stream")
            .header("set-cookie", "a=1")
            .header("set-cookie", "b=2")
            .body(Full::new(body))
            .unwrap())
    }

    #[tokio::test]
    async fn test_replay_is_identical() {
        let (layer, publisher) = setup(CaptureConfig::builder());
        let service = layer.clone().layer(service_fn(echo));

        let payload = Bytes::from_static(b"\x00\x01binary\xffpayload");
        let request = Request::builder()
            .method(Method::POST)
            .uri("/upload?x=1")
            .body(Full::new(payload.clone()))
            .unwrap();

        let response = service.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let cookies: Vec<_> = response.headers().get_all("set-cookie").iter().collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, payload);

        layer.buffer().close().await.unwrap();
        let records = publisher.records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.method, "POST");
        assert_eq!(record.path, "/upload");
        assert_eq!(record.status_code, 201);
        assert_eq!(record.request.body, payload);
        assert_eq!(record.response.body, payload);
        assert_eq!(record.response.header.get_all("set-cookie").iter().count(), 2);
    }

    #[tokio::test]
    async fn test_record_fields_resolved() {
        let (layer, publisher) = setup(
            CaptureConfig::builder()
                .app_id_fn(|p| {
                    p.headers
                        .get("x-app")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string()
                }),
        );
        let service = layer.clone().layer(service_fn(echo));

        let request = Request::builder()
            .uri("/users")
            .header("x-app", "billing")
            .header("x-forwarded-for", "1.2.3.4, 10.0.0.1")
            .header("authorization", "Bearer secret")
            .body(Full::new(Bytes::new()))
            .unwrap();
        service.oneshot(request).await.unwrap();

        layer.buffer().close().await.unwrap();
        let record = &publisher.records()[0];
        assert_eq!(record.app, "billing");
        assert_eq!(record.ip_address, "1.2.3.4");
        assert_eq!(record.request.header.get("authorization").unwrap(), MASK);
    }

    #[tokio::test]
    async fn test_remote_socket_strategy() {
        let (layer, publisher) =
            setup(CaptureConfig::builder().ip_strategy(crate::ip::IpStrategy::RemoteSocket));
        let service = layer.clone().layer(service_fn(echo));

        let mut request = Request::builder()
            .uri("/")
            .body(Full::new(Bytes::new()))
            .unwrap();
        request
            .extensions_mut()
            .insert(PeerAddr("10.1.2.3:4567".parse().unwrap()));
        service.oneshot(request).await.unwrap();

        layer.buffer().close().await.unwrap();
        assert_eq!(publisher.records()[0].ip_address, "10.1.2.3:4567");
    }

    #[tokio::test]
    async fn test_filtered_request_not_recorded() {
        let (layer, publisher) =
            setup(CaptureConfig::builder().filter_fn(|p| p.uri.path() != "/health"));
        let service = layer.clone().layer(service_fn(echo));

        let request = Request::builder()
            .uri("/health")
            .body(Full::new(Bytes::from("ok")))
            .unwrap();
        let response = service.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        layer.buffer().close().await.unwrap();
        assert!(publisher.records().is_empty());
        assert_eq!(publisher.attempts(), 0);
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let (layer, publisher) = setup(CaptureConfig::builder().max_body_size(Some(8)));
        let called = Arc::new(AtomicBool::new(false));
        let seen = called.clone();
        let service = layer.clone().layer(service_fn(move |req: Request<Full<Bytes>>| {
            seen.store(true, Ordering::SeqCst);
            echo(req)
        }));

        let request = Request::builder()
            .method(Method::POST)
            .uri("/")
            .body(Full::new(Bytes::from("way more than eight bytes")))
            .unwrap();
        let response = service.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE),
            Some(&HeaderValue::from_static("application/json"))
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], false);

        assert!(!called.load(Ordering::SeqCst));
        layer.buffer().close().await.unwrap();
        assert!(publisher.records().is_empty());
    }

    #[tokio::test]
    async fn test_declared_length_over_limit_rejected() {
        let (layer, _publisher) = setup(CaptureConfig::builder().max_body_size(Some(4)));
        let service = layer.layer(service_fn(echo));

        let request = Request::builder()
            .method(Method::POST)
            .uri("/")
            .header(header::CONTENT_LENGTH, "1000")
            .body(Full::new(Bytes::from("tiny")))
            .unwrap();
        let response = service.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_downstream_error_propagates() {
        let (layer, publisher) = setup(CaptureConfig::builder());
        let service = layer.clone().layer(service_fn(|_req: Request<Full<Bytes>>| async {
            Err::<Response<Full<Bytes>>, _>(std::io::Error::new(
                std::io::ErrorKind::Other,
                "handler exploded",
            ))
        }));

        let request = Request::builder()
            .uri("/")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let err = service.oneshot(request).await.unwrap_err();
        assert_eq!(err.to_string(), "handler exploded");

        layer.buffer().close().await.unwrap();
        assert!(publisher.records().is_empty());
    }

    #[tokio::test]
    async fn test_threshold_flush_from_requests() {
        let (layer, publisher) = setup(CaptureConfig::builder().flush_threshold(3));
        let service = layer.clone().layer(service_fn(echo));

        for i in 0..3 {
            let request = Request::builder()
                .uri(format!("/{}", i))
                .body(Full::new(Bytes::new()))
                .unwrap();
            service.clone().oneshot(request).await.unwrap();
        }

        layer.buffer().close().await.unwrap();
        let batches = publisher.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 3);
    }

    #[tokio::test]
    async fn test_threshold_flush_fires_while_serving() {
        let (layer, publisher) = setup(CaptureConfig::builder().flush_threshold(3));
        let service = layer.clone().layer(service_fn(echo));

        for i in 0..3 {
            let request = Request::builder()
                .uri(format!("/{}", i))
                .body(Full::new(Bytes::new()))
                .unwrap();
            service.clone().oneshot(request).await.unwrap();
        }
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }

        assert_eq!(publisher.attempts(), 1);
        assert_eq!(publisher.records().len(), 3);
        assert!(layer.buffer().is_empty());
    }

    #[test]
    fn test_masker_shared_with_config() {
        let (layer, _publisher) = setup(CaptureConfig::builder().strip_header("x-api-key"));
        let names: Vec<_> = layer
            .config()
            .masker()
            .names()
            .iter()
            .map(|n| n.as_str().to_string())
            .collect();
        assert_eq!(names, vec!["authorization", "x-api-key"]);
    }
}
