//! # otito-core
//!
//! Transparent traffic capture for Tower/Hyper HTTP services.
//!
//! The [`CaptureLayer`] sits in front of your handlers, records every
//! request/response pair as a [`CaptureRecord`] and hands it to an in-memory
//! [`BatchBuffer`]. Once the buffer reaches its flush threshold, the batch is
//! masked and published to an ingestion service through a [`Publisher`].
//! Clients always receive the exact bytes, status and headers your handler
//! produced.
//!
//! ## Features
//!
//! - `http-publisher` - [`HttpPublisher`] posting batches with `reqwest`
//!   (enabled by default)
//! - `config` - loading settings from `OTITO_*` environment variables and
//!   `.env` files
//! - `full` - all features enabled
//!
//! ## Example
//!
//! ```ignore
//! use otito_core::{CaptureConfig, IpStrategy, MessageStore};
//! use tower::ServiceBuilder;
//!
//! let config = CaptureConfig::builder()
//!     .api_key(std::env::var("OTITO_API_KEY")?)
//!     .flush_threshold(50)
//!     .ip_strategy(IpStrategy::ProxyHeader)
//!     .filter_fn(|parts| parts.uri.path() != "/health")
//!     .build()?;
//!
//! let store = MessageStore::from_config(config)?;
//! let service = ServiceBuilder::new().layer(store.layer()).service(handler);
//!
//! // ... serve
//!
//! store.close().await?;
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod buffer;
mod config;
mod error;
mod interceptor;
mod ip;
mod mask;
mod record;
mod store;

// Environment configuration
#[cfg(feature = "config")]
pub mod env;

pub mod publisher;

pub use buffer::BatchBuffer;
pub use config::{
    AppIdFn, CaptureConfig, CaptureConfigBuilder, FilterFn, DEFAULT_ENDPOINT,
    DEFAULT_FLUSH_THRESHOLD, DEFAULT_HEADERS_TO_STRIP, DEFAULT_MAX_BODY_SIZE, MAX_FLUSH_THRESHOLD,
};
pub use error::{CaptureError, ConfigError, Error, PublishError, PublishResult, Result};
pub use interceptor::{CaptureLayer, CaptureService};
pub use ip::{resolve_client_ip, IpStrategy, PeerAddr, PROXY_IP_HEADER, X_FORWARDED_FOR, X_REAL_IP};
pub use mask::{HeaderMasker, MASK};
pub use publisher::{MemoryPublisher, Publisher};
#[cfg(feature = "http-publisher")]
pub use publisher::{HttpPublisher, PublishResponse};
pub use record::{BatchEnvelope, CaptureRecord, HttpDefinition};
pub use store::MessageStore;

/// Re-exported for implementing [`Publisher`] outside this crate.
pub use async_trait::async_trait;
