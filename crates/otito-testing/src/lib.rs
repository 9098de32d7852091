//! Testing utilities for otito
//!
//! # Mock ingestion server
//!
//! [`MockIngestServer`] stands in for the ingestion API in integration
//! tests. It answers batch uploads according to registered expectations and
//! records every request it receives, so tests can assert on the exact
//! envelopes a publisher sent.

pub mod expectation;
pub mod matcher;
pub mod server;

pub use expectation::{Expectation, MockResponse, Times};
pub use matcher::RequestMatcher;
pub use server::{ExpectationBuilder, MockIngestServer, RecordedRequest};
