use super::matcher::RequestMatcher;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, StatusCode};
use serde_json::json;

/// An expectation for an upload
#[derive(Debug, Clone)]
pub struct Expectation {
    pub(crate) matcher: RequestMatcher,
    pub(crate) response: MockResponse,
    pub(crate) times: Times,
    pub(crate) call_count: usize,
}

impl Expectation {
    /// Create a new expectation answering with an accepted batch
    pub fn new(matcher: RequestMatcher) -> Self {
        Self {
            matcher,
            response: MockResponse::accepted(),
            times: Times::Any,
            call_count: 0,
        }
    }

    /// Set the response
    pub fn respond_with(mut self, response: MockResponse) -> Self {
        self.response = response;
        self
    }

    /// Expect exactly `n` matching uploads
    pub fn times(mut self, n: usize) -> Self {
        self.times = Times::Exactly(n);
        self
    }

    /// Number of uploads matched so far
    pub fn call_count(&self) -> usize {
        self.call_count
    }
}

/// How many times an expectation should be matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Times {
    Once,
    Exactly(usize),
    AtLeast(usize),
    AtMost(usize),
    Any,
}

impl Times {
    /// Whether `count` calls satisfy this bound
    pub fn is_satisfied_by(&self, count: usize) -> bool {
        match *self {
            Times::Once => count == 1,
            Times::Exactly(n) => count == n,
            Times::AtLeast(n) => count >= n,
            Times::AtMost(n) => count <= n,
            Times::Any => true,
        }
    }
}

/// A mocked ingestion response
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
}

impl Default for MockResponse {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }
}

impl MockResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// `200 {"status": true}`
    pub fn accepted() -> Self {
        Self::new().json(json!({ "status": true, "message": "messages queued" }))
    }

    /// `200 {"status": false, "message": ...}`
    pub fn rejected(message: &str) -> Self {
        Self::new().json(json!({ "status": false, "message": message }))
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Add a header. Invalid names or values are ignored.
    pub fn header(mut self, key: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Bytes::from(body.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_times_bounds() {
        assert!(Times::Once.is_satisfied_by(1));
        assert!(!Times::Once.is_satisfied_by(2));
        assert!(Times::Exactly(0).is_satisfied_by(0));
        assert!(Times::AtLeast(2).is_satisfied_by(5));
        assert!(!Times::AtMost(2).is_satisfied_by(3));
        assert!(Times::Any.is_satisfied_by(42));
    }

    #[test]
    fn test_canned_responses() {
        let accepted = MockResponse::accepted();
        let body: serde_json::Value = serde_json::from_slice(&accepted.body).unwrap();
        assert_eq!(body["status"], true);
        assert_eq!(accepted.headers[CONTENT_TYPE], "application/json");

        let rejected = MockResponse::rejected("quota exceeded");
        let body: serde_json::Value = serde_json::from_slice(&rejected.body).unwrap();
        assert_eq!(body["status"], false);
        assert_eq!(body["message"], "quota exceeded");
    }
}
