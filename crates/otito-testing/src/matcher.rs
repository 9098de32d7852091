use http::{HeaderMap, Method};
use serde_json::Value;

/// Matcher for uploads to the mock ingestion server
#[derive(Debug, Clone, Default)]
pub struct RequestMatcher {
    pub(crate) method: Option<Method>,
    pub(crate) path: Option<String>,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body_json: Option<Value>,
    pub(crate) message_count: Option<usize>,
}

impl RequestMatcher {
    /// Create a new matcher
    pub fn new() -> Self {
        Self::default()
    }

    /// Match a batch upload: `POST /messages`
    pub fn batch_upload() -> Self {
        Self::new().method(Method::POST).path("/messages")
    }

    /// Match a specific HTTP method
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Match a specific path
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Match a specific header
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Match `Authorization: Bearer <token>`
    pub fn bearer(self, token: impl AsRef<str>) -> Self {
        self.header("authorization", format!("Bearer {}", token.as_ref()))
    }

    /// Match an exact JSON body
    pub fn body_json(mut self, body: Value) -> Self {
        self.body_json = Some(body);
        self
    }

    /// Match an envelope carrying exactly `n` messages
    pub fn message_count(mut self, n: usize) -> Self {
        self.message_count = Some(n);
        self
    }

    /// Check if the matcher matches a request
    pub fn matches(&self, method: &Method, path: &str, headers: &HeaderMap, body: &[u8]) -> bool {
        if self.method.as_ref().is_some_and(|m| m != method) {
            return false;
        }

        if self.path.as_deref().is_some_and(|p| p != path) {
            return false;
        }

        let headers_match = self
            .headers
            .iter()
            .all(|(k, v)| headers.get(k).is_some_and(|val| val == v.as_str()));
        if !headers_match {
            return false;
        }

        if self.body_json.is_none() && self.message_count.is_none() {
            return true;
        }

        let Ok(actual) = serde_json::from_slice::<Value>(body) else {
            return false;
        };

        if self.body_json.as_ref().is_some_and(|expected| expected != &actual) {
            return false;
        }

        if let Some(n) = self.message_count {
            let count = actual
                .get("messages")
                .and_then(Value::as_array)
                .map(Vec::len);
            if count != Some(n) {
                return false;
            }
        }

        true
    }
}
