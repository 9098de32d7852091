//! Capture records.
//!
//! A [`CaptureRecord`] is one request/response exchange as it will be sent
//! to the ingestion service. Records are built once the downstream handler
//! has completed and are immutable afterwards, except for header masking.

use bytes::Bytes;
use http::HeaderMap;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

/// Headers and body of one side of an exchange.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HttpDefinition {
    /// All headers, including repeated values, in received order
    #[serde(serialize_with = "serialize_headers")]
    pub header: HeaderMap,

    /// Exact body bytes
    #[serde(serialize_with = "serialize_body")]
    pub body: Bytes,
}

impl HttpDefinition {
    /// Create a definition from headers and body.
    pub fn new(header: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            header,
            body: body.into(),
        }
    }
}

/// One captured request/response pair.
#[derive(Debug, Clone, Serialize)]
pub struct CaptureRecord {
    /// Unix timestamp (seconds) at which the exchange completed
    pub created_at: i64,

    /// Application identifier, possibly empty
    pub app: String,

    /// Resolved client IP, possibly empty
    pub ip_address: String,

    /// Request path (without query string)
    pub path: String,

    /// HTTP method
    pub method: String,

    /// Status code the client received
    pub status_code: u16,

    /// Request side
    pub request: HttpDefinition,

    /// Response side
    pub response: HttpDefinition,
}

impl CaptureRecord {
    /// Create a record stamped with the current time.
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            created_at: chrono::Utc::now().timestamp(),
            app: String::new(),
            ip_address: String::new(),
            path: path.into(),
            method: method.into(),
            status_code: 0,
            request: HttpDefinition::default(),
            response: HttpDefinition::default(),
        }
    }

    /// Set the application identifier.
    pub fn with_app(mut self, app: impl Into<String>) -> Self {
        self.app = app.into();
        self
    }

    /// Set the client IP.
    pub fn with_ip_address(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = ip.into();
        self
    }

    /// Set the response status code.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = status;
        self
    }

    /// Set the request side.
    pub fn with_request(mut self, request: HttpDefinition) -> Self {
        self.request = request;
        self
    }

    /// Set the response side.
    pub fn with_response(mut self, response: HttpDefinition) -> Self {
        self.response = response;
        self
    }

    /// Override the creation timestamp.
    pub fn with_created_at(mut self, created_at: i64) -> Self {
        self.created_at = created_at;
        self
    }
}

/// Outbound envelope for one batch.
#[derive(Debug, Serialize)]
pub struct BatchEnvelope<'a> {
    /// Records in buffer order
    pub messages: &'a [CaptureRecord],
}

fn serialize_headers<S>(headers: &HeaderMap, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut map = serializer.serialize_map(Some(headers.keys_len()))?;
    for name in headers.keys() {
        let values: Vec<String> = headers
            .get_all(name)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect();
        map.serialize_entry(name.as_str(), &values)?;
    }
    map.end()
}

fn serialize_body<S>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&String::from_utf8_lossy(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{HeaderValue, ACCEPT, CONTENT_TYPE};
    use serde_json::json;

    #[test]
    fn test_record_wire_format() {
        let mut req_headers = HeaderMap::new();
        req_headers.append(ACCEPT, HeaderValue::from_static("text/html"));
        req_headers.append(ACCEPT, HeaderValue::from_static("application/json"));

        let mut resp_headers = HeaderMap::new();
        resp_headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));

        let record = CaptureRecord::new("POST", "/users")
            .with_created_at(1_700_000_000)
            .with_app("app-1")
            .with_ip_address("1.2.3.4")
            .with_status(201)
            .with_request(HttpDefinition::new(req_headers, "ping"))
            .with_response(HttpDefinition::new(resp_headers, "pong"));

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({
                "created_at": 1_700_000_000,
                "app": "app-1",
                "ip_address": "1.2.3.4",
                "path": "/users",
                "method": "POST",
                "status_code": 201,
                "request": {
                    "header": {"accept": ["text/html", "application/json"]},
                    "body": "ping"
                },
                "response": {
                    "header": {"content-type": ["text/plain"]},
                    "body": "pong"
                }
            })
        );
    }

    #[test]
    fn test_batch_envelope() {
        let records = vec![
            CaptureRecord::new("GET", "/a"),
            CaptureRecord::new("GET", "/b"),
        ];
        let value = serde_json::to_value(BatchEnvelope { messages: &records }).unwrap();
        let messages = value["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["path"], "/a");
        assert_eq!(messages[1]["path"], "/b");
    }

    #[test]
    fn test_non_utf8_body_is_lossy() {
        let record = CaptureRecord::new("GET", "/")
            .with_response(HttpDefinition::new(HeaderMap::new(), vec![0xff, b'o', b'k']));
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["response"]["body"], "\u{fffd}ok");
        // the in-memory copy stays exact
        assert_eq!(record.response.body.as_ref(), &[0xff, b'o', b'k']);
    }
}
