//! Sensitive header masking.

use http::header::{Entry, HeaderName, HeaderValue};

use crate::error::ConfigError;
use crate::record::CaptureRecord;

/// Replacement for every masked value. Fixed length, so the original
/// secret's length is not leaked.
pub const MASK: &str = "***************";

/// Redacts configured request headers in a [`CaptureRecord`].
#[derive(Debug, Clone, Default)]
pub struct HeaderMasker {
    names: Vec<HeaderName>,
}

impl HeaderMasker {
    /// Create a masker for the given header names (case-insensitive).
    pub fn new<I, S>(names: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parsed: Vec<HeaderName> = Vec::new();
        for name in names {
            let name = name.as_ref();
            let header = HeaderName::from_bytes(name.trim().as_bytes())
                .map_err(|_| ConfigError::InvalidHeaderName(name.to_string()))?;
            if !parsed.contains(&header) {
                parsed.push(header);
            }
        }
        Ok(Self { names: parsed })
    }

    /// Header names this masker redacts.
    pub fn names(&self) -> &[HeaderName] {
        &self.names
    }

    /// Mask the record in place. Response headers are left untouched.
    pub fn mask(&self, record: &mut CaptureRecord) {
        let headers = &mut record.request.header;
        for name in &self.names {
            // In place, so the order of other headers is kept
            if let Entry::Occupied(mut entry) = headers.entry(name) {
                for value in entry.iter_mut() {
                    *value = HeaderValue::from_static(MASK);
                }
            }
        }
    }

    /// Mask every record of a batch.
    pub fn mask_all(&self, records: &mut [CaptureRecord]) {
        if self.names.is_empty() {
            return;
        }
        for record in records {
            self.mask(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::HttpDefinition;
    use http::header::AUTHORIZATION;
    use http::HeaderMap;
    use proptest::prelude::*;

    fn record_with(request: HeaderMap, response: HeaderMap) -> CaptureRecord {
        CaptureRecord::new("GET", "/")
            .with_request(HttpDefinition::new(request, ""))
            .with_response(HttpDefinition::new(response, ""))
    }

    #[test]
    fn test_masks_request_authorization() {
        let mut req = HeaderMap::new();
        req.insert(AUTHORIZATION, "Bearer secret-token".parse().unwrap());
        req.insert("content-type", "application/json".parse().unwrap());
        let mut record = record_with(req, HeaderMap::new());

        HeaderMasker::new(["Authorization"]).unwrap().mask(&mut record);

        assert_eq!(record.request.header.get(AUTHORIZATION).unwrap(), MASK);
        assert_eq!(
            record.request.header.get("content-type").unwrap(),
            "application/json"
        );
    }

    #[test]
    fn test_masks_every_value_of_repeated_header() {
        let mut req = HeaderMap::new();
        req.append("x-api-key", "one".parse().unwrap());
        req.append("x-api-key", "two".parse().unwrap());
        let mut record = record_with(req, HeaderMap::new());

        HeaderMasker::new(["X-Api-Key"]).unwrap().mask(&mut record);

        let values: Vec<_> = record.request.header.get_all("x-api-key").iter().collect();
        assert_eq!(values.len(), 2);
        assert!(values.iter().all(|v| *v == MASK));
    }

    #[test]
    fn test_masking_keeps_header_order() {
        let mut req = HeaderMap::new();
        req.insert(AUTHORIZATION, "Bearer secret".parse().unwrap());
        req.insert("accept", "*/*".parse().unwrap());
        req.insert("host", "example.com".parse().unwrap());
        let mut record = record_with(req, HeaderMap::new());

        HeaderMasker::new(["Authorization"]).unwrap().mask(&mut record);

        let names: Vec<_> = record.request.header.keys().map(|k| k.as_str()).collect();
        assert_eq!(names, vec!["authorization", "accept", "host"]);
        assert_eq!(record.request.header[AUTHORIZATION], MASK);
        assert_eq!(record.request.header["host"], "example.com");
    }

    #[test]
    fn test_response_headers_untouched() {
        let mut resp = HeaderMap::new();
        resp.insert(AUTHORIZATION, "server-value".parse().unwrap());
        let mut record = record_with(HeaderMap::new(), resp);

        HeaderMasker::new(["authorization"]).unwrap().mask(&mut record);

        assert_eq!(record.response.header.get(AUTHORIZATION).unwrap(), "server-value");
        assert!(record.request.header.get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_invalid_header_name_rejected() {
        let err = HeaderMasker::new(["bad header"]).unwrap_err();
        assert_eq!(err, ConfigError::InvalidHeaderName("bad header".to_string()));
    }

    #[test]
    fn test_duplicate_names_collapsed() {
        let masker = HeaderMasker::new(["Authorization", "authorization"]).unwrap();
        assert_eq!(masker.names().len(), 1);
    }

    proptest! {
        /// Masked values never contain the secret and always have the same length.
        #[test]
        fn prop_mask_is_constant_length(secret in "[A-Za-z0-9+/=._-]{1,256}") {
            let mut req = HeaderMap::new();
            req.insert(AUTHORIZATION, secret.parse().unwrap());
            let mut record = record_with(req, HeaderMap::new());

            HeaderMasker::new(["authorization"]).unwrap().mask(&mut record);

            let masked = record.request.header.get(AUTHORIZATION).unwrap();
            prop_assert_eq!(masked.len(), MASK.len());
            prop_assert_eq!(masked.to_str().unwrap(), MASK);
        }
    }
}
