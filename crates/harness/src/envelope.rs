//! Normalized, soft-parsed HTTP responses

use bytes::Bytes;
use serde_json::Value;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ParseError;
use crate::transport::RawResponse;

/// A response as seen by assertions.
///
/// Built once per HTTP call and never mutated. `parsed_body` is present
/// only when the status is below 400, the content-type names a structured
/// format and parsing succeeded; in every other case `parse_error` says why.
#[derive(Debug, Clone)]
pub struct ResponseEnvelope {
    status: u16,
    headers: BTreeMap<String, String>,
    raw_body: Bytes,
    parsed_body: Option<Value>,
    parse_error: Option<ParseError>,
    elapsed: Duration,
}

impl ResponseEnvelope {
    /// Wrap a transport response, parsing the body if appropriate
    pub fn from_raw(raw: RawResponse) -> Self {
        let headers: BTreeMap<String, String> = raw
            .headers
            .into_iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value))
            .collect();

        let (parsed_body, parse_error) = match parse_body(raw.status, &headers, &raw.body) {
            Ok(value) => (Some(value), None),
            Err(err) => {
                match &err {
                    ParseError::Malformed(reason) => {
                        warn!("Response with status {} is not valid JSON: {}", raw.status, reason)
                    }
                    other => debug!("Body left unparsed: {}", other),
                }
                (None, Some(err))
            }
        };

        Self {
            status: raw.status,
            headers,
            raw_body: raw.body,
            parsed_body,
            parse_error,
            elapsed: raw.elapsed,
        }
    }

    /// Convenience constructor for tests and custom transports
    pub fn new<I, K, V>(status: u16, headers: I, body: impl Into<Bytes>) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::from_raw(RawResponse {
            status,
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            body: body.into(),
            elapsed: Duration::ZERO,
        })
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Header lookup, case-insensitive
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn raw_body(&self) -> &Bytes {
        &self.raw_body
    }

    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.raw_body)
    }

    pub fn parsed_body(&self) -> Option<&Value> {
        self.parsed_body.as_ref()
    }

    pub fn parse_error(&self) -> Option<&ParseError> {
        self.parse_error.as_ref()
    }

    pub fn is_parsed(&self) -> bool {
        self.parsed_body.is_some()
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Value at a dotted path inside the parsed body
    pub fn field(&self, path: &str) -> Option<&Value> {
        self.parsed_body
            .as_ref()
            .and_then(|body| lookup_path(body, path))
    }
}

fn parse_body(status: u16, headers: &BTreeMap<String, String>, body: &[u8]) -> Result<Value, ParseError> {
    // Error bodies are frequently HTML or plain text regardless of content-type
    if status >= 400 {
        return Err(ParseError::SkippedErrorStatus(status));
    }

    let content_type = headers
        .get("content-type")
        .ok_or(ParseError::MissingContentType)?;
    if !is_structured(content_type) {
        return Err(ParseError::UnstructuredContentType(content_type.clone()));
    }

    serde_json::from_slice(body).map_err(|e| ParseError::Malformed(e.to_string()))
}

/// Whether a content-type names a JSON document
pub fn is_structured(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime == "application/json" || mime == "text/json" || mime.ends_with("+json")
}

/// Resolve a dot-separated path such as `rating.rate` or `0.title`.
///
/// Numeric segments index into sequences; the empty path (or `$`) is the
/// value itself.
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    if path.is_empty() || path == "$" {
        return Some(value);
    }

    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    const JSON: [(&str, &str); 1] = [("Content-Type", "application/json; charset=utf-8")];

    #[test]
    fn test_parses_json_success_body() {
        let env = ResponseEnvelope::new(200, JSON, r#"{"id": 11, "title": "Ring"}"#);
        assert!(env.is_parsed());
        assert!(env.parse_error().is_none());
        assert_eq!(env.field("id"), Some(&json!(11)));
        assert_eq!(env.header("content-type"), Some("application/json; charset=utf-8"));
    }

    #[test]
    fn test_error_status_is_never_parsed() {
        let env = ResponseEnvelope::new(404, JSON, r#"{"error": "not found"}"#);
        assert!(env.parsed_body().is_none());
        assert_eq!(env.parse_error(), Some(&ParseError::SkippedErrorStatus(404)));
        assert_eq!(env.body_text(), r#"{"error": "not found"}"#);
    }

    #[test]
    fn test_malformed_json_is_recorded_not_raised() {
        let env = ResponseEnvelope::new(200, JSON, "<html>oops</html>");
        assert!(env.parsed_body().is_none());
        assert!(matches!(env.parse_error(), Some(ParseError::Malformed(_))));
    }

    #[test]
    fn test_non_json_content_type() {
        let env = ResponseEnvelope::new(200, [("content-type", "text/html")], "{}");
        assert!(env.parsed_body().is_none());
        assert_eq!(
            env.parse_error(),
            Some(&ParseError::UnstructuredContentType("text/html".to_string()))
        );
    }

    #[test]
    fn test_missing_content_type() {
        let env = ResponseEnvelope::new(204, Vec::<(String, String)>::new(), "");
        assert_eq!(env.parse_error(), Some(&ParseError::MissingContentType));
    }

    #[test_case("application/json", true ; "plain json")]
    #[test_case("application/problem+json", true ; "json suffix")]
    #[test_case("Application/JSON; charset=utf-8", true ; "mixed case with params")]
    #[test_case("text/plain", false ; "plain text")]
    #[test_case("", false ; "empty")]
    fn test_is_structured(content_type: &str, expected: bool) {
        assert_eq!(is_structured(content_type), expected);
    }

    #[test]
    fn test_lookup_path() {
        let body = json!([{"id": 1, "rating": {"rate": 3.9}}, {"id": 2}]);
        assert_eq!(lookup_path(&body, "0.rating.rate"), Some(&json!(3.9)));
        assert_eq!(lookup_path(&body, "1.id"), Some(&json!(2)));
        assert_eq!(lookup_path(&body, "2.id"), None);
        assert_eq!(lookup_path(&body, "0.missing"), None);
        assert_eq!(lookup_path(&body, ""), Some(&body));
    }
}
