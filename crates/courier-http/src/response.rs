//! Read-once response wrapper with lazy JSON decoding.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::borrow::Cow;
use std::sync::OnceLock;

use crate::parser::ResponseHead;

/// Response headers: lower-cased names, multiple values per name, ordered
/// by first occurrence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHeaders {
    entries: Vec<(String, Vec<String>)>,
}

impl ResponseHeaders {
    /// Empty header set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value; repeated names accumulate.
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        let key = name.to_ascii_lowercase();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(value),
            None => self.entries.push((key, vec![value])),
        }
    }

    /// All values for `name`, empty when absent.
    pub fn get_all(&self, name: &str) -> &[String] {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
            .unwrap_or(&[])
    }

    /// First value for `name`.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.get_all(name).first().map(String::as_str)
    }

    /// All values for `name` joined with `", "`.
    pub fn line(&self, name: &str) -> Option<String> {
        let values = self.get_all(name);
        (!values.is_empty()).then(|| values.join(", "))
    }

    /// Whether `name` is present, ignoring case.
    pub fn contains(&self, name: &str) -> bool {
        !self.get_all(name).is_empty()
    }

    /// Iterate `(name, values)` in first-occurrence order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Number of distinct names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no header was received.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for ResponseHeaders {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = ResponseHeaders::new();
        for (k, v) in iter {
            headers.append(k.as_ref(), v);
        }
        headers
    }
}

/// Result of [`Response::json`] and [`Response::json_path`].
#[derive(Debug, Clone, Copy)]
pub enum Json<'a> {
    /// The decoded document, or the node at the requested path.
    Value(&'a Value),
    /// The body is JSON but the path does not lead anywhere.
    Absent,
    /// The body is not JSON; the response itself is handed back.
    NotJson(&'a Response),
}

impl<'a> Json<'a> {
    /// The decoded value, if any.
    pub fn value(&self) -> Option<&'a Value> {
        match self {
            Json::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Empty or whitespace-only body.
    pub fn is_absent(&self) -> bool {
        matches!(self, Json::Absent)
    }

    /// Body present but not valid JSON.
    pub fn is_not_json(&self) -> bool {
        matches!(self, Json::NotJson(_))
    }
}

impl PartialEq for Json<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Json::Value(a), Json::Value(b)) => a == b,
            (Json::Absent, Json::Absent) => true,
            (Json::NotJson(a), Json::NotJson(b)) => std::ptr::eq(*a, *b),
            _ => false,
        }
    }
}

impl PartialEq<Value> for Json<'_> {
    fn eq(&self, other: &Value) -> bool {
        self.value() == Some(other)
    }
}

/// A completed response.
///
/// The body is fully buffered when the wrapper is built; every accessor reads
/// from memory. The JSON decode runs at most once, on first use, and the
/// outcome (including "not JSON") is cached for the wrapper's lifetime.
#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    version: String,
    reason: String,
    headers: ResponseHeaders,
    body: Bytes,
    decoded: OnceLock<Option<Value>>,
}

impl Response {
    /// Response from its parts, with version `"1.1"` and no reason.
    pub fn new(status: u16, headers: ResponseHeaders, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            version: "1.1".to_string(),
            reason: String::new(),
            headers,
            body: body.into(),
            decoded: OnceLock::new(),
        }
    }

    /// Build from a parsed head and the buffered body.
    pub fn from_head(head: ResponseHead, body: Bytes) -> Self {
        Self {
            status: head.status,
            version: head.version,
            reason: head.reason,
            headers: head.headers,
            body,
            decoded: OnceLock::new(),
        }
    }

    /// Status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Reason phrase from the status line; may be empty.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Protocol version from the status line, e.g. `"1.1"` or `"2"`.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// 100–199.
    pub fn informational(&self) -> bool {
        (100..200).contains(&self.status)
    }

    /// 200–299.
    pub fn successful(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Exactly 200.
    pub fn ok(&self) -> bool {
        self.status == 200
    }

    /// 300–399.
    pub fn redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    /// 400–499.
    pub fn client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    /// 500 and above.
    pub fn server_error(&self) -> bool {
        self.status >= 500
    }

    /// Body as text; invalid UTF-8 is replaced.
    pub fn body(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Raw body bytes.
    pub fn bytes(&self) -> &Bytes {
        &self.body
    }

    /// First value of the named header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.first(name)
    }

    /// All values of the named header joined with `", "`.
    pub fn header_line(&self, name: &str) -> Option<String> {
        self.headers.line(name)
    }

    /// Every header of the final response.
    pub fn headers(&self) -> &ResponseHeaders {
        &self.headers
    }

    /// Whether [`json`](Self::json) has already run.
    pub fn decode_attempted(&self) -> bool {
        self.decoded.get().is_some()
    }

    fn decoded(&self) -> Option<&Value> {
        self.decoded
            .get_or_init(|| serde_json::from_slice(&self.body).ok())
            .as_ref()
    }

    /// The decoded body, or [`Json::NotJson`] with `self` when the body does
    /// not parse.
    pub fn json(&self) -> Json<'_> {
        match self.decoded() {
            Some(value) => Json::Value(value),
            None => Json::NotJson(self),
        }
    }

    /// Walk a dot-separated path into the decoded body.
    ///
    /// Object segments are keys; on arrays a segment must be an index. The
    /// first missing key, bad index, or scalar in the way yields
    /// [`Json::Absent`]. An empty path returns the whole document.
    pub fn json_path(&self, path: &str) -> Json<'_> {
        let Some(root) = self.decoded() else {
            return Json::NotJson(self);
        };
        if path.is_empty() {
            return Json::Value(root);
        }

        let mut node = root;
        for segment in path.split('.') {
            let next = match node {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            };
            match next {
                Some(child) => node = child,
                None => return Json::Absent,
            }
        }
        Json::Value(node)
    }

    /// Deserialize the body into `T`. Independent of the cached decode.
    pub fn json_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn response(status: u16, body: &'static str) -> Response {
        let headers: ResponseHeaders = [
            ("Content-Type", "application/json"),
            ("Set-Cookie", "a=1"),
            ("set-cookie", "b=2"),
        ]
        .into_iter()
        .collect();
        Response::new(status, headers, body)
    }

    #[test]
    fn test_status_classification() {
        let cases = [
            (101, [true, false, false, false, false, false]),
            (200, [false, true, true, false, false, false]),
            (204, [false, true, false, false, false, false]),
            (302, [false, false, false, true, false, false]),
            (404, [false, false, false, false, true, false]),
            (429, [false, false, false, false, true, false]),
            (503, [false, false, false, false, false, true]),
        ];
        for (status, expected) in cases {
            let r = response(status, "");
            let actual = [
                r.informational(),
                r.successful(),
                r.ok(),
                r.redirect(),
                r.client_error(),
                r.server_error(),
            ];
            assert_eq!(actual, expected, "status {status}");
        }
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let r = response(200, "");
        assert_eq!(r.header("content-type"), Some("application/json"));
        assert_eq!(r.header("CONTENT-TYPE"), Some("application/json"));
        assert_eq!(r.header("x-missing"), None);
        assert_eq!(r.headers().get_all("Set-Cookie"), ["a=1", "b=2"]);
        assert_eq!(r.header("set-cookie"), Some("a=1"));
        assert_eq!(r.header_line("set-cookie").as_deref(), Some("a=1, b=2"));
        assert_eq!(r.headers().len(), 2);
    }

    #[test]
    fn test_body_is_text() {
        let r = response(200, "héllo");
        assert_eq!(r.body(), "héllo");
        assert_eq!(r.bytes().len(), "héllo".len());
    }

    #[test]
    fn test_json_path_walks_objects() {
        let r = response(200, r#"{"a":{"b":2}}"#);
        assert_eq!(r.json_path("a.b"), json!(2));
        assert!(r.json_path("a.c").is_absent());
        assert!(r.json_path("x.y").is_absent());
        assert!(r.json_path("a.b.c").is_absent());
        assert_eq!(r.json_path(""), json!({"a": {"b": 2}}));
    }

    #[test]
    fn test_json_path_indexes_arrays() {
        let r = response(200, r#"{"items":[{"id":7},{"id":8}]}"#);
        assert_eq!(r.json_path("items.1.id"), json!(8));
        assert!(r.json_path("items.2.id").is_absent());
        assert!(r.json_path("items.first").is_absent());
    }

    #[test]
    fn test_json_null_leaf_is_present() {
        let r = response(200, r#"{"a":null}"#);
        assert_eq!(r.json_path("a"), Json::Value(&Value::Null));
    }

    #[test]
    fn test_not_json_returns_the_response() {
        let r = response(200, "<html></html>");
        match r.json() {
            Json::NotJson(same) => assert!(std::ptr::eq(same, &r)),
            other => panic!("Expected NotJson, got {other:?}"),
        }
        assert!(r.json_path("a").is_not_json());
        assert!(r.decode_attempted());
    }

    #[test]
    fn test_decode_runs_once() {
        let r = response(200, r#"{"n":1}"#);
        assert!(!r.decode_attempted());

        let first = r.json().value().unwrap();
        assert!(r.decode_attempted());
        let second = r.json().value().unwrap();

        assert!(std::ptr::eq(first, second));
        assert_eq!(first, second);
    }

    #[test]
    fn test_concurrent_decode_is_consistent() {
        let r = response(200, r#"{"n":[1,2,3]}"#);
        let values: Vec<Value> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| s.spawn(|| r.json_path("n").value().cloned().unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(values.iter().all(|v| *v == json!([1, 2, 3])));
    }

    #[test]
    fn test_json_as_typed() {
        #[derive(Deserialize)]
        struct Item {
            id: u32,
        }
        let r = response(200, r#"{"id":42}"#);
        assert_eq!(r.json_as::<Item>().unwrap().id, 42);
        assert!(response(200, "nope").json_as::<Item>().is_err());
    }

    #[test]
    fn test_from_head_keeps_status_line_parts() {
        let head =
            crate::parser::parse_raw("HTTP/2 201 Created\r\nLocation: /items/1\r\n").unwrap();
        let r = Response::from_head(head, Bytes::from_static(b"{}"));
        assert_eq!(r.status(), 201);
        assert_eq!(r.version(), "2");
        assert_eq!(r.reason(), "Created");
        assert_eq!(r.header("location"), Some("/items/1"));
    }
}
