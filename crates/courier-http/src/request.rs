//! Logical request description.
//!
//! A [`RequestSpec`] is built once with by-value setters and never mutated
//! after it is handed to the transport. It says nothing about bytes; the
//! [`RequestEncoder`](crate::RequestEncoder) does that.

use bytes::Bytes;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::EncodeError;

/// Supported HTTP verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl Method {
    /// Every supported verb.
    pub const ALL: [Method; 7] = [
        Method::Get,
        Method::Post,
        Method::Put,
        Method::Patch,
        Method::Delete,
        Method::Head,
        Method::Options,
    ];

    /// Upper-case wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = EncodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| EncodeError::UnsupportedMethod(s.to_string()))
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
            Method::Head => reqwest::Method::HEAD,
            Method::Options => reqwest::Method::OPTIONS,
        }
    }
}

/// HTTP protocol version requested for the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolVersion {
    Http10,
    #[default]
    Http11,
    Http2,
}

impl ProtocolVersion {
    /// Version as it appears after `HTTP/`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolVersion::Http10 => "1.0",
            ProtocolVersion::Http11 => "1.1",
            ProtocolVersion::Http2 => "2",
        }
    }
}

impl From<ProtocolVersion> for reqwest::Version {
    fn from(version: ProtocolVersion) -> Self {
        match version {
            ProtocolVersion::Http10 => reqwest::Version::HTTP_10,
            ProtocolVersion::Http11 => reqwest::Version::HTTP_11,
            ProtocolVersion::Http2 => reqwest::Version::HTTP_2,
        }
    }
}

/// Ordered header list with case-insensitive names.
///
/// Setting a name that is already present replaces its value in place, so
/// the last write wins and the first position is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList {
    entries: Vec<(String, String)>,
}

impl HeaderList {
    /// Empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name` to `value`, replacing any existing value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Value for `name`, if set.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether `name` is set, ignoring case.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Apply every entry of `other` on top of `self`.
    pub fn merge(&mut self, other: &HeaderList) {
        for (name, value) in other.iter() {
            self.set(name, value);
        }
    }

    /// Entries in insertion order, names as first written.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of distinct names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no header is set.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HeaderList {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut list = HeaderList::new();
        for (k, v) in iter {
            list.set(k, v);
        }
        list
    }
}

/// A file to upload, read from disk at encode time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    /// Read when the request is encoded.
    pub path: PathBuf,
    /// Defaults to the path's file name.
    pub filename: Option<String>,
    /// Inferred from the contents and file name when absent.
    pub mime_type: Option<String>,
}

impl FilePart {
    /// Upload the file at `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            filename: None,
            mime_type: None,
        }
    }

    /// Name sent in `Content-Disposition`.
    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// `Content-Type` of the part, skipping inference.
    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

/// Value of a form field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormValue {
    Text(String),
    File(FilePart),
}

impl From<&str> for FormValue {
    fn from(value: &str) -> Self {
        FormValue::Text(value.to_string())
    }
}

impl From<String> for FormValue {
    fn from(value: String) -> Self {
        FormValue::Text(value)
    }
}

impl From<FilePart> for FormValue {
    fn from(file: FilePart) -> Self {
        FormValue::File(file)
    }
}

/// A multipart part passed through verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    /// Form field name.
    pub name: String,
    /// Part body.
    pub contents: Bytes,
    /// Optional `filename` parameter.
    pub filename: Option<String>,
    /// Extra part headers, written after `Content-Disposition`.
    pub headers: Vec<(String, String)>,
}

impl Part {
    /// UTF-8 text part.
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::bytes(name, Bytes::from(value.into()))
    }

    /// Binary part.
    pub fn bytes(name: impl Into<String>, contents: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            contents: contents.into(),
            filename: None,
            headers: Vec::new(),
        }
    }

    /// Set the `filename` parameter.
    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Extra part header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Request body, before encoding.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum BodySpec {
    #[default]
    Empty,
    /// Serialized as UTF-8 JSON.
    Json(serde_json::Value),
    /// `multipart/form-data`; file values are read at encode time.
    Form(Vec<(String, FormValue)>),
    /// `multipart/form-data` from caller-built parts.
    RawMultipart(Vec<Part>),
    /// `application/x-www-form-urlencoded`.
    UrlEncoded(Vec<(String, String)>),
    /// Bytes sent as-is.
    Raw {
        bytes: Bytes,
        content_type: Option<String>,
    },
}

impl BodySpec {
    /// JSON body from any serializable value.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, EncodeError> {
        Ok(BodySpec::Json(serde_json::to_value(value)?))
    }

    /// True for [`BodySpec::Empty`].
    pub fn is_empty(&self) -> bool {
        matches!(self, BodySpec::Empty)
    }
}

/// A complete logical request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    method: Method,
    uri: String,
    headers: HeaderList,
    body: BodySpec,
    version: ProtocolVersion,
    timeout: Option<Duration>,
}

impl RequestSpec {
    /// Request with no headers, no body and the default version.
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            headers: HeaderList::new(),
            body: BodySpec::Empty,
            version: ProtocolVersion::default(),
            timeout: None,
        }
    }

    /// Build from a verb name, rejecting verbs outside [`Method::ALL`].
    pub fn from_verb(verb: &str, uri: impl Into<String>) -> Result<Self, EncodeError> {
        Ok(Self::new(verb.parse()?, uri))
    }

    /// Set one header, replacing any previous value.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Merge `headers` on top of the current ones.
    pub fn headers(mut self, headers: &HeaderList) -> Self {
        self.headers.merge(headers);
        self
    }

    /// Replace the body.
    pub fn body(mut self, body: BodySpec) -> Self {
        self.body = body;
        self
    }

    /// Protocol version.
    pub fn version(mut self, version: ProtocolVersion) -> Self {
        self.version = version;
        self
    }

    /// Per-attempt timeout for this request only.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Request method.
    pub fn method(&self) -> Method {
        self.method
    }

    /// Absolute request URI.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Headers in insertion order.
    pub fn header_list(&self) -> &HeaderList {
        &self.headers
    }

    /// Body before encoding.
    pub fn body_spec(&self) -> &BodySpec {
        &self.body
    }

    /// Protocol version.
    pub fn protocol_version(&self) -> ProtocolVersion {
        self.version
    }

    /// Timeout replacing the encoder default, if any.
    pub fn timeout_override(&self) -> Option<Duration> {
        self.timeout
    }
}
