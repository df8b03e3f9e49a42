//! Request encoding: [`RequestSpec`] to [`WireRequest`].
//!
//! Encoding is the only step that touches the file system (for file parts).
//! It runs once per logical call; retries replay the same bytes.

use bytes::{BufMut, Bytes, BytesMut};
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::error::EncodeError;
use crate::request::{BodySpec, FormValue, Method, Part, ProtocolVersion, RequestSpec};

/// Common content types.
pub mod content_types {
    pub const JSON: &str = "application/json";
    pub const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";
    pub const MULTIPART_FORM_DATA: &str = "multipart/form-data";
    pub const OCTET_STREAM: &str = "application/octet-stream";
    pub const TEXT_PLAIN: &str = "text/plain";
}

/// A request ready for the transport engine.
#[derive(Debug, Clone)]
pub struct WireRequest {
    /// Request method.
    pub method: Method,
    /// Parsed absolute URI.
    pub uri: Url,
    /// Requested protocol version.
    pub version: ProtocolVersion,
    /// Validated headers, `Content-Type` included.
    pub headers: HeaderMap,
    /// Encoded body.
    pub body: Bytes,
    /// Applies to each physical attempt.
    pub timeout: Duration,
    /// Reject invalid certificates.
    pub tls_verify: bool,
}

/// Encodes request specs.
#[derive(Debug, Clone)]
pub struct RequestEncoder {
    timeout: Duration,
    tls_verify: bool,
}

impl Default for RequestEncoder {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), true)
    }
}

impl RequestEncoder {
    /// `timeout` applies unless the request sets its own.
    pub fn new(timeout: Duration, tls_verify: bool) -> Self {
        Self { timeout, tls_verify }
    }

    /// Default per-attempt timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Validate and serialize `spec`. Files are read here.
    pub fn encode(&self, spec: &RequestSpec) -> Result<WireRequest, EncodeError> {
        let uri = Url::parse(spec.uri()).map_err(|e| EncodeError::InvalidUri {
            uri: spec.uri().to_string(),
            reason: e.to_string(),
        })?;

        let mut headers = HeaderMap::new();
        for (name, value) in spec.header_list().iter() {
            let header_name = HeaderName::try_from(name).map_err(|_| EncodeError::InvalidHeader {
                name: name.to_string(),
            })?;
            let header_value = HeaderValue::try_from(value).map_err(|_| EncodeError::InvalidHeader {
                name: name.to_string(),
            })?;
            headers.insert(header_name, header_value);
        }

        let body = match spec.body_spec() {
            BodySpec::Empty => Bytes::new(),
            BodySpec::Json(value) => {
                set_default_content_type(&mut headers, content_types::JSON);
                Bytes::from(serde_json::to_vec(value)?)
            }
            BodySpec::Form(fields) => {
                let parts = fields
                    .iter()
                    .map(|(name, value)| form_part(name, value))
                    .collect::<Result<Vec<_>, _>>()?;
                encode_multipart(&mut headers, &parts)?
            }
            BodySpec::RawMultipart(parts) => encode_multipart(&mut headers, parts)?,
            BodySpec::UrlEncoded(fields) => {
                set_default_content_type(&mut headers, content_types::FORM_URLENCODED);
                let encoded = url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(fields)
                    .finish();
                Bytes::from(encoded)
            }
            BodySpec::Raw {
                bytes,
                content_type,
            } => {
                if let Some(ct) = content_type {
                    let value = HeaderValue::try_from(ct.as_str()).map_err(|_| {
                        EncodeError::InvalidHeader {
                            name: CONTENT_TYPE.to_string(),
                        }
                    })?;
                    if !headers.contains_key(CONTENT_TYPE) {
                        headers.insert(CONTENT_TYPE, value);
                    }
                }
                bytes.clone()
            }
        };

        Ok(WireRequest {
            method: spec.method(),
            uri,
            version: spec.protocol_version(),
            headers,
            body,
            timeout: spec.timeout_override().unwrap_or(self.timeout),
            tls_verify: self.tls_verify,
        })
    }
}

fn set_default_content_type(headers: &mut HeaderMap, content_type: &'static str) {
    if !headers.contains_key(CONTENT_TYPE) {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    }
}

/// Resolve a form field into a multipart part, reading file contents.
fn form_part(name: &str, value: &FormValue) -> Result<Part, EncodeError> {
    match value {
        FormValue::Text(text) => Ok(Part::text(name, text.clone())),
        FormValue::File(file) => {
            let contents = read_file(&file.path)?;
            let filename = file.filename.clone().unwrap_or_else(|| {
                file.path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| name.to_string())
            });
            let mime = match &file.mime_type {
                Some(mime) => mime.clone(),
                None => infer_mime(Some(&filename), &contents),
            };
            Ok(Part::bytes(name, contents)
                .filename(filename)
                .header("Content-Type", mime))
        }
    }
}

fn read_file(path: &Path) -> Result<Bytes, EncodeError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Bytes::from(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(EncodeError::FileNotFound {
            path: path.to_path_buf(),
        }),
        Err(source) => Err(EncodeError::ReadFile {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Guess a MIME type: magic bytes first, then the file extension, then
/// plain text for valid UTF-8, else `application/octet-stream`.
pub fn infer_mime(filename: Option<&str>, contents: &[u8]) -> String {
    if let Some(mime) = sniff(contents) {
        return mime.to_string();
    }
    if let Some(mime) = filename.and_then(|f| mime_guess::from_path(f).first()) {
        return mime.essence_str().to_string();
    }
    if !contents.contains(&0) && std::str::from_utf8(contents).is_ok() {
        return content_types::TEXT_PLAIN.to_string();
    }
    content_types::OCTET_STREAM.to_string()
}

fn sniff(contents: &[u8]) -> Option<&'static str> {
    const SIGNATURES: &[(&[u8], &str)] = &[
        (b"\x89PNG\r\n\x1a\n", "image/png"),
        (b"\xFF\xD8\xFF", "image/jpeg"),
        (b"GIF87a", "image/gif"),
        (b"GIF89a", "image/gif"),
        (b"%PDF-", "application/pdf"),
        (b"PK\x03\x04", "application/zip"),
        (b"\x1F\x8B", "application/gzip"),
    ];
    SIGNATURES
        .iter()
        .find(|(magic, _)| contents.starts_with(magic))
        .map(|(_, mime)| *mime)
}

/// Random multipart boundary.
pub fn generate_boundary() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect();
    format!("courier-{suffix}")
}

/// Escape a value for use inside a quoted `Content-Disposition` parameter.
fn quote(value: &str) -> String {
    value
        .replace('"', "%22")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

fn encode_multipart(headers: &mut HeaderMap, parts: &[Part]) -> Result<Bytes, EncodeError> {
    let boundary = generate_boundary();
    let content_type = format!("{}; boundary={boundary}", content_types::MULTIPART_FORM_DATA);
    let value = HeaderValue::try_from(content_type).map_err(|_| EncodeError::InvalidHeader {
        name: CONTENT_TYPE.to_string(),
    })?;
    headers.insert(CONTENT_TYPE, value);

    Ok(write_multipart(&boundary, parts))
}

/// Serialize parts as `multipart/form-data` with the given boundary.
pub fn write_multipart(boundary: &str, parts: &[Part]) -> Bytes {
    let mut buf = BytesMut::new();
    for part in parts {
        buf.put_slice(format!("--{boundary}\r\n").as_bytes());
        let mut disposition =
            format!("Content-Disposition: form-data; name=\"{}\"", quote(&part.name));
        if let Some(filename) = &part.filename {
            disposition.push_str(&format!("; filename=\"{}\"", quote(filename)));
        }
        buf.put_slice(disposition.as_bytes());
        buf.put_slice(b"\r\n");
        for (name, value) in &part.headers {
            buf.put_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        buf.put_slice(b"\r\n");
        buf.put_slice(&part.contents);
        buf.put_slice(b"\r\n");
    }
    buf.put_slice(format!("--{boundary}--\r\n").as_bytes());
    buf.freeze()
}
