//! Raw response head parsing.
//!
//! When redirects are followed the engine reports every hop's status line
//! and header block in order. Only the block that starts at the last status
//! line describes the response the caller gets; everything before it is
//! discarded, headers included.

use regex::Regex;
use std::sync::OnceLock;

use crate::error::ParseError;
use crate::response::ResponseHeaders;

/// Status line plus headers of the final response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    /// Text after `HTTP/`, e.g. `"1.1"`.
    pub version: String,
    /// Three-digit status code.
    pub status: u16,
    /// May be empty.
    pub reason: String,
    /// Headers of the final block only.
    pub headers: ResponseHeaders,
}

fn status_line() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^HTTP/(\d+(?:\.\d+)?)\s+(\d{3})(?:\s+(.*))?$")
            .expect("status line pattern is valid")
    })
}

/// Parse status and header lines into the final [`ResponseHead`].
///
/// Lines may carry a trailing `\r`. Header lines are split on the first
/// `:`; names are lower-cased and values trimmed. Lines without a colon,
/// blank separators included, are skipped.
pub fn parse_head<S: AsRef<str>>(lines: &[S]) -> Result<ResponseHead, ParseError> {
    let pattern = status_line();

    let start = lines
        .iter()
        .rposition(|line| pattern.is_match(trim_eol(line.as_ref())))
        .ok_or(ParseError::NoStatusLine)?;

    let caps = pattern
        .captures(trim_eol(lines[start].as_ref()))
        .ok_or(ParseError::NoStatusLine)?;
    let version = caps[1].to_string();
    let status = caps[2]
        .parse::<u16>()
        .map_err(|_| ParseError::InvalidStatusCode(caps[2].to_string()))?;
    let reason = caps
        .get(3)
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();

    let mut headers = ResponseHeaders::new();
    for line in &lines[start + 1..] {
        if let Some((name, value)) = trim_eol(line.as_ref()).split_once(':') {
            let name = name.trim();
            if !name.is_empty() {
                headers.append(name, value.trim());
            }
        }
    }

    Ok(ResponseHead {
        version,
        status,
        reason,
        headers,
    })
}

/// Parse a raw head block, one line per `\n` (optionally `\r\n`).
pub fn parse_raw(text: &str) -> Result<ResponseHead, ParseError> {
    let lines: Vec<&str> = text.lines().collect();
    parse_head(&lines)
}

fn trim_eol(line: &str) -> &str {
    line.trim_end_matches(['\r', '\n'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_block() {
        let raw = "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nX-Id:  42 \r\n\r\n";
        let head = parse_raw(raw).unwrap();
        assert_eq!(head.version, "1.1");
        assert_eq!(head.status, 200);
        assert_eq!(head.reason, "OK");
        assert_eq!(head.headers.first("content-type"), Some("text/plain"));
        assert_eq!(head.headers.first("x-id"), Some("42"));
    }

    #[test]
    fn test_redirect_chain_keeps_only_last_block() {
        let raw = "HTTP/1.1 302 Found\nLocation: /x\n\nHTTP/1.1 200 OK\nContent-Type: text/plain\n";
        let head = parse_raw(raw).unwrap();
        assert_eq!(head.status, 200);
        assert_eq!(head.headers.len(), 1);
        assert_eq!(head.headers.first("Content-Type"), Some("text/plain"));
        assert!(!head.headers.contains("location"));
    }

    #[test]
    fn test_three_hop_chain() {
        let lines = vec![
            "HTTP/1.1 301 Moved Permanently",
            "Location: /a",
            "Set-Cookie: hop=1",
            "",
            "HTTP/1.1 307 Temporary Redirect",
            "Location: /b",
            "",
            "HTTP/2 404 Not Found",
            "Content-Length: 0",
        ];
        let head = parse_head(&lines).unwrap();
        assert_eq!(head.status, 404);
        assert_eq!(head.version, "2");
        assert_eq!(head.reason, "Not Found");
        assert!(!head.headers.contains("set-cookie"));
        assert_eq!(head.headers.first("content-length"), Some("0"));
    }

    #[test]
    fn test_interim_continue_is_discarded() {
        let raw = "HTTP/1.1 100 Continue\n\nHTTP/1.1 201 Created\nLocation: /items/9\n";
        let head = parse_raw(raw).unwrap();
        assert_eq!(head.status, 201);
        assert_eq!(head.headers.first("location"), Some("/items/9"));
    }

    #[test]
    fn test_no_status_line_is_malformed() {
        assert_eq!(parse_raw("Content-Type: text/plain\n"), Err(ParseError::NoStatusLine));
        assert_eq!(parse_raw(""), Err(ParseError::NoStatusLine));
        assert_eq!(parse_raw("HTTP/1.1 20 OK"), Err(ParseError::NoStatusLine));
        assert_eq!(parse_raw("HTTP/1.1 2000 OK"), Err(ParseError::NoStatusLine));
    }

    #[test]
    fn test_missing_reason_phrase() {
        let head = parse_raw("HTTP/1.1 204\n").unwrap();
        assert_eq!(head.status, 204);
        assert_eq!(head.reason, "");
    }

    #[test]
    fn test_multi_word_reason() {
        let head = parse_raw("HTTP/1.0 503 Service Temporarily Unavailable").unwrap();
        assert_eq!(head.version, "1.0");
        assert_eq!(head.reason, "Service Temporarily Unavailable");
    }

    #[test]
    fn test_value_split_on_first_colon() {
        let raw = concat!(
            "HTTP/1.1 200 OK\n",
            "Link: <http://x/y>; rel=next\n",
            "Date: Tue, 01 Jan 2030 10:00:00 GMT\n",
        );
        let head = parse_raw(raw).unwrap();
        assert_eq!(head.headers.first("link"), Some("<http://x/y>; rel=next"));
        assert_eq!(head.headers.first("date"), Some("Tue, 01 Jan 2030 10:00:00 GMT"));
    }

    #[test]
    fn test_lines_without_colon_are_ignored() {
        let head = parse_raw("HTTP/1.1 200 OK\ngarbage line\n: no-name\nX-A: 1\n").unwrap();
        assert_eq!(head.headers.len(), 1);
        assert_eq!(head.headers.first("x-a"), Some("1"));
    }

    #[test]
    fn test_duplicate_headers_accumulate() {
        let head = parse_raw("HTTP/1.1 200 OK\nVary: Accept\nvary: Origin\n").unwrap();
        assert_eq!(head.headers.get_all("Vary"), ["Accept", "Origin"]);
        assert_eq!(head.headers.line("vary").as_deref(), Some("Accept, Origin"));
    }
}
