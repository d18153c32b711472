//! HTTP/1.0-style request parsing for connection workers.
//!
//! A worker reads raw bytes off its socket and feeds them to a
//! [`RequestParser`] until exactly one [`Request`] is complete. Framing
//! problems surface as [`ProtocolError`]; the worker then closes the
//! connection without writing a response.
//!
//! The body is `Content-Length` bytes long, or whatever was already buffered
//! past the blank line when the header is absent. The parser never reads
//! until the client closes the connection.

use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::io::{self, Read};

/// Socket read size used by [`read_request`].
const READ_CHUNK: usize = 512;

/// Upper bound on the request line plus headers.
const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Upper bound on a declared `Content-Length`.
const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Malformed HTTP framing. The connection is dropped without a response.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed request line: {0:?}")]
    MalformedRequestLine(String),
    #[error("request line has no HTTP/ version marker")]
    MissingVersion,
    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),
    #[error("invalid content-length: {0:?}")]
    InvalidContentLength(String),
    #[error("request head exceeds {MAX_HEAD_SIZE} bytes")]
    HeadTooLarge,
    #[error("declared body exceeds {MAX_BODY_SIZE} bytes")]
    BodyTooLarge,
    #[error("connection closed before the request was complete")]
    ConnectionClosed,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// A fully parsed request, owned by the worker that read it.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub method: String,
    /// Resource path without the query string. Not percent-decoded.
    pub path: String,
    /// Raw query string (everything after the first `?`).
    pub query_string: String,
    /// Parsed `key=value` pairs; the last duplicate wins.
    pub query: HashMap<String, String>,
    /// Version token following `HTTP/`.
    pub version: String,
    /// Header map keyed by lowercase name; the last duplicate wins.
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl Request {
    /// Look up a header by name, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Look up a query-string parameter.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy)]
enum State {
    RequestLine,
    Headers,
    Body { content_length: usize },
}

/// Incremental request parser.
///
/// Bytes may arrive in arbitrary fragments; [`RequestParser::feed`] returns
/// `Ok(None)` until the request line, headers and body are all present.
pub struct RequestParser {
    state: State,
    pending: BytesMut,
    head_len: usize,
    request: Request,
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestParser {
    pub fn new() -> Self {
        Self {
            state: State::RequestLine,
            pending: BytesMut::new(),
            head_len: 0,
            request: Request::default(),
        }
    }

    /// Append received bytes and try to complete the request.
    ///
    /// Bytes received past the declared body length stay attached to the
    /// body: the legacy WebSocket handshake sends its nonce that way.
    pub fn feed(&mut self, data: &[u8]) -> Result<Option<Request>, ProtocolError> {
        self.pending.extend_from_slice(data);

        loop {
            let state = self.state;
            if let State::Body { content_length } = state {
                if self.pending.len() < content_length {
                    return Ok(None);
                }
                let mut request = std::mem::take(&mut self.request);
                request.body = self.pending.split().freeze();
                split_query(&mut request);
                return Ok(Some(request));
            }

            let Some(newline) = self.pending.iter().position(|&b| b == b'\n') else {
                if self.head_len + self.pending.len() > MAX_HEAD_SIZE {
                    return Err(ProtocolError::HeadTooLarge);
                }
                return Ok(None);
            };

            let raw = self.pending.split_to(newline + 1);
            self.head_len += raw.len();
            if self.head_len > MAX_HEAD_SIZE {
                return Err(ProtocolError::HeadTooLarge);
            }
            let line = String::from_utf8_lossy(strip_line_ending(&raw));

            match state {
                State::RequestLine => {
                    parse_request_line(&line, &mut self.request)?;
                    self.state = State::Headers;
                }
                State::Headers if line.is_empty() => {
                    let content_length = declared_content_length(&self.request)?;
                    self.state = State::Body { content_length };
                }
                State::Headers => parse_header_line(&line, &mut self.request)?,
                State::Body { .. } => unreachable!("body state handled above"),
            }
        }
    }
}

/// Read one request from a blocking reader.
pub fn read_request<R: Read>(reader: &mut R) -> Result<Request, ProtocolError> {
    let mut parser = RequestParser::new();
    let mut buf = [0u8; READ_CHUNK];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => return Err(ProtocolError::ConnectionClosed),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        if let Some(request) = parser.feed(&buf[..n])? {
            return Ok(request);
        }
    }
}

fn strip_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// `METHOD SP RESOURCE SP HTTP/VERSION`, with runs of spaces tolerated
/// between tokens.
fn parse_request_line(line: &str, request: &mut Request) -> Result<(), ProtocolError> {
    let malformed = || ProtocolError::MalformedRequestLine(line.to_string());

    let method_end = line
        .find(|c: char| !c.is_ascii_alphabetic())
        .ok_or_else(malformed)?;
    if method_end == 0 || !line[method_end..].starts_with(' ') {
        return Err(malformed());
    }

    let rest = line[method_end..].trim_start_matches(' ');
    let resource_end = rest.find(' ').ok_or_else(malformed)?;
    let (resource, rest) = rest.split_at(resource_end);

    let version = rest
        .trim_start_matches(' ')
        .strip_prefix("HTTP/")
        .ok_or(ProtocolError::MissingVersion)?;

    request.method = line[..method_end].to_string();
    request.path = resource.to_string();
    request.version = version.split(' ').next().unwrap_or_default().to_string();
    Ok(())
}

fn parse_header_line(line: &str, request: &mut Request) -> Result<(), ProtocolError> {
    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| ProtocolError::MalformedHeader(line.to_string()))?;
    request.headers.insert(
        name.to_ascii_lowercase(),
        value.trim_start_matches(' ').to_string(),
    );
    Ok(())
}

fn declared_content_length(request: &Request) -> Result<usize, ProtocolError> {
    let Some(raw) = request.headers.get("content-length") else {
        return Ok(0);
    };
    let length: usize = raw
        .trim()
        .parse()
        .map_err(|_| ProtocolError::InvalidContentLength(raw.clone()))?;
    if length > MAX_BODY_SIZE {
        return Err(ProtocolError::BodyTooLarge);
    }
    Ok(length)
}

/// Split `path?query` and parse the `&`/`=` pairs. Entries without `=` are
/// ignored; nothing is percent-decoded.
fn split_query(request: &mut Request) {
    let Some((path, query)) = request.path.split_once('?') else {
        return;
    };
    let (path, query) = (path.to_string(), query.to_string());
    for pair in query.split('&') {
        if let Some((key, value)) = pair.split_once('=') {
            request.query.insert(key.to_string(), value.to_string());
        }
    }
    request.path = path;
    request.query_string = query;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse(raw: &[u8]) -> Result<Option<Request>, ProtocolError> {
        RequestParser::new().feed(raw)
    }

    #[test]
    fn parses_simple_get() {
        let req = parse(b"GET /mfd/mfd.mpng?key=A HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/mfd/mfd.mpng");
        assert_eq!(req.query_string, "key=A");
        assert_eq!(req.query_param("key"), Some("A"));
        assert_eq!(req.version, "1.1");
        assert_eq!(req.header("host"), Some("localhost"));
        assert!(req.body.is_empty());
    }

    #[test]
    fn accepts_bare_newlines() {
        let req = parse(b"GET / HTTP/1.0\nAccept: */*\n\n").unwrap().unwrap();
        assert_eq!(req.path, "/");
        assert_eq!(req.header("accept"), Some("*/*"));
    }

    #[test]
    fn tolerates_repeated_spaces_between_tokens() {
        let req = parse(b"GET   /web/   HTTP/1.0\r\n\r\n").unwrap().unwrap();
        assert_eq!(req.path, "/web/");
        assert_eq!(req.version, "1.0");
    }

    #[test]
    fn header_names_are_case_folded_and_last_value_wins() {
        let req = parse(b"GET / HTTP/1.0\r\nX-Thing:   one\r\nx-thing: two\r\n\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(req.headers.len(), 1);
        assert_eq!(req.header("X-THING"), Some("two"));
    }

    #[test]
    fn header_value_keeps_inner_colons() {
        let req = parse(b"GET / HTTP/1.0\r\nHost: localhost:8042\r\n\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(req.header("host"), Some("localhost:8042"));
    }

    #[test]
    fn query_last_value_wins_and_bare_entries_are_ignored() {
        let req = parse(b"GET /btn_h/3?key=A&flag&key=B&x=%20 HTTP/1.0\r\n\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(req.path, "/btn_h/3");
        assert_eq!(req.query_param("key"), Some("B"));
        assert_eq!(req.query_param("x"), Some("%20"));
        assert!(req.query_param("flag").is_none());
        assert_eq!(req.query.len(), 2);
    }

    #[test]
    fn waits_for_full_body_across_fragments() {
        let mut parser = RequestParser::new();
        assert!(parser
            .feed(b"POST /x HTTP/1.0\r\nContent-Len")
            .unwrap()
            .is_none());
        assert!(parser.feed(b"gth: 5\r\n\r\nhel").unwrap().is_none());
        let req = parser.feed(b"lo").unwrap().unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(&req.body[..], b"hello");
    }

    #[test]
    fn surplus_bytes_without_content_length_stay_in_body() {
        let req = parse(b"GET /btn/?key=A HTTP/1.1\r\nUpgrade: WebSocket\r\n\r\n^n:ds[4U")
            .unwrap()
            .unwrap();
        assert_eq!(&req.body[..], b"^n:ds[4U");
    }

    #[test]
    fn missing_version_marker_is_rejected() {
        let err = parse(b"GET / FTP/1.0\r\n\r\n").unwrap_err();
        assert!(matches!(err, ProtocolError::MissingVersion));
    }

    #[test]
    fn missing_resource_token_is_rejected() {
        let err = parse(b"GET HTTP/1.0\r\n\r\n").unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedRequestLine(_)));
    }

    #[test]
    fn empty_request_line_is_rejected() {
        let err = parse(b"\r\n").unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedRequestLine(_)));
    }

    #[test]
    fn header_without_colon_is_rejected() {
        let err = parse(b"GET / HTTP/1.0\r\nNoColonHere\r\n\r\n").unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedHeader(_)));
    }

    #[test]
    fn invalid_content_length_is_rejected() {
        let err = parse(b"POST / HTTP/1.0\r\nContent-Length: many\r\n\r\n").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidContentLength(_)));
    }

    #[test]
    fn oversized_head_is_rejected() {
        let mut raw = b"GET / HTTP/1.0\r\nX: ".to_vec();
        raw.extend(std::iter::repeat(b'a').take(MAX_HEAD_SIZE));
        let err = parse(&raw).unwrap_err();
        assert!(matches!(err, ProtocolError::HeadTooLarge));
    }

    #[test]
    fn read_request_reports_early_close() {
        let mut reader = Cursor::new(b"GET / HTTP/1.0\r\nHost: x\r\n".to_vec());
        let err = read_request(&mut reader).unwrap_err();
        assert!(matches!(err, ProtocolError::ConnectionClosed));
    }

    #[test]
    fn read_request_reads_across_chunks() {
        let mut raw = b"POST /x HTTP/1.0\r\nContent-Length: 1000\r\n\r\n".to_vec();
        raw.extend(std::iter::repeat(b'z').take(1000));
        let mut reader = Cursor::new(raw);
        let req = read_request(&mut reader).unwrap();
        assert_eq!(req.body.len(), 1000);
    }
}
