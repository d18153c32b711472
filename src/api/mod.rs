pub mod buttons;
pub mod error;
pub mod images;
pub mod web;

use http::{header, HeaderName, StatusCode};
use std::io::{self, Write};
use std::net::TcpStream;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::registry::ResourceRegistry;
use crate::request::Request;

pub use error::ApiError;

/// State shared by every connection worker.
#[derive(Clone)]
pub struct AppState {
    pub registry: ResourceRegistry,
    pub config: Arc<ServerConfig>,
    /// Cancelled when the server shuts down; long-lived loops watch it.
    pub cancel: CancellationToken,
}

/// A one-shot HTTP/1.0 response.
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: Vec<(HeaderName, String)>,
    body: Vec<u8>,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn header(mut self, name: HeaderName, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn html(self, body: impl Into<Vec<u8>>) -> Self {
        self.header(header::CONTENT_TYPE, "text/html").body(body)
    }

    pub fn redirect(status: StatusCode, location: impl Into<String>) -> Self {
        Self::new(status).header(header::LOCATION, location)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let mut head = format!(
            "HTTP/1.0 {} {}\r\n",
            self.status.as_u16(),
            self.status.canonical_reason().unwrap_or("")
        );
        for (name, value) in &self.headers {
            head.push_str(&format!("{}: {}\r\n", title_case(name), value));
        }
        head.push_str(&format!("Content-Length: {}\r\n\r\n", self.body.len()));
        out.write_all(head.as_bytes())?;
        out.write_all(&self.body)?;
        out.flush()
    }
}

/// `content-type` -> `Content-Type`. `http` stores header names lowercased.
fn title_case(name: &HeaderName) -> String {
    name.as_str()
        .split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

pub(crate) fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// The non-empty `key` query parameter.
pub(crate) fn require_key(request: &Request) -> Result<&str, ApiError> {
    request
        .query_param("key")
        .filter(|key| !key.is_empty())
        .ok_or(ApiError::MissingKey)
}

/// Route a parsed request to its handler.
///
/// Handlers write their own success responses; an error is rendered here
/// only when the handler failed before writing anything.
pub fn dispatch(state: &AppState, request: &Request, stream: &mut TcpStream) {
    let path = request.path.as_str();
    let result = if let Some(rest) = path.strip_prefix("/mfd/") {
        images::serve(state, request, rest, stream)
    } else if path == "/web" || path.starts_with("/web/") {
        web::serve(state, request, stream)
    } else if let Some(rest) = path.strip_prefix("/btn_h/") {
        buttons::poll(state, request, rest, stream)
    } else if path.starts_with("/btn/") {
        buttons::socket(state, request, stream)
    } else if path == "/" {
        respond(stream, &Response::redirect(StatusCode::MOVED_PERMANENTLY, "/web/"));
        Ok(())
    } else {
        Err(ApiError::NotFound)
    };

    if let Err(e) = result {
        tracing::debug!(path, status = e.status_code().as_u16(), "request failed: {}", e.message());
        respond(stream, &e.into_response());
    }
}

/// Write a response. A client that went away is only logged.
pub(crate) fn respond<W: Write>(out: &mut W, response: &Response) {
    if let Err(e) = response.write_to(out) {
        tracing::debug!(?e, status = response.status().as_u16(), "failed to write response");
    }
}
