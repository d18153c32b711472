use http::StatusCode;

use super::Response;
use crate::handshake::HandshakeError;

/// Errors a handler can report before it has written anything.
///
/// Each variant maps to an HTTP status code and a human-readable message,
/// rendered as a small HTML page.
#[derive(Debug)]
pub enum ApiError {
    /// 400 - The `key` query parameter is missing or empty.
    MissingKey,
    /// 400 - Image stream extension other than `mpng`/`mjpeg`.
    UnknownFormat(String),
    /// 412 - Button socket request without the upgrade headers.
    NotWebSocket,
    /// 400 - Upgrade request without `Host` or `Origin`.
    MissingHostOrOrigin,
    /// 400 - Upgrade request without both security keys.
    MissingSecurityKeys,
    /// 400 - A security key could not be decoded.
    InvalidSecurityKey(HandshakeError),
    /// 412 - No image stream has created the panel in time.
    PanelNotReady(String),
    /// 404 - Polling a panel that does not exist.
    PanelNotFound(String),
    /// 400 - Button id is not an integer.
    InvalidButton(String),
    /// 404 - Generic not-found.
    NotFound,
    /// 500 - Catch-all internal error.
    InternalError(String),
}

impl ApiError {
    /// Returns the HTTP status code for this error variant.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MissingKey => StatusCode::BAD_REQUEST,
            ApiError::UnknownFormat(_) => StatusCode::BAD_REQUEST,
            ApiError::NotWebSocket => StatusCode::PRECONDITION_FAILED,
            ApiError::MissingHostOrOrigin => StatusCode::BAD_REQUEST,
            ApiError::MissingSecurityKeys => StatusCode::BAD_REQUEST,
            ApiError::InvalidSecurityKey(_) => StatusCode::BAD_REQUEST,
            ApiError::PanelNotReady(_) => StatusCode::PRECONDITION_FAILED,
            ApiError::PanelNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidButton(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a human-readable error message.
    pub fn message(&self) -> String {
        match self {
            ApiError::MissingKey => "Need a key".to_string(),
            ApiError::UnknownFormat(ext) => format!("Unknown image format: {}", ext),
            ApiError::NotWebSocket => "Not a WebSocket request".to_string(),
            ApiError::MissingHostOrOrigin => "Need host and origin".to_string(),
            ApiError::MissingSecurityKeys => "Need security keys".to_string(),
            ApiError::InvalidSecurityKey(e) => format!("Invalid security key: {}", e),
            ApiError::PanelNotReady(_) => "Could not find the MFD".to_string(),
            ApiError::PanelNotFound(key) => format!("No MFD named {}", key),
            ApiError::InvalidButton(id) => format!("Invalid button: {}", id),
            ApiError::NotFound => "Not found".to_string(),
            ApiError::InternalError(detail) => format!("Internal error: {}", detail),
        }
    }

    pub fn into_response(self) -> Response {
        let body = format!("<h1>{}</h1>", super::escape_html(&self.message()));
        Response::new(self.status_code()).html(body)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.status_code().as_u16(), self.message())
    }
}

impl std::error::Error for ApiError {}
