//! `multipart/x-mixed-replace` image streams (`/mfd/mfd.mpng`, `/mfd/mfd.mjpeg`).

use std::io::{self, Write};

use super::{require_key, ApiError, AppState};
use crate::panel::{FollowerKind, ImageFormat, ImagePoll};
use crate::registry::FollowerGuard;
use crate::request::Request;

pub const BOUNDARY: &str = "--NextImage--";

/// Status line and content type of the stream. The blank line that ends the
/// header block is the leading CRLF of the first part.
pub fn stream_header() -> String {
    format!("HTTP/1.0 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary={BOUNDARY}\r\n")
}

pub fn write_part<W: Write>(out: &mut W, format: ImageFormat, bytes: &[u8]) -> io::Result<()> {
    let head = format!(
        "\r\n--{BOUNDARY}\r\nContent-Type: image/{}\r\nContent-Length: {}\r\n\r\n",
        format.subtype(),
        bytes.len()
    );
    out.write_all(head.as_bytes())?;
    out.write_all(bytes)?;
    out.flush()
}

/// Handle `/mfd/<rest>`; only `mfd.mpng` and `mfd.mjpeg` exist.
pub fn serve<W: Write>(
    state: &AppState,
    request: &Request,
    rest: &str,
    out: &mut W,
) -> Result<(), ApiError> {
    let ext = rest.strip_prefix("mfd.").ok_or(ApiError::NotFound)?;
    let format =
        ImageFormat::from_stream_extension(ext).ok_or_else(|| ApiError::UnknownFormat(ext.to_string()))?;
    let key = require_key(request)?;

    let follower = state.registry.follow(key, FollowerKind::Image(format));
    tracing::debug!(key, ?format, "image stream opened");
    match stream_frames(state, &follower, format, out) {
        Ok(()) => tracing::debug!(key, ?format, "image stream finished"),
        Err(e) => tracing::debug!(key, ?format, ?e, "image stream client went away"),
    }
    Ok(())
}

/// Long-poll the panel's image cache and push every new version.
///
/// Returns when the panel is closed or the server shuts down; write errors
/// end the stream.
fn stream_frames<W: Write>(
    state: &AppState,
    panel: &FollowerGuard,
    format: ImageFormat,
    out: &mut W,
) -> io::Result<()> {
    out.write_all(stream_header().as_bytes())?;
    out.flush()?;

    let poll_interval = state.config.image_poll_interval();
    let stall_polls = state.config.stall_polls.max(1);
    let mut previous = 0;
    let mut idle = 0;
    loop {
        if panel.is_closed() || state.cancel.is_cancelled() {
            return Ok(());
        }
        match panel.get_encoded_if(format, previous) {
            ImagePoll::Ready(lease) => {
                write_part(out, format, lease.bytes())?;
                previous = lease.id();
                idle = 0;
            }
            ImagePoll::NoChange | ImagePoll::Unavailable => {
                idle += 1;
                if idle >= stall_polls {
                    state.registry.request_refresh(panel.panel());
                    idle = 0;
                }
                std::thread::sleep(poll_interval);
            }
        }
    }
}
