//! Button channels: the legacy WebSocket upgrade on `/btn/` and the
//! single-shot polling variant on `/btn_h/<id>`.

use http::{header, StatusCode};
use std::io::{self, Read, Write};
use std::net::TcpStream;

use super::{require_key, respond, ApiError, AppState, Response};
use crate::handshake::{self, FrameReader, Inbound, NONCE_LEN};
use crate::host::POWER_BUTTON;
use crate::panel::FollowerKind;
use crate::registry::FollowerGuard;
use crate::request::Request;

// ── Polling ────────────────────────────────────────────────────────

/// `/btn_h/<id>?key=K`: optionally press `id`, then answer with the labels.
///
/// A missing id or `-1` only queries the labels.
pub fn poll<W: Write>(
    state: &AppState,
    request: &Request,
    id: &str,
    out: &mut W,
) -> Result<(), ApiError> {
    let key = require_key(request)?;
    let id = id.trim_end_matches('/');
    let button: i32 = if id.is_empty() {
        -1
    } else {
        id.parse().map_err(|_| ApiError::InvalidButton(id.to_string()))?
    };

    let follower = state
        .registry
        .follow_existing(key, FollowerKind::Buttons)
        .ok_or_else(|| ApiError::PanelNotFound(key.to_string()))?;

    if button >= 0 {
        state
            .registry
            .press(follower.panel(), button)
            .map_err(|e| ApiError::InternalError(e.to_string()))?;
    }

    let response = Response::new(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .body(follower.labels_json());
    respond(out, &response);
    Ok(())
}

// ── Socket ─────────────────────────────────────────────────────────

/// The validated parts of an upgrade request.
#[derive(Debug, PartialEq, Eq)]
pub struct Upgrade<'a> {
    pub key: &'a str,
    pub host: &'a str,
    pub origin: &'a str,
    pub protocol: Option<&'a str>,
    pub key1: u32,
    pub key2: u32,
}

/// Check the upgrade headers, in the order the errors are reported.
pub fn validate_upgrade(request: &Request) -> Result<Upgrade<'_>, ApiError> {
    let key = require_key(request)?;

    let connection_ok = request.header("connection").is_some_and(|value| {
        value
            .split(',')
            .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
    });
    let upgrade_ok = request
        .header("upgrade")
        .is_some_and(|value| value.trim().eq_ignore_ascii_case("websocket"));
    if !connection_ok || !upgrade_ok {
        return Err(ApiError::NotWebSocket);
    }

    let (Some(host), Some(origin)) = (request.header("host"), request.header("origin")) else {
        return Err(ApiError::MissingHostOrOrigin);
    };
    let (Some(key1), Some(key2)) = (
        request.header("sec-websocket-key1"),
        request.header("sec-websocket-key2"),
    ) else {
        return Err(ApiError::MissingSecurityKeys);
    };

    Ok(Upgrade {
        key,
        host,
        origin,
        protocol: request.header("sec-websocket-protocol"),
        key1: handshake::decode_key(key1).map_err(ApiError::InvalidSecurityKey)?,
        key2: handshake::decode_key(key2).map_err(ApiError::InvalidSecurityKey)?,
    })
}

/// Headers of the `101` response; the 16-byte token follows them.
pub fn upgrade_response_head(request: &Request, upgrade: &Upgrade<'_>) -> String {
    let mut location = format!("ws://{}{}", upgrade.host, request.path);
    if !request.query_string.is_empty() {
        location.push('?');
        location.push_str(&request.query_string);
    }
    let mut head = format!(
        "HTTP/1.1 101 WebSocket Protocol Handshake\r\n\
         Upgrade: WebSocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Origin: {}\r\n\
         Sec-WebSocket-Location: {}\r\n",
        upgrade.origin, location
    );
    if let Some(protocol) = upgrade.protocol {
        head.push_str(&format!("Sec-WebSocket-Protocol: {protocol}\r\n"));
    }
    head.push_str("\r\n");
    head
}

/// `/btn/?key=K`: upgrade, then exchange button ids for label snapshots.
pub fn socket(state: &AppState, request: &Request, stream: &mut TcpStream) -> Result<(), ApiError> {
    let upgrade = validate_upgrade(request)?;
    let follower = wait_for_panel(state, upgrade.key)?;

    match run_socket(state, request, &upgrade, &follower, stream) {
        Ok(()) => tracing::debug!(key = upgrade.key, "button socket closed"),
        Err(e) => tracing::debug!(key = upgrade.key, ?e, "button socket dropped"),
    }
    Ok(())
}

/// The image stream usually creates the panel, and the page may open the
/// button socket first, so give it a moment to appear.
fn wait_for_panel(state: &AppState, key: &str) -> Result<FollowerGuard, ApiError> {
    let attempts = state.config.panel_wait_attempts.max(1);
    for attempt in 0..attempts {
        if let Some(follower) = state.registry.follow_existing(key, FollowerKind::Buttons) {
            return Ok(follower);
        }
        if attempt + 1 < attempts && !state.cancel.is_cancelled() {
            std::thread::sleep(state.config.panel_wait_interval());
        }
    }
    Err(ApiError::PanelNotReady(key.to_string()))
}

fn run_socket(
    state: &AppState,
    request: &Request,
    upgrade: &Upgrade<'_>,
    panel: &FollowerGuard,
    stream: &mut TcpStream,
) -> io::Result<()> {
    let mut reader = FrameReader::new();
    let mut buf = [0u8; 64];

    // The nonce may not have arrived with the headers.
    let mut nonce = request.body.to_vec();
    while nonce.len() < NONCE_LEN {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        nonce.extend_from_slice(&buf[..n]);
    }
    reader.push(&nonce[NONCE_LEN..]);

    let token = handshake::challenge_response(upgrade.key1, upgrade.key2, &nonce)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    stream.write_all(upgrade_response_head(request, upgrade).as_bytes())?;
    stream.write_all(&token)?;
    stream.flush()?;
    tracing::debug!(key = upgrade.key, "button socket upgraded");

    stream.set_read_timeout(Some(state.config.socket_read_timeout()))?;
    let mut labels_seen = 0;
    loop {
        while let Some(message) = reader.next_message() {
            let payload = match message {
                Inbound::Close => return Ok(()),
                Inbound::Text(payload) => payload,
            };
            let Some(button) = handshake::parse_button_id(&payload) else {
                tracing::debug!(key = upgrade.key, ?payload, "ignoring malformed button frame");
                continue;
            };
            if button < 0 {
                continue;
            }
            if let Err(e) = state.registry.press(panel.panel(), button) {
                tracing::debug!(key = upgrade.key, ?e, "press failed");
                return Ok(());
            }
            if button == POWER_BUTTON {
                send_labels_if_changed(panel, &mut labels_seen, stream)?;
                return Ok(());
            }
        }

        send_labels_if_changed(panel, &mut labels_seen, stream)?;
        if state.cancel.is_cancelled() {
            return Ok(());
        }

        match stream.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => reader.push(&buf[..n]),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}

fn send_labels_if_changed<W: Write>(
    panel: &FollowerGuard,
    seen: &mut u32,
    out: &mut W,
) -> io::Result<()> {
    if let Some((json, version)) = panel.labels_if(*seen) {
        out.write_all(&handshake::encode_text_frame(json.as_bytes()))?;
        out.flush()?;
        *seen = version;
    }
    Ok(())
}
