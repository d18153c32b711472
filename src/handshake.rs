//! Legacy (draft-76) WebSocket upgrade handshake and text framing.
//!
//! The button channel speaks the pre-RFC protocol: the server proves it read
//! the upgrade request by hashing two decoded security keys and an 8-byte
//! nonce with MD5, and messages travel as `0x00 <utf-8> 0xFF` frames.

use md5::{Digest, Md5};

/// Length of the nonce that follows the upgrade request headers.
pub const NONCE_LEN: usize = 8;

/// Length of the challenge response written after the upgrade headers.
pub const TOKEN_LEN: usize = 16;

const FRAME_START: u8 = 0x00;
const FRAME_END: u8 = 0xFF;

/// Bytes buffered without a frame terminator before the buffer is discarded.
const MAX_PENDING: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    #[error("security key contains no spaces")]
    NoSpaces,
    #[error("nonce must be {NONCE_LEN} bytes, got {0}")]
    ShortNonce(usize),
}

/// Decode a `Sec-WebSocket-Key1`/`Key2` header value.
///
/// All decimal digits are concatenated into one number, which is divided
/// (truncating) by the number of space characters. The quotient is
/// truncated to 32 bits.
pub fn decode_key(value: &str) -> Result<u32, HandshakeError> {
    let mut spaces = 0u64;
    let mut number = 0u64;
    for c in value.chars() {
        if c == ' ' {
            spaces += 1;
        } else if let Some(digit) = c.to_digit(10) {
            number = number.wrapping_mul(10).wrapping_add(u64::from(digit));
        }
    }
    if spaces == 0 {
        return Err(HandshakeError::NoSpaces);
    }
    Ok((number / spaces) as u32)
}

/// Compute the 16-byte handshake token: MD5 over both keys in big-endian
/// order followed by the first 8 nonce bytes.
pub fn challenge_response(key1: u32, key2: u32, nonce: &[u8]) -> Result<[u8; TOKEN_LEN], HandshakeError> {
    let nonce = nonce
        .get(..NONCE_LEN)
        .ok_or(HandshakeError::ShortNonce(nonce.len()))?;

    let mut challenge = [0u8; 16];
    challenge[..4].copy_from_slice(&key1.to_be_bytes());
    challenge[4..8].copy_from_slice(&key2.to_be_bytes());
    challenge[8..].copy_from_slice(nonce);

    let digest = Md5::digest(challenge);
    let mut token = [0u8; TOKEN_LEN];
    token.copy_from_slice(&digest);
    Ok(token)
}

/// Wrap a UTF-8 payload in a `0x00 .. 0xFF` text frame.
pub fn encode_text_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 2);
    frame.push(FRAME_START);
    frame.extend_from_slice(payload);
    frame.push(FRAME_END);
    frame
}

/// A message decoded from the client side of the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(Vec<u8>),
    /// The `0xFF 0x00` closing handshake.
    Close,
}

/// Reassembles text frames from arbitrary socket reads.
#[derive(Debug, Default)]
pub struct FrameReader {
    pending: Vec<u8>,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
    }

    /// Pop the next complete message, if any.
    pub fn next_message(&mut self) -> Option<Inbound> {
        loop {
            match self.pending.first() {
                None => return None,
                Some(&FRAME_END) => {
                    if self.pending.len() < 2 {
                        return None;
                    }
                    if self.pending[1] == FRAME_START {
                        self.pending.clear();
                        return Some(Inbound::Close);
                    }
                    self.pending.remove(0);
                }
                Some(&FRAME_START) => {
                    let Some(end) = self.pending.iter().position(|&b| b == FRAME_END) else {
                        if self.pending.len() > MAX_PENDING {
                            self.pending.clear();
                        }
                        return None;
                    };
                    let payload = self.pending[1..end].to_vec();
                    self.pending.drain(..=end);
                    return Some(Inbound::Text(payload));
                }
                Some(_) => {
                    // Garbage between frames.
                    self.pending.remove(0);
                }
            }
        }
    }
}

/// Parse an ASCII button id such as `"7"`, `"13"` or `"-1"`.
pub fn parse_button_id(payload: &[u8]) -> Option<i32> {
    std::str::from_utf8(payload).ok()?.trim().parse().ok()
}
