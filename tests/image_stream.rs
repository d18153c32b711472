//! End-to-end tests for the multipart image streams.
//!
//! Each test starts a real server on loopback with a tick driver thread in
//! place of the simulator and talks to it over raw TCP.

mod common;

use common::*;
use bytes::Bytes;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use panelcast::panel::{EncodeError, FollowerKind};
use panelcast::{Frame, FrameEncoder, ImageFormat, ServerConfig};

/// Produces 1 MiB parts, enough to fill socket buffers quickly.
struct BulkyEncoder;

impl FrameEncoder for BulkyEncoder {
    fn encode(&self, frame: &Frame, _format: ImageFormat) -> Result<Bytes, EncodeError> {
        let fill = frame.pixels.first().copied().unwrap_or(0);
        Ok(Bytes::from(vec![fill; 1 << 20]))
    }
}

const STREAM_HEAD: &[u8] =
    b"HTTP/1.0 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary=--NextImage--\r\n";

/// Read one part starting at `from`; returns its content type, body and
/// the offset past it.
fn read_part(stream: &mut TcpStream, buf: &mut Vec<u8>, from: usize) -> (String, Vec<u8>, usize) {
    let start = read_until(stream, buf, from, b"\r\n----NextImage--\r\n");
    let body_start = read_until(stream, buf, start, b"\r\n\r\n");
    let headers = String::from_utf8_lossy(&buf[start..body_start]).into_owned();

    let mut content_type = String::new();
    let mut length = 0usize;
    for line in headers.lines() {
        if let Some(value) = line.strip_prefix("Content-Type: ") {
            content_type = value.to_string();
        } else if let Some(value) = line.strip_prefix("Content-Length: ") {
            length = value.parse().unwrap();
        }
    }

    let mut chunk = [0u8; 1024];
    while buf.len() < body_start + length {
        let n = std::io::Read::read(stream, &mut chunk).unwrap();
        assert!(n > 0, "stream closed inside a part");
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = buf[body_start..body_start + length].to_vec();
    (content_type, body, body_start + length)
}

#[test]
fn png_stream_delivers_frames() {
    let ts = TestServer::start();
    let mut stream = open(ts.addr(), "/mfd/mfd.mpng?key=A");
    let mut buf = Vec::new();

    let head_end = read_until(&mut stream, &mut buf, 0, b"--NextImage--\r\n");
    assert!(buf.starts_with(STREAM_HEAD));

    let (content_type, body, _) = read_part(&mut stream, &mut buf, head_end);
    assert_eq!(content_type, "image/png");
    assert!(body.starts_with(b"png:"), "unexpected body {:?}", String::from_utf8_lossy(&body));

    drop(stream);
    let host = ts.finish();
    assert_eq!(host.registered, vec!["A"]);
}

#[test]
fn jpeg_stream_uses_jpeg_subtype() {
    let ts = TestServer::start();
    let mut stream = open(ts.addr(), "/mfd/mfd.mjpeg?key=B");
    let mut buf = Vec::new();

    let (content_type, body, _) = read_part(&mut stream, &mut buf, 0);
    assert_eq!(content_type, "image/jpeg");
    assert!(body.starts_with(b"jpeg:"));

    drop(stream);
    ts.finish();
}

#[test]
fn idle_stream_forces_refresh() {
    let ts = TestServer::start();
    let mut stream = open(ts.addr(), "/mfd/mfd.mpng?key=A");
    let mut buf = Vec::new();

    // The host only renders on request, so a second frame means the stream
    // asked for a refresh after going quiet.
    let (_, first, next) = read_part(&mut stream, &mut buf, 0);
    let (_, second, _) = read_part(&mut stream, &mut buf, next);
    assert_ne!(first, second);

    drop(stream);
    let host = ts.finish();
    assert!(host.refreshes >= 2);
}

#[test]
fn formats_share_one_panel() {
    let ts = TestServer::start();
    let png = open(ts.addr(), "/mfd/mfd.mpng?key=A");
    let jpeg = open(ts.addr(), "/mfd/mfd.mjpeg?key=A");

    let registry = ts.registry().clone();
    assert!(wait_until(Duration::from_secs(5), || {
        registry.get("A").is_some_and(|panel| panel.total_followers() == 2)
    }));
    let panel = registry.get("A").unwrap();
    assert_eq!(panel.follower_count(FollowerKind::Image(ImageFormat::Png)), 1);
    assert_eq!(panel.follower_count(FollowerKind::Image(ImageFormat::Jpeg)), 1);
    assert_eq!(registry.len(), 1);
    wait_registered(&registry, "A");

    // The worker notices the hangup on its next write.
    drop(png);
    assert!(wait_until(Duration::from_secs(10), || {
        panel.follower_count(FollowerKind::Image(ImageFormat::Png)) == 0
    }));
    assert_eq!(panel.follower_count(FollowerKind::Image(ImageFormat::Jpeg)), 1);
    assert_eq!(panel.total_followers(), 1);
    assert!(panel.is_registered());
    assert!(registry.get("A").is_some());

    drop(jpeg);
    let host = ts.finish();
    assert_eq!(host.registered, vec!["A"]);
}

#[test]
fn last_follower_unregisters_panel() {
    let ts = TestServer::start();
    let stream = open(ts.addr(), "/mfd/mfd.mpng?key=A");
    wait_registered(ts.registry(), "A");

    drop(stream);
    let registry = ts.registry().clone();
    assert!(wait_until(Duration::from_secs(10), || registry.is_empty()));

    let host = ts.finish();
    assert_eq!(host.unregistered, vec!["A"]);
}

#[test]
fn keys_get_separate_panels() {
    let ts = TestServer::start();
    let a = open(ts.addr(), "/mfd/mfd.mpng?key=A");
    let b = open(ts.addr(), "/mfd/mfd.mpng?key=B");
    wait_registered(ts.registry(), "A");
    wait_registered(ts.registry(), "B");

    let panel_a = ts.registry().get("A").unwrap();
    let panel_b = ts.registry().get("B").unwrap();
    assert_ne!(panel_a.id(), panel_b.id());

    drop((a, b));
    let mut host = ts.finish();
    host.registered.sort();
    assert_eq!(host.registered, vec!["A", "B"]);
}

#[test]
fn shutdown_ends_streams() {
    let ts = TestServer::start();
    let mut stream = open(ts.addr(), "/mfd/mfd.mpng?key=A");
    let mut buf = Vec::new();
    read_part(&mut stream, &mut buf, 0);

    let panel = ts.registry().get("A").unwrap();
    let host = ts.finish();
    assert!(panel.is_closed());
    assert_eq!(host.unregistered, vec!["A"]);

    let mut rest = Vec::new();
    let _ = std::io::Read::read_to_end(&mut stream, &mut rest);
}

#[test]
fn stalled_viewer_is_dropped() {
    let ts = TestServer::with_encoder(
        ServerConfig {
            write_timeout_ms: 200,
            ..test_config()
        },
        Arc::new(BulkyEncoder),
    );
    // Never read: the server's writes block once the buffers are full.
    let stalled = open(ts.addr(), "/mfd/mfd.mpng?key=A");
    wait_registered(ts.registry(), "A");

    let registry = ts.registry().clone();
    assert!(wait_until(Duration::from_secs(20), || registry.is_empty()));

    drop(stalled);
    let host = ts.finish();
    assert_eq!(host.unregistered, vec!["A"]);
}
