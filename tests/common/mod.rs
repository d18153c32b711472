#![allow(dead_code)]

use bytes::Bytes;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use panelcast::panel::EncodeError;
use panelcast::{
    ButtonAction, ButtonLabels, Frame, FrameEncoder, ImageFormat, PanelHost, PanelResource,
    ResourceRegistry, Server, ServerConfig,
};

/// Encodes a frame as `<subtype>:<first red value>` so tests can tell
/// frames apart without decoding images.
pub struct StubEncoder;

impl FrameEncoder for StubEncoder {
    fn encode(&self, frame: &Frame, format: ImageFormat) -> Result<Bytes, EncodeError> {
        let red = frame.pixels.first().copied().unwrap_or(0);
        Ok(Bytes::from(format!("{}:{}", format.subtype(), red)))
    }
}

/// Host that renders 4x4 solid frames and records every call.
#[derive(Default)]
pub struct RecordingHost {
    pub registered: Vec<String>,
    pub unregistered: Vec<String>,
    pub presses: Vec<(String, ButtonAction)>,
    pub refreshes: usize,
    /// Presses per panel id; shown as the first left label.
    press_counts: HashMap<u64, usize>,
    shade: u8,
}

impl PanelHost for RecordingHost {
    fn register(&mut self, panel: &Arc<PanelResource>) -> bool {
        self.registered.push(panel.key().to_string());
        true
    }

    fn unregister(&mut self, panel: &Arc<PanelResource>) {
        self.unregistered.push(panel.key().to_string());
    }

    fn refresh(&mut self, panel: &Arc<PanelResource>) {
        self.refreshes += 1;
        self.shade = self.shade.wrapping_add(1);
        panel.set_frame(Frame::solid(4, 4, [self.shade, 0, 0, 255]));
    }

    fn press(&mut self, panel: &Arc<PanelResource>, action: ButtonAction) {
        self.presses.push((panel.key().to_string(), action));
        *self.press_counts.entry(panel.id()).or_default() += 1;
    }

    fn labels(&mut self, panel: &Arc<PanelResource>) -> ButtonLabels {
        let count = self.press_counts.get(&panel.id()).copied().unwrap_or(0);
        ButtonLabels::from_slots([Some(format!("P{count}"))])
    }
}

/// Runs the host tick on its own thread, standing in for the simulator loop.
pub struct TickDriver {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<RecordingHost>,
}

impl TickDriver {
    pub fn spawn(registry: ResourceRegistry) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = std::thread::spawn(move || {
            let mut host = RecordingHost::default();
            while !flag.load(Ordering::SeqCst) {
                registry.tick(&mut host);
                std::thread::sleep(Duration::from_millis(2));
            }
            host
        });
        Self { stop, handle }
    }

    pub fn stop(self) -> RecordingHost {
        self.stop.store(true, Ordering::SeqCst);
        self.handle.join().unwrap()
    }
}

/// Loopback config with short intervals.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        bind: Ipv4Addr::LOCALHOST.into(),
        port: 0,
        refresh_interval: 0.04,
        panel_wait_attempts: 25,
        panel_wait_interval_ms: 20,
        ..Default::default()
    }
}

/// A server on an ephemeral port plus a running tick driver.
pub struct TestServer {
    pub server: Server,
    driver: TickDriver,
}

impl TestServer {
    pub fn start() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: ServerConfig) -> Self {
        Self::with_encoder(config, Arc::new(StubEncoder))
    }

    pub fn with_encoder(config: ServerConfig, encoder: Arc<dyn FrameEncoder>) -> Self {
        let server = Server::bind(config, encoder).unwrap();
        let driver = TickDriver::spawn(server.registry().clone());
        Self { server, driver }
    }

    pub fn addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    pub fn registry(&self) -> &ResourceRegistry {
        self.server.registry()
    }

    /// Stop the tick driver, shut the server down and hand back the host.
    pub fn finish(self) -> RecordingHost {
        let mut host = self.driver.stop();
        self.server.shutdown(&mut host);
        host
    }
}

/// A complete response from a one-shot request.
#[derive(Debug)]
pub struct RawResponse {
    pub status_line: String,
    pub head: String,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn status(&self) -> u16 {
        self.status_line
            .split(' ')
            .nth(1)
            .and_then(|code| code.parse().ok())
            .unwrap_or(0)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Send raw request bytes and read until the server closes.
pub fn send_raw(addr: SocketAddr, raw: &[u8]) -> RawResponse {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    stream.write_all(raw).unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).unwrap();
    split_response(&out)
}

pub fn get(addr: SocketAddr, target: &str) -> RawResponse {
    send_raw(addr, format!("GET {target} HTTP/1.0\r\n\r\n").as_bytes())
}

pub fn split_response(raw: &[u8]) -> RawResponse {
    let end = find(raw, b"\r\n\r\n").unwrap_or(raw.len());
    let head = String::from_utf8_lossy(&raw[..end]).into_owned();
    let body = raw.get(end + 4..).unwrap_or_default().to_vec();
    let status_line = head.lines().next().unwrap_or_default().to_string();
    RawResponse {
        status_line,
        head,
        body,
    }
}

/// Open a long-lived request and leave the socket to the caller.
pub fn open(addr: SocketAddr, target: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    stream
        .write_all(format!("GET {target} HTTP/1.0\r\n\r\n").as_bytes())
        .unwrap();
    stream
}

/// Read from `stream` into `buf` until `needle` shows up after `from`.
/// Returns the offset just past the match.
pub fn read_until(stream: &mut TcpStream, buf: &mut Vec<u8>, from: usize, needle: &[u8]) -> usize {
    let mut chunk = [0u8; 1024];
    loop {
        if let Some(pos) = find(&buf[from.min(buf.len())..], needle) {
            return from + pos + needle.len();
        }
        let n = stream.read(&mut chunk).unwrap();
        assert!(n > 0, "connection closed before {:?}", String::from_utf8_lossy(needle));
        buf.extend_from_slice(&chunk[..n]);
    }
}

pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Wait until the panel named `key` has been registered with the host.
pub fn wait_registered(registry: &ResourceRegistry, key: &str) {
    assert!(
        wait_until(Duration::from_secs(5), || registry
            .get(key)
            .is_some_and(|panel| panel.is_registered())),
        "panel {key} never registered"
    );
}
