//! TCP listener for browser connections.
//!
//! One acceptor thread hands every accepted connection to its own worker
//! thread, which reads a single request, routes it, and closes the
//! connection when the handler returns. Image streams and button sockets
//! keep their worker alive for as long as the client stays connected.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::api::{self, AppState};
use crate::config::ServerConfig;
use crate::host::PanelHost;
use crate::panel::{FrameEncoder, ImageEncoder};
use crate::registry::ResourceRegistry;
use crate::request::read_request;

/// Sockets of live connections, so shutdown can cut them off.
#[derive(Default)]
struct ConnectionSet {
    next_id: AtomicU64,
    streams: Mutex<HashMap<u64, TcpStream>>,
}

impl ConnectionSet {
    fn track(self: &Arc<Self>, stream: &TcpStream) -> ConnectionTicket {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        match stream.try_clone() {
            Ok(clone) => {
                self.streams.lock().insert(id, clone);
            }
            Err(e) => tracing::debug!(?e, "connection will not be tracked"),
        }
        ConnectionTicket {
            id,
            set: Arc::clone(self),
        }
    }

    fn shutdown_all(&self) -> usize {
        let streams: Vec<TcpStream> = self.streams.lock().drain().map(|(_, s)| s).collect();
        for stream in &streams {
            let _ = stream.shutdown(Shutdown::Both);
        }
        streams.len()
    }

    fn len(&self) -> usize {
        self.streams.lock().len()
    }
}

/// Untracks a connection when its worker exits.
struct ConnectionTicket {
    id: u64,
    set: Arc<ConnectionSet>,
}

impl Drop for ConnectionTicket {
    fn drop(&mut self) {
        self.set.streams.lock().remove(&self.id);
    }
}

/// A running panel server.
///
/// The owner of the host loop calls [`Server::tick`] once per host frame and
/// [`Server::shutdown`] from the same thread when the host goes away.
pub struct Server {
    local_addr: SocketAddr,
    state: AppState,
    connections: Arc<ConnectionSet>,
    acceptor: Option<JoinHandle<()>>,
}

impl Server {
    /// Bind with the default `image`-crate encoder.
    pub fn start(config: ServerConfig) -> io::Result<Self> {
        Self::bind(config, Arc::new(ImageEncoder))
    }

    pub fn bind(config: ServerConfig, encoder: Arc<dyn FrameEncoder>) -> io::Result<Self> {
        let listener = TcpListener::bind(config.socket_addr())?;
        let local_addr = listener.local_addr()?;
        let state = AppState {
            registry: ResourceRegistry::new(encoder),
            config: Arc::new(config),
            cancel: CancellationToken::new(),
        };
        let connections = Arc::new(ConnectionSet::default());

        let acceptor = {
            let state = state.clone();
            let connections = Arc::clone(&connections);
            std::thread::Builder::new()
                .name("panelcast-accept".into())
                .spawn(move || accept_loop(listener, state, connections))?
        };
        tracing::info!(addr = %local_addr, "panel server listening");

        Ok(Self {
            local_addr,
            state,
            connections,
            acceptor: Some(acceptor),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.state.registry
    }

    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Number of connections currently being served.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Run the bridging work for one host frame. Must be called from the
    /// host thread; returns `false` if the work was skipped this frame.
    pub fn tick<H: PanelHost + ?Sized>(&self, host: &mut H) -> bool {
        self.state.registry.tick(host)
    }

    /// Stop accepting, cut every connection, then drain the registry into
    /// the host. Workers are not waited for.
    pub fn shutdown<H: PanelHost + ?Sized>(mut self, host: &mut H) {
        self.stop_accepting();
        let closed = self.connections.shutdown_all();
        tracing::info!(connections = closed, "panel server stopped");
        self.state.registry.teardown(host);
    }

    fn stop_accepting(&mut self) {
        let Some(acceptor) = self.acceptor.take() else {
            return;
        };
        self.state.cancel.cancel();
        // Unblock accept() with a throwaway connection.
        let _ = TcpStream::connect_timeout(&wake_addr(self.local_addr), Duration::from_secs(1));
        if acceptor.join().is_err() {
            tracing::warn!("accept thread panicked");
        }
    }
}

/// Dropping without [`Server::shutdown`] still releases every press waiter,
/// but leaves registered panels with the host.
impl Drop for Server {
    fn drop(&mut self) {
        self.stop_accepting();
        self.connections.shutdown_all();
        self.state.registry.abandon();
    }
}

/// Wildcard listen addresses are reached through loopback.
fn wake_addr(addr: SocketAddr) -> SocketAddr {
    match addr {
        SocketAddr::V4(v4) if v4.ip().is_unspecified() => {
            SocketAddr::new(Ipv4Addr::LOCALHOST.into(), v4.port())
        }
        SocketAddr::V6(v6) if v6.ip().is_unspecified() => {
            SocketAddr::new(Ipv6Addr::LOCALHOST.into(), v6.port())
        }
        other => other,
    }
}

fn accept_loop(listener: TcpListener, state: AppState, connections: Arc<ConnectionSet>) {
    for conn in listener.incoming() {
        if state.cancel.is_cancelled() {
            tracing::debug!("accept loop received cancel signal");
            break;
        }
        let stream = match conn {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(?e, "failed to accept connection");
                continue;
            }
        };

        let ticket = connections.track(&stream);
        let state = state.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("panelcast-conn-{}", ticket.id))
            .spawn(move || {
                let _ticket = ticket;
                handle_connection(&state, stream);
            });
        if let Err(e) = spawned {
            tracing::warn!(?e, "failed to spawn connection worker");
        }
    }
}

fn handle_connection(state: &AppState, mut stream: TcpStream) {
    let peer = stream.peer_addr().ok();
    // Image leases are held while a part is written; a stalled client must
    // not hold one forever.
    if let Err(e) = stream.set_write_timeout(Some(state.config.write_timeout())) {
        tracing::debug!(?peer, ?e, "failed to set write timeout");
    }
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(e) => {
            // Malformed framing: close without answering.
            tracing::debug!(?peer, ?e, "dropping connection");
            return;
        }
    };
    tracing::debug!(?peer, method = %request.method, path = %request.path, "request");
    api::dispatch(state, &request, &mut stream);
}
