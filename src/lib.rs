//! panelcast - stream a host simulation's instrument panels to web browsers.
//!
//! Each panel is served as a `multipart/x-mixed-replace` image stream plus a
//! button channel (a legacy WebSocket upgrade, or single-shot polling). The
//! host application owns all panel state and runs a single-threaded update
//! loop; connection threads never call into it. Host-affecting work is
//! queued and drained by [`Server::tick`] on the host thread.

pub mod api;
pub mod bridge;
pub mod config;
pub mod demo;
pub mod handshake;
pub mod host;
pub mod panel;
pub mod registry;
pub mod request;
pub mod server;

pub use config::ServerConfig;
pub use host::{ButtonAction, PanelHost};
pub use panel::{ButtonLabels, Frame, FrameEncoder, ImageEncoder, ImageFormat, PanelResource};
pub use registry::{FollowerGuard, PressError, ResourceRegistry};
pub use server::Server;
