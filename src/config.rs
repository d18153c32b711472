use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8042;
pub const DEFAULT_REFRESH_INTERVAL: f64 = 0.5;

/// Server settings, loaded from TOML. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on.
    pub bind: IpAddr,
    pub port: u16,
    /// Host refresh interval in seconds. Scales every poll and timeout.
    pub refresh_interval: f64,
    /// Directory served under `/web/`.
    pub web_root: PathBuf,
    /// How often the socket button route looks for a panel that an image
    /// stream has not created yet.
    pub panel_wait_attempts: u32,
    pub panel_wait_interval_ms: u64,
    /// Consecutive idle image polls before a refresh is forced.
    pub stall_polls: u32,
    /// A client that accepts no bytes for this long is dropped.
    pub write_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            web_root: PathBuf::from("web"),
            panel_wait_attempts: 42,
            panel_wait_interval_ms: 450,
            stall_polls: 20,
            write_timeout_ms: 5000,
        }
    }
}

impl ServerConfig {
    /// Load config from a TOML file path. Returns None if file doesn't exist.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        Ok(Some(config))
    }

    /// Save config to a TOML file path.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        let contents = toml::to_string_pretty(self).map_err(ConfigError::SerializeFailed)?;
        std::fs::write(path, contents).map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        Ok(())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    /// The refresh interval; non-positive or non-finite values fall back to
    /// the default.
    pub fn refresh_interval(&self) -> Duration {
        let secs = if self.refresh_interval.is_finite() && self.refresh_interval > 0.0 {
            self.refresh_interval
        } else {
            DEFAULT_REFRESH_INTERVAL
        };
        Duration::from_secs_f64(secs)
    }

    /// Sleep between image cache polls.
    pub fn image_poll_interval(&self) -> Duration {
        (self.refresh_interval() / 20).max(Duration::from_millis(1))
    }

    /// Read timeout on the button socket.
    pub fn socket_read_timeout(&self) -> Duration {
        (self.refresh_interval() / 4).max(Duration::from_millis(1))
    }

    pub fn panel_wait_interval(&self) -> Duration {
        Duration::from_millis(self.panel_wait_interval_ms)
    }

    /// Write timeout on every connection socket; never zero.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms.max(1))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {1}", .0.display())]
    ReadFailed(PathBuf, #[source] std::io::Error),
    #[error("failed to parse config {}: {1}", .0.display())]
    ParseFailed(PathBuf, #[source] toml::de::Error),
    #[error("failed to write config {}: {1}", .0.display())]
    WriteFailed(PathBuf, #[source] std::io::Error),
    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[source] toml::ser::Error),
}

/// The machine's hostname, or "localhost" if it cannot be determined.
pub fn resolve_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

/// URLs a browser on this or another machine can use to reach the panels
/// served on `addr`.
pub fn advertised_urls(addr: SocketAddr, hostname: &str) -> Vec<String> {
    let mut hosts = vec!["localhost".to_string()];
    if !addr.ip().is_loopback() && hostname != "localhost" {
        hosts.push(hostname.to_string());
    }
    hosts
        .into_iter()
        .map(|host| format!("http://{host}:{}/web/", addr.port()))
        .collect()
}
