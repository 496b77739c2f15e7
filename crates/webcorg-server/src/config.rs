//! Server configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! - `PORT`: Listen port when `WEBCORG_BIND_ADDR` is unset. Default: `8080`
//! - `WEBCORG_BIND_ADDR`: Full bind address. Default: `0.0.0.0:$PORT`
//! - `WEBCORG_DB_PATH`: Snapshot file. Default: `database.json`
//! - `WEBCORG_STATIC_DIR`: Directory served at `/` (optional)
//! - `WEBCORG_ADMIN_PASSWORD`: Admin secret for a brand new snapshot. Default: `admin123`
//! - `WEBCORG_OUTBOUND_BUFFER`: Frames queued per connection. Default: `64`
//! - `WEBCORG_CORS_ORIGINS`: Comma-separated allowed origins (permissive when unset)
//!
//! # Examples
//!
//! ```bash
//! PORT=3000 WEBCORG_DB_PATH=/var/lib/webcorg/db.json cargo run
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::{info, warn};
use webcorg_relay::transport::DEFAULT_OUTBOUND_CAPACITY;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default admin secret written into a fresh snapshot.
pub const DEFAULT_ADMIN_PASSWORD: &str = "admin123";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP/WebSocket bind address
    pub bind_addr: SocketAddr,
    /// Path of the JSON snapshot file
    pub db_path: PathBuf,
    /// Directory with the web client, served at `/`
    pub static_dir: Option<PathBuf>,
    /// Admin secret used when no snapshot exists yet
    pub default_admin_password: String,
    /// Capacity of each connection's outbound queue
    pub outbound_buffer: usize,
    /// Allowed CORS origins; empty means permissive
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            db_path: PathBuf::from("database.json"),
            static_dir: None,
            default_admin_password: DEFAULT_ADMIN_PASSWORD.to_string(),
            outbound_buffer: DEFAULT_OUTBOUND_CAPACITY,
            cors_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Load server configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Invalid values fall back to defaults with a warning.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let port = match lookup("PORT") {
            Some(raw) => raw.trim().parse::<u16>().unwrap_or_else(|_| {
                warn!(value = %raw, "Invalid PORT, using default");
                DEFAULT_PORT
            }),
            None => DEFAULT_PORT,
        };

        let bind_addr = match lookup("WEBCORG_BIND_ADDR") {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warn!(value = %raw, "Invalid WEBCORG_BIND_ADDR, using 0.0.0.0");
                SocketAddr::from(([0, 0, 0, 0], port))
            }),
            None => SocketAddr::from(([0, 0, 0, 0], port)),
        };

        let db_path = lookup("WEBCORG_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let static_dir = lookup("WEBCORG_STATIC_DIR")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        let default_admin_password = lookup("WEBCORG_ADMIN_PASSWORD")
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.default_admin_password);

        let outbound_buffer = match lookup("WEBCORG_OUTBOUND_BUFFER") {
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    warn!(value = %raw, "Invalid WEBCORG_OUTBOUND_BUFFER, using default");
                    defaults.outbound_buffer
                }
            },
            None => defaults.outbound_buffer,
        };

        let cors_origins = lookup("WEBCORG_CORS_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(|origin| origin.trim().to_string())
                    .filter(|origin| !origin.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            bind_addr,
            db_path,
            static_dir,
            default_admin_password,
            outbound_buffer,
            cors_origins,
        }
    }

    /// Log the current server configuration.
    pub fn log_config(&self) {
        info!("Bind address: {}", self.bind_addr);
        info!("Snapshot file: {}", self.db_path.display());
        match &self.static_dir {
            Some(dir) => info!("Serving web client from {}", dir.display()),
            None => info!("Static file serving: disabled"),
        }
        info!("Outbound buffer: {} frames per connection", self.outbound_buffer);
        if self.cors_origins.is_empty() {
            info!("CORS: permissive");
        } else {
            info!("CORS origins: {}", self.cors_origins.join(", "));
        }
    }
}
