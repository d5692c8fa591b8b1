//! Server configuration.

use std::path::PathBuf;

/// Tunables for [`HttpServer`](crate::server::HttpServer).
///
/// All fields have working defaults; the binary fills them from CLI flags.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface to bind.
    pub host: String,
    /// TCP port to bind.
    pub port: u16,
    /// Enables verbose request/response logging.
    pub verbose: bool,
    /// Directory served by the `/files` endpoint, when configured.
    pub directory: Option<PathBuf>,
    /// Maximum concurrently served connections; excess connections get a 503.
    pub max_connections: usize,
    /// Arena allocation for each cycle's receive buffer.
    pub read_buffer_size: usize,
    /// Optional cap on each connection's total live arena bytes.
    pub arena_limit: Option<usize>,
}

impl ServerConfig {
    /// The `host:port` pair this configuration binds.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 8080,
            verbose: false,
            directory: None,
            max_connections: 1024,
            read_buffer_size: 4096,
            arena_limit: None,
        }
    }
}
