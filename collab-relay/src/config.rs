//! Process configuration, read once at startup.

use clap::Parser;
use std::path::PathBuf;

use crate::storage::StoreConfig;

/// Which browser origins may open a WebSocket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginPolicy {
    Any,
    Exact(String),
}

impl OriginPolicy {
    pub fn from_setting(origin: &str) -> Self {
        match origin.trim() {
            "" | "*" => OriginPolicy::Any,
            exact => OriginPolicy::Exact(exact.trim_end_matches('/').to_owned()),
        }
    }

    /// Requests without an `Origin` header come from non-browser clients
    /// and are always accepted.
    pub fn permits(&self, origin: Option<&str>) -> bool {
        match (self, origin) {
            (OriginPolicy::Any, _) | (_, None) => true,
            (OriginPolicy::Exact(allowed), Some(origin)) => {
                origin.trim_end_matches('/').eq_ignore_ascii_case(allowed)
            }
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Origin allowed to open WebSocket connections
    pub allowed_origin: OriginPolicy,
    /// Document store settings
    pub store: StoreConfig,
    /// Frames buffered per connection before relayed deltas are dropped
    pub outbox_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5000".to_string(),
            allowed_origin: OriginPolicy::from_setting("http://localhost:3000"),
            store: StoreConfig::default(),
            outbox_capacity: 256,
        }
    }
}

/// Command line, with environment fallbacks for container deployments.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "collab-relay",
    about = "Relay live document edits between collaborators and persist snapshots",
    version
)]
pub struct Cli {
    #[arg(long, env = "PORT", default_value_t = 5000, help = "Listening port")]
    pub port: u16,

    #[arg(long, env = "HOST", default_value = "0.0.0.0", help = "Listening interface")]
    pub host: String,

    #[arg(
        long,
        env = "STORAGE_PATH",
        value_name = "DIR",
        default_value = "collab_data",
        help = "RocksDB directory holding the documents"
    )]
    pub storage: PathBuf,

    #[arg(
        long = "allowed-origin",
        env = "FRONTEND_URL",
        default_value = "http://localhost:3000",
        help = "Origin allowed to connect from a browser (`*` for any)"
    )]
    pub allowed_origin: String,
}

impl Cli {
    pub fn into_config(self) -> ServerConfig {
        ServerConfig {
            bind_addr: format!("{}:{}", self.host, self.port),
            allowed_origin: OriginPolicy::from_setting(&self.allowed_origin),
            store: StoreConfig {
                path: self.storage,
                ..StoreConfig::default()
            },
            ..ServerConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "0.0.0.0:5000");
        assert_eq!(config.outbox_capacity, 256);
        assert_eq!(
            config.allowed_origin,
            OriginPolicy::Exact("http://localhost:3000".into())
        );
    }

    #[test]
    fn test_origin_policy() {
        let policy = OriginPolicy::from_setting("https://docs.example.com/");
        assert!(policy.permits(Some("https://docs.example.com")));
        assert!(policy.permits(Some("HTTPS://DOCS.EXAMPLE.COM")));
        assert!(policy.permits(None));
        assert!(!policy.permits(Some("https://evil.example.com")));

        assert_eq!(OriginPolicy::from_setting("*"), OriginPolicy::Any);
        assert!(OriginPolicy::Any.permits(Some("anything")));
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::try_parse_from([
            "collab-relay",
            "--port",
            "7000",
            "--host",
            "127.0.0.1",
            "--storage",
            "/tmp/docs",
            "--allowed-origin",
            "*",
        ])
        .unwrap();
        let config = cli.into_config();
        assert_eq!(config.bind_addr, "127.0.0.1:7000");
        assert_eq!(config.store.path, PathBuf::from("/tmp/docs"));
        assert_eq!(config.allowed_origin, OriginPolicy::Any);
    }

    #[test]
    fn test_cli_rejects_bad_port() {
        assert!(Cli::try_parse_from(["collab-relay", "--port", "http"]).is_err());
    }
}
