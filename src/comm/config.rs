use crate::comm::error::CommInitError;
use std::net::SocketAddr;
use tracing::warn;

/// Comm module configuration
#[derive(Debug, Clone)]
pub struct CommConfig {
    /// Listen address (default: 127.0.0.1)
    pub listen_addr: String,
    /// Listen port (default: 9710)
    pub listen_port: u16,
    /// Maximum payload size in bytes (default: 65536)
    pub max_payload_bytes: usize,
    /// Deduplication table capacity per client (default: 256)
    pub dedup_capacity: usize,
    /// Deduplication entry TTL in seconds (default: 300)
    pub dedup_ttl_secs: u64,
    /// How long to wait for the main loop's reply (default: 120)
    pub response_timeout_secs: u64,
}

impl Default for CommConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1".to_string(),
            listen_port: 9710,
            max_payload_bytes: 65536,
            dedup_capacity: 256,
            dedup_ttl_secs: 300,
            response_timeout_secs: 120,
        }
    }
}

fn parse_env_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(v) => match v.parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!(var = name, value = %v, "Invalid env var value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

impl CommConfig {
    /// Load from environment variables
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let mut config = CommConfig::default();
        if let Ok(addr) = std::env::var("POLYRUN_LISTEN_ADDR") {
            config.listen_addr = addr;
        }
        config.listen_port = parse_env_var("POLYRUN_LISTEN_PORT", config.listen_port);
        config.max_payload_bytes =
            parse_env_var("POLYRUN_MAX_PAYLOAD_BYTES", config.max_payload_bytes);
        config.response_timeout_secs =
            parse_env_var("POLYRUN_RESPONSE_TIMEOUT_SECS", config.response_timeout_secs);
        config
    }

    /// Returns the socket address to bind to
    pub fn bind_addr(&self) -> Result<SocketAddr, CommInitError> {
        format!("{}:{}", self.listen_addr, self.listen_port)
            .parse()
            .map_err(|e| CommInitError::InvalidAddress(format!("{}: {}", self.listen_addr, e)))
    }
}
