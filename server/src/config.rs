use crate::error::ServerError;
use std::time::Duration;

pub const DEFAULT_ALLOWED_ORIGINS: &str = "https://localhost";

/// Interval between server pings on an idle connection
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(25);

/// How long a connection may stay silent before it is dropped
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(45);

/// Runtime configuration of the relay server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Browser origins allowed to open a WebSocket or call the HTTP surface
    pub allowed_origins: Vec<String>,
    /// 0 for unlimited
    pub max_clients: usize,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            allowed_origins: parse_origins(DEFAULT_ALLOWED_ORIGINS),
            max_clients: 0,
            ping_interval: DEFAULT_PING_INTERVAL,
            ping_timeout: DEFAULT_PING_TIMEOUT,
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Requests without an `Origin` header come from non-browser clients and
    /// are always allowed.
    pub fn is_origin_allowed(&self, origin: Option<&str>) -> bool {
        match origin {
            None => true,
            Some(origin) => self.allowed_origins.iter().any(|allowed| allowed == origin),
        }
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        if self.ping_interval.is_zero() {
            return Err(ServerError::Config("ping interval must be positive".to_string()));
        }
        if self.ping_timeout <= self.ping_interval {
            return Err(ServerError::Config(format!(
                "ping timeout ({:?}) must exceed ping interval ({:?})",
                self.ping_timeout, self.ping_interval
            )));
        }
        Ok(())
    }
}

/// Splits a comma-separated origin list, trimming entries and dropping empty ones
pub fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}
