//! Configuration data types.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Global settings
    #[serde(default)]
    pub global: GlobalConfig,

    /// Inbound listener settings
    #[serde(default)]
    pub frontend: FrontendConfig,

    /// Upstream servers, in rotation order
    #[serde(default)]
    pub backends: Vec<ServerConfig>,
}

/// Global configuration settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GlobalConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: json or pretty
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::Json,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Frontend configuration (listener).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FrontendConfig {
    /// Address and port to listen on
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
}

impl Default for FrontendConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// Individual upstream server configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ServerConfig {
    /// Base URL of the server, e.g. `http://10.0.0.1:8080/api`
    pub address: String,
}

impl ServerConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8000))
}
