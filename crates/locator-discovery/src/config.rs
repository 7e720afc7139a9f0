// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Proxy configuration.
//!
//! Loaded from TOML; every field has a default.
//!
//! ```toml
//! lookup = ["udp -h 239.255.0.1 -p 4061"]
//! instance_name = "prod"
//! timeout_ms = 300
//! retry_count = 3
//! retry_delay_ms = 2000
//! listen = "127.0.0.1:4062"
//! ```

use crate::client::TcpConnector;
use crate::coordinator::DiscoverySettings;
use crate::lookup::is_link_local;
use crate::types::Endpoint;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default IPv4 lookup group.
pub const DEFAULT_LOOKUP_GROUP_V4: Ipv4Addr = Ipv4Addr::new(239, 255, 0, 1);

/// Default IPv6 lookup group.
pub const DEFAULT_LOOKUP_GROUP_V6: Ipv6Addr = Ipv6Addr::new(0xff15, 0, 0, 0, 0, 0, 0, 1);

/// Default lookup port.
pub const DEFAULT_LOOKUP_PORT: u16 = 4061;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Proxy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Lookup endpoints (`udp -h <group> -p <port>`). Empty uses the default
    /// group on `port`.
    #[serde(default)]
    pub lookup: Vec<String>,

    /// Port of the default lookup group.
    #[serde(default = "default_lookup_port")]
    pub port: u16,

    /// Use the IPv6 default group instead of the IPv4 one.
    #[serde(default)]
    pub prefer_ipv6: bool,

    /// Interface to send lookups from and receive replies on. Unset uses
    /// every multicast-capable interface.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<IpAddr>,

    /// Reply listener port (0 = ephemeral).
    #[serde(default)]
    pub reply_port: u16,

    /// Only accept locators of this instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_name: Option<String>,

    /// Per-attempt reply timeout (milliseconds).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Attempts per discovery round.
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Cooldown after an unsuccessful round (milliseconds).
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Address the proxy accepts locator requests on.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Connect timeout towards the discovered locator (milliseconds).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Request timeout towards the discovered locator (milliseconds).
    #[serde(default = "default_invocation_timeout_ms")]
    pub invocation_timeout_ms: u64,

    /// Maximum frame size (bytes).
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_lookup_port() -> u16 {
    DEFAULT_LOOKUP_PORT
}

fn default_timeout_ms() -> u64 {
    300
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    2000
}

fn default_listen() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 4062)
}

fn default_connect_timeout_ms() -> u64 {
    2000
}

fn default_invocation_timeout_ms() -> u64 {
    5000
}

fn default_max_frame_size() -> usize {
    1024 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            lookup: Vec::new(),
            port: default_lookup_port(),
            prefer_ipv6: false,
            interface: None,
            reply_port: 0,
            instance_name: None,
            timeout_ms: default_timeout_ms(),
            retry_count: default_retry_count(),
            retry_delay_ms: default_retry_delay_ms(),
            listen: default_listen(),
            connect_timeout_ms: default_connect_timeout_ms(),
            invocation_timeout_ms: default_invocation_timeout_ms(),
            max_frame_size: default_max_frame_size(),
            log_level: default_log_level(),
        }
    }
}

impl DiscoveryConfig {
    /// Load and validate configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save configuration to a TOML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeout_ms cannot be 0".into()));
        }
        if self.retry_count == 0 {
            return Err(ConfigError::Invalid("retry_count cannot be 0".into()));
        }
        if self.max_frame_size < 64 {
            return Err(ConfigError::Invalid(format!(
                "max_frame_size too small ({} < 64)",
                self.max_frame_size
            )));
        }

        let destinations = self.lookup_endpoints()?;
        if let Some(interface) = self.interface {
            if is_link_local(&interface) {
                return Err(ConfigError::Invalid(format!(
                    "interface {} is link-local; use a routable address",
                    interface
                )));
            }
            if destinations.iter().all(|d| d.is_ipv6() != interface.is_ipv6()) {
                return Err(ConfigError::Invalid(format!(
                    "interface {} matches no lookup endpoint address family",
                    interface
                )));
            }
        }

        Ok(())
    }

    /// Resolved lookup destinations.
    pub fn lookup_endpoints(&self) -> Result<Vec<SocketAddr>, ConfigError> {
        if self.lookup.is_empty() {
            let group = if self.prefer_ipv6 {
                IpAddr::V6(DEFAULT_LOOKUP_GROUP_V6)
            } else {
                IpAddr::V4(DEFAULT_LOOKUP_GROUP_V4)
            };
            return Ok(vec![SocketAddr::new(group, self.port)]);
        }

        self.lookup
            .iter()
            .map(|s| {
                let endpoint: Endpoint = s
                    .parse()
                    .map_err(|e| ConfigError::Invalid(format!("lookup: {}", e)))?;
                let ip: IpAddr = endpoint.host.parse().map_err(|_| {
                    ConfigError::Invalid(format!(
                        "lookup host `{}` must be an IP address",
                        endpoint.host
                    ))
                })?;
                Ok(SocketAddr::new(ip, endpoint.port))
            })
            .collect()
    }

    /// Get per-attempt timeout as Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Get retry delay as Duration.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn settings(&self) -> DiscoverySettings {
        DiscoverySettings {
            timeout: self.timeout(),
            max_attempts: self.retry_count,
            retry_delay: self.retry_delay(),
            instance_name: self.instance_name.clone().filter(|n| !n.is_empty()),
        }
    }

    pub fn connector(&self) -> TcpConnector {
        TcpConnector {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            invocation_timeout: Duration::from_millis(self.invocation_timeout_ms),
            max_frame_size: self.max_frame_size,
        }
    }
}
