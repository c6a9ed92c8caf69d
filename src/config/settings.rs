use std::net::IpAddr;

use serde::Deserialize;

use crate::utils::error::SettingsError;

/// Top-level configuration settings for the relay.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub server: ServerSettings,
    pub upstream: UpstreamSettings,
    pub logging: LoggingSettings,
}

/// Where the WebSocket listener binds and which path it upgrades on.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub path: String,
}

/// Location of the upstream pub/sub store.
///
/// With `standalone` set the relay uses an in-process bus instead and never
/// connects anywhere.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct UpstreamSettings {
    pub host: String,
    pub port: u16,
    pub standalone: bool,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled from `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub upstream: Option<PartialUpstreamSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialUpstreamSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub standalone: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8081,
                path: "/realtime".to_string(),
            },
            upstream: UpstreamSettings {
                host: "localhost".to_string(),
                port: 6379,
                standalone: false,
            },
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl Settings {
    /// Fill every field missing from `partial` with the default value.
    pub fn merge(partial: PartialSettings) -> Self {
        let default = Settings::default();
        let server = partial.server.unwrap_or_default();
        let upstream = partial.upstream.unwrap_or_default();
        let logging = partial.logging.unwrap_or_default();

        Settings {
            server: ServerSettings {
                host: server.host.unwrap_or(default.server.host),
                port: server.port.unwrap_or(default.server.port),
                path: server.path.unwrap_or(default.server.path),
            },
            upstream: UpstreamSettings {
                host: upstream.host.unwrap_or(default.upstream.host),
                port: upstream.port.unwrap_or(default.upstream.port),
                standalone: upstream.standalone.unwrap_or(default.upstream.standalone),
            },
            logging: LoggingSettings {
                level: logging.level.unwrap_or(default.logging.level),
            },
        }
    }

    /// Reject settings the listener or upstream connector could not use.
    ///
    /// Runs before anything binds, so a bad flag aborts startup cleanly.
    pub fn validate(&self) -> Result<(), SettingsError> {
        check_host("http", &self.server.host)?;
        check_port("http", self.server.port)?;
        if !self.server.path.starts_with('/') {
            return Err(SettingsError::InvalidPath(self.server.path.clone()));
        }
        if !self.upstream.standalone {
            check_host("redis", &self.upstream.host)?;
            check_port("redis", self.upstream.port)?;
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn upstream_addr(&self) -> String {
        format!("{}:{}", self.upstream.host, self.upstream.port)
    }
}

fn check_host(field: &'static str, host: &str) -> Result<(), SettingsError> {
    if is_valid_host(host) {
        Ok(())
    } else {
        Err(SettingsError::InvalidHost {
            field,
            value: host.to_string(),
        })
    }
}

fn check_port(field: &'static str, port: u16) -> Result<(), SettingsError> {
    if is_valid_port(port) {
        Ok(())
    } else {
        Err(SettingsError::InvalidPort { field, value: port })
    }
}

/// A TCP port in `[1, 65535)`.
pub fn is_valid_port(port: u16) -> bool {
    port >= 1 && port < u16::MAX
}

/// An IP literal or an RFC 1123 hostname.
pub fn is_valid_host(host: &str) -> bool {
    if host.parse::<IpAddr>().is_ok() {
        return true;
    }
    let host = host.strip_suffix('.').unwrap_or(host);
    if host.is_empty() || host.len() > 253 {
        return false;
    }
    host.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}
