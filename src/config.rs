//! Gateway configuration.
//!
//! Defaults mirror the development deployment: TCP and UDP on
//! `127.0.0.1:9111`, HTTP on `127.0.0.1:8001`, an 8 KiB read buffer, and a
//! `plugins` artifact directory next to the working directory. A YAML file
//! can override any subset of fields, and `GATEWAY_*` environment variables
//! overlay whatever was loaded.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or overlaying configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {reason}")]
    FileUnreadable { path: String, reason: String },

    #[error("could not parse config file {path}: {reason}")]
    FileInvalid { path: String, reason: String },

    #[error("invalid value for {variable}: {reason}")]
    InvalidValue { variable: String, reason: String },
}

/// One listening address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerConfig {
    pub host: String,
    pub port: u16,
}

impl ListenerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

/// Event loop and transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiplexerConfig {
    /// TCP listening addresses registered before start.
    pub tcp_listeners: Vec<ListenerConfig>,
    /// UDP socket addresses registered before start.
    pub udp_listeners: Vec<ListenerConfig>,
    /// Size of the single reusable read buffer; one read never exceeds it.
    pub buffer_size: usize,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            tcp_listeners: vec![ListenerConfig::new("127.0.0.1", 9111)],
            udp_listeners: vec![ListenerConfig::new("127.0.0.1", 9111)],
            buffer_size: 8192,
        }
    }
}

/// HTTP front door settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8001,
        }
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Workers draining the request queue.
    pub worker_count: usize,
    /// Queued requests before submission applies backpressure.
    pub queue_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            queue_capacity: 64,
        }
    }
}

/// Plugin discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    /// Directory scanned for command artifacts. Must exist at startup.
    pub directory: PathBuf,
    /// Polling interval for the artifact watcher.
    pub poll_interval_ms: u64,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("plugins"),
            poll_interval_ms: 1000,
        }
    }
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub multiplexer: MultiplexerConfig,
    pub http: HttpConfig,
    pub dispatcher: DispatcherConfig,
    pub plugins: PluginsConfig,
}

impl GatewayConfig {
    /// Load configuration from a YAML file. Absent fields keep their
    /// defaults.
    pub fn from_yaml_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileUnreadable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::FileInvalid {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Defaults overlaid with `GATEWAY_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Overlay `GATEWAY_*` environment variables onto `self`.
    ///
    /// Recognized variables: `GATEWAY_TCP_BIND` and `GATEWAY_UDP_BIND`
    /// (`host:port`, replacing the listener list), `GATEWAY_HTTP_BIND`,
    /// `GATEWAY_BUFFER_SIZE`, `GATEWAY_WORKERS`, `GATEWAY_QUEUE_CAPACITY`,
    /// `GATEWAY_PLUGIN_DIR`, and `GATEWAY_PLUGIN_POLL_MS`.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(value) = std::env::var("GATEWAY_TCP_BIND") {
            self.multiplexer.tcp_listeners = vec![parse_listener(&value, "GATEWAY_TCP_BIND")?];
        }
        if let Ok(value) = std::env::var("GATEWAY_UDP_BIND") {
            self.multiplexer.udp_listeners = vec![parse_listener(&value, "GATEWAY_UDP_BIND")?];
        }
        if let Ok(value) = std::env::var("GATEWAY_HTTP_BIND") {
            let listener = parse_listener(&value, "GATEWAY_HTTP_BIND")?;
            self.http.host = listener.host;
            self.http.port = listener.port;
        }
        if let Ok(value) = std::env::var("GATEWAY_BUFFER_SIZE") {
            self.multiplexer.buffer_size = parse_number(&value, "GATEWAY_BUFFER_SIZE")?;
        }
        if let Ok(value) = std::env::var("GATEWAY_WORKERS") {
            self.dispatcher.worker_count = parse_number(&value, "GATEWAY_WORKERS")?;
        }
        if let Ok(value) = std::env::var("GATEWAY_QUEUE_CAPACITY") {
            self.dispatcher.queue_capacity = parse_number(&value, "GATEWAY_QUEUE_CAPACITY")?;
        }
        if let Ok(value) = std::env::var("GATEWAY_PLUGIN_DIR") {
            self.plugins.directory = PathBuf::from(value);
        }
        if let Ok(value) = std::env::var("GATEWAY_PLUGIN_POLL_MS") {
            self.plugins.poll_interval_ms = parse_number(&value, "GATEWAY_PLUGIN_POLL_MS")?;
        }
        Ok(())
    }
}

fn parse_listener(value: &str, variable: &str) -> Result<ListenerConfig, ConfigError> {
    let (host, port) = value
        .rsplit_once(':')
        .ok_or_else(|| ConfigError::InvalidValue {
            variable: variable.to_string(),
            reason: "expected host:port".to_string(),
        })?;

    // accept bracketed IPv6 like [::1]:9111
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(ConfigError::InvalidValue {
            variable: variable.to_string(),
            reason: "host must not be empty".to_string(),
        });
    }

    let port = port.parse::<u16>().map_err(|e| ConfigError::InvalidValue {
        variable: variable.to_string(),
        reason: format!("invalid port: {e}"),
    })?;

    Ok(ListenerConfig::new(host, port))
}

fn parse_number<T: std::str::FromStr>(value: &str, variable: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|e| ConfigError::InvalidValue {
        variable: variable.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_development_deployment() {
        let config = GatewayConfig::default();

        assert_eq!(
            config.multiplexer.tcp_listeners,
            vec![ListenerConfig::new("127.0.0.1", 9111)]
        );
        assert_eq!(
            config.multiplexer.udp_listeners,
            vec![ListenerConfig::new("127.0.0.1", 9111)]
        );
        assert_eq!(config.multiplexer.buffer_size, 8192);
        assert_eq!(config.http.port, 8001);
        assert_eq!(config.plugins.directory, PathBuf::from("plugins"));
    }

    #[test]
    fn partial_yaml_keeps_defaults_for_absent_fields() {
        let yaml = r#"
http:
  port: 9090
plugins:
  directory: /var/lib/gateway/plugins
"#;
        let config: GatewayConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.http.port, 9090);
        assert_eq!(config.http.host, "127.0.0.1");
        assert_eq!(
            config.plugins.directory,
            PathBuf::from("/var/lib/gateway/plugins")
        );
        assert_eq!(config.multiplexer.buffer_size, 8192);
    }

    #[test]
    fn from_yaml_file_reports_missing_files() {
        let error = GatewayConfig::from_yaml_file("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(error, ConfigError::FileUnreadable { .. }));
    }

    #[test]
    fn tcp_bind_override_replaces_the_listener_list() {
        std::env::set_var("GATEWAY_TCP_BIND", "0.0.0.0:7000");
        let mut config = GatewayConfig::default();
        config.apply_env().unwrap();
        std::env::remove_var("GATEWAY_TCP_BIND");

        assert_eq!(
            config.multiplexer.tcp_listeners,
            vec![ListenerConfig::new("0.0.0.0", 7000)]
        );
    }

    #[test]
    fn worker_override_rejects_garbage() {
        std::env::set_var("GATEWAY_WORKERS", "many");
        let mut config = GatewayConfig::default();
        let error = config.apply_env().unwrap_err();
        std::env::remove_var("GATEWAY_WORKERS");

        assert!(matches!(
            error,
            ConfigError::InvalidValue { variable, .. } if variable == "GATEWAY_WORKERS"
        ));
    }

    #[test]
    fn listener_parsing_accepts_bracketed_ipv6() {
        let listener = parse_listener("[::1]:9111", "GATEWAY_TCP_BIND").unwrap();
        assert_eq!(listener.host, "::1");
        assert_eq!(listener.port, 9111);
    }

    #[test]
    fn listener_parsing_rejects_missing_port() {
        assert!(parse_listener("localhost", "GATEWAY_TCP_BIND").is_err());
        assert!(parse_listener(":9111", "GATEWAY_TCP_BIND").is_err());
    }
}
