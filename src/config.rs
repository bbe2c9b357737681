//! Configuration Module
//!
//! Handles loading proxy configuration from an optional YAML file and
//! environment variables.

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ProxyError, Result};

/// YAML file read when `CONFIG_FILE` is not set
pub const DEFAULT_CONFIG_FILE: &str = "configuration.yaml";

/// Transport used to reach the upstream directory server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamProtocol {
    /// Plain TCP
    Ldap,
    /// TCP wrapped in TLS
    Ldaps,
}

impl FromStr for UpstreamProtocol {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ldap" => Ok(Self::Ldap),
            "ldaps" => Ok(Self::Ldaps),
            other => Err(ProxyError::Config(format!(
                "unknown upstream protocol '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for UpstreamProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ldap => f.write_str("ldap"),
            Self::Ldaps => f.write_str("ldaps"),
        }
    }
}

/// Proxy configuration parameters.
///
/// Values are resolved as defaults, then the YAML file named by `CONFIG_FILE`
/// (if any), then environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the proxy listens on for LDAP clients
    pub base_port: u16,
    /// Log level: info, debug, warning or error
    pub log_level: String,
    /// Flush the cache store before accepting connections
    pub flush_cache: bool,
    /// Upstream directory server host (also the TLS server name)
    pub upstream_host: String,
    /// Upstream directory server port
    pub upstream_port: u16,
    /// Upstream transport
    pub upstream_protocol: UpstreamProtocol,
    /// Seconds to stay offline before retrying the upstream
    pub offline_retry: u64,
    /// Seconds a cached Bind (and Search) answer stays fresh
    pub bind_ttl: u64,
    /// Maximum number of records the cache store holds
    pub max_entries: usize,
    /// Admin HTTP port, 0 disables the admin API
    pub admin_port: u16,
    /// Per-read timeout on the upstream socket, in milliseconds
    pub upstream_timeout_ms: u64,
    /// Per-read timeout on the client socket, in milliseconds
    pub client_timeout_ms: u64,
    /// Upstream connect timeout, in milliseconds
    pub connect_timeout_ms: u64,
    /// Largest single message accepted from either peer
    pub max_message_bytes: usize,
    /// Largest Search result buffered for caching
    pub max_result_bytes: usize,
}

// Mirrors the layout of the proxy's configuration.yaml.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    base: FileBase,
    #[serde(default)]
    server: FileServer,
    #[serde(default)]
    cache: FileCache,
}

#[derive(Debug, Default, Deserialize)]
struct FileBase {
    port: Option<u16>,
    loglevel: Option<String>,
    flushdb: Option<bool>,
    admin_port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileServer {
    host: Option<String>,
    port: Option<u16>,
    protocol: Option<UpstreamProtocol>,
    offline_retry: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct FileCache {
    #[serde(default)]
    bind: FileBindCache,
    max_entries: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct FileBindCache {
    ttl: Option<u64>,
}

impl Config {
    /// Loads the configuration: defaults, optional YAML file, then env.
    ///
    /// # Environment Variables
    /// - `CONFIG_FILE` - Path to a YAML configuration file (default:
    ///   `./configuration.yaml`, skipped when absent)
    /// - `BASE_PORT` - Listen port (default: 1389)
    /// - `LOG_LEVEL` - info, debug, warning, error (default: info)
    /// - `FLUSH_CACHE` - Flush store on start (default: false)
    /// - `UPSTREAM_HOST` / `UPSTREAM_PORT` / `UPSTREAM_PROTOCOL`
    /// - `OFFLINE_RETRY` - Offline backoff in seconds (default: 60)
    /// - `BIND_TTL` - Cache freshness in seconds (default: 300)
    /// - `MAX_ENTRIES`, `ADMIN_PORT`, `UPSTREAM_TIMEOUT_MS`,
    ///   `CLIENT_TIMEOUT_MS`, `CONNECT_TIMEOUT_MS`, `MAX_MESSAGE_BYTES`,
    ///   `MAX_RESULT_BYTES`
    pub fn load() -> Result<Self> {
        let mut config = Self::default();
        let path = config_file_path(env::var("CONFIG_FILE").ok(), Path::new(DEFAULT_CONFIG_FILE));
        if let Some(path) = path {
            config.apply_file(&path)?;
        }
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Overlays values from a YAML file.
    pub fn apply_file(&mut self, path: &Path) -> Result<()> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        self.apply_yaml(&raw)
    }

    fn apply_yaml(&mut self, raw: &str) -> Result<()> {
        let file: FileConfig = serde_yaml::from_str(raw)
            .map_err(|e| ProxyError::Config(format!("invalid YAML: {}", e)))?;

        if let Some(port) = file.base.port {
            self.base_port = port;
        }
        if let Some(level) = file.base.loglevel {
            self.log_level = level;
        }
        if let Some(flush) = file.base.flushdb {
            self.flush_cache = flush;
        }
        if let Some(port) = file.base.admin_port {
            self.admin_port = port;
        }
        if let Some(host) = file.server.host {
            self.upstream_host = host;
        }
        if let Some(port) = file.server.port {
            self.upstream_port = port;
        }
        if let Some(protocol) = file.server.protocol {
            self.upstream_protocol = protocol;
        }
        if let Some(retry) = file.server.offline_retry {
            self.offline_retry = retry;
        }
        if let Some(ttl) = file.cache.bind.ttl {
            self.bind_ttl = ttl;
        }
        if let Some(max) = file.cache.max_entries {
            self.max_entries = max;
        }
        Ok(())
    }

    fn apply_env(&mut self) -> Result<()> {
        override_from_env("BASE_PORT", &mut self.base_port);
        if let Ok(level) = env::var("LOG_LEVEL") {
            self.log_level = level;
        }
        override_from_env("FLUSH_CACHE", &mut self.flush_cache);
        if let Ok(host) = env::var("UPSTREAM_HOST") {
            self.upstream_host = host;
        }
        override_from_env("UPSTREAM_PORT", &mut self.upstream_port);
        if let Ok(protocol) = env::var("UPSTREAM_PROTOCOL") {
            self.upstream_protocol = protocol.parse()?;
        }
        override_from_env("OFFLINE_RETRY", &mut self.offline_retry);
        override_from_env("BIND_TTL", &mut self.bind_ttl);
        override_from_env("MAX_ENTRIES", &mut self.max_entries);
        override_from_env("ADMIN_PORT", &mut self.admin_port);
        override_from_env("UPSTREAM_TIMEOUT_MS", &mut self.upstream_timeout_ms);
        override_from_env("CLIENT_TIMEOUT_MS", &mut self.client_timeout_ms);
        override_from_env("CONNECT_TIMEOUT_MS", &mut self.connect_timeout_ms);
        override_from_env("MAX_MESSAGE_BYTES", &mut self.max_message_bytes);
        override_from_env("MAX_RESULT_BYTES", &mut self.max_result_bytes);
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.upstream_host.is_empty() {
            return Err(ProxyError::Config("upstream host is empty".to_string()));
        }
        if self.max_entries == 0 {
            return Err(ProxyError::Config("max_entries must be positive".to_string()));
        }
        if self.log_filter().is_none() {
            return Err(ProxyError::Config(format!(
                "unknown log level '{}'",
                self.log_level
            )));
        }
        Ok(())
    }

    /// Maps the configured log level onto a tracing filter directive.
    pub fn log_filter(&self) -> Option<&'static str> {
        match self.log_level.to_ascii_lowercase().as_str() {
            "debug" => Some("ldap_cache_proxy=debug,tower_http=debug"),
            "info" => Some("ldap_cache_proxy=info,tower_http=info"),
            "warning" | "warn" => Some("ldap_cache_proxy=warn,tower_http=warn"),
            "error" => Some("ldap_cache_proxy=error,tower_http=error"),
            _ => None,
        }
    }

    /// Upstream `host:port` string.
    pub fn upstream_addr(&self) -> String {
        format!("{}:{}", self.upstream_host, self.upstream_port)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.client_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// An explicit path is always used; the default only when it exists.
fn config_file_path(explicit: Option<String>, default: &Path) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(PathBuf::from(path)),
        None if default.is_file() => Some(default.to_path_buf()),
        None => None,
    }
}

fn override_from_env<T: FromStr>(name: &str, slot: &mut T) {
    if let Some(value) = env::var(name).ok().and_then(|v| v.parse().ok()) {
        *slot = value;
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_port: 1389,
            log_level: "info".to_string(),
            flush_cache: false,
            upstream_host: "localhost".to_string(),
            upstream_port: 389,
            upstream_protocol: UpstreamProtocol::Ldap,
            offline_retry: 60,
            bind_ttl: 300,
            max_entries: 10_000,
            admin_port: 0,
            upstream_timeout_ms: 1000,
            client_timeout_ms: 1000,
            connect_timeout_ms: 1000,
            max_message_bytes: 16 * 1024 * 1024,
            max_result_bytes: 64 * 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.base_port, 1389);
        assert_eq!(config.upstream_port, 389);
        assert_eq!(config.upstream_protocol, UpstreamProtocol::Ldap);
        assert_eq!(config.bind_ttl, 300);
        assert!(!config.flush_cache);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_yaml_overlay() {
        let mut config = Config::default();
        config
            .apply_yaml(
                r#"
base:
  port: 3389
  loglevel: debug
  flushdb: true
server:
  host: ldap.example.org
  port: 636
  protocol: ldaps
  offlineRetry: 30
cache:
  bind:
    ttl: 120
"#,
            )
            .unwrap();

        assert_eq!(config.base_port, 3389);
        assert_eq!(config.log_level, "debug");
        assert!(config.flush_cache);
        assert_eq!(config.upstream_addr(), "ldap.example.org:636");
        assert_eq!(config.upstream_protocol, UpstreamProtocol::Ldaps);
        assert_eq!(config.offline_retry, 30);
        assert_eq!(config.bind_ttl, 120);
        // untouched keys keep their defaults
        assert_eq!(config.max_entries, 10_000);
    }

    #[test]
    fn test_config_yaml_invalid() {
        let mut config = Config::default();
        let result = config.apply_yaml("server: [unclosed");
        assert!(matches!(result, Err(ProxyError::Config(_))));
    }

    #[test]
    fn test_config_file_path_resolution() {
        // cargo runs tests from the package root
        let present = Path::new("Cargo.toml");
        let missing = Path::new("no-such-configuration.yaml");

        assert_eq!(config_file_path(None, present), Some(PathBuf::from("Cargo.toml")));
        assert_eq!(config_file_path(None, missing), None);
        assert_eq!(
            config_file_path(Some("/etc/proxy.yaml".to_string()), missing),
            Some(PathBuf::from("/etc/proxy.yaml"))
        );
    }

    #[test]
    fn test_apply_missing_file_is_error() {
        let mut config = Config::default();
        let result = config.apply_file(Path::new("no-such-configuration.yaml"));
        assert!(matches!(result, Err(ProxyError::Config(_))));
    }

    #[test]
    fn test_protocol_parse() {
        assert_eq!("LDAPS".parse::<UpstreamProtocol>().unwrap(), UpstreamProtocol::Ldaps);
        assert!("http".parse::<UpstreamProtocol>().is_err());
    }

    #[test]
    fn test_log_filter_levels() {
        let mut config = Config::default();
        config.log_level = "warning".to_string();
        assert_eq!(config.log_filter(), Some("ldap_cache_proxy=warn,tower_http=warn"));

        config.log_level = "verbose".to_string();
        assert!(config.log_filter().is_none());
        assert!(matches!(config.validate(), Err(ProxyError::Config(_))));
    }
}
