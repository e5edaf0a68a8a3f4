/// Engine configuration, loadable from TOML
use dlna_caster_core::{CastError, Result, MEDIA_RENDERER_URN};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

const MIN_BUFFER_SIZE: usize = 4 * 1024;
const MAX_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CasterConfig {
    pub server: ServerConfig,
    pub discovery: DiscoveryConfig,
    pub control: ControlConfig,
}

/// Streaming server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener address; port 0 picks an ephemeral port
    pub bind: SocketAddr,
    /// Host written into media URLs instead of the auto-detected interface
    pub advertise_host: Option<IpAddr>,
    /// Bounded transfer buffer per connection, in bytes
    pub buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 0)),
            advertise_host: None,
            buffer_size: 64 * 1024,
        }
    }
}

/// SSDP search settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub service_type: String,
    /// Collection window
    pub timeout_ms: u64,
    /// MX header: max responder jitter in seconds
    pub mx: u8,
    /// Number of M-SEARCH datagrams sent to compensate for UDP loss
    pub search_count: u32,
    pub search_interval_ms: u64,
    /// Per-device description fetch timeout
    pub description_timeout_ms: u64,
    pub ttl: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            service_type: MEDIA_RENDERER_URN.to_string(),
            timeout_ms: 3000,
            mx: 1,
            search_count: 3,
            search_interval_ms: 250,
            description_timeout_ms: 3000,
            ttl: 2,
        }
    }
}

impl DiscoveryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn search_interval(&self) -> Duration {
        Duration::from_millis(self.search_interval_ms)
    }

    pub fn description_timeout(&self) -> Duration {
        Duration::from_millis(self.description_timeout_ms)
    }
}

/// What a session sends to the renderer when it is stopped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopPolicy {
    /// Stop only
    #[default]
    StopOnly,
    /// Clear the transport URI when Stop could not be delivered
    ClearUriOnFailure,
    /// Always clear the transport URI after Stop
    AlwaysClearUri,
}

/// SOAP control settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Bound on one SOAP round-trip
    pub timeout_ms: u64,
    pub instance_id: u32,
    pub stop_policy: StopPolicy,
    /// Send DIDL-Lite metadata with SetAVTransportURI
    pub send_metadata: bool,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            instance_id: 0,
            stop_policy: StopPolicy::StopOnly,
            send_metadata: true,
        }
    }
}

impl ControlConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl CasterConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: CasterConfig =
            toml::from_str(text).map_err(|e| CastError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| CastError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_BUFFER_SIZE..=MAX_BUFFER_SIZE).contains(&self.server.buffer_size) {
            return Err(CastError::Config(format!(
                "server.buffer_size must be between {} and {} bytes, got {}",
                MIN_BUFFER_SIZE, MAX_BUFFER_SIZE, self.server.buffer_size
            )));
        }

        let d = &self.discovery;
        if d.service_type.trim().is_empty() {
            return Err(CastError::Config("discovery.service_type is empty".into()));
        }
        if d.timeout_ms == 0 || d.description_timeout_ms == 0 {
            return Err(CastError::Config("discovery timeouts must be non-zero".into()));
        }
        if d.search_count == 0 {
            return Err(CastError::Config("discovery.search_count must be at least 1".into()));
        }
        if !(1..=5).contains(&d.mx) {
            return Err(CastError::Config(format!(
                "discovery.mx must be between 1 and 5, got {}",
                d.mx
            )));
        }

        if self.control.timeout_ms == 0 {
            return Err(CastError::Config("control.timeout_ms must be non-zero".into()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = CasterConfig::default();
        config.validate().unwrap();
        assert_eq!(config.discovery.service_type, MEDIA_RENDERER_URN);
        assert_eq!(config.server.buffer_size, 65536);
        assert_eq!(config.control.stop_policy, StopPolicy::StopOnly);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = CasterConfig::from_toml_str(
            r#"
[server]
bind = "0.0.0.0:8200"
advertise_host = "192.168.1.20"

[control]
stop_policy = "clear-uri-on-failure"
"#,
        )
        .unwrap();

        assert_eq!(config.server.bind.port(), 8200);
        assert_eq!(config.server.advertise_host, Some("192.168.1.20".parse().unwrap()));
        assert_eq!(config.server.buffer_size, 65536);
        assert_eq!(config.control.stop_policy, StopPolicy::ClearUriOnFailure);
        assert_eq!(config.discovery.search_count, 3);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let err = CasterConfig::from_toml_str("[discovery]\nmx = 9\n").unwrap_err();
        assert!(matches!(err, CastError::Config(_)));

        let err = CasterConfig::from_toml_str("[server]\nbuffer_size = 16\n").unwrap_err();
        assert!(err.to_string().contains("buffer_size"));

        let err = CasterConfig::from_toml_str("[discovery]\nsearch_count = 0\n").unwrap_err();
        assert!(err.to_string().contains("search_count"));
    }

    #[test]
    fn test_round_trip_through_toml() {
        let config = CasterConfig::default();
        let text = config.to_toml_string().unwrap();
        assert_eq!(CasterConfig::from_toml_str(&text).unwrap(), config);
    }
}
