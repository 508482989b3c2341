//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the proxy-browser server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind address, admission limit).
    pub listener: ListenerConfig,

    /// Routing predicate table (tunnel-control prefix, transport suffix).
    pub routing: RoutingConfig,

    /// Tunnel-control (bare) relay settings.
    pub bare: BareConfig,

    /// Streaming transport (wisp) settings.
    pub wisp: WispConfig,

    /// Static asset mounts and rewriting-engine bundles.
    pub static_files: StaticFilesConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:3000").
    pub bind_address: String,

    /// Maximum concurrently served requests (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Routing predicates, compiled once at startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Path prefix claimed by the tunnel-control backend.
    pub bare_prefix: String,

    /// Path suffix identifying the transport endpoint (upgrades only).
    pub wisp_suffix: String,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            bare_prefix: "/bare/".to_string(),
            wisp_suffix: "/wisp/".to_string(),
        }
    }
}

/// Tunnel-control relay configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BareConfig {
    /// Timeout for a single relayed request in seconds.
    pub request_timeout_secs: u64,

    /// Largest request body buffered for relaying.
    pub max_body_bytes: usize,

    /// Allow relaying to loopback destinations.
    pub allow_loopback_ips: bool,

    /// Allow relaying to private-network destinations.
    pub allow_private_ips: bool,

    /// Optional maintainer contact advertised in the manifest.
    pub maintainer: Option<MaintainerConfig>,
}

impl Default for BareConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            max_body_bytes: 32 * 1024 * 1024,
            allow_loopback_ips: false,
            allow_private_ips: false,
            maintainer: None,
        }
    }
}

/// Maintainer contact for the bare manifest.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct MaintainerConfig {
    pub email: Option<String>,
    pub website: Option<String>,
}

/// Streaming transport configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WispConfig {
    /// Packets a client may send per stream before waiting for CONTINUE.
    pub buffer_size: u32,

    /// Outbound connect timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Allow streams to loopback destinations.
    pub allow_loopback_ips: bool,

    /// Allow streams to private-network destinations.
    pub allow_private_ips: bool,

    /// Allow UDP streams.
    pub allow_udp_streams: bool,
}

impl Default for WispConfig {
    fn default() -> Self {
        Self {
            buffer_size: 128,
            connect_timeout_secs: 10,
            allow_loopback_ips: false,
            allow_private_ips: false,
            allow_udp_streams: true,
        }
    }
}

/// Static asset configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StaticFilesConfig {
    /// Directory holding the application UI bundle, served at `/`.
    pub public_dir: String,

    /// Rewriting engine bundles.
    pub engines: Vec<EngineConfig>,

    /// Additional read-only mounts (transport bundles).
    pub mounts: Vec<MountConfig>,
}

impl Default for StaticFilesConfig {
    fn default() -> Self {
        Self {
            public_dir: "public".to_string(),
            engines: vec![
                EngineConfig {
                    name: "ultraviolet".to_string(),
                    mount: "/uv/".to_string(),
                    dir: "node_modules/@titaniumnetwork-dev/ultraviolet/dist".to_string(),
                    service_prefix: "/uv/service/".to_string(),
                    marker: "uv.bundle.js".to_string(),
                    codec: CodecKind::Xor,
                },
                EngineConfig {
                    name: "scramjet".to_string(),
                    mount: "/scramjet/".to_string(),
                    dir: "node_modules/@mercuryworkshop/scramjet/dist".to_string(),
                    service_prefix: "/scramjet/service/".to_string(),
                    marker: "scramjet.codecs.js".to_string(),
                    codec: CodecKind::Xor,
                },
            ],
            mounts: vec![
                MountConfig {
                    name: "baremux".to_string(),
                    path: "/baremux/".to_string(),
                    dir: "node_modules/@mercuryworkshop/bare-mux/dist".to_string(),
                },
                MountConfig {
                    name: "epoxy".to_string(),
                    path: "/epoxy/".to_string(),
                    dir: "node_modules/@mercuryworkshop/epoxy-transport/dist".to_string(),
                },
            ],
        }
    }
}

/// A rewriting engine bundle and how its proxied URLs are formed.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Engine identifier ("ultraviolet", "scramjet").
    pub name: String,

    /// Mount path for the bundle (e.g., "/uv/").
    pub mount: String,

    /// Directory on disk holding the bundle.
    pub dir: String,

    /// Prefix under which the engine's service worker intercepts loads.
    pub service_prefix: String,

    /// File whose presence marks the bundle as ready.
    pub marker: String,

    /// URL codec the engine decodes.
    #[serde(default)]
    pub codec: CodecKind,
}

/// URL codec used to embed a destination in a proxied URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    #[default]
    Xor,
    Plain,
}

/// A plain read-only static mount.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MountConfig {
    /// Name reported by the health endpoint.
    pub name: String,

    /// Mount path (e.g., "/epoxy/").
    pub path: String,

    /// Directory on disk.
    pub dir: String,
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout for application (non-streaming) requests in seconds.
    pub request_secs: u64,

    /// Grace period for draining connections on shutdown in seconds.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            shutdown_grace_secs: 10,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

impl ServerConfig {
    /// Apply overrides from the process environment.
    ///
    /// `PORT` replaces the port of `listener.bind_address`, keeping the host.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("PORT") {
            self.apply_port_override(&port);
        }
    }

    fn apply_port_override(&mut self, port: &str) {
        let port = port.trim();
        if port.parse::<u16>().is_err() {
            tracing::warn!(port = %port, "Ignoring invalid PORT value");
            return;
        }
        let host = match self.listener.bind_address.rsplit_once(':') {
            Some((host, _)) => host.to_string(),
            None => self.listener.bind_address.clone(),
        };
        self.listener.bind_address = format!("{}:{}", host, port);
    }

    /// Look up an engine bundle by name.
    pub fn engine(&self, name: &str) -> Option<&EngineConfig> {
        self.static_files.engines.iter().find(|e| e.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_listen_on_3000() {
        let config = ServerConfig::default();
        assert_eq!(config.listener.bind_address, "0.0.0.0:3000");
        assert_eq!(config.routing.bare_prefix, "/bare/");
        assert_eq!(config.routing.wisp_suffix, "/wisp/");
        assert!(config.engine("ultraviolet").is_some());
        assert!(config.engine("scramjet").is_some());
    }

    #[test]
    fn port_override_keeps_host() {
        let mut config = ServerConfig::default();
        config.listener.bind_address = "127.0.0.1:3000".to_string();
        config.apply_port_override("8080");
        assert_eq!(config.listener.bind_address, "127.0.0.1:8080");
    }

    #[test]
    fn invalid_port_override_is_ignored() {
        let mut config = ServerConfig::default();
        config.apply_port_override("not-a-port");
        assert_eq!(config.listener.bind_address, "0.0.0.0:3000");
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
            [wisp]
            buffer_size = 64
            "#,
        )
        .unwrap();
        assert_eq!(config.wisp.buffer_size, 64);
        assert_eq!(config.wisp.connect_timeout_secs, 10);
        assert_eq!(config.listener.bind_address, "0.0.0.0:3000");
    }
}
