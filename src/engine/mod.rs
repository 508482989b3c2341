//! Rewriting engine adapter.
//!
//! # Data Flow
//! ```text
//! DestinationURL + RewritingEngine
//!     → EngineRuntime::is_engine_ready (capability query)
//!     → codec.rs (encode destination)
//!     → ProxiedUrl = service_prefix + encoded
//! ```
//!
//! # Design Decisions
//! - Engine readiness is an explicit query, so "not loaded yet" is a
//!   testable error instead of a silent no-op
//! - Switching engine or transport replaces the adapter's active selection;
//!   in-flight loads are not migrated

pub mod codec;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::config::{CodecKind, ServerConfig};
use crate::settings::{RewritingEngine, Transport, UserPreferences};

/// Error type for proxied URL construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("rewriting engine '{0}' is not ready")]
    Unavailable(RewritingEngine),

    #[error("rewriting engine '{0}' is not configured")]
    NotConfigured(RewritingEngine),
}

/// Capability query for engine runtimes.
pub trait EngineRuntime: Send + Sync {
    fn is_engine_ready(&self, engine: RewritingEngine) -> bool;
}

/// Engine readiness backed by bundle marker files on disk.
#[derive(Debug, Clone, Default)]
pub struct BundleRuntime {
    markers: HashMap<RewritingEngine, PathBuf>,
}

impl BundleRuntime {
    pub fn from_config(config: &ServerConfig) -> Self {
        let mut markers = HashMap::new();
        for engine in &config.static_files.engines {
            match engine.name.parse::<RewritingEngine>() {
                Ok(kind) => {
                    markers.insert(kind, PathBuf::from(&engine.dir).join(&engine.marker));
                }
                Err(e) => tracing::warn!(error = %e, "Engine bundle has no adapter, serving assets only"),
            }
        }
        Self { markers }
    }
}

impl EngineRuntime for BundleRuntime {
    fn is_engine_ready(&self, engine: RewritingEngine) -> bool {
        self.markers
            .get(&engine)
            .map(|marker| marker.is_file())
            .unwrap_or(false)
    }
}

/// How an engine embeds destinations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineProfile {
    pub service_prefix: String,
    pub codec: CodecKind,
}

/// A locally-routable URL that makes the engine fetch the destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ProxiedUrl(String);

impl ProxiedUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Join with an origin such as `http://localhost:3000`.
    pub fn absolute(&self, origin: &str) -> String {
        format!("{}{}", origin.trim_end_matches('/'), self.0)
    }
}

impl std::fmt::Display for ProxiedUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Client-side transport wiring for the selected transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportSetup {
    Bare {
        server: String,
    },
    Epoxy {
        worker: String,
        module: String,
        wisp: String,
    },
}

/// Paths the transport setups point at.
#[derive(Debug, Clone)]
struct TransportPaths {
    bare_prefix: String,
    wisp_suffix: String,
    baremux_worker: String,
    epoxy_module: String,
}

/// Builds proxied URLs for whichever engine is active.
#[derive(Clone)]
pub struct EngineAdapter {
    runtime: Arc<dyn EngineRuntime>,
    profiles: HashMap<RewritingEngine, EngineProfile>,
    paths: TransportPaths,
    active: RewritingEngine,
    transport: Transport,
}

impl std::fmt::Debug for EngineAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineAdapter")
            .field("profiles", &self.profiles)
            .field("active", &self.active)
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

impl EngineAdapter {
    pub fn from_config(config: &ServerConfig, runtime: Arc<dyn EngineRuntime>) -> Self {
        let profiles = config
            .static_files
            .engines
            .iter()
            .filter_map(|engine| {
                let kind = engine.name.parse::<RewritingEngine>().ok()?;
                Some((
                    kind,
                    EngineProfile {
                        service_prefix: engine.service_prefix.clone(),
                        codec: engine.codec,
                    },
                ))
            })
            .collect();

        let mount = |name: &str, default: &str| {
            config
                .static_files
                .mounts
                .iter()
                .find(|m| m.name == name)
                .map(|m| m.path.clone())
                .unwrap_or_else(|| default.to_string())
        };

        Self {
            runtime,
            profiles,
            paths: TransportPaths {
                bare_prefix: config.routing.bare_prefix.clone(),
                wisp_suffix: config.routing.wisp_suffix.clone(),
                baremux_worker: format!("{}worker.js", mount("baremux", "/baremux/")),
                epoxy_module: format!("{}index.js", mount("epoxy", "/epoxy/")),
            },
            active: RewritingEngine::default(),
            transport: Transport::default(),
        }
    }

    pub fn is_engine_ready(&self, engine: RewritingEngine) -> bool {
        self.runtime.is_engine_ready(engine)
    }

    pub fn active_engine(&self) -> RewritingEngine {
        self.active
    }

    pub fn active_transport(&self) -> Transport {
        self.transport
    }

    /// Re-initialize for new preferences and return the transport wiring
    /// for a page served from `host`.
    pub fn configure(&mut self, prefs: &UserPreferences, host: &str, secure: bool) -> TransportSetup {
        if self.active != prefs.rewriting_engine || self.transport != prefs.transport {
            tracing::debug!(
                engine = %prefs.rewriting_engine,
                transport = %prefs.transport,
                "Rewriting engine re-initialized"
            );
        }
        self.active = prefs.rewriting_engine;
        self.transport = prefs.transport;
        self.transport_setup(self.transport, host, secure)
    }

    /// Proxied URL for `destination` through `engine`.
    pub fn build_proxied_url(
        &self,
        destination: &str,
        engine: RewritingEngine,
    ) -> Result<ProxiedUrl, EngineError> {
        let profile = self
            .profiles
            .get(&engine)
            .ok_or(EngineError::NotConfigured(engine))?;
        if !self.runtime.is_engine_ready(engine) {
            return Err(EngineError::Unavailable(engine));
        }
        Ok(ProxiedUrl(format!(
            "{}{}",
            profile.service_prefix,
            codec::encode_url(profile.codec, destination)
        )))
    }

    /// Proxied URL through the active engine.
    pub fn open(&self, destination: &str) -> Result<ProxiedUrl, EngineError> {
        self.build_proxied_url(destination, self.active)
    }

    /// Transport wiring for a page served from `host`.
    pub fn transport_setup(&self, transport: Transport, host: &str, secure: bool) -> TransportSetup {
        match transport {
            Transport::Direct => TransportSetup::Bare {
                server: self.paths.bare_prefix.clone(),
            },
            Transport::SecureTunnel => TransportSetup::Epoxy {
                worker: self.paths.baremux_worker.clone(),
                module: self.paths.epoxy_module.clone(),
                wisp: format!(
                    "{}://{}{}",
                    if secure { "wss" } else { "ws" },
                    host,
                    self.paths.wisp_suffix
                ),
            },
        }
    }
}
