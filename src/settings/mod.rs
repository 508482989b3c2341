//! User preference persistence.
//!
//! # Responsibilities
//! - Define the preference record and its defaults
//! - Load it from an injected key-value storage, never failing
//! - Save it wholesale under one well-known key
//!
//! # Design Decisions
//! - Stored fields override defaults one by one; an absent or unreadable
//!   field keeps its default without disturbing the others
//! - A record that is not a JSON object resets to defaults (logged, not surfaced)
//! - No partial updates and no schema migrations

pub mod storage;

use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::search::SearchEngine;

pub use storage::{FileStorage, KeyValueStorage, MemoryStorage, StorageError};

/// Storage key holding the serialized preferences.
pub const SETTINGS_KEY: &str = "proxySettings";

/// Which rewriting engine builds proxied URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RewritingEngine {
    #[default]
    Ultraviolet,
    Scramjet,
}

impl RewritingEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            RewritingEngine::Ultraviolet => "ultraviolet",
            RewritingEngine::Scramjet => "scramjet",
        }
    }
}

impl FromStr for RewritingEngine {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ultraviolet" | "uv" => Ok(RewritingEngine::Ultraviolet),
            "scramjet" => Ok(RewritingEngine::Scramjet),
            _ => Err(UnknownVariant::new("rewriting engine", s)),
        }
    }
}

impl std::fmt::Display for RewritingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the rewriting engine reaches the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Transport {
    /// HTTP relay through the tunnel-control endpoint.
    #[default]
    #[serde(rename = "bare")]
    Direct,
    /// Client-side TLS carried over the wisp transport endpoint.
    #[serde(rename = "epoxy")]
    SecureTunnel,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Direct => "bare",
            Transport::SecureTunnel => "epoxy",
        }
    }
}

impl FromStr for Transport {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bare" | "direct" => Ok(Transport::Direct),
            "epoxy" | "secure" => Ok(Transport::SecureTunnel),
            _ => Err(UnknownVariant::new("transport", s)),
        }
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// The persisted preference record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UserPreferences {
    #[serde(alias = "proxyBackend")]
    pub rewriting_engine: RewritingEngine,
    pub transport: Transport,
    pub search_engine: SearchEngine,
    pub clear_cookies: bool,
    pub block_ads: bool,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            rewriting_engine: RewritingEngine::Ultraviolet,
            transport: Transport::Direct,
            search_engine: SearchEngine::DuckDuckGo,
            clear_cookies: true,
            block_ads: true,
        }
    }
}

/// Loads and saves [`UserPreferences`] through a [`KeyValueStorage`].
#[derive(Debug)]
pub struct SettingsStore<S> {
    storage: S,
}

impl<S: KeyValueStorage> SettingsStore<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Stored preferences merged over defaults. Never fails.
    pub fn load(&self) -> UserPreferences {
        let Some(raw) = self.storage.get(SETTINGS_KEY) else {
            return UserPreferences::default();
        };
        let stored: Map<String, Value> = match serde_json::from_str(&raw) {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(error = %e, "Stored preferences unreadable, using defaults");
                return UserPreferences::default();
            }
        };

        let mut prefs = UserPreferences::default();
        overlay(&mut prefs.rewriting_engine, &stored, &["rewritingEngine", "proxyBackend"]);
        overlay(&mut prefs.transport, &stored, &["transport"]);
        overlay(&mut prefs.search_engine, &stored, &["searchEngine"]);
        overlay(&mut prefs.clear_cookies, &stored, &["clearCookies"]);
        overlay(&mut prefs.block_ads, &stored, &["blockAds"]);
        prefs
    }

    /// Overwrite the whole stored record.
    pub fn save(&self, prefs: &UserPreferences) -> Result<(), StorageError> {
        let encoded = serde_json::to_string(prefs)?;
        self.storage.set(SETTINGS_KEY, &encoded)?;
        tracing::debug!(
            engine = %prefs.rewriting_engine,
            transport = %prefs.transport,
            search_engine = %prefs.search_engine,
            "Preferences saved"
        );
        Ok(())
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }
}

/// Replace `slot` with the first present key's value if it decodes.
fn overlay<T: DeserializeOwned>(slot: &mut T, stored: &Map<String, Value>, keys: &[&str]) {
    let Some((key, value)) = keys.iter().find_map(|key| stored.get(*key).map(|value| (*key, value))) else {
        return;
    };
    match T::deserialize(value) {
        Ok(decoded) => *slot = decoded,
        Err(e) => tracing::warn!(field = key, error = %e, "Stored preference unreadable, keeping default"),
    }
}
