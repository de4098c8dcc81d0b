//! Engine configuration.

use serde::{Deserialize, Serialize};
use tracing::warn;

use bindgraph_eval::{InterpreterConfig, InvalidationPolicy};

/// Environment variable overriding [`EngineConfig::chunk_size`].
pub const CHUNK_SIZE_ENV: &str = "BINDGRAPH_CHUNK_SIZE";
/// Environment variable overriding [`EngineConfig::invalidation`].
pub const INVALIDATION_ENV: &str = "BINDGRAPH_INVALIDATION";
/// Environment variable overriding [`EngineConfig::app_store_key`].
pub const APP_STORE_KEY_ENV: &str = "BINDGRAPH_APP_STORE_KEY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Bindings evaluated between cooperative yield points.
    pub chunk_size: usize,
    pub invalidation: InvalidationPolicy,
    /// Share of the graph a localized cycle search may visit before it
    /// falls back to a full scan.
    pub localized_cycle_limit: f64,
    pub interpreter: InterpreterConfig,
    /// Namespace of the persistent app store.
    pub app_store_key: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            chunk_size: 256,
            invalidation: InvalidationPolicy::default(),
            localized_cycle_limit: 0.5,
            interpreter: InterpreterConfig::default(),
            app_store_key: "default".to_string(),
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with the `BINDGRAPH_*` environment variables.
    ///
    /// Unparsable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::default().overlay(|name| std::env::var(name).ok())
    }

    fn overlay(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(raw) = var(CHUNK_SIZE_ENV) {
            match raw.parse::<usize>() {
                Ok(size) if size > 0 => self.chunk_size = size,
                _ => warn!(value = %raw, "ignoring invalid {}", CHUNK_SIZE_ENV),
            }
        }
        if let Some(raw) = var(INVALIDATION_ENV) {
            match raw.parse() {
                Ok(policy) => self.invalidation = policy,
                Err(e) => warn!(error = %e, "ignoring invalid {}", INVALIDATION_ENV),
            }
        }
        if let Some(key) = var(APP_STORE_KEY_ENV).filter(|k| !k.is_empty()) {
            self.app_store_key = key;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn overlay(vars: &[(&str, &str)]) -> EngineConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EngineConfig::default().overlay(|name| vars.get(name).cloned())
    }

    #[test]
    fn env_overrides_defaults() {
        let config = overlay(&[
            (CHUNK_SIZE_ENV, "32"),
            (INVALIDATION_ENV, "conservative"),
            (APP_STORE_KEY_ENV, "app-7"),
        ]);
        assert_eq!(config.chunk_size, 32);
        assert_eq!(config.invalidation, InvalidationPolicy::Conservative);
        assert_eq!(config.app_store_key, "app-7");
    }

    #[test]
    fn invalid_values_keep_defaults() {
        let config = overlay(&[(CHUNK_SIZE_ENV, "0"), (INVALIDATION_ENV, "sometimes")]);
        assert_eq!(config, EngineConfig::default());
    }
}
