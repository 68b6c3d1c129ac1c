//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the progression engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How many times a write is retried after a row conflict
    pub conflict_retries: u32,
    /// How many owner-reachability hops the unlock cascade follows
    pub cascade_depth: usize,
    /// Keep the per-course dependents index between requests
    pub cache_dependents: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            conflict_retries: 1,
            cascade_depth: 8,
            cache_dependents: true,
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document; missing keys take their defaults.
    pub fn from_toml(source: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml("conflict_retries = 3").unwrap();
        assert_eq!(config.conflict_retries, 3);
        assert_eq!(config.cascade_depth, 8);
        assert!(config.cache_dependents);
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(EngineConfig::from_toml("").unwrap(), EngineConfig::default());
    }
}
