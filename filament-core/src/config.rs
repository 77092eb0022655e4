//! Runtime Configuration
//!
//! Limits that bound the synchronous fixed-point evaluator, plus the
//! hydration payload version this build understands.

use serde::{Deserialize, Serialize};

/// Default cap on consecutive re-runs of one effect within a single pass.
pub const DEFAULT_MAX_EFFECT_ITERATIONS: usize = 100;

/// Default cap on nested recomputations of one computed.
pub const DEFAULT_MAX_COMPUTED_DEPTH: usize = 100;

/// Hydration payload format version.
pub const HYDRATION_VERSION: u32 = 1;

/// Configuration for a [`Runtime`](crate::reactive::Runtime).
///
/// Both caps are at least 1, however the config was built: a cap of 0
/// would fail every effect on its first run.
///
/// ```rust
/// use filament_core::RuntimeConfig;
///
/// let config = RuntimeConfig::from_json(r#"{ "max_effect_iterations": 8 }"#).unwrap();
/// assert_eq!(config.max_effect_iterations, 8);
/// assert_eq!(config.max_computed_depth, 100);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawRuntimeConfig")]
pub struct RuntimeConfig {
    /// How many times an effect may re-run because its own run dirtied one
    /// of its dependencies before the runtime reports a cycle.
    pub max_effect_iterations: usize,

    /// How deeply a computed may be re-entered through its own notification
    /// chain before the runtime reports a cycle.
    pub max_computed_depth: usize,

    /// Version stamped into, and expected from, hydration payloads.
    pub hydration_version: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_effect_iterations: DEFAULT_MAX_EFFECT_ITERATIONS,
            max_computed_depth: DEFAULT_MAX_COMPUTED_DEPTH,
            hydration_version: HYDRATION_VERSION,
        }
    }
}

/// The config as written, before the caps are clamped.
#[derive(Deserialize)]
#[serde(default)]
struct RawRuntimeConfig {
    max_effect_iterations: usize,
    max_computed_depth: usize,
    hydration_version: u32,
}

impl Default for RawRuntimeConfig {
    fn default() -> Self {
        Self {
            max_effect_iterations: DEFAULT_MAX_EFFECT_ITERATIONS,
            max_computed_depth: DEFAULT_MAX_COMPUTED_DEPTH,
            hydration_version: HYDRATION_VERSION,
        }
    }
}

impl From<RawRuntimeConfig> for RuntimeConfig {
    fn from(raw: RawRuntimeConfig) -> Self {
        if raw.max_effect_iterations == 0 || raw.max_computed_depth == 0 {
            tracing::warn!(
                max_effect_iterations = raw.max_effect_iterations,
                max_computed_depth = raw.max_computed_depth,
                "runtime caps must be at least 1; clamping"
            );
        }
        Self {
            max_effect_iterations: 0,
            max_computed_depth: 0,
            hydration_version: raw.hydration_version,
        }
        .with_max_effect_iterations(raw.max_effect_iterations)
        .with_max_computed_depth(raw.max_computed_depth)
    }
}

impl RuntimeConfig {
    /// Parse a config from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// The same config with both caps raised to at least 1.
    pub(crate) fn clamped(self) -> Self {
        let (effects, depth) = (self.max_effect_iterations, self.max_computed_depth);
        self.with_max_effect_iterations(effects).with_max_computed_depth(depth)
    }

    pub fn with_max_effect_iterations(mut self, limit: usize) -> Self {
        self.max_effect_iterations = limit.max(1);
        self
    }

    pub fn with_max_computed_depth(mut self, limit: usize) -> Self {
        self.max_computed_depth = limit.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config = RuntimeConfig::from_json("{}").unwrap();
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn builder_clamps_to_one() {
        let config = RuntimeConfig::default().with_max_effect_iterations(0);
        assert_eq!(config.max_effect_iterations, 1);
    }

    #[test]
    fn zero_caps_from_json_are_clamped() {
        let config = RuntimeConfig::from_json(r#"{ "max_effect_iterations": 0, "max_computed_depth": 0 }"#).unwrap();
        assert_eq!(config.max_effect_iterations, 1);
        assert_eq!(config.max_computed_depth, 1);
        assert_eq!(config.hydration_version, HYDRATION_VERSION);
    }

    #[test]
    fn serialized_config_reads_back() {
        let config = RuntimeConfig::default().with_max_computed_depth(7);
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(RuntimeConfig::from_json(&json).unwrap(), config);
    }
}
