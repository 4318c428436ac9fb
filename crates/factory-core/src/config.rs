//! Simulation configuration (§4.12, §3 "Configuration").
//!
//! This is the schema the simulation *itself* owns: tunables that change how
//! the kernel behaves. A richer operator-facing configuration service
//! (credentials, deployment topology, ...) is an external collaborator and
//! out of scope here.

use crate::error::ConfigError;
use crate::registry::Registry;
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_line_count() -> u32 {
    3
}
fn default_agv_speed() -> f64 {
    2.0
}
fn default_kpi_interval() -> f64 {
    10.0
}
fn default_debounce_ms() -> u64 {
    500
}

/// Top-level, `serde`-deserializable simulation configuration, loaded from
/// YAML by the CLI (§4.13) or constructed directly in tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SimConfig {
    /// Overrides the `TOPIC_ROOT` environment/username fallback chain (§6.5).
    pub topic_root: Option<String>,
    pub line_count: u32,
    /// Deterministic runs when set; otherwise entropy is drawn from the OS.
    pub rng_seed: Option<u64>,
    pub agv_speed_mps: f64,
    pub kpi_snapshot_interval_s: f64,
    pub snapshot_debounce_ms: u64,
    /// Scheduler stop condition, in simulated seconds. `None` runs until
    /// externally stopped.
    pub end_time_s: Option<f64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            topic_root: None,
            line_count: default_line_count(),
            rng_seed: None,
            agv_speed_mps: default_agv_speed(),
            kpi_snapshot_interval_s: default_kpi_interval(),
            snapshot_debounce_ms: default_debounce_ms(),
            end_time_s: None,
        }
    }
}

impl SimConfig {
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: SimConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.line_count == 0 || self.line_count > 3 {
            return Err(ConfigError::Invalid(format!(
                "line_count must be in 1..=3, got {}",
                self.line_count
            )));
        }
        if self.agv_speed_mps <= 0.0 {
            return Err(ConfigError::Invalid(
                "agv_speed_mps must be positive".to_string(),
            ));
        }
        if self.kpi_snapshot_interval_s <= 0.0 {
            return Err(ConfigError::Invalid(
                "kpi_snapshot_interval_s must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the topic root per the §6.5 fallback chain: explicit config,
    /// then `TOPIC_ROOT`, then `USERNAME`/`USER`, then `"NLDF_TEST"`.
    pub fn resolve_topic_root(&self) -> String {
        if let Some(root) = &self.topic_root {
            return root.clone();
        }
        std::env::var("TOPIC_ROOT")
            .or_else(|_| std::env::var("USERNAME"))
            .or_else(|_| std::env::var("USER"))
            .unwrap_or_else(|_| "NLDF_TEST".to_string())
    }

    pub fn to_registry(&self) -> Registry {
        Registry {
            agv_speed_mps: self.agv_speed_mps,
            ..Registry::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(SimConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_unknown_fields() {
        let yaml = "line_count: 3\nbogus_field: 1\n";
        let result: Result<SimConfig, _> = serde_yaml::from_str(yaml);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_out_of_range_line_count() {
        let mut cfg = SimConfig::default();
        cfg.line_count = 9;
        assert!(cfg.validate().is_err());
    }
}
