//! Simulation configuration.
//!
//! This crate owns only the `SimulationConfig` type and its validation; the
//! external config *source* (file watching, CLI flags, a settings UI) is
//! someone else's problem. `load_file` is provided as a thin convenience for
//! tests and embedding binaries (read-to-string + `toml::from_str`, wrapped
//! in `anyhow::Context`).

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::error::ConfigError;

/// Keyed configuration record. `deny_unknown_fields` rejects unknown keys
/// at parse time; missing
/// required keys surface as `serde`'s own "missing field" parse error,
/// which this module reports as [`ConfigError::Parse`].
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationConfig {
    pub num_nodes: usize,
    pub world_size: (f64, f64),
    pub comm_range: f64,
    pub hello_period_s: f64,
    pub dv_period_s: f64,
    pub app_send_period_s: f64,
    pub neighbor_timeout_s: f64,
    pub mobility_step_s: f64,
    pub speed_mps: (f64, f64),
    pub waypoint_pause_s: (f64, f64),
    pub mac_min_backoff_s: f64,
    pub mac_max_backoff_s: f64,
    pub mac_tx_duration_s: f64,
    pub sim_time_s: f64,
    pub seed: u64,
    pub log_dv_changes: bool,
}

impl SimulationConfig {
    /// Parse a TOML document into a config and validate it. Invalid config
    /// fails here with a descriptive error kind; no simulation ever runs
    /// on bad input.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: SimulationConfig =
            toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a config from a TOML file on disk.
    pub fn load_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("invalid config in {}", path.display()))
    }

    fn check_period(field: &'static str, value: f64) -> Result<(), ConfigError> {
        if value > 0.0 {
            Ok(())
        } else {
            Err(ConfigError::NonPositivePeriod { field, value })
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_nodes < 1 {
            return Err(ConfigError::ZeroNodes);
        }
        if self.world_size.0 <= 0.0 || self.world_size.1 <= 0.0 {
            return Err(ConfigError::InvalidWorldSize);
        }
        if self.comm_range <= 0.0 {
            return Err(ConfigError::InvalidCommRange);
        }
        Self::check_period("hello_period_s", self.hello_period_s)?;
        Self::check_period("dv_period_s", self.dv_period_s)?;
        Self::check_period("app_send_period_s", self.app_send_period_s)?;
        Self::check_period("neighbor_timeout_s", self.neighbor_timeout_s)?;
        Self::check_period("mobility_step_s", self.mobility_step_s)?;
        Self::check_period("sim_time_s", self.sim_time_s)?;

        let (v_min, v_max) = self.speed_mps;
        if v_min > v_max || v_min < 0.0 {
            return Err(ConfigError::InvalidSpeedRange { v_min, v_max });
        }
        let (p_min, p_max) = self.waypoint_pause_s;
        if p_min > p_max || p_min < 0.0 {
            return Err(ConfigError::InvalidPauseRange { p_min, p_max });
        }
        if self.mac_min_backoff_s > self.mac_max_backoff_s || self.mac_min_backoff_s < 0.0 {
            return Err(ConfigError::InvalidBackoffRange {
                min: self.mac_min_backoff_s,
                max: self.mac_max_backoff_s,
            });
        }
        if self.mac_tx_duration_s < 0.0 {
            return Err(ConfigError::NonPositivePeriod {
                field: "mac_tx_duration_s",
                value: self.mac_tx_duration_s,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_toml() -> &'static str {
        r#"
        num_nodes = 2
        world_size = [200.0, 200.0]
        comm_range = 120.0
        hello_period_s = 1.0
        dv_period_s = 2.0
        app_send_period_s = 5.0
        neighbor_timeout_s = 4.0
        mobility_step_s = 0.5
        speed_mps = [0.0, 0.0]
        waypoint_pause_s = [1.0, 3.0]
        mac_min_backoff_s = 0.01
        mac_max_backoff_s = 0.05
        mac_tx_duration_s = 0.02
        sim_time_s = 30.0
        seed = 42
        log_dv_changes = false
        "#
    }

    #[test]
    fn parses_and_validates_a_well_formed_config() {
        let cfg = SimulationConfig::from_toml_str(valid_toml()).unwrap();
        assert_eq!(cfg.num_nodes, 2);
        assert_eq!(cfg.seed, 42);
    }

    #[test]
    fn rejects_unknown_keys() {
        let text = format!("{}\nbogus_key = 1\n", valid_toml());
        assert!(SimulationConfig::from_toml_str(&text).is_err());
    }

    #[test]
    fn rejects_inverted_speed_range() {
        let text = valid_toml().replace("speed_mps = [0.0, 0.0]", "speed_mps = [5.0, 1.0]");
        let err = SimulationConfig::from_toml_str(&text).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSpeedRange { .. }));
    }

    #[test]
    fn rejects_zero_nodes() {
        let text = valid_toml().replace("num_nodes = 2", "num_nodes = 0");
        let err = SimulationConfig::from_toml_str(&text).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroNodes));
    }
}
