//! Error taxonomy. Configuration problems are structured and fatal at build
//! time; everything else classified as a "drop" (no route, TTL exhausted,
//! loop detected, MAC backoff exhausted, duplicate control message) is not
//! an error at all, just a metric.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("num_nodes must be >= 1")]
    ZeroNodes,
    #[error("world_size must have positive width and height")]
    InvalidWorldSize,
    #[error("comm_range must be > 0")]
    InvalidCommRange,
    #[error("speed_mps range is invalid: v_min ({v_min}) > v_max ({v_max})")]
    InvalidSpeedRange { v_min: f64, v_max: f64 },
    #[error("waypoint_pause_s range is invalid: p_min ({p_min}) > p_max ({p_max})")]
    InvalidPauseRange { p_min: f64, p_max: f64 },
    #[error("mac backoff range is invalid: min ({min}) > max ({max})")]
    InvalidBackoffRange { min: f64, max: f64 },
    #[error("{field} must be > 0, got {value}")]
    NonPositivePeriod { field: &'static str, value: f64 },
    #[error("failed to parse configuration: {0}")]
    Parse(String),
}
