use thiserror::Error;

/// Rejected configuration values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{name} ratio {value} outside legal range [{min}, {max}]")]
    RatioOutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("minimum peak count {value} outside legal range [{min}, {max}]")]
    PeakCountOutOfRange { value: usize, min: usize, max: usize },
    #[error("pump-up pressure {value} mmHg outside legal range [{min}, {max}]")]
    PumpUpOutOfRange { value: f64, min: f64, max: f64 },
    #[error("heart rate bounds [{min}, {max}] bpm are not a valid range")]
    HeartRateBounds { min: f64, max: f64 },
    #[error("sampling rate must be positive and finite, got {0}")]
    InvalidSamplingRate(f64),
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    #[error("{name} must be positive and finite, got {value}")]
    InvalidThreshold { name: &'static str, value: f64 },
}
