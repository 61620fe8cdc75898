//! Oscillometric blood pressure measurement.
//!
//! Raw cuff transducer voltages are calibrated against ambient pressure,
//! split into a pressure trend and pulse oscillations, and reduced to mean
//! arterial, systolic and diastolic pressure plus heart rate.

pub mod acquisition;
pub mod config;
pub mod detectors;
pub mod error;
pub mod filters;
pub mod io;
pub mod metrics;
pub mod pipeline;
pub mod signal;
pub mod simulate;

pub use config::{ObpConfig, Settings, SharedSettings};
pub use error::ConfigError;
pub use metrics::pressure::BloodPressure;
pub use pipeline::Oscillometer;
pub use signal::*;
