use serde::{Deserialize, Serialize};

/// Basic typed time series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeries {
    /// Uniform sampling frequency in Hz
    pub fs: f64,
    /// Samples
    pub data: Vec<f64>,
}

impl TimeSeries {
    pub fn new(fs: f64) -> Self {
        Self {
            fs,
            data: Vec::new(),
        }
    }
    pub fn len(&self) -> usize {
        self.data.len()
    }
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
    pub fn duration(&self) -> f64 {
        self.data.len() as f64 / self.fs
    }
    /// Time in seconds of the sample at `index`.
    pub fn time_of(&self, index: usize) -> f64 {
        index as f64 / self.fs
    }
}

/// A local maximum or minimum of the oscillation signal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extremum {
    pub amplitude: f64,
    /// Sample index within the current measurement cycle.
    pub index: usize,
}

impl Extremum {
    pub fn new(amplitude: f64, index: usize) -> Self {
        Self { amplitude, index }
    }
}

/// One point of the oscillometric waveform envelope.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvelopePoint {
    pub amplitude: f64,
    pub index: usize,
}

/// Fraction of the way `value` lies between `lower` and `upper`.
///
/// Returns 0.0 when the bounds coincide so callers fall back to `lower`.
pub fn interpolation_ratio(lower: f64, upper: f64, value: f64) -> f64 {
    let span = upper - lower;
    if span == 0.0 || !span.is_finite() {
        return 0.0;
    }
    (value - lower) / span
}

pub fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + t * (b - a)
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_is_clamped_for_degenerate_bounds() {
        assert_eq!(interpolation_ratio(5.0, 5.0, 7.0), 0.0);
        assert!((interpolation_ratio(0.0, 10.0, 2.5) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn mean_of_empty_is_zero() {
        assert_eq!(mean(&[]), 0.0);
        assert!((mean(&[60.0, 80.0]) - 70.0).abs() < 1e-12);
    }

    #[test]
    fn duration_follows_sampling_rate() {
        let ts = TimeSeries {
            fs: 1000.0,
            data: vec![0.0; 2500],
        };
        assert!((ts.duration() - 2.5).abs() < 1e-12);
        assert!((ts.time_of(500) - 0.5).abs() < 1e-12);
    }
}
