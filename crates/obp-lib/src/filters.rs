//! Causal Butterworth filters evaluated one sample at a time.
//!
//! The cuff signal is split by two cascaded stages: a low-pass that keeps the
//! slow cuff pressure trend and a high-pass, fed by the low-pass output, that
//! keeps the pulse oscillations riding on top of it.

use crate::{config::FilterConfig, error::ConfigError};
use std::f64::consts::PI;

pub const MAX_ORDER: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    LowPass,
    HighPass,
}

/// Second order section in transposed direct form II.
#[derive(Debug, Clone, Copy)]
struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    z1: f64,
    z2: f64,
}

impl Biquad {
    fn second_order(kind: FilterKind, w0: f64, q: f64) -> Self {
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / (2.0 * q);
        let a0 = 1.0 + alpha;
        let (b0, b1, b2) = match kind {
            FilterKind::LowPass => ((1.0 - cos_w0) / 2.0, 1.0 - cos_w0, (1.0 - cos_w0) / 2.0),
            FilterKind::HighPass => ((1.0 + cos_w0) / 2.0, -(1.0 + cos_w0), (1.0 + cos_w0) / 2.0),
        };
        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: -2.0 * cos_w0 / a0,
            a2: (1.0 - alpha) / a0,
            z1: 0.0,
            z2: 0.0,
        }
    }

    fn first_order(kind: FilterKind, w0: f64) -> Self {
        let k = (w0 / 2.0).tan();
        let norm = 1.0 / (1.0 + k);
        let (b0, b1) = match kind {
            FilterKind::LowPass => (k * norm, k * norm),
            FilterKind::HighPass => (norm, -norm),
        };
        Self {
            b0,
            b1,
            b2: 0.0,
            a1: (k - 1.0) * norm,
            a2: 0.0,
            z1: 0.0,
            z2: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, x: f64) -> f64 {
        let y = self.b0 * x + self.z1;
        self.z1 = self.b1 * x - self.a1 * y + self.z2;
        self.z2 = self.b2 * x - self.a2 * y;
        y
    }

    fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }
}

/// Butterworth low/high-pass of fixed order built from cascaded sections.
#[derive(Debug, Clone)]
pub struct Butterworth {
    kind: FilterKind,
    order: usize,
    cutoff_hz: f64,
    sections: Vec<Biquad>,
}

impl Butterworth {
    pub fn new(kind: FilterKind, order: usize, fs: f64, cutoff_hz: f64) -> Result<Self, ConfigError> {
        if !(fs > 0.0 && fs.is_finite()) {
            return Err(ConfigError::InvalidSamplingRate(fs));
        }
        if order == 0 || order > MAX_ORDER {
            return Err(ConfigError::InvalidFilter(format!(
                "order {} outside 1..={}",
                order, MAX_ORDER
            )));
        }
        if !(cutoff_hz > 0.0 && cutoff_hz < fs / 2.0) {
            return Err(ConfigError::InvalidFilter(format!(
                "cutoff {} Hz must lie in (0, {})",
                cutoff_hz,
                fs / 2.0
            )));
        }
        let w0 = 2.0 * PI * cutoff_hz / fs;
        let mut sections = Vec::with_capacity(order / 2 + 1);
        if order % 2 == 1 {
            sections.push(Biquad::first_order(kind, w0));
            for k in 1..=order / 2 {
                let phi = PI * k as f64 / order as f64;
                sections.push(Biquad::second_order(kind, w0, 1.0 / (2.0 * phi.cos())));
            }
        } else {
            for k in 0..order / 2 {
                let phi = PI * (2 * k + 1) as f64 / (2 * order) as f64;
                sections.push(Biquad::second_order(kind, w0, 1.0 / (2.0 * phi.cos())));
            }
        }
        Ok(Self {
            kind,
            order,
            cutoff_hz,
            sections,
        })
    }

    pub fn lowpass(order: usize, fs: f64, cutoff_hz: f64) -> Result<Self, ConfigError> {
        Self::new(FilterKind::LowPass, order, fs, cutoff_hz)
    }

    pub fn highpass(order: usize, fs: f64, cutoff_hz: f64) -> Result<Self, ConfigError> {
        Self::new(FilterKind::HighPass, order, fs, cutoff_hz)
    }

    /// Filter one sample. No allocation, constant time.
    #[inline]
    pub fn filter(&mut self, x: f64) -> f64 {
        self.sections.iter_mut().fold(x, |acc, s| s.process(acc))
    }

    pub fn reset(&mut self) {
        self.sections.iter_mut().for_each(Biquad::reset);
    }

    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn cutoff_hz(&self) -> f64 {
        self.cutoff_hz
    }
}

/// The low-pass → high-pass split producing (pressure, oscillation).
#[derive(Debug, Clone)]
pub struct FilterBank {
    lowpass: Butterworth,
    highpass: Butterworth,
}

impl FilterBank {
    pub fn new(cfg: &FilterConfig, fs: f64) -> Result<Self, ConfigError> {
        Ok(Self {
            lowpass: Butterworth::lowpass(cfg.order, fs, cfg.lowpass_hz)?,
            highpass: Butterworth::highpass(cfg.order, fs, cfg.highpass_hz)?,
        })
    }

    /// Returns the pressure trend and the oscillation component of `x`.
    #[inline]
    pub fn split(&mut self, x: f64) -> (f64, f64) {
        let pressure = self.lowpass.filter(x);
        let oscillation = self.highpass.filter(pressure);
        (pressure, oscillation)
    }

    pub fn reset(&mut self) {
        self.lowpass.reset();
        self.highpass.reset();
    }
}
