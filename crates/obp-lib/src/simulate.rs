//! Synthetic cuff recordings.
//!
//! The cuff idles at ambient pressure, is pumped up at a constant rate,
//! then bleeds off linearly. Arterial pulses ride on top with an amplitude
//! that peaks at the mean arterial pressure and falls off as a Gaussian.

use crate::{
    config::{AcquisitionConfig, ObpConfig},
    error::ConfigError,
    filters::FilterBank,
    metrics::pressure::BloodPressure,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CuffProfile {
    pub sampling_rate_hz: f64,
    pub ambient_v: f64,
    /// Time at ambient pressure before inflation starts (s).
    pub idle_s: f64,
    pub inflate_rate_mmhg_s: f64,
    pub peak_mmhg: f64,
    pub deflate_rate_mmhg_s: f64,
    /// Time at ambient pressure after the cuff is empty (s).
    pub hold_s: f64,
    pub heart_rate_bpm: f64,
    pub map_mmhg: f64,
    /// Pressure offset from MAP where the pulse amplitude falls to 1/e.
    pub envelope_width_mmhg: f64,
    pub pulse_amplitude_mmhg: f64,
    /// Half-width of uniform transducer noise (V); zero disables it.
    pub noise_v: f64,
    pub seed: u64,
}

impl Default for CuffProfile {
    fn default() -> Self {
        Self {
            sampling_rate_hz: 1000.0,
            ambient_v: 0.71,
            idle_s: 2.0,
            inflate_rate_mmhg_s: 60.0,
            peak_mmhg: 180.0,
            deflate_rate_mmhg_s: 3.0,
            hold_s: 3.0,
            heart_rate_bpm: 75.0,
            map_mmhg: 95.0,
            envelope_width_mmhg: 25.0,
            pulse_amplitude_mmhg: 3.0,
            noise_v: 0.0,
            seed: 42,
        }
    }
}

/// Filtered deflation phase of a simulated recording.
#[derive(Debug, Clone, Default)]
pub struct FilteredDeflation {
    pub pressure: Vec<f64>,
    pub oscillation: Vec<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct CuffSimulation {
    profile: CuffProfile,
}

impl CuffSimulation {
    pub fn new(profile: CuffProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &CuffProfile {
        &self.profile
    }

    fn inflate_end_s(&self) -> f64 {
        let p = &self.profile;
        p.idle_s + p.peak_mmhg / p.inflate_rate_mmhg_s
    }

    fn deflate_end_s(&self) -> f64 {
        self.inflate_end_s() + self.profile.peak_mmhg / self.profile.deflate_rate_mmhg_s
    }

    pub fn duration_s(&self) -> f64 {
        self.deflate_end_s() + self.profile.hold_s
    }

    pub fn len(&self) -> usize {
        (self.duration_s() * self.profile.sampling_rate_hz).round() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Static cuff pressure at `t` seconds, without pulses.
    pub fn cuff_pressure(&self, t: f64) -> f64 {
        let p = &self.profile;
        if t < p.idle_s {
            0.0
        } else if t < self.inflate_end_s() {
            (t - p.idle_s) * p.inflate_rate_mmhg_s
        } else if t < self.deflate_end_s() {
            p.peak_mmhg - (t - self.inflate_end_s()) * p.deflate_rate_mmhg_s
        } else {
            0.0
        }
    }

    /// Pulse amplitude for a cuff pressure.
    pub fn pulse_amplitude(&self, cuff_mmhg: f64) -> f64 {
        let p = &self.profile;
        let x = (cuff_mmhg - p.map_mmhg) / p.envelope_width_mmhg;
        p.pulse_amplitude_mmhg * (-x * x).exp()
    }

    /// Cuff pressure including arterial pulses, in mmHg.
    pub fn mmhg(&self) -> Vec<f64> {
        let p = &self.profile;
        let omega = 2.0 * PI * p.heart_rate_bpm / 60.0;
        (0..self.len())
            .map(|i| {
                let t = i as f64 / p.sampling_rate_hz;
                let cuff = self.cuff_pressure(t);
                cuff + self.pulse_amplitude(cuff) * (omega * t).sin()
            })
            .collect()
    }

    /// Transducer voltages as a device would deliver them.
    pub fn voltages(&self, acq: &AcquisitionConfig) -> Vec<f64> {
        let p = &self.profile;
        let mut rng = StdRng::seed_from_u64(p.seed);
        self.mmhg()
            .into_iter()
            .map(|mmhg| {
                let noise = if p.noise_v > 0.0 {
                    rng.gen_range(-p.noise_v..=p.noise_v)
                } else {
                    0.0
                };
                acq.to_volts(mmhg, p.ambient_v) + noise
            })
            .collect()
    }

    /// Split the whole recording through the configured filters and keep
    /// the part from the top of the inflation onwards.
    pub fn filtered_deflation(&self, cfg: &ObpConfig) -> Result<FilteredDeflation, ConfigError> {
        let mut bank = FilterBank::new(&cfg.filter, self.profile.sampling_rate_hz)?;
        let start = (self.inflate_end_s() * self.profile.sampling_rate_hz).round() as usize;
        let stop = (self.deflate_end_s() * self.profile.sampling_rate_hz).round() as usize;
        let mut out = FilteredDeflation::default();
        for (i, x) in self.mmhg().into_iter().enumerate() {
            let (pressure, oscillation) = bank.split(x);
            if (start..stop).contains(&i) {
                out.pressure.push(pressure);
                out.oscillation.push(oscillation);
            }
        }
        Ok(out)
    }

    /// Pressures where the pulse amplitude crosses the given ratios of its maximum.
    pub fn expected(&self, ratio_sbp: f64, ratio_dbp: f64) -> BloodPressure {
        let p = &self.profile;
        let offset = |ratio: f64| p.envelope_width_mmhg * (-ratio.ln()).sqrt();
        BloodPressure {
            map: Some(p.map_mmhg),
            sbp: Some(p.map_mmhg + offset(ratio_sbp)),
            dbp: Some(p.map_mmhg - offset(ratio_dbp)),
        }
    }
}
