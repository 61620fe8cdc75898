//! Oscillometric blood pressure detection over one deflation.
//!
//! [`Oscillometer`] consumes one (pressure, oscillation) pair at a time. It
//! tracks pulse maxima and the troughs between them, decides when the cuff
//! has deflated far enough, and then derives MAP, SBP and DBP from the
//! oscillation envelope.

use crate::{
    config::{DetectionConfig, Settings},
    detectors::peaks::{PeakDetector, PeakOutcome},
    metrics::{
        envelope::{build_envelope, Envelope},
        pressure::{estimate_pressures, half_beat_window, BloodPressure, PressureEstimate},
    },
};
use log::{info, warn};
use serde::{Deserialize, Serialize};

/// Everything a finished detection produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OscillometerSummary {
    pub pressures: BloodPressure,
    pub average_heart_rate: f64,
    pub current_heart_rate: f64,
    pub peaks: usize,
    pub samples: usize,
    pub estimate: Option<PressureEstimate>,
}

#[derive(Debug, Clone)]
pub struct Oscillometer {
    cfg: DetectionConfig,
    settings: Settings,
    pressure: Vec<f64>,
    detector: PeakDetector,
    envelope: Envelope,
    estimate: Option<PressureEstimate>,
    enough_data: bool,
}

impl Oscillometer {
    pub fn new(cfg: DetectionConfig, settings: Settings) -> Self {
        Self {
            cfg,
            settings,
            pressure: Vec::new(),
            detector: PeakDetector::new(cfg),
            envelope: Envelope::default(),
            estimate: None,
            enough_data: false,
        }
    }

    /// Replace the settings used for the next detection.
    pub fn apply_settings(&mut self, settings: Settings) {
        self.settings = settings;
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Feed one filtered sample pair. Returns true when a new valid maximum was found.
    pub fn process_sample(&mut self, pressure: f64, oscillation: f64) -> bool {
        self.pressure.push(pressure);
        let outcome = self.detector.observe(oscillation);
        if outcome == PeakOutcome::Reset {
            self.enough_data = false;
        }
        if !outcome.is_valid_maximum() {
            return false;
        }
        if !self.enough_data && self.deflated_enough() {
            info!(
                "enough pulses recorded: {} maxima, last amplitude {:.3}",
                self.detector.maxima().len(),
                self.detector.maxima().last().map_or(0.0, |m| m.amplitude)
            );
            self.enough_data = true;
        }
        true
    }

    /// The pulses have decayed below the DBP ratio minus hysteresis of the
    /// strongest one, after at least the configured number of maxima.
    fn deflated_enough(&self) -> bool {
        let maxima = self.detector.maxima();
        if maxima.len() < self.settings.min_nbr_peaks {
            return false;
        }
        let (Some(peak), Some(last)) = (self.detector.peak_amplitude(), maxima.last()) else {
            return false;
        };
        let cutoff = peak * (self.settings.ratio_dbp - self.cfg.cutoff_hysteresis);
        last.amplitude < cutoff
    }

    pub fn is_enough_data(&self) -> bool {
        self.enough_data
    }

    /// Build the envelope and resolve the pressures from everything seen so far.
    pub fn estimate(&mut self) -> BloodPressure {
        self.envelope = build_envelope(self.detector.maxima(), self.detector.minima());
        let half = half_beat_window(self.average_heart_rate(), self.cfg.sampling_rate_hz);
        self.estimate = estimate_pressures(
            &self.envelope,
            &self.pressure,
            half,
            self.settings.ratio_sbp,
            self.settings.ratio_dbp,
        );
        match &self.estimate {
            Some(est) => {
                info!(
                    "MAP {:?} SBP {:?} DBP {:?} mmHg at {:.1} bpm",
                    est.pressures.map,
                    est.pressures.sbp,
                    est.pressures.dbp,
                    self.average_heart_rate()
                );
                est.pressures
            }
            None => {
                warn!(
                    "no envelope could be built from {} maxima",
                    self.detector.maxima().len()
                );
                BloodPressure::default()
            }
        }
    }

    pub fn result(&self) -> BloodPressure {
        self.estimate.map(|e| e.pressures).unwrap_or_default()
    }

    pub fn map(&self) -> Option<f64> {
        self.result().map
    }

    pub fn sbp(&self) -> Option<f64> {
        self.result().sbp
    }

    pub fn dbp(&self) -> Option<f64> {
        self.result().dbp
    }

    pub fn current_heart_rate(&self) -> f64 {
        self.detector.current_heart_rate()
    }

    pub fn average_heart_rate(&self) -> f64 {
        self.detector.average_heart_rate()
    }

    pub fn detector(&self) -> &PeakDetector {
        &self.detector
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn pressure(&self) -> &[f64] {
        &self.pressure
    }

    pub fn summary(&self) -> OscillometerSummary {
        OscillometerSummary {
            pressures: self.result(),
            average_heart_rate: self.average_heart_rate(),
            current_heart_rate: self.current_heart_rate(),
            peaks: self.detector.maxima().len(),
            samples: self.pressure.len(),
            estimate: self.estimate,
        }
    }

    /// Drop all buffers and results; configuration is kept.
    pub fn reset(&mut self) {
        self.pressure.clear();
        self.detector.reset();
        self.envelope = Envelope::default();
        self.estimate = None;
        self.enough_data = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    const FS: f64 = 1000.0;

    /// Filtered-domain deflation: pressure falls 3 mmHg/s from 180, the pulse
    /// amplitude follows a bell centred on 95 mmHg.
    fn deflation(period: usize, seconds: f64) -> Vec<(f64, f64)> {
        let n = (seconds * FS) as usize;
        (0..n)
            .map(|i| {
                let t = i as f64 / FS;
                let p = 180.0 - 3.0 * t;
                let amp = 1.5 * (-((p - 95.0) / 25.0).powi(2)).exp();
                (p, amp * (2.0 * PI * i as f64 / period as f64).sin())
            })
            .collect()
    }

    fn run_until_enough(osc: &mut Oscillometer, samples: &[(f64, f64)]) -> usize {
        for (i, &(p, o)) in samples.iter().enumerate() {
            osc.process_sample(p, o);
            if osc.is_enough_data() {
                return i;
            }
        }
        samples.len()
    }

    #[test]
    fn heart_rate_converges_to_pulse_period() {
        let mut osc = Oscillometer::new(DetectionConfig::default(), Settings::default());
        let samples = deflation(800, 50.0);
        let stop = run_until_enough(&mut osc, &samples);
        assert!(stop < samples.len(), "deflation never completed");
        assert!((osc.average_heart_rate() - 75.0).abs() < 0.5);
        assert!((osc.current_heart_rate() - 75.0).abs() < 1.0);
    }

    #[test]
    fn estimate_orders_pressures() {
        let mut osc = Oscillometer::new(DetectionConfig::default(), Settings::default());
        let samples = deflation(800, 50.0);
        run_until_enough(&mut osc, &samples);
        let bp = osc.estimate();
        assert!(bp.is_complete(), "{:?}", bp);
        let (map, sbp, dbp) = (bp.map.unwrap(), bp.sbp.unwrap(), bp.dbp.unwrap());
        assert!(sbp > map && map > dbp, "{} {} {}", sbp, map, dbp);
        assert!((map - 95.0).abs() < 3.0, "map {}", map);
        assert!((sbp - 113.7).abs() < 4.0, "sbp {}", sbp);
        assert!((dbp - 81.6).abs() < 4.0, "dbp {}", dbp);
        assert_eq!(osc.envelope().len() % 2, 0);
    }

    #[test]
    fn reset_then_replay_matches_fresh_instance() {
        let samples = deflation(780, 50.0);
        let mut reused = Oscillometer::new(DetectionConfig::default(), Settings::default());
        run_until_enough(&mut reused, &deflation(700, 20.0));
        reused.reset();
        run_until_enough(&mut reused, &samples);
        let a = reused.estimate();

        let mut fresh = Oscillometer::new(DetectionConfig::default(), Settings::default());
        run_until_enough(&mut fresh, &samples);
        let b = fresh.estimate();
        assert_eq!(a, b);
        assert_eq!(reused.average_heart_rate(), fresh.average_heart_rate());
    }

    #[test]
    fn results_are_unset_before_estimation() {
        let osc = Oscillometer::new(DetectionConfig::default(), Settings::default());
        assert_eq!(osc.result(), BloodPressure::default());
        assert_eq!(osc.average_heart_rate(), 0.0);
        assert!(!osc.is_enough_data());
    }
}
