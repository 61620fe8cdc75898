use crate::{
    config::DetectionConfig,
    signal::{mean, Extremum},
};
use log::debug;
use serde::{Deserialize, Serialize};

/// What a single oscillation sample did to the detector state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeakOutcome {
    /// Not a local maximum, or the detector is still settling.
    NoPeak,
    /// First maximum of a fresh accumulation; nothing to compare against yet.
    Seeded,
    /// A new maximum with a physiological heart rate was appended.
    Appended,
    /// A larger maximum inside the refractory window replaced the last one.
    Replaced,
    /// A smaller maximum inside the refractory window was dropped.
    Discarded,
    /// The inferred heart rate was out of range; history was cleared.
    Reset,
}

impl PeakOutcome {
    /// True when a valid maximum was confirmed and the minima were updated.
    pub fn is_valid_maximum(self) -> bool {
        matches!(self, PeakOutcome::Appended | PeakOutcome::Replaced)
    }
}

/// Real-time maximum/minimum tracker for the oscillation stream.
///
/// Keeps `minima.len() == max(0, maxima.len() - 1)` after every call to
/// [`observe`]. Heart rates are appended for every accepted maximum,
/// replacements included, so the history can run longer than the minima.
///
/// [`observe`]: PeakDetector::observe
#[derive(Debug, Clone)]
pub struct PeakDetector {
    cfg: DetectionConfig,
    refractory: usize,
    settle: usize,
    oscillation: Vec<f64>,
    maxima: Vec<Extremum>,
    minima: Vec<Extremum>,
    heart_rates: Vec<f64>,
    valid_pulses: usize,
}

impl PeakDetector {
    pub fn new(cfg: DetectionConfig) -> Self {
        Self {
            refractory: cfg.refractory_samples(),
            settle: cfg.settle_samples(),
            cfg,
            oscillation: Vec::new(),
            maxima: Vec::new(),
            minima: Vec::new(),
            heart_rates: Vec::new(),
            valid_pulses: 0,
        }
    }

    /// Append one oscillation sample and evaluate the sample before it.
    pub fn observe(&mut self, value: f64) -> PeakOutcome {
        self.oscillation.push(value);
        let n = self.oscillation.len();
        if n <= self.settle || n < 3 {
            return PeakOutcome::NoPeak;
        }
        let (prev, mid, next) = (
            self.oscillation[n - 3],
            self.oscillation[n - 2],
            self.oscillation[n - 1],
        );
        if !(mid > prev && mid >= next && mid > self.cfg.prominence) {
            return PeakOutcome::NoPeak;
        }
        let outcome = self.accept_candidate(Extremum::new(mid, n - 2));
        if outcome.is_valid_maximum() {
            self.find_minima();
        }
        outcome
    }

    fn accept_candidate(&mut self, candidate: Extremum) -> PeakOutcome {
        let Some(&last) = self.maxima.last() else {
            self.maxima.push(candidate);
            return PeakOutcome::Seeded;
        };

        let provisional = if candidate.index - last.index < self.refractory {
            if candidate.amplitude <= last.amplitude {
                self.valid_pulses = self.valid_pulses.saturating_sub(1);
                return PeakOutcome::Discarded;
            }
            if let Some(slot) = self.maxima.last_mut() {
                *slot = candidate;
            }
            PeakOutcome::Replaced
        } else {
            self.maxima.push(candidate);
            PeakOutcome::Appended
        };

        let n = self.maxima.len();
        if n < 2 {
            return PeakOutcome::Seeded;
        }
        let delta = self.maxima[n - 1].index - self.maxima[n - 2].index;
        let heart_rate = 60.0 * self.cfg.sampling_rate_hz / delta as f64;
        if !self.is_heart_rate_valid(heart_rate) {
            debug!(
                "invalid pulse {:.1} bpm after {} valid ones, restarting detection",
                heart_rate, self.valid_pulses
            );
            self.restart_from(candidate);
            return PeakOutcome::Reset;
        }

        // a replacement counts as a fresh reading of the latest interval
        self.heart_rates.push(heart_rate);
        self.valid_pulses += 1;
        provisional
    }

    fn restart_from(&mut self, seed: Extremum) {
        self.valid_pulses = 0;
        self.maxima.clear();
        self.minima.clear();
        self.heart_rates.clear();
        self.maxima.push(seed);
    }

    pub fn is_heart_rate_valid(&self, heart_rate: f64) -> bool {
        self.cfg.min_valid_hr <= heart_rate && heart_rate <= self.cfg.max_valid_hr
    }

    /// Locate the trough between the two latest maxima.
    ///
    /// Overwrites the last minimum when the latest maximum replaced an earlier one.
    pub fn find_minima(&mut self) {
        let n = self.maxima.len();
        if n < 2 {
            return;
        }
        let (start, end) = (self.maxima[n - 2].index, self.maxima[n - 1].index);
        let trough = self.oscillation[start..end]
            .iter()
            .enumerate()
            .fold(None::<Extremum>, |best, (offset, &v)| match best {
                Some(b) if b.amplitude <= v => Some(b),
                _ => Some(Extremum::new(v, start + offset)),
            });
        let Some(trough) = trough else {
            return;
        };
        if self.minima.len() == n - 1 {
            if let Some(last) = self.minima.last_mut() {
                *last = trough;
            }
        } else {
            self.minima.push(trough);
        }
    }

    pub fn maxima(&self) -> &[Extremum] {
        &self.maxima
    }

    pub fn minima(&self) -> &[Extremum] {
        &self.minima
    }

    pub fn heart_rates(&self) -> &[f64] {
        &self.heart_rates
    }

    pub fn oscillation(&self) -> &[f64] {
        &self.oscillation
    }

    pub fn valid_pulse_count(&self) -> usize {
        self.valid_pulses
    }

    /// Last accepted heart rate, 0.0 before the first one.
    pub fn current_heart_rate(&self) -> f64 {
        self.heart_rates.last().copied().unwrap_or(0.0)
    }

    pub fn average_heart_rate(&self) -> f64 {
        mean(&self.heart_rates)
    }

    /// Largest accepted maximum amplitude so far.
    pub fn peak_amplitude(&self) -> Option<f64> {
        self.maxima.iter().map(|m| m.amplitude).reduce(f64::max)
    }

    pub fn reset(&mut self) {
        self.oscillation.clear();
        self.maxima.clear();
        self.minima.clear();
        self.heart_rates.clear();
        self.valid_pulses = 0;
    }
}
