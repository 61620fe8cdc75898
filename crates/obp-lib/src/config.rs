use crate::error::ConfigError;
use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

pub const RATIO_MIN: f64 = 0.1;
pub const RATIO_MAX: f64 = 0.9;
pub const NBR_PEAKS_MIN: usize = 5;
pub const NBR_PEAKS_MAX: usize = 30;
pub const PUMP_UP_VALUE_MIN: f64 = 100.0;
pub const PUMP_UP_VALUE_MAX: f64 = 250.0;

/// User-facing measurement settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Fraction of the peak envelope amplitude marking the systolic crossing.
    pub ratio_sbp: f64,
    /// Fraction of the peak envelope amplitude marking the diastolic crossing.
    pub ratio_dbp: f64,
    /// Accepted maxima required before the deflation can end.
    pub min_nbr_peaks: usize,
    /// Cuff pressure (mmHg) that ends the inflation phase.
    pub pump_up_mmhg: f64,
}

impl Default for Settings {
    fn default() -> Self {
        // Ratios from the oscillometric literature.
        Self {
            ratio_sbp: 0.57,
            ratio_dbp: 0.75,
            min_nbr_peaks: 10,
            pump_up_mmhg: 160.0,
        }
    }
}

fn check_ratio(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if (RATIO_MIN..=RATIO_MAX).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::RatioOutOfRange {
            name,
            value,
            min: RATIO_MIN,
            max: RATIO_MAX,
        })
    }
}

fn check_peaks(value: usize) -> Result<(), ConfigError> {
    if (NBR_PEAKS_MIN..=NBR_PEAKS_MAX).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::PeakCountOutOfRange {
            value,
            min: NBR_PEAKS_MIN,
            max: NBR_PEAKS_MAX,
        })
    }
}

fn check_pump_up(value: f64) -> Result<(), ConfigError> {
    if (PUMP_UP_VALUE_MIN..=PUMP_UP_VALUE_MAX).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::PumpUpOutOfRange {
            value,
            min: PUMP_UP_VALUE_MIN,
            max: PUMP_UP_VALUE_MAX,
        })
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_ratio("SBP", self.ratio_sbp)?;
        check_ratio("DBP", self.ratio_dbp)?;
        check_peaks(self.min_nbr_peaks)?;
        check_pump_up(self.pump_up_mmhg)
    }

    /// Values outside the legal range are ignored. Returns whether the value was taken.
    pub fn set_ratio_sbp(&mut self, value: f64) -> bool {
        Self::apply(check_ratio("SBP", value), &mut self.ratio_sbp, value)
    }

    pub fn set_ratio_dbp(&mut self, value: f64) -> bool {
        Self::apply(check_ratio("DBP", value), &mut self.ratio_dbp, value)
    }

    pub fn set_min_nbr_peaks(&mut self, value: usize) -> bool {
        Self::apply(check_peaks(value), &mut self.min_nbr_peaks, value)
    }

    pub fn set_pump_up_mmhg(&mut self, value: f64) -> bool {
        Self::apply(check_pump_up(value), &mut self.pump_up_mmhg, value)
    }

    fn apply<T>(check: Result<(), ConfigError>, slot: &mut T, value: T) -> bool {
        match check {
            Ok(()) => {
                *slot = value;
                true
            }
            Err(err) => {
                debug!("setting rejected: {}", err);
                false
            }
        }
    }
}

/// Tuning of the peak detector and the deflation stop rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub sampling_rate_hz: f64,
    /// Lowest heart rate (bpm) accepted as physiological.
    pub min_valid_hr: f64,
    /// Highest heart rate (bpm) accepted as physiological.
    pub max_valid_hr: f64,
    /// Minimum oscillation amplitude (mmHg) of a maximum.
    pub prominence: f64,
    /// Refractory window after an accepted maximum (ms).
    pub min_peak_time_ms: f64,
    /// Oscillation samples are ignored for this long after the cycle starts (ms).
    pub settle_time_ms: f64,
    /// Margin below the DBP ratio the pulses must fall to end the deflation.
    pub cutoff_hysteresis: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            sampling_rate_hz: 1000.0,
            min_valid_hr: 50.0,
            max_valid_hr: 100.0,
            prominence: 0.1,
            min_peak_time_ms: 300.0,
            settle_time_ms: 1200.0,
            cutoff_hysteresis: 0.2,
        }
    }
}

impl DetectionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.sampling_rate_hz > 0.0 && self.sampling_rate_hz.is_finite()) {
            return Err(ConfigError::InvalidSamplingRate(self.sampling_rate_hz));
        }
        if !(self.min_valid_hr > 0.0 && self.min_valid_hr < self.max_valid_hr) {
            return Err(ConfigError::HeartRateBounds {
                min: self.min_valid_hr,
                max: self.max_valid_hr,
            });
        }
        if !(self.prominence >= 0.0 && self.prominence.is_finite()) {
            return Err(ConfigError::InvalidThreshold {
                name: "prominence",
                value: self.prominence,
            });
        }
        if !(self.min_peak_time_ms >= 0.0 && self.min_peak_time_ms.is_finite()) {
            return Err(ConfigError::InvalidThreshold {
                name: "min_peak_time_ms",
                value: self.min_peak_time_ms,
            });
        }
        Ok(())
    }

    pub fn ms_to_samples(&self, ms: f64) -> usize {
        (ms * self.sampling_rate_hz / 1000.0).round().max(0.0) as usize
    }

    pub fn refractory_samples(&self) -> usize {
        self.ms_to_samples(self.min_peak_time_ms)
    }

    pub fn settle_samples(&self) -> usize {
        self.ms_to_samples(self.settle_time_ms)
    }
}

/// Cutoffs of the pressure/oscillation split.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub lowpass_hz: f64,
    pub highpass_hz: f64,
    pub order: usize,
    /// Zero both filters when a new measurement starts instead of running on.
    pub reset_on_start: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            lowpass_hz: 10.0,
            highpass_hz: 0.5,
            order: 6,
            reset_on_start: false,
        }
    }
}

/// Calibration, conversion and safety limits of the acquisition cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub calibration_window_ms: f64,
    /// Largest allowed spread (V) between the window maximum and its mean.
    pub calibration_tolerance_v: f64,
    pub max_calibration_attempts: u32,
    pub mmhg_per_kpa: f64,
    /// Sensor sensitivity (20 mV per kPa).
    pub kpa_per_volt: f64,
    pub correction_factor: f64,
    /// Deflation is aborted below this pressure.
    pub safety_floor_mmhg: f64,
    /// The cuff counts as empty below this pressure.
    pub empty_threshold_mmhg: f64,
    pub max_recording_s: f64,
    pub poll_interval_ms: u64,
    pub event_capacity: usize,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            calibration_window_ms: 500.0,
            calibration_tolerance_v: 0.002,
            max_calibration_attempts: 50,
            mmhg_per_kpa: 7.500_615_758_456_6,
            kpa_per_volt: 50.0,
            correction_factor: 2.5,
            safety_floor_mmhg: 20.0,
            empty_threshold_mmhg: 5.0,
            max_recording_s: 120.0,
            poll_interval_ms: 1,
            event_capacity: 4096,
        }
    }
}

impl AcquisitionConfig {
    pub fn mmhg_per_volt(&self) -> f64 {
        self.mmhg_per_kpa * self.kpa_per_volt * self.correction_factor
    }

    pub fn to_mmhg(&self, volts: f64, ambient_v: f64) -> f64 {
        (volts - ambient_v) * self.mmhg_per_volt()
    }

    pub fn to_volts(&self, mmhg: f64, ambient_v: f64) -> f64 {
        mmhg / self.mmhg_per_volt() + ambient_v
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("calibration_window_ms", self.calibration_window_ms),
            ("calibration_tolerance_v", self.calibration_tolerance_v),
            ("mmhg_per_kpa", self.mmhg_per_kpa),
            ("kpa_per_volt", self.kpa_per_volt),
            ("correction_factor", self.correction_factor),
            ("max_recording_s", self.max_recording_s),
        ];
        for (name, value) in positive {
            if !(value > 0.0 && value.is_finite()) {
                return Err(ConfigError::InvalidThreshold { name, value });
            }
        }
        if self.empty_threshold_mmhg >= self.safety_floor_mmhg {
            return Err(ConfigError::InvalidThreshold {
                name: "empty_threshold_mmhg",
                value: self.empty_threshold_mmhg,
            });
        }
        Ok(())
    }
}

/// Complete configuration as stored in a TOML file.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObpConfig {
    pub detection: DetectionConfig,
    pub filter: FilterConfig,
    pub acquisition: AcquisitionConfig,
    pub settings: Settings,
}

impl ObpConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let cfg: ObpConfig = toml::from_str(text).context("parsing configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.detection.validate()?;
        self.acquisition.validate()?;
        self.settings.validate()?;
        if self.filter.highpass_hz >= self.filter.lowpass_hz {
            return Err(ConfigError::InvalidFilter(format!(
                "high-pass cutoff {} Hz must lie below low-pass cutoff {} Hz",
                self.filter.highpass_hz, self.filter.lowpass_hz
            )));
        }
        Ok(())
    }

    pub fn sampling_rate_hz(&self) -> f64 {
        self.detection.sampling_rate_hz
    }
}

/// Settings shared between a control thread and the acquisition worker.
///
/// Writes are refused while a measurement is running; the worker copies a
/// snapshot when a cycle starts.
#[derive(Debug, Clone)]
pub struct SharedSettings {
    inner: Arc<RwLock<Settings>>,
    measuring: Arc<AtomicBool>,
}

impl SharedSettings {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
            measuring: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn snapshot(&self) -> Settings {
        match self.inner.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn is_measuring(&self) -> bool {
        self.measuring.load(Ordering::Acquire)
    }

    pub(crate) fn set_measuring(&self, measuring: bool) {
        self.measuring.store(measuring, Ordering::Release);
    }

    /// Lock the settings for a new cycle and return the values it runs with.
    ///
    /// The flag is raised under the write lock, so a setter either lands in
    /// the returned snapshot or is refused.
    pub(crate) fn begin_measurement(&self) -> Settings {
        let guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.measuring.store(true, Ordering::Release);
        *guard
    }

    pub fn ratio_sbp(&self) -> f64 {
        self.snapshot().ratio_sbp
    }

    pub fn ratio_dbp(&self) -> f64 {
        self.snapshot().ratio_dbp
    }

    pub fn min_nbr_peaks(&self) -> usize {
        self.snapshot().min_nbr_peaks
    }

    pub fn pump_up_mmhg(&self) -> f64 {
        self.snapshot().pump_up_mmhg
    }

    pub fn set_ratio_sbp(&self, value: f64) -> bool {
        self.update(|s| s.set_ratio_sbp(value))
    }

    pub fn set_ratio_dbp(&self, value: f64) -> bool {
        self.update(|s| s.set_ratio_dbp(value))
    }

    pub fn set_min_nbr_peaks(&self, value: usize) -> bool {
        self.update(|s| s.set_min_nbr_peaks(value))
    }

    pub fn set_pump_up_mmhg(&self, value: f64) -> bool {
        self.update(|s| s.set_pump_up_mmhg(value))
    }

    pub fn reset_to_defaults(&self) -> bool {
        self.update(|s| {
            *s = Settings::default();
            true
        })
    }

    fn update(&self, f: impl FnOnce(&mut Settings) -> bool) -> bool {
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if self.is_measuring() {
            debug!("settings are locked while a measurement is running");
            return false;
        }
        f(&mut guard)
    }
}

impl Default for SharedSettings {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_setters_keep_prior_value_when_out_of_range() {
        let mut s = Settings::default();
        assert!(!s.set_ratio_sbp(0.0));
        assert!(!s.set_ratio_sbp(1.0));
        assert!(!s.set_ratio_dbp(-0.3));
        assert!(!s.set_ratio_dbp(f64::NAN));
        assert_eq!(s.ratio_sbp, 0.57);
        assert_eq!(s.ratio_dbp, 0.75);
        assert!(s.set_ratio_sbp(0.5));
        assert_eq!(s.ratio_sbp, 0.5);
    }

    #[test]
    fn peak_and_pump_up_setters_are_bounded() {
        let mut s = Settings::default();
        assert!(!s.set_min_nbr_peaks(2));
        assert!(!s.set_pump_up_mmhg(400.0));
        assert!(s.set_min_nbr_peaks(12));
        assert!(s.set_pump_up_mmhg(180.0));
        assert_eq!(s.min_nbr_peaks, 12);
        assert_eq!(s.pump_up_mmhg, 180.0);
    }

    #[test]
    fn shared_settings_lock_while_measuring() {
        let shared = SharedSettings::default();
        shared.set_measuring(true);
        assert!(!shared.set_ratio_dbp(0.6));
        assert_eq!(shared.ratio_dbp(), 0.75);
        shared.set_measuring(false);
        assert!(shared.set_ratio_dbp(0.6));
        assert_eq!(shared.ratio_dbp(), 0.6);
        assert!(shared.reset_to_defaults());
        assert_eq!(shared.snapshot(), Settings::default());
    }

    #[test]
    fn setters_race_against_cycle_start() {
        let shared = SharedSettings::default();
        let writer = shared.clone();
        let setter = std::thread::spawn(move || {
            (0..200).filter(|_| writer.set_min_nbr_peaks(12)).count()
        });
        let taken = shared.begin_measurement();
        let accepted = setter.join().unwrap();
        // anything accepted before the start is in the snapshot, nothing after it lands
        assert!(shared.is_measuring());
        assert_eq!(shared.snapshot(), taken);
        if accepted > 0 {
            assert_eq!(taken.min_nbr_peaks, 12);
        }
        assert!(!shared.set_ratio_sbp(0.5));
    }

    #[test]
    fn toml_overrides_merge_with_defaults() {
        let cfg = ObpConfig::from_toml_str(
            r#"
            [settings]
            ratio_sbp = 0.55
            pump_up_mmhg = 180.0

            [filter]
            order = 4
            "#,
        )
        .unwrap();
        assert_eq!(cfg.settings.ratio_sbp, 0.55);
        assert_eq!(cfg.settings.ratio_dbp, 0.75);
        assert_eq!(cfg.filter.order, 4);
        assert_eq!(cfg.detection, DetectionConfig::default());
    }

    #[test]
    fn toml_with_illegal_ratio_is_rejected() {
        let err = ObpConfig::from_toml_str("[settings]\nratio_dbp = 1.5\n").unwrap_err();
        let root = err.downcast_ref::<ConfigError>();
        assert!(matches!(root, Some(ConfigError::RatioOutOfRange { .. })));
    }

    #[test]
    fn voltage_conversion_round_trips_through_ambient() {
        let acq = AcquisitionConfig::default();
        let v = acq.to_volts(120.0, 0.71);
        assert!((acq.to_mmhg(v, 0.71) - 120.0).abs() < 1e-9);
        assert!((acq.to_mmhg(0.71, 0.71)).abs() < 1e-12);
    }
}
