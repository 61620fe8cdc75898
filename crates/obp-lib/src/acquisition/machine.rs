//! Acquisition cycle: ambient calibration, inflation, deflation, cuff
//! emptying and result publication.
//!
//! [`Acquisition::process_sample`] is fed one raw transducer voltage at a
//! time from a single thread. Everything observable leaves the machine
//! through its [`EventBus`].

use super::{
    events::{AbortReason, Event, EventBus, EventKind},
    state::{Calibration, CalibrationStep, State, StateKind},
};
use crate::{
    config::{ObpConfig, Settings, SharedSettings},
    error::ConfigError,
    filters::FilterBank,
    io::record::{timestamped_name, RecordSink},
    metrics::pressure::BloodPressure,
    pipeline::Oscillometer,
};
use chrono::{DateTime, Local};
use crossbeam_channel::Receiver;
use log::{debug, info, warn};

pub struct Acquisition {
    cfg: ObpConfig,
    shared: SharedSettings,
    filters: FilterBank,
    oscillometer: Oscillometer,
    state: State,
    ambient_v: Option<f64>,
    raw: Vec<f64>,
    max_recording: usize,
    start_requested: bool,
    cycle_started: Option<DateTime<Local>>,
    last_pressure: f64,
    events: EventBus,
    recorder: Option<Box<dyn RecordSink + Send>>,
}

impl Acquisition {
    pub fn new(cfg: ObpConfig, shared: SharedSettings) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let fs = cfg.sampling_rate_hz();
        let filters = FilterBank::new(&cfg.filter, fs)?;
        let oscillometer = Oscillometer::new(cfg.detection, shared.snapshot());
        let max_recording = (cfg.acquisition.max_recording_s * fs).round() as usize;
        shared.set_measuring(false);
        Ok(Self {
            state: State::Config(Calibration::new(calibration_window(&cfg))),
            cfg,
            shared,
            filters,
            oscillometer,
            ambient_v: None,
            raw: Vec::new(),
            max_recording,
            start_requested: false,
            cycle_started: None,
            last_pressure: 0.0,
            events: EventBus::new(),
            recorder: None,
        })
    }

    /// Persist the series of every finished or aborted cycle.
    pub fn with_recorder(mut self, recorder: Box<dyn RecordSink + Send>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn set_recorder(&mut self, recorder: Box<dyn RecordSink + Send>) {
        self.recorder = Some(recorder);
    }

    pub fn events_mut(&mut self) -> &mut EventBus {
        &mut self.events
    }

    /// Shorthand for a bounded channel of every event.
    pub fn subscribe(&mut self) -> Receiver<Event> {
        self.events.subscribe(self.cfg.acquisition.event_capacity)
    }

    pub fn on<F>(&mut self, kind: EventKind, handler: F)
    where
        F: FnMut(&Event) + Send + 'static,
    {
        self.events.on(kind, handler);
    }

    pub fn config(&self) -> &ObpConfig {
        &self.cfg
    }

    pub fn settings(&self) -> &SharedSettings {
        &self.shared
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn state_kind(&self) -> StateKind {
        self.state.kind()
    }

    /// Zero reference found by calibration.
    pub fn ambient_v(&self) -> Option<f64> {
        self.ambient_v
    }

    pub fn result(&self) -> Option<BloodPressure> {
        match self.state {
            State::Results(bp) => Some(bp),
            _ => None,
        }
    }

    pub fn oscillometer(&self) -> &Oscillometer {
        &self.oscillometer
    }

    /// Cuff pressure in mmHg recorded since the cycle started.
    pub fn raw(&self) -> &[f64] {
        &self.raw
    }

    /// Latest low-pass pressure.
    pub fn current_pressure(&self) -> f64 {
        self.last_pressure
    }

    pub fn is_start_pending(&self) -> bool {
        self.start_requested
    }

    /// Ask for a new measurement; honoured once the machine is idle.
    ///
    /// A request made during calibration waits for it to converge. One made
    /// on the results screen is dropped by `cancel` or `reset`. Returns
    /// false while a cycle is already running.
    pub fn request_start(&mut self) -> bool {
        if self.state.kind().is_measuring() {
            debug!("start ignored, measurement already running");
            return false;
        }
        self.start_requested = true;
        true
    }

    /// Stop the running cycle or leave the results screen.
    pub fn cancel(&mut self) {
        self.start_requested = false;
        match self.state.kind() {
            kind if kind.is_measuring() => self.abort(AbortReason::Cancelled),
            StateKind::Results => {
                self.clear_cycle();
                self.enter(State::Idle);
            }
            _ => {}
        }
    }

    /// Return to idle from results, discarding the cycle buffers.
    pub fn reset(&mut self) {
        self.start_requested = false;
        if self.state.kind().is_measuring() {
            self.abort(AbortReason::Cancelled);
            return;
        }
        if self.state.kind() == StateKind::Results {
            self.clear_cycle();
            self.enter(State::Idle);
        }
    }

    /// Restart ambient calibration. Refused while a cycle is running.
    pub fn recalibrate(&mut self) -> bool {
        if self.state.kind().is_measuring() {
            return false;
        }
        self.clear_cycle();
        self.ambient_v = None;
        self.filters.reset();
        self.enter(State::Config(Calibration::new(calibration_window(&self.cfg))));
        true
    }

    pub fn process_sample(&mut self, voltage: f64) {
        if let State::Config(cal) = &mut self.state {
            let acq = &self.cfg.acquisition;
            let step = cal.observe(voltage, acq.calibration_tolerance_v, acq.max_calibration_attempts);
            let attempts = cal.attempts;
            self.after_calibration_step(step, attempts);
            return;
        }
        let Some(ambient) = self.ambient_v else {
            return;
        };

        let mmhg = self.cfg.acquisition.to_mmhg(voltage, ambient);
        let (pressure, oscillation) = self.filters.split(mmhg);
        self.last_pressure = pressure;
        self.events.publish(Event::NewData {
            pressure,
            oscillation,
        });

        match self.state.kind() {
            StateKind::Idle => {
                if self.start_requested {
                    self.begin_cycle();
                }
            }
            StateKind::Inflate => {
                if !self.record_raw(mmhg) {
                    return;
                }
                if pressure > self.oscillometer.settings().pump_up_mmhg {
                    self.oscillometer.reset();
                    self.enter(State::Deflate);
                }
            }
            StateKind::Deflate => {
                if !self.record_raw(mmhg) {
                    return;
                }
                if pressure < self.cfg.acquisition.safety_floor_mmhg {
                    self.abort(AbortReason::PressureLost { pressure });
                    return;
                }
                if self.oscillometer.process_sample(pressure, oscillation) {
                    let bpm = self.oscillometer.current_heart_rate();
                    self.events.publish(Event::HeartRate { bpm });
                }
                if self.oscillometer.is_enough_data() {
                    self.enter(State::Empty);
                }
            }
            StateKind::Empty => {
                // enough pulses are in; a full buffer ends the cycle with results
                if self.raw.len() < self.max_recording {
                    self.raw.push(mmhg);
                }
                if pressure < self.cfg.acquisition.empty_threshold_mmhg
                    || self.raw.len() >= self.max_recording
                {
                    self.finish_cycle();
                }
            }
            StateKind::Results | StateKind::Config => {}
        }
    }

    fn after_calibration_step(&mut self, step: CalibrationStep, attempts: u32) {
        match step {
            CalibrationStep::Converged(ambient_v) => {
                info!(
                    "ambient pressure calibrated at {:.4} V after {} window(s)",
                    ambient_v, attempts
                );
                self.ambient_v = Some(ambient_v);
                self.enter(State::Idle);
                self.events.publish(Event::Ready { ambient_v });
            }
            CalibrationStep::Retry => {
                debug!("ambient pressure unstable, calibration attempt {} restarted", attempts);
            }
            CalibrationStep::Exhausted => {
                warn!(
                    "ambient pressure did not settle within {} calibration windows",
                    attempts
                );
                self.events.publish(Event::CalibrationFailed { attempts });
            }
            CalibrationStep::Pending | CalibrationStep::Parked => {}
        }
    }

    /// Append to the raw recording; aborts and returns false once it is full.
    fn record_raw(&mut self, mmhg: f64) -> bool {
        if self.raw.len() >= self.max_recording {
            self.abort(AbortReason::RecordingTooLong {
                samples: self.raw.len(),
            });
            return false;
        }
        self.raw.push(mmhg);
        true
    }

    fn begin_cycle(&mut self) {
        self.start_requested = false;
        let settings: Settings = self.shared.begin_measurement();
        self.oscillometer.apply_settings(settings);
        self.clear_cycle();
        if self.cfg.filter.reset_on_start {
            self.filters.reset();
        }
        self.cycle_started = Some(Local::now());
        info!(
            "measurement started: pump up to {} mmHg, ratios {:.2}/{:.2}, {} peaks",
            settings.pump_up_mmhg, settings.ratio_sbp, settings.ratio_dbp, settings.min_nbr_peaks
        );
        self.enter(State::Inflate);
    }

    fn finish_cycle(&mut self) {
        let bp = self.oscillometer.estimate();
        let bpm = self.oscillometer.average_heart_rate();
        self.events.publish(Event::HeartRate { bpm });
        self.events.publish(Event::Results(bp));
        self.save_recording();
        self.enter(State::Results(bp));
    }

    fn abort(&mut self, reason: AbortReason) {
        warn!("measurement aborted in {:?}: {:?}", self.state.kind(), reason);
        self.events.publish(Event::Aborted { reason });
        self.save_recording();
        self.clear_cycle();
        self.enter(State::Idle);
    }

    fn clear_cycle(&mut self) {
        self.raw.clear();
        self.oscillometer.reset();
    }

    fn save_recording(&mut self) {
        let Some(recorder) = self.recorder.as_mut() else {
            return;
        };
        let at = self.cycle_started.unwrap_or_else(Local::now);
        let fs = self.cfg.sampling_rate_hz();
        let series: [(&str, &[f64]); 3] = [
            ("pressure", self.oscillometer.pressure()),
            ("oscillation", self.oscillometer.detector().oscillation()),
            ("raw", &self.raw),
        ];
        for (name, samples) in series {
            if let Err(err) = recorder.record_series(&timestamped_name(at, name), fs, samples) {
                warn!("failed to record {} series: {:#}", name, err);
            }
        }
    }

    fn enter(&mut self, next: State) {
        let from = self.state.kind();
        let to = next.kind();
        let screen_changed = self.state.screen() != next.screen();
        self.state = next;
        if from != to {
            info!("acquisition {:?} -> {:?}", from, to);
        }
        self.shared.set_measuring(to.is_measuring());
        if screen_changed {
            self.events.publish(Event::Screen {
                screen: to.screen(),
            });
        }
    }
}

impl std::fmt::Debug for Acquisition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acquisition")
            .field("state", &self.state.kind())
            .field("ambient_v", &self.ambient_v)
            .field("raw", &self.raw.len())
            .field("start_requested", &self.start_requested)
            .field("events", &self.events)
            .finish()
    }
}

fn calibration_window(cfg: &ObpConfig) -> usize {
    (cfg.acquisition.calibration_window_ms * cfg.sampling_rate_hz() / 1000.0).round() as usize
}
