use crate::{metrics::pressure::BloodPressure, signal::mean};
use serde::{Deserialize, Serialize};

/// Ambient pressure calibration in progress.
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    pub window: usize,
    pub buffer: Vec<f64>,
    pub attempts: u32,
    /// Set once the attempt budget is spent; samples are ignored until recalibration.
    pub failed: bool,
}

impl Calibration {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            buffer: Vec::with_capacity(window.max(1)),
            attempts: 0,
            failed: false,
        }
    }

    /// Add one raw voltage. A full window converges when its maximum lies
    /// within `tolerance` of its mean; otherwise the window restarts.
    pub fn observe(&mut self, voltage: f64, tolerance: f64, max_attempts: u32) -> CalibrationStep {
        if self.failed {
            return CalibrationStep::Parked;
        }
        self.buffer.push(voltage);
        if self.buffer.len() < self.window {
            return CalibrationStep::Pending;
        }
        let avg = mean(&self.buffer);
        let max = self.buffer.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        self.buffer.clear();
        self.attempts += 1;
        if (max - avg).abs() < tolerance {
            return CalibrationStep::Converged(avg);
        }
        if self.attempts >= max_attempts {
            self.failed = true;
            return CalibrationStep::Exhausted;
        }
        CalibrationStep::Retry
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationStep {
    Pending,
    Converged(f64),
    Retry,
    Exhausted,
    Parked,
}

/// Acquisition state with the data each state owns.
#[derive(Debug, Clone, PartialEq)]
pub enum State {
    Config(Calibration),
    Idle,
    Inflate,
    Deflate,
    Empty,
    Results(BloodPressure),
}

impl State {
    pub fn kind(&self) -> StateKind {
        match self {
            State::Config(_) => StateKind::Config,
            State::Idle => StateKind::Idle,
            State::Inflate => StateKind::Inflate,
            State::Deflate => StateKind::Deflate,
            State::Empty => StateKind::Empty,
            State::Results(_) => StateKind::Results,
        }
    }

    pub fn screen(&self) -> Screen {
        self.kind().screen()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    Config,
    Idle,
    Inflate,
    Deflate,
    Empty,
    Results,
}

impl StateKind {
    /// True while a measurement cycle owns the settings snapshot.
    pub fn is_measuring(self) -> bool {
        matches!(self, StateKind::Inflate | StateKind::Deflate | StateKind::Empty)
    }

    pub fn screen(self) -> Screen {
        match self {
            StateKind::Config | StateKind::Idle => Screen::Start,
            StateKind::Inflate => Screen::Inflate,
            StateKind::Deflate => Screen::Deflate,
            StateKind::Empty => Screen::EmptyCuff,
            StateKind::Results => Screen::Result,
        }
    }
}

/// Operator-facing step of the procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Screen {
    Start,
    Inflate,
    Deflate,
    EmptyCuff,
    Result,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_cycle_states_hold_the_measurement() {
        let measuring: Vec<StateKind> = [
            StateKind::Config,
            StateKind::Idle,
            StateKind::Inflate,
            StateKind::Deflate,
            StateKind::Empty,
            StateKind::Results,
        ]
        .into_iter()
        .filter(|k| k.is_measuring())
        .collect();
        assert_eq!(
            measuring,
            vec![StateKind::Inflate, StateKind::Deflate, StateKind::Empty]
        );
    }

    #[test]
    fn calibration_converges_on_a_steady_window() {
        let mut cal = Calibration::new(4);
        for v in [0.710, 0.711, 0.709] {
            assert_eq!(cal.observe(v, 0.002, 3), CalibrationStep::Pending);
        }
        match cal.observe(0.710, 0.002, 3) {
            CalibrationStep::Converged(avg) => assert!((avg - 0.710).abs() < 1e-9),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn calibration_gives_up_after_its_attempts() {
        let mut cal = Calibration::new(2);
        let mut steps = Vec::new();
        for i in 0..8 {
            steps.push(cal.observe(if i % 2 == 0 { 0.7 } else { 0.8 }, 0.002, 2));
        }
        assert_eq!(steps[1], CalibrationStep::Retry);
        assert_eq!(steps[3], CalibrationStep::Exhausted);
        assert_eq!(steps[4], CalibrationStep::Parked);
        assert!(cal.failed);
        assert_eq!(cal.attempts, 2);
    }

    #[test]
    fn screens_follow_states() {
        assert_eq!(State::Config(Calibration::new(10)).screen(), Screen::Start);
        assert_eq!(State::Empty.screen(), Screen::EmptyCuff);
        assert_eq!(State::Results(BloodPressure::default()).screen(), Screen::Result);
    }
}
