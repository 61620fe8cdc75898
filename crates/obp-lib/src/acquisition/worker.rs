use super::{machine::Acquisition, source::SampleSource};
use crate::config::SharedSettings;
use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{debug, info, warn};
use std::thread::JoinHandle;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Cancel,
    Reset,
    Recalibrate,
    Shutdown,
}

/// Drives an [`Acquisition`] from a [`SampleSource`] on its own thread.
pub struct AcquisitionWorker<S> {
    machine: Acquisition,
    source: S,
    commands: Receiver<Command>,
    poll: Duration,
}

impl<S: SampleSource + Send + 'static> AcquisitionWorker<S> {
    /// Start the worker thread. Subscribe to the machine's events before calling this.
    pub fn spawn(machine: Acquisition, source: S) -> AcquisitionHandle {
        let fs = machine.config().sampling_rate_hz();
        if (source.sampling_rate_hz() - fs).abs() > 1e-6 {
            warn!(
                "source delivers {} Hz but detection is configured for {} Hz",
                source.sampling_rate_hz(),
                fs
            );
        }
        let poll = Duration::from_millis(machine.config().acquisition.poll_interval_ms.max(1));
        let settings = machine.settings().clone();
        let (command_tx, command_rx) = bounded(32);
        let worker = AcquisitionWorker {
            machine,
            source,
            commands: command_rx,
            poll,
        };
        let handle = std::thread::spawn(move || worker.run());
        AcquisitionHandle {
            command_tx,
            settings,
            handle: Some(handle),
        }
    }

    fn run(mut self) -> Acquisition {
        info!("acquisition worker running");
        'outer: loop {
            let available = self.source.available();
            if available == 0 {
                if self.source.is_finished() {
                    debug!("sample source exhausted");
                    break;
                }
                // interruptible sleep while the device buffer refills
                match self.commands.recv_timeout(self.poll) {
                    Ok(command) => {
                        if !self.apply(command) {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
                continue;
            }
            for _ in 0..available {
                match self.commands.try_recv() {
                    Ok(command) => {
                        if !self.apply(command) {
                            break 'outer;
                        }
                    }
                    Err(TryRecvError::Empty) => {}
                    Err(TryRecvError::Disconnected) => break 'outer,
                }
                let Some(voltage) = self.source.next_voltage() else {
                    break;
                };
                self.machine.process_sample(voltage);
            }
        }
        info!("acquisition worker stopped in {:?}", self.machine.state_kind());
        self.machine
    }

    /// Returns false on shutdown.
    fn apply(&mut self, command: Command) -> bool {
        debug!("worker command {:?}", command);
        match command {
            Command::Start => {
                self.machine.request_start();
            }
            Command::Cancel => self.machine.cancel(),
            Command::Reset => self.machine.reset(),
            Command::Recalibrate => {
                if !self.machine.recalibrate() {
                    warn!("recalibration refused while measuring");
                }
            }
            Command::Shutdown => {
                self.machine.cancel();
                return false;
            }
        }
        true
    }
}

/// Control side of a running [`AcquisitionWorker`].
pub struct AcquisitionHandle {
    command_tx: Sender<Command>,
    settings: SharedSettings,
    handle: Option<JoinHandle<Acquisition>>,
}

impl AcquisitionHandle {
    pub fn settings(&self) -> &SharedSettings {
        &self.settings
    }

    pub fn send(&self, command: Command) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|e| anyhow!("acquisition worker is gone, {:?} not delivered: {e}", command))
    }

    pub fn start(&self) -> Result<()> {
        self.send(Command::Start)
    }

    pub fn cancel(&self) -> Result<()> {
        self.send(Command::Cancel)
    }

    pub fn reset(&self) -> Result<()> {
        self.send(Command::Reset)
    }

    pub fn recalibrate(&self) -> Result<()> {
        self.send(Command::Recalibrate)
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Wait for the worker to run out of samples and hand back the machine.
    pub fn join(mut self) -> Result<Acquisition> {
        self.wait()
    }

    /// Stop the worker, cancelling any running measurement.
    pub fn shutdown(mut self) -> Result<Acquisition> {
        let _ = self.command_tx.send(Command::Shutdown);
        self.wait()
    }

    fn wait(&mut self) -> Result<Acquisition> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| anyhow!("acquisition worker already joined"))?;
        handle
            .join()
            .map_err(|_| anyhow!("acquisition worker panicked"))
    }
}

impl Drop for AcquisitionHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.command_tx.send(Command::Shutdown);
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        acquisition::{
            events::{Event, EventKind},
            source::ReplaySource,
            state::StateKind,
        },
        config::ObpConfig,
        simulate::CuffSimulation,
    };

    /// A device that never produces data.
    struct Silent;

    impl SampleSource for Silent {
        fn available(&mut self) -> usize {
            0
        }
        fn next_voltage(&mut self) -> Option<f64> {
            None
        }
        fn sampling_rate_hz(&self) -> f64 {
            1000.0
        }
    }

    #[test]
    fn replay_runs_a_full_cycle_on_the_worker() {
        let cfg = ObpConfig::default();
        let voltages = CuffSimulation::default().voltages(&cfg.acquisition);
        let mut machine = Acquisition::new(cfg, SharedSettings::default()).unwrap();
        let results = machine
            .events_mut()
            .subscribe_to(&[EventKind::Results, EventKind::Ready], 8);
        machine.request_start();

        let source = ReplaySource::new(1000.0, voltages).with_chunk(64);
        let handle = AcquisitionWorker::spawn(machine, source);
        let machine = handle.join().unwrap();

        assert_eq!(machine.state_kind(), StateKind::Results);
        let kinds: Vec<EventKind> = results.try_iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec![EventKind::Ready, EventKind::Results]);
    }

    #[test]
    fn idle_worker_answers_shutdown() {
        let machine = Acquisition::new(ObpConfig::default(), SharedSettings::default()).unwrap();
        let handle = AcquisitionWorker::spawn(machine, Silent);
        handle.start().unwrap();
        assert!(!handle.is_finished());
        let machine = handle.shutdown().unwrap();
        assert_eq!(machine.state_kind(), StateKind::Config);
        assert!(!machine.is_start_pending());
    }

    #[test]
    fn ready_event_crosses_threads() {
        let mut machine =
            Acquisition::new(ObpConfig::default(), SharedSettings::default()).unwrap();
        let rx = machine.events_mut().subscribe_to(&[EventKind::Ready], 4);
        let ambient = vec![0.71; 500];
        let handle = AcquisitionWorker::spawn(machine, ReplaySource::new(1000.0, ambient));
        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(5)),
            Ok(Event::Ready { .. })
        ));
        let machine = handle.join().unwrap();
        assert_eq!(machine.state_kind(), StateKind::Idle);
    }
}
