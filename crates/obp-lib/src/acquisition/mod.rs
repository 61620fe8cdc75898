//! Acquisition state machine and the thread that feeds it.

pub mod events;
pub mod machine;
pub mod source;
pub mod state;
pub mod worker;

pub use events::{AbortReason, Event, EventBus, EventKind};
pub use machine::Acquisition;
pub use source::{ReplaySource, SampleSource};
pub use state::{Screen, State, StateKind};
pub use worker::{AcquisitionHandle, AcquisitionWorker, Command};
