//! Notifications published by the acquisition state machine.
//!
//! Observers either register a closure for one [`EventKind`] or take a
//! bounded channel receiving every event. Publishing never blocks the
//! acquisition thread: a full or disconnected channel loses the event.

use super::state::Screen;
use crate::metrics::pressure::BloodPressure;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// Pressure fell below the safety floor before the envelope was complete.
    PressureLost { pressure: f64 },
    /// The raw recording exceeded its allotted length.
    RecordingTooLong { samples: usize },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    NewData { pressure: f64, oscillation: f64 },
    HeartRate { bpm: f64 },
    Results(BloodPressure),
    Screen { screen: Screen },
    Ready { ambient_v: f64 },
    CalibrationFailed { attempts: u32 },
    Aborted { reason: AbortReason },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::NewData { .. } => EventKind::NewData,
            Event::HeartRate { .. } => EventKind::HeartRate,
            Event::Results(_) => EventKind::Results,
            Event::Screen { .. } => EventKind::Screen,
            Event::Ready { .. } => EventKind::Ready,
            Event::CalibrationFailed { .. } => EventKind::CalibrationFailed,
            Event::Aborted { .. } => EventKind::Aborted,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    NewData,
    HeartRate,
    Results,
    Screen,
    Ready,
    CalibrationFailed,
    Aborted,
}

type Handler = Box<dyn FnMut(&Event) + Send>;

struct Subscriber {
    kinds: Option<Vec<EventKind>>,
    tx: Sender<Event>,
}

impl Subscriber {
    fn wants(&self, kind: EventKind) -> bool {
        self.kinds.as_ref().map_or(true, |k| k.contains(&kind))
    }
}

#[derive(Default)]
pub struct EventBus {
    handlers: Vec<(EventKind, Handler)>,
    subscribers: Vec<Subscriber>,
    dropped: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `handler` on the acquisition thread for every event of `kind`.
    pub fn on<F>(&mut self, kind: EventKind, handler: F)
    where
        F: FnMut(&Event) + Send + 'static,
    {
        self.handlers.push((kind, Box::new(handler)));
    }

    /// Channel carrying every event; at most `capacity` are buffered.
    pub fn subscribe(&mut self, capacity: usize) -> Receiver<Event> {
        self.attach(None, capacity)
    }

    /// Channel carrying only the listed kinds.
    pub fn subscribe_to(&mut self, kinds: &[EventKind], capacity: usize) -> Receiver<Event> {
        self.attach(Some(kinds.to_vec()), capacity)
    }

    fn attach(&mut self, kinds: Option<Vec<EventKind>>, capacity: usize) -> Receiver<Event> {
        let (tx, rx) = bounded(capacity.max(1));
        self.subscribers.push(Subscriber { kinds, tx });
        rx
    }

    pub fn publish(&mut self, event: Event) {
        let kind = event.kind();
        for (k, handler) in self.handlers.iter_mut() {
            if *k == kind {
                handler(&event);
            }
        }
        let mut dropped = 0;
        self.subscribers.retain(|sub| {
            if !sub.wants(kind) {
                return true;
            }
            match sub.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    dropped += 1;
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            }
        });
        if dropped > 0 {
            self.dropped += dropped;
            debug!("{:?} event dropped by {} full subscriber(s)", kind, dropped);
        }
    }

    /// Events lost to full subscriber channels.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handlers.len())
            .field("subscribers", &self.subscribers.len())
            .field("dropped", &self.dropped)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn handlers_only_see_their_kind() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut bus = EventBus::new();
        bus.on(EventKind::HeartRate, move |e| sink.lock().unwrap().push(e.clone()));
        bus.publish(Event::Ready { ambient_v: 0.71 });
        bus.publish(Event::HeartRate { bpm: 72.0 });
        assert_eq!(*seen.lock().unwrap(), vec![Event::HeartRate { bpm: 72.0 }]);
    }

    #[test]
    fn full_channel_drops_without_blocking() {
        let mut bus = EventBus::new();
        let rx = bus.subscribe(2);
        for i in 0..5 {
            bus.publish(Event::HeartRate { bpm: i as f64 });
        }
        assert_eq!(rx.try_iter().count(), 2);
        assert_eq!(bus.dropped(), 3);
    }

    #[test]
    fn disconnected_subscribers_are_pruned() {
        let mut bus = EventBus::new();
        let kept = bus.subscribe_to(&[EventKind::Results], 4);
        drop(bus.subscribe(4));
        bus.publish(Event::Screen { screen: Screen::Start });
        assert_eq!(bus.subscriber_count(), 1);
        bus.publish(Event::Results(BloodPressure::default()));
        assert_eq!(kept.try_recv().map(|e| e.kind()), Ok(EventKind::Results));
        assert!(kept.try_recv().is_err());
    }

    #[test]
    fn events_serialize_with_a_tag() {
        let json = serde_json::to_value(Event::Aborted {
            reason: AbortReason::Cancelled,
        })
        .unwrap();
        assert_eq!(json["event"], "aborted");
        assert_eq!(json["reason"], "cancelled");
    }
}
