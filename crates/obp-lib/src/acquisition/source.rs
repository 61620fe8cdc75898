use std::collections::VecDeque;

/// Provider of raw transducer voltages.
///
/// The acquisition worker polls `available()` and drains that many samples
/// with `next_voltage()`. `None` from `next_voltage()` means the source is
/// exhausted and will never produce more data.
pub trait SampleSource {
    fn available(&mut self) -> usize;
    fn next_voltage(&mut self) -> Option<f64>;
    fn sampling_rate_hz(&self) -> f64;

    /// True once no further samples will arrive.
    fn is_finished(&self) -> bool {
        false
    }
}

/// Replays a recorded voltage series, optionally in chunks to mimic a
/// device buffer filling up between polls.
#[derive(Debug, Clone)]
pub struct ReplaySource {
    fs: f64,
    pending: VecDeque<f64>,
    chunk: usize,
}

impl ReplaySource {
    pub fn new(fs: f64, samples: Vec<f64>) -> Self {
        Self {
            fs,
            pending: samples.into(),
            chunk: usize::MAX,
        }
    }

    /// Report at most `chunk` samples per poll.
    pub fn with_chunk(mut self, chunk: usize) -> Self {
        self.chunk = chunk.max(1);
        self
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

impl SampleSource for ReplaySource {
    fn available(&mut self) -> usize {
        self.pending.len().min(self.chunk)
    }

    fn next_voltage(&mut self) -> Option<f64> {
        self.pending.pop_front()
    }

    fn sampling_rate_hz(&self) -> f64 {
        self.fs
    }

    fn is_finished(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_reports_chunks_until_drained() {
        let mut src = ReplaySource::new(1000.0, vec![0.1, 0.2, 0.3]).with_chunk(2);
        assert_eq!(src.available(), 2);
        assert_eq!(src.next_voltage(), Some(0.1));
        assert_eq!(src.next_voltage(), Some(0.2));
        assert_eq!(src.available(), 1);
        assert!(!src.is_finished());
        assert_eq!(src.next_voltage(), Some(0.3));
        assert!(src.is_finished());
        assert_eq!(src.next_voltage(), None);
    }
}
