use crate::signal::{interpolation_ratio, lerp, EnvelopePoint, Extremum};
use serde::{Deserialize, Serialize};

/// Oscillometric waveform envelope, two points per interior minimum.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub points: Vec<EnvelopePoint>,
}

impl Envelope {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Position and value of the largest amplitude; the first one wins on ties.
    pub fn peak(&self) -> Option<(usize, EnvelopePoint)> {
        self.points
            .iter()
            .copied()
            .enumerate()
            .fold(None, |best: Option<(usize, EnvelopePoint)>, (i, p)| match best {
                Some((_, b)) if b.amplitude >= p.amplitude => best,
                _ => Some((i, p)),
            })
    }
}

/// Build the envelope from synchronised maxima and minima.
///
/// `minima[i]` must lie between `maxima[i]` and `maxima[i + 1]`. For each
/// minimum that has a successor, the maxima trend is interpolated at the
/// minimum and the minima trend at the following maximum.
pub fn build_envelope(maxima: &[Extremum], minima: &[Extremum]) -> Envelope {
    let pairs = minima.len().min(maxima.len().saturating_sub(1)).saturating_sub(1);
    let mut points = Vec::with_capacity(2 * pairs);
    for i in 0..pairs {
        let (max1, max2) = (maxima[i], maxima[i + 1]);
        let (min1, min2) = (minima[i], minima[i + 1]);

        let lerp_max = lerp(
            max1.amplitude,
            max2.amplitude,
            interpolation_ratio(max1.index as f64, max2.index as f64, min1.index as f64),
        );
        let lerp_min = lerp(
            min1.amplitude,
            min2.amplitude,
            interpolation_ratio(min1.index as f64, min2.index as f64, max2.index as f64),
        );

        points.push(EnvelopePoint {
            amplitude: lerp_max - min1.amplitude,
            index: min1.index,
        });
        points.push(EnvelopePoint {
            amplitude: max2.amplitude - lerp_min,
            index: max2.index,
        });
    }
    Envelope { points }
}
