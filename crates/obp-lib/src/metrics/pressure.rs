use crate::{
    metrics::envelope::Envelope,
    signal::{interpolation_ratio, lerp, mean},
};
use log::warn;
use serde::{Deserialize, Serialize};

/// Mean arterial, systolic and diastolic pressure in mmHg.
///
/// A value stays `None` when its crossing could not be resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BloodPressure {
    pub map: Option<f64>,
    pub sbp: Option<f64>,
    pub dbp: Option<f64>,
}

impl BloodPressure {
    pub fn is_complete(&self) -> bool {
        self.map.is_some() && self.sbp.is_some() && self.dbp.is_some()
    }
}

/// Where on the envelope each pressure was read.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PressureEstimate {
    pub pressures: BloodPressure,
    pub peak_amplitude: f64,
    /// Sample index of the envelope maximum.
    pub map_index: usize,
    /// Interpolated sample index of the systolic crossing.
    pub sbp_index: Option<usize>,
    /// Interpolated sample index of the diastolic crossing.
    pub dbp_index: Option<usize>,
}

/// Samples on each side of an index averaged when reading the cuff pressure:
/// half a beat period at the given heart rate.
pub fn half_beat_window(average_heart_rate: f64, fs: f64) -> usize {
    if average_heart_rate > 0.0 && average_heart_rate.is_finite() {
        (0.5 * 60.0 * fs / average_heart_rate).round() as usize
    } else {
        0
    }
}

/// Cuff pressure around `index`, averaged over `±half_window` samples.
///
/// Falls back to the single sample when the window leaves the buffer.
pub fn pressure_at(pressure: &[f64], index: usize, half_window: usize) -> Option<f64> {
    let Some(&single) = pressure.get(index) else {
        warn!(
            "pressure index {} outside recorded range of {} samples",
            index,
            pressure.len()
        );
        return None;
    };
    if half_window == 0 {
        return Some(single);
    }
    if index < half_window || index + half_window >= pressure.len() {
        warn!(
            "averaging window ±{} around sample {} exceeds the buffer, using the raw sample",
            half_window, index
        );
        return Some(single);
    }
    Some(mean(&pressure[index - half_window..=index + half_window]))
}

/// Locate MAP at the envelope maximum and the ratio crossings for SBP and DBP.
///
/// Returns `None` for an empty envelope.
pub fn estimate_pressures(
    envelope: &Envelope,
    pressure: &[f64],
    half_window: usize,
    ratio_sbp: f64,
    ratio_dbp: f64,
) -> Option<PressureEstimate> {
    let (map_pos, peak) = envelope.peak()?;
    let points = &envelope.points;
    let max_val = peak.amplitude;

    let map = pressure_at(pressure, peak.index, half_window);

    let sbp_search = ratio_sbp * max_val;
    let sbp_index = points[..=map_pos]
        .iter()
        .position(|p| p.amplitude > sbp_search)
        .map(|i| {
            if i == 0 {
                return points[0].index;
            }
            let (lb, ub) = (points[i - 1], points[i]);
            let t = lerp(
                lb.index as f64,
                ub.index as f64,
                interpolation_ratio(lb.amplitude, ub.amplitude, sbp_search),
            );
            t.round() as usize
        });
    if sbp_index.is_none() {
        warn!("no systolic crossing found before the envelope maximum");
    }

    let dbp_search = ratio_dbp * max_val;
    let dbp_index = points[map_pos + 1..]
        .iter()
        .position(|p| p.amplitude < dbp_search)
        .map(|offset| {
            let j = map_pos + 1 + offset;
            let (ub, lb) = (points[j - 1], points[j]);
            // falling edge: the earlier point holds the larger amplitude
            let t = lerp(
                ub.index as f64,
                lb.index as f64,
                1.0 - interpolation_ratio(lb.amplitude, ub.amplitude, dbp_search),
            );
            t.round() as usize
        });
    if dbp_index.is_none() {
        warn!(
            "envelope never fell below {:.0}% of its maximum, diastolic pressure unresolved",
            ratio_dbp * 100.0
        );
    }

    Some(PressureEstimate {
        pressures: BloodPressure {
            map,
            sbp: sbp_index.and_then(|i| pressure_at(pressure, i, half_window)),
            dbp: dbp_index.and_then(|i| pressure_at(pressure, i, half_window)),
        },
        peak_amplitude: max_val,
        map_index: peak.index,
        sbp_index,
        dbp_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::EnvelopePoint;

    /// Linear deflation from 180 mmHg at 3 mmHg/s, sampled at 1 kHz.
    fn deflation(n: usize) -> Vec<f64> {
        (0..n).map(|i| 180.0 - 0.003 * i as f64).collect()
    }

    fn triangle(peak_at: usize, step: usize, count: usize, peak: f64) -> Envelope {
        let points = (0..count)
            .map(|k| {
                let index = k * step;
                let dist = (index as f64 - peak_at as f64).abs();
                EnvelopePoint {
                    amplitude: (peak - dist * 0.0001).max(0.0),
                    index,
                }
            })
            .collect();
        Envelope { points }
    }

    #[test]
    fn triangular_envelope_places_crossings_around_the_peak() {
        let pressure = deflation(50_000);
        let env = triangle(24_000, 400, 120, 2.0);
        let est = estimate_pressures(&env, &pressure, 400, 0.57, 0.75).unwrap();
        assert_eq!(est.map_index, 24_000);
        let sbp_t = est.sbp_index.unwrap();
        let dbp_t = est.dbp_index.unwrap();
        assert!(sbp_t < est.map_index && est.map_index < dbp_t);
        // amplitude falls 0.0001 per sample: 0.86 below peak for SBP, 0.5 for DBP
        assert!((sbp_t as i64 - 15_400).abs() <= 1, "sbp at {}", sbp_t);
        assert!((dbp_t as i64 - 29_000).abs() <= 1, "dbp at {}", dbp_t);
        let bp = est.pressures;
        assert!(bp.is_complete());
        assert!(bp.sbp > bp.map && bp.map > bp.dbp);
        assert!((bp.map.unwrap() - 108.0).abs() < 1e-6);
    }

    #[test]
    fn missing_diastolic_crossing_stays_unresolved() {
        let pressure = deflation(20_000);
        let points = (0..20)
            .map(|k| EnvelopePoint {
                amplitude: if k < 10 { 0.2 * k as f64 } else { 1.8 },
                index: 500 + k * 800,
            })
            .collect();
        let est = estimate_pressures(&Envelope { points }, &pressure, 0, 0.57, 0.75).unwrap();
        assert!(est.pressures.map.is_some());
        assert!(est.pressures.sbp.is_some());
        assert_eq!(est.pressures.dbp, None);
        assert!(!est.pressures.is_complete());
    }

    #[test]
    fn window_past_buffer_edge_falls_back_to_single_sample() {
        let pressure = deflation(1000);
        assert_eq!(pressure_at(&pressure, 10, 400), Some(pressure[10]));
        assert_eq!(pressure_at(&pressure, 990, 400), Some(pressure[990]));
        let centred = pressure_at(&pressure, 500, 400).unwrap();
        assert!((centred - pressure[500]).abs() < 1e-9);
        assert_eq!(pressure_at(&pressure, 5000, 400), None);
    }

    #[test]
    fn empty_envelope_has_no_estimate() {
        assert!(estimate_pressures(&Envelope::default(), &[1.0], 0, 0.57, 0.75).is_none());
    }

    #[test]
    fn half_window_spans_half_a_beat() {
        assert_eq!(half_beat_window(75.0, 1000.0), 400);
        assert_eq!(half_beat_window(0.0, 1000.0), 0);
    }
}
