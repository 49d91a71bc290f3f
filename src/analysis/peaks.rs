//! Multi-impact detection in a continuous force stream.
//!
//! Peaks are local maxima of at least `relative_threshold × max(force)`,
//! thinned so that no two kept peaks are closer than `min_separation_s`
//! (higher peaks win). Each peak gets a fixed pre/post window from which
//! the impact figures are computed independently.

use serde::{Deserialize, Serialize};

use crate::analysis::error::{AnalysisError, EstimationError};
use crate::analysis::event::{local_dominant_frequency, pulse_timing, ImpactEvent};
use crate::analysis::impulse::{impulse, streaming_signal_energy, Energy, TimeBase};
use crate::analysis::rate::{estimate_sampling_rate, validate_sample_rate};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakConfig {
    /// Minimum peak height as a fraction of the global maximum.
    pub relative_threshold: f64,
    /// Minimum distance between kept peaks, s.
    pub min_separation_s: f64,
    pub pre_ms: f64,
    pub post_ms: f64,
    /// Sensor sensitivity; the signal is divided by it to get newtons.
    pub sensitivity: f64,
}

impl Default for PeakConfig {
    fn default() -> Self {
        Self {
            relative_threshold: 0.4,
            min_separation_s: 0.05,
            pre_ms: 50.0,
            post_ms: 100.0,
            sensitivity: 1.0,
        }
    }
}

/// Indices of local maxima. Flat tops report their middle sample
/// (rounded down); edges never qualify.
pub fn local_maxima(x: &[f64]) -> Vec<usize> {
    let mut peaks = Vec::new();
    if x.len() < 3 {
        return peaks;
    }
    let i_max = x.len() - 1;
    let mut i = 1;
    while i < i_max {
        if x[i - 1] < x[i] {
            let mut ahead = i + 1;
            while ahead < i_max && x[ahead] == x[i] {
                ahead += 1;
            }
            if x[ahead] < x[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    peaks
}

/// Drops peaks closer than `distance` samples to a higher one.
///
/// Peaks are visited from highest to lowest; among equal heights the later
/// peak is visited first.
pub fn select_by_distance(peaks: &[usize], x: &[f64], distance: usize) -> Vec<usize> {
    let mut keep = vec![true; peaks.len()];
    let mut order: Vec<usize> = (0..peaks.len()).collect();
    order.sort_by(|&a, &b| x[peaks[a]].total_cmp(&x[peaks[b]]));
    for &j in order.iter().rev() {
        if !keep[j] {
            continue;
        }
        let mut k = j;
        while k > 0 && peaks[j] - peaks[k - 1] < distance {
            keep[k - 1] = false;
            k -= 1;
        }
        let mut k = j + 1;
        while k < peaks.len() && peaks[k] - peaks[j] < distance {
            keep[k] = false;
            k += 1;
        }
    }
    peaks
        .iter()
        .zip(keep)
        .filter_map(|(&p, kept)| kept.then_some(p))
        .collect()
}

/// Local maxima at least `min_height` high, thinned by `distance` samples.
pub fn find_peaks(x: &[f64], min_height: f64, distance: usize) -> Vec<usize> {
    let candidates: Vec<usize> = local_maxima(x)
        .into_iter()
        .filter(|&p| x[p] >= min_height)
        .collect();
    if distance <= 1 {
        return candidates;
    }
    select_by_distance(&candidates, x, distance)
}

/// Detects every impact in a continuous stream.
///
/// Events come back in time order with 1-based indices. An empty stream
/// yields no events.
pub fn detect_impacts(
    signal: &[f64],
    time: TimeBase<'_>,
    config: &PeakConfig,
) -> Result<Vec<ImpactEvent>, AnalysisError> {
    let (sample_rate_hz, time_s) = match time {
        TimeBase::Uniform(fs) => {
            let fs = validate_sample_rate(fs)?;
            (fs, (0..signal.len()).map(|i| i as f64 / fs).collect::<Vec<f64>>())
        }
        TimeBase::Timestamps(t) => {
            if signal.is_empty() && t.is_empty() {
                return Ok(Vec::new());
            }
            let fs = estimate_sampling_rate(t)?;
            if t.len() != signal.len() {
                return Err(EstimationError::LengthMismatch {
                    time: t.len(),
                    samples: signal.len(),
                }
                .into());
            }
            (fs, t.to_vec())
        }
    };
    if signal.is_empty() {
        return Ok(Vec::new());
    }

    let force: Vec<f64> = signal.iter().map(|v| v / config.sensitivity).collect();
    let max_force = force.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let distance = (config.min_separation_s * sample_rate_hz).ceil().max(1.0) as usize;
    let peaks = find_peaks(&force, max_force * config.relative_threshold, distance);

    let pre = (config.pre_ms / 1000.0 * sample_rate_hz) as usize;
    let post = (config.post_ms / 1000.0 * sample_rate_hz) as usize;

    peaks
        .iter()
        .enumerate()
        .map(|(i, &peak)| {
            let start = peak.saturating_sub(pre);
            let end = (peak + post).min(force.len());
            let window = &force[start..end];
            let window_time = &time_s[start..end];
            let peak_amplitude = force[peak];
            let timing = pulse_timing(window, window_time, peak_amplitude);
            let window_impulse = match time {
                TimeBase::Uniform(_) => impulse(window, TimeBase::Uniform(sample_rate_hz))?,
                TimeBase::Timestamps(_) => impulse(window, TimeBase::Timestamps(window_time))?,
            };
            Ok(ImpactEvent {
                index: Some(i + 1),
                start,
                end: end - 1,
                peak_index: peak,
                time_s: time_s[peak],
                peak_amplitude,
                baseline: 0.0,
                threshold: max_force * config.relative_threshold,
                impulse: window_impulse,
                energy: Energy::Streaming(streaming_signal_energy(window, sample_rate_hz)?),
                duration_ms: timing.duration_ms,
                rise_time_ms: timing.rise_time_ms,
                fall_time_ms: timing.fall_time_ms,
                dominant_frequency_hz: local_dominant_frequency(window, sample_rate_hz)?,
            })
        })
        .collect()
}
