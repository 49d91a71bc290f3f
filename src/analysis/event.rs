use serde::Serialize;

use crate::analysis::error::EstimationError;
use crate::analysis::fft::{argmax, magnitude_spectrum};
use crate::analysis::impulse::Energy;

/// Fraction of the peak above which a sample counts toward the duration.
pub const DURATION_LEVEL: f64 = 0.2;
/// Lower and upper edges of the rise/fall band, as fractions of the peak.
pub const BAND_LOW: f64 = 0.1;
pub const BAND_HIGH: f64 = 0.9;

/// A detected impact within a trace.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ImpactEvent {
    /// 1-based position in a multi-event stream; `None` for single-shot.
    pub index: Option<usize>,
    /// First sample of the window (trace coordinates).
    pub start: usize,
    /// Last sample of the window, inclusive.
    pub end: usize,
    pub peak_index: usize,
    /// Time of the peak sample, seconds.
    pub time_s: f64,
    pub peak_amplitude: f64,
    pub baseline: f64,
    pub threshold: f64,
    /// N·s when the samples are newtons.
    pub impulse: f64,
    pub energy: Energy,
    pub duration_ms: f64,
    pub rise_time_ms: Option<f64>,
    pub fall_time_ms: Option<f64>,
    pub dominant_frequency_hz: Option<f64>,
}

impl ImpactEvent {
    pub fn interval(&self) -> (usize, usize) {
        (self.start, self.end)
    }

    pub fn sample_count(&self) -> usize {
        self.end + 1 - self.start
    }
}

/// Shape timing of one impact window.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PulseTiming {
    pub duration_ms: f64,
    pub rise_time_ms: Option<f64>,
    pub fall_time_ms: Option<f64>,
}

/// Duration and rise/fall times of `force` relative to `peak`.
///
/// The rise and fall figures are both the span between the first and the
/// last sample inside the 10–90 % band anywhere in the window, so they are
/// equal and include any secondary bounce.
pub fn pulse_timing(force: &[f64], time_s: &[f64], peak: f64) -> PulseTiming {
    let low = BAND_LOW * peak;
    let high = BAND_HIGH * peak;
    let band = span_ms(force, time_s, |f| f >= low && f <= high, 2);
    let duration_ms = span_ms(force, time_s, |f| f > DURATION_LEVEL * peak, 1).unwrap_or(0.0);
    PulseTiming {
        duration_ms,
        rise_time_ms: band,
        fall_time_ms: band,
    }
}

/// Milliseconds between the first and last sample satisfying `keep`, if at
/// least `min_hits` samples do.
fn span_ms(
    force: &[f64],
    time_s: &[f64],
    keep: impl Fn(f64) -> bool,
    min_hits: usize,
) -> Option<f64> {
    let hits: Vec<usize> = force
        .iter()
        .enumerate()
        .filter(|&(_, &f)| keep(f))
        .map(|(i, _)| i)
        .collect();
    if hits.len() < min_hits {
        return None;
    }
    let first = *hits.first()?;
    let last = *hits.last()?;
    Some((time_s[last] - time_s[first]) * 1000.0)
}

/// Dominant frequency of a raw (non-detrended) window, searched over the
/// first `⌊n/2⌋` bins.
pub fn local_dominant_frequency(
    force: &[f64],
    sample_rate_hz: f64,
) -> Result<Option<f64>, EstimationError> {
    let Some(spectrum) = magnitude_spectrum(force, sample_rate_hz, false)? else {
        return Ok(None);
    };
    let half = force.len() / 2;
    Ok(argmax(&spectrum.magnitudes[..half]).map(|i| spectrum.frequencies_hz[i]))
}
