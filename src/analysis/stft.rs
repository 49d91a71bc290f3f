//! Short-time Fourier transform of a single trace.
//!
//! Segments of `nperseg` samples are taken every `nperseg - noverlap`
//! samples with no boundary extension or padding, mean-removed, tapered,
//! zero-padded to `nfft` and transformed. Magnitudes are scaled by the
//! window sum and reported in dB as `20·log10(|X| + ε)`.

use std::f64::consts::PI;

use rustfft::{num_complex::Complex64, FftPlanner};
use serde::{Deserialize, Serialize};

use crate::analysis::error::EstimationError;
use crate::analysis::fft::detrend;
use crate::analysis::rate::validate_sample_rate;

/// Tapering window applied to each segment (periodic form).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Window {
    Hann,
    Hamming,
    Rectangular,
}

impl Window {
    pub fn coefficients(&self, size: usize) -> Vec<f64> {
        let n = size as f64;
        (0..size)
            .map(|i| {
                let x = 2.0 * PI * i as f64 / n;
                match self {
                    Window::Hann => 0.5 - 0.5 * x.cos(),
                    Window::Hamming => 0.54 - 0.46 * x.cos(),
                    Window::Rectangular => 1.0,
                }
            })
            .collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StftConfig {
    /// Segment duration in seconds.
    pub window_seconds: f64,
    /// Overlap as a fraction of the segment length.
    pub overlap: f64,
    pub window: Window,
    /// Display span below the 99th percentile, in dB.
    pub db_range: f64,
    /// Subtract the global mean before segmenting.
    pub detrend: bool,
    pub min_segment: usize,
    pub max_segment: usize,
}

impl Default for StftConfig {
    fn default() -> Self {
        Self {
            window_seconds: 1e-3,
            overlap: 0.75,
            window: Window::Hann,
            db_range: 80.0,
            detrend: true,
            min_segment: 16,
            max_segment: 131_072,
        }
    }
}

/// Segment geometry derived from the configuration and the sampling rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentPlan {
    pub nperseg: usize,
    pub noverlap: usize,
    pub nfft: usize,
}

impl SegmentPlan {
    pub fn from_config(config: &StftConfig, sample_rate_hz: f64) -> Self {
        let min = config.min_segment.max(1);
        let max = config.max_segment.max(min);
        let requested = (config.window_seconds * sample_rate_hz).round_ties_even();
        let requested = if requested.is_finite() && requested > 0.0 {
            requested as usize
        } else {
            0
        };
        let nperseg = requested.max(min).clamp(min, max);
        let overlap = (config.overlap * nperseg as f64).floor();
        let noverlap = if overlap.is_finite() && overlap > 0.0 {
            (overlap as usize).min(nperseg - 1)
        } else {
            0
        };
        Self {
            nperseg,
            noverlap,
            nfft: nperseg.next_power_of_two(),
        }
    }

    pub fn step(&self) -> usize {
        self.nperseg - self.noverlap
    }

    pub fn segment_count(&self, samples: usize) -> usize {
        if samples < self.nperseg {
            0
        } else {
            (samples - self.nperseg) / self.step() + 1
        }
    }
}

/// Lower and upper colour bounds of a spectrogram display, in dB.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DisplayRange {
    pub min_db: f64,
    pub max_db: f64,
}

#[derive(Clone, Debug)]
pub struct Spectrogram {
    pub sample_rate_hz: f64,
    pub plan: SegmentPlan,
    /// Segment centres in seconds from the first sample.
    pub times_s: Vec<f64>,
    pub frequencies_hz: Vec<f64>,
    /// `[time][freq]`, linear magnitude.
    pub magnitudes: Vec<Vec<f64>>,
    /// `[time][freq]`, `20·log10(|X| + ε)`.
    pub magnitudes_db: Vec<Vec<f64>>,
}

impl Spectrogram {
    pub fn num_frames(&self) -> usize {
        self.times_s.len()
    }

    pub fn num_bins(&self) -> usize {
        self.frequencies_hz.len()
    }

    /// Linear-interpolated percentile of the dB matrix. `None` when empty.
    pub fn percentile_db(&self, percent: f64) -> Option<f64> {
        let flat: Vec<f64> = self.magnitudes_db.iter().flatten().copied().collect();
        percentile(&flat, percent)
    }

    /// 99th percentile as the top, `db_span` below it as the floor.
    pub fn display_range(&self, db_span: f64) -> Option<DisplayRange> {
        self.percentile_db(99.0).map(|max_db| DisplayRange {
            min_db: max_db - db_span,
            max_db,
        })
    }

    /// Keeps the frequency rows at or below `max_hz`.
    pub fn crop(&self, max_hz: f64) -> Spectrogram {
        let keep = self
            .frequencies_hz
            .iter()
            .take_while(|&&f| f <= max_hz)
            .count();
        Spectrogram {
            sample_rate_hz: self.sample_rate_hz,
            plan: self.plan,
            times_s: self.times_s.clone(),
            frequencies_hz: self.frequencies_hz[..keep].to_vec(),
            magnitudes: self.magnitudes.iter().map(|r| r[..keep].to_vec()).collect(),
            magnitudes_db: self.magnitudes_db.iter().map(|r| r[..keep].to_vec()).collect(),
        }
    }
}

/// Computes the spectrogram of `samples`.
///
/// Returns `Ok(None)` when the trace is shorter than one segment.
pub fn spectrogram(
    samples: &[f64],
    sample_rate_hz: f64,
    config: &StftConfig,
) -> Result<Option<Spectrogram>, EstimationError> {
    let sample_rate_hz = validate_sample_rate(sample_rate_hz)?;
    let plan = SegmentPlan::from_config(config, sample_rate_hz);
    let frames = plan.segment_count(samples.len());
    if frames == 0 {
        return Ok(None);
    }
    let signal = if config.detrend {
        detrend(samples)
    } else {
        samples.to_vec()
    };

    let window = config.window.coefficients(plan.nperseg);
    let scale = window.iter().sum::<f64>();
    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(plan.nfft);
    let bins = plan.nfft / 2 + 1;

    let mut magnitudes = Vec::with_capacity(frames);
    let mut buffer = vec![Complex64::new(0.0, 0.0); plan.nfft];
    for frame in 0..frames {
        let start = frame * plan.step();
        let segment = &signal[start..start + plan.nperseg];
        let mean = segment.iter().sum::<f64>() / plan.nperseg as f64;
        buffer.fill(Complex64::new(0.0, 0.0));
        for ((slot, &value), &w) in buffer.iter_mut().zip(segment).zip(&window) {
            *slot = Complex64::new((value - mean) * w, 0.0);
        }
        fft.process(&mut buffer);
        magnitudes.push(
            buffer
                .iter()
                .take(bins)
                .map(|c| c.norm() / scale)
                .collect::<Vec<f64>>(),
        );
    }

    let magnitudes_db = magnitudes
        .iter()
        .map(|row| row.iter().map(|&m| to_db(m)).collect())
        .collect();
    let times_s = (0..frames)
        .map(|k| (plan.nperseg as f64 / 2.0 + (k * plan.step()) as f64) / sample_rate_hz)
        .collect();
    let frequencies_hz = (0..bins)
        .map(|k| k as f64 * sample_rate_hz / plan.nfft as f64)
        .collect();

    Ok(Some(Spectrogram {
        sample_rate_hz,
        plan,
        times_s,
        frequencies_hz,
        magnitudes,
        magnitudes_db,
    }))
}

pub fn to_db(magnitude: f64) -> f64 {
    20.0 * (magnitude + f64::EPSILON).log10()
}

/// Percentile with linear interpolation between closest ranks.
pub fn percentile(values: &[f64], percent: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = (percent.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(fs: f64, f0: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| (2.0 * PI * f0 * i as f64 / fs).sin())
            .collect()
    }

    #[test]
    fn plan_follows_window_duration_and_overlap() {
        let plan = SegmentPlan::from_config(&StftConfig::default(), 50_000.0);
        assert_eq!(plan.nperseg, 50);
        assert_eq!(plan.noverlap, 37);
        assert_eq!(plan.nfft, 64);
        assert_eq!(plan.step(), 13);
    }

    #[test]
    fn half_sample_segment_lengths_round_to_even() {
        let config = StftConfig {
            window_seconds: 0.0625,
            ..StftConfig::default()
        };
        // 52.5 and 53.5 samples.
        assert_eq!(SegmentPlan::from_config(&config, 840.0).nperseg, 52);
        assert_eq!(SegmentPlan::from_config(&config, 856.0).nperseg, 54);
    }

    #[test]
    fn plan_clamps_segment_length() {
        let tiny = SegmentPlan::from_config(&StftConfig::default(), 1000.0);
        assert_eq!(tiny.nperseg, 16);
        let huge = SegmentPlan::from_config(
            &StftConfig {
                window_seconds: 10.0,
                ..StftConfig::default()
            },
            1e6,
        );
        assert_eq!(huge.nperseg, 131_072);
        let full_overlap = SegmentPlan::from_config(
            &StftConfig {
                overlap: 1.0,
                ..StftConfig::default()
            },
            1000.0,
        );
        assert_eq!(full_overlap.noverlap, 15);
    }

    #[test]
    fn tone_energy_sits_in_the_expected_row() {
        let fs = 8000.0;
        let config = StftConfig {
            window_seconds: 0.032,
            ..StftConfig::default()
        };
        let sg = spectrogram(&tone(fs, 1000.0, 4000), fs, &config)
            .unwrap()
            .unwrap();
        assert_eq!(sg.plan.nperseg, 256);
        assert_eq!(sg.num_bins(), sg.plan.nfft / 2 + 1);
        assert_eq!(sg.num_frames(), sg.plan.segment_count(4000));
        for row in &sg.magnitudes_db {
            let peak = row
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i)
                .unwrap();
            assert!((sg.frequencies_hz[peak] - 1000.0).abs() <= fs / sg.plan.nfft as f64);
        }
        // Hann + window-sum scaling → amplitude/2 at the tone bin.
        let bin = (1000.0 / (fs / sg.plan.nfft as f64)).round() as usize;
        assert!((sg.magnitudes[0][bin] - 0.5).abs() < 0.05);
    }

    #[test]
    fn segment_centres_are_reported_in_seconds() {
        let fs = 1000.0;
        let sg = spectrogram(&tone(fs, 50.0, 64), fs, &StftConfig::default())
            .unwrap()
            .unwrap();
        assert!((sg.times_s[0] - 0.008).abs() < 1e-12);
        assert!((sg.times_s[1] - 0.012).abs() < 1e-12);
    }

    #[test]
    fn silence_floors_at_epsilon_db() {
        let sg = spectrogram(&[0.0; 64], 1000.0, &StftConfig::default())
            .unwrap()
            .unwrap();
        let floor = to_db(0.0);
        assert!(sg.magnitudes_db.iter().flatten().all(|&v| v == floor));
        let range = sg.display_range(80.0).unwrap();
        assert_eq!(range.max_db, floor);
        assert_eq!(range.min_db, floor - 80.0);
    }

    #[test]
    fn short_trace_is_no_data() {
        assert!(spectrogram(&[1.0; 10], 1000.0, &StftConfig::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn percentile_interpolates_linearly() {
        let values: Vec<f64> = (0..=100).map(|v| v as f64).collect();
        assert_eq!(percentile(&values, 99.0), Some(99.0));
        assert_eq!(percentile(&[1.0, 2.0], 50.0), Some(1.5));
        assert_eq!(percentile(&[], 99.0), None);
    }

    #[test]
    fn hann_is_periodic() {
        let w = Window::Hann.coefficients(4);
        assert!((w[0] - 0.0).abs() < 1e-12);
        assert!((w[2] - 1.0).abs() < 1e-12);
        assert!((w[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn crop_limits_rows() {
        let fs = 1000.0;
        let sg = spectrogram(&tone(fs, 50.0, 256), fs, &StftConfig::default())
            .unwrap()
            .unwrap();
        let cropped = sg.crop(250.0);
        assert!(cropped.frequencies_hz.iter().all(|&f| f <= 250.0));
        assert!(cropped.magnitudes_db.iter().all(|r| r.len() == cropped.num_bins()));
    }
}
