//! Single-shot impact detection by noise-threshold crossing.
//!
//! The baseline is taken from the opening rest segment of the trace, the
//! threshold is a multiple of the baseline noise (never below a floor), and
//! the impact is the span between the first and last sample whose deviation
//! reaches the threshold, widened by a time margin on both sides.

use serde::{Deserialize, Serialize};

use crate::analysis::error::{AnalysisError, EstimationError};
use crate::analysis::event::{local_dominant_frequency, pulse_timing, ImpactEvent};
use crate::analysis::fft::argmax;
use crate::analysis::impulse::{single_shot_energy, trapezoid, trapezoid_uniform, Energy, TimeBase};
use crate::analysis::rate::{median, time_steps, validate_sample_rate};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Multiplier applied to the baseline noise.
    pub k_threshold: f64,
    /// Padding added before and after the detected span, ms.
    pub margin_ms: f64,
    /// Length of the rest segment used for the baseline, ms.
    pub baseline_ms: f64,
    /// Lower bound of the noise estimate.
    pub noise_floor: f64,
    /// Fixed ADC zero; estimated from the rest segment when `None`.
    pub offset: Option<f64>,
    /// Ignore contributions below the offset when integrating.
    pub clip_below_offset: bool,
    /// Integrate `|F|`.
    pub use_abs: bool,
    /// ADC counts → newtons.
    pub adc_to_force: f64,
    /// Impact velocity, m/s.
    pub impact_velocity: f64,
    /// Analysed sub-range `[start, end)` of the trace.
    pub start: usize,
    pub end: Option<usize>,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            k_threshold: 3.0,
            margin_ms: 2.0,
            baseline_ms: 50.0,
            noise_floor: 0.1,
            offset: None,
            clip_below_offset: true,
            use_abs: false,
            adc_to_force: 1.0,
            impact_velocity: 1.0,
            start: 0,
            end: None,
        }
    }
}

/// Rest-segment statistics used for a detection.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Baseline {
    pub offset: f64,
    pub noise: f64,
    pub threshold: f64,
    /// Sample period used for margins and integration, s.
    pub dt: f64,
    /// Number of samples in the rest segment.
    pub samples: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Detection {
    /// The analysed range holds no samples.
    NoData,
    /// Nothing crossed the threshold.
    NoEvent(Baseline),
    Event { baseline: Baseline, event: ImpactEvent },
}

impl Detection {
    pub fn event(&self) -> Option<&ImpactEvent> {
        match self {
            Detection::Event { event, .. } => Some(event),
            _ => None,
        }
    }

    pub fn baseline(&self) -> Option<&Baseline> {
        match self {
            Detection::NoData => None,
            Detection::NoEvent(baseline) | Detection::Event { baseline, .. } => Some(baseline),
        }
    }

    /// Inclusive sample interval, `None` when nothing was found.
    pub fn interval(&self) -> Option<(usize, usize)> {
        self.event().map(ImpactEvent::interval)
    }

    pub fn impulse(&self) -> f64 {
        self.event().map(|e| e.impulse).unwrap_or(0.0)
    }

    pub fn energy(&self) -> f64 {
        self.event().map(|e| e.energy.value()).unwrap_or(0.0)
    }
}

/// Finds the impact in `samples`.
///
/// Event indices are reported in coordinates of the full trace even when
/// `config.start` narrows the analysed range.
pub fn detect_impact(
    samples: &[f64],
    time: TimeBase<'_>,
    config: &ThresholdConfig,
) -> Result<Detection, AnalysisError> {
    let end = config.end.unwrap_or(samples.len()).min(samples.len());
    let start = config.start.min(end);
    let x = &samples[start..end];
    let n = x.len();

    let spacing = match time {
        TimeBase::Timestamps(time_s) => {
            if time_s.len() != samples.len() {
                return Err(EstimationError::LengthMismatch {
                    time: time_s.len(),
                    samples: samples.len(),
                }
                .into());
            }
            Spacing::Axis(&time_s[start..end])
        }
        TimeBase::Uniform(fs) => Spacing::Step(1.0 / validate_sample_rate(fs)?),
    };
    if n == 0 {
        return Ok(Detection::NoData);
    }

    let dt = match spacing {
        Spacing::Axis(t) => {
            let steps = time_steps(t)?;
            steps.iter().sum::<f64>() / steps.len() as f64
        }
        Spacing::Step(dt) => dt,
    };

    let base_samples = ((config.baseline_ms / 1000.0 / dt).round_ties_even() as usize).clamp(1, n);
    let offset = config
        .offset
        .unwrap_or_else(|| median(&x[..base_samples]));
    let deviation: Vec<f64> = x.iter().map(|v| v - offset).collect();
    let noise = if base_samples < n {
        std_dev(&deviation[..base_samples])
    } else {
        std_dev(&deviation)
    };
    let threshold = config.k_threshold * noise.max(config.noise_floor);
    let baseline = Baseline {
        offset,
        noise,
        threshold,
        dt,
        samples: base_samples,
    };

    let first = deviation.iter().position(|d| d.abs() >= threshold);
    let last = deviation.iter().rposition(|d| d.abs() >= threshold);
    let (Some(first), Some(last)) = (first, last) else {
        return Ok(Detection::NoEvent(baseline));
    };

    let margin = (config.margin_ms / 1000.0 / dt).round_ties_even().max(0.0) as usize;
    let i0 = first.saturating_sub(margin);
    let i1 = (last + margin).min(n - 1);

    let force: Vec<f64> = deviation[i0..=i1]
        .iter()
        .map(|&d| {
            let d = if config.clip_below_offset { d.max(0.0) } else { d };
            let f = config.adc_to_force * d;
            if config.use_abs {
                f.abs()
            } else {
                f
            }
        })
        .collect();

    let window_time: Vec<f64> = match spacing {
        Spacing::Axis(t) => t[i0..=i1].to_vec(),
        Spacing::Step(_) => (start + i0..=start + i1).map(|i| i as f64 * dt).collect(),
    };
    let impulse = match spacing {
        Spacing::Axis(_) => trapezoid(&force, &window_time),
        Spacing::Step(_) => trapezoid_uniform(&force, dt),
    };

    let peak_offset = argmax(&force).unwrap_or(0);
    let peak_amplitude = force[peak_offset];
    let timing = pulse_timing(&force, &window_time, peak_amplitude);
    let dominant_frequency_hz = local_dominant_frequency(&force, 1.0 / dt)?;

    let event = ImpactEvent {
        index: None,
        start: start + i0,
        end: start + i1,
        peak_index: start + i0 + peak_offset,
        time_s: window_time[peak_offset],
        peak_amplitude,
        baseline: offset,
        threshold,
        impulse,
        energy: Energy::SingleShot(single_shot_energy(impulse, config.impact_velocity)),
        duration_ms: timing.duration_ms,
        rise_time_ms: timing.rise_time_ms,
        fall_time_ms: timing.fall_time_ms,
        dominant_frequency_hz,
    };
    Ok(Detection::Event { baseline, event })
}

#[derive(Clone, Copy)]
enum Spacing<'a> {
    Axis(&'a [f64]),
    Step(f64),
}

/// Population standard deviation.
fn std_dev(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mean = data.iter().sum::<f64>() / data.len() as f64;
    let variance = data
        .iter()
        .map(|v| {
            let delta = v - mean;
            delta * delta
        })
        .sum::<f64>()
        / data.len() as f64;
    variance.sqrt()
}
