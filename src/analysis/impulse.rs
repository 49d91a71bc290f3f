//! Impulse and energy of a force window.
//!
//! Two energy figures exist and are deliberately kept apart:
//! [`single_shot_energy`] is the work estimate of a single captured impact
//! (`½·v·J`), [`streaming_signal_energy`] is the windowed signal energy of a
//! continuous hammer stream (`ΣF²/fs`). They describe different experimental
//! setups and are not interchangeable.

use serde::{Deserialize, Serialize};

use crate::analysis::error::EstimationError;
use crate::analysis::rate::validate_sample_rate;

/// How samples are spaced in time.
#[derive(Clone, Copy, Debug)]
pub enum TimeBase<'a> {
    /// Constant rate in Hz.
    Uniform(f64),
    /// Per-sample time in seconds, strictly increasing.
    Timestamps(&'a [f64]),
}

/// Trapezoidal integral with a constant step.
pub fn trapezoid_uniform(values: &[f64], dt: f64) -> f64 {
    values
        .windows(2)
        .map(|pair| 0.5 * (pair[0] + pair[1]) * dt)
        .sum()
}

/// Trapezoidal integral over explicit abscissae.
pub fn trapezoid(values: &[f64], x: &[f64]) -> f64 {
    values
        .windows(2)
        .zip(x.windows(2))
        .map(|(y, x)| 0.5 * (y[0] + y[1]) * (x[1] - x[0]))
        .sum()
}

/// `J = ∫F dt` over the whole `force` slice.
///
/// With timestamps the actual (possibly non-uniform) deltas are used and the
/// axis must have the same length as `force`.
pub fn impulse(force: &[f64], time: TimeBase<'_>) -> Result<f64, EstimationError> {
    match time {
        TimeBase::Uniform(sample_rate_hz) => {
            let fs = validate_sample_rate(sample_rate_hz)?;
            Ok(trapezoid_uniform(force, 1.0 / fs))
        }
        TimeBase::Timestamps(time_s) => {
            if time_s.len() != force.len() {
                return Err(EstimationError::LengthMismatch {
                    time: time_s.len(),
                    samples: force.len(),
                });
            }
            Ok(trapezoid(force, time_s))
        }
    }
}

/// Work done by a single captured impact, `W = ½ · v_impact · J`.
pub fn single_shot_energy(impulse: f64, impact_velocity: f64) -> f64 {
    0.5 * impact_velocity * impulse
}

/// Signal-energy proxy of a streamed impact window, `W = Σ F² / fs`.
///
/// Not physical work; units are N²·s.
pub fn streaming_signal_energy(force: &[f64], sample_rate_hz: f64) -> Result<f64, EstimationError> {
    let fs = validate_sample_rate(sample_rate_hz)?;
    Ok(force.iter().map(|f| f * f).sum::<f64>() / fs)
}

/// Energy attached to an impact, tagged with the formula that produced it.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Energy {
    /// `½ · v · J`, joules when the inputs are SI.
    SingleShot(f64),
    /// `Σ F² / fs`, N²·s.
    Streaming(f64),
}

impl Energy {
    pub fn value(&self) -> f64 {
        match *self {
            Energy::SingleShot(v) | Energy::Streaming(v) => v,
        }
    }
}
