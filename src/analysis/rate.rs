use crate::analysis::error::EstimationError;

/// Effective sampling frequency (Hz) of a time axis in seconds.
///
/// Uses the reciprocal of the median step so that isolated jitter or a
/// dropped record does not bias the estimate. Every step must still be
/// strictly positive and finite.
pub fn estimate_sampling_rate(time_s: &[f64]) -> Result<f64, EstimationError> {
    let steps = time_steps(time_s)?;
    let dt = median(&steps);
    if !dt.is_finite() || dt <= 0.0 {
        return Err(EstimationError::InvalidTimeStep(dt));
    }
    Ok(1.0 / dt)
}

/// Validated consecutive differences of a strictly increasing time axis.
pub fn time_steps(time_s: &[f64]) -> Result<Vec<f64>, EstimationError> {
    if time_s.len() < 2 {
        return Err(EstimationError::TooFewSamples(time_s.len()));
    }
    time_s
        .windows(2)
        .enumerate()
        .map(|(index, pair)| {
            let step = pair[1] - pair[0];
            if step.is_finite() && step > 0.0 {
                Ok(step)
            } else {
                Err(EstimationError::NonIncreasingTime { index, step })
            }
        })
        .collect()
}

/// Per-interval rate `1 / Δt`, useful to spot acquisition stalls.
pub fn instantaneous_rates(time_s: &[f64]) -> Result<Vec<f64>, EstimationError> {
    Ok(time_steps(time_s)?.into_iter().map(|dt| 1.0 / dt).collect())
}

/// Arithmetic mean of the instantaneous rates.
pub fn mean_rate(time_s: &[f64]) -> Result<f64, EstimationError> {
    let rates = instantaneous_rates(time_s)?;
    Ok(rates.iter().sum::<f64>() / rates.len() as f64)
}

pub(crate) fn validate_sample_rate(sample_rate_hz: f64) -> Result<f64, EstimationError> {
    if sample_rate_hz.is_finite() && sample_rate_hz > 0.0 {
        Ok(sample_rate_hz)
    } else {
        Err(EstimationError::InvalidSampleRate(sample_rate_hz))
    }
}

/// Median with midpoint averaging for even lengths. NaN for empty input.
pub(crate) fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        0.5 * (sorted[mid - 1] + sorted[mid])
    } else {
        sorted[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_millisecond_steps_give_1khz() {
        let time: Vec<f64> = (0..500).map(|i| i as f64 / 1000.0).collect();
        let fs = estimate_sampling_rate(&time).unwrap();
        assert!((fs - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn median_ignores_a_dropped_record() {
        let mut time: Vec<f64> = (0..100).map(|i| i as f64 * 2e-4).collect();
        time.remove(50);
        let fs = estimate_sampling_rate(&time).unwrap();
        assert!((fs - 5000.0).abs() < 1e-6);
        assert!(mean_rate(&time).unwrap() < 5000.0 + 1e-6);
    }

    #[test]
    fn non_monotonic_pair_is_rejected() {
        let mut time: Vec<f64> = (0..20).map(|i| i as f64 * 1e-3).collect();
        time.swap(7, 8);
        assert!(matches!(
            estimate_sampling_rate(&time),
            Err(EstimationError::NonIncreasingTime { index: 7, .. })
        ));
    }

    #[test]
    fn too_short_or_non_finite_axes_fail() {
        assert!(matches!(
            estimate_sampling_rate(&[0.5]),
            Err(EstimationError::TooFewSamples(1))
        ));
        assert!(matches!(
            estimate_sampling_rate(&[]),
            Err(EstimationError::TooFewSamples(0))
        ));
        assert!(estimate_sampling_rate(&[0.0, f64::NAN, 1.0]).is_err());
    }

    #[test]
    fn median_handles_even_lengths() {
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert!(median(&[]).is_nan());
    }

    #[test]
    fn instantaneous_rates_follow_steps() {
        let rates = instantaneous_rates(&[0.0, 0.001, 0.003]).unwrap();
        assert!((rates[0] - 1000.0).abs() < 1e-9);
        assert!((rates[1] - 500.0).abs() < 1e-9);
    }
}
