use rustfft::{num_complex::Complex64, FftPlanner};
use serde::{Deserialize, Serialize};

use crate::analysis::error::EstimationError;
use crate::analysis::rate::validate_sample_rate;

/// Single-sided magnitude spectrum of one trace.
#[derive(Clone, Debug)]
pub struct Spectrum {
    pub sample_rate_hz: f64,
    /// Length of the transformed trace.
    pub n: usize,
    pub frequencies_hz: Vec<f64>,
    pub magnitudes: Vec<f64>,
}

impl Spectrum {
    pub fn bin_width_hz(&self) -> f64 {
        self.sample_rate_hz / self.n as f64
    }

    pub fn nyquist_hz(&self) -> f64 {
        self.sample_rate_hz / 2.0
    }

    /// Frequency of the largest magnitude bin.
    pub fn dominant_frequency(&self) -> Option<f64> {
        argmax(&self.magnitudes).map(|i| self.frequencies_hz[i])
    }

    /// Keeps the bins at or below `max_hz`.
    pub fn crop(&self, max_hz: f64) -> Spectrum {
        let keep = self
            .frequencies_hz
            .iter()
            .take_while(|&&f| f <= max_hz)
            .count();
        Spectrum {
            sample_rate_hz: self.sample_rate_hz,
            n: self.n,
            frequencies_hz: self.frequencies_hz[..keep].to_vec(),
            magnitudes: self.magnitudes[..keep].to_vec(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrumConfig {
    /// Subtract the trace mean before transforming.
    pub detrend: bool,
    /// `None` → Nyquist, `(0, 1)` → fraction of Nyquist, otherwise Hz.
    pub frequency_limit: Option<f64>,
}

impl Default for SpectrumConfig {
    fn default() -> Self {
        Self {
            detrend: true,
            frequency_limit: None,
        }
    }
}

/// Upper display bound of a frequency axis.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FrequencyLimit {
    Nyquist,
    FractionOfNyquist(f64),
    Absolute(f64),
}

impl FrequencyLimit {
    pub fn from_setting(setting: Option<f64>) -> Self {
        match setting {
            None => FrequencyLimit::Nyquist,
            Some(x) if x > 0.0 && x < 1.0 => FrequencyLimit::FractionOfNyquist(x),
            Some(x) => FrequencyLimit::Absolute(x),
        }
    }

    /// Concrete bound in Hz, never above Nyquist.
    pub fn resolve(&self, sample_rate_hz: f64) -> f64 {
        let nyquist = sample_rate_hz / 2.0;
        match *self {
            FrequencyLimit::Nyquist => nyquist,
            FrequencyLimit::FractionOfNyquist(fraction) => fraction * nyquist,
            FrequencyLimit::Absolute(hz) => hz.clamp(0.0, nyquist),
        }
    }
}

/// Removes the arithmetic mean.
pub fn detrend(samples: &[f64]) -> Vec<f64> {
    if samples.is_empty() {
        return Vec::new();
    }
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    samples.iter().map(|v| v - mean).collect()
}

/// One-sided DFT magnitude over the whole trace, normalized by `N`.
///
/// Returns `Ok(None)` for an empty trace.
pub fn magnitude_spectrum(
    samples: &[f64],
    sample_rate_hz: f64,
    detrend_mean: bool,
) -> Result<Option<Spectrum>, EstimationError> {
    let sample_rate_hz = validate_sample_rate(sample_rate_hz)?;
    let n = samples.len();
    if n == 0 {
        return Ok(None);
    }
    let input = if detrend_mean {
        detrend(samples)
    } else {
        samples.to_vec()
    };
    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(n);
    let mut buffer: Vec<Complex64> = input.iter().map(|&v| Complex64::new(v, 0.0)).collect();
    fft.process(&mut buffer);

    let bins = n / 2 + 1;
    let frequencies_hz = (0..bins)
        .map(|k| k as f64 * sample_rate_hz / n as f64)
        .collect();
    let magnitudes = buffer
        .iter()
        .take(bins)
        .map(|c| c.norm() / n as f64)
        .collect();
    Ok(Some(Spectrum {
        sample_rate_hz,
        n,
        frequencies_hz,
        magnitudes,
    }))
}

pub(crate) fn argmax(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn sinusoid_peak_lands_on_its_bin() {
        let fs = 5000.0;
        let n = 5000;
        let f0 = 100.0;
        let samples: Vec<f64> = (0..n)
            .map(|i| (2.0 * PI * f0 * i as f64 / fs).sin())
            .collect();
        let spectrum = magnitude_spectrum(&samples, fs, true).unwrap().unwrap();
        assert_eq!(spectrum.frequencies_hz.len(), spectrum.magnitudes.len());
        assert_eq!(spectrum.magnitudes.len(), n / 2 + 1);
        let peak = spectrum.dominant_frequency().unwrap();
        assert!((peak - f0).abs() <= spectrum.bin_width_hz());
        // Unit sine → |X|/N = 0.5 at the tone bin.
        let idx = (f0 / spectrum.bin_width_hz()).round() as usize;
        assert!((spectrum.magnitudes[idx] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn detrend_removes_dc_bin() {
        let samples = vec![10.0; 64];
        let raw = magnitude_spectrum(&samples, 1000.0, false).unwrap().unwrap();
        assert!((raw.magnitudes[0] - 10.0).abs() < 1e-9);
        let flat = magnitude_spectrum(&samples, 1000.0, true).unwrap().unwrap();
        assert!(flat.magnitudes.iter().all(|m| m.abs() < 1e-12));
    }

    #[test]
    fn empty_trace_is_no_data() {
        assert!(magnitude_spectrum(&[], 1000.0, true).unwrap().is_none());
    }

    #[test]
    fn invalid_rate_is_rejected() {
        assert!(magnitude_spectrum(&[1.0, 2.0], 0.0, true).is_err());
        assert!(magnitude_spectrum(&[1.0, 2.0], f64::NAN, true).is_err());
    }

    #[test]
    fn frequency_limit_resolution() {
        let fs = 10_000.0;
        assert_eq!(FrequencyLimit::from_setting(None).resolve(fs), 5000.0);
        assert_eq!(FrequencyLimit::from_setting(Some(0.5)).resolve(fs), 2500.0);
        assert_eq!(FrequencyLimit::from_setting(Some(1200.0)).resolve(fs), 1200.0);
        assert_eq!(FrequencyLimit::from_setting(Some(9000.0)).resolve(fs), 5000.0);
        assert_eq!(FrequencyLimit::from_setting(Some(1.0)).resolve(fs), 1.0);
    }

    #[test]
    fn crop_keeps_bins_below_limit() {
        let samples: Vec<f64> = (0..100).map(|i| (i % 7) as f64).collect();
        let spectrum = magnitude_spectrum(&samples, 100.0, true).unwrap().unwrap();
        let cropped = spectrum.crop(20.0);
        assert_eq!(cropped.frequencies_hz.last().copied(), Some(20.0));
        assert_eq!(cropped.frequencies_hz.len(), cropped.magnitudes.len());
    }
}
