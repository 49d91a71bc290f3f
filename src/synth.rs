//! Deterministic synthetic captures, used by `simulate` and by tests.

use std::f64::consts::PI;

use ndarray::{Array1, Array2};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::analysis::{AnalysisError, Capture, CaptureLayout, EstimationError, FormatError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PulseShape {
    Rectangular,
    HalfSine,
}

/// One impact added on top of a channel's baseline, in ADC counts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pulse {
    pub channel: usize,
    pub start_s: f64,
    pub duration_s: f64,
    pub amplitude: f64,
    pub shape: PulseShape,
}

impl Pulse {
    fn value_at(&self, t: f64) -> f64 {
        let phase = (t - self.start_s) / self.duration_s;
        if !(0.0..1.0).contains(&phase) {
            return 0.0;
        }
        match self.shape {
            PulseShape::Rectangular => self.amplitude,
            PulseShape::HalfSine => self.amplitude * (PI * phase).sin(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticCapture {
    pub layout: CaptureLayout,
    pub sample_rate_hz: f64,
    pub duration_s: f64,
    /// ADC value at rest.
    pub baseline: f64,
    /// Peak noise excursion, counts.
    pub noise: f64,
    pub pulses: Vec<Pulse>,
    pub seed: u64,
}

impl Default for SyntheticCapture {
    fn default() -> Self {
        Self {
            layout: CaptureLayout::default(),
            sample_rate_hz: 10_000.0,
            duration_s: 1.0,
            baseline: 512.0,
            noise: 2.0,
            pulses: vec![Pulse {
                channel: 0,
                start_s: 0.5,
                duration_s: 0.002,
                amplitude: 400.0,
                shape: PulseShape::HalfSine,
            }],
            seed: 7,
        }
    }
}

impl SyntheticCapture {
    pub fn record_count(&self) -> usize {
        (self.duration_s * self.sample_rate_hz).round().max(0.0) as usize
    }

    pub fn generate(&self) -> Result<Capture, AnalysisError> {
        let fs = self.sample_rate_hz;
        if !(fs > 0.0 && fs.is_finite()) {
            return Err(EstimationError::InvalidSampleRate(fs).into());
        }
        let channels = self.layout.channels();
        if channels == 0 {
            return Err(FormatError::InvalidLayout.into());
        }
        if let Some(pulse) = self.pulses.iter().find(|p| p.channel >= channels) {
            return Err(AnalysisError::ChannelOutOfRange {
                index: pulse.channel,
                available: channels,
            });
        }

        let records = self.record_count();
        let last_us = (records as f64 * 1e6 / fs).round();
        if last_us > i32::MAX as f64 {
            return Err(FormatError::Shape(format!(
                "{:.0} µs does not fit the 32-bit timestamp column",
                last_us
            ))
            .into());
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut values = Array2::<i32>::zeros((records, channels));
        let mut timestamps = Vec::with_capacity(records);
        for i in 0..records {
            let t = i as f64 / fs;
            timestamps.push((t * 1e6).round() as i32);
            for ch in 0..channels {
                let signal: f64 = self
                    .pulses
                    .iter()
                    .filter(|p| p.channel == ch)
                    .map(|p| p.value_at(t))
                    .sum();
                values[[i, ch]] = (self.baseline + signal + self.sample_noise(&mut rng)).round() as i32;
            }
        }
        Capture::from_parts(
            self.layout.channel_labels.clone(),
            values,
            Array1::from(timestamps),
        )
    }

    /// Mean of three uniform draws: bell-shaped and bounded by `±noise`.
    fn sample_noise(&self, rng: &mut StdRng) -> f64 {
        if self.noise <= 0.0 {
            return 0.0;
        }
        let sum: f64 = (0..3).map(|_| rng.gen_range(-1.0..1.0)).sum();
        self.noise * sum / 3.0
    }
}
