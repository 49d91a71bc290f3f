use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analysis::{CaptureLayout, PeakConfig, SpectrumConfig, StftConfig, ThresholdConfig};
use crate::transport::TransportTimeouts;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Every tunable of the pipeline. Missing fields in a file take their
/// defaults.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub layout: CaptureLayout,
    /// Channel analysed by single-channel commands.
    pub channel: usize,
    pub spectrum: SpectrumConfig,
    pub stft: StftConfig,
    pub threshold: ThresholdConfig,
    pub peaks: PeakConfig,
    pub transport: TransportTimeouts,
}

impl AnalysisConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let channels = self.layout.channels();
        if channels == 0 {
            return invalid("layout.channel_labels must not be empty");
        }
        if self.channel >= channels {
            return invalid(format!(
                "channel {} out of range for {channels}-channel layout",
                self.channel
            ));
        }

        let stft = &self.stft;
        if !(stft.window_seconds > 0.0 && stft.window_seconds.is_finite()) {
            return invalid("stft.window_seconds must be positive");
        }
        if !(0.0..1.0).contains(&stft.overlap) {
            return invalid("stft.overlap must be in [0, 1)");
        }
        if stft.min_segment < 2 || stft.min_segment > stft.max_segment {
            return invalid("stft segment bounds must satisfy 2 <= min_segment <= max_segment");
        }
        if !(stft.db_range > 0.0) {
            return invalid("stft.db_range must be positive");
        }

        let th = &self.threshold;
        for (name, value) in [
            ("threshold.k_threshold", th.k_threshold),
            ("threshold.baseline_ms", th.baseline_ms),
            ("threshold.noise_floor", th.noise_floor),
            ("threshold.adc_to_force", th.adc_to_force),
        ] {
            positive(name, value)?;
        }
        if !(th.margin_ms >= 0.0) {
            return invalid("threshold.margin_ms must not be negative");
        }
        if let Some(end) = th.end {
            if end < th.start {
                return invalid("threshold.end must not precede threshold.start");
            }
        }

        let peaks = &self.peaks;
        positive("peaks.relative_threshold", peaks.relative_threshold)?;
        positive("peaks.sensitivity", peaks.sensitivity)?;
        for (name, value) in [
            ("peaks.min_separation_s", peaks.min_separation_s),
            ("peaks.pre_ms", peaks.pre_ms),
            ("peaks.post_ms", peaks.post_ms),
        ] {
            if !(value >= 0.0 && value.is_finite()) {
                return invalid(format!("{name} must not be negative"));
            }
        }

        self.transport
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

fn positive(name: &str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        invalid(format!("{name} must be positive, got {value}"))
    }
}

fn invalid<T>(message: impl Into<String>) -> Result<T, ConfigError> {
    Err(ConfigError::Invalid(message.into()))
}
