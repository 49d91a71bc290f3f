use thiserror::Error;

/// Malformed or misaligned binary capture input.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("capture layout needs at least one channel column")]
    InvalidLayout,
    #[error("capture length {len} bytes is not a multiple of the {stride_bytes}-byte record stride")]
    MisalignedLength { len: usize, stride_bytes: usize },
    #[error("failed to reshape capture: {0}")]
    Shape(String),
}

/// Not enough (or not usable) data to derive a rate or a threshold.
#[derive(Debug, Error)]
pub enum EstimationError {
    #[error("need at least 2 time samples, got {0}")]
    TooFewSamples(usize),
    #[error("time axis is not strictly increasing at step {index} ({step} s)")]
    NonIncreasingTime { index: usize, step: f64 },
    #[error("median time step {0} s cannot be used to derive a sampling rate")]
    InvalidTimeStep(f64),
    #[error("sample rate must be positive and finite, got {0}")]
    InvalidSampleRate(f64),
    #[error("time axis has {time} samples but the trace has {samples}")]
    LengthMismatch { time: usize, samples: usize },
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Estimation(#[from] EstimationError),
    #[error("channel {index} out of range ({available} channels in capture)")]
    ChannelOutOfRange { index: usize, available: usize },
    #[error("capture i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to render plot: {0}")]
    Plot(String),
}

impl<E: std::error::Error + Send + Sync + 'static> From<plotters::drawing::DrawingAreaErrorKind<E>>
    for AnalysisError
{
    fn from(value: plotters::drawing::DrawingAreaErrorKind<E>) -> Self {
        AnalysisError::Plot(format!("{value:?}"))
    }
}

impl From<image::ImageError> for AnalysisError {
    fn from(value: image::ImageError) -> Self {
        AnalysisError::Plot(value.to_string())
    }
}
