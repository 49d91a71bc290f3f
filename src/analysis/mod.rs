// src/analysis/mod.rs
// Numeric core: decoding, rate estimation, spectra, detection, integration.
pub mod capture;
pub mod error;
pub mod event;
pub mod fft;
pub mod impulse;
pub mod peaks;
pub mod plot;
pub mod rate;
pub mod stft;
pub mod threshold;

pub use capture::{read_capture, write_capture, Capture, CaptureLayout, ChannelTrace};
pub use error::{AnalysisError, EstimationError, FormatError};
pub use event::{ImpactEvent, PulseTiming};
pub use fft::{magnitude_spectrum, FrequencyLimit, Spectrum, SpectrumConfig};
pub use impulse::{
    impulse, single_shot_energy, streaming_signal_energy, Energy, TimeBase,
};
pub use peaks::{detect_impacts, find_peaks, PeakConfig};
pub use plot::{
    render_spectrogram_png, render_spectrum_png, render_trace_png, PlotStyle, TraceOverlay,
};
pub use rate::{estimate_sampling_rate, instantaneous_rates, mean_rate};
pub use stft::{spectrogram, DisplayRange, SegmentPlan, Spectrogram, StftConfig, Window};
pub use threshold::{detect_impact, Baseline, Detection, ThresholdConfig};
