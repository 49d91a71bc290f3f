use std::io::Cursor;

use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use plotters::prelude::*;

use crate::analysis::capture::ChannelTrace;
use crate::analysis::error::AnalysisError;
use crate::analysis::fft::Spectrum;
use crate::analysis::stft::{DisplayRange, Spectrogram};
use crate::analysis::threshold::Detection;

#[derive(Clone, Debug)]
pub struct PlotStyle {
    pub width: u32,
    pub height: u32,
    pub background: RGBColor,
    pub trace: RGBColor,
    pub marker: RGBColor,
}

impl Default for PlotStyle {
    fn default() -> Self {
        Self {
            width: 1200,
            height: 500,
            background: RGBColor(10, 10, 10),
            trace: CYAN,
            marker: RED,
        }
    }
}

/// Lines drawn over a trace: the detected interval and the baseline band.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TraceOverlay {
    /// Start and end of the impact, seconds.
    pub interval_s: Option<(f64, f64)>,
    pub baseline: Option<f64>,
    /// Half-width of the detection band around the baseline.
    pub threshold: Option<f64>,
}

impl TraceOverlay {
    pub fn from_detection(detection: &Detection, trace: &ChannelTrace) -> Self {
        let baseline = detection.baseline();
        Self {
            interval_s: detection
                .interval()
                .and_then(|(i0, i1)| Some((*trace.time_s.get(i0)?, *trace.time_s.get(i1)?))),
            baseline: baseline.map(|b| b.offset),
            threshold: baseline.map(|b| b.threshold),
        }
    }
}

pub fn render_trace_png(
    trace: &ChannelTrace,
    overlay: &TraceOverlay,
    style: &PlotStyle,
) -> Result<Vec<u8>, AnalysisError> {
    if trace.is_empty() {
        return Err(AnalysisError::Plot(format!("trace {} has no samples", trace.label)));
    }
    let mut buffer = vec![0u8; (style.width * style.height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (style.width, style.height))
            .into_drawing_area();
        root.fill(&style.background)?;

        let t0 = trace.time_s[0];
        let t1 = trace.time_s[trace.len() - 1].max(t0 + f64::EPSILON);
        let (y_min, y_max) = bounds(&trace.samples);

        let mut chart = ChartBuilder::on(&root)
            .margin(10)
            .caption(&trace.label, ("sans-serif", 20).into_font().color(&WHITE))
            .set_label_area_size(LabelAreaPosition::Left, 60)
            .set_label_area_size(LabelAreaPosition::Bottom, 40)
            .build_cartesian_2d(t0..t1, y_min..y_max)?;
        chart
            .configure_mesh()
            .x_desc("time (s)")
            .y_desc("ADC")
            .label_style(("sans-serif", 12).into_font().color(&WHITE))
            .light_line_style(&WHITE.mix(0.1))
            .draw()?;
        chart.draw_series(LineSeries::new(
            trace.time_s.iter().copied().zip(trace.samples.iter().copied()),
            &style.trace,
        ))?;

        if let Some(base) = overlay.baseline {
            let mut levels = vec![(base, style.marker.mix(0.6))];
            if let Some(th) = overlay.threshold {
                levels.push((base + th, style.marker.mix(0.3)));
                levels.push((base - th, style.marker.mix(0.3)));
            }
            for (level, color) in levels {
                chart.draw_series(LineSeries::new(vec![(t0, level), (t1, level)], &color))?;
            }
        }
        if let Some((start, end)) = overlay.interval_s {
            for t in [start, end] {
                chart.draw_series(LineSeries::new(
                    vec![(t, y_min), (t, y_max)],
                    style.marker.stroke_width(2),
                ))?;
            }
        }
        root.present()?;
    }
    encode_png(&buffer, style.width, style.height)
}

pub fn render_spectrum_png(
    spectrum: &Spectrum,
    title: &str,
    style: &PlotStyle,
) -> Result<Vec<u8>, AnalysisError> {
    if spectrum.magnitudes.is_empty() {
        return Err(AnalysisError::Plot("spectrum has no magnitudes".into()));
    }
    let mut buffer = vec![0u8; (style.width * style.height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (style.width, style.height))
            .into_drawing_area();
        root.fill(&style.background)?;
        let f_max = spectrum
            .frequencies_hz
            .last()
            .copied()
            .unwrap_or(0.0)
            .max(f64::EPSILON);
        let m_max = spectrum
            .magnitudes
            .iter()
            .copied()
            .fold(0.0f64, f64::max)
            .max(1e-9);
        let mut chart = ChartBuilder::on(&root)
            .margin(10)
            .caption(title, ("sans-serif", 20).into_font().color(&WHITE))
            .set_label_area_size(LabelAreaPosition::Left, 60)
            .set_label_area_size(LabelAreaPosition::Bottom, 40)
            .build_cartesian_2d(0f64..f_max, 0f64..m_max * 1.05)?;
        chart
            .configure_mesh()
            .x_desc("frequency (Hz)")
            .y_desc("|X|")
            .label_style(("sans-serif", 12).into_font().color(&WHITE))
            .light_line_style(&WHITE.mix(0.1))
            .draw()?;
        chart.draw_series(LineSeries::new(
            spectrum
                .frequencies_hz
                .iter()
                .copied()
                .zip(spectrum.magnitudes.iter().copied()),
            &style.trace,
        ))?;
        root.present()?;
    }
    encode_png(&buffer, style.width, style.height)
}

/// Heat map of the dB matrix, clipped to `range`.
pub fn render_spectrogram_png(
    spectrogram: &Spectrogram,
    range: DisplayRange,
    title: &str,
    style: &PlotStyle,
) -> Result<Vec<u8>, AnalysisError> {
    if spectrogram.num_frames() == 0 || spectrogram.num_bins() == 0 {
        return Err(AnalysisError::Plot("spectrogram is empty".into()));
    }
    let mut buffer = vec![0u8; (style.width * style.height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (style.width, style.height))
            .into_drawing_area();
        root.fill(&style.background)?;

        let half_step = spectrogram.plan.step() as f64 / spectrogram.sample_rate_hz / 2.0;
        let bin_width = spectrogram.sample_rate_hz / spectrogram.plan.nfft as f64;
        let t0 = spectrogram.times_s[0] - half_step;
        let t1 = spectrogram.times_s[spectrogram.num_frames() - 1] + half_step;
        let f1 = spectrogram.frequencies_hz[spectrogram.num_bins() - 1] + bin_width;

        let mut chart = ChartBuilder::on(&root)
            .margin(10)
            .caption(title, ("sans-serif", 20).into_font().color(&WHITE))
            .set_label_area_size(LabelAreaPosition::Left, 60)
            .set_label_area_size(LabelAreaPosition::Bottom, 40)
            .build_cartesian_2d(t0..t1, 0f64..f1)?;
        chart
            .configure_mesh()
            .disable_mesh()
            .x_desc("time (s)")
            .y_desc("frequency (Hz)")
            .label_style(("sans-serif", 12).into_font().color(&WHITE))
            .draw()?;

        // At most one cell per pixel in each direction.
        let frame_step = (spectrogram.num_frames() / style.width as usize).max(1);
        let bin_step = (spectrogram.num_bins() / style.height as usize).max(1);
        let span = (range.max_db - range.min_db).max(f64::EPSILON);
        let cells = (0..spectrogram.num_frames())
            .step_by(frame_step)
            .flat_map(|k| {
                (0..spectrogram.num_bins())
                    .step_by(bin_step)
                    .map(move |b| (k, b))
            })
            .map(|(k, b)| {
                let t = spectrogram.times_s[k];
                let f = spectrogram.frequencies_hz[b];
                let db = spectrogram.magnitudes_db[k][b].clamp(range.min_db, range.max_db);
                let level = (db - range.min_db) / span;
                let x_half = half_step * frame_step as f64;
                Rectangle::new(
                    [(t - x_half, f), (t + x_half, f + bin_width * bin_step as f64)],
                    heat_color(level).filled(),
                )
            });
        chart.draw_series(cells)?;
        root.present()?;
    }
    encode_png(&buffer, style.width, style.height)
}

/// Blue (0) to red (1).
fn heat_color(level: f64) -> HSLColor {
    HSLColor((1.0 - level.clamp(0.0, 1.0)) * 0.66, 1.0, 0.2 + 0.3 * level.clamp(0.0, 1.0))
}

fn bounds(values: &[f64]) -> (f64, f64) {
    let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !lo.is_finite() || !hi.is_finite() || (hi - lo).abs() < f64::EPSILON {
        let mid = if lo.is_finite() { lo } else { 0.0 };
        return (mid - 1.0, mid + 1.0);
    }
    let pad = (hi - lo) * 0.05;
    (lo - pad, hi + pad)
}

fn encode_png(buffer: &[u8], width: u32, height: u32) -> Result<Vec<u8>, AnalysisError> {
    let image = ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, buffer.to_vec())
        .ok_or_else(|| AnalysisError::Plot("failed to allocate image buffer".into()))?;
    let mut output = Vec::new();
    let dynamic = DynamicImage::ImageRgb8(image);
    dynamic.write_to(&mut Cursor::new(&mut output), ImageFormat::Png)?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::fft::magnitude_spectrum;
    use crate::analysis::stft::{spectrogram, StftConfig};

    const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

    fn small_style() -> PlotStyle {
        PlotStyle {
            width: 320,
            height: 200,
            ..PlotStyle::default()
        }
    }

    fn tone(fs: f64, freq: f64, len: usize) -> Vec<f64> {
        (0..len)
            .map(|i| (2.0 * std::f64::consts::PI * freq * i as f64 / fs).sin())
            .collect()
    }

    #[test]
    fn flat_values_get_a_unit_band() {
        assert_eq!(bounds(&[3.0, 3.0]), (2.0, 4.0));
        let (lo, hi) = bounds(&[0.0, 10.0]);
        assert!(lo < 0.0 && hi > 10.0);
    }

    #[test]
    fn empty_inputs_are_rejected() {
        let trace = ChannelTrace {
            label: "adc_15".into(),
            time_s: Vec::new(),
            samples: Vec::new(),
        };
        assert!(matches!(
            render_trace_png(&trace, &TraceOverlay::default(), &PlotStyle::default()),
            Err(AnalysisError::Plot(_))
        ));
    }

    #[test]
    fn overlay_follows_detection_interval() {
        use crate::analysis::impulse::TimeBase;
        use crate::analysis::threshold::{detect_impact, ThresholdConfig};

        let fs = 1000.0;
        let samples: Vec<f64> = (0..400).map(|i| if (200..220).contains(&i) { 50.0 } else { 0.0 }).collect();
        let trace = ChannelTrace {
            label: "adc_15".into(),
            time_s: (0..400).map(|i| i as f64 / fs).collect(),
            samples,
        };
        let detection = detect_impact(&trace.samples, TimeBase::Uniform(fs), &ThresholdConfig::default()).unwrap();
        let overlay = TraceOverlay::from_detection(&detection, &trace);
        let (start, end) = overlay.interval_s.unwrap();
        assert!((start - 0.198).abs() < 1e-9);
        assert!((end - 0.221).abs() < 1e-9);
        assert_eq!(overlay.baseline, Some(0.0));
    }

    #[test]
    fn trace_renders_to_png() {
        let trace = ChannelTrace {
            label: "adc_15".into(),
            time_s: (0..100).map(|i| i as f64 * 1e-3).collect(),
            samples: (0..100).map(|i| if (40..50).contains(&i) { 30.0 } else { 1.0 }).collect(),
        };
        let overlay = TraceOverlay {
            interval_s: Some((0.039, 0.050)),
            baseline: Some(1.0),
            threshold: Some(0.5),
        };
        let png = render_trace_png(&trace, &overlay, &small_style()).unwrap();
        assert!(png.starts_with(PNG_SIGNATURE));
    }

    #[test]
    fn spectrum_renders_to_png() {
        let spectrum = magnitude_spectrum(&tone(1000.0, 50.0, 256), 1000.0, true)
            .unwrap()
            .unwrap();
        let png = render_spectrum_png(&spectrum, "adc_15 spectrum", &small_style()).unwrap();
        assert!(png.starts_with(PNG_SIGNATURE));
    }

    #[test]
    fn spectrogram_renders_to_png() {
        let fs = 20_000.0;
        let sg = spectrogram(&tone(fs, 1000.0, 2000), fs, &StftConfig::default())
            .unwrap()
            .unwrap();
        let range = sg.display_range(80.0).unwrap();
        let png = render_spectrogram_png(&sg, range, "adc_15 spectrogram", &small_style()).unwrap();
        assert!(png.starts_with(PNG_SIGNATURE));
    }
}
