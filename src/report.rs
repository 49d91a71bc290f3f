//! CSV outputs: the per-impact event table and a plain-text export of a
//! decoded capture.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use thiserror::Error;

use crate::analysis::{Capture, ImpactEvent};

pub const EVENT_HEADER: [&str; 9] = [
    "Impact",
    "Time_s",
    "Peak_Force_N",
    "Energy",
    "Impulse_Ns",
    "Impact_Duration_ms",
    "Rise_Time_ms",
    "Fall_Time_ms",
    "Dominant_Freq_Hz",
];

const MISSING: &str = "N/A";

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("csv write failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("report i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

/// One formatted row of the event table. Events without an index are
/// numbered by their position.
pub fn event_row(position: usize, event: &ImpactEvent) -> [String; 9] {
    let optional = |value: Option<f64>| value.map_or_else(|| MISSING.to_string(), |v| format!("{v:.1}"));
    [
        event.index.unwrap_or(position + 1).to_string(),
        format!("{:.4}", event.time_s),
        format!("{:.2}", event.peak_amplitude),
        format!("{:.4}", event.energy.value()),
        format!("{:.4}", event.impulse),
        format!("{:.1}", event.duration_ms),
        optional(event.rise_time_ms),
        optional(event.fall_time_ms),
        optional(event.dominant_frequency_hz),
    ]
}

pub fn write_events_csv<W: Write>(writer: W, events: &[ImpactEvent]) -> Result<(), ReportError> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(EVENT_HEADER)?;
    for (position, event) in events.iter().enumerate() {
        csv.write_record(event_row(position, event))?;
    }
    csv.flush()?;
    Ok(())
}

pub fn save_events_csv(path: impl AsRef<Path>, events: &[ImpactEvent]) -> Result<(), ReportError> {
    write_events_csv(File::create(path)?, events)
}

/// Channel columns, then `timestamp_us` and `time_s`.
pub fn write_capture_csv<W: Write>(writer: W, capture: &Capture) -> Result<(), ReportError> {
    let mut csv = csv::Writer::from_writer(writer);
    let mut header = capture.channel_labels.clone();
    header.push("timestamp_us".into());
    header.push("time_s".into());
    csv.write_record(&header)?;

    let time_s = capture.time_seconds();
    for ((row, &ts), t) in capture
        .channels
        .rows()
        .into_iter()
        .zip(capture.timestamps_us.iter())
        .zip(time_s)
    {
        let mut record: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        record.push(ts.to_string());
        record.push(format!("{t:.6}"));
        csv.write_record(&record)?;
    }
    csv.flush()?;
    Ok(())
}

pub fn save_capture_csv(path: impl AsRef<Path>, capture: &Capture) -> Result<(), ReportError> {
    write_capture_csv(File::create(path)?, capture)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Energy;
    use ndarray::{array, Array1};

    fn event(index: Option<usize>, rise: Option<f64>) -> ImpactEvent {
        ImpactEvent {
            index,
            start: 10,
            end: 20,
            peak_index: 15,
            time_s: 0.123_456,
            peak_amplitude: 98.767,
            baseline: 0.0,
            threshold: 1.0,
            impulse: 0.012_345_6,
            energy: Energy::Streaming(3.141_59),
            duration_ms: 4.26,
            rise_time_ms: rise,
            fall_time_ms: rise,
            dominant_frequency_hz: Some(250.04),
        }
    }

    #[test]
    fn event_table_uses_fixed_precision_and_na() {
        let mut out = Vec::new();
        write_events_csv(&mut out, &[event(Some(1), Some(2.04)), event(None, None)]).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "Impact,Time_s,Peak_Force_N,Energy,Impulse_Ns,Impact_Duration_ms,Rise_Time_ms,Fall_Time_ms,Dominant_Freq_Hz"
        );
        assert_eq!(lines[1], "1,0.1235,98.77,3.1416,0.0123,4.3,2.0,2.0,250.0");
        assert_eq!(lines[2], "2,0.1235,98.77,3.1416,0.0123,4.3,N/A,N/A,250.0");
    }

    #[test]
    fn capture_export_lists_labels_and_time() {
        let capture = Capture::from_parts(
            vec!["adc_15".into(), "adc_17".into()],
            array![[1, 2], [3, 4]],
            Array1::from(vec![0, 500]),
        )
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.csv");
        save_capture_csv(&path, &capture).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "adc_15,adc_17,timestamp_us,time_s");
        assert_eq!(lines[2], "3,4,500,0.000500");
    }
}
