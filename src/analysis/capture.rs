use std::fs;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use ndarray::{s, Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::analysis::error::{AnalysisError, FormatError};

/// Bytes per stored value (little-endian `i32`).
pub const WORD_BYTES: usize = 4;

/// Timestamp column unit conversion (µs → s).
pub const MICROS_TO_SECONDS: f64 = 1e-6;

/// Column layout of a capture file: one column per ADC channel followed by
/// a single timestamp column in microseconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureLayout {
    pub channel_labels: Vec<String>,
}

impl CaptureLayout {
    pub fn with_channels(channels: usize) -> Self {
        Self {
            channel_labels: (0..channels).map(|i| format!("ch_{i}")).collect(),
        }
    }

    pub fn channels(&self) -> usize {
        self.channel_labels.len()
    }

    /// Values per record, timestamp included.
    pub fn stride(&self) -> usize {
        self.channels() + 1
    }

    pub fn stride_bytes(&self) -> usize {
        self.stride() * WORD_BYTES
    }
}

impl Default for CaptureLayout {
    fn default() -> Self {
        // Teensy logger wiring: ADC pins 15, 17, 19, 21, 23.
        Self {
            channel_labels: [15, 17, 19, 21, 23]
                .iter()
                .map(|pin| format!("adc_{pin}"))
                .collect(),
        }
    }
}

/// Decoded capture, immutable once built.
#[derive(Clone, Debug)]
pub struct Capture {
    pub channel_labels: Vec<String>,
    pub channels: Array2<i32>, // records x channels
    pub timestamps_us: Array1<i32>,
}

impl Capture {
    /// Decodes a raw record stream. The length is checked against the record
    /// stride before anything is reshaped; an empty buffer yields zero records.
    pub fn decode(bytes: &[u8], layout: &CaptureLayout) -> Result<Self, AnalysisError> {
        if layout.channels() == 0 {
            return Err(FormatError::InvalidLayout.into());
        }
        let stride = layout.stride();
        let stride_bytes = layout.stride_bytes();
        if bytes.len() % stride_bytes != 0 {
            return Err(FormatError::MisalignedLength {
                len: bytes.len(),
                stride_bytes,
            }
            .into());
        }
        let mut values = vec![0i32; bytes.len() / WORD_BYTES];
        let mut reader = bytes;
        reader.read_i32_into::<LittleEndian>(&mut values)?;
        let records = values.len() / stride;
        let table = Array2::from_shape_vec((records, stride), values)
            .map_err(|e| FormatError::Shape(e.to_string()))?;
        let channel_count = layout.channels();
        Ok(Self {
            channel_labels: layout.channel_labels.clone(),
            channels: table.slice(s![.., ..channel_count]).to_owned(),
            timestamps_us: table.column(channel_count).to_owned(),
        })
    }

    /// Builds a capture from already-split columns.
    pub fn from_parts(
        channel_labels: Vec<String>,
        channels: Array2<i32>,
        timestamps_us: Array1<i32>,
    ) -> Result<Self, AnalysisError> {
        if channels.ncols() == 0 || channels.ncols() != channel_labels.len() {
            return Err(FormatError::InvalidLayout.into());
        }
        if channels.nrows() != timestamps_us.len() {
            return Err(FormatError::Shape(format!(
                "{} channel rows vs {} timestamps",
                channels.nrows(),
                timestamps_us.len()
            ))
            .into());
        }
        Ok(Self {
            channel_labels,
            channels,
            timestamps_us,
        })
    }

    /// Serializes back into the on-disk record layout.
    pub fn encode(&self) -> Vec<u8> {
        let stride = self.channel_count() + 1;
        let mut values = Vec::with_capacity(self.record_count() * stride);
        for (row, &ts) in self.channels.rows().into_iter().zip(self.timestamps_us.iter()) {
            values.extend(row.iter().copied());
            values.push(ts);
        }
        let mut out = vec![0u8; values.len() * WORD_BYTES];
        LittleEndian::write_i32_into(&values, &mut out);
        out
    }

    pub fn record_count(&self) -> usize {
        self.timestamps_us.len()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.record_count() == 0
    }

    pub fn layout(&self) -> CaptureLayout {
        CaptureLayout {
            channel_labels: self.channel_labels.clone(),
        }
    }

    /// Timestamp column converted to seconds.
    pub fn time_seconds(&self) -> Vec<f64> {
        self.timestamps_us
            .iter()
            .map(|&us| us as f64 * MICROS_TO_SECONDS)
            .collect()
    }

    /// Extracts one channel paired with the shared time axis.
    pub fn trace(&self, index: usize) -> Result<ChannelTrace, AnalysisError> {
        if index >= self.channel_count() {
            return Err(AnalysisError::ChannelOutOfRange {
                index,
                available: self.channel_count(),
            });
        }
        Ok(ChannelTrace {
            label: self.channel_labels[index].clone(),
            time_s: self.time_seconds(),
            samples: self.channels.column(index).iter().map(|&v| v as f64).collect(),
        })
    }
}

/// One column of a capture with its time axis in seconds.
#[derive(Clone, Debug)]
pub struct ChannelTrace {
    pub label: String,
    pub time_s: Vec<f64>,
    pub samples: Vec<f64>,
}

impl ChannelTrace {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_seconds(&self) -> f64 {
        match (self.time_s.first(), self.time_s.last()) {
            (Some(first), Some(last)) => last - first,
            _ => 0.0,
        }
    }
}

pub fn read_capture(path: impl AsRef<Path>, layout: &CaptureLayout) -> Result<Capture, AnalysisError> {
    let bytes = fs::read(path)?;
    Capture::decode(&bytes, layout)
}

pub fn write_capture(path: impl AsRef<Path>, capture: &Capture) -> Result<(), AnalysisError> {
    fs::write(path, capture.encode())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_bytes(records: &[[i32; 6]]) -> Vec<u8> {
        records
            .iter()
            .flat_map(|r| r.iter().flat_map(|v| v.to_le_bytes()))
            .collect()
    }

    #[test]
    fn decode_splits_channels_and_timestamps() {
        let bytes = record_bytes(&[[1, 2, 3, 4, 5, 1000], [6, 7, 8, 9, 10, 2000]]);
        let capture = Capture::decode(&bytes, &CaptureLayout::default()).unwrap();
        assert_eq!(capture.record_count(), 2);
        assert_eq!(capture.channels.nrows(), capture.timestamps_us.len());
        assert_eq!(capture.channels[[1, 4]], 10);
        assert_eq!(capture.timestamps_us[1], 2000);
        let trace = capture.trace(0).unwrap();
        assert_eq!(trace.samples, vec![1.0, 6.0]);
        assert!((trace.time_s[1] - 0.002).abs() < 1e-12);
        assert_eq!(trace.label, "adc_15");
    }

    #[test]
    fn misaligned_lengths_are_format_errors() {
        let layout = CaptureLayout::default();
        for len in [1usize, 4, 20, 23, 25, 47] {
            let err = Capture::decode(&vec![0u8; len], &layout).unwrap_err();
            assert!(matches!(
                err,
                AnalysisError::Format(FormatError::MisalignedLength { .. })
            ));
        }
        for records in [0usize, 1, 3] {
            let capture = Capture::decode(&vec![0u8; records * 24], &layout).unwrap();
            assert_eq!(capture.channels.nrows(), capture.timestamps_us.len());
            assert_eq!(capture.record_count(), records);
        }
    }

    #[test]
    fn empty_buffer_is_zero_records() {
        let capture = Capture::decode(&[], &CaptureLayout::default()).unwrap();
        assert!(capture.is_empty());
        assert!(capture.trace(2).unwrap().is_empty());
    }

    #[test]
    fn encode_reproduces_original_bytes() {
        let bytes = record_bytes(&[
            [-5, i32::MAX, 0, 17, i32::MIN, 123_456],
            [3, 2, 1, 0, -1, 123_656],
            [9, 9, 9, 9, 9, 123_856],
        ]);
        let capture = Capture::decode(&bytes, &CaptureLayout::default()).unwrap();
        assert_eq!(capture.encode(), bytes);
    }

    #[test]
    fn encode_interleaves_channels_before_timestamp() {
        let channels = Array2::from_shape_vec((2, 2), vec![1, -2, 3, -4]).unwrap();
        let capture = Capture::from_parts(
            vec!["a".into(), "b".into()],
            channels,
            Array1::from(vec![100, 200]),
        )
        .unwrap();
        let bytes = capture.encode();
        assert_eq!(bytes.len(), 2 * 3 * WORD_BYTES);
        let words: Vec<i32> = bytes
            .chunks_exact(WORD_BYTES)
            .map(|w| i32::from_le_bytes([w[0], w[1], w[2], w[3]]))
            .collect();
        assert_eq!(words, [1, -2, 100, 3, -4, 200]);
        assert!(Capture::decode(&[], &CaptureLayout::with_channels(2))
            .unwrap()
            .encode()
            .is_empty());
    }

    #[test]
    fn trace_rejects_unknown_channel() {
        let capture = Capture::decode(&[], &CaptureLayout::with_channels(2)).unwrap();
        assert!(matches!(
            capture.trace(2),
            Err(AnalysisError::ChannelOutOfRange { index: 2, available: 2 })
        ));
    }

    #[test]
    fn zero_channel_layout_is_rejected() {
        let layout = CaptureLayout {
            channel_labels: vec![],
        };
        assert!(matches!(
            Capture::decode(&[0u8; 4], &layout),
            Err(AnalysisError::Format(FormatError::InvalidLayout))
        ));
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data_1.bin");
        let bytes = record_bytes(&[[1, 2, 3, 4, 5, 10], [1, 2, 3, 4, 5, 20]]);
        let capture = Capture::decode(&bytes, &CaptureLayout::default()).unwrap();
        write_capture(&path, &capture).unwrap();
        let back = read_capture(&path, &CaptureLayout::default()).unwrap();
        assert_eq!(back.channels, capture.channels);
        assert_eq!(back.timestamps_us, capture.timestamps_us);
    }
}
