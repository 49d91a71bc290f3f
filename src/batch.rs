//! Batch analysis over a folder of captures.
//!
//! Each file is decoded, rate-estimated and run through the threshold
//! detector on its own; a failing file is logged and recorded in the report
//! and the run moves on.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::analysis::{
    detect_impact, estimate_sampling_rate, read_capture, AnalysisError, Detection, ImpactEvent,
    TimeBase,
};
use crate::config::AnalysisConfig;

/// Result of analysing one capture file.
#[derive(Clone, Debug)]
pub struct FileAnalysis {
    pub records: usize,
    /// `None` for an empty capture.
    pub sample_rate_hz: Option<f64>,
    pub detection: Detection,
}

#[derive(Debug)]
pub enum FileOutcome {
    Analysed(FileAnalysis),
    Failed(AnalysisError),
}

#[derive(Debug)]
pub struct FileSummary {
    pub path: PathBuf,
    pub outcome: FileOutcome,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub files: Vec<FileSummary>,
}

impl BatchReport {
    pub fn analysed(&self) -> usize {
        self.files
            .iter()
            .filter(|f| matches!(f.outcome, FileOutcome::Analysed(_)))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.files.len() - self.analysed()
    }

    /// Detected events in file order, numbered 1.. across the whole batch.
    pub fn events(&self) -> Vec<(PathBuf, ImpactEvent)> {
        self.files
            .iter()
            .filter_map(|f| match &f.outcome {
                FileOutcome::Analysed(a) => a.detection.event().map(|e| (f.path.clone(), e.clone())),
                FileOutcome::Failed(_) => None,
            })
            .enumerate()
            .map(|(i, (path, mut event))| {
                event.index = Some(i + 1);
                (path, event)
            })
            .collect()
    }
}

/// Number embedded in a `data_<n>.bin` file name.
fn capture_number(path: &Path) -> Option<u64> {
    path.file_stem()?
        .to_str()?
        .strip_prefix("data_")?
        .parse()
        .ok()
}

/// `*.bin` files of `dir`, numbered captures first in numeric order, the
/// rest by name.
pub fn list_captures(dir: impl AsRef<Path>) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_bin = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("bin"));
        if path.is_file() && is_bin {
            files.push(path);
        }
    }
    files.sort_by_cached_key(|p| {
        let number = capture_number(p);
        (number.is_none(), number, p.file_name().map(|n| n.to_os_string()))
    });
    Ok(files)
}

/// Decode → rate → threshold detection for one file. An empty capture is
/// `Detection::NoData`, not a failure.
pub fn analyse_file(path: &Path, config: &AnalysisConfig) -> Result<FileAnalysis, AnalysisError> {
    let capture = read_capture(path, &config.layout)?;
    let trace = capture.trace(config.channel)?;
    if trace.is_empty() {
        return Ok(FileAnalysis {
            records: 0,
            sample_rate_hz: None,
            detection: Detection::NoData,
        });
    }
    let sample_rate_hz = Some(estimate_sampling_rate(&trace.time_s)?);
    let detection = detect_impact(
        &trace.samples,
        TimeBase::Timestamps(&trace.time_s),
        &config.threshold,
    )?;
    Ok(FileAnalysis {
        records: capture.record_count(),
        sample_rate_hz,
        detection,
    })
}

/// Analyses up to `max_files` captures from `dir`. Only a failure to list the
/// folder aborts the run.
pub fn run_batch(
    dir: impl AsRef<Path>,
    config: &AnalysisConfig,
    max_files: Option<usize>,
) -> io::Result<BatchReport> {
    let dir = dir.as_ref();
    let mut files = list_captures(dir)?;
    if let Some(max) = max_files {
        files.truncate(max);
    }
    info!("analysing {} capture(s) in {}", files.len(), dir.display());

    let mut report = BatchReport::default();
    for path in files {
        let outcome = match analyse_file(&path, config) {
            Ok(analysis) => {
                match (&analysis.detection, analysis.sample_rate_hz) {
                    (Detection::Event { event, .. }, Some(rate)) => info!(
                        "{}: {} records @ {:.1} Hz, impact [{}, {}] J={:.4} N·s",
                        path.display(),
                        analysis.records,
                        rate,
                        event.start,
                        event.end,
                        event.impulse
                    ),
                    (_, Some(rate)) => info!(
                        "{}: {} records @ {:.1} Hz, no impact",
                        path.display(),
                        analysis.records,
                        rate
                    ),
                    (_, None) => info!("{}: no data", path.display()),
                }
                FileOutcome::Analysed(analysis)
            }
            Err(err) => {
                warn!("{}: skipped ({err})", path.display());
                FileOutcome::Failed(err)
            }
        };
        report.files.push(FileSummary { path, outcome });
    }
    info!(
        "batch done: {} analysed, {} failed",
        report.analysed(),
        report.failed()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::write_capture;
    use crate::synth::SyntheticCapture;

    #[test]
    fn captures_sort_by_embedded_number() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["data_10.bin", "data_2.bin", "zeta.bin", "data_1.bin", "notes.txt", "alpha.BIN"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        let names: Vec<String> = list_captures(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["data_1.bin", "data_2.bin", "data_10.bin", "alpha.BIN", "zeta.bin"]);
    }

    #[test]
    fn bad_file_does_not_stop_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let capture = SyntheticCapture::default().generate().unwrap();
        write_capture(dir.path().join("data_1.bin"), &capture).unwrap();
        fs::write(dir.path().join("data_2.bin"), [0u8; 7]).unwrap();
        write_capture(dir.path().join("data_3.bin"), &capture).unwrap();

        let report = run_batch(dir.path(), &AnalysisConfig::default(), None).unwrap();
        assert_eq!(report.files.len(), 3);
        assert_eq!(report.analysed(), 2);
        assert_eq!(report.failed(), 1);
        assert!(matches!(
            report.files[1].outcome,
            FileOutcome::Failed(AnalysisError::Format(_))
        ));
        let events = report.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].1.index, Some(2));
    }

    #[test]
    fn max_files_limits_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let capture = SyntheticCapture::default().generate().unwrap();
        for n in 1..=3 {
            write_capture(dir.path().join(format!("data_{n}.bin")), &capture).unwrap();
        }
        let report = run_batch(dir.path(), &AnalysisConfig::default(), Some(2)).unwrap();
        assert_eq!(report.files.len(), 2);
        assert!(report.files[1].path.ends_with("data_2.bin"));
    }

    #[test]
    fn empty_capture_is_analysed_as_no_data() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("data_1.bin"), b"").unwrap();
        let report = run_batch(dir.path(), &AnalysisConfig::default(), None).unwrap();
        assert_eq!(report.analysed(), 1);
        match &report.files[0].outcome {
            FileOutcome::Analysed(analysis) => {
                assert_eq!(analysis.records, 0);
                assert_eq!(analysis.sample_rate_hz, None);
                assert!(matches!(analysis.detection, Detection::NoData));
            }
            FileOutcome::Failed(err) => panic!("empty capture failed: {err}"),
        }
        assert!(report.events().is_empty());
    }

    #[test]
    fn single_record_capture_is_an_estimation_failure() {
        let dir = tempfile::tempdir().unwrap();
        let scenario = SyntheticCapture {
            duration_s: 1e-4,
            ..SyntheticCapture::default()
        };
        write_capture(dir.path().join("data_1.bin"), &scenario.generate().unwrap()).unwrap();
        let report = run_batch(dir.path(), &AnalysisConfig::default(), None).unwrap();
        assert!(matches!(
            report.files[0].outcome,
            FileOutcome::Failed(AnalysisError::Estimation(_))
        ));
    }
}
