// src/main.rs
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};

use impactlab::analysis::{
    detect_impact, detect_impacts, estimate_sampling_rate, instantaneous_rates, magnitude_spectrum,
    mean_rate, read_capture, render_spectrogram_png, render_spectrum_png, render_trace_png,
    spectrogram, write_capture, ChannelTrace, Detection, FrequencyLimit, PlotStyle, TimeBase,
    TraceOverlay,
};
use impactlab::batch::{run_batch, FileOutcome};
use impactlab::config::AnalysisConfig;
use impactlab::report::{save_capture_csv, save_events_csv};
use impactlab::synth::SyntheticCapture;
use impactlab::transport::client::DEFAULT_BAUD_RATE;
use impactlab::transport::{SdClient, SerialLink};

#[derive(Parser)]
#[command(name = "impactlab")]
#[command(author, version, about = "Impact-hammer capture analysis", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Channel to analyse (overrides the configuration)
    #[arg(long, global = true)]
    channel: Option<usize>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize a capture file
    Inspect {
        #[arg(value_name = "INPUT")]
        input: PathBuf,
    },

    /// Magnitude spectrum of one channel
    Spectrum {
        #[arg(value_name = "INPUT")]
        input: PathBuf,
        /// Upper frequency: a fraction of Nyquist in (0, 1), or Hz
        #[arg(long)]
        limit: Option<f64>,
        /// Write the spectrum as PNG
        #[arg(long)]
        png: Option<PathBuf>,
    },

    /// Short-time spectrogram of one channel
    Spectrogram {
        #[arg(value_name = "INPUT")]
        input: PathBuf,
        #[arg(long)]
        limit: Option<f64>,
        #[arg(long)]
        png: Option<PathBuf>,
    },

    /// Single impact by threshold crossing
    Impulse {
        #[arg(value_name = "INPUT")]
        input: PathBuf,
        /// Write the trace with the detected interval as PNG
        #[arg(long)]
        png: Option<PathBuf>,
        /// Write the event table as CSV
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Every impact in a continuous stream
    Events {
        #[arg(value_name = "INPUT")]
        input: PathBuf,
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Decoded capture as CSV
    ExportCsv {
        #[arg(value_name = "INPUT")]
        input: PathBuf,
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,
    },

    /// Threshold detection over every capture in a folder
    Batch {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
        #[arg(long)]
        max_files: Option<usize>,
        /// Event table of all detected impacts
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Write a synthetic capture
    Simulate {
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,
        /// JSON scenario; the built-in one otherwise
        #[arg(long)]
        scenario: Option<PathBuf>,
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Talk to the logger's SD card over serial
    Sd(SdArgs),
}

#[derive(Args)]
struct SdArgs {
    /// Serial port; auto-detected when omitted
    #[arg(short, long)]
    port: Option<String>,
    #[arg(short, long, default_value_t = DEFAULT_BAUD_RATE)]
    baud: u32,
    #[command(subcommand)]
    command: SdCommand,
}

#[derive(Subcommand)]
enum SdCommand {
    /// List files on the card
    List,
    /// Download a file
    Get {
        name: String,
        #[arg(short, long, default_value = "downloaded_files")]
        out: PathBuf,
    },
    /// Show the device's command help
    Help,
    /// Delete one file
    Delete { name: String },
    /// Delete every file
    DeleteAll,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let mut config = match &cli.config {
        Some(path) => AnalysisConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => AnalysisConfig::default(),
    };
    if let Some(channel) = cli.channel {
        config.channel = channel;
        config.validate()?;
    }

    match cli.command {
        Commands::Inspect { input } => inspect(&input, &config),
        Commands::Spectrum { input, limit, png } => {
            if limit.is_some() {
                config.spectrum.frequency_limit = limit;
            }
            spectrum_command(&input, &config, png.as_deref())
        }
        Commands::Spectrogram { input, limit, png } => {
            if limit.is_some() {
                config.spectrum.frequency_limit = limit;
            }
            spectrogram_command(&input, &config, png.as_deref())
        }
        Commands::Impulse { input, png, csv } => {
            impulse_command(&input, &config, png.as_deref(), csv.as_deref())
        }
        Commands::Events { input, csv } => events_command(&input, &config, csv.as_deref()),
        Commands::ExportCsv { input, output } => {
            let capture = read_capture(&input, &config.layout)?;
            save_capture_csv(&output, &capture)?;
            println!("wrote {} records to {}", capture.record_count(), output.display());
            Ok(())
        }
        Commands::Batch {
            dir,
            max_files,
            csv,
        } => batch_command(&dir, &config, max_files, csv.as_deref()),
        Commands::Simulate {
            output,
            scenario,
            seed,
        } => simulate(&output, scenario.as_deref(), seed),
        Commands::Sd(args) => sd_command(args, &config),
    }
}

fn load_trace(input: &Path, config: &AnalysisConfig) -> Result<ChannelTrace> {
    let capture = read_capture(input, &config.layout)
        .with_context(|| format!("decoding {}", input.display()))?;
    Ok(capture.trace(config.channel)?)
}

fn inspect(input: &Path, config: &AnalysisConfig) -> Result<()> {
    let capture = read_capture(input, &config.layout)
        .with_context(|| format!("decoding {}", input.display()))?;
    println!("file:      {}", input.display());
    println!("records:   {}", capture.record_count());
    println!("channels:  {}", capture.channel_labels.join(", "));
    let time_s = capture.time_seconds();
    if let (Some(first), Some(last)) = (time_s.first(), time_s.last()) {
        println!("duration:  {:.6} s", last - first);
    }
    match estimate_sampling_rate(&time_s) {
        Ok(fs) => {
            println!("rate:      {fs:.2} Hz (median step)");
            println!("mean rate: {:.2} Hz", mean_rate(&time_s)?);
            let rates = instantaneous_rates(&time_s)?;
            let min = rates.iter().copied().fold(f64::INFINITY, f64::min);
            let max = rates.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            println!("inst rate: {min:.2} .. {max:.2} Hz");
        }
        Err(err) => warn!("no sampling rate: {err}"),
    }
    for (index, label) in capture.channel_labels.iter().enumerate() {
        let column = capture.channels.column(index);
        let min = column.iter().min().copied().unwrap_or(0);
        let max = column.iter().max().copied().unwrap_or(0);
        println!("  {label}: min {min}, max {max}");
    }
    Ok(())
}

fn spectrum_command(input: &Path, config: &AnalysisConfig, png: Option<&Path>) -> Result<()> {
    let trace = load_trace(input, config)?;
    if trace.is_empty() {
        println!("{}: no data", trace.label);
        return Ok(());
    }
    let fs = estimate_sampling_rate(&trace.time_s)?;
    let Some(spectrum) = magnitude_spectrum(&trace.samples, fs, config.spectrum.detrend)? else {
        bail!("{} has no samples on {}", input.display(), trace.label);
    };
    let limit = FrequencyLimit::from_setting(config.spectrum.frequency_limit).resolve(fs);
    let spectrum = spectrum.crop(limit);
    println!("{}: fs {fs:.2} Hz, {} bins up to {limit:.1} Hz", trace.label, spectrum.magnitudes.len());
    if let Some(f) = spectrum.dominant_frequency() {
        println!("dominant frequency: {f:.1} Hz");
    }
    if let Some(path) = png {
        let title = format!("{} spectrum", trace.label);
        fs::write(path, render_spectrum_png(&spectrum, &title, &PlotStyle::default())?)?;
        info!("wrote {}", path.display());
    }
    Ok(())
}

fn spectrogram_command(input: &Path, config: &AnalysisConfig, png: Option<&Path>) -> Result<()> {
    let trace = load_trace(input, config)?;
    if trace.is_empty() {
        println!("{}: no data", trace.label);
        return Ok(());
    }
    let fs = estimate_sampling_rate(&trace.time_s)?;
    let Some(sg) = spectrogram(&trace.samples, fs, &config.stft)? else {
        bail!("{} is shorter than one segment", input.display());
    };
    let limit = FrequencyLimit::from_setting(config.spectrum.frequency_limit).resolve(fs);
    let sg = sg.crop(limit);
    println!(
        "{}: {} frames x {} bins (nperseg {}, noverlap {}, nfft {})",
        trace.label,
        sg.num_frames(),
        sg.num_bins(),
        sg.plan.nperseg,
        sg.plan.noverlap,
        sg.plan.nfft
    );
    let Some(range) = sg.display_range(config.stft.db_range) else {
        bail!("spectrogram has no bins below {limit:.1} Hz");
    };
    println!("display range: {:.1} .. {:.1} dB", range.min_db, range.max_db);
    if let Some(path) = png {
        let title = format!("{} spectrogram", trace.label);
        fs::write(path, render_spectrogram_png(&sg, range, &title, &PlotStyle::default())?)?;
        info!("wrote {}", path.display());
    }
    Ok(())
}

fn impulse_command(
    input: &Path,
    config: &AnalysisConfig,
    png: Option<&Path>,
    csv: Option<&Path>,
) -> Result<()> {
    let trace = load_trace(input, config)?;
    let detection = detect_impact(
        &trace.samples,
        TimeBase::Timestamps(&trace.time_s),
        &config.threshold,
    )?;
    match &detection {
        Detection::NoData => println!("{}: no samples in the analysed range", trace.label),
        Detection::NoEvent(baseline) => println!(
            "{}: no impact (offset {:.2}, noise {:.3}, threshold {:.3})",
            trace.label, baseline.offset, baseline.noise, baseline.threshold
        ),
        Detection::Event { baseline, event } => {
            println!(
                "{}: offset {:.2}, noise {:.3}, threshold {:.3} over {} samples",
                trace.label, baseline.offset, baseline.noise, baseline.threshold, baseline.samples
            );
            println!(
                "impact [{}, {}] ({:.3} ms .. {:.3} ms)",
                event.start,
                event.end,
                trace.time_s[event.start] * 1e3,
                trace.time_s[event.end] * 1e3
            );
            println!("peak force:  {:.2} N at {:.4} s", event.peak_amplitude, event.time_s);
            println!("impulse:     {:.6} N·s", event.impulse);
            println!("energy:      {:.6} J", event.energy.value());
            println!("duration:    {:.1} ms", event.duration_ms);
        }
    }
    if let Some(path) = csv {
        let events: Vec<_> = detection.event().cloned().into_iter().collect();
        save_events_csv(path, &events)?;
        info!("wrote {}", path.display());
    }
    if let Some(path) = png {
        let overlay = TraceOverlay::from_detection(&detection, &trace);
        fs::write(path, render_trace_png(&trace, &overlay, &PlotStyle::default())?)?;
        info!("wrote {}", path.display());
    }
    Ok(())
}

fn events_command(input: &Path, config: &AnalysisConfig, csv: Option<&Path>) -> Result<()> {
    let trace = load_trace(input, config)?;
    let events = detect_impacts(&trace.samples, TimeBase::Timestamps(&trace.time_s), &config.peaks)?;
    println!("{}: {} impact(s)", trace.label, events.len());
    for event in &events {
        println!(
            "#{:<3} t={:.4} s  F={:.2} N  J={:.4} N·s  W={:.4}  {:.1} ms",
            event.index.unwrap_or(0),
            event.time_s,
            event.peak_amplitude,
            event.impulse,
            event.energy.value(),
            event.duration_ms
        );
    }
    if let Some(path) = csv {
        save_events_csv(path, &events)?;
        info!("wrote {}", path.display());
    }
    Ok(())
}

fn batch_command(
    dir: &Path,
    config: &AnalysisConfig,
    max_files: Option<usize>,
    csv: Option<&Path>,
) -> Result<()> {
    let report = run_batch(dir, config, max_files)
        .with_context(|| format!("listing {}", dir.display()))?;
    for file in &report.files {
        match &file.outcome {
            FileOutcome::Analysed(analysis) => match analysis.detection.event() {
                Some(event) => println!(
                    "{}: J={:.6} N·s, W={:.6} J",
                    file.path.display(),
                    event.impulse,
                    event.energy.value()
                ),
                None if matches!(analysis.detection, Detection::NoData) => {
                    println!("{}: no data", file.path.display())
                }
                None => println!("{}: no impact", file.path.display()),
            },
            FileOutcome::Failed(err) => println!("{}: failed ({err})", file.path.display()),
        }
    }
    println!("{} analysed, {} failed", report.analysed(), report.failed());
    if let Some(path) = csv {
        let events: Vec<_> = report.events().into_iter().map(|(_, e)| e).collect();
        save_events_csv(path, &events)?;
        info!("wrote {}", path.display());
    }
    Ok(())
}

fn simulate(output: &Path, scenario: Option<&Path>, seed: Option<u64>) -> Result<()> {
    let mut synthetic: SyntheticCapture = match scenario {
        Some(path) => serde_json::from_str(
            &fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?,
        )?,
        None => SyntheticCapture::default(),
    };
    if let Some(seed) = seed {
        synthetic.seed = seed;
    }
    let capture = synthetic.generate()?;
    write_capture(output, &capture)?;
    println!(
        "wrote {} records x {} channels to {}",
        capture.record_count(),
        capture.channel_count(),
        output.display()
    );
    Ok(())
}

fn sd_command(args: SdArgs, config: &AnalysisConfig) -> Result<()> {
    let link = SerialLink::open(args.port.as_deref(), args.baud)?;
    info!("connected to {}", link.port_name());
    let client = SdClient::new(link, config.transport)?;
    match args.command {
        SdCommand::List => {
            let files = client.list_files()?;
            if files.is_empty() {
                println!("no files on the card");
            }
            for file in files {
                match file.size {
                    Some(size) => println!("{} ({size} bytes)", file.name),
                    None => println!("{}", file.name),
                }
            }
        }
        SdCommand::Get { name, out } => {
            let path = client.download(&name, &out)?;
            println!("saved {}", path.display());
        }
        SdCommand::Help => println!("{}", client.help()?),
        SdCommand::Delete { name } => println!("{}", client.delete(&name)?),
        SdCommand::DeleteAll => println!("{}", client.delete_all()?),
    }
    Ok(())
}
