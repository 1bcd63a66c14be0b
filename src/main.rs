//! CLI Entry Point for smart_lpm
//!
//! Provides command-line interface for:
//! - Printing the signature a process file produces
//! - Reassigning a recorded raw file and exporting per-wavelength files
//! - Running a calibration against the configured sensor
//! - Running a live blind-mode acquisition
//! - Printing the effective configuration
//!
//! # Usage
//!
//! ```bash
//! smart_lpm signature --process config/process.tsv
//! smart_lpm reassign data/run_raw.tsv --threshold 0.5 --out data/
//! smart_lpm calibrate --wavelengths 405,488,561 --reference 488
//! smart_lpm acquire --out data/
//! smart_lpm config
//! ```

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use smart_lpm::acquisition::{AcquisitionTiming, LiveAcquisition};
use smart_lpm::calibration::{CalibrationEngine, CalibrationTable};
use smart_lpm::classifier::ReassignOutcome;
use smart_lpm::config::{Settings, DEFAULT_CONFIG_PATH};
use smart_lpm::data::RawTsvWriter;
use smart_lpm::hardware::{PowerSensor, SimulatedSensor};
use smart_lpm::{logging, plan_file, LpmError, LpmSession, Signature};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "smart_lpm")]
#[command(about = "Light power meter with pulse-signature reassignment", long_about = None)]
struct Cli {
    /// Settings file (TOML)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the signature of a process file
    Signature {
        /// Process file; `storage.process_file` when omitted
        #[arg(long)]
        process: Option<PathBuf>,

        /// Also print the signature matrix, one row per wavelength
        #[arg(long)]
        matrix: bool,
    },

    /// Reassign a recorded raw file and export the split files
    Reassign {
        /// Raw tab-separated file
        raw: PathBuf,

        /// Process file; `storage.process_file` when omitted
        #[arg(long)]
        process: Option<PathBuf>,

        /// Absolute threshold in mW
        #[arg(long, conflicts_with = "threshold_pct")]
        threshold: Option<f64>,

        /// Threshold as a percentage of the recorded power range
        #[arg(long)]
        threshold_pct: Option<f64>,

        /// Calibration table (JSON) to apply
        #[arg(long)]
        calibration: Option<PathBuf>,

        /// Output directory; `storage.data_dir` when omitted
        #[arg(long)]
        out: Option<PathBuf>,

        /// File name prefix
        #[arg(long, default_value = "")]
        base: String,
    },

    /// Measure calibration factors on the configured sensor
    Calibrate {
        /// Candidate wavelengths in nm, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        wavelengths: Vec<u32>,

        /// Reference wavelength in nm
        #[arg(long)]
        reference: u32,

        /// Where to write the table
        #[arg(long, default_value = "calibration.json")]
        out: PathBuf,
    },

    /// Run a live acquisition of a process file
    Acquire {
        /// Process file; `storage.process_file` when omitted
        #[arg(long)]
        process: Option<PathBuf>,

        /// Absolute threshold in mW; `acquisition.threshold` when omitted
        #[arg(long)]
        threshold: Option<f64>,

        /// Calibration table (JSON) to apply while classifying
        #[arg(long)]
        calibration: Option<PathBuf>,

        /// Output directory; `storage.data_dir` when omitted
        #[arg(long)]
        out: Option<PathBuf>,

        /// File name prefix
        #[arg(long, default_value = "")]
        base: String,
    },

    /// Print the effective settings as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load_from(&cli.config)
        .with_context(|| format!("loading settings from {}", cli.config.display()))?;
    settings.validate()?;
    logging::init_from_settings(&settings)?;

    match cli.command {
        Commands::Signature { process, matrix } => show_signature(&settings, process, matrix),
        Commands::Reassign {
            raw,
            process,
            threshold,
            threshold_pct,
            calibration,
            out,
            base,
        } => reassign(
            &settings,
            &raw,
            process,
            Threshold::from_args(threshold, threshold_pct),
            calibration,
            out,
            &base,
        ),
        Commands::Calibrate {
            wavelengths,
            reference,
            out,
        } => calibrate(&settings, &wavelengths, reference, &out).await,
        Commands::Acquire {
            process,
            threshold,
            calibration,
            out,
            base,
        } => acquire(&settings, process, threshold, calibration, out, &base).await,
        Commands::Config => {
            print!("{}", settings.to_toml()?);
            Ok(())
        }
    }
}

enum Threshold {
    Absolute(f64),
    Percent(f64),
    Configured,
}

impl Threshold {
    fn from_args(absolute: Option<f64>, percent: Option<f64>) -> Self {
        match (absolute, percent) {
            (Some(t), _) => Threshold::Absolute(t),
            (None, Some(p)) => Threshold::Percent(p),
            (None, None) => Threshold::Configured,
        }
    }
}

fn process_path(settings: &Settings, process: Option<PathBuf>) -> PathBuf {
    process.unwrap_or_else(|| settings.storage.process_file.clone())
}

fn load_session(
    settings: &Settings,
    process: Option<PathBuf>,
    calibration: Option<PathBuf>,
) -> Result<LpmSession> {
    let path = process_path(settings, process);
    let plan = plan_file::load(&path)
        .with_context(|| format!("reading process file {}", path.display()))?;
    let mut session = LpmSession::with_settings(plan, settings)?;
    if let Some(path) = calibration {
        let table = CalibrationTable::load(&path)
            .with_context(|| format!("reading calibration table {}", path.display()))?;
        session.apply_calibration(table)?;
        session.set_correction_enabled(true)?;
    }
    Ok(session)
}

fn show_signature(settings: &Settings, process: Option<PathBuf>, matrix: bool) -> Result<()> {
    let path = process_path(settings, process);
    let plan = plan_file::load(&path)?;
    let signature = Signature::synthesize(&plan)?;

    println!("Signature:  {}", signature.signature_string());
    println!("Readouts:   {}", signature.readout_count());
    println!("Blocks:     {}", signature.blocks());
    println!("Idle/pulse: {}", signature.idle_points_per_pulse());
    for (wavelength, color) in signature.wavelengths().iter().zip(signature.colors()) {
        let [r, g, b] = color.0;
        println!("  {wavelength} nm  #{r:02x}{g:02x}{b:02x}");
    }
    if matrix {
        for (wavelength, row) in signature.wavelengths().iter().zip(signature.profile().rows()) {
            let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            println!("{wavelength}\t{}", cells.join("\t"));
        }
    }
    Ok(())
}

fn reassign(
    settings: &Settings,
    raw: &Path,
    process: Option<PathBuf>,
    threshold: Threshold,
    calibration: Option<PathBuf>,
    out: Option<PathBuf>,
    base: &str,
) -> Result<()> {
    let mut session = load_session(settings, process, calibration)?;
    session
        .load_raw_file(raw)
        .with_context(|| format!("reading raw file {}", raw.display()))?;

    match threshold {
        Threshold::Absolute(t) => session.set_threshold(t)?,
        Threshold::Percent(p) => {
            let t = session.set_threshold_percent(p)?;
            info!(percent = p, threshold = t, "Threshold from power range");
        }
        Threshold::Configured => {}
    }

    match session.last_outcome() {
        Some(ReassignOutcome::Completed(summary)) => println!(
            "Reassigned {} of {} samples into {} pulses{}",
            summary.assigned,
            summary.samples,
            summary.pulses,
            if summary.corrected { " (corrected)" } else { "" }
        ),
        _ => println!("No data above threshold {}", session.threshold()),
    }

    let dir = out.unwrap_or_else(|| settings.storage.data_dir.clone());
    let report = session.export(&dir, base, settings.export.clone())?;
    println!("Raw file: {}", report.raw.display());
    for path in &report.split {
        println!("  {}", path.display());
    }
    Ok(())
}

/// Sensor selected by `[sensor]`; the simulated one replays `playback` when enabled.
fn build_sensor(
    settings: &Settings,
    playback: Option<(&Signature, f64)>,
) -> Result<Arc<dyn PowerSensor>> {
    match settings.sensor.kind.as_str() {
        "simulated" => {
            let mut sensor = SimulatedSensor::from_settings(&settings.simulation);
            if let (true, Some((signature, readout_s))) = (settings.simulation.playback, playback) {
                sensor = sensor.with_playback(
                    signature.combined_profile().to_vec(),
                    Duration::from_secs_f64(readout_s),
                );
            }
            Ok(Arc::new(sensor))
        }
        #[cfg(feature = "instrument_newport_power_meter")]
        "newport_1830c" => Ok(Arc::new(smart_lpm::hardware::Newport1830C::new(
            &settings.sensor.port,
        ))),
        #[cfg(not(feature = "instrument_newport_power_meter"))]
        "newport_1830c" => Err(LpmError::FeatureNotEnabled(
            "instrument_newport_power_meter".to_string(),
        )
        .into()),
        other => Err(LpmError::Configuration(format!("unknown sensor kind '{other}'")).into()),
    }
}

async fn calibrate(settings: &Settings, wavelengths: &[u32], reference: u32, out: &Path) -> Result<()> {
    let sensor = build_sensor(settings, None)?;
    let engine = CalibrationEngine::new(
        settings.calibration.clone(),
        AcquisitionTiming::from(&settings.acquisition),
    );
    let table = engine.run(sensor, wavelengths, reference).await?;

    for (wavelength, factor) in table.wavelengths().iter().zip(table.factors()) {
        println!("{wavelength} nm\t{factor:.4}");
    }
    table.save(out)?;
    println!("Calibration table written to {}", out.display());
    Ok(())
}

async fn acquire(
    settings: &Settings,
    process: Option<PathBuf>,
    threshold: Option<f64>,
    calibration: Option<PathBuf>,
    out: Option<PathBuf>,
    base: &str,
) -> Result<()> {
    let mut session = load_session(settings, process, calibration)?;
    if let Some(t) = threshold {
        session.set_threshold(t)?;
    }
    let signature = session
        .signature()
        .cloned()
        .ok_or(LpmError::NoActiveSignature)?;
    let sensor = build_sensor(settings, Some((&signature, session.plan().readout_interval)))?;

    let dir = out.unwrap_or_else(|| settings.storage.data_dir.clone());
    let raw_path = dir.join(format!(
        "{base}{}live_raw.tsv",
        chrono::Local::now().format("%Y%m%d-%H%M_")
    ));
    let writer = RawTsvWriter::create(&raw_path, false)?;

    let acquisition =
        LiveAcquisition::new(sensor, session.plan(), &settings.acquisition)?.with_writer(writer);
    let stop = acquisition.stop_handle();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Stop requested");
            stop.stop();
        }
    });

    println!(
        "Acquiring {} ({} readouts)... Press Ctrl+C to stop",
        signature.signature_string(),
        signature.readout_count()
    );
    let summary = acquisition.run(&mut session).await?;
    println!(
        "{} samples, {} classified{}",
        summary.samples,
        summary.assigned,
        if summary.stopped { " (stopped)" } else { "" }
    );

    // samples past the signature are only classified offline
    session.reassign()?;
    let report = session.export(&dir, base, settings.export.clone())?;
    println!("Raw file: {}", report.raw.display());
    for path in &report.split {
        println!("  {}", path.display());
    }
    Ok(())
}
