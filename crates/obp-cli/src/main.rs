use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use obp_lib::{
    acquisition::{
        AbortReason, Acquisition, AcquisitionWorker, Event, EventKind, ReplaySource, StateKind,
    },
    config::{ObpConfig, SharedSettings},
    io::{
        record::{read_dat, write_dat, DatRecorder},
        text as text_io,
    },
    metrics::pressure::BloodPressure,
    pipeline::{Oscillometer, OscillometerSummary},
    simulate::{CuffProfile, CuffSimulation},
};
use serde::Serialize;
use std::{
    io::{self, Read},
    path::{Path, PathBuf},
};

#[derive(Parser)]
#[command(
    name = "obp",
    version,
    about = "OBP: oscillometric blood pressure tools"
)]
struct Cli {
    /// TOML configuration; defaults are used when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Estimate MAP/SBP/DBP from recorded pressure and oscillation `.dat` files
    Analyze {
        #[arg(long)]
        pressure: PathBuf,
        #[arg(long)]
        oscillation: PathBuf,
    },
    /// Run a synthetic cuff recording through the acquisition cycle
    Simulate {
        #[arg(long, default_value_t = 75.0)]
        heart_rate: f64,
        #[arg(long, default_value_t = 95.0)]
        map: f64,
        #[arg(long, default_value_t = 0.0)]
        noise_v: f64,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Write raw.txt, p.dat and o.dat into this directory
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Replay raw transducer voltages (stdin or --input) through the acquisition cycle
    Replay {
        #[arg(long)]
        input: Option<PathBuf>,
        /// Record the cycle's series as timestamped `.dat` files in this directory
        #[arg(long)]
        record: Option<PathBuf>,
    },
    /// Validate a configuration and print the effective values
    CheckConfig,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let cfg = load_config(cli.config.as_deref())?;
    match cli.command {
        Commands::Analyze {
            pressure,
            oscillation,
        } => cmd_analyze(cfg, &pressure, &oscillation)?,
        Commands::Simulate {
            heart_rate,
            map,
            noise_v,
            seed,
            out,
        } => cmd_simulate(cfg, heart_rate, map, noise_v, seed, out.as_deref())?,
        Commands::Replay { input, record } => {
            cmd_replay(cfg, input.as_deref(), record.as_deref())?
        }
        Commands::CheckConfig => {
            println!("{}", serde_json::to_string_pretty(&cfg)?);
        }
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<ObpConfig> {
    match path {
        Some(path) => ObpConfig::load(path),
        None => Ok(ObpConfig::default()),
    }
}

fn read_samples(input: Option<&Path>) -> Result<Vec<f64>> {
    match input {
        Some(path) => text_io::read_f64_series(path),
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            text_io::parse_f64_series(&buf)
        }
    }
}

#[derive(Serialize)]
struct AnalyzeReport {
    enough_data: bool,
    #[serde(flatten)]
    summary: OscillometerSummary,
}

fn cmd_analyze(mut cfg: ObpConfig, pressure: &Path, oscillation: &Path) -> Result<()> {
    let p = read_dat(pressure)?;
    let o = read_dat(oscillation)?;
    if p.len() != o.len() {
        bail!(
            "pressure has {} samples but oscillation has {}",
            p.len(),
            o.len()
        );
    }
    if (p.fs - o.fs).abs() > 1e-6 * p.fs {
        bail!("sampling rates differ: {} Hz vs {} Hz", p.fs, o.fs);
    }
    if (p.fs - cfg.detection.sampling_rate_hz).abs() > 1e-6 * p.fs {
        info!(
            "using the recorded sampling rate {:.3} Hz instead of {} Hz",
            p.fs, cfg.detection.sampling_rate_hz
        );
        cfg.detection.sampling_rate_hz = p.fs;
        cfg.validate()?;
    }

    let mut osc = Oscillometer::new(cfg.detection, cfg.settings);
    for (&pv, &ov) in p.data.iter().zip(&o.data) {
        osc.process_sample(pv, ov);
        if osc.is_enough_data() {
            break;
        }
    }
    let enough_data = osc.is_enough_data();
    if !enough_data {
        warn!("recording ended before the pulses decayed, results may be incomplete");
    }
    osc.estimate();
    let report = AnalyzeReport {
        enough_data,
        summary: osc.summary(),
    };
    println!("{}", serde_json::to_string(&report)?);
    Ok(())
}

#[derive(Serialize)]
struct CycleReport {
    state: StateKind,
    ambient_v: Option<f64>,
    result: Option<BloodPressure>,
    average_heart_rate: f64,
    aborted: Vec<AbortReason>,
    calibration_failed: bool,
}

/// Feed `voltages` through a fresh acquisition machine on its worker thread.
fn run_cycle(cfg: ObpConfig, voltages: Vec<f64>, record: Option<&Path>) -> Result<CycleReport> {
    let fs = cfg.sampling_rate_hz();
    let mut machine = Acquisition::new(cfg, SharedSettings::new(cfg.settings))
        .context("building acquisition")?;
    if let Some(dir) = record {
        machine.set_recorder(Box::new(DatRecorder::new(dir)));
    }
    let notices = machine.events_mut().subscribe_to(
        &[EventKind::Aborted, EventKind::CalibrationFailed],
        cfg.acquisition.event_capacity,
    );
    machine.request_start();

    let handle = AcquisitionWorker::spawn(machine, ReplaySource::new(fs, voltages));
    let machine = handle.join()?;

    let mut aborted = Vec::new();
    let mut calibration_failed = false;
    for event in notices.try_iter() {
        match event {
            Event::Aborted { reason } => aborted.push(reason),
            Event::CalibrationFailed { .. } => calibration_failed = true,
            _ => {}
        }
    }
    Ok(CycleReport {
        state: machine.state_kind(),
        ambient_v: machine.ambient_v(),
        result: machine.result(),
        average_heart_rate: machine.oscillometer().average_heart_rate(),
        aborted,
        calibration_failed,
    })
}

fn cmd_replay(cfg: ObpConfig, input: Option<&Path>, record: Option<&Path>) -> Result<()> {
    let voltages = read_samples(input)?;
    let report = run_cycle(cfg, voltages, record)?;
    println!("{}", serde_json::to_string(&report)?);
    Ok(())
}

#[derive(Serialize)]
struct SimulateReport {
    profile: CuffProfile,
    expected: BloodPressure,
    #[serde(flatten)]
    cycle: CycleReport,
}

fn cmd_simulate(
    cfg: ObpConfig,
    heart_rate: f64,
    map: f64,
    noise_v: f64,
    seed: u64,
    out: Option<&Path>,
) -> Result<()> {
    let profile = CuffProfile {
        sampling_rate_hz: cfg.sampling_rate_hz(),
        heart_rate_bpm: heart_rate,
        map_mmhg: map,
        noise_v,
        seed,
        ..CuffProfile::default()
    };
    let sim = CuffSimulation::new(profile);
    let voltages = sim.voltages(&cfg.acquisition);

    if let Some(dir) = out {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        let raw: String = voltages.iter().map(|v| format!("{}\n", v)).collect();
        let raw_path = dir.join("raw.txt");
        std::fs::write(&raw_path, raw)
            .with_context(|| format!("writing {}", raw_path.display()))?;
        let filtered = sim.filtered_deflation(&cfg)?;
        write_dat(&dir.join("p.dat"), profile.sampling_rate_hz, &filtered.pressure)?;
        write_dat(&dir.join("o.dat"), profile.sampling_rate_hz, &filtered.oscillation)?;
    }

    let report = SimulateReport {
        profile,
        expected: sim.expected(cfg.settings.ratio_sbp, cfg.settings.ratio_dbp),
        cycle: run_cycle(cfg, voltages, None)?,
    };
    println!("{}", serde_json::to_string(&report)?);
    Ok(())
}
