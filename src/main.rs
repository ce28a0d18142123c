//! CLI Entry Point for finesse-daq
//!
//! Provides command-line access to the measurement logic:
//! - `fsr`: free spectral range of a cavity
//! - `measure`: acquire and fit traces from the simulated scope
//! - `synth`: apply synthesizer settings and report the device state
//!
//! The binary runs against the mock instruments; real drivers plug in through the
//! same capability traits.
//!
//! # Usage
//!
//! ```bash
//! finesse-daq fsr --length-um 460
//! finesse-daq measure --count 5 --model "Lorentzian peak with sidebands"
//! finesse-daq --config config/finesse.toml synth --seconds 3
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use finesse_daq::config::FinesseConfig;
use finesse_daq::fitting::LorentzianEstimator;
use finesse_daq::hardware::mock::{MockOscilloscope, MockSynthesizer};
use finesse_daq::measurement::{compute_fsr, FitOutcome};
use finesse_daq::modules::{FinesseModule, Module, ModuleConfig, SynthesizerModule};
use finesse_daq::storage::TsvExporter;
use finesse_daq::tracing_init;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "finesse-daq")]
#[command(about = "Optical cavity finesse measurement", long_about = None)]
struct Cli {
    /// Configuration file (defaults apply when absent)
    #[arg(long, global = true, default_value = "config/finesse.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the free spectral range of a cavity
    Fsr {
        /// Cavity length in µm (config value if omitted)
        #[arg(long)]
        length_um: Option<f64>,

        /// Length uncertainty in µm
        #[arg(long)]
        length_error_um: Option<f64>,

        /// Ring instead of linear cavity
        #[arg(long)]
        ring: bool,
    },

    /// Acquire traces from the simulated scope and fit them
    Measure {
        /// Number of single-shot measurements
        #[arg(long, default_value = "1")]
        count: u32,

        /// Fit model display name
        #[arg(long)]
        model: Option<String>,

        /// Save every trace under the configured output directory
        #[arg(long)]
        save: bool,

        /// Tag appended to the file label
        #[arg(long)]
        tag: Option<String>,
    },

    /// Apply the configured synthesizer settings and poll temperatures
    Synth {
        /// How long to poll, in seconds
        #[arg(long, default_value = "3")]
        seconds: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = if cli.config.exists() {
        FinesseConfig::load_from(&cli.config)?
    } else {
        FinesseConfig::default()
    };
    tracing_init::init_from_config(&config).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Fsr {
            length_um,
            length_error_um,
            ring,
        } => print_fsr(&config, length_um, length_error_um, ring),
        Commands::Measure {
            count,
            model,
            save,
            tag,
        } => measure(&config, count, model, save, tag).await,
        Commands::Synth { seconds } => synth(&config, seconds).await,
    }
}

fn print_fsr(
    config: &FinesseConfig,
    length_um: Option<f64>,
    length_error_um: Option<f64>,
    ring: bool,
) -> Result<()> {
    let length = length_um.unwrap_or(config.cavity.length_um);
    let error = length_error_um.unwrap_or(config.cavity.length_error_um);
    let is_ring = ring || config.cavity.is_ring_cavity;
    if length <= 0.0 {
        anyhow::bail!("cavity length must be positive");
    }

    let fsr = compute_fsr(length, error, is_ring);
    println!(
        "{} cavity, L = {length} ± {error} um",
        if is_ring { "Ring" } else { "Linear" }
    );
    println!("FSR = {:.4} ± {:.4} GHz", fsr.value_ghz, fsr.error_ghz);
    Ok(())
}

async fn measure(
    config: &FinesseConfig,
    count: u32,
    model: Option<String>,
    save: bool,
    tag: Option<String>,
) -> Result<()> {
    let scope = Arc::new(MockOscilloscope::with_settings(
        config.scope.timebase_s,
        config.scope.record_length,
    ));
    let mut module = FinesseModule::new(
        "finesse",
        config,
        scope,
        Arc::new(LorentzianEstimator::default()),
        Arc::new(TsvExporter::new()),
    );
    let mut overrides = ModuleConfig::new();
    if let Some(model) = model {
        overrides.set("fit_model", json!(model));
    }
    module.init(overrides)?;

    let fsr = module.calculator().fsr().await;
    println!("FSR = {:.4} ± {:.4} GHz", fsr.value_ghz, fsr.error_ghz);
    println!("Model: {}", module.settings().fit_model);

    for i in 0..count {
        match module.measure_once().await? {
            FitOutcome::NoFit => println!("[{i}] no fit"),
            FitOutcome::Completed(snapshot) => {
                let finesse = snapshot.finesse;
                if finesse.is_none() {
                    println!("[{i}] fit not conclusive");
                } else {
                    println!("[{i}] F = {:.1} ± {:.1}", finesse.finesse, finesse.error);
                }
            }
        }
        if save {
            let path = module.save_trace(tag.as_deref()).await?;
            println!("    saved {}", path.display());
        }
    }

    if let Some(stats) = module.average().await {
        println!(
            "Average over {} fits: F = {:.1} ± {:.1}",
            stats.sample_count, stats.mean, stats.std_dev
        );
    }
    Ok(())
}

async fn synth(config: &FinesseConfig, seconds: u64) -> Result<()> {
    let device = Arc::new(MockSynthesizer::new());
    let mut module = SynthesizerModule::new("synthesizer", &config.synthesizer, device);
    module.start().await?;

    for (channel, settings) in module.channel_settings().await.iter().enumerate() {
        println!(
            "CH{channel}: {:.3} MHz, {:.1} dBm, {:.1} deg",
            module.read_frequency(channel).await? / 1e6,
            module.read_power(channel).await?,
            settings.phase_deg
        );
    }
    println!("RF state: {:?}", module.check_rf_state().await?);

    tokio::time::sleep(Duration::from_secs(seconds)).await;
    println!("Temperatures: {:?} °C", module.temperatures().await);

    module.stop().await
}
