//! CLI Entry Point for labsweep
//!
//! Provides command-line interface for:
//! - Checking a driver file before it goes into the driver directory
//! - Listing the drivers and instruments the configuration knows about
//! - Running an experiment plan against the configured instruments
//!
//! # Usage
//!
//! ```bash
//! labsweep check-driver drivers/signal_generator.ini
//! labsweep --config config/labsweep.toml list
//! labsweep run --plan plans/frequency_sweep.toml
//! ```
//!
//! Ctrl-C during a run stops it after the current step; the result file keeps
//! every record written so far.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use daq_driver_generic::DriverConfig;
use daq_experiment::{EngineState, PlanDocument, RunEngine, RunObserver, RunSummary, StopSignal};
use daq_storage::TextResultSink;
use labsweep::bench::{load_catalogue, Bench};
use labsweep::config::{AppConfig, DEFAULT_CONFIG_PATH};
use labsweep::logging::{self, LogSettings};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "labsweep")]
#[command(about = "Driver-described instruments and parameter sweeps", long_about = None)]
struct Cli {
    /// Application configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a driver file and print what it defines
    CheckDriver {
        /// Path to the driver file
        file: PathBuf,
    },

    /// List loaded drivers and configured instruments
    List,

    /// Connect the configured instruments and run a plan
    Run {
        /// Plan file (TOML)
        #[arg(long)]
        plan: PathBuf,

        /// Overrides storage.output_dir
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::CheckDriver { file } => {
            logging::init(&LogSettings::default())?;
            check_driver(&file)
        }
        Commands::List => {
            let config = load_config(&cli.config)?;
            list(&config)
        }
        Commands::Run { plan, output_dir } => {
            let mut config = load_config(&cli.config)?;
            if let Some(dir) = output_dir {
                config.storage.output_dir = dir;
            }
            run_plan(&config, &plan).await
        }
    }
}

fn load_config(path: &Path) -> Result<AppConfig> {
    let config = AppConfig::load_from(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    config.validate().context("Invalid configuration")?;
    logging::init_from_config(&config)?;
    info!(config = %path.display(), name = %config.application.name, "Configuration loaded");
    Ok(config)
}

fn check_driver(path: &Path) -> Result<()> {
    let driver = DriverConfig::from_file(path)
        .with_context(|| format!("Driver file {} is invalid", path.display()))?;

    println!("Driver:       {}", driver.name);
    if !driver.manufacturer.is_empty() {
        println!("Manufacturer: {}", driver.manufacturer);
    }
    if let Some(interface) = &driver.interface {
        println!("Interface:    {}", interface);
    }
    println!(
        "Timeout:      {:.3} s",
        driver.transport.timeout.as_secs_f64()
    );
    if !driver.model.models.is_empty() {
        let models: Vec<&str> = driver.model.models.iter().map(|m| m.id.as_str()).collect();
        println!(
            "Models:       {} (checked: {})",
            models.join(", "),
            driver.model.check_model
        );
    }
    if !driver.model.options.is_empty() {
        let options: Vec<&str> = driver.model.options.iter().map(|o| o.id.as_str()).collect();
        println!("Options:      {}", options.join(", "));
    }

    println!();
    println!(
        "{:<28} {:<16} {:<8} {:<6} {:>12} {:>12}",
        "Quantity", "Type", "Unit", "Access", "Low", "High"
    );
    for quantity in driver.quantities() {
        println!(
            "{:<28} {:<16} {:<8} {:<6} {:>12} {:>12}",
            quantity.label,
            quantity.data_type.to_string(),
            quantity.unit,
            format!("{:?}", quantity.permission).to_uppercase(),
            quantity.low_lim,
            quantity.high_lim
        );
    }
    Ok(())
}

fn list(config: &AppConfig) -> Result<()> {
    let (catalogue, report) = load_catalogue(config).with_context(|| {
        format!(
            "Failed to load drivers from {}",
            config.drivers.dir.display()
        )
    })?;

    println!("Drivers in {}:", config.drivers.dir.display());
    for driver in catalogue.drivers() {
        println!(
            "  {:<28} {} quantities",
            driver.name,
            driver.quantities().len()
        );
    }
    for (path, error) in &report.failed {
        println!("  {:<28} rejected: {}", path.display(), error);
    }

    println!("Instruments:");
    for instrument in &config.instruments {
        let state = if instrument.enabled { "" } else { " (disabled)" };
        println!(
            "  {:<20} {:<24} {}{}",
            instrument.name, instrument.driver, instrument.address, state
        );
    }
    Ok(())
}

/// Prints progress in whole percent and honours the stop signal.
struct ConsoleObserver {
    stop: StopSignal,
    last_percent: i64,
}

impl RunObserver for ConsoleObserver {
    fn emit_progress(&mut self, percent: f64) {
        let whole = percent.floor() as i64;
        if whole != self.last_percent {
            self.last_percent = whole;
            println!("  {:>3}%", whole);
        }
    }

    fn should_stop(&mut self) -> bool {
        self.stop.is_triggered()
    }
}

async fn run_plan(config: &AppConfig, plan_path: &Path) -> Result<()> {
    let document = PlanDocument::from_file(plan_path)
        .with_context(|| format!("Failed to read plan {}", plan_path.display()))?;

    let mut bench = Bench::connect(config)
        .await
        .context("Failed to connect instruments")?;

    let outcome = execute(config, document, &mut bench).await;
    let closed = bench.close().await;

    let summary = outcome?;
    closed.context("Failed to close instruments")?;

    match summary.state {
        EngineState::Completed => println!("Run completed: {} records", summary.records),
        EngineState::Aborted => println!("Run stopped: {} records", summary.records),
        other => println!("Run ended {}: {} records", other, summary.records),
    }
    if summary.failed_cells > 0 {
        println!("{} output cells could not be read", summary.failed_cells);
    }
    if let Some(path) = &summary.path {
        println!("Results: {}", path.display());
    }
    Ok(())
}

async fn execute(
    config: &AppConfig,
    document: PlanDocument,
    bench: &mut Bench,
) -> Result<RunSummary> {
    let plan = document
        .build(&bench.registry)
        .context("Plan does not fit the connected instruments")?;
    println!(
        "Plan: {} steps, {} inputs, {} outputs",
        plan.total_steps(),
        plan.inputs().count(),
        plan.outputs().len()
    );

    let mut sink = TextResultSink::builder()
        .output_dir(&config.storage.output_dir)
        .base_name(&config.storage.base_name)
        .delimiter(config.storage.delimiter_byte()?)
        .build()?;

    let stop = StopSignal::new();
    let ctrl_c = {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Stop requested, finishing the current step");
                stop.trigger();
            }
        })
    };

    let mut observer = ConsoleObserver {
        stop,
        last_percent: -1,
    };
    let mut engine = RunEngine::new(plan);
    let result = engine
        .run(&mut bench.registry, &mut observer, &mut sink)
        .await;
    ctrl_c.abort();

    result.with_context(|| format!("Run failed after {} records", engine.records()))
}
