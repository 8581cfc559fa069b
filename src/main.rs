//! CLI entry point for the Luna OVA driver
//!
//! # Usage
//!
//! Identify the instrument:
//! ```bash
//! luna_ova --address 10.0.0.5 identify
//! ```
//!
//! Run a full measurement:
//! ```bash
//! luna_ova --config config/luna_ova.toml measure --center 1550 --range 10 --averages 4
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use luna_ova::config::OvaConfig;
use luna_ova::logging::{self, TracingConfig};
use luna_ova::{FullMeasurement, Measurement, Session};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "luna_ova")]
#[command(about = "Drive a Luna optical vector analyzer over TCP", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = "config/luna_ova.toml")]
    config: PathBuf,

    /// Instrument address, overriding the configuration
    #[arg(long, global = true)]
    address: Option<String>,

    /// Instrument port, overriding the configuration
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the instrument identification string
    Identify,

    /// Configure, scan and fetch every axis and channel
    Measure {
        #[command(flatten)]
        scan: ScanArgs,
    },

    /// Configure, scan and fetch insertion loss only
    InsertionLoss {
        #[command(flatten)]
        scan: ScanArgs,
    },
}

#[derive(clap::Args)]
struct ScanArgs {
    /// Centre wavelength in nm
    #[arg(long, default_value_t = 1550.0)]
    center: f64,

    /// Wavelength range in nm
    #[arg(long, default_value_t = 10.0)]
    range: f64,

    /// Number of averages
    #[arg(long, default_value_t = 1)]
    averages: u32,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = OvaConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(address) = cli.address {
        config.endpoint.address = address;
    }
    if let Some(port) = cli.port {
        config.endpoint.port = port;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.validate().context("invalid configuration")?;

    let tracing = TracingConfig::from_config(&config).map_err(anyhow::Error::msg)?;
    logging::init(tracing).map_err(anyhow::Error::msg)?;

    let mut session = Session::new(&config);
    let endpoint = config.endpoint.to_string();
    let idn = session
        .connect()
        .with_context(|| format!("connecting to {endpoint}"))?;

    // Disconnect before reporting, whatever the outcome
    let outcome = run(&mut session, &idn, cli.command);
    session.disconnect();
    outcome
}

fn run(session: &mut Session, idn: &str, command: Commands) -> Result<()> {
    match command {
        Commands::Identify => {
            println!("{idn}");
        }
        Commands::Measure { scan } => {
            let result = session
                .measure_full(scan.center, scan.range, scan.averages)
                .context("full measurement")?;
            print_summary(&result);
        }
        Commands::InsertionLoss { scan } => {
            let il = session
                .measure_insertion_loss_only(scan.center, scan.range, scan.averages)
                .context("insertion loss measurement")?;
            print_series(&il);
        }
    }
    Ok(())
}

fn print_summary(result: &FullMeasurement) {
    println!("DUT length:        {} m", result.dut_length_m);
    println!("Sample resolution: {:.6} nm", result.sample_resolution_nm);
    println!("Centre wavelength: {} nm", result.center_wavelength_nm);
    println!("Wavelength range:  {} nm", result.wavelength_range_nm);
    println!("Averaging:         {}", result.averaging);
    println!("Points:            {}", result.wavelength.len());
    if let Some((first, last)) = result.wavelength.span() {
        println!("Wavelength span:   {first:.4} .. {last:.4} nm");
    }
    println!("Resolution:");
    println!("  wavelength {:.6} nm", result.resolutions.wavelength_nm);
    println!("  frequency  {:.6} THz", result.resolutions.frequency_thz);
    println!("  time       {:.6} ns", result.resolutions.time_ns);
}

fn print_series(measurement: &Measurement) {
    println!("# {}", measurement.quantity);
    for value in &measurement.values {
        println!("{value}");
    }
}
