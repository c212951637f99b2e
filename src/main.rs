//! Simulator entry point.
//!
//! Loads the YAML configuration, runs the discrete-event simulation, and
//! writes the run artifacts into the output directory:
//!
//! - `config.yaml`: the effective configuration
//! - `simulation.log`: human log (also echoed to the console)
//! - `summary.yaml`: per-protocol summary metrics
//! - `metrics.csv`: one row per post-warmup transmission
//! - `protocol_comparison.csv`: one summary row per protocol
//!
//! Exit code 0 on success, 1 on configuration or runtime error.

use anyhow::Context;
use clap::Parser;
use lpwan_protocol_sim::config::SimulatorConfig;
use lpwan_protocol_sim::logging;
use lpwan_protocol_sim::simulation::Simulation;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "lpwan-protocol-sim",
    about = "Compare an LPWAN-native pub/sub protocol against MQTT-SN and CoAP baselines"
)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Directory to save output results
    #[arg(short, long)]
    output_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(&cli) {
        // The logger may not be installed yet if setup itself failed.
        log::error!("simulation failed: {err:#}");
        eprintln!("simulation failed: {err:#}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    std::fs::create_dir_all(&cli.output_dir).with_context(|| {
        format!(
            "failed to create output directory: {}",
            cli.output_dir.display()
        )
    })?;
    logging::init(&cli.output_dir, cli.verbose)?;

    log::info!("configuration: {}", cli.config.display());
    log::info!("output directory: {}", cli.output_dir.display());

    let config = SimulatorConfig::load(&cli.config)?;
    log::info!("enabled protocols: {:?}", config.enabled_protocol_names());

    // Effective (defaulted) configuration travels with the results.
    let config_yaml = serde_yaml::to_string(&config)?;
    std::fs::write(cli.output_dir.join("config.yaml"), config_yaml)?;

    let mut simulation = Simulation::new(&config);
    simulation.run();

    write_results(&simulation, &cli.output_dir)?;
    log::info!("done");
    Ok(())
}

fn write_results(simulation: &Simulation, output_dir: &Path) -> anyhow::Result<()> {
    let world = simulation.shared_world();
    let world = world.borrow();
    let metrics = &world.metrics;

    let summary = metrics.summary();
    let summary_path = output_dir.join("summary.yaml");
    std::fs::write(&summary_path, serde_yaml::to_string(&summary)?)?;
    log::info!("saved summary to {}", summary_path.display());

    let csv_path = output_dir.join("metrics.csv");
    let mut csv = BufWriter::new(File::create(&csv_path)?);
    metrics.write_metrics_csv(&mut csv)?;
    log::info!("saved metrics to {}", csv_path.display());

    let comparison_path = output_dir.join("protocol_comparison.csv");
    let mut comparison = BufWriter::new(File::create(&comparison_path)?);
    metrics.write_comparison_csv(&mut comparison)?;
    log::info!("saved protocol comparison to {}", comparison_path.display());

    for (protocol, row) in &summary {
        log::info!(
            "{}: delivery_rate={:.4} avg_cmd_latency_ms={:.1} energy_per_msg_mj={:.4} \
             uplink_bytes={} downlink_bytes={} commands_applied={} ack_efficiency={:.3}",
            protocol,
            row.delivery_rate,
            row.avg_cmd_latency_ms,
            row.energy_per_msg_mj,
            row.uplink_bytes,
            row.downlink_bytes,
            row.commands_applied,
            row.ack_efficiency
        );
    }
    Ok(())
}
