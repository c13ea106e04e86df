use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use mac_lab_abstract::{ConfigOverride, PropagationKind, SimulationConfig, SimulatorKind};
use mac_lab_simulator::Simulator;

#[derive(Parser, Debug)]
#[command(author, version, about = "Shared-medium MAC simulator")]
struct Args {
    /// Simulation configuration (JSON, `//` and `/* */` comments allowed).
    config: PathBuf,

    /// Override the configured propagation model (original | realistic).
    #[arg(long)]
    propagation: Option<PropagationKind>,

    /// Override the configured MAC variant (aloha | trivial | simple).
    #[arg(long)]
    simulator: Option<SimulatorKind>,

    /// Override the p-persistence (only meaningful with --simulator simple).
    #[arg(long)]
    persistence: Option<f64>,

    /// Override the output CSV path template.
    #[arg(long)]
    output: Option<String>,

    /// Write a JSON report with per-receiver statistics.
    #[arg(long)]
    report_out: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let mut config = SimulationConfig::from_file(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    let overrides = ConfigOverride {
        propagation: args.propagation,
        simulator: args.simulator,
        persistence: args.persistence,
        output: args.output,
    };
    overrides.apply_to(&mut config);
    config.validate().context("invalid configuration")?;

    let output = config.output_path();
    info!(
        simulator = %config.simulator,
        propagation = %config.propagation,
        persistence = config.effective_persistence(),
        nodes = config.nodes.len(),
        duration = config.duration,
        seed = config.seed,
        "starting simulation"
    );

    let mut sim = Simulator::new(config)?;
    sim.run();

    let report = sim.report();
    for (node, stats) in &report.nodes {
        info!(
            node,
            throughput_mbps = stats.throughput,
            collision_rate = stats.collision_rate,
            drop_rate = stats.drop_rate,
            channel_corruption_rate = stats.channel_corruption_rate,
            "receiver statistics"
        );
    }

    sim.log()
        .write_csv(Path::new(&output))
        .with_context(|| format!("failed to write log to {output}"))?;
    info!(path = %output, records = sim.log().records().len(), "log written");

    if let Some(path) = &args.report_out {
        let data = serde_json::to_vec_pretty(&report).context("failed to serialize report")?;
        fs::write(path, &data)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        info!(path = %path.display(), "report written");
    }

    Ok(())
}
