//! Entry point: parse CLI flags, load node/config JSON, run the discrete-
//! event simulation to completion, print a summary, flush the CSV streams
//! (§4.9).

mod config;
mod driver;
mod error;
mod logger;
mod message;
mod node;
mod preset;
mod propagation;
mod summary;

use clap::Parser;
use config::{CliArgs, RunConfig};
use driver::Simulator;
use env_logger::Builder;
use log::{error, info, LevelFilter};
use std::process::ExitCode;

fn main() -> ExitCode {
    let args = CliArgs::parse();

    Builder::new().filter_level(LevelFilter::Info).parse_default_env().init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(2)
        }
    }
}

fn run(args: &CliArgs) -> anyhow::Result<()> {
    let config = RunConfig::load(args)?;
    let node_params = config::load_node_params(&args.nodes_data)?;
    info!("loaded {} nodes from {}", node_params.len(), args.nodes_data.display());

    let node_count = node_params.len();
    let logger = logger::Logger::create(&config.results_dir)?;
    let seed = 0x5eed_u64;
    let mut simulator = Simulator::new(node_params, &config, logger, seed)?;

    info!(
        "running {} ticks of {}us (simulation_time={}us)",
        config.simulation_time_us / config.time_resolution_us,
        config.time_resolution_us,
        config.simulation_time_us
    );
    simulator.run()?;

    let report = summary::summarize(simulator.nodes());
    info!("run complete: {node_count} nodes, {} originating sources", report.sources.len());
    for source in &report.sources {
        info!(
            "node {}: tx_origin={} messages_confirmed={} normalized_success_rate={:.3}",
            source.node_id, source.tx_origin, source.messages_confirmed, source.normalized_success_rate
        );
    }
    println!("results written to {}", config.results_dir.display());

    Ok(())
}
