use clap::Parser;
use piconet::scenario::ScenarioConfig;
use piconet::time::Instant;
use std::path::PathBuf;
use std::process::ExitCode;

/// Discrete-event simulator for BLE piconets with adaptive frequency hopping.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Scenario description (TOML).
    scenario: PathBuf,

    /// Override the simulated duration in seconds.
    #[arg(long)]
    duration_s: Option<f64>,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match ScenarioConfig::load(&args.scenario) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(duration_s) = args.duration_s {
        config.duration_s = duration_s;
    }

    let mut sim = match config.build() {
        Ok(sim) => sim,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    sim.run();

    let elapsed = sim.end() - Instant::ZERO;
    for node in sim.nodes() {
        for conn in node.connections() {
            println!(
                "=== {} / {:08X} ===\n{}",
                node.info.name,
                conn.access_address(),
                conn.stats.report(elapsed)
            );
        }
    }

    ExitCode::SUCCESS
}
