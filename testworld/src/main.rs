//! testworld CLI
//!
//! Runs the built-in world scenarios against the simulated provider.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use testworld::scenarios::ScenarioId;
use testworld::{ScenarioResult, ScenarioRunner};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// testworld scenario CLI
#[derive(Parser, Debug)]
#[command(name = "testworld")]
#[command(about = "Run ephemeral container world scenarios against the simulator", long_about = None)]
struct Args {
    /// Seed for the simulator (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Scenario to run (parallel_boot, replica_dns, lazy_failure, slow_teardown, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Keep world logs in this directory
    #[arg(long, env = "TESTWORLD_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Simulated container create latency in milliseconds
    #[arg(long, default_value = "100")]
    latency_ms: u64,

    /// Write each scenario's timeline as JSON into this directory
    #[arg(long)]
    export: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        match args.scenario.parse() {
            Ok(id) => vec![id],
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!("Available scenarios: parallel_boot, replica_dns, lazy_failure, slow_teardown, all");
                std::process::exit(1);
            }
        }
    };

    let seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(1, |d| d.as_nanos() as u64)
    } else {
        args.seed
    };

    let mut runner = ScenarioRunner::new(seed).with_latency(Duration::from_millis(args.latency_ms));
    if let Some(dir) = &args.log_dir {
        runner = runner.with_log_dir(dir);
    }

    if !args.json {
        info!("testworld v{}", env!("CARGO_PKG_VERSION"));
    }

    let mut results: Vec<ScenarioResult> = Vec::new();
    for scenario in &scenarios {
        let result = runner.run(*scenario).await;

        if !args.json {
            if result.passed {
                info!(
                    "✓ {} (seed={}) PASSED in {:.3}s, {} events",
                    scenario.name(),
                    seed,
                    result.elapsed_secs,
                    result.event_count
                );
            } else {
                error!(
                    "✗ {} (seed={}) FAILED: {}",
                    scenario.name(),
                    seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }

        if let (Some(dir), Some(timeline)) = (&args.export, &result.timeline) {
            let path = dir.join(format!("timeline_{}.json", scenario.name()));
            if let Err(e) = std::fs::create_dir_all(dir).and_then(|()| timeline.write_to_file(&path)) {
                warn!("Failed to write export {}: {}", path.display(), e);
            }
        }

        results.push(result);
    }

    let total = results.len();
    let failed = results.iter().filter(|r| !r.passed).count();

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": total - failed,
            "failed": failed,
            "results": results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "elapsed_secs": r.elapsed_secs,
                    "events": r.event_count,
                    "stats": r.stats,
                    "failure_reason": r.failure_reason,
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{}", json),
            Err(e) => error!("Failed to serialize summary: {}", e),
        }
    } else if failed == 0 {
        info!("All {} scenario runs passed", total);
    } else {
        error!("{}/{} scenario runs failed", failed, total);
    }

    if failed > 0 {
        std::process::exit(1);
    }
}
