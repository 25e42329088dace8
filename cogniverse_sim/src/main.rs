//! CogniVerse DST Simulator CLI
//!
//! Runs the polling scenarios against the mock backend.

use clap::Parser;
use cogniverse_sim::scenarios::ScenarioId;
use cogniverse_sim::{ScenarioResult, ScenarioRunner};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cogniverse-sim")]
#[command(about = "Deterministic simulation tests for the CogniVerse client")]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Scenario to run (steady_stream, outage, token_expiry, ..., all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Virtual-time budget per scenario phase, in seconds
    #[arg(short, long, default_value = "600", value_parser = parse_duration_secs)]
    duration: f64,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,
}

fn parse_duration_secs(raw: &str) -> Result<f64, String> {
    let secs: f64 = raw.parse().map_err(|e| format!("{}", e))?;
    if secs.is_finite() && secs > 0.0 {
        Ok(secs)
    } else {
        Err(format!("{} is not a positive, finite number of seconds", raw))
    }
}

fn main() {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if !args.json {
        info!("CogniVerse DST Simulator v{}", env!("CARGO_PKG_VERSION"));
    }

    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        match args.scenario.parse() {
            Ok(scenario) => vec![scenario],
            Err(e) => {
                eprintln!("Error: {}", e);
                let names: Vec<&str> = ScenarioId::all().iter().map(|s| s.name()).collect();
                eprintln!("Available scenarios: {}, all", names.join(", "));
                std::process::exit(2);
            }
        }
    };

    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1)
    } else {
        args.seed
    };

    let mut all_results: Vec<ScenarioResult> = Vec::new();
    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let runner = ScenarioRunner::new(seed).with_duration(args.duration);

        for scenario in &scenarios {
            let result = runner.run(*scenario);
            if !args.json {
                if result.passed {
                    info!(
                        "✓ {} (seed={}) PASSED in {:.1}s virtual, {} polls",
                        scenario.name(),
                        seed,
                        result.virtual_time_secs,
                        result.metrics.polls
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
            all_results.push(result);
        }
    }

    let total = all_results.len();
    let failed = all_results.iter().filter(|r| !r.passed).count();
    let passed = total - failed;

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": passed,
            "failed": failed,
            "results": all_results,
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Error: failed to encode summary: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        info!("Summary: {}/{} passed", passed, total);
    }

    if failed > 0 {
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_flag_rejects_unusable_values() {
        for raw in ["-5", "0", "NaN", "inf"] {
            assert!(Args::try_parse_from(["cogniverse-sim", "--duration", raw]).is_err(), "{}", raw);
        }
        let args = Args::try_parse_from(["cogniverse-sim", "--duration", "12.5"]).unwrap();
        assert_eq!(args.duration, 12.5);
    }
}
