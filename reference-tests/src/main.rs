//! Reference scenario binary entry point
//!
//! Runs every reference scenario headless and prints a summary per scenario.
//! Pass a config directory as the first argument (default `configs`).

use reference_tests::{all_tests, TestResult};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() {
    // Initialize logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config_dir = std::env::args().nth(1).map(PathBuf::from).unwrap_or_else(|| PathBuf::from("configs"));

    tracing::info!("Scheduling Core Reference Scenarios");
    tracing::info!("===================================");

    let tests = all_tests(&config_dir);
    tracing::info!("Found {} reference scenarios in {}", tests.len(), config_dir.display());

    let mut results: Vec<TestResult> = Vec::new();
    let mut passed_count = 0;
    let mut failed_count = 0;

    for test in tests {
        match test.run() {
            Ok(result) => {
                if result.passed {
                    passed_count += 1;
                } else {
                    failed_count += 1;
                }
                result.print_summary();
                results.push(result);
            }
            Err(e) => {
                eprintln!("\nERROR running scenario {}: {}", test.name, e);
                failed_count += 1;
            }
        }
    }

    // Print overall summary
    println!("\n{}", "=".repeat(80));
    println!("OVERALL SUMMARY");
    println!("{}", "=".repeat(80));
    println!("{:<24} {:>8} {:>10} {:>12} {:>10}", "scenario", "frames", "steps", "sim time", "status");
    for r in &results {
        println!(
            "{:<24} {:>8} {:>10} {:>11.4}s {:>10}",
            r.name,
            r.frames,
            r.counters.step_count,
            r.counters.sim_time,
            if r.passed { "PASSED" } else { "FAILED" }
        );
    }
    println!("Passed: {}", passed_count);
    println!("Failed: {}", failed_count);
    println!("{}", "=".repeat(80));

    // Exit with error code if any scenario failed
    if failed_count > 0 {
        std::process::exit(1);
    }
}
