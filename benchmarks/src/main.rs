//! Moonveil benchmark runner
//!
//! Times the front end on its own and the whole pipeline for each target
//! and feature set, and records how much each feature set grows a program.
//! Pass `--json` to print the report instead of the table; otherwise it is
//! also saved under `benchmarks/results/`.

use anyhow::Result;
use serde::Serialize;
use std::fs;
use std::time::Instant;

mod benchmarks;

/// Wall-clock summary over the timed iterations
#[derive(Debug, Clone, Serialize)]
pub struct Timing {
    pub iterations: u32,
    pub mean_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

/// Run `f` once to warm up, then `iterations` timed times
pub fn time<F: FnMut()>(iterations: u32, mut f: F) -> Timing {
    f();
    let mut samples = Vec::with_capacity(iterations as usize);
    for _ in 0..iterations {
        let start = Instant::now();
        f();
        samples.push(start.elapsed().as_secs_f64() * 1000.0);
    }
    Timing {
        iterations,
        mean_ms: samples.iter().sum::<f64>() / samples.len().max(1) as f64,
        min_ms: samples.iter().cloned().fold(f64::INFINITY, f64::min),
        max_ms: samples.iter().cloned().fold(0.0, f64::max),
    }
}

/// Source kilobytes handled per second at the mean time
pub fn kb_per_sec(input_bytes: usize, timing: &Timing) -> f64 {
    if timing.mean_ms <= 0.0 {
        return 0.0;
    }
    input_bytes as f64 / 1024.0 / (timing.mean_ms / 1000.0)
}

/// One front-end stage over the sample module
#[derive(Debug, Serialize)]
pub struct StageResult {
    pub stage: String,
    pub input_bytes: usize,
    #[serde(flatten)]
    pub timing: Timing,
    pub kb_per_sec: f64,
}

/// One `(target, feature set)` run of the whole pipeline
#[derive(Debug, Serialize)]
pub struct PipelineResult {
    pub target: String,
    pub features: String,
    pub input_bytes: usize,
    pub output_bytes: usize,
    /// `output_bytes / input_bytes`
    pub size_ratio: f64,
    pub strings_encrypted: usize,
    pub constants_encrypted: usize,
    pub warnings: usize,
    #[serde(flatten)]
    pub timing: Timing,
    pub kb_per_sec: f64,
}

#[derive(Debug, Serialize)]
pub struct BenchmarkReport {
    pub timestamp: String,
    pub version: String,
    pub frontend: Vec<StageResult>,
    pub pipeline: Vec<PipelineResult>,
}

fn print_report(report: &BenchmarkReport) {
    println!("\n==== Moonveil {} ({}) ====", report.version, report.timestamp);

    println!("\n--- Front end ---");
    for r in &report.frontend {
        println!(
            "  {:<10} {:>9.3}ms  {:>10.1} KB/s",
            r.stage, r.timing.mean_ms, r.kb_per_sec
        );
    }

    println!("\n--- Pipeline ---");
    println!(
        "  {:<11} {:<12} {:>10} {:>12} {:>7}",
        "target", "features", "mean", "throughput", "size"
    );
    for r in &report.pipeline {
        println!(
            "  {:<11} {:<12} {:>8.2}ms {:>7.1} KB/s {:>6.2}x",
            r.target, r.features, r.timing.mean_ms, r.kb_per_sec, r.size_ratio
        );
    }
}

fn main() -> Result<()> {
    let json = std::env::args().any(|a| a == "--json");

    eprintln!("Timing front end...");
    let frontend = benchmarks::frontend::run_all()?;
    eprintln!("Timing pipeline...");
    let pipeline = benchmarks::pipeline::run_all()?;

    let report = BenchmarkReport {
        timestamp: chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        frontend,
        pipeline,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    print_report(&report);
    fs::create_dir_all("benchmarks/results")?;
    let path = format!(
        "benchmarks/results/{}.json",
        chrono::Utc::now().format("%Y%m%d_%H%M%S")
    );
    fs::write(&path, serde_json::to_string_pretty(&report)?)?;
    println!("\nSaved {}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throughput_from_mean_time() {
        let timing = Timing {
            iterations: 4,
            mean_ms: 500.0,
            min_ms: 400.0,
            max_ms: 600.0,
        };
        assert_eq!(kb_per_sec(2048, &timing), 4.0);
        let instant = Timing { mean_ms: 0.0, ..timing };
        assert_eq!(kb_per_sec(2048, &instant), 0.0);
    }

    #[test]
    fn test_time_runs_warmup_plus_iterations() {
        let mut calls = 0;
        let timing = time(5, || calls += 1);
        assert_eq!(calls, 6);
        assert_eq!(timing.iterations, 5);
        assert!(timing.min_ms <= timing.mean_ms && timing.mean_ms <= timing.max_ms);
    }
}
