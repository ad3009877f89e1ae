//! Whole-pipeline timings per target and feature set

use super::sample_program;
use crate::{kb_per_sec, time, PipelineResult};
use anyhow::Result;
use moonveil_core::{obfuscate, Features, ObfuscateOptions, Target};

const ITERATIONS: u32 = 20;

fn feature_sets() -> Vec<(&'static str, Features)> {
    let only = |configure: fn(&mut Features)| {
        let mut features = Features::default();
        configure(&mut features);
        features
    };
    vec![
        ("none", Features::default()),
        ("rename", only(|f| f.variable_renaming = true)),
        ("strings", only(|f| f.string_encryption = true)),
        ("constants", only(|f| f.constant_encryption = true)),
        ("controlflow", only(|f| f.control_flow = true)),
        ("vm", only(|f| f.vm_obfuscation = true)),
        ("recommended", Features::recommended()),
        ("all", Features::all()),
    ]
}

pub fn run_all() -> Result<Vec<PipelineResult>> {
    let source = sample_program(40);

    let mut results = Vec::new();
    for target in [Target::Standard, Target::Roblox, Target::Loadstring] {
        for (name, features) in feature_sets() {
            let options = ObfuscateOptions::new(target, 42, features);
            // Output is deterministic, so one run gives the sizes for all
            let output = obfuscate(&source, &options)?;
            let timing = time(ITERATIONS, || {
                std::hint::black_box(obfuscate(&source, &options).ok());
            });
            let stats = &output.stats;
            results.push(PipelineResult {
                target: target.to_string(),
                features: name.to_string(),
                input_bytes: stats.input_size,
                output_bytes: stats.output_size,
                size_ratio: stats.output_size as f64 / stats.input_size.max(1) as f64,
                strings_encrypted: stats.strings_encrypted,
                constants_encrypted: stats.constants_encrypted,
                warnings: stats.warnings.len(),
                kb_per_sec: kb_per_sec(stats.input_size, &timing),
                timing,
            });
        }
    }
    Ok(results)
}
