//! Lexer, parser, printer and minifier timings

use super::sample_program;
use crate::{kb_per_sec, time, StageResult};
use anyhow::Result;
use moonveil_core::lexer::tokenize;
use moonveil_core::{minify, parse, print_block};

const ITERATIONS: u32 = 50;

pub fn run_all() -> Result<Vec<StageResult>> {
    let source = sample_program(300);
    let ast = parse(&source)?;

    let stages: [(&str, Box<dyn Fn() + '_>); 4] = [
        ("tokenize", Box::new(|| {
            std::hint::black_box(tokenize(&source).ok());
        })),
        ("parse", Box::new(|| {
            std::hint::black_box(parse(&source).ok());
        })),
        ("print", Box::new(|| {
            std::hint::black_box(print_block(&ast));
        })),
        ("minify", Box::new(|| {
            std::hint::black_box(minify(&source).ok());
        })),
    ];

    Ok(stages
        .iter()
        .map(|(stage, f)| {
            let timing = time(ITERATIONS, f);
            StageResult {
                stage: stage.to_string(),
                input_bytes: source.len(),
                kb_per_sec: kb_per_sec(source.len(), &timing),
                timing,
            }
        })
        .collect())
}
