//! Lexer, parser and printer benchmarks using Criterion

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use moonveil_core::lexer::tokenize;
use moonveil_core::{minify, parse, print_block};

fn create_program(functions: usize) -> String {
    let mut source = String::from("local Inventory = {}\nInventory.__index = Inventory\n");
    for i in 0..functions {
        source.push_str(&format!(
            "function Inventory:item_{i}(count, ...)\n  \
             local total = 0 -- running sum\n  \
             for k = 1, count do\n    \
             if k % 3 == 0 then total = total + k * {i} else total = total - 0x{i:x} end\n  \
             end\n  \
             local names = {{ \"slot_{i}\", 'extra', [[long\nname]] }}\n  \
             return total, #names, select('#', ...)\n\
             end\n"
        ));
    }
    source.push_str("return Inventory\n");
    source
}

fn frontend_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("frontend");

    let small = create_program(10);
    group.bench_function("tokenize_small_program", |b| b.iter(|| black_box(tokenize(&small).unwrap())));

    let large = create_program(400);
    group.throughput(Throughput::Bytes(large.len() as u64));
    group.bench_function("tokenize_large_program", |b| b.iter(|| black_box(tokenize(&large).unwrap())));
    group.bench_function("parse_large_program", |b| b.iter(|| black_box(parse(&large).unwrap())));

    let ast = parse(&large).unwrap();
    group.bench_function("print_large_program", |b| b.iter(|| black_box(print_block(&ast))));
    group.bench_function("minify_large_program", |b| b.iter(|| black_box(minify(&large).unwrap())));

    group.finish();
}

criterion_group!(benches, frontend_benchmarks);
criterion_main!(benches);
