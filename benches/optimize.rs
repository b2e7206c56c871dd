//! Benchmarks for the redeflate optimization subsystems.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use redeflate::deflate::block::FixedBlock;
use redeflate::{
    choose_cl_lengths, optimal_parse, optimize_block, optimize_lit_lengths, DynamicBlock,
    RleDpCache, Token,
};

/// Python-flavored synthetic source text with plenty of repetition
fn generate_source_text(size: usize, seed: u64) -> Vec<u8> {
    let fragments: [&[u8]; 6] = [
        b"for i in range(",
        b"):print(",
        b"def f(x):return x",
        b"a=a+1;b=b*2\n",
        b"if a<b:a,b=b,a\n",
        b"q=[i*i for i in r]\n",
    ];
    let mut rng = StdRng::seed_from_u64(seed);
    let mut text = Vec::with_capacity(size);
    while text.len() < size {
        let fragment = fragments[rng.gen_range(0..fragments.len())];
        text.extend_from_slice(fragment);
    }
    text.truncate(size);
    text
}

fn block_for(text: &[u8]) -> DynamicBlock {
    let mut block = FixedBlock {
        bfinal: true,
        tokens: text.iter().map(|&b| Token::Literal(b)).collect(),
    }
    .to_dynamic();
    block.tokens = optimal_parse(&block, &[]);
    block
}

fn bench_optimal_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("optimal_parse");
    for size in [256usize, 1024] {
        let text = generate_source_text(size, 1);
        let block = block_for(&text);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &block, |b, block| {
            b.iter(|| optimal_parse(block, &[]))
        });
    }
    group.finish();
}

fn bench_lit_lengths(c: &mut Criterion) {
    let mut group = c.benchmark_group("lit_lengths");
    for size in [256usize, 1024] {
        let text = generate_source_text(size, 2);
        let block = block_for(&text);
        group.bench_with_input(BenchmarkId::from_parameter(size), &block, |b, block| {
            let mut cache = RleDpCache::new();
            b.iter_batched(
                || block.clone(),
                |mut block| optimize_lit_lengths(&mut block, 9, &mut cache).unwrap(),
                criterion::BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

fn bench_cl_chooser(c: &mut Criterion) {
    let text = generate_source_text(1024, 3);
    let mut block = block_for(&text);
    let mut cache = RleDpCache::new();
    let mut rng = StdRng::seed_from_u64(3);
    optimize_block(&mut block, &[], false, 4, &mut cache, &mut rng).unwrap();

    c.bench_function("cl_chooser", |b| {
        let mut cache = RleDpCache::new();
        b.iter(|| choose_cl_lengths(&block.lit_lengths, &block.dist_lengths, &mut cache).unwrap())
    });
}

fn bench_optimize_block(c: &mut Criterion) {
    let mut group = c.benchmark_group("optimize_block");
    group.sample_size(10);
    for size in [256usize, 1024] {
        let text = generate_source_text(size, 4);
        let block = block_for(&text);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &block, |b, block| {
            let mut cache = RleDpCache::new();
            b.iter_batched(
                || (block.clone(), StdRng::seed_from_u64(5)),
                |(mut block, mut rng)| {
                    optimize_block(&mut block, &[], false, 3, &mut cache, &mut rng).unwrap()
                },
                criterion::BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_optimal_parse,
    bench_lit_lengths,
    bench_cl_chooser,
    bench_optimize_block
);
criterion_main!(benches);
