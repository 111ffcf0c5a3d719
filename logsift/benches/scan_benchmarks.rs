#![allow(unused_must_use)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use logsift::{
    config::{PatternMode, ScanConfig},
    scan, FileProcessor, PatternMatcher,
};
use std::{fs::File, io::Write, num::NonZeroUsize, path::Path};
use tempfile::tempdir;

fn create_log_file(path: &Path, lines: usize) -> std::io::Result<u64> {
    let mut file = File::create(path)?;
    for i in 0..lines {
        let level = match i % 50 {
            0 => "ERROR",
            1..=5 => "WARN",
            _ => "INFO",
        };
        writeln!(
            file,
            "2024-03-01T12:{:02}:{:02}Z {} worker-{} request_id={} latency_ms={}",
            (i / 60) % 60,
            i % 60,
            level,
            i % 8,
            i,
            i % 997
        )?;
    }
    Ok(file.metadata()?.len())
}

fn bench_patterns(c: &mut Criterion) -> std::io::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("app.log");
    let size = create_log_file(&path, 200_000)?;

    let patterns = [
        ("literal", "ERROR", PatternMode::Literal),
        ("regex_simple", "ERROR", PatternMode::Regex),
        ("regex_complex", r"request_id=\d+ latency_ms=9\d\d", PatternMode::Regex),
    ];

    let mut group = c.benchmark_group("Pattern Mode");
    group.throughput(Throughput::Bytes(size));
    for (name, pattern, mode) in patterns {
        let processor = FileProcessor::new(
            PatternMatcher::new(pattern, mode).map_err(std::io::Error::other)?,
            64 * 1024 * 1024,
            0,
        );
        group.bench_function(name, |b| {
            b.iter(|| black_box(processor.process_file(&path)));
        });
    }
    group.finish();
    Ok(())
}

fn bench_chunk_size(c: &mut Criterion) -> std::io::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("app.log");
    let size = create_log_file(&path, 200_000)?;

    let mut group = c.benchmark_group("Chunk Size");
    group.throughput(Throughput::Bytes(size));
    for chunk in [64 * 1024u64, 1024 * 1024, 16 * 1024 * 1024] {
        let processor = FileProcessor::new(
            PatternMatcher::new("ERROR", PatternMode::Literal).map_err(std::io::Error::other)?,
            chunk,
            0,
        );
        group.bench_with_input(BenchmarkId::from_parameter(chunk), &chunk, |b, _| {
            b.iter(|| black_box(processor.process_file(&path)));
        });
    }
    group.finish();
    Ok(())
}

fn bench_file_scaling(c: &mut Criterion) -> std::io::Result<()> {
    let logs = tempdir()?;
    for i in 0..32 {
        create_log_file(&logs.path().join(format!("app_{}.log", i)), 5_000)?;
    }

    let mut group = c.benchmark_group("Worker Scaling");
    for threads in [1usize, 2, 4, 8] {
        let config = ScanConfig {
            thread_count: NonZeroUsize::new(threads),
            ..ScanConfig::literal("ERROR", logs.path())
        };
        group.bench_with_input(BenchmarkId::from_parameter(threads), &config, |b, config| {
            b.iter(|| {
                let out = tempdir().unwrap();
                black_box(scan(config, out.path()).unwrap())
            });
        });
    }
    group.finish();
    Ok(())
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(20);
    targets = bench_patterns, bench_chunk_size, bench_file_scaling
}

criterion_main!(benches);
