//! Benchmarks for the bit stream reader and writer.

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::hint::black_box;
use avifgain_core::stream::{StreamReader, StreamWriter};

/// A flat run of `count` small boxes, each carrying a few fields.
fn create_box_run(count: usize) -> Vec<u8> {
    let mut w = StreamWriter::new();
    for i in 0..count {
        let marker = w.write_full_box(b"ispe", 0, 0).unwrap();
        w.write_u32(i as u32).unwrap();
        w.write_u32(i as u32 * 2).unwrap();
        w.finish_box(marker).unwrap();
    }
    w.finish_write()
}

fn bench_box_headers(c: &mut Criterion) {
    let mut group = c.benchmark_group("box_headers");
    let data = create_box_run(4096);
    group.throughput(Throughput::Bytes(data.len() as u64));

    group.bench_function("read", |b| {
        b.iter(|| {
            let mut r = StreamReader::new(black_box(&data), "bench");
            let mut sum = 0u64;
            while r.has_bytes_left(1) {
                let header = r.read_box_header().unwrap();
                let mut content = r.box_content(&header).unwrap();
                content.read_version_and_flags().unwrap();
                sum += content.read_u32().unwrap() as u64;
            }
            sum
        })
    });

    group.bench_function("write", |b| b.iter(|| create_box_run(black_box(4096))));

    group.finish();
}

fn bench_bits(c: &mut Criterion) {
    let mut group = c.benchmark_group("bits");
    let fields = 1 << 16;
    // 3 + 5 + 1 + 7 bits per field.
    group.throughput(Throughput::Bytes(fields as u64 * 2));

    group.bench_function("write", |b| {
        b.iter(|| {
            let mut w = StreamWriter::new();
            for i in 0..fields {
                w.write_bits(i & 0x7, 3).unwrap();
                w.write_bits(i & 0x1f, 5).unwrap();
                w.write_bits(i & 1, 1).unwrap();
                w.write_bits(i & 0x7f, 7).unwrap();
            }
            w.finish_write()
        })
    });

    let mut w = StreamWriter::new();
    for i in 0..fields {
        w.write_bits(i & 0x7, 3).unwrap();
        w.write_bits(i & 0x1f, 5).unwrap();
        w.write_bits(i & 1, 1).unwrap();
        w.write_bits(i & 0x7f, 7).unwrap();
    }
    let data = w.finish_write();

    group.bench_function("read", |b| {
        b.iter(|| {
            let mut r = StreamReader::new(black_box(&data), "bench");
            let mut sum = 0u32;
            for _ in 0..fields {
                sum += r.read_bits_u32(3).unwrap();
                sum += r.read_bits_u32(5).unwrap();
                sum += r.read_bool().unwrap() as u32;
                sum += r.read_bits_u32(7).unwrap();
            }
            sum
        })
    });

    group.finish();
}

criterion_group!(benches, bench_box_headers, bench_bits);
criterion_main!(benches);
