//! Benchmarks for buffer allocation and codec hot paths
//!
//! Run with: cargo bench

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use rivulet::text::write_utf8;
use rivulet::{BufAllocator, ByteBuf, PooledAllocator};

/// Benchmark pooled acquire/release cycles
fn bench_pool(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool");
    let alloc = PooledAllocator;

    for size in [64, 1024, 16384] {
        group.bench_with_input(
            BenchmarkId::new("acquire_release", size),
            &size,
            |b, &size| {
                b.iter(|| {
                    let buf = alloc.buffer(black_box(size));
                    buf.release().unwrap();
                });
            },
        );
    }

    group.finish();
}

/// Benchmark cursor writes and reads
fn bench_rw(c: &mut Criterion) {
    let mut group = c.benchmark_group("rw");

    for size in [256, 4096, 65536] {
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("write_read", size), &size, |b, &size| {
            let payload = vec![0x42u8; size];
            b.iter(|| {
                let mut buf = ByteBuf::pooled(size, size * 2).unwrap();
                buf.write_bytes(black_box(&payload)).unwrap();
                let out = buf.read_bytes(size).unwrap();
                buf.release().unwrap();
                out
            });
        });
    }

    group.finish();
}

/// Benchmark the UTF-16 to UTF-8 fast path
fn bench_text(c: &mut Criterion) {
    let mut group = c.benchmark_group("text");

    for size in [64, 1024, 8192] {
        let ascii: Vec<u16> = "a".repeat(size).encode_utf16().collect();
        let mixed: Vec<u16> = "Hello, 世界! 🎉 "
            .repeat(size / 20 + 1)
            .encode_utf16()
            .collect();

        group.bench_with_input(BenchmarkId::new("ascii", size), &ascii, |b, units| {
            b.iter(|| {
                let mut buf = ByteBuf::pooled(units.len() * 3, usize::MAX >> 1).unwrap();
                write_utf8(&mut buf, black_box(units)).unwrap();
                buf.release().unwrap();
            });
        });

        group.bench_with_input(
            BenchmarkId::new("mixed", mixed.len()),
            &mixed,
            |b, units| {
                b.iter(|| {
                    let mut buf = ByteBuf::pooled(units.len() * 3, usize::MAX >> 1).unwrap();
                    write_utf8(&mut buf, black_box(units)).unwrap();
                    buf.release().unwrap();
                });
            },
        );
    }

    group.finish();
}

/// Benchmark the deflate codec round trip
#[cfg(feature = "permessage-deflate")]
fn bench_deflate(c: &mut Criterion) {
    use rivulet::deflate::{DeflateConfig, DeflateDecoder, DeflateEncoder};
    use rivulet::{Error, Frame, HandlerContext, InboundHandler, OutboundHandler, Result};

    struct BenchContext {
        alloc: PooledAllocator,
    }

    impl HandlerContext for BenchContext {
        fn alloc(&self) -> &dyn BufAllocator {
            &self.alloc
        }
        fn fire_channel_read(&self, frame: Frame) {
            let _ = frame.release();
        }
        fn write(&self, frame: Frame) -> Result<()> {
            let _ = frame.release();
            Ok(())
        }
        fn fire_exception_caught(&self, _error: Error) {}
    }

    let mut group = c.benchmark_group("deflate");
    let ctx = BenchContext {
        alloc: PooledAllocator,
    };

    for size in [256, 4096, 65536] {
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("roundtrip", size), &size, |b, &size| {
            let mut encoder = DeflateEncoder::new(DeflateConfig::default()).unwrap();
            let mut decoder = DeflateDecoder::new(DeflateConfig::default()).unwrap();
            let message = b"compressible benchmark payload "
                .iter()
                .cycle()
                .take(size)
                .copied()
                .collect::<Vec<u8>>();

            b.iter(|| {
                let mut payload = ctx.alloc.buffer(message.len());
                payload.write_bytes(&message).unwrap();

                let mut compressed = Vec::new();
                encoder
                    .encode(&ctx, Frame::binary(payload), &mut compressed)
                    .unwrap();
                let mut decompressed = Vec::new();
                decoder
                    .decode(&ctx, compressed.pop().unwrap(), &mut decompressed)
                    .unwrap();
                decompressed.pop().unwrap().release().unwrap();
            });
        });
    }

    group.finish();
}

#[cfg(feature = "permessage-deflate")]
criterion_group!(benches, bench_pool, bench_rw, bench_text, bench_deflate);
#[cfg(not(feature = "permessage-deflate"))]
criterion_group!(benches, bench_pool, bench_rw, bench_text);
criterion_main!(benches);
