//! Command throughput through the dispatcher against the in-process store.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use recgate::commands::{CommandHandler, CommandTable};
use recgate::context::Context;
use recgate::expanded::ResolutionCache;
use recgate::protocol::parse_frame;
use recgate::store::MemoryStore;
use std::sync::Arc;
use std::time::Duration;

fn handler(compat: bool, cache: bool) -> CommandHandler {
    let mut ctx = Context::new(Arc::new(MemoryStore::new()), "bench", "cache")
        .unwrap()
        .with_backward_write_compat(compat);
    if cache {
        ctx = ctx.with_cache(ResolutionCache::new(Some(Duration::from_secs(60)), 100_000));
    }
    CommandHandler::new(Arc::new(ctx), Arc::new(CommandTable::standard()))
}

fn args(parts: &[&str]) -> Vec<Bytes> {
    parts
        .iter()
        .map(|p| Bytes::copy_from_slice(p.as_bytes()))
        .collect()
}

fn bench_scalar(c: &mut Criterion) {
    let handler = handler(false, false);
    for i in 0..10_000 {
        handler.dispatch("SET", &args(&[&format!("key:{}", i), "value"]));
    }

    let mut group = c.benchmark_group("scalar");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set", |b| {
        let mut i = 0u64;
        b.iter(|| {
            black_box(handler.dispatch("SET", &args(&[&format!("new:{}", i), "value"])));
            i += 1;
        });
    });

    group.bench_function("get_existing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            black_box(handler.dispatch("GET", &args(&[&format!("key:{}", i % 10_000)])));
            i += 1;
        });
    });

    group.bench_function("incr_single_counter", |b| {
        let key = args(&["counter"]);
        b.iter(|| black_box(handler.dispatch("INCR", &key)));
    });

    group.finish();
}

fn bench_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("encoding");
    group.throughput(Throughput::Elements(1));

    for (name, compat) in [("blob", false), ("legacy", true)] {
        let handler = handler(compat, false);
        let value = Bytes::from(vec![0u8; 1024]);
        group.bench_function(format!("set_get_zero_bytes_{}", name), |b| {
            let key = Bytes::from_static(b"binary");
            b.iter(|| {
                handler.dispatch("SET", &[key.clone(), value.clone()]);
                black_box(handler.dispatch("GET", &[key.clone()]));
            });
        });
    }

    group.finish();
}

fn bench_expanded(c: &mut Criterion) {
    let mut group = c.benchmark_group("expanded");
    group.throughput(Throughput::Elements(1));

    for (name, cache) in [("uncached", false), ("cached", true)] {
        let handler = handler(false, cache);
        for i in 0..100 {
            handler.dispatch("EXPANDED_HSET", &args(&["user", &format!("f{}", i), "v"]));
        }

        group.bench_function(format!("hget_{}", name), |b| {
            let mut i = 0u64;
            b.iter(|| {
                let field = format!("f{}", i % 100);
                black_box(handler.dispatch("EXPANDED_HGET", &args(&["user", &field])));
                i += 1;
            });
        });

        group.bench_function(format!("hincrby_{}", name), |b| {
            let counter = args(&["counters", "hits", "1"]);
            b.iter(|| black_box(handler.dispatch("EXPANDED_HINCRBY", &counter)));
        });

        group.bench_function(format!("hgetall_100_{}", name), |b| {
            let key = args(&["user"]);
            b.iter(|| black_box(handler.dispatch("EXPANDED_HGETALL", &key)));
        });
    }

    group.finish();
}

fn bench_frames(c: &mut Criterion) {
    let handler = handler(false, false);
    let input = b"*3\r\n$3\r\nSET\r\n$8\r\nkey:1234\r\n$11\r\nsmall_value\r\n";

    let mut group = c.benchmark_group("frames");
    group.throughput(Throughput::Bytes(input.len() as u64));

    group.bench_function("parse_execute_serialize", |b| {
        let mut out = Vec::with_capacity(64);
        b.iter(|| {
            out.clear();
            if let Ok(Some((frame, _))) = parse_frame(input) {
                handler.execute(&frame).serialize_into(&mut out);
            }
            black_box(out.len());
        });
    });

    group.finish();
}

fn bench_concurrent(c: &mut Criterion) {
    use std::thread;

    let mut group = c.benchmark_group("concurrent");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("4_threads_expanded_hset", |b| {
        b.iter(|| {
            let handler = handler(false, true);
            let threads: Vec<_> = (0..4)
                .map(|t| {
                    let handler = handler.clone();
                    thread::spawn(move || {
                        for i in 0..2_000 {
                            let field = format!("{}:{}", t, i);
                            handler.dispatch("EXPANDED_HSET", &args(&["shared", &field, "v"]));
                        }
                    })
                })
                .collect();

            for thread in threads {
                thread.join().unwrap();
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_scalar,
    bench_encoding,
    bench_expanded,
    bench_frames,
    bench_concurrent,
);

criterion_main!(benches);
