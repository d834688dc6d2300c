use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ringqueue_rs::{CancelToken, PersistentQueue};
use std::sync::Arc;
use std::thread;
use tempfile::NamedTempFile;

const MSGS: u64 = 200_000;

fn temp_path() -> std::path::PathBuf {
    NamedTempFile::new().unwrap().path().to_path_buf()
}

fn bench_single_threaded_offer_poll(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_threaded");
    group.throughput(Throughput::Elements(MSGS));

    group.bench_function("offer_then_poll", |b| {
        b.iter(|| {
            let path = temp_path();
            let queue = PersistentQueue::<u64>::open(&path, 64, 1 << 22).unwrap();
            let mut drained_during_fill = 0u64;
            for i in 0..MSGS {
                while !queue.offer(&i).unwrap() {
                    // ring full; drain the oldest record to make room
                    black_box(queue.poll().unwrap());
                    drained_during_fill += 1;
                }
            }
            let remaining = MSGS - drained_during_fill;
            let mut received = 0u64;
            while received < remaining {
                if let Some(v) = queue.poll().unwrap() {
                    black_box(v);
                    received += 1;
                }
            }
        });
    });

    group.finish();
}

fn bench_spsc(c: &mut Criterion) {
    let mut group = c.benchmark_group("spsc");
    group.throughput(Throughput::Elements(MSGS));

    group.bench_function("put_take", |b| {
        b.iter(|| {
            let path = temp_path();
            let queue = Arc::new(PersistentQueue::<u64>::open(&path, 64, 1 << 22).unwrap());

            let producer_queue = queue.clone();
            let producer = thread::spawn(move || {
                let cancel = CancelToken::new();
                for i in 0..MSGS {
                    producer_queue.put(&i, &cancel).unwrap();
                }
            });

            let mut received = 0u64;
            let cancel = CancelToken::new();
            while received < MSGS {
                black_box(queue.take(&cancel).unwrap());
                received += 1;
            }
            producer.join().unwrap();
        });
    });

    group.finish();
}

fn bench_block_size_sensitivity(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_size");

    for block_size in [16u32, 64, 256, 1024].iter() {
        let total = 50_000u64;
        group.throughput(Throughput::Elements(total));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("block_{block_size}")),
            block_size,
            |b, &bs| {
                b.iter(|| {
                    let path = temp_path();
                    let queue = PersistentQueue::<u64>::open(&path, bs, 1 << 22).unwrap();
                    for i in 0..total {
                        while !queue.offer(&i).unwrap() {
                            black_box(queue.poll().unwrap());
                        }
                    }
                    while queue.poll().unwrap().is_some() {}
                });
            },
        );
    }

    group.finish();
}

fn bench_mpmc(c: &mut Criterion) {
    let mut group = c.benchmark_group("mpmc");

    for producers in [2usize, 4, 8].iter() {
        let per_producer = 20_000u64;
        let total = per_producer * (*producers as u64);
        group.throughput(Throughput::Elements(total));

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{producers}P_{producers}C")),
            producers,
            |b, &n| {
                b.iter(|| {
                    let path = temp_path();
                    let queue = Arc::new(PersistentQueue::<u64>::open(&path, 64, 1 << 24).unwrap());

                    let mut producer_handles = Vec::new();
                    for _ in 0..n {
                        let queue = queue.clone();
                        producer_handles.push(thread::spawn(move || {
                            let cancel = CancelToken::new();
                            for i in 0..per_producer {
                                queue.put(&i, &cancel).unwrap();
                            }
                        }));
                    }

                    let mut consumer_handles = Vec::new();
                    for _ in 0..n {
                        let queue = queue.clone();
                        consumer_handles.push(thread::spawn(move || {
                            let cancel = CancelToken::new();
                            let mut seen = 0u64;
                            while seen < per_producer {
                                black_box(queue.take(&cancel).unwrap());
                                seen += 1;
                            }
                        }));
                    }

                    for h in producer_handles {
                        h.join().unwrap();
                    }
                    for h in consumer_handles {
                        h.join().unwrap();
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_single_threaded_offer_poll,
    bench_spsc,
    bench_block_size_sensitivity,
    bench_mpmc
);
criterion_main!(benches);
