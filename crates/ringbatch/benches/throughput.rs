use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ringbatch_rs::{AckOutcome, CancelToken, Config, ReaderHandle, RingBuffer};
use std::thread;

const BATCHES_PER_PRODUCER: u64 = 100_000;
const ENTRIES_PER_BATCH: usize = 16;
const ENTRY_SIZE: usize = 64;

fn config() -> Config {
    Config::new(1024, 64 * 1024, ENTRY_SIZE)
}

/// Drains `target` batches, releasing each batch whose last group acked it.
fn drain_with(ring: &RingBuffer, reader: &ReaderHandle, target: u64) -> u64 {
    let mut count = 0u64;
    while count < target {
        if let Some(view) = reader.poll() {
            for entry in view.entries() {
                black_box(entry[0]);
            }
            let batch_num = view.batch_num();
            if reader.ack(view).unwrap() == AckOutcome::Consumed {
                ring.release(batch_num).unwrap();
            }
            count += 1;
        } else {
            std::hint::spin_loop();
        }
    }
    count
}

fn produce(ring: &RingBuffer, batches: u64) {
    let token = CancelToken::new();
    for i in 0..batches {
        let mut batch = ring.claim(ENTRIES_PER_BATCH, &token).unwrap();
        for e in 0..ENTRIES_PER_BATCH {
            batch.entry_mut(e).unwrap()[..8].copy_from_slice(&i.to_le_bytes());
        }
        batch.publish();
    }
}

fn bench_claim_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("claim_publish");
    group.throughput(Throughput::Elements(BATCHES_PER_PRODUCER));

    // No reader groups: every batch is recycled as soon as it is visible.
    group.bench_function("no_readers", |b| {
        b.iter(|| {
            let ring = RingBuffer::new(config()).unwrap();
            produce(&ring, BATCHES_PER_PRODUCER);
            assert_eq!(ring.barrier_batch_num(), BATCHES_PER_PRODUCER);
        });
    });

    group.finish();
}

fn bench_single_reader(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_reader");
    group.throughput(Throughput::Elements(BATCHES_PER_PRODUCER));

    group.bench_function("1P_1G", |b| {
        b.iter(|| {
            let ring = RingBuffer::new(config()).unwrap();
            let reader = ring.subscribe(1).unwrap();

            let producer = {
                let ring = ring.clone();
                thread::spawn(move || produce(&ring, BATCHES_PER_PRODUCER))
            };

            let count = drain_with(&ring, &reader, BATCHES_PER_PRODUCER);
            producer.join().unwrap();
            assert_eq!(count, BATCHES_PER_PRODUCER);
        });
    });

    group.finish();
}

fn bench_multi_producer(c: &mut Criterion) {
    let mut group = c.benchmark_group("multi_producer");

    for num_producers in [2, 4, 8].iter() {
        let total = BATCHES_PER_PRODUCER * (*num_producers as u64);
        group.throughput(Throughput::Elements(total));

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}P_1G", num_producers)),
            num_producers,
            |b, &n| {
                b.iter(|| {
                    let ring = RingBuffer::new(config()).unwrap();
                    let consumer = {
                        let ring = ring.clone();
                        // Subscribe before any producer starts so no batch is skipped.
                        let reader = ring.subscribe(1).unwrap();
                        thread::spawn(move || drain_with(&ring, &reader, total))
                    };

                    let producers: Vec<_> = (0..n)
                        .map(|_| {
                            let ring = ring.clone();
                            thread::spawn(move || produce(&ring, BATCHES_PER_PRODUCER))
                        })
                        .collect();

                    for handle in producers {
                        handle.join().unwrap();
                    }
                    assert_eq!(consumer.join().unwrap(), total);
                });
            },
        );
    }

    group.finish();
}

fn bench_reader_groups(c: &mut Criterion) {
    let mut group = c.benchmark_group("reader_groups");
    group.throughput(Throughput::Elements(BATCHES_PER_PRODUCER));

    for num_groups in [1u32, 2, 4].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("1P_{}G", num_groups)),
            num_groups,
            |b, &g| {
                b.iter(|| {
                    let ring = RingBuffer::new(config()).unwrap();
                    let consumers: Vec<_> = (0..g)
                        .map(|id| {
                            let ring = ring.clone();
                            let reader = ring.subscribe(id + 1).unwrap();
                            thread::spawn(move || drain_with(&ring, &reader, BATCHES_PER_PRODUCER))
                        })
                        .collect();

                    produce(&ring, BATCHES_PER_PRODUCER);
                    for handle in consumers {
                        assert_eq!(handle.join().unwrap(), BATCHES_PER_PRODUCER);
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_batch_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_sizes");
    let batches = 10_000u64;

    for entries in [1usize, 16, 256].iter() {
        group.throughput(Throughput::Elements(batches * *entries as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("entries_{}", entries)),
            entries,
            |b, &n| {
                b.iter(|| {
                    let ring = RingBuffer::new(config()).unwrap();
                    let token = CancelToken::new();
                    let consumer = {
                        let ring = ring.clone();
                        let reader = ring.subscribe(1).unwrap();
                        thread::spawn(move || drain_with(&ring, &reader, batches))
                    };
                    for _ in 0..batches {
                        let mut batch = ring.claim(n, &token).unwrap();
                        for e in 0..n {
                            black_box(batch.entry_mut(e).unwrap())[0] = 1;
                        }
                        batch.publish();
                    }
                    consumer.join().unwrap();
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_claim_publish,
    bench_single_reader,
    bench_multi_producer,
    bench_reader_groups,
    bench_batch_sizes
);
criterion_main!(benches);
