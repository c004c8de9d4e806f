use ringbatch_rs::{AckOutcome, CancelToken, Config, RingBuffer};
use std::thread;
use std::time::Instant;

fn main() {
    println!("RingBatch Basic Example");
    println!("=======================\n");

    let config = Config::new(
        256,  // batch descriptors
        4096, // entries in the data arena
        64,   // bytes per entry
    )
    .with_metrics(true);

    let ring = RingBuffer::new(config).unwrap();
    println!("{}\n", ring.info());

    const N_PRODUCERS: usize = 4;
    const BATCHES: usize = 10_000;
    const BATCH_SIZE: usize = 8;

    // Subscribe before producing so the reader sees every batch.
    let reader = ring.subscribe(1).unwrap();
    let start = Instant::now();

    let mut handles = vec![];
    for id in 0..N_PRODUCERS {
        let ring = ring.clone();
        handles.push(thread::spawn(move || {
            let token = CancelToken::new();
            for n in 0..BATCHES {
                let mut batch = ring.claim(BATCH_SIZE, &token).unwrap();
                for i in 0..BATCH_SIZE {
                    let value = ((id * BATCHES + n) * BATCH_SIZE + i) as u64;
                    batch.write_entry(i, &value.to_le_bytes()).unwrap();
                }
                batch.publish();
            }
        }));
    }

    let target = N_PRODUCERS * BATCHES;
    let mut batches = 0;
    let mut checksum = 0u64;
    while batches < target {
        let Some(view) = reader.poll() else {
            thread::yield_now();
            continue;
        };
        for entry in view.entries() {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&entry[..8]);
            checksum = checksum.wrapping_add(u64::from_le_bytes(bytes));
        }
        let batch_num = view.batch_num();
        if reader.ack(view).unwrap() == AckOutcome::Consumed {
            ring.release(batch_num).unwrap();
        }
        batches += 1;
    }

    for handle in handles {
        handle.join().unwrap();
    }
    let duration = start.elapsed();

    let items = (target * BATCH_SIZE) as u64;
    let expected = items * (items - 1) / 2;
    let items_per_sec = items as f64 / duration.as_secs_f64();

    println!("Results:");
    println!("  Batches consumed: {}", batches);
    println!("  Checksum ok: {}", checksum == expected);
    println!("  Duration: {:.2?}", duration);
    println!("  Throughput: {:.2} million entries/sec", items_per_sec / 1_000_000.0);
    println!("\n{}", ring.stats());

    let metrics = ring.metrics();
    println!("  Claims: {}", metrics.claims);
    println!("  Claim spins: {}", metrics.claim_spins);
    println!("  Releases: {}", metrics.releases);
}
