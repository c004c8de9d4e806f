use ringbatch_rs::{AckOutcome, CancelToken, ClaimError, RingBuffer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn main() {
    println!("RingBatch Reader Groups Example");
    println!("===============================\n");

    let ring = RingBuffer::with_capacity(8, 64, 32).unwrap();

    // Group 1 ("indexer") has two members; group 2 ("archiver") has one.
    // A batch is recycled only after all three acked it.
    let indexer_a = ring.subscribe(1).unwrap();
    let indexer_b = ring.subscribe(1).unwrap();
    let archiver = ring.subscribe(2).unwrap();
    println!(
        "indexer members: bits {} and {} of group {}",
        indexer_a.member_bit(),
        indexer_b.member_bit(),
        indexer_a.group_bit()
    );
    println!("archiver: group {}\n", archiver.group_bit());

    let done = Arc::new(AtomicBool::new(false));
    let consumers: Vec<_> = [("indexer-a", indexer_a), ("indexer-b", indexer_b), ("archiver", archiver)]
        .into_iter()
        .map(|(name, reader)| {
            let ring = ring.clone();
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut seen = 0;
                loop {
                    let finished = done.load(Ordering::SeqCst);
                    let Some(view) = reader.poll() else {
                        if finished {
                            break;
                        }
                        thread::yield_now();
                        continue;
                    };
                    seen += 1;
                    let batch_num = view.batch_num();
                    match reader.ack(view).unwrap() {
                        AckOutcome::Consumed => {
                            ring.release(batch_num).unwrap();
                            println!("  {name}: batch {batch_num} consumed by every group, released");
                        }
                        AckOutcome::GroupComplete | AckOutcome::Pending => {}
                    }
                }
                (name, seen)
            })
        })
        .collect();

    // Claims wait while the ring is full; canceling the token aborts them.
    let token = CancelToken::new();
    let mut published = 0;
    let mut notice = None;
    for n in 0..20u32 {
        let mut batch = match ring.claim(4, &token) {
            Ok(batch) => batch,
            Err(ClaimError::Canceled) => break,
            Err(e) => panic!("claim failed: {e}"),
        };
        for i in 0..batch.len() {
            batch.write_entry(i, &n.to_le_bytes()).unwrap();
        }
        if n == 0 {
            notice = Some(batch.release_notice());
        }
        if n % 7 == 6 {
            // Readers never see canceled batches.
            batch.cancel();
            continue;
        }
        batch.publish();
        published += 1;
    }
    done.store(true, Ordering::SeqCst);

    for handle in consumers {
        let (name, seen) = handle.join().unwrap();
        println!("{name} saw {seen} of {published} published batches");
    }

    if let Some(notice) = notice {
        while !notice.is_released() {
            thread::sleep(Duration::from_millis(1));
        }
        println!("\nbatch 0 released: {}", notice.is_released());
    }
    println!("{}", ring.stats());
}
