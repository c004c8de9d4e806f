//! RingBatch - Lock-Free Multi-Producer Batch Ring Buffer
//!
//! Many producer threads claim batches of fixed-size entries without blocking
//! each other, write into a shared pre-allocated arena and publish. Batches
//! become visible strictly in batch order no matter which producer finishes
//! first. Independent reader groups consume every batch at their own pace, and
//! a batch is recycled only once every group acknowledged it.
//!
//! # Key Features
//!
//! - CAS-based claiming with cooperative backoff and cancellation tokens
//! - Ordered publish: the producer that closes a gap advances the frontier
//! - Up to 16 reader groups of up to 8 members, no per-group copies
//! - One-cache-line descriptors and cache-padded cursors
//! - Every operation returns its own `Result`
//!
//! # Example
//!
//! ```
//! use ringbatch_rs::{AckOutcome, CancelToken, Config, RingBuffer};
//!
//! let ring = RingBuffer::new(Config::new(16, 256, 64)).unwrap();
//! let reader = ring.subscribe(1).unwrap();
//!
//! // Producer: claim, write, publish
//! let mut batch = ring.claim(2, &CancelToken::new()).unwrap();
//! batch.write_entry(0, b"hello").unwrap();
//! batch.write_entry(1, b"world").unwrap();
//! batch.publish();
//!
//! // Reader: poll, read, ack, release
//! let view = reader.poll().unwrap();
//! for entry in view.entries() {
//!     println!("{:?}", &entry[..5]);
//! }
//! let batch_num = view.batch_num();
//! if reader.ack(view).unwrap() == AckOutcome::Consumed {
//!     ring.release(batch_num).unwrap();
//! }
//! assert_eq!(ring.barrier_batch_num(), 1);
//! ```

// Logging macros compile to nothing unless the `tracing` feature is enabled.
#[cfg(feature = "tracing")]
macro_rules! trace_debug { ($($arg:tt)*) => { tracing::debug!($($arg)*) } }
#[cfg(not(feature = "tracing"))]
macro_rules! trace_debug { ($($arg:tt)*) => {} }

#[cfg(feature = "tracing")]
macro_rules! trace_warn { ($($arg:tt)*) => { tracing::warn!($($arg)*) } }
#[cfg(not(feature = "tracing"))]
macro_rules! trace_warn { ($($arg:tt)*) => {} }

mod arena;
mod backoff;
mod batch;
mod cancel;
mod config;
mod cursors;
mod descriptor;
mod error;
mod invariants;
mod metrics;
mod registry;
mod ring;
mod stats;

pub use arena::EntrySlice;
pub use backoff::Backoff;
pub use batch::Batch;
pub use cancel::CancelToken;
pub use config::{BackoffPolicy, Config, RingInfo, HIGH_THROUGHPUT_CONFIG, LOW_LATENCY_CONFIG};
pub use descriptor::{BatchState, ReleaseNotice, CACHE_LINE, MAX_GROUPS, MAX_MEMBERS, SENTINEL};
pub use error::{
    AckError, ClaimError, EntryError, InitError, OverflowReason, ReleaseError, Resource,
    SubscribeError,
};
pub use metrics::{Metrics, MetricsSnapshot};
pub use registry::{AckOutcome, BatchView, ReaderHandle};
pub use ring::RingBuffer;
pub use stats::{GroupStats, RingStats};
