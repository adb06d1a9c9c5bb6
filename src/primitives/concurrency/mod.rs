#![forbid(unsafe_code)]

use std::sync::atomic::{fence, AtomicU64, Ordering};

use parking_lot::Mutex;

/// Sequence counter that lets readers detect writes overlapping their read.
///
/// Writers are serialized and bump the counter to an odd value before touching
/// the protected bytes and back to even afterwards. Readers only accept a result
/// produced while the counter was even and unchanged, so a torn read is retried
/// instead of being reported to the caller.
#[derive(Default, Debug)]
pub struct WriteSequence {
    seq: AtomicU64,
    writer: Mutex<()>,
    retries: AtomicU64,
}

impl WriteSequence {
    /// Creates a sequence at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` as a write section. The counter returns to even even if `f` panics.
    pub fn write<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.writer.lock();
        self.seq.fetch_add(1, Ordering::AcqRel);
        let _end = WriteEnd(&self.seq);
        f()
    }

    /// Runs `f` until it completes without a concurrent write and returns that result.
    ///
    /// Errors are returned only from a consistent pass; an error observed while a
    /// write was in flight is discarded and the read retried.
    pub fn read<R>(&self, mut f: impl FnMut() -> R) -> R {
        loop {
            let start = self.seq.load(Ordering::Acquire);
            if start & 1 == 1 {
                std::hint::spin_loop();
                continue;
            }
            let result = f();
            fence(Ordering::Acquire);
            if self.seq.load(Ordering::Acquire) == start {
                return result;
            }
            self.retries.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Current counter value. Even when no write is in flight.
    pub fn snapshot(&self) -> u64 {
        self.seq.load(Ordering::Acquire)
    }

    /// Number of reads retried because they overlapped a write.
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }
}

/// Closes a write section when dropped.
struct WriteEnd<'a>(&'a AtomicU64);

impl Drop for WriteEnd<'_> {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::Release);
    }
}
