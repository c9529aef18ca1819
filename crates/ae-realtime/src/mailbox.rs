//! Triple-buffered parameter mailbox
//!
//! One writer (control thread) publishes whole snapshots; one reader (audio
//! thread) picks up the most recent one at block boundaries.
//!
//! Each side owns one of the three buffers outright. The third ("ready")
//! buffer is named by a single atomic word together with a *fresh* bit:
//! - `publish` fills the writer's buffer, then swaps it into the ready slot
//!   with the fresh bit set, taking the old ready buffer as its next target
//! - `latest` swaps ready and read only when the fresh bit is set
//!
//! Neither side ever waits. The reader never sees a partial snapshot, never
//! sees an older snapshot after a newer one, and intermediate publishes
//! between two reads coalesce into the last one.

use crossbeam_utils::CachePadded;
use portable_atomic::{AtomicU32, Ordering};
use std::cell::UnsafeCell;
use std::sync::Arc;

const INDEX_MASK: u32 = 0b11;
const FRESH: u32 = 0b100;

struct Shared<T> {
    buffers: [UnsafeCell<T>; 3],
    /// Bits 0-1: ready index, bit 2: fresh
    ready: CachePadded<AtomicU32>,
}

// Safe because each buffer is reachable by at most one side at a time:
// the writer's, the reader's, or the one parked in `ready`.
unsafe impl<T: Send> Sync for Shared<T> {}
unsafe impl<T: Send> Send for Shared<T> {}

/// Writer half (control thread)
pub struct ParamPublisher<T> {
    shared: Arc<Shared<T>>,
    write: usize,
    published: u64,
}

/// Reader half (audio thread)
pub struct ParamReceiver<T> {
    shared: Arc<Shared<T>>,
    read: usize,
}

/// Create a mailbox holding `initial` in all three buffers
pub fn mailbox<T: Clone + Send>(initial: T) -> (ParamPublisher<T>, ParamReceiver<T>) {
    let shared = Arc::new(Shared {
        buffers: [
            UnsafeCell::new(initial.clone()),
            UnsafeCell::new(initial.clone()),
            UnsafeCell::new(initial),
        ],
        // write=0, ready=1, read=2
        ready: CachePadded::new(AtomicU32::new(1)),
    });
    (
        ParamPublisher {
            shared: shared.clone(),
            write: 0,
            published: 0,
        },
        ParamReceiver { shared, read: 2 },
    )
}

impl<T: Send> ParamPublisher<T> {
    /// Publish a complete snapshot (never waits)
    pub fn publish(&mut self, value: T) {
        // SAFETY: `write` is owned by this side until it is swapped out below
        unsafe {
            *self.shared.buffers[self.write].get() = value;
        }
        let previous = self
            .shared
            .ready
            .swap(self.write as u32 | FRESH, Ordering::AcqRel);
        self.write = (previous & INDEX_MASK) as usize;
        self.published += 1;
    }

    /// Snapshots published so far
    pub fn published(&self) -> u64 {
        self.published
    }

    /// True if the last publish has not been picked up yet
    pub fn is_pending(&self) -> bool {
        self.shared.ready.load(Ordering::Acquire) & FRESH != 0
    }
}

impl<T: Send> ParamReceiver<T> {
    /// Newest snapshot if one was published since the previous call
    #[inline]
    pub fn latest(&mut self) -> Option<&T> {
        if self.shared.ready.load(Ordering::Relaxed) & FRESH == 0 {
            return None;
        }
        let previous = self.shared.ready.swap(self.read as u32, Ordering::AcqRel);
        self.read = (previous & INDEX_MASK) as usize;
        // SAFETY: `read` now names the buffer the writer released with its swap
        Some(unsafe { &*self.shared.buffers[self.read].get() })
    }

    /// Most recently received snapshot
    #[inline]
    pub fn current(&self) -> &T {
        // SAFETY: the writer never touches the reader's buffer
        unsafe { &*self.shared.buffers[self.read].get() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_nothing_fresh_until_published() {
        let (mut tx, mut rx) = mailbox(0u32);
        assert!(rx.latest().is_none());
        assert_eq!(*rx.current(), 0);

        tx.publish(7);
        assert!(tx.is_pending());
        assert_eq!(rx.latest().copied(), Some(7));
        assert!(!tx.is_pending());
        assert!(rx.latest().is_none());
        assert_eq!(*rx.current(), 7);
    }

    #[test]
    fn test_publishes_coalesce_to_newest() {
        let (mut tx, mut rx) = mailbox(0u32);
        for v in 1..=5 {
            tx.publish(v);
        }
        assert_eq!(rx.latest().copied(), Some(5));
        assert!(rx.latest().is_none());
        assert_eq!(tx.published(), 5);
    }

    #[test]
    fn test_interleaved_never_goes_back() {
        let (mut tx, mut rx) = mailbox(0u32);
        tx.publish(1);
        tx.publish(2);
        assert_eq!(rx.latest().copied(), Some(2));
        tx.publish(3);
        assert_eq!(rx.latest().copied(), Some(3));
        tx.publish(4);
        tx.publish(5);
        tx.publish(6);
        assert_eq!(rx.latest().copied(), Some(6));
        assert_eq!(*rx.current(), 6);
    }

    #[test]
    fn test_threaded_snapshots_whole_and_monotonic() {
        // Every snapshot is 16 copies of one counter: a torn read would mix values
        let (mut tx, mut rx) = mailbox([0u64; 16]);
        const COUNT: u64 = 200_000;

        let writer = thread::spawn(move || {
            for n in 1..=COUNT {
                tx.publish([n; 16]);
            }
        });

        let mut last = 0;
        while last < COUNT {
            if let Some(snapshot) = rx.latest() {
                let n = snapshot[0];
                assert!(snapshot.iter().all(|&v| v == n), "torn snapshot");
                assert!(n > last, "stale-after-newer: {} after {}", n, last);
                last = n;
            }
        }
        writer.join().unwrap();
    }
}
