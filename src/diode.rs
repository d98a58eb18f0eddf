//! A bounded, many-producer / single-consumer ring buffer with
//! overwrite-on-full semantics. Absorbs ingress bursts by trading loss for
//! latency: `set` never blocks and never fails.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::envelope::Envelope;

/// Pads an atomic counter to its own cache line so the write-index and
/// read-index, hammered by different thread populations, don't cause false
/// sharing between producers and the single consumer.
#[repr(align(64))]
struct CachePadded<T>(T);

/// Called with the number of envelopes silently discarded when the reader
/// falls more than `capacity` entries behind the writers.
pub type MissCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// Lossy ring buffer. `set` is safe to call from any number of concurrent
/// producers; `try_next` must only be called from a single consumer at a
/// time (the contract `MessageRouter` relies on).
pub struct EnvelopeDiode {
    slots: Vec<Mutex<Option<Envelope>>>,
    capacity: u64,
    write_index: CachePadded<AtomicU64>,
    read_index: CachePadded<AtomicU64>,
    on_miss: MissCallback,
}

impl EnvelopeDiode {
    pub fn new(capacity: usize) -> Self {
        Self::with_miss_callback(capacity, Arc::new(|_missed| {}))
    }

    pub fn with_miss_callback(capacity: usize, on_miss: MissCallback) -> Self {
        assert!(capacity > 0, "EnvelopeDiode capacity must be > 0");
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || Mutex::new(None));
        Self {
            slots,
            capacity: capacity as u64,
            write_index: CachePadded(AtomicU64::new(0)),
            read_index: CachePadded(AtomicU64::new(0)),
            on_miss,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Publishes `envelope` into the ring. Never blocks (beyond a brief
    /// per-slot lock) and never fails.
    pub fn set(&self, envelope: Envelope) {
        let index = self.write_index.0.fetch_add(1, Ordering::AcqRel);
        let slot = (index % self.capacity) as usize;
        *self.slots[slot].lock().unwrap_or_else(|p| p.into_inner()) = Some(envelope);
    }

    /// Returns the next envelope in producer order, or `None` if the reader
    /// is caught up. On overrun, silently jumps the read cursor forward and
    /// invokes the miss callback with the number of envelopes skipped
    /// before returning the next available one.
    pub fn try_next(&self) -> Option<Envelope> {
        let write_index = self.write_index.0.load(Ordering::Acquire);
        let mut read_index = self.read_index.0.load(Ordering::Acquire);

        if read_index >= write_index {
            return None;
        }

        let lag = write_index - read_index;
        if lag > self.capacity {
            let missed = lag - self.capacity;
            read_index = write_index - self.capacity;
            (self.on_miss)(missed);
        }

        let slot = (read_index % self.capacity) as usize;
        let envelope = self.slots[slot].lock().unwrap_or_else(|p| p.into_inner()).take();
        self.read_index.0.store(read_index + 1, Ordering::Release);
        envelope
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::EventKind;
    use std::sync::atomic::AtomicU64 as StdAtomicU64;

    fn env(tag: u64) -> Envelope {
        Envelope::new("app-1", EventKind::Log, "rtr", tag, format!("msg-{tag}"))
    }

    #[test]
    fn returns_none_when_empty() {
        let diode = EnvelopeDiode::new(4);
        assert!(diode.try_next().is_none());
    }

    #[test]
    fn preserves_producer_order_when_not_overrun() {
        let diode = EnvelopeDiode::new(4);
        for i in 0..3 {
            diode.set(env(i));
        }
        for i in 0..3 {
            let got = diode.try_next().unwrap();
            assert_eq!(got.timestamp_nanos(), i);
        }
        assert!(diode.try_next().is_none());
    }

    #[test]
    fn overrun_skips_oldest_and_reports_miss_count() {
        let missed = Arc::new(StdAtomicU64::new(0));
        let missed_clone = missed.clone();
        let diode =
            EnvelopeDiode::with_miss_callback(4, Arc::new(move |n| { missed_clone.fetch_add(n, Ordering::SeqCst); }));

        for i in 0..10 {
            diode.set(env(i));
        }

        // Only the last `capacity` entries survive: timestamps 6,7,8,9.
        let first = diode.try_next().unwrap();
        assert_eq!(first.timestamp_nanos(), 6);
        assert_eq!(missed.load(Ordering::SeqCst), 6);

        let rest: Vec<u64> = std::iter::from_fn(|| diode.try_next()).map(|e| e.timestamp_nanos()).collect();
        assert_eq!(rest, vec![7, 8, 9]);
    }

    #[test]
    fn miss_count_reported_exactly_once_per_overrun() {
        let missed = Arc::new(StdAtomicU64::new(0));
        let missed_clone = missed.clone();
        let diode =
            EnvelopeDiode::with_miss_callback(2, Arc::new(move |n| { missed_clone.fetch_add(n, Ordering::SeqCst); }));

        for i in 0..5 {
            diode.set(env(i));
        }
        let _ = diode.try_next();
        assert_eq!(missed.load(Ordering::SeqCst), 3, "writes(5) - capacity(2) = 3 missed");

        let _ = diode.try_next();
        let _ = diode.try_next();
        assert!(diode.try_next().is_none());
        assert_eq!(missed.load(Ordering::SeqCst), 3, "no further misses once caught up");
    }
}
