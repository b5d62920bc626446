use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard,
    },
};

use crate::models::RawSample;

/// Capacity-capped FIFO of raw samples shared by the producer and the
/// aggregation cycle.
///
/// `push` and `drain` take the same lock, so a drain sees a consistent
/// snapshot and a concurrent push lands either before it (and is drained) or
/// after it (and waits for the next cycle).
pub struct SampleBuffer {
    samples: Mutex<VecDeque<RawSample>>,
    capacity: usize,
    evicted: AtomicU64,
}

impl SampleBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            evicted: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<RawSample>> {
        match self.samples.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Appends a sample, evicting the oldest one when the cap is reached.
    /// Never fails towards the producer.
    pub fn push(&self, sample: RawSample) {
        let mut guard = self.lock();
        if guard.len() >= self.capacity {
            guard.pop_front();
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        guard.push_back(sample);
    }

    /// Removes and returns every buffered sample in arrival order.
    pub fn drain(&self) -> Vec<RawSample> {
        let mut guard = self.lock();
        guard.drain(..).collect()
    }

    /// Discards buffered samples without returning them.
    pub fn clear(&self) -> usize {
        let mut guard = self.lock();
        let dropped = guard.len();
        guard.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total samples evicted by overflow since creation.
    pub fn evicted_total(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use chrono::{Duration, TimeZone, Utc};

    use super::*;

    fn sample_at(offset_secs: i64) -> RawSample {
        let base = Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap();
        RawSample::with_flags(base + Duration::seconds(offset_secs), true, false, false)
    }

    #[test]
    fn drain_returns_arrival_order_and_empties() {
        let buffer = SampleBuffer::new(8);
        for i in 0..3 {
            buffer.push(sample_at(i));
        }

        let drained = buffer.drain();
        let offsets: Vec<_> = drained.iter().map(|s| s.captured_at.timestamp() % 60).collect();
        assert_eq!(offsets, vec![0, 1, 2]);
        assert!(buffer.is_empty());
        assert!(buffer.drain().is_empty());
    }

    #[test]
    fn overflow_keeps_most_recent_samples() {
        let buffer = SampleBuffer::new(3);
        for i in 0..4 {
            buffer.push(sample_at(i));
        }

        let drained = buffer.drain();
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[0], sample_at(1));
        assert_eq!(drained[2], sample_at(3));
        assert_eq!(buffer.evicted_total(), 1);
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let buffer = SampleBuffer::new(0);
        buffer.push(sample_at(0));
        buffer.push(sample_at(1));

        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.drain(), vec![sample_at(1)]);
    }

    #[test]
    fn concurrent_push_and_drain_lose_nothing() {
        let buffer = Arc::new(SampleBuffer::new(100_000));
        let producers: Vec<_> = (0..4)
            .map(|_| {
                let buffer = Arc::clone(&buffer);
                thread::spawn(move || {
                    for i in 0..1_000 {
                        buffer.push(sample_at(i));
                    }
                })
            })
            .collect();

        let mut drained = 0;
        while producers.iter().any(|p| !p.is_finished()) {
            drained += buffer.drain().len();
        }
        for producer in producers {
            producer.join().unwrap();
        }
        drained += buffer.drain().len();

        assert_eq!(drained, 4_000);
        assert_eq!(buffer.evicted_total(), 0);
    }
}
