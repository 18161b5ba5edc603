//! Core lock-free MPSC ring buffer algorithm.
//!
//! The ring coordinates any number of producers and one consumer over a
//! [`RingStorage`] using four monotonically increasing `u64` cursors:
//!
//! - `size`: occupancy counter, used as the admission gate
//! - `write`: next position a producer will claim
//! - `visible`: positions below this have been written and may be read
//! - `read`: next position to extract
//!
//! plus `freed`, the position below which every extracted slot has been
//! vacated and may be reused by a producer.
//!
//! # Algorithm
//!
//! A push goes through three steps:
//!
//! 1. **Admit**: `size.fetch_add(1)`. If the previous value was already at
//!    capacity the increment is undone and the queue is full.
//! 2. **Claim**: `write.fetch_add(1)` hands out a unique position. The
//!    producer waits until the previous occupant of that slot is freed.
//! 3. **Publish**: after writing the slot, the producer waits until every
//!    lower position is published (`visible == pos`), then stores
//!    `visible = pos + 1` with release ordering.
//!
//! Publishing in claim order means the consumer never sees a boundary that
//! covers an unwritten slot, even when a producer stalls between claim and
//! write.
//!
//! An extraction (consumer pop, or a producer evicting on overwrite) claims
//! the oldest published position with a CAS on `read`, moves the value out,
//! advances `freed` in position order, and finally decrements `size`.
//!
//! Peeks and clones pin `read` to [`PINNED`] while they borrow slot contents,
//! so no extractor can move a value out from under them.

use std::mem;

use super::storage::RingStorage;
use crate::alloc::RawAlloc;
use crate::shim::{AtomicU64, Ordering, fence, spin_loop};
use crate::trace::{debug, trace};

/// Sentinel stored in `read` while the front slot is borrowed.
const PINNED: u64 = u64::MAX;

/// Producer-side state: admission counter and claim cursor.
#[repr(C)]
#[repr(align(64))]
pub(crate) struct ProducerState {
    /// Next position to claim. Producers increment this via `fetch_add`.
    write: AtomicU64,
    /// Admitted and not yet released entries.
    size: AtomicU64,
}

/// Publish boundary, written by producers and polled by the consumer.
#[repr(C)]
#[repr(align(64))]
pub(crate) struct PublishState {
    visible: AtomicU64,
}

/// Extraction-side state.
#[repr(C)]
#[repr(align(64))]
pub(crate) struct ConsumerState {
    /// Next position to extract, or [`PINNED`].
    read: AtomicU64,
    /// Every position below this has been vacated.
    freed: AtomicU64,
}

impl ProducerState {
    fn new(filled: u64) -> Self {
        Self {
            write: AtomicU64::new(filled),
            size: AtomicU64::new(filled),
        }
    }
}

impl PublishState {
    fn new(filled: u64) -> Self {
        Self {
            visible: AtomicU64::new(filled),
        }
    }
}

impl ConsumerState {
    fn new() -> Self {
        Self {
            read: AtomicU64::new(0),
            freed: AtomicU64::new(0),
        }
    }
}

/// Core MPSC ring buffer structure.
pub(crate) struct Ring<T, A: RawAlloc> {
    producer: ProducerState,
    publish: PublishState,
    consumer: ConsumerState,
    storage: RingStorage<T, A>,
}

/// An admitted, not yet published entry.
///
/// Dropping it without publishing returns the admission, so a constructor
/// that panics does not leak capacity.
pub(crate) struct Admission<'a, T, A: RawAlloc> {
    ring: &'a Ring<T, A>,
}

impl<T, A: RawAlloc> Admission<'_, T, A> {
    /// Claims a position, writes `value` into it and publishes it.
    #[inline]
    pub(crate) fn publish(self, value: T) {
        let ring = self.ring;
        mem::forget(self);
        ring.claim_and_publish(value);
    }
}

impl<T, A: RawAlloc> Drop for Admission<'_, T, A> {
    fn drop(&mut self) {
        self.ring.producer.size.fetch_sub(1, Ordering::Release);
    }
}

/// Restores `read` when a pinned borrow ends.
struct Pin<'a> {
    read: &'a AtomicU64,
    pos: u64,
}

impl Drop for Pin<'_> {
    fn drop(&mut self) {
        self.read.store(self.pos, Ordering::Release);
    }
}

impl<T, A: RawAlloc> Ring<T, A> {
    /// Creates an empty ring.
    pub(crate) fn with_capacity_in(capacity: usize, alloc: A) -> Self {
        let storage = RingStorage::with_capacity_in(capacity, alloc);
        trace!(capacity, "ring created");
        Self {
            producer: ProducerState::new(0),
            publish: PublishState::new(0),
            consumer: ConsumerState::new(),
            storage,
        }
    }

    /// Creates a ring whose every slot holds a clone of `value`.
    pub(crate) fn from_elem_in(capacity: usize, value: T, alloc: A) -> Self
    where
        T: Clone,
    {
        let storage = RingStorage::with_capacity_in(capacity, alloc);
        let last = capacity as u64 - 1;
        for pos in 0..last {
            // SAFETY: Fresh storage, every slot vacant and unshared.
            unsafe { storage.write(pos, value.clone()) };
        }
        unsafe { storage.write(last, value) };

        Self {
            producer: ProducerState::new(capacity as u64),
            publish: PublishState::new(capacity as u64),
            consumer: ConsumerState::new(),
            storage,
        }
    }

    #[inline]
    pub(crate) const fn capacity(&self) -> usize {
        self.storage.capacity()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        // Transient over-admission is undone immediately; never report it.
        let size = self.producer.size.load(Ordering::Acquire);
        size.min(self.capacity() as u64) as usize
    }

    #[inline]
    pub(crate) const fn allocator(&self) -> &A {
        self.storage.allocator()
    }

    /// Single admission attempt.
    #[inline]
    pub(crate) fn try_admit(&self) -> Option<Admission<'_, T, A>> {
        let capacity = self.capacity() as u64;
        let prev = self.producer.size.fetch_add(1, Ordering::Acquire);
        if prev >= capacity {
            self.producer.size.fetch_sub(1, Ordering::Relaxed);
            return None;
        }
        Some(Admission { ring: self })
    }

    /// Spins until admission succeeds.
    #[inline]
    pub(crate) fn admit(&self) -> Admission<'_, T, A> {
        if let Some(admission) = self.try_admit() {
            return admission;
        }
        trace!(capacity = self.capacity(), "queue full, spinning for admission");
        loop {
            spin_loop();
            if let Some(admission) = self.try_admit() {
                return admission;
            }
        }
    }

    /// Admits unconditionally, evicting the oldest published entry while the
    /// ring is full.
    ///
    /// Returns the first evicted entry. If racing producers take the freed
    /// slot and another eviction is needed, later victims are dropped.
    pub(crate) fn force_admit(&self) -> (Admission<'_, T, A>, Option<T>) {
        let mut evicted = None;
        loop {
            if let Some(admission) = self.try_admit() {
                return (admission, evicted);
            }
            match self.take_front() {
                Some(victim) => {
                    trace!(capacity = self.capacity(), "queue full, evicted oldest entry");
                    if evicted.is_none() {
                        evicted = Some(victim);
                    }
                }
                // Full, but every admitted entry is still being written.
                None => spin_loop(),
            }
        }
    }

    fn claim_and_publish(&self, value: T) {
        let pos = self.producer.write.fetch_add(1, Ordering::Relaxed);

        // The slot's previous occupant (pos - capacity) must be vacated.
        if let Some(prev) = pos.checked_sub(self.capacity() as u64) {
            while self.consumer.freed.load(Ordering::Acquire) <= prev {
                spin_loop();
            }
        }

        // SAFETY: `pos` is uniquely ours and its slot has been vacated.
        unsafe { self.storage.write(pos, value) };

        // Publish in claim order. Acquire keeps earlier publishes visible
        // transitively to whoever acquires our store.
        while self.publish.visible.load(Ordering::Acquire) != pos {
            spin_loop();
        }
        self.publish.visible.store(pos + 1, Ordering::Release);
    }

    /// Extracts the oldest published entry.
    ///
    /// Safe from any thread; FIFO order across calls holds for a single
    /// caller.
    pub(crate) fn take_front(&self) -> Option<T> {
        loop {
            let read = self.consumer.read.load(Ordering::Acquire);
            if read == PINNED {
                spin_loop();
                continue;
            }
            let visible = self.publish.visible.load(Ordering::Acquire);
            if read >= visible {
                return None;
            }
            if self
                .consumer
                .read
                .compare_exchange_weak(read, read + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_err()
            {
                continue;
            }

            // SAFETY: read < visible, so the slot is published, and the CAS
            // made us its only extractor.
            let value = unsafe { self.storage.take(read) };
            self.release(read);
            return Some(value);
        }
    }

    /// Marks `pos` vacated once every lower position is, then returns its
    /// admission.
    fn release(&self, pos: u64) {
        while self.consumer.freed.load(Ordering::Acquire) != pos {
            spin_loop();
        }
        self.consumer.freed.store(pos + 1, Ordering::Release);
        self.producer.size.fetch_sub(1, Ordering::Release);
    }

    /// Pins `read` and returns the pinned position.
    fn pin(&self) -> Pin<'_> {
        loop {
            let read = self.consumer.read.load(Ordering::Acquire);
            if read != PINNED
                && self
                    .consumer
                    .read
                    .compare_exchange_weak(read, PINNED, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
            {
                return Pin {
                    read: &self.consumer.read,
                    pos: read,
                };
            }
            spin_loop();
        }
    }

    /// Runs `f` on the oldest published entry without removing it.
    pub(crate) fn peek_with<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let pin = self.pin();
        let visible = self.publish.visible.load(Ordering::Acquire);
        if pin.pos >= visible {
            return None;
        }
        // SAFETY: Published, and pinning keeps extractors (and therefore
        // producers reusing the slot) away until `pin` drops.
        Some(f(unsafe { self.storage.get(pin.pos) }))
    }

    /// Borrows the oldest entry through exclusive access.
    pub(crate) fn front_mut(&mut self) -> Option<&T> {
        let read = self.consumer.read.load(Ordering::Relaxed);
        let visible = self.publish.visible.load(Ordering::Relaxed);
        if read >= visible {
            return None;
        }
        // SAFETY: Published, and `&mut self` rules out concurrent extraction.
        Some(unsafe { self.storage.get(read) })
    }

    /// Deep copy of the unread entries into a ring of the same capacity.
    pub(crate) fn duplicate(&self) -> Self
    where
        T: Clone,
        A: Clone,
    {
        fence(Ordering::SeqCst);
        let entries: Vec<T> = {
            let pin = self.pin();
            let visible = self.publish.visible.load(Ordering::Acquire);
            (pin.pos..visible)
                // SAFETY: Pinned range below `visible`, see `peek_with`.
                .map(|pos| unsafe { self.storage.get(pos) }.clone())
                .collect()
        };

        let copy = Self::with_capacity_in(self.capacity(), self.allocator().clone());
        let len = entries.len() as u64;
        for (pos, value) in (0..len).zip(entries) {
            // SAFETY: Fresh, unshared storage.
            unsafe { copy.storage.write(pos, value) };
        }
        copy.producer.write.store(len, Ordering::Relaxed);
        copy.producer.size.store(len, Ordering::Relaxed);
        copy.publish.visible.store(len, Ordering::Relaxed);
        fence(Ordering::SeqCst);
        copy
    }

    /// Live range under exclusive access. Every claimed position is
    /// published by the time `&mut self` is available.
    fn live_range(&mut self) -> std::ops::Range<u64> {
        let read = self.consumer.read.load(Ordering::Relaxed);
        let visible = self.publish.visible.load(Ordering::Relaxed);
        debug_assert_eq!(visible, self.producer.write.load(Ordering::Relaxed));
        read..visible
    }

    fn reset_cursors(&mut self, len: u64) {
        self.producer.write.store(len, Ordering::Relaxed);
        self.producer.size.store(len, Ordering::Relaxed);
        self.publish.visible.store(len, Ordering::Relaxed);
        self.consumer.read.store(0, Ordering::Relaxed);
        self.consumer.freed.store(0, Ordering::Relaxed);
    }

    /// Grows to `new_capacity`, keeping unread entries in logical order.
    pub(crate) fn reserve(&mut self, new_capacity: usize) {
        let old_capacity = self.capacity();
        if new_capacity <= old_capacity {
            return;
        }
        let live = self.live_range();
        let len = live.end - live.start;
        // SAFETY: Exclusive access; `live` is exactly the occupied range.
        unsafe { self.storage.grow(new_capacity, live) };
        self.reset_cursors(len);
        debug!(old_capacity, new_capacity, len, "ring grown");
    }

    /// Drops all unread entries and starts over on a fresh buffer.
    pub(crate) fn clear(&mut self) {
        let live = self.live_range();
        debug!(
            capacity = self.capacity(),
            discarded = live.end - live.start,
            "clearing ring"
        );
        // SAFETY: Exclusive access; `live` is exactly the occupied range, and
        // every slot is vacant once it has been dropped.
        unsafe {
            self.storage.drop_range(live);
            self.storage.reallocate();
        }
        self.reset_cursors(0);
    }
}

impl<T, A: RawAlloc> Drop for Ring<T, A> {
    fn drop(&mut self) {
        let live = self.live_range();
        // SAFETY: Exclusive access; storage frees its buffer right after.
        unsafe { self.storage.drop_range(live) };
    }
}

// SAFETY: Ring is Send because it owns its values (T: Send) and allocator.
unsafe impl<T: Send, A: RawAlloc + Send> Send for Ring<T, A> {}

// SAFETY: Ring is Sync because concurrent access is mediated by atomics:
// - producers own disjoint slots via admission + claim
// - extraction is serialized per position by the CAS on `read`
// - borrows of slot contents happen only while `read` is pinned
unsafe impl<T: Send, A: RawAlloc + Sync> Sync for Ring<T, A> {}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::alloc::Global;
    use std::sync::Arc;
    use std::thread;

    fn ring<T>(capacity: usize) -> Ring<T, Global> {
        Ring::with_capacity_in(capacity, Global)
    }

    #[test]
    fn test_admission_is_bounded() {
        let ring = ring::<u64>(2);

        let first = ring.try_admit().unwrap();
        let second = ring.try_admit().unwrap();
        assert!(ring.try_admit().is_none());
        assert_eq!(ring.len(), 2);

        first.publish(1);
        drop(second);
        assert_eq!(ring.len(), 1);
        assert!(ring.try_admit().is_some());
    }

    #[test]
    fn test_publish_then_take() {
        let ring = ring::<u64>(4);

        for i in 0..4 {
            ring.try_admit().unwrap().publish(i);
        }
        assert!(ring.try_admit().is_none());

        for i in 0..4 {
            assert_eq!(ring.take_front(), Some(i));
        }
        assert_eq!(ring.take_front(), None);
        assert_eq!(ring.len(), 0);
    }

    #[test]
    fn test_wraparound_reuses_slots() {
        let ring = ring::<u64>(3);

        for round in 0..10 {
            for i in 0..3 {
                ring.admit().publish(round * 10 + i);
            }
            for i in 0..3 {
                assert_eq!(ring.take_front(), Some(round * 10 + i));
            }
        }
    }

    #[test]
    fn test_force_admit_evicts_oldest() {
        let ring = ring::<u64>(2);
        ring.admit().publish(1);
        ring.admit().publish(2);

        let (admission, evicted) = ring.force_admit();
        admission.publish(3);

        assert_eq!(evicted, Some(1));
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.take_front(), Some(2));
        assert_eq!(ring.take_front(), Some(3));
    }

    #[test]
    fn test_peek_does_not_consume() {
        let ring = ring::<String>(4);
        assert_eq!(ring.peek_with(String::clone), None);

        ring.admit().publish("a".to_string());
        assert_eq!(ring.peek_with(String::clone), Some("a".to_string()));
        assert_eq!(ring.peek_with(String::len), Some(1));
        assert_eq!(ring.take_front(), Some("a".to_string()));
    }

    #[test]
    fn test_reserve_after_wrap() {
        let mut ring = ring::<u64>(3);
        for i in 0..3 {
            ring.admit().publish(i);
        }
        assert_eq!(ring.take_front(), Some(0));
        ring.admit().publish(3);

        ring.reserve(6);
        assert_eq!(ring.capacity(), 6);
        assert_eq!(ring.len(), 3);

        ring.admit().publish(4);
        for expected in 1..5 {
            assert_eq!(ring.take_front(), Some(expected));
        }
    }

    #[test]
    fn test_duplicate_copies_unread_only() {
        let ring = ring::<u64>(4);
        for i in 0..4 {
            ring.admit().publish(i);
        }
        ring.take_front();

        let copy = ring.duplicate();
        assert_eq!(copy.capacity(), 4);
        assert_eq!(copy.len(), 3);
        for expected in 1..4 {
            assert_eq!(copy.take_front(), Some(expected));
        }
        // Original is untouched.
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn test_multiple_producers() {
        let ring: Arc<Ring<u64, Global>> = Arc::new(ring(8));
        let num_producers = 4;
        let items_per_producer = 250;

        let handles: Vec<_> = (0..num_producers)
            .map(|p| {
                let ring = Arc::clone(&ring);
                thread::spawn(move || {
                    for i in 0..items_per_producer {
                        ring.admit().publish(p * 1000 + i);
                    }
                })
            })
            .collect();

        let mut items = Vec::new();
        while items.len() < (num_producers * items_per_producer) as usize {
            match ring.take_front() {
                Some(item) => items.push(item),
                None => thread::yield_now(),
            }
        }

        for h in handles {
            h.join().unwrap();
        }

        // Per-producer order survives interleaving.
        for p in 0..num_producers {
            let mine: Vec<_> = items.iter().filter(|v| **v / 1000 == p).collect();
            assert_eq!(mine.len(), items_per_producer as usize);
            assert!(mine.windows(2).all(|w| w[0] < w[1]), "producer {p} reordered");
        }
    }

    #[test]
    fn test_concurrent_force_admit_keeps_size_bounded() {
        let ring: Arc<Ring<u64, Global>> = Arc::new(ring(4));

        let handles: Vec<_> = (0..4)
            .map(|p| {
                let ring = Arc::clone(&ring);
                thread::spawn(move || {
                    for i in 0..500 {
                        let (admission, _evicted) = ring.force_admit();
                        admission.publish(p * 1000 + i);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(ring.len(), 4);
        let mut drained = 0;
        while ring.take_front().is_some() {
            drained += 1;
        }
        assert_eq!(drained, 4);
    }
}
