//! Bounded MPSC (Multi-Producer Single-Consumer) queue.
//!
//! [`BoundedQueue`] is a fixed-capacity ring buffer that any number of threads
//! can push into through `&self`, using only atomics. Consuming needs either
//! exclusive access (`&mut BoundedQueue`) or the single [`Consumer`] handle
//! returned by [`BoundedQueue::split`].
//!
//! # Overview
//!
//! - [`BoundedQueue`] - Owned queue; producer operations through `&self`
//! - [`Producer`] - Cloneable write end, shareable across threads
//! - [`Consumer`] - Read end; neither `Clone` nor `Sync`, so there is exactly one
//!
//! # Full-queue behaviour
//!
//! Every push comes in three flavours:
//!
//! | Method | When full |
//! |---|---|
//! | [`push_back`](BoundedQueue::push_back) | spins until a slot frees up |
//! | [`try_push_back`](BoundedQueue::try_push_back) | hands the value back |
//! | [`force_push_back`](BoundedQueue::force_push_back) | evicts the oldest unread entry |
//!
//! and each has an `emplace` twin that takes a constructor instead of a value.
//!
//! # Example
//!
//! ```
//! use ringlog::mpsc::BoundedQueue;
//! use std::thread;
//!
//! let (tx, rx) = BoundedQueue::<u64>::with_capacity(64).split();
//!
//! let handles: Vec<_> = (0..4)
//!     .map(|p| {
//!         let tx = tx.clone();
//!         thread::spawn(move || {
//!             for i in 0..100 {
//!                 tx.push_back(p * 1000 + i);
//!             }
//!         })
//!     })
//!     .collect();
//!
//! let mut received = 0;
//! while received < 400 {
//!     if rx.pop_front().is_some() {
//!         received += 1;
//!     }
//! }
//!
//! for h in handles {
//!     h.join().unwrap();
//! }
//! assert!(rx.is_empty());
//! ```
//!
//! # Capacity growth
//!
//! [`reserve`](BoundedQueue::reserve) and [`clear`](BoundedQueue::clear) take
//! `&mut self`, so they can never race with producers or the consumer. After
//! a split, [`Consumer::get_mut`] hands out that exclusive access once every
//! [`Producer`] has been dropped.

mod ring;
mod storage;

use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use minstant::Instant;

use crate::alloc::{Global, RawAlloc};
use crate::shim::spin_loop;
use crate::trace::debug;
use ring::Ring;

pub use storage::MAX_CAPACITY;

/// Capacity used by [`BoundedQueue::new`] and [`Default`].
pub const DEFAULT_CAPACITY: usize = 16;

/// How long a blocking operation may spin.
#[derive(Debug, Clone, Copy)]
pub enum Timeout {
    /// Wait indefinitely.
    Infinite,
    /// Wait for at most the specified duration.
    Duration(Duration),
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Self::Duration(d)
    }
}

impl Timeout {
    fn deadline(self) -> Option<Instant> {
        match self {
            Self::Infinite => None,
            Self::Duration(d) => Some(Instant::now() + d),
        }
    }
}

/// Bounded multi-producer single-consumer ring buffer.
///
/// Slots live in one contiguous allocation obtained from `A`.
pub struct BoundedQueue<T, A: RawAlloc = Global> {
    ring: Ring<T, A>,
}

impl<T> BoundedQueue<T> {
    /// Creates an empty queue with [`DEFAULT_CAPACITY`] slots.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates an empty queue with `capacity` slots.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero or greater than [`MAX_CAPACITY`].
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_in(capacity, Global)
    }

    /// Creates a full queue holding `capacity` clones of `value`.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero or greater than [`MAX_CAPACITY`].
    #[must_use]
    pub fn from_elem(capacity: usize, value: T) -> Self
    where
        T: Clone,
    {
        Self::from_elem_in(capacity, value, Global)
    }
}

impl<T, A: RawAlloc> BoundedQueue<T, A> {
    /// Creates an empty queue whose storage comes from `alloc`.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero or greater than [`MAX_CAPACITY`].
    #[must_use]
    pub fn with_capacity_in(capacity: usize, alloc: A) -> Self {
        Self {
            ring: Ring::with_capacity_in(capacity, alloc),
        }
    }

    /// Creates a full queue holding `capacity` clones of `value`, with
    /// storage from `alloc`.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero or greater than [`MAX_CAPACITY`].
    #[must_use]
    pub fn from_elem_in(capacity: usize, value: T, alloc: A) -> Self
    where
        T: Clone,
    {
        Self {
            ring: Ring::from_elem_in(capacity, value, alloc),
        }
    }

    /// Pushes `value`, spinning while the queue is full.
    ///
    /// The calling thread busy-waits without yielding; it only makes progress
    /// while something keeps draining the queue.
    #[inline]
    pub fn push_back(&self, value: T) {
        self.ring.admit().publish(value);
    }

    /// Pushes `value` if there is room.
    ///
    /// # Errors
    ///
    /// Returns `Err(value)` if the queue is full. The queue is left unchanged.
    #[inline]
    pub fn try_push_back(&self, value: T) -> Result<(), T> {
        match self.ring.try_admit() {
            Some(admission) => {
                admission.publish(value);
                Ok(())
            }
            None => Err(value),
        }
    }

    /// Pushes `value`, evicting the oldest unread entry if the queue is full.
    ///
    /// Returns the evicted entry. Entries the consumer is already reading are
    /// never evicted; if every slot is still being written, this spins until
    /// one is published.
    #[inline]
    pub fn force_push_back(&self, value: T) -> Option<T> {
        let (admission, evicted) = self.ring.force_admit();
        admission.publish(value);
        evicted
    }

    /// Constructs an entry with `make` once admitted, spinning while full.
    ///
    /// If `make` panics the admission is returned and the queue is unchanged.
    #[inline]
    pub fn emplace_back<F: FnOnce() -> T>(&self, make: F) {
        let admission = self.ring.admit();
        admission.publish(make());
    }

    /// Constructs an entry with `make` if there is room.
    ///
    /// # Errors
    ///
    /// Returns `Err(make)` without calling it if the queue is full.
    #[inline]
    pub fn try_emplace_back<F: FnOnce() -> T>(&self, make: F) -> Result<(), F> {
        match self.ring.try_admit() {
            Some(admission) => {
                admission.publish(make());
                Ok(())
            }
            None => Err(make),
        }
    }

    /// Constructs an entry with `make`, evicting the oldest unread entry if
    /// the queue is full. Returns the evicted entry.
    #[inline]
    pub fn force_emplace_back<F: FnOnce() -> T>(&self, make: F) -> Option<T> {
        let (admission, evicted) = self.ring.force_admit();
        admission.publish(make());
        evicted
    }

    /// Removes and returns the oldest entry, or `None` if nothing is
    /// published.
    #[inline]
    pub fn pop_front(&mut self) -> Option<T> {
        self.ring.take_front()
    }

    /// Borrows the oldest entry without removing it.
    #[inline]
    pub fn front(&mut self) -> Option<&T> {
        self.ring.front_mut()
    }

    /// Number of admitted entries, including ones still being written.
    #[inline]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Returns `true` if no entry is admitted.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if every slot is admitted.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    /// Number of slots.
    #[inline]
    pub const fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// The allocator backing the slots.
    #[inline]
    pub const fn allocator(&self) -> &A {
        self.ring.allocator()
    }

    /// Grows the queue to `new_capacity` slots, keeping unread entries in
    /// order. Does nothing if `new_capacity <= capacity()`.
    ///
    /// # Panics
    ///
    /// Panics if `new_capacity` is greater than [`MAX_CAPACITY`].
    pub fn reserve(&mut self, new_capacity: usize) {
        self.ring.reserve(new_capacity);
    }

    /// Drops every unread entry and swaps in a fresh buffer of the same
    /// capacity.
    pub fn clear(&mut self) {
        self.ring.clear();
    }

    /// Splits the queue into a cloneable [`Producer`] and the single
    /// [`Consumer`].
    #[must_use]
    pub fn split(self) -> (Producer<T, A>, Consumer<T, A>) {
        let queue = Arc::new(self);
        let producer = Producer {
            queue: Arc::clone(&queue),
        };
        let consumer = Consumer {
            queue,
            _unsync: PhantomData,
        };
        (producer, consumer)
    }

    /// Extracts the oldest entry through a shared reference.
    #[inline]
    pub(crate) fn take_front(&self) -> Option<T> {
        self.ring.take_front()
    }
}

impl<T> Default for BoundedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone, A: RawAlloc + Clone> Clone for BoundedQueue<T, A> {
    /// Deep copy of the unread entries, in order, into a queue of the same
    /// capacity. Pushes racing with the clone may or may not be included.
    fn clone(&self) -> Self {
        Self {
            ring: self.ring.duplicate(),
        }
    }
}

impl<T, A: RawAlloc> fmt::Debug for BoundedQueue<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

/// Marker type to opt-out of `Sync` while remaining `Send`.
type PhantomUnsync = PhantomData<Cell<&'static ()>>;

/// Write end of a split [`BoundedQueue`].
///
/// Clone it to add producers. All clones share the same queue.
pub struct Producer<T, A: RawAlloc = Global> {
    queue: Arc<BoundedQueue<T, A>>,
}

impl<T, A: RawAlloc> Producer<T, A> {
    /// See [`BoundedQueue::push_back`].
    #[inline]
    pub fn push_back(&self, value: T) {
        self.queue.push_back(value);
    }

    /// See [`BoundedQueue::try_push_back`].
    ///
    /// # Errors
    ///
    /// Returns `Err(value)` if the queue is full.
    #[inline]
    pub fn try_push_back(&self, value: T) -> Result<(), T> {
        self.queue.try_push_back(value)
    }

    /// See [`BoundedQueue::force_push_back`].
    #[inline]
    pub fn force_push_back(&self, value: T) -> Option<T> {
        self.queue.force_push_back(value)
    }

    /// See [`BoundedQueue::emplace_back`].
    #[inline]
    pub fn emplace_back<F: FnOnce() -> T>(&self, make: F) {
        self.queue.emplace_back(make);
    }

    /// See [`BoundedQueue::try_emplace_back`].
    ///
    /// # Errors
    ///
    /// Returns `Err(make)` without calling it if the queue is full.
    #[inline]
    pub fn try_emplace_back<F: FnOnce() -> T>(&self, make: F) -> Result<(), F> {
        self.queue.try_emplace_back(make)
    }

    /// See [`BoundedQueue::force_emplace_back`].
    #[inline]
    pub fn force_emplace_back<F: FnOnce() -> T>(&self, make: F) -> Option<T> {
        self.queue.force_emplace_back(make)
    }

    /// Spins until space is available, then pushes.
    ///
    /// # Errors
    ///
    /// Returns `Err(value)` on timeout.
    #[inline]
    pub fn push_back_timeout(&self, mut value: T, timeout: Timeout) -> Result<(), T> {
        let deadline = timeout.deadline();
        loop {
            match self.queue.try_push_back(value) {
                Ok(()) => return Ok(()),
                Err(returned) => {
                    value = returned;
                    if let Some(dl) = deadline
                        && Instant::now() > dl
                    {
                        debug!(capacity = self.capacity(), "push timed out on full queue");
                        return Err(value);
                    }
                    spin_loop();
                }
            }
        }
    }

    /// See [`BoundedQueue::len`].
    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// See [`BoundedQueue::is_empty`].
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// See [`BoundedQueue::is_full`].
    #[inline]
    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }

    /// See [`BoundedQueue::capacity`].
    #[inline]
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    #[inline]
    pub(crate) fn queue(&self) -> &BoundedQueue<T, A> {
        &self.queue
    }
}

impl<T, A: RawAlloc> Clone for Producer<T, A> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
        }
    }
}

impl<T, A: RawAlloc> fmt::Debug for Producer<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

/// Read end of a split [`BoundedQueue`].
///
/// # Thread Safety
///
/// `Consumer` is [`Send`] but **not** [`Sync`] and not [`Clone`]:
/// - Can transfer ownership to another thread
/// - Cannot share `&Consumer` (no concurrent `pop_front()`)
///
/// ```compile_fail
/// use ringlog::mpsc::BoundedQueue;
///
/// let (_tx, rx) = BoundedQueue::<u64>::new().split();
/// let _second = rx.clone();
/// ```
///
/// ```compile_fail
/// use ringlog::mpsc::BoundedQueue;
///
/// fn assert_sync<S: Sync>(_: &S) {}
/// let (_tx, rx) = BoundedQueue::<u64>::new().split();
/// assert_sync(&rx);
/// ```
pub struct Consumer<T, A: RawAlloc = Global> {
    queue: Arc<BoundedQueue<T, A>>,
    _unsync: PhantomUnsync,
}

impl<T, A: RawAlloc> Consumer<T, A> {
    /// Removes and returns the oldest published entry.
    ///
    /// Returns `None` if the queue is empty.
    #[inline]
    #[must_use]
    pub fn pop_front(&self) -> Option<T> {
        self.queue.take_front()
    }

    /// Clones the oldest published entry without removing it.
    #[inline]
    #[must_use]
    pub fn front(&self) -> Option<T>
    where
        T: Clone,
    {
        self.queue.ring.peek_with(T::clone)
    }

    /// Spins until an entry is available, then pops it.
    ///
    /// Returns `None` on timeout.
    #[inline]
    #[must_use]
    pub fn pop_blocking(&self, timeout: Timeout) -> Option<T> {
        let deadline = timeout.deadline();
        loop {
            if let Some(value) = self.pop_front() {
                return Some(value);
            }
            if let Some(dl) = deadline
                && Instant::now() > dl
            {
                debug!(capacity = self.capacity(), "pop timed out on empty queue");
                return None;
            }
            spin_loop();
        }
    }

    /// Pops entries until the queue reports empty.
    pub fn drain(&self) -> impl Iterator<Item = T> + '_ {
        std::iter::from_fn(move || self.pop_front())
    }

    /// Returns `true` once every [`Producer`] has been dropped.
    #[inline]
    pub fn is_disconnected(&self) -> bool {
        Arc::strong_count(&self.queue) == 1
    }

    /// Exclusive access to the queue, available once every [`Producer`] has
    /// been dropped. Use it to [`reserve`](BoundedQueue::reserve) or
    /// [`clear`](BoundedQueue::clear).
    pub fn get_mut(&mut self) -> Option<&mut BoundedQueue<T, A>> {
        Arc::get_mut(&mut self.queue)
    }

    /// See [`BoundedQueue::len`].
    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// See [`BoundedQueue::is_empty`].
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// See [`BoundedQueue::is_full`].
    #[inline]
    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }

    /// See [`BoundedQueue::capacity`].
    #[inline]
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}

impl<T, A: RawAlloc> fmt::Debug for Consumer<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field("disconnected", &self.is_disconnected())
            .finish_non_exhaustive()
    }
}
