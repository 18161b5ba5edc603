//! Policy-selected log entry queue.
//!
//! [`PolicyQueue`] wraps a [`BoundedQueue`] and fixes what a push does when
//! the queue is full. The policy is either a zero-sized marker chosen at
//! compile time ([`RejectWhenFull`], [`OverwriteWhenFull`], [`BlockWhenFull`])
//! or an [`OverflowPolicy`] value chosen from configuration.
//!
//! Results use the crate's error vocabulary: a rejected push is
//! [`QueueError::QueueIsFull`] and a read with nothing published is
//! [`QueueError::QueueIsEmpty`].
//!
//! # Example
//!
//! ```
//! use ringlog::policy::{PolicyQueue, RejectWhenFull};
//! use ringlog::QueueError;
//!
//! let mut queue = PolicyQueue::<u32, RejectWhenFull>::new(2);
//! assert_eq!(queue.push(1), Ok(()));
//! assert_eq!(queue.push(2), Ok(()));
//! assert!(queue.is_full());
//! assert_eq!(queue.push(3), Err(QueueError::QueueIsFull));
//!
//! assert_eq!(queue.read(), Ok(1));
//! assert_eq!(queue.read(), Ok(2));
//! assert_eq!(queue.read(), Err(QueueError::QueueIsEmpty));
//! ```
//!
//! For a background writer thread, [`split`](PolicyQueue::split) the queue
//! into cloneable [`PolicyWriter`]s and the single [`PolicyReader`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::alloc::{Global, RawAlloc};
use crate::config::{ConfigError, QueueConfig};
use crate::error::QueueError;
use crate::mpsc::{BoundedQueue, Consumer, Producer, Timeout};
use crate::trace::trace;

/// What a push does when the queue is full.
pub trait FullPolicy {
    /// The runtime equivalent of this policy.
    fn kind(&self) -> OverflowPolicy;

    /// Pushes `value` according to the policy.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::QueueIsFull`] if the policy rejects the entry.
    fn push<T, A: RawAlloc>(&self, queue: &BoundedQueue<T, A>, value: T) -> Result<(), QueueError>;

    /// Constructs an entry with `make` once admitted, according to the
    /// policy. A rejected constructor is never called.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::QueueIsFull`] if the policy rejects the entry.
    fn emplace<T, A: RawAlloc, F: FnOnce() -> T>(
        &self,
        queue: &BoundedQueue<T, A>,
        make: F,
    ) -> Result<(), QueueError>;
}

/// Fails the push with [`QueueError::QueueIsFull`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RejectWhenFull;

/// Evicts the oldest unread entry. Never fails, never waits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct OverwriteWhenFull;

/// Spins until the consumer frees a slot. Never fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BlockWhenFull;

impl FullPolicy for RejectWhenFull {
    fn kind(&self) -> OverflowPolicy {
        OverflowPolicy::Reject
    }

    #[inline]
    fn push<T, A: RawAlloc>(&self, queue: &BoundedQueue<T, A>, value: T) -> Result<(), QueueError> {
        queue
            .try_push_back(value)
            .map_err(|_| QueueError::QueueIsFull)
    }

    #[inline]
    fn emplace<T, A: RawAlloc, F: FnOnce() -> T>(
        &self,
        queue: &BoundedQueue<T, A>,
        make: F,
    ) -> Result<(), QueueError> {
        queue
            .try_emplace_back(make)
            .map_err(|_| QueueError::QueueIsFull)
    }
}

impl FullPolicy for OverwriteWhenFull {
    fn kind(&self) -> OverflowPolicy {
        OverflowPolicy::Overwrite
    }

    #[inline]
    fn push<T, A: RawAlloc>(&self, queue: &BoundedQueue<T, A>, value: T) -> Result<(), QueueError> {
        drop(queue.force_push_back(value));
        Ok(())
    }

    #[inline]
    fn emplace<T, A: RawAlloc, F: FnOnce() -> T>(
        &self,
        queue: &BoundedQueue<T, A>,
        make: F,
    ) -> Result<(), QueueError> {
        drop(queue.force_emplace_back(make));
        Ok(())
    }
}

impl FullPolicy for BlockWhenFull {
    fn kind(&self) -> OverflowPolicy {
        OverflowPolicy::Block
    }

    #[inline]
    fn push<T, A: RawAlloc>(&self, queue: &BoundedQueue<T, A>, value: T) -> Result<(), QueueError> {
        queue.push_back(value);
        Ok(())
    }

    #[inline]
    fn emplace<T, A: RawAlloc, F: FnOnce() -> T>(
        &self,
        queue: &BoundedQueue<T, A>,
        make: F,
    ) -> Result<(), QueueError> {
        queue.emplace_back(make);
        Ok(())
    }
}

/// Full-queue policy selected at runtime, e.g. from a [`QueueConfig`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// See [`RejectWhenFull`].
    Reject,
    /// See [`OverwriteWhenFull`].
    Overwrite,
    /// See [`BlockWhenFull`].
    #[default]
    Block,
}

impl FullPolicy for OverflowPolicy {
    fn kind(&self) -> OverflowPolicy {
        *self
    }

    #[inline]
    fn push<T, A: RawAlloc>(&self, queue: &BoundedQueue<T, A>, value: T) -> Result<(), QueueError> {
        match self {
            Self::Reject => RejectWhenFull.push(queue, value),
            Self::Overwrite => OverwriteWhenFull.push(queue, value),
            Self::Block => BlockWhenFull.push(queue, value),
        }
    }

    #[inline]
    fn emplace<T, A: RawAlloc, F: FnOnce() -> T>(
        &self,
        queue: &BoundedQueue<T, A>,
        make: F,
    ) -> Result<(), QueueError> {
        match self {
            Self::Reject => RejectWhenFull.emplace(queue, make),
            Self::Overwrite => OverwriteWhenFull.emplace(queue, make),
            Self::Block => BlockWhenFull.emplace(queue, make),
        }
    }
}

/// Bounded queue with a fixed full-queue policy.
pub struct PolicyQueue<T, P: FullPolicy = OverflowPolicy, A: RawAlloc = Global> {
    queue: BoundedQueue<T, A>,
    policy: P,
}

impl<T, P: FullPolicy + Default> PolicyQueue<T, P> {
    /// Creates an empty queue with the default value of `P`.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero or greater than
    /// [`MAX_CAPACITY`](crate::mpsc::MAX_CAPACITY).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_policy(capacity, P::default())
    }
}

impl<T, P: FullPolicy> PolicyQueue<T, P> {
    /// Creates an empty queue with an explicit policy value.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero or greater than
    /// [`MAX_CAPACITY`](crate::mpsc::MAX_CAPACITY).
    #[must_use]
    pub fn with_policy(capacity: usize, policy: P) -> Self {
        Self::with_policy_in(capacity, policy, Global)
    }
}

impl<T> PolicyQueue<T> {
    /// Creates an empty queue from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid.
    pub fn from_config(config: &QueueConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        trace!(capacity = config.capacity, policy = ?config.policy, "policy queue configured");
        Ok(Self::with_policy(config.capacity, config.policy))
    }
}

impl<T, P: FullPolicy, A: RawAlloc> PolicyQueue<T, P, A> {
    /// Creates an empty queue whose storage comes from `alloc`.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero or greater than
    /// [`MAX_CAPACITY`](crate::mpsc::MAX_CAPACITY).
    #[must_use]
    pub fn with_policy_in(capacity: usize, policy: P, alloc: A) -> Self {
        Self {
            queue: BoundedQueue::with_capacity_in(capacity, alloc),
            policy,
        }
    }

    /// Pushes `value` according to the policy.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::QueueIsFull`] if the queue is full and the
    /// policy rejects. The queue is left unchanged.
    #[inline]
    pub fn push(&self, value: T) -> Result<(), QueueError> {
        self.policy.push(&self.queue, value)
    }

    /// Constructs an entry in place according to the policy.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::QueueIsFull`] if the queue is full and the
    /// policy rejects. `make` is not called in that case.
    #[inline]
    pub fn emplace<F: FnOnce() -> T>(&self, make: F) -> Result<(), QueueError> {
        self.policy.emplace(&self.queue, make)
    }

    /// Removes and returns the oldest entry.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::QueueIsEmpty`] if nothing is published.
    #[inline]
    pub fn read(&mut self) -> Result<T, QueueError> {
        self.queue.pop_front().ok_or(QueueError::QueueIsEmpty)
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

    /// See [`BoundedQueue::len`].
    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// See [`BoundedQueue::capacity`].
    #[inline]
    pub const fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// The policy applied to every push.
    #[inline]
    pub const fn policy(&self) -> &P {
        &self.policy
    }

    /// Exclusive access to the underlying queue, e.g. to
    /// [`reserve`](BoundedQueue::reserve) or [`clear`](BoundedQueue::clear)
    /// it. Both keep the policy.
    pub fn as_queue_mut(&mut self) -> &mut BoundedQueue<T, A> {
        &mut self.queue
    }

    /// Splits into a cloneable writer and the single reader.
    #[must_use]
    pub fn split(self) -> (PolicyWriter<T, P, A>, PolicyReader<T, A>)
    where
        P: Clone,
    {
        let (producer, consumer) = self.queue.split();
        (
            PolicyWriter {
                producer,
                policy: self.policy,
            },
            PolicyReader { consumer },
        )
    }
}

impl<T, P: FullPolicy, A: RawAlloc> fmt::Debug for PolicyQueue<T, P, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyQueue")
            .field("policy", &self.policy.kind())
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}

/// Write end of a split [`PolicyQueue`]. Clone it for each logging thread.
pub struct PolicyWriter<T, P: FullPolicy = OverflowPolicy, A: RawAlloc = Global> {
    producer: Producer<T, A>,
    policy: P,
}

impl<T, P: FullPolicy, A: RawAlloc> PolicyWriter<T, P, A> {
    /// See [`PolicyQueue::push`].
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::QueueIsFull`] if the policy rejects the entry.
    #[inline]
    pub fn push(&self, value: T) -> Result<(), QueueError> {
        self.policy.push(self.producer.queue(), value)
    }

    /// See [`PolicyQueue::emplace`].
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::QueueIsFull`] if the policy rejects the entry.
    #[inline]
    pub fn emplace<F: FnOnce() -> T>(&self, make: F) -> Result<(), QueueError> {
        self.policy.emplace(self.producer.queue(), make)
    }

    /// See [`Producer::is_empty`].
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.producer.is_empty()
    }

    /// See [`Producer::is_full`].
    #[inline]
    pub fn is_full(&self) -> bool {
        self.producer.is_full()
    }

    /// See [`Producer::len`].
    #[inline]
    pub fn len(&self) -> usize {
        self.producer.len()
    }

    /// See [`Producer::capacity`].
    #[inline]
    pub fn capacity(&self) -> usize {
        self.producer.capacity()
    }

    /// See [`PolicyQueue::policy`].
    #[inline]
    pub const fn policy(&self) -> &P {
        &self.policy
    }
}

impl<T, P: FullPolicy + Clone, A: RawAlloc> Clone for PolicyWriter<T, P, A> {
    fn clone(&self) -> Self {
        Self {
            producer: self.producer.clone(),
            policy: self.policy.clone(),
        }
    }
}

impl<T, P: FullPolicy, A: RawAlloc> fmt::Debug for PolicyWriter<T, P, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyWriter")
            .field("policy", &self.policy.kind())
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}

/// Read end of a split [`PolicyQueue`]. There is exactly one; it is neither
/// `Clone` nor `Sync`.
pub struct PolicyReader<T, A: RawAlloc = Global> {
    consumer: Consumer<T, A>,
}

impl<T, A: RawAlloc> PolicyReader<T, A> {
    /// Removes and returns the oldest entry.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::QueueIsEmpty`] if nothing is published.
    #[inline]
    pub fn read(&self) -> Result<T, QueueError> {
        self.consumer.pop_front().ok_or(QueueError::QueueIsEmpty)
    }

    /// Spins until an entry is published, then removes and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::QueueIsEmpty`] if `timeout` elapses first.
    pub fn read_blocking(&self, timeout: Timeout) -> Result<T, QueueError> {
        self.consumer
            .pop_blocking(timeout)
            .ok_or(QueueError::QueueIsEmpty)
    }

    /// Removes every published entry, oldest first.
    pub fn drain(&self) -> impl Iterator<Item = T> + '_ {
        self.consumer.drain()
    }

    /// Returns `true` once every [`PolicyWriter`] has been dropped.
    #[inline]
    pub fn is_disconnected(&self) -> bool {
        self.consumer.is_disconnected()
    }

    /// See [`Consumer::is_empty`].
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.consumer.is_empty()
    }

    /// See [`Consumer::is_full`].
    #[inline]
    pub fn is_full(&self) -> bool {
        self.consumer.is_full()
    }

    /// See [`Consumer::len`].
    #[inline]
    pub fn len(&self) -> usize {
        self.consumer.len()
    }

    /// See [`Consumer::capacity`].
    #[inline]
    pub fn capacity(&self) -> usize {
        self.consumer.capacity()
    }
}

impl<T, A: RawAlloc> fmt::Debug for PolicyReader<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyReader")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field("disconnected", &self.is_disconnected())
            .finish()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_reject_when_full_capacity_two() {
        let mut queue = PolicyQueue::<u32, RejectWhenFull>::new(2);

        assert_eq!(queue.push(1), Ok(()));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.push(2), Ok(()));
        assert_eq!(queue.len(), 2);
        assert!(queue.is_full());

        assert_eq!(queue.push(3), Err(QueueError::QueueIsFull));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.read(), Ok(1));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.read(), Ok(2));
        assert!(queue.is_empty());
        assert_eq!(queue.read(), Err(QueueError::QueueIsEmpty));
    }

    #[test]
    fn test_reject_skips_constructor() {
        let queue = PolicyQueue::<String, RejectWhenFull>::new(1);
        assert_eq!(queue.emplace(|| "first".to_string()), Ok(()));

        let mut called = false;
        let result = queue.emplace(|| {
            called = true;
            "second".to_string()
        });
        assert_eq!(result, Err(QueueError::QueueIsFull));
        assert!(!called);
    }

    #[test]
    fn test_overwrite_when_full_keeps_newest() {
        let mut queue = PolicyQueue::<u32, OverwriteWhenFull>::new(3);
        for i in 0..5 {
            assert_eq!(queue.push(i), Ok(()));
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.emplace(|| 5), Ok(()));

        let drained: Vec<_> = std::iter::from_fn(|| queue.read().ok()).collect();
        assert_eq!(drained, vec![3, 4, 5]);
    }

    #[test]
    fn test_block_when_full_waits_for_reader() {
        let (writer, reader) = PolicyQueue::<u64, BlockWhenFull>::new(2).split();
        let total = 1_000u64;

        let handle = thread::spawn(move || {
            for i in 0..total {
                writer.push(i).unwrap();
            }
        });

        let mut next = 0;
        while next < total {
            if let Ok(value) = reader.read() {
                assert_eq!(value, next);
                next += 1;
            }
        }
        handle.join().unwrap();
        assert_eq!(reader.read(), Err(QueueError::QueueIsEmpty));
    }

    #[test]
    fn test_runtime_policy_dispatch() {
        let reject = PolicyQueue::<u8>::with_policy(1, OverflowPolicy::Reject);
        reject.push(1).unwrap();
        assert_eq!(reject.push(2), Err(QueueError::QueueIsFull));

        let mut overwrite = PolicyQueue::<u8>::with_policy(1, OverflowPolicy::Overwrite);
        overwrite.push(1).unwrap();
        overwrite.push(2).unwrap();
        assert_eq!(overwrite.read(), Ok(2));

        let block = PolicyQueue::<u8>::new(1);
        assert_eq!(block.policy(), &OverflowPolicy::Block);
        assert_eq!(block.policy().kind(), BlockWhenFull.kind());
    }

    #[test]
    fn test_reserve_and_clear_through_queue_access() {
        let mut queue = PolicyQueue::<u32, RejectWhenFull>::new(2);
        queue.push(1).unwrap();
        queue.push(2).unwrap();
        assert_eq!(queue.push(3), Err(QueueError::QueueIsFull));

        queue.as_queue_mut().reserve(4);
        assert_eq!(queue.capacity(), 4);
        assert_eq!(queue.push(3), Ok(()));
        assert_eq!(queue.push(4), Ok(()));
        assert_eq!(queue.push(5), Err(QueueError::QueueIsFull));
        assert_eq!(queue.read(), Ok(1));

        queue.as_queue_mut().clear();
        assert!(queue.is_empty());
        assert_eq!(queue.capacity(), 4);
        assert_eq!(queue.read(), Err(QueueError::QueueIsEmpty));
        assert_eq!(queue.push(6), Ok(()));
        assert_eq!(queue.read(), Ok(6));
    }

    #[test]
    fn test_from_config() {
        let queue = PolicyQueue::<u8>::from_config(&QueueConfig::lossy().with_capacity(8)).unwrap();
        assert_eq!(queue.capacity(), 8);
        assert_eq!(*queue.policy(), OverflowPolicy::Overwrite);

        let err = PolicyQueue::<u8>::from_config(&QueueConfig::default().with_capacity(0));
        assert_eq!(err.err(), Some(ConfigError::ZeroCapacity));
    }

    #[test]
    fn test_writers_from_many_threads() {
        let (writer, reader) = PolicyQueue::<(usize, usize)>::new(8).split();
        let producers = 4;
        let per_producer = 500;

        let handles: Vec<_> = (0..producers)
            .map(|p| {
                let writer = writer.clone();
                thread::spawn(move || {
                    for i in 0..per_producer {
                        writer.push((p, i)).unwrap();
                    }
                })
            })
            .collect();
        drop(writer);

        let mut seen = HashSet::new();
        let mut last = vec![None; producers];
        while seen.len() < producers * per_producer {
            if let Ok((p, i)) = reader.read() {
                assert!(last[p].is_none_or(|prev| prev < i));
                last[p] = Some(i);
                assert!(seen.insert((p, i)));
            }
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!(reader.is_disconnected());
    }

    #[test]
    fn test_read_blocking_timeout() {
        let (writer, reader) = PolicyQueue::<u8, RejectWhenFull>::new(1).split();
        let timeout = Timeout::Duration(Duration::from_millis(5));
        assert_eq!(reader.read_blocking(timeout), Err(QueueError::QueueIsEmpty));

        writer.push(9).unwrap();
        assert_eq!(reader.read_blocking(timeout), Ok(9));
    }

    #[test]
    fn test_writer_is_send_sync() {
        fn assert_send_sync<S: Send + Sync>() {}
        fn assert_send<S: Send>() {}
        assert_send_sync::<PolicyWriter<String>>();
        assert_send_sync::<PolicyWriter<String, BlockWhenFull>>();
        assert_send::<PolicyReader<String>>();
    }
}
