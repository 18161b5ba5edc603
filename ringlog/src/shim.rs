//! Concurrency primitives used by the ring.
//!
//! Under `cfg(loom)` these resolve to loom's model-checked versions so the
//! admission/publish/extract protocol can be explored exhaustively.

#[cfg(loom)]
pub(crate) use loom::hint::spin_loop;
#[cfg(loom)]
pub(crate) use loom::sync::atomic::{AtomicU64, Ordering, fence};

#[cfg(not(loom))]
pub(crate) use std::hint::spin_loop;
#[cfg(not(loom))]
pub(crate) use std::sync::atomic::{AtomicU64, Ordering, fence};
