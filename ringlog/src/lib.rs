//! Bounded multi-producer single-consumer queues for asynchronous logging.
//!
//! Any number of threads push log entries into a fixed-capacity ring buffer
//! using only atomics; one background thread pops and writes them out.
//!
//! - [`mpsc`] - The lock-free [`BoundedQueue`] and its split handles
//! - [`policy`] - [`PolicyQueue`], which fixes what a push does when full
//! - [`config`] - Runtime selection of capacity and policy
//! - [`error`] - [`QueueError`] and its stable [`ErrorCode`]s

pub mod alloc;
pub mod config;
pub mod error;
pub mod mpsc;
pub mod policy;

mod shim;
mod trace;

pub use config::{ConfigError, QueueConfig};
pub use error::{ErrorCode, QueueError};
pub use mpsc::{BoundedQueue, Consumer, Producer, Timeout};
pub use policy::{
    BlockWhenFull, FullPolicy, OverflowPolicy, OverwriteWhenFull, PolicyQueue, PolicyReader,
    PolicyWriter, RejectWhenFull,
};
pub use trace::init_tracing;
