//! Tracing hooks for the queues.
//!
//! Enable with `--features tracing`. Without the feature the macros expand to
//! nothing, so the producer and consumer fast paths carry no logging cost.
//!
//! The queues emit `trace` events for construction, blocking admission and
//! evictions, and `debug` events for capacity changes, clears and timeouts.
//! Nothing above `debug` is ever emitted, so only those two levels are wired.

/// Filter used when `RUST_LOG` is unset.
#[cfg(feature = "tracing")]
const DEFAULT_DIRECTIVE: &str = "ringlog=trace";

/// Installs a global subscriber that prints queue events on one line each,
/// stamped with uptime and the emitting thread.
///
/// The filter comes from `RUST_LOG` and defaults to `ringlog=trace`.
/// Returns `true` if this call installed the subscriber, `false` if one was
/// already present or the `tracing` feature is disabled.
#[cfg(feature = "tracing")]
pub fn init_tracing() -> bool {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

    // Producers and the consumer are told apart by thread, not by module.
    let events = fmt::layer()
        .compact()
        .with_target(false)
        .with_thread_names(true)
        .with_thread_ids(true)
        .with_timer(fmt::time::uptime());

    tracing_subscriber::registry()
        .with(events)
        .with(filter)
        .try_init()
        .is_ok()
}

#[cfg(not(feature = "tracing"))]
pub const fn init_tracing() -> bool {
    false
}

#[cfg(feature = "tracing")]
pub(crate) use tracing::{debug, trace};

#[cfg(not(feature = "tracing"))]
macro_rules! discard {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
pub(crate) use discard as debug;
#[cfg(not(feature = "tracing"))]
pub(crate) use discard as trace;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_installs_nothing() {
        let _ = init_tracing();
        assert!(!init_tracing());
    }
}
