//! Process-wide tracer registry.
//!
//! The registry gives library code access to the application's configured
//! [`Tracer`] without threading references everywhere. Before anything is
//! registered, [`tracer`] returns a no-op tracer whose spans accept all
//! operations and discard them, so there is no hidden initialization-order
//! dependency.
//!
//! Tests that touch the registry should isolate themselves by restoring the
//! previous tracer: both [`set_tracer`] and [`clear_tracer`] return it.

use std::sync::RwLock;

use once_cell::sync::Lazy;

use crate::trace::Tracer;

static GLOBAL_TRACER: Lazy<RwLock<Tracer>> = Lazy::new(|| RwLock::new(Tracer::noop()));

/// Returns the registered tracer, or a no-op tracer before registration.
pub fn tracer() -> Tracer {
    GLOBAL_TRACER
        .read()
        .map(|tracer| tracer.clone())
        .unwrap_or_else(|_| Tracer::noop())
}

/// Registers `tracer` as the process-wide tracer and returns the previous
/// one.
pub fn set_tracer(tracer: Tracer) -> Tracer {
    match GLOBAL_TRACER.write() {
        Ok(mut slot) => std::mem::replace(&mut *slot, tracer),
        Err(_) => Tracer::noop(),
    }
}

/// Resets the registry to the no-op tracer and returns the previous tracer.
///
/// The previous tracer is not closed; callers that own it decide its fate.
pub fn clear_tracer() -> Tracer {
    set_tracer(Tracer::noop())
}
