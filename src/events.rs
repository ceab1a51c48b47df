//! Process-wide event bus.
//!
//! The tracer and its recorder never surface operational problems to the
//! threads that create spans; they report them here instead. The bus holds
//! a single handler slot with last-writer-wins semantics, guarded by a
//! read-heavy lock, and a handler is never invoked while any internal lock
//! is held.

use std::fmt;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;

/// Periodic recorder counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusReport {
    /// Spans delivered to the transport since the tracer started.
    pub spans_sent: u64,
    /// Spans dropped since the tracer started, from buffer overflow or
    /// abandoned batches.
    pub spans_dropped: u64,
    /// Spans currently buffered and awaiting delivery.
    pub spans_pending: u64,
}

/// An event surfaced on the process-wide bus.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum Event {
    /// Periodic counters, emitted once per reporting cycle.
    StatusReport(StatusReport),
    /// The transport failed during a reporting cycle.
    ConnectionError {
        /// Rendered transport failure.
        message: String,
    },
    /// Tracer construction rejected its configuration.
    StartError {
        /// Rendered configuration failure.
        message: String,
    },
    /// Catch-all with a human-readable message.
    GenericError {
        /// What went wrong.
        message: String,
    },
    /// Spans were dropped by the recorder; counts across all
    /// `SpansDropped` events sum to the recorder's total drop count.
    SpansDropped {
        /// Number of spans dropped in this event.
        count: u64,
    },
}

impl Event {
    /// The error message carried by this event, if it describes a failure.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Event::ConnectionError { message }
            | Event::StartError { message }
            | Event::GenericError { message } => Some(message),
            Event::StatusReport(_) | Event::SpansDropped { .. } => None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::StatusReport(report) => write!(
                f,
                "status: sent {} dropped {} pending {}",
                report.spans_sent, report.spans_dropped, report.spans_pending
            ),
            Event::ConnectionError { message } => write!(f, "connection error: {message}"),
            Event::StartError { message } => write!(f, "start error: {message}"),
            Event::GenericError { message } => write!(f, "error: {message}"),
            Event::SpansDropped { count } => write!(f, "dropped {count} spans"),
        }
    }
}

type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

static EVENT_HANDLER: Lazy<RwLock<Option<EventHandler>>> = Lazy::new(|| RwLock::new(None));

/// Install the process-wide event handler, replacing any previous one.
///
/// Handlers must be side-effect-safe: they may be called from span-creating
/// threads and from the recorder's worker thread.
pub fn set_event_handler<F>(handler: F)
where
    F: Fn(&Event) + Send + Sync + 'static,
{
    if let Ok(mut slot) = EVENT_HANDLER.write() {
        *slot = Some(Arc::new(handler));
    }
}

/// Remove the process-wide event handler, if any.
pub fn clear_event_handler() {
    if let Ok(mut slot) = EVENT_HANDLER.write() {
        *slot = None;
    }
}

/// Deliver `event` to the installed handler.
///
/// The handler reference is cloned out of the slot before the call so the
/// callback runs without the bus lock held. Without a handler, failures are
/// logged at `warn` and the rest at `debug`.
pub(crate) fn emit(event: Event) {
    let handler = EVENT_HANDLER
        .read()
        .ok()
        .and_then(|slot| slot.as_ref().cloned());

    match handler {
        Some(handler) => handler(&event),
        None if event.error_message().is_some() => tracing::warn!(event = %event, "tracer event"),
        None => tracing::debug!(event = %event, "tracer event"),
    }
}

#[cfg(test)]
pub(crate) static TEST_BUS_LOCK: Lazy<std::sync::Mutex<()>> =
    Lazy::new(|| std::sync::Mutex::new(()));
