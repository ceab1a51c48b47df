//! Recorders: sinks consuming finished spans.
//!
//! A [`Recorder`] receives every [`RawSpan`] a tracer finishes. The default
//! is [`BatchRecorder`], which buffers spans and ships them to a collector
//! from a background thread; user-supplied recorders replace that delivery
//! path entirely and only need to implement [`Recorder::record`].

mod batch;
mod in_memory;

pub use batch::{BatchConfig, BatchRecorder};
pub use in_memory::InMemoryRecorder;

use std::fmt;
use std::time::Duration;

use crate::trace::{RawSpan, TraceResult};

/// A sink consuming finished spans.
///
/// `record` is called synchronously from the thread that finished the span
/// and must stay within a bounded enqueue cost; anything expensive belongs
/// on a worker. `flush` and `shutdown` default to no-ops so simple sinks
/// may ignore them.
pub trait Recorder: Send + Sync + fmt::Debug {
    /// Accept a completed span.
    fn record(&self, span: RawSpan);

    /// Drain buffered spans, blocking up to `deadline`.
    fn flush(&self, deadline: Duration) -> TraceResult<()> {
        let _ = deadline;
        Ok(())
    }

    /// Flush best-effort and release resources. Must tolerate repeated
    /// calls.
    fn shutdown(&self, deadline: Duration) -> TraceResult<()> {
        let _ = deadline;
        Ok(())
    }
}

/// A recorder that discards everything; backs the no-op tracer.
#[derive(Debug, Default)]
pub struct NoopRecorder;

impl Recorder for NoopRecorder {
    fn record(&self, _span: RawSpan) {}
}
