//! A buffered, batching client SDK for distributed tracing collectors.
//!
//! `tracewire` implements the client side of a tracing pipeline: spans are
//! created by a [`Tracer`], carry tags, structured log fields, and baggage,
//! and are handed to a [`Recorder`](recorder::Recorder) when finished. The default recorder
//! buffers finished spans in a bounded queue and ships them to a collector
//! endpoint from a dedicated background thread, batching by time and by
//! buffer pressure.
//!
//! ## Getting started
//!
//! ```no_run
//! use std::time::Duration;
//! use tracewire::{global, Endpoint, Tracer};
//!
//! fn main() -> Result<(), tracewire::ConfigurationError> {
//!     let tracer = Tracer::builder()
//!         .with_access_token("YOUR_ACCESS_TOKEN")
//!         .with_collector(Endpoint::new("collector.example.com", 443).with_plaintext(false))
//!         .with_http_transport(true)
//!         .build()?;
//!     global::set_tracer(tracer.clone());
//!
//!     let parent = tracer.start_span("handle-request");
//!     let child = tracer
//!         .span_builder("load-profile")
//!         .child_of(&parent.context())
//!         .start(&tracer);
//!     child.finish();
//!     parent.finish();
//!
//!     // Force a flush before exit.
//!     tracer.flush(Duration::from_secs(5)).ok();
//!     tracer.close(Duration::from_secs(5)).ok();
//!     Ok(())
//! }
//! ```
//!
//! ## Crate layout
//!
//! * [`trace`] — span model: identities, contexts, log fields, the span
//!   lifecycle, and the tracer itself.
//! * [`recorder`] — the sink consuming finished spans, including the
//!   default batching recorder.
//! * [`transport`] — the seam between the default recorder and the
//!   collector, with HTTP and length-framed TCP implementations.
//! * [`propagation`] — carrier formats for sending a [`SpanContext`]
//!   across process boundaries.
//! * [`events`] — the process-wide event bus surfacing recorder and
//!   transport status to the application.
//! * [`global`] — the process-wide tracer registry.
//!
//! Application-facing APIs never fail because of recorder or transport
//! problems; those surface on the event bus only. Callers see errors from
//! exactly two places: tracer construction and explicit flush deadlines.

#![warn(missing_docs)]

mod common;

pub mod events;
pub mod global;
pub mod propagation;
pub mod recorder;
pub mod trace;
pub mod transport;

pub use common::Value;
pub use events::{Event, StatusReport};
pub use trace::{
    ConfigurationError, Endpoint, LogField, LogRecord, RawSpan, Span, SpanBuilder, SpanContext,
    SpanId, TraceError, TraceId, Tracer, TracerBuilder,
};
