//! The span model and the tracer.
//!
//! A trace is a tree of [`Span`]s sharing a [`TraceId`]. The types here
//! cover the whole client-side lifecycle: identities and propagatable
//! contexts ([`SpanContext`]), structured log fields ([`LogField`]), the
//! live span ([`Span`]) and its finished form ([`RawSpan`]), and the
//! [`Tracer`] that creates spans and owns the recorder they are delivered
//! to.

pub(crate) mod config;
mod id_generator;
mod log;
mod span;
mod span_context;
mod tracer;

pub use config::{ConfigurationError, Endpoint, TracerBuilder};
pub use id_generator::{IdGenerator, IncrementIdGenerator, RandomIdGenerator};
pub use log::{FieldEncoder, FieldValue, LazyField, LogField, LogRecord};
pub use span::{RawSpan, Span};
pub use span_context::{SpanContext, SpanId, TraceId};
pub use tracer::{Reference, SpanBuilder, Tracer};

use std::time::Duration;

use thiserror::Error;

use crate::transport::TransportError;

/// Errors returned by the blocking tracer entry points.
///
/// Only [`Tracer::flush`] and [`Tracer::close`] return errors to callers;
/// recorder and transport problems during normal operation surface on the
/// [event bus](crate::events) instead.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum TraceError {
    /// The operation did not complete within its deadline. The background
    /// worker keeps running.
    #[error("flush did not complete within {0:?}")]
    FlushTimeout(Duration),
    /// A transport failure bubbled through an explicit flush.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Catch-all for recorder-specific failures.
    #[error("{0}")]
    Other(String),
}

/// Describe the result of a tracer or recorder operation.
pub type TraceResult<T> = Result<T, TraceError>;
