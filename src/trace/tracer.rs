//! # Tracer
//!
//! The `Tracer` is the factory for [`Span`]s and the owner of the recorder
//! that receives them. It is a cheap clonable handle; clones share one
//! recorder and one id generator, so a tracer can be handed to arbitrarily
//! many concurrent producers.
//!
//! A tracer reaches a terminal disabled state through [`Tracer::close`].
//! Spans started afterwards accept every operation and record nothing,
//! which is also how the pre-registration global tracer behaves (see
//! [`global`](crate::global)).

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::common::Value;
use crate::propagation::{BinaryPropagator, Extractor, Format, Injector, PropagationError, TextMapPropagator};
use crate::recorder::{NoopRecorder, Recorder};
use crate::trace::config::TracerBuilder;
use crate::trace::id_generator::{IdGenerator, RandomIdGenerator};
use crate::trace::span::{ActiveData, RawSpan, Span};
use crate::trace::span_context::{SpanContext, SpanId};
use crate::trace::TraceResult;

/// A reference from a new span to an existing span context.
#[derive(Clone, Debug)]
pub enum Reference {
    /// The new span is a child of the referenced span.
    ChildOf(SpanContext),
    /// The new span follows from the referenced span without a parent/child
    /// relationship.
    FollowsFrom(SpanContext),
}

/// Configuration for a new [`Span`], finished by [`SpanBuilder::start`].
#[derive(Debug)]
pub struct SpanBuilder {
    operation: Cow<'static, str>,
    references: Vec<Reference>,
    start_time: Option<SystemTime>,
    tags: Vec<(String, Value)>,
}

impl SpanBuilder {
    /// Create a builder for a span measuring `operation`.
    pub fn from_operation(operation: impl Into<Cow<'static, str>>) -> Self {
        SpanBuilder {
            operation: operation.into(),
            references: Vec::new(),
            start_time: None,
            tags: Vec::new(),
        }
    }

    /// Declare the new span a child of `context`.
    pub fn child_of(mut self, context: &SpanContext) -> Self {
        self.references.push(Reference::ChildOf(context.clone()));
        self
    }

    /// Declare the new span a follower of `context`.
    pub fn follows_from(mut self, context: &SpanContext) -> Self {
        self.references.push(Reference::FollowsFrom(context.clone()));
        self
    }

    /// Override the start time; defaults to now at span creation.
    pub fn with_start_time(mut self, start_time: SystemTime) -> Self {
        self.start_time = Some(start_time);
        self
    }

    /// Set a tag on the new span.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    /// Start the span.
    pub fn start(self, tracer: &Tracer) -> Span {
        tracer.build_span(self)
    }

    /// The effective parent: the first `ChildOf` reference wins, otherwise
    /// the first `FollowsFrom`.
    fn parent(&self) -> Option<&SpanContext> {
        self.references
            .iter()
            .find_map(|reference| match reference {
                Reference::ChildOf(context) => Some(context),
                Reference::FollowsFrom(_) => None,
            })
            .or_else(|| {
                self.references.iter().find_map(|reference| match reference {
                    Reference::FollowsFrom(context) => Some(context),
                    Reference::ChildOf(_) => None,
                })
            })
    }
}

struct TracerInner {
    recorder: Arc<dyn Recorder>,
    id_generator: Arc<dyn IdGenerator>,
    tags: HashMap<String, Value>,
    max_logs_per_span: usize,
    disabled: AtomicBool,
}

/// Span factory and recorder owner. See the [module docs](self).
#[derive(Clone)]
pub struct Tracer {
    inner: Arc<TracerInner>,
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer")
            .field("recorder", &self.inner.recorder)
            .field("disabled", &self.inner.disabled.load(Ordering::Relaxed))
            .finish()
    }
}

impl Tracer {
    /// Start configuring a tracer. See [`TracerBuilder`].
    pub fn builder() -> TracerBuilder {
        TracerBuilder::default()
    }

    /// A tracer whose spans accept all operations and discard them, and
    /// whose flush always succeeds.
    pub fn noop() -> Self {
        let tracer = Tracer::from_parts(
            Arc::new(NoopRecorder),
            Arc::new(RandomIdGenerator::default()),
            HashMap::new(),
            0,
        );
        tracer.inner.disabled.store(true, Ordering::Release);
        tracer
    }

    pub(crate) fn from_parts(
        recorder: Arc<dyn Recorder>,
        id_generator: Arc<dyn IdGenerator>,
        tags: HashMap<String, Value>,
        max_logs_per_span: usize,
    ) -> Self {
        Tracer {
            inner: Arc::new(TracerInner {
                recorder,
                id_generator,
                tags,
                max_logs_per_span,
                disabled: AtomicBool::new(false),
            }),
        }
    }

    /// Returns `false` once the tracer has been closed (or was created as a
    /// no-op).
    pub fn is_enabled(&self) -> bool {
        !self.inner.disabled.load(Ordering::Acquire)
    }

    /// Create a [`SpanBuilder`] for `operation`.
    pub fn span_builder(&self, operation: impl Into<Cow<'static, str>>) -> SpanBuilder {
        SpanBuilder::from_operation(operation)
    }

    /// Start a root span measuring `operation`, beginning a new trace.
    pub fn start_span(&self, operation: impl Into<Cow<'static, str>>) -> Span {
        self.build_span(SpanBuilder::from_operation(operation))
    }

    /// Build a span from `builder`.
    pub fn build_span(&self, builder: SpanBuilder) -> Span {
        if !self.is_enabled() {
            // Propagate a parent identity if one was supplied, but record
            // nothing.
            let context = builder
                .parent()
                .cloned()
                .unwrap_or_else(SpanContext::empty);
            return Span::new(self.clone(), context, None);
        }

        let id_generator = &self.inner.id_generator;
        let span_id = id_generator.new_span_id();
        let (trace_id, parent_span_id, sampled, baggage) = match builder.parent() {
            Some(parent) => (
                parent.trace_id(),
                parent.span_id(),
                parent.is_sampled(),
                parent.baggage().clone(),
            ),
            None => (id_generator.new_trace_id(), SpanId::INVALID, true, HashMap::new()),
        };
        let context = SpanContext::from_parts(trace_id, span_id, sampled, baggage);

        let mut tags = self.inner.tags.clone();
        tags.extend(builder.tags);

        let operation = if builder.operation.is_empty() {
            String::from("unnamed")
        } else {
            builder.operation.into_owned()
        };

        let data = ActiveData {
            operation,
            start_time: builder.start_time.unwrap_or_else(SystemTime::now),
            parent_span_id,
            tags,
            logs: Vec::new(),
            dropped_log_count: 0,
            max_logs: self.inner.max_logs_per_span,
        };
        Span::new(self.clone(), context, Some(data))
    }

    pub(crate) fn record_span(&self, span: RawSpan) {
        self.inner.recorder.record(span);
    }

    /// Inject `context` into a key/value carrier in the given format.
    ///
    /// `Format::Binary` cannot be expressed through a key/value carrier;
    /// use [`Tracer::inject_binary`] instead.
    pub fn inject(
        &self,
        context: &SpanContext,
        format: Format,
        carrier: &mut dyn Injector,
    ) -> Result<(), PropagationError> {
        match format {
            Format::TextMap | Format::HttpHeaders => {
                TextMapPropagator::new().inject(context, carrier);
                Ok(())
            }
            Format::Binary => Err(PropagationError::UnsupportedFormat),
        }
    }

    /// Extract a [`SpanContext`] from a key/value carrier in the given
    /// format. Unknown carrier keys are ignored.
    pub fn extract(
        &self,
        format: Format,
        carrier: &dyn Extractor,
    ) -> Result<SpanContext, PropagationError> {
        match format {
            Format::TextMap | Format::HttpHeaders => TextMapPropagator::new().extract(carrier),
            Format::Binary => Err(PropagationError::UnsupportedFormat),
        }
    }

    /// Serialize `context` into the binary carrier format.
    pub fn inject_binary(&self, context: &SpanContext) -> Vec<u8> {
        BinaryPropagator::new().to_bytes(context)
    }

    /// Deserialize a [`SpanContext`] from the binary carrier format.
    pub fn extract_binary(&self, bytes: &[u8]) -> Result<SpanContext, PropagationError> {
        BinaryPropagator::new().from_bytes(bytes)
    }

    /// Force the recorder to drain buffered spans, blocking up to
    /// `deadline`. Returns [`TraceError::FlushTimeout`] on expiry; the
    /// recorder's worker is not aborted.
    ///
    /// [`TraceError::FlushTimeout`]: crate::trace::TraceError::FlushTimeout
    pub fn flush(&self, deadline: Duration) -> TraceResult<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        self.inner.recorder.flush(deadline)
    }

    /// Flush, shut the recorder down, and disable the tracer. Terminal and
    /// idempotent; spans started afterwards are no-ops.
    pub fn close(&self, deadline: Duration) -> TraceResult<()> {
        if self.inner.disabled.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner.recorder.shutdown(deadline)
    }
}
