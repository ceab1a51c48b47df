//! # Span
//!
//! A `Span` is a single named, timed operation within a trace. Spans can be
//! nested to form a trace tree by starting children from a parent's
//! [`SpanContext`]. After creation a span's operation name, tags, baggage,
//! and log records can be changed or appended; none of these mutations are
//! possible once the span has finished.
//!
//! Finishing hands the completed [`RawSpan`] to the tracer's recorder
//! exactly once: double-finish is a no-op, as is every mutation on a
//! finished span. An unfinished span finishes itself when dropped.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::SystemTime;

use serde::Serialize;

use crate::common::Value;
use crate::trace::log::{LogField, LogRecord};
use crate::trace::span_context::{SpanContext, SpanId};
use crate::trace::tracer::Tracer;

/// A finished span in the form consumed by recorders.
#[derive(Clone, Debug)]
pub struct RawSpan {
    /// The span's propagatable identity, including baggage.
    pub context: SpanContext,
    /// Span id of the parent, [`SpanId::INVALID`] for a root span.
    pub parent_span_id: SpanId,
    /// The operation this span measured.
    pub operation: String,
    /// Wall-clock start time.
    pub start_time: SystemTime,
    /// Wall-clock finish time; never earlier than `start_time`.
    pub finish_time: SystemTime,
    /// Span tags; keys are unique.
    pub tags: HashMap<String, Value>,
    /// Log records in append order.
    pub logs: Vec<LogRecord>,
    /// Number of log records discarded by the per-span cap.
    pub dropped_log_count: u32,
}

/// The mutable portion of a live span. `None` once finished.
#[derive(Debug)]
pub(crate) struct ActiveData {
    pub(crate) operation: String,
    pub(crate) start_time: SystemTime,
    pub(crate) parent_span_id: SpanId,
    pub(crate) tags: HashMap<String, Value>,
    pub(crate) logs: Vec<LogRecord>,
    pub(crate) dropped_log_count: u32,
    pub(crate) max_logs: usize,
}

#[derive(Debug)]
struct SpanState {
    context: SpanContext,
    data: Option<ActiveData>,
}

/// Single operation within a trace.
///
/// A span is intended to be used by one logical task, but it is safe to
/// share across threads: every mutation is internally synchronized and log
/// appends are atomic, with no ordering guarantee between interleaved
/// writers beyond that.
#[derive(Debug)]
pub struct Span {
    tracer: Tracer,
    state: Mutex<SpanState>,
}

impl Span {
    pub(crate) fn new(tracer: Tracer, context: SpanContext, data: Option<ActiveData>) -> Self {
        Span {
            tracer,
            state: Mutex::new(SpanState { context, data }),
        }
    }

    /// Operate on the mutable data, if the span is still active.
    fn with_data<T, F>(&self, f: F) -> Option<T>
    where
        F: FnOnce(&mut ActiveData) -> T,
    {
        self.state
            .lock()
            .ok()
            .and_then(|mut state| state.data.as_mut().map(f))
    }

    /// Returns the span's current [`SpanContext`].
    ///
    /// The returned value is a snapshot: later [`Span::set_baggage`] calls
    /// are not reflected in it.
    pub fn context(&self) -> SpanContext {
        self.state
            .lock()
            .map(|state| state.context.clone())
            .unwrap_or_else(|_| SpanContext::empty())
    }

    /// Returns `true` until the span has finished.
    pub fn is_active(&self) -> bool {
        self.state
            .lock()
            .map(|state| state.data.is_some())
            .unwrap_or(false)
    }

    /// Replaces the operation name. No-op after finish.
    pub fn set_operation(&self, operation: impl Into<String>) {
        let operation = operation.into();
        self.with_data(|data| data.operation = operation);
    }

    /// Upserts a tag. No-op after finish.
    pub fn set_tag(&self, key: impl Into<String>, value: impl Into<Value>) {
        let (key, value) = (key.into(), value.into());
        self.with_data(|data| data.tags.insert(key, value));
    }

    /// Appends a [`LogRecord`] timestamped now with the given fields, in
    /// the given order. Lazy fields are stored unevaluated. No-op after
    /// finish.
    pub fn log_fields(&self, fields: impl IntoIterator<Item = LogField>) {
        let fields: Vec<LogField> = fields.into_iter().collect();
        if fields.is_empty() {
            return;
        }
        let record = LogRecord::now(fields);
        self.with_data(|data| {
            if data.max_logs != 0 && data.logs.len() >= data.max_logs {
                data.dropped_log_count += 1;
            } else {
                data.logs.push(record);
            }
        });
    }

    /// Logs a single record with the well-known `event` field.
    pub fn log_event(&self, name: impl Into<Cow<'static, str>>) {
        self.log_fields([LogField::string("event", name)]);
    }

    /// Logs a single record with the `event` field plus an opaque payload.
    pub fn log_event_with_payload<T: Serialize>(
        &self,
        name: impl Into<Cow<'static, str>>,
        payload: &T,
    ) {
        self.log_fields([
            LogField::string("event", name),
            LogField::object("payload", payload),
        ]);
    }

    /// Logs a single key/value field.
    pub fn log_kv(&self, key: impl Into<Cow<'static, str>>, value: impl Into<Value>) {
        self.log_fields([LogField::from_value(key, value)]);
    }

    /// Rebinds this span to a new context carrying the additional baggage
    /// entry, copy-on-write. Descendants started afterwards inherit the new
    /// entry; contexts handed out earlier do not. No-op after finish.
    pub fn set_baggage(&self, key: impl Into<String>, value: impl Into<String>) {
        if let Ok(mut state) = self.state.lock() {
            if state.data.is_some() {
                state.context = state.context.with_baggage(key, value);
            }
        }
    }

    /// Finishes the span now.
    pub fn finish(&self) {
        self.finish_inner(None);
    }

    /// Finishes the span with the given timestamp. A timestamp earlier than
    /// the start time is clamped to it.
    pub fn finish_with_time(&self, finish_time: SystemTime) {
        self.finish_inner(Some(finish_time));
    }

    /// Take the data, build the raw span, and record it. Skips everything
    /// if the span already finished; the recorder is invoked outside the
    /// span lock.
    fn finish_inner(&self, at: Option<SystemTime>) {
        let raw = {
            let mut state = match self.state.lock() {
                Ok(state) => state,
                Err(_) => return,
            };
            let data = match state.data.take() {
                Some(data) => data,
                None => return,
            };
            let finish_time = at.unwrap_or_else(SystemTime::now).max(data.start_time);
            RawSpan {
                context: state.context.clone(),
                parent_span_id: data.parent_span_id,
                operation: data.operation,
                start_time: data.start_time,
                finish_time,
                tags: data.tags,
                logs: data.logs,
                dropped_log_count: data.dropped_log_count,
            }
        };
        self.tracer.record_span(raw);
    }
}

impl Drop for Span {
    /// Report the span if it was never finished explicitly.
    fn drop(&mut self) {
        self.finish_inner(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::InMemoryRecorder;
    use crate::trace::Tracer;
    use std::sync::Arc;
    use std::time::Duration;

    fn test_tracer() -> (Tracer, Arc<InMemoryRecorder>) {
        let recorder = Arc::new(InMemoryRecorder::new());
        let tracer = Tracer::builder()
            .with_recorder(recorder.clone())
            .build()
            .expect("tracer with custom recorder");
        (tracer, recorder)
    }

    #[test]
    fn finish_records_exactly_once() {
        let (tracer, recorder) = test_tracer();
        let span = tracer.start_span("op");
        span.finish();
        span.finish();
        span.finish_with_time(SystemTime::now());
        assert_eq!(recorder.finished_spans().len(), 1);
    }

    #[test]
    fn drop_finishes_unfinished_spans() {
        let (tracer, recorder) = test_tracer();
        {
            let _span = tracer.start_span("op");
        }
        assert_eq!(recorder.finished_spans().len(), 1);
    }

    #[test]
    fn mutations_after_finish_are_ignored() {
        let (tracer, recorder) = test_tracer();
        let span = tracer.start_span("before");
        span.finish();

        span.set_operation("after");
        span.set_tag("k", "v");
        span.log_event("ignored");
        span.set_baggage("b", "1");
        assert!(!span.is_active());

        let spans = recorder.finished_spans();
        assert_eq!(spans[0].operation, "before");
        assert!(spans[0].tags.is_empty());
        assert!(spans[0].logs.is_empty());
        assert!(spans[0].context.baggage_item("b").is_none());
    }

    #[test]
    fn logs_preserve_append_order() {
        let (tracer, recorder) = test_tracer();
        let span = tracer.start_span("op");
        for i in 0..5i64 {
            span.log_kv("seq", i);
        }
        span.finish();

        let spans = recorder.finished_spans();
        let seen: Vec<String> = spans[0]
            .logs
            .iter()
            .map(|record| format!("{:?}", record.fields[0].value()))
            .collect();
        assert_eq!(seen, vec!["I64(0)", "I64(1)", "I64(2)", "I64(3)", "I64(4)"]);
    }

    #[test]
    fn log_cap_counts_dropped_records() {
        let recorder = Arc::new(InMemoryRecorder::new());
        let tracer = Tracer::builder()
            .with_recorder(recorder.clone())
            .with_max_logs_per_span(2)
            .build()
            .unwrap();
        let span = tracer.start_span("op");
        for _ in 0..5 {
            span.log_event("e");
        }
        span.finish();

        let spans = recorder.finished_spans();
        assert_eq!(spans[0].logs.len(), 2);
        assert_eq!(spans[0].dropped_log_count, 3);
    }

    #[test]
    fn finish_time_is_clamped_to_start() {
        let (tracer, recorder) = test_tracer();
        let span = tracer.start_span("op");
        let early = SystemTime::now() - Duration::from_secs(3600);
        span.finish_with_time(early);

        let spans = recorder.finished_spans();
        assert!(spans[0].finish_time >= spans[0].start_time);
    }

    #[test]
    fn set_tag_upserts() {
        let (tracer, recorder) = test_tracer();
        let span = tracer.start_span("op");
        span.set_tag("color", "red");
        span.set_tag("color", "blue");
        span.finish();

        let spans = recorder.finished_spans();
        assert_eq!(spans[0].tags.get("color"), Some(&Value::from("blue")));
    }
}
