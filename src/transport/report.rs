//! The wire form of a batch of spans.
//!
//! Encoding a [`RawSpan`] is where lazy log fields are materialized: the
//! thunk runs exactly once, here on the recorder's worker thread, and a
//! thunk that panics is caught, replaced with a synthetic `"error"` field,
//! and reported on the event bus. Retries reuse the already-encoded report,
//! so a thunk is never run twice however many delivery attempts a batch
//! takes.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::events::{self, Event};
use crate::trace::{FieldEncoder, FieldValue, LogRecord, RawSpan};

/// A batch of spans plus the credential, as delivered to the collector.
#[derive(Clone, Debug, Serialize)]
pub struct Report {
    /// The credential, forwarded verbatim.
    pub access_token: String,
    /// The finished spans of this batch.
    pub spans: Vec<SpanRecord>,
}

/// One span in a [`Report`].
#[derive(Clone, Debug, Serialize)]
pub struct SpanRecord {
    /// Trace id as 32 lowercase hex characters.
    pub trace_id: String,
    /// Span id as 16 lowercase hex characters.
    pub span_id: String,
    /// Parent span id as 16 lowercase hex characters; all zeros for roots.
    pub parent_span_id: String,
    /// The operation the span measured.
    pub operation: String,
    /// Start time, microseconds since the Unix epoch.
    pub start_time_micros: u64,
    /// Finish time, microseconds since the Unix epoch.
    pub finish_time_micros: u64,
    /// Span tags, sorted by key.
    pub tags: BTreeMap<String, serde_json::Value>,
    /// Baggage carried by the span's context, sorted by key.
    pub baggage: BTreeMap<String, String>,
    /// Log records in append order.
    pub logs: Vec<LogEntry>,
    /// Log records discarded by the per-span cap.
    pub dropped_log_count: u32,
}

/// One log record in a [`SpanRecord`].
#[derive(Clone, Debug, Serialize)]
pub struct LogEntry {
    /// Record time, microseconds since the Unix epoch.
    pub timestamp_micros: u64,
    /// The record's fields, in logging order.
    pub fields: Vec<ReportField>,
}

/// A single encoded log field.
#[derive(Clone, Debug, Serialize)]
pub struct ReportField {
    /// The field key.
    pub key: String,
    /// The encoded value.
    pub value: serde_json::Value,
}

impl Report {
    /// Encode a batch under the given credential.
    pub fn assemble(access_token: &str, batch: Vec<RawSpan>) -> Self {
        Report {
            access_token: access_token.to_owned(),
            spans: batch.into_iter().map(SpanRecord::from_raw).collect(),
        }
    }

    /// Total number of spans in this report.
    pub fn span_count(&self) -> usize {
        self.spans.len()
    }
}

impl SpanRecord {
    fn from_raw(raw: RawSpan) -> Self {
        SpanRecord {
            trace_id: raw.context.trace_id().to_string(),
            span_id: raw.context.span_id().to_string(),
            parent_span_id: raw.parent_span_id.to_string(),
            operation: raw.operation,
            start_time_micros: micros_since_epoch(raw.start_time),
            finish_time_micros: micros_since_epoch(raw.finish_time),
            tags: raw
                .tags
                .iter()
                .map(|(key, value)| (key.clone(), value.into()))
                .collect(),
            baggage: raw
                .context
                .baggage_items()
                .map(|(key, value)| (key.to_owned(), value.to_owned()))
                .collect(),
            logs: raw.logs.iter().map(encode_record).collect(),
            dropped_log_count: raw.dropped_log_count,
        }
    }
}

fn micros_since_epoch(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_micros() as u64)
        .unwrap_or(0)
}

#[derive(Default)]
struct RecordEncoder {
    fields: Vec<ReportField>,
}

impl RecordEncoder {
    fn push(&mut self, key: &str, value: serde_json::Value) {
        self.fields.push(ReportField {
            key: key.to_owned(),
            value,
        });
    }
}

impl FieldEncoder for RecordEncoder {
    fn emit_string(&mut self, key: &str, value: &str) {
        self.push(key, serde_json::Value::String(value.to_owned()));
    }

    fn emit_i64(&mut self, key: &str, value: i64) {
        self.push(key, serde_json::Value::from(value));
    }

    fn emit_u64(&mut self, key: &str, value: u64) {
        self.push(key, serde_json::Value::from(value));
    }

    fn emit_f64(&mut self, key: &str, value: f64) {
        self.push(key, serde_json::Value::from(value));
    }

    fn emit_bool(&mut self, key: &str, value: bool) {
        self.push(key, serde_json::Value::Bool(value));
    }

    fn emit_object(&mut self, key: &str, value: serde_json::Value) {
        self.push(key, value);
    }
}

fn encode_record(record: &LogRecord) -> LogEntry {
    let mut encoder = RecordEncoder::default();
    for field in &record.fields {
        match field.value() {
            FieldValue::String(value) => encoder.emit_string(field.key(), value),
            FieldValue::I64(value) => encoder.emit_i64(field.key(), *value),
            FieldValue::U64(value) => encoder.emit_u64(field.key(), *value),
            FieldValue::F64(value) => encoder.emit_f64(field.key(), *value),
            FieldValue::Bool(value) => encoder.emit_bool(field.key(), *value),
            FieldValue::Error(message) => encoder.emit_string(field.key(), message),
            FieldValue::Object(value) => encoder.emit_object(field.key(), value.clone()),
            FieldValue::Lazy(lazy) => {
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    lazy.materialize(&mut encoder);
                }));
                if let Err(panic) = outcome {
                    let message = panic_message(panic);
                    encoder.emit_string("error", &message);
                    events::emit(Event::GenericError {
                        message: format!("lazy log field failed: {message}"),
                    });
                }
            }
        }
    }
    LogEntry {
        timestamp_micros: micros_since_epoch(record.timestamp),
        fields: encoder.fields,
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "lazy log field panicked".to_string()
    }
}
