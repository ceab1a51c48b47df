//! Structured log fields attached to spans.
//!
//! A [`LogField`] is a typed key/value pair. Most fields carry their value
//! eagerly; [`LogField::lazy`] defers the cost of producing a value until
//! the recorder serializes the span, which keeps expensive formatting off
//! the application's critical path.

use std::borrow::Cow;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use serde::Serialize;

/// Receives the output of a lazy log field when it is materialized.
///
/// A lazy thunk may emit any number of fields, each under its own key.
pub trait FieldEncoder {
    /// Emit a string field.
    fn emit_string(&mut self, key: &str, value: &str);
    /// Emit a signed integer field.
    fn emit_i64(&mut self, key: &str, value: i64);
    /// Emit an unsigned integer field.
    fn emit_u64(&mut self, key: &str, value: u64);
    /// Emit a floating point field.
    fn emit_f64(&mut self, key: &str, value: f64);
    /// Emit a boolean field.
    fn emit_bool(&mut self, key: &str, value: bool);
    /// Emit an opaque object field.
    fn emit_object(&mut self, key: &str, value: serde_json::Value);
}

type LazyThunk = Box<dyn FnOnce(&mut dyn FieldEncoder) + Send>;

/// A one-shot deferred field value.
///
/// The thunk is owned behind a shared slot so that materialization moves it
/// out: clones of the field share the single shot, and a second
/// materialization attempt finds the slot empty and does nothing.
#[derive(Clone)]
pub struct LazyField {
    thunk: Arc<Mutex<Option<LazyThunk>>>,
}

impl LazyField {
    fn new(thunk: LazyThunk) -> Self {
        LazyField {
            thunk: Arc::new(Mutex::new(Some(thunk))),
        }
    }

    /// Runs the thunk against `encoder`, consuming it. Returns `false` if
    /// the thunk had already been consumed.
    pub fn materialize(&self, encoder: &mut dyn FieldEncoder) -> bool {
        let thunk = self.thunk.lock().ok().and_then(|mut slot| slot.take());
        match thunk {
            Some(thunk) => {
                thunk(encoder);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for LazyField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let consumed = self
            .thunk
            .lock()
            .map(|slot| slot.is_none())
            .unwrap_or(true);
        f.debug_struct("LazyField").field("consumed", &consumed).finish()
    }
}

/// The tagged value of a [`LogField`].
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum FieldValue {
    /// An eagerly captured string.
    String(Cow<'static, str>),
    /// A signed integer.
    I64(i64),
    /// An unsigned integer.
    U64(u64),
    /// A floating point number.
    F64(f64),
    /// A boolean.
    Bool(bool),
    /// The rendered message of an error value.
    Error(String),
    /// An opaque, pre-serialized object.
    Object(serde_json::Value),
    /// A deferred value; see [`LogField::lazy`].
    Lazy(LazyField),
}

/// A single typed key/value pair inside a [`LogRecord`].
#[derive(Clone, Debug)]
pub struct LogField {
    pub(crate) key: Cow<'static, str>,
    pub(crate) value: FieldValue,
}

impl LogField {
    /// A string-valued field.
    pub fn string(key: impl Into<Cow<'static, str>>, value: impl Into<Cow<'static, str>>) -> Self {
        LogField {
            key: key.into(),
            value: FieldValue::String(value.into()),
        }
    }

    /// A signed-integer field.
    pub fn int(key: impl Into<Cow<'static, str>>, value: i64) -> Self {
        LogField {
            key: key.into(),
            value: FieldValue::I64(value),
        }
    }

    /// An unsigned-integer field.
    pub fn uint(key: impl Into<Cow<'static, str>>, value: u64) -> Self {
        LogField {
            key: key.into(),
            value: FieldValue::U64(value),
        }
    }

    /// A floating-point field.
    pub fn float(key: impl Into<Cow<'static, str>>, value: f64) -> Self {
        LogField {
            key: key.into(),
            value: FieldValue::F64(value),
        }
    }

    /// A boolean field.
    pub fn bool(key: impl Into<Cow<'static, str>>, value: bool) -> Self {
        LogField {
            key: key.into(),
            value: FieldValue::Bool(value),
        }
    }

    /// A field capturing the rendered message of an error.
    pub fn error(err: &dyn std::error::Error) -> Self {
        LogField {
            key: Cow::Borrowed("error"),
            value: FieldValue::Error(err.to_string()),
        }
    }

    /// An opaque object field, serialized at creation time.
    ///
    /// Serialization failures are captured as an [`FieldValue::Error`] so
    /// logging can never fail the caller.
    pub fn object<T: Serialize>(key: impl Into<Cow<'static, str>>, value: &T) -> Self {
        let key = key.into();
        match serde_json::to_value(value) {
            Ok(json) => LogField {
                key,
                value: FieldValue::Object(json),
            },
            Err(err) => LogField {
                key,
                value: FieldValue::Error(format!("unserializable object: {err}")),
            },
        }
    }

    /// A deferred field. The thunk runs at most once, when the recorder
    /// serializes the owning span, and emits its output into the provided
    /// [`FieldEncoder`]. It is never run on the thread that logged it.
    pub fn lazy<F>(thunk: F) -> Self
    where
        F: FnOnce(&mut dyn FieldEncoder) + Send + 'static,
    {
        // Lazy thunks emit their own keys; the field itself has none.
        LogField {
            key: Cow::Borrowed(""),
            value: FieldValue::Lazy(LazyField::new(Box::new(thunk))),
        }
    }

    /// A field from a tag-style scalar [`Value`](crate::Value).
    pub fn from_value(key: impl Into<Cow<'static, str>>, value: impl Into<crate::Value>) -> Self {
        use crate::Value;
        match value.into() {
            Value::Bool(v) => LogField::bool(key, v),
            Value::I64(v) => LogField::int(key, v),
            Value::U64(v) => LogField::uint(key, v),
            Value::F64(v) => LogField::float(key, v),
            Value::String(v) => LogField::string(key, v),
        }
    }

    /// The field's key. Empty for lazy fields, which emit their own keys.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The field's value.
    pub fn value(&self) -> &FieldValue {
        &self.value
    }
}

/// A timestamped group of fields logged in a single call.
#[derive(Clone, Debug)]
pub struct LogRecord {
    /// Wall-clock time at record creation.
    pub timestamp: SystemTime,
    /// The fields of this record, in the order they were supplied.
    pub fields: Vec<LogField>,
}

impl LogRecord {
    pub(crate) fn now(fields: Vec<LogField>) -> Self {
        LogRecord {
            timestamp: SystemTime::now(),
            fields,
        }
    }
}
