//! Carrier formats for propagating a [`SpanContext`] across process
//! boundaries.
//!
//! Key/value carriers implement [`Injector`] and [`Extractor`] and are used
//! with the text-map formats; the binary format works directly on byte
//! slices. Both round-trip the trace id, span id, sampled flag, and all
//! baggage.
//!
//! [`SpanContext`]: crate::trace::SpanContext

mod binary;
mod text_map;

pub use binary::BinaryPropagator;
pub use text_map::TextMapPropagator;

use std::collections::HashMap;

use thiserror::Error;

/// The supported carrier formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Format {
    /// Arbitrary string key/value carrier.
    TextMap,
    /// HTTP headers; encoded identically to [`Format::TextMap`].
    HttpHeaders,
    /// The length-prefixed byte carrier; see
    /// [`Tracer::inject_binary`](crate::trace::Tracer::inject_binary).
    Binary,
}

/// A failed inject or extract. Returned, never raised.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum PropagationError {
    /// The format cannot serve the carrier it was asked to use.
    #[error("unsupported propagation format for this carrier")]
    UnsupportedFormat,
    /// The carrier does not hold a usable span context.
    #[error("corrupted carrier: {0}")]
    CorruptedCarrier(&'static str),
}

/// Provides an interface for adding fields to an underlying struct like
/// `HashMap`.
pub trait Injector {
    /// Add a key and value to the underlying data.
    fn set(&mut self, key: &str, value: String);
}

/// Provides an interface for reading fields from an underlying struct like
/// `HashMap`.
pub trait Extractor {
    /// Get a value for a key from the underlying data.
    fn get(&self, key: &str) -> Option<&str>;

    /// Collect all the keys from the underlying data.
    fn keys(&self) -> Vec<&str>;
}

impl<S: std::hash::BuildHasher> Injector for HashMap<String, String, S> {
    /// Set a key and value in the HashMap.
    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_lowercase(), value);
    }
}

impl<S: std::hash::BuildHasher> Extractor for HashMap<String, String, S> {
    /// Get a value for a key from the HashMap.
    fn get(&self, key: &str) -> Option<&str> {
        self.get(&key.to_lowercase()).map(String::as_str)
    }

    /// Collect all the keys from the HashMap.
    fn keys(&self) -> Vec<&str> {
        self.keys().map(String::as_str).collect()
    }
}
