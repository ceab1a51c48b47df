use std::collections::HashMap;

use crate::propagation::{Extractor, Injector, PropagationError};
use crate::trace::{SpanContext, SpanId, TraceId};

const FIELD_TRACE_ID: &str = "ot-tracer-traceid";
const FIELD_SPAN_ID: &str = "ot-tracer-spanid";
const FIELD_SAMPLED: &str = "ot-tracer-sampled";
const BAGGAGE_PREFIX: &str = "ot-baggage-";

/// Propagator for string key/value carriers.
///
/// Carrier keys: `ot-tracer-traceid` (32 lowercase hex), `ot-tracer-spanid`
/// (16 lowercase hex), `ot-tracer-sampled` (`"true"`/`"false"`), and one
/// `ot-baggage-<key>` entry per baggage item. Unknown keys are ignored on
/// extract.
#[derive(Clone, Debug, Default)]
pub struct TextMapPropagator {
    _private: (),
}

impl TextMapPropagator {
    /// Create a text-map propagator.
    pub fn new() -> Self {
        TextMapPropagator { _private: () }
    }

    /// Write `context` into `carrier`.
    pub fn inject(&self, context: &SpanContext, carrier: &mut dyn Injector) {
        carrier.set(FIELD_TRACE_ID, context.trace_id().to_string());
        carrier.set(FIELD_SPAN_ID, context.span_id().to_string());
        carrier.set(FIELD_SAMPLED, context.is_sampled().to_string());
        for (key, value) in context.baggage_items() {
            carrier.set(&format!("{BAGGAGE_PREFIX}{key}"), value.to_string());
        }
    }

    /// Read a [`SpanContext`] back out of `carrier`.
    pub fn extract(&self, carrier: &dyn Extractor) -> Result<SpanContext, PropagationError> {
        let trace_id = carrier
            .get(FIELD_TRACE_ID)
            .ok_or(PropagationError::CorruptedCarrier("missing trace id"))?;
        let trace_id = TraceId::from_hex(trace_id.trim())
            .map_err(|_| PropagationError::CorruptedCarrier("malformed trace id"))?;

        let span_id = carrier
            .get(FIELD_SPAN_ID)
            .ok_or(PropagationError::CorruptedCarrier("missing span id"))?;
        let span_id = SpanId::from_hex(span_id.trim())
            .map_err(|_| PropagationError::CorruptedCarrier("malformed span id"))?;

        let sampled = carrier
            .get(FIELD_SAMPLED)
            .ok_or(PropagationError::CorruptedCarrier("missing sampled flag"))?;
        let sampled = match sampled.trim() {
            flag if flag.eq_ignore_ascii_case("true") => true,
            flag if flag.eq_ignore_ascii_case("false") => false,
            _ => return Err(PropagationError::CorruptedCarrier("malformed sampled flag")),
        };

        if trace_id == TraceId::INVALID || span_id == SpanId::INVALID {
            return Err(PropagationError::CorruptedCarrier("zero identity"));
        }

        let mut baggage = HashMap::new();
        for key in carrier.keys() {
            // get() rather than indexing: carrier keys are arbitrary and a
            // multibyte character could straddle the prefix boundary.
            let prefix = key.get(..BAGGAGE_PREFIX.len());
            let item = key.get(BAGGAGE_PREFIX.len()..);
            if let (Some(prefix), Some(item)) = (prefix, item) {
                if prefix.eq_ignore_ascii_case(BAGGAGE_PREFIX) && !item.is_empty() {
                    if let Some(value) = carrier.get(key) {
                        baggage.insert(item.to_string(), value.to_string());
                    }
                }
            }
        }

        Ok(SpanContext::from_parts(trace_id, span_id, sampled, baggage))
    }
}
