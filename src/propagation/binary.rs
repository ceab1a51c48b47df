use std::collections::HashMap;

use crate::propagation::PropagationError;
use crate::trace::{SpanContext, SpanId, TraceId};

/// Propagator for the binary carrier format.
///
/// The carrier is a big-endian `u32` payload length followed by the
/// payload: `trace_id (16) || span_id (8) || sampled (1) ||
/// baggage_count (u32) || (klen u32, key, vlen u32, value)*`. Baggage
/// entries are written in sorted key order so encoding is deterministic.
#[derive(Clone, Debug, Default)]
pub struct BinaryPropagator {
    _private: (),
}

impl BinaryPropagator {
    /// Create a binary propagator.
    pub fn new() -> Self {
        BinaryPropagator { _private: () }
    }

    /// Serialize `context` into a carrier.
    pub fn to_bytes(&self, context: &SpanContext) -> Vec<u8> {
        let mut baggage: Vec<(&str, &str)> = context.baggage_items().collect();
        baggage.sort_unstable();

        let mut payload = Vec::with_capacity(29);
        payload.extend_from_slice(&context.trace_id().to_bytes());
        payload.extend_from_slice(&context.span_id().to_bytes());
        payload.push(context.is_sampled() as u8);
        payload.extend_from_slice(&(baggage.len() as u32).to_be_bytes());
        for (key, value) in baggage {
            payload.extend_from_slice(&(key.len() as u32).to_be_bytes());
            payload.extend_from_slice(key.as_bytes());
            payload.extend_from_slice(&(value.len() as u32).to_be_bytes());
            payload.extend_from_slice(value.as_bytes());
        }

        let mut carrier = Vec::with_capacity(4 + payload.len());
        carrier.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        carrier.extend_from_slice(&payload);
        carrier
    }

    /// Deserialize a [`SpanContext`] from a carrier.
    pub fn from_bytes(&self, bytes: &[u8]) -> Result<SpanContext, PropagationError> {
        let mut cursor = bytes;
        let payload_len = take_u32(&mut cursor)? as usize;
        if cursor.len() != payload_len {
            return Err(PropagationError::CorruptedCarrier("length prefix mismatch"));
        }

        let mut trace_id = [0u8; 16];
        trace_id.copy_from_slice(take(&mut cursor, 16)?);
        let trace_id = TraceId::from_bytes(trace_id);

        let mut span_id = [0u8; 8];
        span_id.copy_from_slice(take(&mut cursor, 8)?);
        let span_id = SpanId::from_bytes(span_id);

        let sampled = match take(&mut cursor, 1)?[0] {
            0 => false,
            1 => true,
            _ => return Err(PropagationError::CorruptedCarrier("malformed sampled byte")),
        };

        if trace_id == TraceId::INVALID || span_id == SpanId::INVALID {
            return Err(PropagationError::CorruptedCarrier("zero identity"));
        }

        let count = take_u32(&mut cursor)?;
        let mut baggage = HashMap::new();
        for _ in 0..count {
            let key = take_string(&mut cursor)?;
            let value = take_string(&mut cursor)?;
            baggage.insert(key, value);
        }
        if !cursor.is_empty() {
            return Err(PropagationError::CorruptedCarrier("trailing bytes"));
        }

        Ok(SpanContext::from_parts(trace_id, span_id, sampled, baggage))
    }
}

fn take<'a>(cursor: &mut &'a [u8], len: usize) -> Result<&'a [u8], PropagationError> {
    if cursor.len() < len {
        return Err(PropagationError::CorruptedCarrier("truncated carrier"));
    }
    let (head, tail) = cursor.split_at(len);
    *cursor = tail;
    Ok(head)
}

fn take_u32(cursor: &mut &[u8]) -> Result<u32, PropagationError> {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(take(cursor, 4)?);
    Ok(u32::from_be_bytes(buf))
}

fn take_string(cursor: &mut &[u8]) -> Result<String, PropagationError> {
    let len = take_u32(cursor)? as usize;
    let bytes = take(cursor, len)?;
    String::from_utf8(bytes.to_vec())
        .map_err(|_| PropagationError::CorruptedCarrier("non-utf8 baggage"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_context() -> SpanContext {
        SpanContext::new(TraceId::from(0x0123_4567u128), SpanId::from(0x89ab_cdefu64), true)
            .with_baggage("user", "alice")
            .with_baggage("tier", "gold")
    }

    #[test]
    fn round_trip_preserves_identity_and_baggage() {
        let propagator = BinaryPropagator::new();
        let bytes = propagator.to_bytes(&sample_context());
        let extracted = propagator.from_bytes(&bytes).unwrap();

        assert_eq!(extracted, sample_context());
        assert!(extracted.is_sampled());
        assert_eq!(extracted.baggage_item("user"), Some("alice"));
        assert_eq!(extracted.baggage_item("tier"), Some("gold"));
    }

    #[test]
    fn encoding_is_deterministic() {
        let propagator = BinaryPropagator::new();
        assert_eq!(
            propagator.to_bytes(&sample_context()),
            propagator.to_bytes(&sample_context())
        );
    }

    #[test]
    fn layout_is_length_prefixed_big_endian() {
        let propagator = BinaryPropagator::new();
        let context = SpanContext::new(TraceId::from(1u128), SpanId::from(2u64), true);
        let bytes = propagator.to_bytes(&context);

        // payload = 16 + 8 + 1 + 4 bytes with no baggage
        assert_eq!(&bytes[..4], &29u32.to_be_bytes());
        assert_eq!(bytes.len(), 33);
        assert_eq!(bytes[4 + 15], 1); // trace id, big-endian
        assert_eq!(bytes[4 + 16 + 7], 2); // span id, big-endian
        assert_eq!(bytes[4 + 24], 1); // sampled byte
        assert_eq!(&bytes[29..33], &0u32.to_be_bytes()); // baggage count
    }

    #[test]
    fn truncation_and_trailing_bytes_are_corrupted() {
        let propagator = BinaryPropagator::new();
        let bytes = propagator.to_bytes(&sample_context());

        assert_eq!(
            propagator.from_bytes(&bytes[..bytes.len() - 1]),
            Err(PropagationError::CorruptedCarrier("length prefix mismatch"))
        );
        assert_eq!(
            propagator.from_bytes(&[]),
            Err(PropagationError::CorruptedCarrier("truncated carrier"))
        );

        let mut padded = bytes.clone();
        padded.push(0);
        assert_eq!(
            propagator.from_bytes(&padded),
            Err(PropagationError::CorruptedCarrier("length prefix mismatch"))
        );
    }

    #[test]
    fn malformed_sampled_byte_is_corrupted() {
        let propagator = BinaryPropagator::new();
        let mut bytes = propagator.to_bytes(&SpanContext::new(
            TraceId::from(1u128),
            SpanId::from(2u64),
            false,
        ));
        bytes[4 + 24] = 7;
        assert_eq!(
            propagator.from_bytes(&bytes),
            Err(PropagationError::CorruptedCarrier("malformed sampled byte"))
        );
    }
}
