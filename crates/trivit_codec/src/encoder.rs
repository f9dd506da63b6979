//! CBOR encoder for wire payloads.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use ciborium::value::{Integer, Value as CborValue};

/// Largest payload, in bytes, a single interactive message may carry.
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

/// Encode a payload to CBOR bytes.
///
/// Map entries are written in the order they are stored, so payloads
/// built with [`Value::map`] produce deterministic bytes.
///
/// # Errors
///
/// Returns an error if serialization fails or the encoded payload is
/// larger than [`MAX_PAYLOAD_BYTES`].
pub fn to_cbor(value: &Value) -> CodecResult<Vec<u8>> {
    let mut buffer = Vec::new();
    ciborium::ser::into_writer(&to_cbor_value(value), &mut buffer)
        .map_err(|e| CodecError::encoding_failed(format!("{e:?}")))?;

    if buffer.len() > MAX_PAYLOAD_BYTES {
        return Err(CodecError::PayloadTooLarge {
            size: buffer.len(),
            limit: MAX_PAYLOAD_BYTES,
        });
    }

    Ok(buffer)
}

fn to_cbor_value(value: &Value) -> CborValue {
    match value {
        Value::Null => CborValue::Null,
        Value::Bool(b) => CborValue::Bool(*b),
        Value::Integer(n) => CborValue::Integer(Integer::from(*n)),
        Value::Text(s) => CborValue::Text(s.clone()),
        Value::Array(items) => CborValue::Array(items.iter().map(to_cbor_value).collect()),
        Value::Map(pairs) => CborValue::Map(
            pairs
                .iter()
                .map(|(k, v)| (to_cbor_value(k), to_cbor_value(v)))
                .collect(),
        ),
    }
}
