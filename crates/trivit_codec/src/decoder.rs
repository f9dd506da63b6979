//! CBOR decoder for wire payloads.

use crate::encoder::MAX_PAYLOAD_BYTES;
use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use ciborium::value::Value as CborValue;

/// Decode a payload from CBOR bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not valid CBOR, exceed
/// [`MAX_PAYLOAD_BYTES`], or contain constructs the wire payload does not
/// carry (floats, byte strings, non-text map keys).
pub fn from_cbor(bytes: &[u8]) -> CodecResult<Value> {
    if bytes.len() > MAX_PAYLOAD_BYTES {
        return Err(CodecError::PayloadTooLarge {
            size: bytes.len(),
            limit: MAX_PAYLOAD_BYTES,
        });
    }

    let raw: CborValue = ciborium::de::from_reader(bytes)
        .map_err(|e| CodecError::decoding_failed(format!("{e:?}")))?;
    from_cbor_value(raw)
}

fn from_cbor_value(raw: CborValue) -> CodecResult<Value> {
    match raw {
        CborValue::Null => Ok(Value::Null),
        CborValue::Bool(b) => Ok(Value::Bool(b)),
        CborValue::Integer(n) => i64::try_from(n)
            .map(Value::Integer)
            .map_err(|_| CodecError::invalid_structure("integer out of range")),
        CborValue::Text(s) => Ok(Value::Text(s)),
        CborValue::Array(items) => items
            .into_iter()
            .map(from_cbor_value)
            .collect::<CodecResult<Vec<_>>>()
            .map(Value::Array),
        CborValue::Map(pairs) => {
            let mut entries = Vec::with_capacity(pairs.len());
            for (key, value) in pairs {
                let key = match key {
                    CborValue::Text(k) => Value::Text(k),
                    _ => return Err(CodecError::invalid_structure("map keys must be text")),
                };
                entries.push((key, from_cbor_value(value)?));
            }
            Ok(Value::Map(entries))
        }
        // Tags carry no meaning in the wire format.
        CborValue::Tag(_, inner) => from_cbor_value(*inner),
        CborValue::Float(_) => Err(CodecError::FloatForbidden),
        CborValue::Bytes(_) => Err(CodecError::unsupported_type("bytes")),
        _ => Err(CodecError::unsupported_type("unknown")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_small_integer() {
        assert_eq!(from_cbor(&[0x0a]).unwrap(), Value::Integer(10));
    }

    #[test]
    fn decode_negative_integer() {
        assert_eq!(from_cbor(&[0x29]).unwrap(), Value::Integer(-10));
    }

    #[test]
    fn reject_float() {
        // 1.5 as half-precision float
        let err = from_cbor(&[0xf9, 0x3e, 0x00]).unwrap_err();
        assert_eq!(err, CodecError::FloatForbidden);
    }

    #[test]
    fn reject_bytes() {
        let err = from_cbor(&[0x42, 0x01, 0x02]).unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedType { .. }));
    }

    #[test]
    fn reject_integer_map_key() {
        // {1: 2}
        let err = from_cbor(&[0xa1, 0x01, 0x02]).unwrap_err();
        assert!(matches!(err, CodecError::InvalidStructure { .. }));
    }

    #[test]
    fn tags_are_unwrapped() {
        // tag(1) 10
        assert_eq!(from_cbor(&[0xc1, 0x0a]).unwrap(), Value::Integer(10));
    }

    #[test]
    fn truncated_input_fails() {
        // text of length 5 with only 2 bytes present
        let err = from_cbor(&[0x65, b'h', b'i']).unwrap_err();
        assert!(matches!(err, CodecError::DecodingFailed { .. }));
    }

    #[test]
    fn empty_input_fails() {
        assert!(from_cbor(&[]).is_err());
    }
}
