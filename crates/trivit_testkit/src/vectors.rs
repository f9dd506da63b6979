//! Wire test vectors.
//!
//! These pin the exact bytes of sync messages so that another
//! implementation of either device can be checked against this one.

use serde::{Deserialize, Serialize};
use trivit_sync_protocol::{CounterId, ProtocolError, SyncMessage};

/// Counter id used by the vectors.
pub const VECTOR_ID: &str = "00000000-0000-4000-8000-000000000001";

/// A test vector that can be shared across implementations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestVector {
    /// Unique identifier for this vector.
    pub id: String,
    /// Human-readable description.
    pub description: String,
    /// Encoded payload (hex).
    pub input_hex: String,
    /// Expected error label, if decoding must fail.
    pub expected_error: Option<String>,
}

impl TestVector {
    fn valid(id: &str, description: &str, input_hex: &str) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            input_hex: input_hex.into(),
            expected_error: None,
        }
    }

    fn invalid(id: &str, description: &str, input_hex: &str, error: &str) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            input_hex: input_hex.into(),
            expected_error: Some(error.into()),
        }
    }
}

/// The message each valid vector decodes to, by vector id.
pub fn expected_message(vector_id: &str) -> Option<SyncMessage> {
    let id: CounterId = VECTOR_ID.parse().ok()?;
    match vector_id {
        "request_sync" => Some(SyncMessage::RequestSync),
        "trivit_delete" => Some(SyncMessage::delete(id)),
        "create_trivit" => Some(SyncMessage::create("X", 2)),
        _ => None,
    }
}

/// Canonical encodings of messages.
pub fn message_vectors() -> Vec<TestVector> {
    vec![
        TestVector::valid(
            "request_sync",
            "Sync request, no payload",
            "a164747970656b7265717565737453796e63",
        ),
        TestVector::valid(
            "trivit_delete",
            "Deletion by id; keys ordered shortest first",
            "a2626964782430303030303030302d303030302d343030302d383030302d3030303030303030303030\
             3164747970656c74726976697444656c657465",
        ),
        TestVector::valid(
            "create_trivit",
            "Create request with title and color",
            "a364747970656c637265617465547269766974657469746c6561586a636f6c6f72496e64657802",
        ),
    ]
}

/// Payloads that must be rejected.
pub fn malformed_vectors() -> Vec<TestVector> {
    vec![
        TestVector::invalid("null_payload", "Top-level null", "f6", "not_a_map"),
        TestVector::invalid("empty_map", "Map without a type", "a0", "missing_type"),
        TestVector::invalid(
            "unknown_type",
            "Type the protocol does not define",
            "a1647479706563666f6f",
            "unknown_type",
        ),
        TestVector::invalid(
            "delete_without_id",
            "Deletion lacking its id",
            "a164747970656c74726976697444656c657465",
            "missing_field",
        ),
        TestVector::invalid("float_payload", "Top-level float", "fb3ff0000000000000", "codec"),
        TestVector::invalid("truncated", "Text header longer than the input", "6e6f74", "codec"),
    ]
}

/// Stable label for a decoding error, as used in vectors.
pub fn error_label(error: &ProtocolError) -> &'static str {
    match error {
        ProtocolError::Codec(_) => "codec",
        ProtocolError::NotAMap => "not_a_map",
        ProtocolError::MissingType => "missing_type",
        ProtocolError::UnknownType(_) => "unknown_type",
        ProtocolError::MissingField { .. } => "missing_field",
        ProtocolError::InvalidField { .. } => "invalid_field",
    }
}

/// Encodes bytes as lowercase hexadecimal.
pub fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Decodes hexadecimal, ignoring whitespace. Returns `None` on bad input.
pub fn hex_decode(hex: &str) -> Option<Vec<u8>> {
    let hex: String = hex.chars().filter(|c| !c.is_whitespace()).collect();
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect()
}

/// All vectors as JSON.
pub fn all_vectors_json() -> serde_json::Result<String> {
    let vectors = AllTestVectors {
        messages: message_vectors(),
        malformed: malformed_vectors(),
    };
    serde_json::to_string_pretty(&vectors)
}

#[derive(Debug, Serialize, Deserialize)]
struct AllTestVectors {
    messages: Vec<TestVector>,
    malformed: Vec<TestVector>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_vectors_decode_and_reencode() {
        for vector in message_vectors() {
            let input = hex_decode(&vector.input_hex).unwrap();
            let expected = expected_message(&vector.id).unwrap();

            let decoded = SyncMessage::decode(&input)
                .unwrap_or_else(|e| panic!("vector {} failed: {e}", vector.id));
            assert_eq!(decoded, expected, "vector {}", vector.id);
            assert_eq!(
                hex_encode(&expected.encode().unwrap()),
                hex_encode(&input),
                "vector {}: {}",
                vector.id,
                vector.description
            );
        }
    }

    #[test]
    fn malformed_vectors_are_rejected() {
        for vector in malformed_vectors() {
            let input = hex_decode(&vector.input_hex).unwrap();
            let err = SyncMessage::decode(&input).unwrap_err();
            assert_eq!(
                Some(error_label(&err)),
                vector.expected_error.as_deref(),
                "vector {}: {}",
                vector.id,
                vector.description
            );
        }
    }

    #[test]
    fn hex_helpers() {
        assert_eq!(hex_decode("0a ff"), Some(vec![0x0a, 0xff]));
        assert_eq!(hex_decode("abc"), None);
        assert_eq!(hex_decode("zz"), None);
        assert_eq!(hex_encode(&[0, 16, 255]), "0010ff");
    }

    #[test]
    fn vectors_serialize() {
        let json = all_vectors_json().unwrap();
        assert!(json.contains("request_sync"));
        assert!(json.contains("malformed"));
    }
}
