//! Decode command implementation.

use super::{CliError, OutputFormat};
use serde::Serialize;
use std::path::Path;
use trivit_codec::{from_cbor, Value};
use trivit_sync_protocol::SyncMessage;

/// Decoded view of one wire payload.
#[derive(Debug, Serialize)]
pub struct DecodeResult {
    /// Payload size in bytes.
    pub size: usize,
    /// Payload as JSON.
    pub payload: serde_json::Value,
    /// Message type, if the payload is a valid message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Number of records carried, for snapshots.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<usize>,
    /// Why the payload is not a valid message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Runs the decode command.
pub fn run(input: &Path, hex: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let format = OutputFormat::parse(format)?;
    let raw = std::fs::read(input)?;
    let bytes = if hex {
        parse_hex(&String::from_utf8_lossy(&raw))?
    } else {
        raw
    };

    let result = decode(&bytes)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => print_text(&result)?,
    }
    Ok(())
}

/// Decodes a payload. Fails only if the bytes are not a valid payload;
/// an invalid message is reported in the result.
pub fn decode(bytes: &[u8]) -> Result<DecodeResult, Box<dyn std::error::Error>> {
    let value = from_cbor(bytes)?;
    let mut result = DecodeResult {
        size: bytes.len(),
        payload: to_json(&value),
        kind: None,
        records: None,
        error: None,
    };

    match SyncMessage::from_value(&value) {
        Ok(message) => {
            result.kind = Some(message.kind().wire_name().to_string());
            if let SyncMessage::TrivitsSync(records) = &message {
                result.records = Some(records.len());
            }
        }
        Err(err) => result.error = Some(err.to_string()),
    }
    Ok(result)
}

fn print_text(result: &DecodeResult) -> Result<(), serde_json::Error> {
    println!("Size:    {} bytes", result.size);
    match (&result.kind, &result.error) {
        (Some(kind), _) => println!("Message: {kind}"),
        (None, Some(error)) => println!("Invalid: {error}"),
        (None, None) => {}
    }
    if let Some(records) = result.records {
        println!("Records: {records}");
    }
    println!("{}", serde_json::to_string_pretty(&result.payload)?);
    Ok(())
}

/// Lowers a payload value to JSON. Map keys are always text.
fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Integer(n) => serde_json::Value::from(*n),
        Value::Text(s) => serde_json::Value::String(s.clone()),
        Value::Array(items) => serde_json::Value::Array(items.iter().map(to_json).collect()),
        Value::Map(pairs) => serde_json::Value::Object(
            pairs
                .iter()
                .map(|(k, v)| {
                    let key = match k {
                        Value::Text(s) => s.clone(),
                        other => to_json(other).to_string(),
                    };
                    (key, to_json(v))
                })
                .collect(),
        ),
    }
}

fn parse_hex(text: &str) -> Result<Vec<u8>, CliError> {
    let digits: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.len() % 2 != 0 {
        return Err(CliError::InvalidHex);
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            digits
                .get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or(CliError::InvalidHex)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use trivit_sync_protocol::{Counter, CounterId};

    #[test]
    fn decodes_valid_message() {
        let counter = Counter::new("Water", 3).with_count(4);
        let bytes = SyncMessage::full_sync([&counter]).encode().unwrap();
        let result = decode(&bytes).unwrap();

        assert_eq!(result.kind.as_deref(), Some("trivitsSync"));
        assert_eq!(result.records, Some(1));
        assert_eq!(result.payload["trivits"][0]["title"], "Water");
        assert_eq!(result.payload["trivits"][0]["count"], 4);
        assert!(result.error.is_none());
    }

    #[test]
    fn reports_invalid_message() {
        let bytes = trivit_codec::to_cbor(&Value::text_map([("type", Value::from("trivitDelete"))]))
            .unwrap();
        let result = decode(&bytes).unwrap();
        assert!(result.kind.is_none());
        assert!(result.error.unwrap().contains("id"));
    }

    #[test]
    fn rejects_non_payload_bytes() {
        assert!(decode(&[0xff, 0x00]).is_err());
    }

    #[test]
    fn parses_hex_text() {
        let id = CounterId::new();
        let bytes = SyncMessage::delete(id).encode().unwrap();
        let text: String = bytes.iter().map(|b| format!("{b:02x} ")).collect();
        assert_eq!(parse_hex(&text).unwrap(), bytes);
        assert!(matches!(parse_hex("abc"), Err(CliError::InvalidHex)));
        assert!(matches!(parse_hex("zz"), Err(CliError::InvalidHex)));
    }
}
