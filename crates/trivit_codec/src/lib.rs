//! # Trivit Codec
//!
//! Generic key-value wire payload for Trivit sync messages.
//!
//! Every sync message is first lowered to a [`Value`] map (the shape the
//! phone and watch exchange) and then framed as CBOR bytes for the
//! transport.
//!
//! ## Payload Rules
//!
//! - Map keys are text and sorted (length-first, then bytewise)
//! - Integers are signed 64-bit
//! - No floats: timestamps are integer milliseconds since the Unix epoch
//! - No byte strings: identifiers travel as hyphenated UUID text
//! - A single payload is at most [`MAX_PAYLOAD_BYTES`]
//!
//! ## Usage
//!
//! ```
//! use trivit_codec::{from_cbor, to_cbor, Value};
//!
//! let value = Value::text_map([("type", Value::from("requestSync"))]);
//! let bytes = to_cbor(&value).unwrap();
//! assert_eq!(from_cbor(&bytes).unwrap(), value);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod value;

pub use decoder::from_cbor;
pub use encoder::{to_cbor, MAX_PAYLOAD_BYTES};
pub use error::{CodecError, CodecResult};
pub use value::Value;
