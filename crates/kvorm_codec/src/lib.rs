//! # kvorm Codec
//!
//! JSON encoding/decoding for kvorm records and values.
//!
//! Everything kvorm writes to a key-value store is JSON text:
//! - Entity records are flat JSON objects ([`Record`])
//! - Counters and alias targets are JSON strings
//! - Audit entries are JSON arrays `[operation, timestamp, key, payload]`
//!
//! ## Encoding Rules
//!
//! - Record keys are sorted, so identical records encode identically
//! - Integers stay integers; floats must be finite
//! - Nested objects are not field values; to-many relationships are id lists
//!
//! ## Usage
//!
//! ```
//! use kvorm_codec::{from_json, to_json, Value};
//!
//! let value = Value::Integer(42);
//! let text = to_json(&value).unwrap();
//! let decoded: Value = from_json(&text).unwrap();
//! assert_eq!(value, decoded);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod record;
mod value;

pub use error::{CodecError, CodecResult};
pub use record::{
    Record, CREATED_FIELD, CREATOR_FIELD, ID_FIELD, OWNER_FIELD, TYPE_FIELD, UPDATED_FIELD,
    UPDATER_FIELD,
};
pub use value::Value;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes any serializable value as compact JSON text.
///
/// # Errors
///
/// Returns [`CodecError::EncodingFailed`] if serialization fails.
pub fn to_json<T: Serialize + ?Sized>(value: &T) -> CodecResult<String> {
    serde_json::to_string(value).map_err(|e| CodecError::encoding_failed(e.to_string()))
}

/// Encodes any serializable value as indented JSON text.
///
/// # Errors
///
/// Returns [`CodecError::EncodingFailed`] if serialization fails.
pub fn to_json_pretty<T: Serialize + ?Sized>(value: &T) -> CodecResult<String> {
    serde_json::to_string_pretty(value).map_err(|e| CodecError::encoding_failed(e.to_string()))
}

/// Decodes JSON text into any deserializable value.
///
/// # Errors
///
/// Returns [`CodecError::DecodingFailed`] if the text is malformed or does
/// not match `T`.
pub fn from_json<T: DeserializeOwned>(text: &str) -> CodecResult<T> {
    serde_json::from_str(text).map_err(|e| CodecError::decoding_failed(e.to_string()))
}

/// Trait for types that can be encoded to JSON text.
pub trait Encode {
    /// Encode this value to JSON text.
    fn encode(&self) -> CodecResult<String>;
}

/// Trait for types that can be decoded from JSON text.
pub trait Decode: Sized {
    /// Decode this value from JSON text.
    fn decode(text: &str) -> CodecResult<Self>;
}

impl Encode for Value {
    fn encode(&self) -> CodecResult<String> {
        if !self.is_finite() {
            return Err(CodecError::NonFiniteFloat {
                field: String::new(),
            });
        }
        to_json(self)
    }
}

impl Decode for Value {
    fn decode(text: &str) -> CodecResult<Self> {
        let json: serde_json::Value = from_json(text)?;
        Value::from_json(&json)
    }
}

impl Encode for Record {
    fn encode(&self) -> CodecResult<String> {
        Record::encode(self)
    }
}

impl Decode for Record {
    fn decode(text: &str) -> CodecResult<Self> {
        Record::decode(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_counter_string() {
        let text = to_json("41").unwrap();
        assert_eq!(text, "\"41\"");
        let decoded: String = from_json(&text).unwrap();
        assert_eq!(decoded, "41");
    }

    #[test]
    fn value_decode_list() {
        let value = <Value as Decode>::decode(r#"["1","2"]"#).unwrap();
        assert_eq!(value, Value::id_list(["1", "2"]));
    }

    #[test]
    fn value_encode_rejects_nan() {
        assert!(Encode::encode(&Value::Float(f64::NAN)).is_err());
    }

    #[test]
    fn from_json_reports_malformed_text() {
        let result: CodecResult<Value> = from_json("{");
        assert!(matches!(result, Err(CodecError::DecodingFailed { .. })));
    }

    #[test]
    fn pretty_output_is_indented() {
        let text = to_json_pretty(&vec![1, 2]).unwrap();
        assert!(text.contains('\n'));
    }
}
