//! Dynamic field value type.

use crate::error::{CodecError, CodecResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A dynamic field value.
///
/// This type represents every value kvorm stores inside an entity record:
/// the four scalar kinds a property can declare, `Null` for unset fields, and
/// `List` for the id collections of to-many relationships.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Null value (unset field or cleared to-one reference).
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer (full i64 range).
    Integer(i64),
    /// Floating point number. Must be finite to be encoded.
    Float(f64),
    /// UTF-8 string. Also used for to-one relationship ids.
    String(String),
    /// Ordered list of values. Used for to-many relationship ids.
    List(Vec<Value>),
}

impl Value {
    /// Returns a short name for the value's kind, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
        }
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns false if this value is, or contains, a NaN or infinite float.
    pub fn is_finite(&self) -> bool {
        match self {
            Value::Float(f) => f.is_finite(),
            Value::List(items) => items.iter().all(Value::is_finite),
            _ => true,
        }
    }

    /// Get this value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as a float. Integers are widened.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(n) => Some(*n as f64),
            _ => None,
        }
    }

    /// Get this value as a string slice, if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as a list, if it is one.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Interprets this value as a list of entity ids.
    ///
    /// `Null` is the empty list. Returns `None` if any element is not a string.
    pub fn as_id_list(&self) -> Option<Vec<String>> {
        match self {
            Value::Null => Some(Vec::new()),
            Value::List(items) => items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect(),
            _ => None,
        }
    }

    /// Builds a list value from entity ids.
    pub fn id_list<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Value::List(ids.into_iter().map(|id| Value::String(id.into())).collect())
    }

    /// Converts to a `serde_json::Value`. Non-finite floats become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Integer(n) => serde_json::Value::from(*n),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
        }
    }

    /// Converts from a `serde_json::Value`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnsupportedType`] for JSON objects and for
    /// integers outside the i64 range that cannot be represented as floats.
    pub fn from_json(json: &serde_json::Value) -> CodecResult<Self> {
        match json {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Integer(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Value::Float(f))
                } else {
                    Err(CodecError::unsupported_type(format!("number {n}")))
                }
            }
            serde_json::Value::String(s) => Ok(Value::String(s.clone())),
            serde_json::Value::Array(items) => Ok(Value::List(
                items.iter().map(Value::from_json).collect::<CodecResult<_>>()?,
            )),
            serde_json::Value::Object(_) => Err(CodecError::unsupported_type("object")),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::String(s.clone())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_accessors() {
        assert!(Value::Null.is_null());
        assert!(!Value::Bool(true).is_null());

        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Integer(42).as_bool(), None);

        assert_eq!(Value::Integer(42).as_integer(), Some(42));
        assert_eq!(Value::String("42".to_string()).as_integer(), None);

        assert_eq!(Value::Integer(2).as_float(), Some(2.0));
        assert_eq!(Value::String("hello".to_string()).as_str(), Some("hello"));
    }

    #[test]
    fn id_list_roundtrip() {
        let ids = Value::id_list(["1", "2"]);
        assert_eq!(
            ids.as_id_list(),
            Some(vec!["1".to_string(), "2".to_string()])
        );
        assert_eq!(Value::Null.as_id_list(), Some(Vec::new()));
        assert_eq!(Value::List(vec![Value::Integer(1)]).as_id_list(), None);
    }

    #[test]
    fn json_integers_stay_integers() {
        let decoded: Value = serde_json::from_str("30").unwrap();
        assert_eq!(decoded, Value::Integer(30));

        let decoded: Value = serde_json::from_str("30.5").unwrap();
        assert_eq!(decoded, Value::Float(30.5));
    }

    #[test]
    fn json_objects_are_rejected() {
        let json = serde_json::json!({"nested": true});
        assert!(matches!(
            Value::from_json(&json),
            Err(CodecError::UnsupportedType { .. })
        ));
    }

    #[test]
    fn non_finite_detection() {
        assert!(Value::Float(1.5).is_finite());
        assert!(!Value::Float(f64::NAN).is_finite());
        assert!(!Value::List(vec![Value::Float(f64::INFINITY)]).is_finite());
    }

    #[test]
    fn display_is_json() {
        assert_eq!(Value::from("x").to_string(), "\"x\"");
        assert_eq!(Value::Null.to_string(), "null");
        assert_eq!(Value::from(vec![1i64, 2]).to_string(), "[1,2]");
    }

    #[test]
    fn from_impls() {
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from(42i64), Value::Integer(42));
        assert_eq!(Value::from(42i32), Value::Integer(42));
        assert_eq!(Value::from(1.5f64), Value::Float(1.5));
        assert_eq!(Value::from("hello"), Value::String("hello".to_string()));
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("a")), Value::String("a".to_string()));
        assert_eq!(Value::from(()), Value::Null);
    }
}
