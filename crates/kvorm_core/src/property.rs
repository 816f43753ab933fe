//! Typed property descriptors.

use crate::error::{CoreError, CoreResult};
use kvorm_codec::Value;

/// Scalar kind and bounds of a property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyKind {
    /// UTF-8 string with optional length bounds, counted in characters.
    String {
        /// Minimum length, inclusive.
        min_length: Option<usize>,
        /// Maximum length, inclusive.
        max_length: Option<usize>,
    },
    /// Signed integer with optional inclusive bounds.
    Integer {
        /// Lower bound.
        min: Option<i64>,
        /// Upper bound.
        max: Option<i64>,
    },
    /// Finite float with optional inclusive bounds.
    Float {
        /// Lower bound.
        min: Option<f64>,
        /// Upper bound.
        max: Option<f64>,
    },
    /// Boolean.
    Boolean,
}

impl PropertyKind {
    /// Returns the kind's name as used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            PropertyKind::String { .. } => "string",
            PropertyKind::Integer { .. } => "integer",
            PropertyKind::Float { .. } => "float",
            PropertyKind::Boolean => "boolean",
        }
    }
}

/// A declared scalar property of an entity type.
///
/// # Example
///
/// ```
/// use kvorm_core::PropertyDef;
///
/// let age = PropertyDef::integer("age").min(0).max(150);
/// assert!(age.validate(&30.into()).is_ok());
/// assert!(age.validate(&(-1).into()).is_err());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDef {
    /// Field name in the record.
    pub name: String,
    /// Kind and bounds.
    pub kind: PropertyKind,
    /// Value reported while the field is unset.
    pub default: Option<Value>,
    /// Whether `null` is rejected.
    pub required: bool,
}

impl PropertyDef {
    fn with_kind(name: impl Into<String>, kind: PropertyKind) -> Self {
        Self {
            name: name.into(),
            kind,
            default: None,
            required: false,
        }
    }

    /// Declares a string property.
    #[must_use]
    pub fn string(name: impl Into<String>) -> Self {
        Self::with_kind(
            name,
            PropertyKind::String {
                min_length: None,
                max_length: None,
            },
        )
    }

    /// Declares an integer property.
    #[must_use]
    pub fn integer(name: impl Into<String>) -> Self {
        Self::with_kind(name, PropertyKind::Integer { min: None, max: None })
    }

    /// Declares a float property.
    #[must_use]
    pub fn float(name: impl Into<String>) -> Self {
        Self::with_kind(name, PropertyKind::Float { min: None, max: None })
    }

    /// Declares a boolean property.
    #[must_use]
    pub fn boolean(name: impl Into<String>) -> Self {
        Self::with_kind(name, PropertyKind::Boolean)
    }

    /// Sets the minimum string length. Ignored for other kinds.
    #[must_use]
    pub fn min_length(mut self, len: usize) -> Self {
        if let PropertyKind::String { min_length, .. } = &mut self.kind {
            *min_length = Some(len);
        }
        self
    }

    /// Sets the maximum string length. Ignored for other kinds.
    #[must_use]
    pub fn max_length(mut self, len: usize) -> Self {
        if let PropertyKind::String { max_length, .. } = &mut self.kind {
            *max_length = Some(len);
        }
        self
    }

    /// Sets the lower bound of a numeric property.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn min(mut self, bound: impl Into<f64>) -> Self {
        let bound = bound.into();
        match &mut self.kind {
            PropertyKind::Integer { min, .. } => *min = Some(bound.ceil() as i64),
            PropertyKind::Float { min, .. } => *min = Some(bound),
            _ => {}
        }
        self
    }

    /// Sets the upper bound of a numeric property.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn max(mut self, bound: impl Into<f64>) -> Self {
        let bound = bound.into();
        match &mut self.kind {
            PropertyKind::Integer { max, .. } => *max = Some(bound.floor() as i64),
            PropertyKind::Float { max, .. } => *max = Some(bound),
            _ => {}
        }
        self
    }

    /// Sets the value reported while the field is unset.
    #[must_use]
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Rejects `null` for this field.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Returns the value a fresh record starts with.
    pub fn initial_value(&self) -> Value {
        self.default.clone().unwrap_or(Value::Null)
    }

    /// Validates `value` and returns the value to store.
    ///
    /// Strings are coerced into integer, float and boolean fields, and
    /// integers widen into float fields. Anything else of the wrong kind,
    /// out of bounds, or non-finite is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] naming the violated constraint.
    pub fn validate(&self, value: &Value) -> CoreResult<Value> {
        if value.is_null() {
            if self.required {
                return Err(self.invalid(value, "field is required"));
            }
            return Ok(Value::Null);
        }

        match &self.kind {
            PropertyKind::String {
                min_length,
                max_length,
            } => {
                let s = value
                    .as_str()
                    .ok_or_else(|| self.wrong_kind(value))?;
                let len = s.chars().count();
                if let Some(min) = min_length {
                    if len < *min {
                        return Err(self.invalid(value, format!("length must be >= {min}")));
                    }
                }
                if let Some(max) = max_length {
                    if len > *max {
                        return Err(self.invalid(value, format!("length must be <= {max}")));
                    }
                }
                Ok(value.clone())
            }
            PropertyKind::Integer { min, max } => {
                let n = match value {
                    Value::Integer(n) => *n,
                    Value::String(s) => s
                        .trim()
                        .parse::<i64>()
                        .map_err(|_| self.wrong_kind(value))?,
                    _ => return Err(self.wrong_kind(value)),
                };
                if let Some(min) = min {
                    if n < *min {
                        return Err(self.invalid(value, format!("must be >= {min}")));
                    }
                }
                if let Some(max) = max {
                    if n > *max {
                        return Err(self.invalid(value, format!("must be <= {max}")));
                    }
                }
                Ok(Value::Integer(n))
            }
            PropertyKind::Float { min, max } => {
                let f = match value {
                    Value::String(s) => s
                        .trim()
                        .parse::<f64>()
                        .map_err(|_| self.wrong_kind(value))?,
                    other => other.as_float().ok_or_else(|| self.wrong_kind(value))?,
                };
                if !f.is_finite() {
                    return Err(self.invalid(value, "must be finite"));
                }
                if let Some(min) = min {
                    if f < *min {
                        return Err(self.invalid(value, format!("must be >= {min}")));
                    }
                }
                if let Some(max) = max {
                    if f > *max {
                        return Err(self.invalid(value, format!("must be <= {max}")));
                    }
                }
                Ok(Value::Float(f))
            }
            PropertyKind::Boolean => match value {
                Value::Bool(b) => Ok(Value::Bool(*b)),
                Value::String(s) => Ok(Value::Bool(matches!(
                    s.to_lowercase().as_str(),
                    "true" | "1" | "yes" | "on"
                ))),
                _ => Err(self.wrong_kind(value)),
            },
        }
    }

    fn wrong_kind(&self, value: &Value) -> CoreError {
        self.invalid(value, format!("must be of type {}", self.kind.name()))
    }

    fn invalid(&self, value: &Value, constraint: impl Into<String>) -> CoreError {
        CoreError::validation(&self.name, value, constraint)
    }
}
