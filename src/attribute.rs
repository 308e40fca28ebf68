//! Free attribute types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::BackendError;

/// The declared type of a free attribute.
///
/// Attributes are stored as JSON, so the type is derived from the value itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    Null,
    Boolean,
    Integer,
    Float,
    String,
    /// A sequence of integers.
    IntegerArray,
    /// A sequence of numbers with at least one non-integer.
    FloatArray,
    /// Any other sequence, including the empty sequence.
    Array,
    Object,
}

impl AttributeType {
    /// Determine the type of an attribute value.
    #[must_use]
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Boolean,
            Value::Number(number) if number.is_f64() => Self::Float,
            Value::Number(_) => Self::Integer,
            Value::String(_) => Self::String,
            Value::Array(items) if items.is_empty() => Self::Array,
            Value::Array(items) => {
                if items.iter().all(|item| item.is_i64() || item.is_u64()) {
                    Self::IntegerArray
                } else if items.iter().all(Value::is_number) {
                    Self::FloatArray
                } else {
                    Self::Array
                }
            }
            Value::Object(_) => Self::Object,
        }
    }

    /// Returns true for one dimensional numeric sequences.
    #[must_use]
    pub fn is_numeric_array(self) -> bool {
        matches!(self, Self::IntegerArray | Self::FloatArray)
    }

    /// Returns true if a value of type `actual` can be read as `self`.
    ///
    /// Integers widen to floats.
    #[must_use]
    pub fn accepts(self, actual: Self) -> bool {
        self == actual
            || matches!(
                (self, actual),
                (Self::Float, Self::Integer) | (Self::FloatArray, Self::IntegerArray)
            )
    }
}

/// Check that the attribute `key` holding `value` can be read as `expected`.
///
/// # Errors
/// Returns [`BackendError::AttributeTypeMismatch`] if the value has an incompatible type.
pub fn expect_type(key: &str, expected: AttributeType, value: Value) -> Result<Value, BackendError> {
    let actual = AttributeType::of(&value);
    if expected.accepts(actual) {
        Ok(value)
    } else {
        Err(BackendError::AttributeTypeMismatch {
            key: key.to_string(),
            expected,
            actual,
        })
    }
}

impl std::fmt::Display for AttributeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Null => "null",
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::String => "string",
            Self::IntegerArray => "integer[]",
            Self::FloatArray => "float[]",
            Self::Array => "array",
            Self::Object => "object",
        };
        f.write_str(name)
    }
}
