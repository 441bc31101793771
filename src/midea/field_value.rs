use std::fmt;

/// A single reading attached to a [`Record`](crate::midea::Record).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Boolean(bool),
    Float(f64),
}

impl FieldValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Boolean(v) => Some(*v),
            FieldValue::Float(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Boolean(_) => None,
            FieldValue::Float(v) => Some(*v),
        }
    }
}

/// Renders booleans as `true`/`false` and floats as the shortest decimal that
/// parses back to the same value, without an exponent.
impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Boolean(v) => write!(f, "{v}"),
            FieldValue::Float(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Boolean(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}
