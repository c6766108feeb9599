use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use serde::{Deserialize, Serialize};
use crate::core::{CacheError, Result};

/// A single attribute or column value.
///
/// `Null` doubles as the "unset" state of an attribute. Equality and hashing
/// are strict (no Integer/Float cross-equality, floats compared bitwise) so
/// values can serve as index keys; SQL-style comparison lives in
/// [`Value::compare`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// SQL-style comparison used by filter predicates.
    pub fn compare(&self, other: &Value) -> Result<Ordering> {
        match (self, other) {
            // NULLs sort last
            (Value::Null, Value::Null) => Ok(Ordering::Equal),
            (Value::Null, _) => Ok(Ordering::Greater),
            (_, Value::Null) => Ok(Ordering::Less),

            (Value::Integer(a), Value::Integer(b)) => Ok(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => Ok(a.total_cmp(b)),
            (Value::Text(a), Value::Text(b)) => Ok(a.cmp(b)),
            (Value::Boolean(a), Value::Boolean(b)) => Ok(a.cmp(b)),

            (Value::Integer(a), Value::Float(b)) => Ok((*a as f64).total_cmp(b)),
            (Value::Float(a), Value::Integer(b)) => Ok(a.total_cmp(&(*b as f64))),

            _ => Err(CacheError::TypeMismatch(format!(
                "cannot compare {} with {}",
                self.type_name(),
                other.type_name()
            ))),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Integer(_) => "INTEGER",
            Self::Float(_) => "FLOAT",
            Self::Text(_) => "TEXT",
            Self::Boolean(_) => "BOOLEAN",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Approximate heap + inline footprint, used by the memory usage hook.
    pub fn estimated_bytes(&self) -> usize {
        let inline = std::mem::size_of::<Value>();
        match self {
            Self::Text(s) => inline + s.capacity(),
            _ => inline,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Boolean(_) => 1,
            Self::Integer(_) => 2,
            Self::Float(_) => 3,
            Self::Text(_) => 4,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Self::Null => {}
            Self::Integer(i) => i.hash(state),
            Self::Float(f) => f.to_bits().hash(state),
            Self::Text(s) => s.hash(state),
            Self::Boolean(b) => b.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(fl) => write!(f, "{}", fl),
            Self::Text(s) => write!(f, "{}", s),
            Self::Boolean(b) => write!(f, "{}", b),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Integer,
    Float,
    Text,
    Boolean,
}

impl DataType {
    pub fn is_compatible(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (Self::Integer, Value::Integer(_))
                | (Self::Float, Value::Float(_))
                | (Self::Text, Value::Text(_))
                | (Self::Boolean, Value::Boolean(_))
        )
    }

    /// Validates a value assigned to an attribute of this type.
    ///
    /// Only the lossless Integer -> Float widening is applied; anything else
    /// that is not already compatible is rejected.
    pub fn accept(&self, value: Value) -> Result<Value> {
        match (self, value) {
            (Self::Float, Value::Integer(i)) => Ok(Value::Float(i as f64)),
            (data_type, value) if data_type.is_compatible(&value) => Ok(value),
            (data_type, value) => Err(CacheError::TypeMismatch(format!(
                "expected {}, got {}",
                data_type,
                value.type_name()
            ))),
        }
    }

    /// Converts a value into this type, the way a store coerces values it
    /// receives for a column of this type.
    pub fn cast(&self, value: &Value) -> Result<Value> {
        if self.is_compatible(value) {
            return Ok(value.clone());
        }

        let cast = match (self, value) {
            (Self::Float, Value::Integer(i)) => Some(Value::Float(*i as f64)),
            (Self::Integer, Value::Float(f)) if f.fract() == 0.0 && f.is_finite() => {
                Some(Value::Integer(*f as i64))
            }
            (Self::Integer, Value::Boolean(b)) => Some(Value::Integer(i64::from(*b))),
            (Self::Integer, Value::Text(s)) => s.trim().parse::<i64>().ok().map(Value::Integer),
            (Self::Float, Value::Text(s)) => s.trim().parse::<f64>().ok().map(Value::Float),
            (Self::Boolean, Value::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "1" => Some(Value::Boolean(true)),
                "false" | "f" | "0" => Some(Value::Boolean(false)),
                _ => None,
            },
            (Self::Boolean, Value::Integer(i)) => Some(Value::Boolean(*i != 0)),
            (Self::Text, other) => Some(Value::Text(other.to_string())),
            _ => None,
        };

        cast.ok_or_else(|| {
            CacheError::TypeMismatch(format!(
                "Cannot convert {} value '{}' to {}",
                value.type_name(),
                value,
                self
            ))
        })
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer => write!(f, "INTEGER"),
            Self::Float => write!(f, "FLOAT"),
            Self::Text => write!(f, "TEXT"),
            Self::Boolean => write!(f, "BOOLEAN"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_value_equality_is_strict() {
        assert_eq!(Value::Integer(42), Value::Integer(42));
        assert_ne!(Value::Integer(1), Value::Float(1.0));
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
    }

    #[test]
    fn test_values_as_hash_keys() {
        let mut keys = HashSet::new();
        keys.insert(vec![Value::from("a"), Value::Null]);
        assert!(keys.contains(&vec![Value::Text("a".into()), Value::Null]));
        assert!(!keys.contains(&vec![Value::Text("a".into()), Value::Integer(0)]));
    }

    #[test]
    fn test_sql_compare() {
        assert_eq!(Value::Integer(1).compare(&Value::Float(1.5)).unwrap(), Ordering::Less);
        assert_eq!(Value::Null.compare(&Value::Integer(0)).unwrap(), Ordering::Greater);
        assert!(Value::Text("a".into()).compare(&Value::Integer(1)).is_err());
    }

    #[test]
    fn test_accept_widens_integer_only() {
        assert_eq!(DataType::Float.accept(Value::Integer(2)).unwrap(), Value::Float(2.0));
        assert_eq!(DataType::Text.accept(Value::Null).unwrap(), Value::Null);
        assert!(DataType::Integer.accept(Value::Text("2".into())).is_err());
    }

    #[test]
    fn test_cast() {
        assert_eq!(DataType::Text.cast(&Value::Integer(7)).unwrap(), Value::from("7"));
        assert_eq!(DataType::Integer.cast(&Value::from(" 12 ")).unwrap(), Value::Integer(12));
        assert_eq!(DataType::Boolean.cast(&Value::from("t")).unwrap(), Value::Boolean(true));
        assert!(matches!(
            DataType::Integer.cast(&Value::from("twelve")),
            Err(CacheError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_untagged_json() {
        let values: Vec<Value> = serde_json::from_str(r#"[null, true, 3, 2.5, "x"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::Boolean(true),
                Value::Integer(3),
                Value::Float(2.5),
                Value::from("x")
            ]
        );
    }
}
