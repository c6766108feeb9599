//! Predicates narrowing the initial load of an entity type.

pub mod pattern;

use crate::core::{CacheError, Result, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Anything a filter can read attribute values from.
pub trait FilterSubject {
    fn attribute(&self, name: &str) -> Option<&Value>;
}

/// A serializable predicate tree over attribute values.
///
/// Comparisons against NULL are false, as in SQL; use `IsNull` to match
/// unset attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    Eq(String, Value),
    Ne(String, Value),
    Lt(String, Value),
    Le(String, Value),
    Gt(String, Value),
    Ge(String, Value),
    IsNull(String),
    IsNotNull(String),
    In(String, Vec<Value>),
    Like {
        attribute: String,
        pattern: String,
        #[serde(default)]
        case_insensitive: bool,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn equals(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(attribute.into(), value.into())
    }

    pub fn gt(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Gt(attribute.into(), value.into())
    }

    pub fn lt(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Lt(attribute.into(), value.into())
    }

    pub fn like(attribute: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::Like {
            attribute: attribute.into(),
            pattern: pattern.into(),
            case_insensitive: false,
        }
    }

    pub fn and(self, other: Filter) -> Self {
        match self {
            Self::And(mut parts) => {
                parts.push(other);
                Self::And(parts)
            }
            first => Self::And(vec![first, other]),
        }
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Every attribute name the predicate reads.
    pub fn attributes(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_attributes(&mut names);
        names
    }

    fn collect_attributes<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Self::Eq(name, _)
            | Self::Ne(name, _)
            | Self::Lt(name, _)
            | Self::Le(name, _)
            | Self::Gt(name, _)
            | Self::Ge(name, _)
            | Self::IsNull(name)
            | Self::IsNotNull(name)
            | Self::In(name, _) => names.push(name),
            Self::Like { attribute, .. } => names.push(attribute),
            Self::And(parts) | Self::Or(parts) => {
                for part in parts {
                    part.collect_attributes(names);
                }
            }
            Self::Not(inner) => inner.collect_attributes(names),
        }
    }

    pub fn matches(&self, subject: &dyn FilterSubject) -> Result<bool> {
        match self {
            Self::Eq(name, value) => compare(subject, name, value, |o| o == Ordering::Equal),
            Self::Ne(name, value) => compare(subject, name, value, |o| o != Ordering::Equal),
            Self::Lt(name, value) => compare(subject, name, value, |o| o == Ordering::Less),
            Self::Le(name, value) => compare(subject, name, value, |o| o != Ordering::Greater),
            Self::Gt(name, value) => compare(subject, name, value, |o| o == Ordering::Greater),
            Self::Ge(name, value) => compare(subject, name, value, |o| o != Ordering::Less),
            Self::IsNull(name) => Ok(lookup(subject, name)?.is_null()),
            Self::IsNotNull(name) => Ok(!lookup(subject, name)?.is_null()),
            Self::In(name, list) => {
                for candidate in list {
                    if compare(subject, name, candidate, |o| o == Ordering::Equal)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Self::Like {
                attribute,
                pattern,
                case_insensitive,
            } => match lookup(subject, attribute)? {
                Value::Null => Ok(false),
                Value::Text(text) => pattern::eval_like(text, pattern, !case_insensitive),
                other => Err(CacheError::TypeMismatch(format!(
                    "LIKE requires TEXT, '{}' is {}",
                    attribute,
                    other.type_name()
                ))),
            },
            Self::And(parts) => {
                for part in parts {
                    if !part.matches(subject)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Or(parts) => {
                for part in parts {
                    if part.matches(subject)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Self::Not(inner) => Ok(!inner.matches(subject)?),
        }
    }
}

fn lookup<'a>(subject: &'a dyn FilterSubject, name: &str) -> Result<&'a Value> {
    subject
        .attribute(name)
        .ok_or_else(|| CacheError::Store(format!("filter reads unknown attribute '{}'", name)))
}

fn compare(
    subject: &dyn FilterSubject,
    name: &str,
    value: &Value,
    accept: impl Fn(Ordering) -> bool,
) -> Result<bool> {
    let current = lookup(subject, name)?;
    if current.is_null() || value.is_null() {
        return Ok(false);
    }
    Ok(accept(current.compare(value)?))
}
