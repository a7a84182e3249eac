//! Terminal predicates
//!
//! A terminal is a leaf of a filter tree: one predicate over one property.
//! Properties absent from an element read as `Null`.
//!
//! ## Type Rules
//!
//! - Equality never coerces: `Int(1)` does not equal `Float(1.0)`
//! - Comparisons only hold between values of the same type
//! - `Like` only matches string values

use std::cmp::Ordering;
use std::fmt;
use typegraph_core::{Error, Result, Value};

/// Predicate applied to a property value
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// property = value
    Equal(Value),
    /// property is one of the values
    In(Vec<Value>),
    /// property > value
    Greater(Value),
    /// property >= value
    GreaterOrEqual(Value),
    /// property < value
    Less(Value),
    /// property <= value
    LessOrEqual(Value),
    /// String pattern match
    Like {
        /// Text to look for
        value: String,
        /// Text must appear at the start
        anchor_start: bool,
        /// Text must appear at the end
        anchor_end: bool,
        /// Compare case-insensitively
        ignore_case: bool,
    },
}

impl Predicate {
    /// Short operator name, used in content keys and specs
    pub fn op_name(&self) -> &'static str {
        match self {
            Predicate::Equal(_) => "eq",
            Predicate::In(_) => "in",
            Predicate::Greater(_) => "gt",
            Predicate::GreaterOrEqual(_) => "gte",
            Predicate::Less(_) => "lt",
            Predicate::LessOrEqual(_) => "lte",
            Predicate::Like { .. } => "like",
        }
    }

    /// Returns true if this is an equality predicate
    pub fn is_equality(&self) -> bool {
        matches!(self, Predicate::Equal(_))
    }
}

/// A predicate over one property
#[derive(Debug, Clone, PartialEq)]
pub struct Terminal {
    property: String,
    predicate: Predicate,
}

impl Terminal {
    /// Create a terminal
    pub fn new(property: impl Into<String>, predicate: Predicate) -> Self {
        Self {
            property: property.into(),
            predicate,
        }
    }

    /// property = value
    pub fn equal(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(property, Predicate::Equal(value.into()))
    }

    /// property is one of `values`
    pub fn is_in<V: Into<Value>>(property: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self::new(property, Predicate::In(values.into_iter().map(Into::into).collect()))
    }

    /// Unanchored, case-sensitive substring match
    pub fn like(property: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(
            property,
            Predicate::Like {
                value: value.into(),
                anchor_start: false,
                anchor_end: false,
                ignore_case: false,
            },
        )
    }

    /// Property the predicate reads
    pub fn property(&self) -> &str {
        &self.property
    }

    /// The predicate
    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    /// The compared value, for equality
    pub fn equality_value(&self) -> Option<&Value> {
        match &self.predicate {
            Predicate::Equal(value) => Some(value),
            _ => None,
        }
    }

    /// Check the terminal is well-formed
    ///
    /// # Errors
    /// - `ArgumentRequired` if the property name is empty
    /// - `ArgumentInvalid` if an ordering predicate compares against `Null`
    ///   or `NaN`
    pub fn validate(&self) -> Result<()> {
        if self.property.is_empty() {
            return Err(Error::ArgumentRequired("property".to_string()));
        }
        match &self.predicate {
            Predicate::Greater(bound)
            | Predicate::GreaterOrEqual(bound)
            | Predicate::Less(bound)
            | Predicate::LessOrEqual(bound) => {
                if bound.is_null() || bound.as_float().is_some_and(f64::is_nan) {
                    return Err(Error::argument_invalid(
                        "value",
                        format!("{} on '{}' needs an ordered value, got {}", self.predicate.op_name(), self.property, bound),
                    ));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Whether `actual` satisfies the predicate
    pub fn matches(&self, actual: &Value) -> bool {
        match &self.predicate {
            Predicate::Equal(expected) => actual == expected,
            Predicate::In(values) => values.iter().any(|v| v == actual),
            Predicate::Greater(bound) => actual.compare(bound) == Some(Ordering::Greater),
            Predicate::GreaterOrEqual(bound) => {
                matches!(actual.compare(bound), Some(Ordering::Greater | Ordering::Equal))
            }
            Predicate::Less(bound) => actual.compare(bound) == Some(Ordering::Less),
            Predicate::LessOrEqual(bound) => {
                matches!(actual.compare(bound), Some(Ordering::Less | Ordering::Equal))
            }
            Predicate::Like {
                value,
                anchor_start,
                anchor_end,
                ignore_case,
            } => {
                let Some(text) = actual.as_str() else {
                    return false;
                };
                let (text, pattern) = if *ignore_case {
                    (text.to_lowercase(), value.to_lowercase())
                } else {
                    (text.to_string(), value.clone())
                };
                match (anchor_start, anchor_end) {
                    (true, true) => text == pattern,
                    (true, false) => text.starts_with(&pattern),
                    (false, true) => text.ends_with(&pattern),
                    (false, false) => text.contains(&pattern),
                }
            }
        }
    }

    /// Canonical key: equal terminals have equal keys
    pub fn content_key(&self) -> String {
        let operand = match &self.predicate {
            Predicate::Equal(v)
            | Predicate::Greater(v)
            | Predicate::GreaterOrEqual(v)
            | Predicate::Less(v)
            | Predicate::LessOrEqual(v) => v.content_key(),
            Predicate::In(values) => {
                let mut keys: Vec<String> = values.iter().map(Value::content_key).collect();
                keys.sort();
                keys.dedup();
                format!("[{}]", keys.join(","))
            }
            Predicate::Like {
                value,
                anchor_start,
                anchor_end,
                ignore_case,
            } => format!(
                "{}{:?}{}{}",
                if *anchor_start { "^" } else { "" },
                value,
                if *anchor_end { "$" } else { "" },
                if *ignore_case { "i" } else { "" }
            ),
        };
        format!("{}:{:?}:{}", self.predicate.op_name(), self.property, operand)
    }
}

impl fmt::Display for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.predicate {
            Predicate::Equal(v) => write!(f, "{} = {}", self.property, v),
            Predicate::In(values) => {
                let items: Vec<String> = values.iter().map(ToString::to_string).collect();
                write!(f, "{} in [{}]", self.property, items.join(", "))
            }
            Predicate::Greater(v) => write!(f, "{} > {}", self.property, v),
            Predicate::GreaterOrEqual(v) => write!(f, "{} >= {}", self.property, v),
            Predicate::Less(v) => write!(f, "{} < {}", self.property, v),
            Predicate::LessOrEqual(v) => write!(f, "{} <= {}", self.property, v),
            Predicate::Like {
                value,
                anchor_start,
                anchor_end,
                ignore_case,
            } => write!(
                f,
                "{} like {}{:?}{}{}",
                self.property,
                if *anchor_start { "^" } else { "" },
                value,
                if *anchor_end { "$" } else { "" },
                if *ignore_case { " (ignore case)" } else { "" }
            ),
        }
    }
}
