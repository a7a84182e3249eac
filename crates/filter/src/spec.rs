//! Serializable filter specs
//!
//! A [`FilterSpec`] is the plain-data form of a filter, tagged by `"_"`:
//!
//! ```json
//! {"_": "and", "operands": [
//!     {"_": "eq", "property": "kind", "value": "person"},
//!     {"_": "not", "operand": {"_": "gt", "property": "age", "value": 65}}
//! ]}
//! ```

use crate::filter::{Filter, FilterKind};
use crate::terminal::{Predicate, Terminal};
use serde::{Deserialize, Serialize};
use typegraph_core::{Error, Result, Value};

/// Plain-data representation of a [`Filter`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_", rename_all = "snake_case")]
pub enum FilterSpec {
    /// Matches everything
    True,
    /// Matches nothing
    False,
    /// All operands match
    And {
        /// Operands
        operands: Vec<FilterSpec>,
    },
    /// Any operand matches
    Or {
        /// Operands
        operands: Vec<FilterSpec>,
    },
    /// The operand does not match
    Not {
        /// Negated operand
        operand: Box<FilterSpec>,
    },
    /// property = value
    #[serde(rename = "eq")]
    Equal {
        /// Property name
        property: String,
        /// Compared value
        value: Value,
    },
    /// property is one of the values
    In {
        /// Property name
        property: String,
        /// Accepted values
        values: Vec<Value>,
    },
    /// property > value
    #[serde(rename = "gt")]
    Greater {
        /// Property name
        property: String,
        /// Exclusive lower bound
        value: Value,
    },
    /// property >= value
    #[serde(rename = "gte")]
    GreaterOrEqual {
        /// Property name
        property: String,
        /// Inclusive lower bound
        value: Value,
    },
    /// property < value
    #[serde(rename = "lt")]
    Less {
        /// Property name
        property: String,
        /// Exclusive upper bound
        value: Value,
    },
    /// property <= value
    #[serde(rename = "lte")]
    LessOrEqual {
        /// Property name
        property: String,
        /// Inclusive upper bound
        value: Value,
    },
    /// String pattern match
    Like {
        /// Property name
        property: String,
        /// Text to look for
        value: String,
        /// Text must appear at the start
        #[serde(default)]
        anchor_start: bool,
        /// Text must appear at the end
        #[serde(default)]
        anchor_end: bool,
        /// Compare case-insensitively
        #[serde(default)]
        ignore_case: bool,
    },
}

impl FilterSpec {
    /// Parse a JSON spec
    ///
    /// # Errors
    /// Returns `ArgumentInvalid` if the JSON is not a valid spec.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::argument_invalid("spec", e.to_string()))
    }

    /// Serialize to compact JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::argument_invalid("spec", e.to_string()))
    }
}

impl Filter {
    /// Plain-data form of this filter
    pub fn to_spec(&self) -> FilterSpec {
        let all = |ops: &[Filter]| -> Vec<FilterSpec> { ops.iter().map(Filter::to_spec).collect() };
        match self.kind() {
            FilterKind::True => FilterSpec::True,
            FilterKind::False => FilterSpec::False,
            FilterKind::And(ops) => FilterSpec::And { operands: all(ops) },
            FilterKind::Or(ops) => FilterSpec::Or { operands: all(ops) },
            FilterKind::Not(inner) => FilterSpec::Not {
                operand: Box::new(inner.to_spec()),
            },
            FilterKind::Terminal(terminal) => terminal_spec(terminal),
        }
    }

    /// Build and validate a filter from its plain-data form
    ///
    /// # Errors
    /// Returns the validation error of the first malformed terminal.
    pub fn from_spec(spec: &FilterSpec) -> Result<Filter> {
        let filter = build(spec);
        filter.validate()?;
        Ok(filter)
    }
}

fn terminal_spec(terminal: &Terminal) -> FilterSpec {
    let property = terminal.property().to_string();
    match terminal.predicate().clone() {
        Predicate::Equal(value) => FilterSpec::Equal { property, value },
        Predicate::In(values) => FilterSpec::In { property, values },
        Predicate::Greater(value) => FilterSpec::Greater { property, value },
        Predicate::GreaterOrEqual(value) => FilterSpec::GreaterOrEqual { property, value },
        Predicate::Less(value) => FilterSpec::Less { property, value },
        Predicate::LessOrEqual(value) => FilterSpec::LessOrEqual { property, value },
        Predicate::Like {
            value,
            anchor_start,
            anchor_end,
            ignore_case,
        } => FilterSpec::Like {
            property,
            value,
            anchor_start,
            anchor_end,
            ignore_case,
        },
    }
}

fn terminal(property: &str, predicate: Predicate) -> Filter {
    Filter::terminal(Terminal::new(property, predicate))
}

fn build(spec: &FilterSpec) -> Filter {
    match spec {
        FilterSpec::True => Filter::always(),
        FilterSpec::False => Filter::never(),
        FilterSpec::And { operands } => {
            Filter::from_kind(FilterKind::And(operands.iter().map(build).collect()))
        }
        FilterSpec::Or { operands } => {
            Filter::from_kind(FilterKind::Or(operands.iter().map(build).collect()))
        }
        FilterSpec::Not { operand } => Filter::from_kind(FilterKind::Not(build(operand))),
        FilterSpec::Equal { property, value } => terminal(property, Predicate::Equal(value.clone())),
        FilterSpec::In { property, values } => terminal(property, Predicate::In(values.clone())),
        FilterSpec::Greater { property, value } => {
            terminal(property, Predicate::Greater(value.clone()))
        }
        FilterSpec::GreaterOrEqual { property, value } => {
            terminal(property, Predicate::GreaterOrEqual(value.clone()))
        }
        FilterSpec::Less { property, value } => terminal(property, Predicate::Less(value.clone())),
        FilterSpec::LessOrEqual { property, value } => {
            terminal(property, Predicate::LessOrEqual(value.clone()))
        }
        FilterSpec::Like {
            property,
            value,
            anchor_start,
            anchor_end,
            ignore_case,
        } => terminal(
            property,
            Predicate::Like {
                value: value.clone(),
                anchor_start: *anchor_start,
                anchor_end: *anchor_end,
                ignore_case: *ignore_case,
            },
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_spec() {
        let spec = FilterSpec::from_json(
            r#"{"_": "and", "operands": [
                {"_": "eq", "property": "kind", "value": "person"},
                {"_": "not", "operand": {"_": "gt", "property": "age", "value": 65}}
            ]}"#,
        )
        .unwrap();
        let filter = Filter::from_spec(&spec).unwrap();
        assert_eq!(filter.to_string(), "(kind = \"person\" and not age > 65)");
    }

    #[test]
    fn test_spec_preserves_structure() {
        let filter = Filter::equal("a", 1)
            .or(&Filter::is_in("b", ["x", "y"]))
            .and(&Filter::like("c", "z").negate());
        let json = filter.to_spec().to_json().unwrap();
        let back = Filter::from_spec(&FilterSpec::from_json(&json).unwrap()).unwrap();
        assert_eq!(back, filter);
    }

    #[test]
    fn test_like_flags_default_to_false() {
        let spec = FilterSpec::from_json(r#"{"_": "like", "property": "name", "value": "Ad"}"#).unwrap();
        assert_eq!(
            spec,
            FilterSpec::Like {
                property: "name".to_string(),
                value: "Ad".to_string(),
                anchor_start: false,
                anchor_end: false,
                ignore_case: false,
            }
        );
    }

    #[test]
    fn test_from_spec_validates() {
        let spec = FilterSpec::Less {
            property: "age".to_string(),
            value: Value::Null,
        };
        assert!(matches!(
            Filter::from_spec(&spec),
            Err(Error::ArgumentInvalid { .. })
        ));
        assert!(matches!(
            FilterSpec::from_json(r#"{"_": "unknown"}"#),
            Err(Error::ArgumentInvalid { .. })
        ));
    }
}
