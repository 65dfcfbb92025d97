//! Boolean condition trees over rule arguments.
//!
//! A [`ConditionFilter`] is either a [`SimpleFilter`] comparing two arguments
//! by id, or a [`ComplexFilter`] combining children with AND/OR. Children are
//! evaluated strictly in declared order with short-circuiting, and argument
//! values are pulled on demand through [`ArgumentValues`], so a child that is
//! never reached never resolves its arguments.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, RuleError};
use crate::types::{ArgumentValueType, Value};

/// Comparison operations for simple filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    /// Equal (all types).
    Equal,
    /// Not equal (all types).
    NotEqual,
    /// Greater than (numeric only).
    Greater,
    /// Greater than or equal (numeric only).
    GreaterOrEqual,
    /// Less than (numeric only).
    Less,
    /// Less than or equal (numeric only).
    LessOrEqual,
    /// Left starts with right (string only).
    StartsWith,
    /// Left ends with right (string only).
    EndsWith,
    /// Left contains right (string only).
    Contains,
    /// Left does not contain right (string only).
    NotContains,
}

impl Operation {
    /// Returns the operation name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Equal => "EQUAL",
            Self::NotEqual => "NOT_EQUAL",
            Self::Greater => "GREATER",
            Self::GreaterOrEqual => "GREATER_OR_EQUAL",
            Self::Less => "LESS",
            Self::LessOrEqual => "LESS_OR_EQUAL",
            Self::StartsWith => "STARTS_WITH",
            Self::EndsWith => "ENDS_WITH",
            Self::Contains => "CONTAINS",
            Self::NotContains => "NOT_CONTAINS",
        }
    }

    /// Returns true if the operation is defined for operands of `value_type`.
    #[must_use]
    pub const fn supports(&self, value_type: ArgumentValueType) -> bool {
        match self {
            Self::Equal | Self::NotEqual => true,
            Self::Greater | Self::GreaterOrEqual | Self::Less | Self::LessOrEqual => {
                matches!(value_type, ArgumentValueType::Numeric)
            }
            Self::StartsWith | Self::EndsWith | Self::Contains | Self::NotContains => {
                matches!(value_type, ArgumentValueType::String)
            }
        }
    }

    /// Applies the operation to two resolved values.
    ///
    /// Numeric equality is exact; callers needing a tolerance express it as a
    /// separate range condition.
    ///
    /// # Errors
    ///
    /// Returns `RuleError::IncompatibleOperands` if the values have different
    /// types and `RuleError::UnsupportedOperation` if the operation is not
    /// defined for their type.
    #[allow(clippy::float_cmp)]
    pub fn apply(&self, left: &Value, right: &Value, ignore_case: bool) -> Result<bool> {
        let value_type = left.value_type();
        if value_type != right.value_type() {
            return Err(RuleError::IncompatibleOperands {
                operation: *self,
                left: value_type,
                right: right.value_type(),
            });
        }
        if !self.supports(value_type) {
            return Err(RuleError::UnsupportedOperation {
                operation: *self,
                value_type,
            });
        }

        let result = match (left, right) {
            (Value::Numeric(l), Value::Numeric(r)) => match self {
                Self::Equal => l == r,
                Self::NotEqual => l != r,
                Self::Greater => l > r,
                Self::GreaterOrEqual => l >= r,
                Self::Less => l < r,
                Self::LessOrEqual => l <= r,
                _ => false,
            },
            (Value::Boolean(l), Value::Boolean(r)) => match self {
                Self::Equal => l == r,
                _ => l != r,
            },
            (Value::String(l), Value::String(r)) => {
                let (l, r) = if ignore_case {
                    (l.to_lowercase(), r.to_lowercase())
                } else {
                    (l.clone(), r.clone())
                };
                match self {
                    Self::Equal => l == r,
                    Self::NotEqual => l != r,
                    Self::StartsWith => l.starts_with(&r),
                    Self::EndsWith => l.ends_with(&r),
                    Self::Contains => l.contains(&r),
                    _ => !l.contains(&r),
                }
            }
            _ => false,
        };
        Ok(result)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a complex filter combines its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplexOperation {
    /// All children must match.
    And,
    /// At least one child must match.
    Or,
}

/// A comparison between two arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleFilter {
    /// Id of the left-hand argument.
    pub left_arg_id: String,
    /// Id of the right-hand argument.
    pub right_arg_id: String,
    /// The comparison.
    pub operation: Operation,
    /// Compare strings case-insensitively.
    #[serde(default)]
    pub ignore_case: bool,
}

/// An ordered AND/OR of child filters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplexFilter {
    /// The combinator.
    pub operation: ComplexOperation,
    /// Children, evaluated in order.
    pub conditions: Vec<ConditionFilter>,
}

/// A boolean expression over rule arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionFilter {
    /// A binary comparison.
    Simple(SimpleFilter),
    /// A combination of filters.
    Complex(ComplexFilter),
}

/// Supplies resolved argument values to filter evaluation.
pub trait ArgumentValues {
    /// Returns the value of the argument with the given id.
    ///
    /// # Errors
    ///
    /// Returns `RuleError::UnknownArgument` if the id is not defined, or the
    /// resolution error for that argument.
    fn value(&mut self, arg_id: &str) -> Result<Value>;
}

impl ArgumentValues for HashMap<String, Value> {
    fn value(&mut self, arg_id: &str) -> Result<Value> {
        self.get(arg_id)
            .cloned()
            .ok_or_else(|| RuleError::UnknownArgument {
                argument: arg_id.to_string(),
            })
    }
}

impl ConditionFilter {
    /// Creates a simple comparison `left <operation> right`.
    pub fn simple(
        left_arg_id: impl Into<String>,
        operation: Operation,
        right_arg_id: impl Into<String>,
    ) -> Self {
        Self::Simple(SimpleFilter {
            left_arg_id: left_arg_id.into(),
            right_arg_id: right_arg_id.into(),
            operation,
            ignore_case: false,
        })
    }

    /// Creates a case-insensitive string comparison.
    pub fn simple_ignore_case(
        left_arg_id: impl Into<String>,
        operation: Operation,
        right_arg_id: impl Into<String>,
    ) -> Self {
        Self::Simple(SimpleFilter {
            left_arg_id: left_arg_id.into(),
            right_arg_id: right_arg_id.into(),
            operation,
            ignore_case: true,
        })
    }

    /// Creates an AND of the given filters.
    #[must_use]
    pub const fn and(conditions: Vec<Self>) -> Self {
        Self::Complex(ComplexFilter {
            operation: ComplexOperation::And,
            conditions,
        })
    }

    /// Creates an OR of the given filters.
    #[must_use]
    pub const fn or(conditions: Vec<Self>) -> Self {
        Self::Complex(ComplexFilter {
            operation: ComplexOperation::Or,
            conditions,
        })
    }

    /// Evaluates the filter.
    ///
    /// A leaf whose argument has no value in the snapshot (and no default)
    /// evaluates to `false`; every other resolution failure is returned.
    ///
    /// # Errors
    ///
    /// Returns `RuleError::EmptyComplexFilter` for a complex filter without
    /// children, and any configuration error raised by argument resolution
    /// or by the comparison itself.
    pub fn evaluate(&self, values: &mut impl ArgumentValues) -> Result<bool> {
        match self {
            Self::Simple(filter) => filter.evaluate(values),
            Self::Complex(filter) => {
                if filter.conditions.is_empty() {
                    return Err(RuleError::EmptyComplexFilter);
                }
                match filter.operation {
                    ComplexOperation::And => {
                        for child in &filter.conditions {
                            if !child.evaluate(values)? {
                                return Ok(false);
                            }
                        }
                        Ok(true)
                    }
                    ComplexOperation::Or => {
                        for child in &filter.conditions {
                            if child.evaluate(values)? {
                                return Ok(true);
                            }
                        }
                        Ok(false)
                    }
                }
            }
        }
    }

    /// Returns the ids of every argument referenced by a leaf.
    #[must_use]
    pub fn argument_ids(&self) -> BTreeSet<&str> {
        let mut ids = BTreeSet::new();
        self.collect_argument_ids(&mut ids);
        ids
    }

    fn collect_argument_ids<'a>(&'a self, ids: &mut BTreeSet<&'a str>) {
        match self {
            Self::Simple(filter) => {
                ids.insert(filter.left_arg_id.as_str());
                ids.insert(filter.right_arg_id.as_str());
            }
            Self::Complex(filter) => {
                for child in &filter.conditions {
                    child.collect_argument_ids(ids);
                }
            }
        }
    }

    /// Checks the tree's shape and operand types.
    ///
    /// `declared_type` returns the declared value type of an argument id, or
    /// `None` if the id is not defined. Both sides of every leaf must declare
    /// the same type and the operation must support it.
    ///
    /// # Errors
    ///
    /// Returns `RuleError::EmptyComplexFilter`, `RuleError::UnknownArgument`,
    /// `RuleError::IncompatibleOperands` or `RuleError::UnsupportedOperation`.
    pub fn validate(
        &self,
        declared_type: &impl Fn(&str) -> Option<ArgumentValueType>,
    ) -> Result<()> {
        match self {
            Self::Simple(filter) => filter.validate(declared_type),
            Self::Complex(filter) => {
                if filter.conditions.is_empty() {
                    return Err(RuleError::EmptyComplexFilter);
                }
                filter
                    .conditions
                    .iter()
                    .try_for_each(|child| child.validate(declared_type))
            }
        }
    }
}

impl SimpleFilter {
    fn validate(&self, declared_type: &impl Fn(&str) -> Option<ArgumentValueType>) -> Result<()> {
        let lookup = |id: &String| {
            declared_type(id.as_str()).ok_or_else(|| RuleError::UnknownArgument {
                argument: id.clone(),
            })
        };
        let left = lookup(&self.left_arg_id)?;
        let right = lookup(&self.right_arg_id)?;
        if left != right {
            return Err(RuleError::IncompatibleOperands {
                operation: self.operation,
                left,
                right,
            });
        }
        if !self.operation.supports(left) {
            return Err(RuleError::UnsupportedOperation {
                operation: self.operation,
                value_type: left,
            });
        }
        Ok(())
    }

    fn evaluate(&self, values: &mut impl ArgumentValues) -> Result<bool> {
        let Some(left) = Self::operand(values, &self.left_arg_id)? else {
            return Ok(false);
        };
        let Some(right) = Self::operand(values, &self.right_arg_id)? else {
            return Ok(false);
        };
        self.operation.apply(&left, &right, self.ignore_case)
    }

    fn operand(values: &mut impl ArgumentValues, arg_id: &str) -> Result<Option<Value>> {
        match values.value(arg_id) {
            Ok(value) => Ok(Some(value)),
            Err(RuleError::MissingValue { argument, key }) => {
                debug!(argument = %argument, key = %key, "no data for argument, leaf is false");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

impl fmt::Display for ConditionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simple(filter) => write!(
                f,
                "{} {} {}",
                filter.left_arg_id, filter.operation, filter.right_arg_id
            ),
            Self::Complex(filter) => {
                let sep = match filter.operation {
                    ComplexOperation::And => " AND ",
                    ComplexOperation::Or => " OR ",
                };
                write!(f, "(")?;
                for (i, child) in filter.conditions.iter().enumerate() {
                    if i > 0 {
                        write!(f, "{sep}")?;
                    }
                    write!(f, "{child}")?;
                }
                write!(f, ")")
            }
        }
    }
}
