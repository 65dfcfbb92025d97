//! Error types for the alarm-rules crate.

use thiserror::Error;

use crate::filter::Operation;
use crate::types::ArgumentValueType;

/// Errors raised while validating or evaluating alarm rules.
///
/// Only [`RuleError::MissingValue`] is a transient data gap; every other
/// variant means the rule itself is malformed (see
/// [`RuleError::is_configuration_error`]).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuleError {
    /// Invalid alarm rule configuration.
    #[error("invalid alarm rule: {reason}")]
    InvalidRule {
        /// The reason the rule is invalid.
        reason: String,
    },

    /// A constant argument has no value configured.
    #[error("argument '{argument}' is a constant but has no default value")]
    MissingDefault {
        /// The argument id.
        argument: String,
    },

    /// The snapshot has no value for the argument's key and no default is set.
    #[error("no value for argument '{argument}' (key '{key}') and no default configured")]
    MissingValue {
        /// The argument id.
        argument: String,
        /// The attribute or time-series key that was looked up.
        key: String,
    },

    /// A value could not be coerced to the argument's declared type.
    #[error("argument '{argument}' declared {expected} but value '{actual}' cannot be coerced")]
    TypeMismatch {
        /// The argument id.
        argument: String,
        /// The declared value type.
        expected: ArgumentValueType,
        /// The offending value, rendered as text.
        actual: String,
    },

    /// A filter leaf references an argument id that is not defined.
    #[error("unknown argument '{argument}'")]
    UnknownArgument {
        /// The unresolved argument id.
        argument: String,
    },

    /// The operation is not defined for the operand type.
    #[error("operation {operation} is not supported for {value_type} operands")]
    UnsupportedOperation {
        /// The comparison operation.
        operation: Operation,
        /// The operand type.
        value_type: ArgumentValueType,
    },

    /// The two sides of a comparison resolved to different types.
    #[error("operation {operation} compares {left} with {right}")]
    IncompatibleOperands {
        /// The comparison operation.
        operation: Operation,
        /// Type of the left operand.
        left: ArgumentValueType,
        /// Type of the right operand.
        right: ArgumentValueType,
    },

    /// A complex filter has no children.
    #[error("complex filter has no conditions")]
    EmptyComplexFilter,

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl RuleError {
    /// Returns true if this error indicates a malformed rule rather than a
    /// gap in the entity's data.
    #[must_use]
    pub const fn is_configuration_error(&self) -> bool {
        !matches!(self, Self::MissingValue { .. } | Self::Serialization(_))
    }

    /// Returns true if this error is a transient data gap.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::MissingValue { .. })
    }
}

impl From<serde_json::Error> for RuleError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for rule operations.
pub type Result<T> = std::result::Result<T, RuleError>;
