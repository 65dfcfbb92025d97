//! Core value and key types for alarm rules.
//!
//! This module provides the fundamental types used throughout the alarm-rules crate:
//! - [`TenantId`], [`EntityId`], [`AlarmRuleId`]: identifiers
//! - [`AlarmSeverity`]: The ordered urgency of an alarm
//! - [`ArgumentValueType`] and [`Value`]: typed data
//! - [`ArgumentKey`]: Where an argument's value comes from
//! - [`RuleArgument`]: A named, typed input to a condition

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Returns the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Identifies the tenant that owns rules and entities.
    TenantId
);
uuid_id!(
    /// Identifies a managed entity (device, asset).
    EntityId
);
uuid_id!(
    /// Identifies an alarm rule.
    AlarmRuleId
);

/// The severity of an alarm.
///
/// Ordering follows [`AlarmSeverity::rank`], so `Critical > Major > Minor >
/// Warning > Indeterminate` regardless of declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmSeverity {
    /// Requires immediate attention.
    Critical,
    /// Serious, but not yet critical.
    Major,
    /// Should be looked at.
    Minor,
    /// Potential problem.
    Warning,
    /// Severity could not be determined.
    Indeterminate,
}

impl AlarmSeverity {
    /// All severities, most urgent first.
    pub const ALL: [Self; 5] = [
        Self::Critical,
        Self::Major,
        Self::Minor,
        Self::Warning,
        Self::Indeterminate,
    ];

    /// Returns the severity as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::Major => "MAJOR",
            Self::Minor => "MINOR",
            Self::Warning => "WARNING",
            Self::Indeterminate => "INDETERMINATE",
        }
    }

    /// Returns the rank of this severity (higher = more urgent).
    #[must_use]
    pub const fn rank(&self) -> u8 {
        match self {
            Self::Indeterminate => 1,
            Self::Warning => 2,
            Self::Minor => 3,
            Self::Major => 4,
            Self::Critical => 5,
        }
    }
}

impl Ord for AlarmSeverity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl PartialOrd for AlarmSeverity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for AlarmSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The declared type of an argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArgumentValueType {
    /// `true` / `false`.
    Boolean,
    /// Double-precision number.
    Numeric,
    /// Free text.
    String,
}

impl ArgumentValueType {
    /// Returns the type as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Boolean => "BOOLEAN",
            Self::Numeric => "NUMERIC",
            Self::String => "STRING",
        }
    }
}

impl fmt::Display for ArgumentValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A typed datum: an attribute, time-series point, constant, or resolved argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Boolean value.
    Boolean(bool),
    /// Numeric value.
    Numeric(f64),
    /// String value.
    String(String),
}

impl Value {
    /// Returns the native type of this value.
    #[must_use]
    pub const fn value_type(&self) -> ArgumentValueType {
        match self {
            Self::Boolean(_) => ArgumentValueType::Boolean,
            Self::Numeric(_) => ArgumentValueType::Numeric,
            Self::String(_) => ArgumentValueType::String,
        }
    }

    /// Returns the numeric value, if this is a number.
    #[must_use]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Numeric(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the boolean value, if this is a boolean.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the string value, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Converts this value to `target`, or returns `None` if it has no
    /// sensible representation in that type.
    ///
    /// Numbers accept booleans (1/0) and numeric strings; booleans accept
    /// numbers (`> 0`) and "true"/"false"; strings accept anything.
    #[must_use]
    pub fn coerce(&self, target: ArgumentValueType) -> Option<Self> {
        match (target, self) {
            (ArgumentValueType::Numeric, Self::Numeric(n)) => Some(Self::Numeric(*n)),
            (ArgumentValueType::Numeric, Self::Boolean(b)) => {
                Some(Self::Numeric(if *b { 1.0 } else { 0.0 }))
            }
            (ArgumentValueType::Numeric, Self::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(Self::Numeric),
            (ArgumentValueType::Boolean, Self::Boolean(b)) => Some(Self::Boolean(*b)),
            (ArgumentValueType::Boolean, Self::Numeric(n)) => Some(Self::Boolean(*n > 0.0)),
            (ArgumentValueType::Boolean, Self::String(s)) => {
                let s = s.trim();
                if s.eq_ignore_ascii_case("true") {
                    Some(Self::Boolean(true))
                } else if s.eq_ignore_ascii_case("false") {
                    Some(Self::Boolean(false))
                } else {
                    None
                }
            }
            (ArgumentValueType::String, Self::String(s)) => Some(Self::String(s.clone())),
            (ArgumentValueType::String, other) => Some(Self::String(other.to_string())),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Numeric(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Numeric(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Numeric(value as f64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

/// Where an argument's value is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArgumentKeyType {
    /// A fixed value taken from the argument's default.
    Constant,
    /// An attribute of the entity.
    Attribute,
    /// The latest value of a time series.
    TimeSeries,
}

/// Identifies the datum an argument reads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArgumentKey {
    /// The kind of source.
    pub key_type: ArgumentKeyType,
    /// The attribute or time-series name (ignored for constants).
    pub name: String,
}

impl ArgumentKey {
    /// Creates a constant key.
    pub fn constant(name: impl Into<String>) -> Self {
        Self {
            key_type: ArgumentKeyType::Constant,
            name: name.into(),
        }
    }

    /// Creates an attribute key.
    pub fn attribute(name: impl Into<String>) -> Self {
        Self {
            key_type: ArgumentKeyType::Attribute,
            name: name.into(),
        }
    }

    /// Creates a time-series key.
    pub fn time_series(name: impl Into<String>) -> Self {
        Self {
            key_type: ArgumentKeyType::TimeSeries,
            name: name.into(),
        }
    }
}

impl fmt::Display for ArgumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.key_type {
            ArgumentKeyType::Constant => write!(f, "constant:{}", self.name),
            ArgumentKeyType::Attribute => write!(f, "attribute:{}", self.name),
            ArgumentKeyType::TimeSeries => write!(f, "ts:{}", self.name),
        }
    }
}

/// Which owner's data an attribute argument is read from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceType {
    /// The entity being evaluated.
    #[default]
    CurrentEntity,
    /// The customer the entity is assigned to.
    CurrentCustomer,
    /// The tenant that owns the entity.
    CurrentTenant,
}

/// A named, typed input to a condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleArgument {
    /// Where the value comes from.
    pub key: ArgumentKey,
    /// The declared type.
    pub value_type: ArgumentValueType,
    /// Value used for constants, and when the snapshot has no entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    /// Owner of the data; `None` means the current entity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<SourceType>,
    /// Fall back to customer then tenant attributes when the source has no value.
    #[serde(default)]
    pub inherit: bool,
}

impl RuleArgument {
    /// Creates an argument reading `key`.
    #[must_use]
    pub const fn new(key: ArgumentKey, value_type: ArgumentValueType) -> Self {
        Self {
            key,
            value_type,
            default_value: None,
            source_type: None,
            inherit: false,
        }
    }

    /// Creates a constant argument with the given value.
    pub fn constant(value_type: ArgumentValueType, value: impl Into<Value>) -> Self {
        Self::new(ArgumentKey::constant(""), value_type).with_default(value)
    }

    /// Creates an attribute argument.
    pub fn attribute(name: impl Into<String>, value_type: ArgumentValueType) -> Self {
        Self::new(ArgumentKey::attribute(name), value_type)
    }

    /// Creates a time-series argument.
    pub fn time_series(name: impl Into<String>, value_type: ArgumentValueType) -> Self {
        Self::new(ArgumentKey::time_series(name), value_type)
    }

    /// Sets the default value.
    #[must_use]
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Sets the source type.
    #[must_use]
    pub const fn with_source(mut self, source_type: SourceType) -> Self {
        self.source_type = Some(source_type);
        self
    }

    /// Enables inheritance from customer and tenant attributes.
    #[must_use]
    pub const fn inherited(mut self) -> Self {
        self.inherit = true;
        self
    }

    /// Returns true if this argument never consults the snapshot.
    #[must_use]
    pub const fn is_constant(&self) -> bool {
        matches!(self.key.key_type, ArgumentKeyType::Constant)
    }
}
