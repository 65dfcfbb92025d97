//! Argument resolution against an entity data snapshot.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RuleError};
use crate::filter::ArgumentValues;
use crate::types::{ArgumentKeyType, RuleArgument, SourceType, Value};

/// The data available for one evaluation of one entity.
///
/// Supplied fresh per evaluation call and never mutated by the evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSnapshot {
    /// Attributes of the entity.
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
    /// Latest value of each time series of the entity.
    #[serde(default)]
    pub latest_time_series: HashMap<String, Value>,
    /// Attributes of the customer the entity belongs to.
    #[serde(default)]
    pub customer_attributes: HashMap<String, Value>,
    /// Attributes of the owning tenant.
    #[serde(default)]
    pub tenant_attributes: HashMap<String, Value>,
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
}

impl DataSnapshot {
    /// Creates an empty snapshot taken at `timestamp`.
    #[must_use]
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            attributes: HashMap::new(),
            latest_time_series: HashMap::new(),
            customer_attributes: HashMap::new(),
            tenant_attributes: HashMap::new(),
            timestamp,
        }
    }

    /// Adds an entity attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Adds a latest time-series value.
    #[must_use]
    pub fn with_time_series(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.latest_time_series.insert(name.into(), value.into());
        self
    }

    /// Adds a customer attribute.
    #[must_use]
    pub fn with_customer_attribute(
        mut self,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.customer_attributes.insert(name.into(), value.into());
        self
    }

    /// Adds a tenant attribute.
    #[must_use]
    pub fn with_tenant_attribute(
        mut self,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.tenant_attributes.insert(name.into(), value.into());
        self
    }

    fn lookup_attribute(&self, name: &str, source: SourceType, inherit: bool) -> Option<&Value> {
        match source {
            SourceType::CurrentEntity => self.attributes.get(name).or_else(|| {
                if inherit {
                    self.customer_attributes
                        .get(name)
                        .or_else(|| self.tenant_attributes.get(name))
                } else {
                    None
                }
            }),
            SourceType::CurrentCustomer => self.customer_attributes.get(name).or_else(|| {
                if inherit {
                    self.tenant_attributes.get(name)
                } else {
                    None
                }
            }),
            SourceType::CurrentTenant => self.tenant_attributes.get(name),
        }
    }
}

/// Resolves one argument to a value of its declared type.
///
/// Constants return their default. Attributes and time series are looked up
/// in the snapshot and fall back to the default when absent. Time series are
/// always read from the entity itself.
///
/// # Errors
///
/// - `RuleError::MissingDefault` for a constant without a default.
/// - `RuleError::MissingValue` when the snapshot has no entry and no default is set.
/// - `RuleError::TypeMismatch` when the value cannot be coerced to the declared type.
pub fn resolve(arg_id: &str, argument: &RuleArgument, snapshot: &DataSnapshot) -> Result<Value> {
    let found = match argument.key.key_type {
        ArgumentKeyType::Constant => {
            let value = argument
                .default_value
                .as_ref()
                .ok_or_else(|| RuleError::MissingDefault {
                    argument: arg_id.to_string(),
                })?;
            return coerce(arg_id, argument, value);
        }
        ArgumentKeyType::Attribute => snapshot.lookup_attribute(
            &argument.key.name,
            argument.source_type.unwrap_or_default(),
            argument.inherit,
        ),
        ArgumentKeyType::TimeSeries => snapshot.latest_time_series.get(&argument.key.name),
    };

    match found.or(argument.default_value.as_ref()) {
        Some(value) => coerce(arg_id, argument, value),
        None => Err(RuleError::MissingValue {
            argument: arg_id.to_string(),
            key: argument.key.name.clone(),
        }),
    }
}

fn coerce(arg_id: &str, argument: &RuleArgument, value: &Value) -> Result<Value> {
    value
        .coerce(argument.value_type)
        .ok_or_else(|| RuleError::TypeMismatch {
            argument: arg_id.to_string(),
            expected: argument.value_type,
            actual: value.to_string(),
        })
}

/// Resolves arguments on first access and remembers the result.
///
/// Filter evaluation pulls values through this, so arguments referenced only
/// by short-circuited branches are never resolved.
#[derive(Debug)]
pub struct LazyArguments<'a> {
    arguments: &'a HashMap<String, RuleArgument>,
    snapshot: &'a DataSnapshot,
    resolved: HashMap<String, Result<Value>>,
}

impl<'a> LazyArguments<'a> {
    /// Creates a resolver over `arguments`.
    #[must_use]
    pub fn new(arguments: &'a HashMap<String, RuleArgument>, snapshot: &'a DataSnapshot) -> Self {
        Self {
            arguments,
            snapshot,
            resolved: HashMap::new(),
        }
    }

    /// Returns the ids resolved so far.
    pub fn resolved_ids(&self) -> impl Iterator<Item = &str> {
        self.resolved.keys().map(String::as_str)
    }
}

impl ArgumentValues for LazyArguments<'_> {
    fn value(&mut self, arg_id: &str) -> Result<Value> {
        if let Some(cached) = self.resolved.get(arg_id) {
            return cached.clone();
        }
        let argument = self
            .arguments
            .get(arg_id)
            .ok_or_else(|| RuleError::UnknownArgument {
                argument: arg_id.to_string(),
            })?;
        let result = resolve(arg_id, argument, self.snapshot);
        self.resolved.insert(arg_id.to_string(), result.clone());
        result
    }
}
