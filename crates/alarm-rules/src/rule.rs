//! Alarm rules and their severity-ordered condition sets.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::entity::{AlarmTarget, EntityFilter, EntityInfo};
use crate::error::{Result, RuleError};
use crate::filter::ConditionFilter;
use crate::types::{AlarmRuleId, AlarmSeverity, ArgumentValueType, RuleArgument, TenantId};

/// Time unit of a duration condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DurationUnit {
    /// Seconds.
    Seconds,
    /// Minutes.
    Minutes,
    /// Hours.
    Hours,
    /// Days.
    Days,
}

impl DurationUnit {
    /// Converts `amount` of this unit to milliseconds, saturating on overflow.
    #[must_use]
    pub const fn to_millis(&self, amount: u64) -> u64 {
        let factor = match self {
            Self::Seconds => 1_000,
            Self::Minutes => 60_000,
            Self::Hours => 3_600_000,
            Self::Days => 86_400_000,
        };
        amount.saturating_mul(factor)
    }
}

/// When a matching filter actually counts as the condition being met.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionSpec {
    /// Met as soon as the filter matches.
    #[default]
    Simple,
    /// Met once the filter has matched continuously for longer than the
    /// amount held by argument `arg_id`.
    Duration {
        /// Unit of the threshold.
        unit: DurationUnit,
        /// Argument holding the threshold.
        arg_id: String,
    },
    /// Met once the filter has matched on at least the number of
    /// consecutive evaluations held by argument `arg_id`.
    Repeating {
        /// Argument holding the required count.
        arg_id: String,
    },
}

impl ConditionSpec {
    /// Returns the threshold argument id, if the spec has one.
    #[must_use]
    pub fn argument_id(&self) -> Option<&str> {
        match self {
            Self::Simple => None,
            Self::Duration { arg_id, .. } | Self::Repeating { arg_id } => Some(arg_id),
        }
    }
}

/// The conditions to create (or clear) an alarm at one severity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleCondition {
    /// Arguments by id.
    pub arguments: HashMap<String, RuleArgument>,
    /// Root of the filter tree.
    pub condition: ConditionFilter,
    /// How matches accumulate.
    #[serde(default)]
    pub spec: ConditionSpec,
}

impl RuleCondition {
    /// Creates a condition with no arguments yet.
    #[must_use]
    pub fn new(condition: ConditionFilter) -> Self {
        Self {
            arguments: HashMap::new(),
            condition,
            spec: ConditionSpec::Simple,
        }
    }

    /// Adds an argument under `id`.
    #[must_use]
    pub fn with_argument(mut self, id: impl Into<String>, argument: RuleArgument) -> Self {
        self.arguments.insert(id.into(), argument);
        self
    }

    /// Sets the condition spec.
    #[must_use]
    pub fn with_spec(mut self, spec: ConditionSpec) -> Self {
        self.spec = spec;
        self
    }

    /// Checks that the condition can be evaluated without configuration errors.
    ///
    /// # Errors
    ///
    /// Returns `RuleError::MissingDefault` for a constant without a value,
    /// `RuleError::UnknownArgument` for a leaf or spec id that is not in the
    /// argument map, `RuleError::EmptyComplexFilter` for an empty AND/OR,
    /// `RuleError::IncompatibleOperands` or `RuleError::UnsupportedOperation`
    /// for a comparison its declared argument types do not allow, and
    /// `RuleError::InvalidRule` for a non-numeric spec threshold.
    pub fn validate(&self) -> Result<()> {
        let mut ids: Vec<&String> = self.arguments.keys().collect();
        ids.sort();
        for id in ids {
            let argument = &self.arguments[id];
            if argument.is_constant() && argument.default_value.is_none() {
                return Err(RuleError::MissingDefault {
                    argument: id.clone(),
                });
            }
        }

        self.condition
            .validate(&|id: &str| self.arguments.get(id).map(|a| a.value_type))?;

        if let Some(arg_id) = self.spec.argument_id() {
            let argument = self
                .arguments
                .get(arg_id)
                .ok_or_else(|| RuleError::UnknownArgument {
                    argument: arg_id.to_string(),
                })?;
            if argument.value_type != ArgumentValueType::Numeric {
                return Err(RuleError::InvalidRule {
                    reason: format!("condition threshold '{arg_id}' must be NUMERIC"),
                });
            }
        }
        Ok(())
    }
}

/// Everything that decides when an alarm is raised and cleared.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlarmRuleConfiguration {
    /// Entities the rule applies to; empty means every entity.
    #[serde(default)]
    pub source_entity_filters: Vec<EntityFilter>,
    /// Create conditions by severity.
    pub create_rules: BTreeMap<AlarmSeverity, RuleCondition>,
    /// Explicit clear condition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clear_rule: Option<RuleCondition>,
    /// Where the alarm is raised.
    #[serde(default)]
    pub alarm_target: AlarmTarget,
}

impl AlarmRuleConfiguration {
    /// Iterates create conditions, most severe first.
    pub fn create_rules_by_severity(
        &self,
    ) -> impl Iterator<Item = (AlarmSeverity, &RuleCondition)> {
        self.create_rules.iter().rev().map(|(s, c)| (*s, c))
    }
}

/// A tenant-owned rule mapping entity conditions to alarm severities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmRule {
    /// Rule id.
    pub id: AlarmRuleId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Human-readable name.
    pub name: String,
    /// Alarm type raised by this rule; state is tracked per type.
    pub alarm_type: String,
    /// Conditions and targeting.
    pub configuration: AlarmRuleConfiguration,
    /// Disabled rules never act.
    pub enabled: bool,
}

impl AlarmRule {
    /// Maximum allowed length for rule names.
    pub const MAX_NAME_LENGTH: usize = 256;

    /// Creates a new alarm rule builder.
    pub fn builder(
        tenant_id: TenantId,
        name: impl Into<String>,
        alarm_type: impl Into<String>,
    ) -> AlarmRuleBuilder {
        AlarmRuleBuilder::new(tenant_id, name, alarm_type)
    }

    /// Returns true if the rule's source filters select `entity`.
    #[must_use]
    pub fn applies_to(&self, entity: &EntityInfo) -> bool {
        let filters = &self.configuration.source_entity_filters;
        filters.is_empty() || filters.iter().any(|f| f.matches(entity))
    }

    /// Validates the rule as the authoring surface would before saving it.
    ///
    /// # Errors
    ///
    /// Returns `RuleError::InvalidRule` if the name or alarm type is empty,
    /// the name is too long, or an enabled rule has no create conditions.
    /// Condition errors are returned as raised by [`RuleCondition::validate`].
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(RuleError::InvalidRule {
                reason: "rule name cannot be empty".to_string(),
            });
        }
        if self.name.len() > Self::MAX_NAME_LENGTH {
            return Err(RuleError::InvalidRule {
                reason: format!(
                    "rule name exceeds maximum length of {} characters",
                    Self::MAX_NAME_LENGTH
                ),
            });
        }
        if self.alarm_type.trim().is_empty() {
            return Err(RuleError::InvalidRule {
                reason: "alarm type cannot be empty".to_string(),
            });
        }
        self.validate_conditions()
    }

    /// Validates only the condition sets. The evaluator runs this on every
    /// call, so a corrected rule evaluates again without any reset.
    ///
    /// # Errors
    ///
    /// See [`AlarmRule::validate`].
    pub fn validate_conditions(&self) -> Result<()> {
        if self.enabled && self.configuration.create_rules.is_empty() {
            return Err(RuleError::InvalidRule {
                reason: "enabled rule must define at least one create condition".to_string(),
            });
        }
        for (_, condition) in self.configuration.create_rules_by_severity() {
            condition.validate()?;
        }
        if let Some(clear) = &self.configuration.clear_rule {
            clear.validate()?;
        }
        Ok(())
    }
}

/// Builder for creating [`AlarmRule`] instances.
#[derive(Debug)]
pub struct AlarmRuleBuilder {
    id: Option<AlarmRuleId>,
    tenant_id: TenantId,
    name: String,
    alarm_type: String,
    configuration: AlarmRuleConfiguration,
    enabled: bool,
}

impl AlarmRuleBuilder {
    fn new(tenant_id: TenantId, name: impl Into<String>, alarm_type: impl Into<String>) -> Self {
        Self {
            id: None,
            tenant_id,
            name: name.into(),
            alarm_type: alarm_type.into(),
            configuration: AlarmRuleConfiguration::default(),
            enabled: true,
        }
    }

    /// Uses a fixed id instead of a random one.
    #[must_use]
    pub const fn id(mut self, id: AlarmRuleId) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets the create condition for `severity`, replacing any existing one.
    #[must_use]
    pub fn create_rule(mut self, severity: AlarmSeverity, condition: RuleCondition) -> Self {
        self.configuration.create_rules.insert(severity, condition);
        self
    }

    /// Sets the clear condition.
    #[must_use]
    pub fn clear_rule(mut self, condition: RuleCondition) -> Self {
        self.configuration.clear_rule = Some(condition);
        self
    }

    /// Adds a source entity filter.
    #[must_use]
    pub fn entity_filter(mut self, filter: EntityFilter) -> Self {
        self.configuration.source_entity_filters.push(filter);
        self
    }

    /// Sets the alarm target.
    #[must_use]
    pub fn target(mut self, target: AlarmTarget) -> Self {
        self.configuration.alarm_target = target;
        self
    }

    /// Sets whether the rule is enabled.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Builds and validates the [`AlarmRule`].
    ///
    /// # Errors
    ///
    /// Returns the first error reported by [`AlarmRule::validate`].
    pub fn build(self) -> Result<AlarmRule> {
        let rule = AlarmRule {
            id: self.id.unwrap_or_default(),
            tenant_id: self.tenant_id,
            name: self.name,
            alarm_type: self.alarm_type,
            configuration: self.configuration,
            enabled: self.enabled,
        };
        rule.validate()?;
        Ok(rule)
    }

    /// Builds the [`AlarmRule`] without validating it.
    #[must_use]
    pub fn build_unchecked(self) -> AlarmRule {
        AlarmRule {
            id: self.id.unwrap_or_default(),
            tenant_id: self.tenant_id,
            name: self.name,
            alarm_type: self.alarm_type,
            configuration: self.configuration,
            enabled: self.enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Operation;
    use crate::types::EntityId;

    fn high_temperature() -> RuleCondition {
        RuleCondition::new(ConditionFilter::simple("t", Operation::Greater, "limit"))
            .with_argument(
                "t",
                RuleArgument::time_series("temperature", ArgumentValueType::Numeric),
            )
            .with_argument(
                "limit",
                RuleArgument::constant(ArgumentValueType::Numeric, 20.0),
            )
    }

    mod condition_tests {
        use super::*;

        #[test]
        fn valid_condition() {
            assert!(high_temperature().validate().is_ok());
        }

        #[test]
        fn unknown_leaf_argument() {
            let condition =
                RuleCondition::new(ConditionFilter::simple("t", Operation::Greater, "missing"))
                    .with_argument(
                        "t",
                        RuleArgument::time_series("temperature", ArgumentValueType::Numeric),
                    );
            assert_eq!(
                condition.validate(),
                Err(RuleError::UnknownArgument {
                    argument: "missing".to_string()
                })
            );
        }

        #[test]
        fn constant_without_default() {
            let condition = high_temperature().with_argument(
                "limit",
                RuleArgument::new(
                    crate::types::ArgumentKey::constant(""),
                    ArgumentValueType::Numeric,
                ),
            );
            assert_eq!(
                condition.validate(),
                Err(RuleError::MissingDefault {
                    argument: "limit".to_string()
                })
            );
        }

        #[test]
        fn spec_argument_must_exist() {
            let condition = high_temperature().with_spec(ConditionSpec::Repeating {
                arg_id: "count".to_string(),
            });
            assert_eq!(
                condition.validate(),
                Err(RuleError::UnknownArgument {
                    argument: "count".to_string()
                })
            );
        }

        #[test]
        fn spec_argument_must_be_numeric() {
            let condition = high_temperature()
                .with_argument(
                    "count",
                    RuleArgument::constant(ArgumentValueType::String, "three"),
                )
                .with_spec(ConditionSpec::Repeating {
                    arg_id: "count".to_string(),
                });
            assert!(matches!(
                condition.validate(),
                Err(RuleError::InvalidRule { .. })
            ));
        }

        #[test]
        fn operation_must_fit_declared_types() {
            let condition =
                RuleCondition::new(ConditionFilter::simple("flag", Operation::Greater, "on"))
                    .with_argument(
                        "flag",
                        RuleArgument::attribute("enabled", ArgumentValueType::Boolean),
                    )
                    .with_argument("on", RuleArgument::constant(ArgumentValueType::Boolean, true));
            assert_eq!(
                condition.validate(),
                Err(RuleError::UnsupportedOperation {
                    operation: Operation::Greater,
                    value_type: ArgumentValueType::Boolean
                })
            );
        }

        #[test]
        fn operands_must_declare_same_type() {
            let condition = high_temperature().with_argument(
                "limit",
                RuleArgument::constant(ArgumentValueType::String, "20"),
            );
            assert!(matches!(
                condition.validate(),
                Err(RuleError::IncompatibleOperands { .. })
            ));
        }

        #[test]
        fn duration_units() {
            assert_eq!(DurationUnit::Seconds.to_millis(5), 5_000);
            assert_eq!(DurationUnit::Minutes.to_millis(2), 120_000);
            assert_eq!(DurationUnit::Days.to_millis(1), 86_400_000);
            assert_eq!(DurationUnit::Hours.to_millis(u64::MAX), u64::MAX);
        }
    }

    mod builder_tests {
        use super::*;

        #[test]
        fn builder_creates_valid_rule() {
            let rule = AlarmRule::builder(TenantId::new(), "High temperature", "HighTemp")
                .create_rule(AlarmSeverity::Critical, high_temperature())
                .build()
                .unwrap();

            assert!(rule.enabled);
            assert_eq!(rule.alarm_type, "HighTemp");
            assert_eq!(rule.configuration.alarm_target, AlarmTarget::Originator);
        }

        #[test]
        fn builder_rejects_empty_name() {
            let result = AlarmRule::builder(TenantId::new(), "", "HighTemp")
                .create_rule(AlarmSeverity::Critical, high_temperature())
                .build();
            assert!(matches!(result, Err(RuleError::InvalidRule { .. })));
        }

        #[test]
        fn builder_rejects_long_name() {
            let long_name = "a".repeat(AlarmRule::MAX_NAME_LENGTH + 1);
            let result = AlarmRule::builder(TenantId::new(), long_name, "HighTemp")
                .create_rule(AlarmSeverity::Critical, high_temperature())
                .build();
            assert!(matches!(result, Err(RuleError::InvalidRule { .. })));
        }

        #[test]
        fn builder_rejects_empty_alarm_type() {
            let result = AlarmRule::builder(TenantId::new(), "rule", " ")
                .create_rule(AlarmSeverity::Critical, high_temperature())
                .build();
            assert!(matches!(result, Err(RuleError::InvalidRule { .. })));
        }

        #[test]
        fn enabled_rule_needs_create_conditions() {
            let result = AlarmRule::builder(TenantId::new(), "rule", "HighTemp").build();
            assert!(matches!(result, Err(RuleError::InvalidRule { .. })));

            let disabled = AlarmRule::builder(TenantId::new(), "rule", "HighTemp")
                .enabled(false)
                .build();
            assert!(disabled.is_ok());
        }

        #[test]
        fn builder_validates_clear_rule() {
            let clear = RuleCondition::new(ConditionFilter::and(vec![]));
            let result = AlarmRule::builder(TenantId::new(), "rule", "HighTemp")
                .create_rule(AlarmSeverity::Major, high_temperature())
                .clear_rule(clear)
                .build();
            assert_eq!(result, Err(RuleError::EmptyComplexFilter));
        }
    }

    mod configuration_tests {
        use super::*;

        #[test]
        fn create_rules_iterate_most_severe_first() {
            let rule = AlarmRule::builder(TenantId::new(), "rule", "HighTemp")
                .create_rule(AlarmSeverity::Warning, high_temperature())
                .create_rule(AlarmSeverity::Critical, high_temperature())
                .create_rule(AlarmSeverity::Major, high_temperature())
                .build()
                .unwrap();
            let order: Vec<_> = rule
                .configuration
                .create_rules_by_severity()
                .map(|(s, _)| s)
                .collect();
            assert_eq!(
                order,
                vec![
                    AlarmSeverity::Critical,
                    AlarmSeverity::Major,
                    AlarmSeverity::Warning
                ]
            );
        }

        #[test]
        fn applies_to_uses_filters() {
            let device = EntityInfo::device(EntityId::new(), "thermostat");
            let unfiltered = AlarmRule::builder(TenantId::new(), "rule", "HighTemp")
                .create_rule(AlarmSeverity::Critical, high_temperature())
                .build()
                .unwrap();
            assert!(unfiltered.applies_to(&device));

            let assets_only = AlarmRule::builder(TenantId::new(), "rule", "HighTemp")
                .create_rule(AlarmSeverity::Critical, high_temperature())
                .entity_filter(EntityFilter::AllAssets)
                .build()
                .unwrap();
            assert!(!assets_only.applies_to(&device));
        }

        #[test]
        fn rule_json_round_trip() {
            let rule = AlarmRule::builder(TenantId::new(), "rule", "HighTemp")
                .create_rule(AlarmSeverity::Critical, high_temperature())
                .clear_rule(high_temperature())
                .build()
                .unwrap();
            let json = serde_json::to_string(&rule).unwrap();
            assert!(json.contains("\"CRITICAL\""));
            let parsed: AlarmRule = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, rule);
        }
    }
}
