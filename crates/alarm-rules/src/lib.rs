//! Alarm rule condition evaluation.
//!
//! `alarm-rules` decides when alarms on managed entities (devices, assets)
//! are raised, escalated, and cleared. Rules are declarative: typed
//! arguments read from constants, attributes, and time series feed boolean
//! condition trees, one per alarm severity, plus an optional clear condition.
//!
//! # Features
//!
//! - **Typed arguments**: constants, entity attributes, and latest time-series
//!   values, with defaults and customer/tenant attribute inheritance
//! - **Condition trees**: comparisons combined with short-circuit AND/OR
//! - **Severity escalation**: the most severe matching condition wins
//! - **Debounce**: repeating and duration conditions with persisted progress
//! - **Pure evaluation**: prior state in, next state out, no I/O
//!
//! # Example
//!
//! ```rust
//! use alarm_rules::{
//!     AlarmRule, AlarmSeverity, ArgumentValueType, ConditionFilter, DataSnapshot,
//!     EntityAlarmState, EntityId, EvaluationOutcome, Operation, RuleArgument,
//!     RuleCondition, RuleEvaluator, TenantId,
//! };
//! use chrono::Utc;
//!
//! let tenant = TenantId::new();
//! let entity = EntityId::new();
//!
//! // temperature > 20
//! let high_temperature =
//!     RuleCondition::new(ConditionFilter::simple("t", Operation::Greater, "limit"))
//!         .with_argument(
//!             "t",
//!             RuleArgument::time_series("temperature", ArgumentValueType::Numeric),
//!         )
//!         .with_argument(
//!             "limit",
//!             RuleArgument::constant(ArgumentValueType::Numeric, 20.0),
//!         );
//!
//! let rule = AlarmRule::builder(tenant, "High temperature", "HighTemperature")
//!     .create_rule(AlarmSeverity::Critical, high_temperature)
//!     .build()
//!     .unwrap();
//!
//! let snapshot = DataSnapshot::new(Utc::now()).with_time_series("temperature", 25.0);
//! let prior = EntityAlarmState::new(tenant, entity);
//!
//! let evaluation = RuleEvaluator::default().evaluate(&rule, entity, &snapshot, &prior);
//! assert_eq!(
//!     evaluation.outcome,
//!     EvaluationOutcome::CreateOrUpdate { severity: AlarmSeverity::Critical }
//! );
//!
//! // Persist `evaluation.state`; the same reading again changes nothing.
//! let again = RuleEvaluator::default().evaluate(&rule, entity, &snapshot, &evaluation.state);
//! assert_eq!(again.outcome, EvaluationOutcome::NoAction);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod entity;
pub mod error;
pub mod evaluator;
pub mod filter;
pub mod resolver;
pub mod rule;
pub mod state;
pub mod types;


// Re-export main types at crate root
pub use entity::{AlarmTarget, EntityFilter, EntityInfo, EntityKind};
pub use error::{Result, RuleError};
pub use evaluator::{
    BatchEvaluation, Evaluation, EvaluationOutcome, EvaluatorConfig, RuleEvaluator, RuleOutcome,
};
pub use filter::{
    ArgumentValues, ComplexFilter, ComplexOperation, ConditionFilter, Operation, SimpleFilter,
};
pub use resolver::{DataSnapshot, LazyArguments, resolve};
pub use rule::{
    AlarmRule, AlarmRuleBuilder, AlarmRuleConfiguration, ConditionSpec, DurationUnit,
    RuleCondition,
};
pub use state::{
    AlarmStateData, AlarmStatus, ConditionProgress, EntityAlarmState, RuleAlarmState,
    STATE_SCHEMA_VERSION,
};
pub use types::{
    AlarmRuleId, AlarmSeverity, ArgumentKey, ArgumentKeyType, ArgumentValueType, EntityId,
    RuleArgument, SourceType, TenantId, Value,
};
