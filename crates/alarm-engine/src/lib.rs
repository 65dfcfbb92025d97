//! Per-entity alarm evaluation engine.
//!
//! `alarm-engine` drives the pure evaluator from `alarm-rules` against live
//! collaborators: a snapshot provider for entity data, a state store for the
//! per-entity alarm state, and a rule repository.
//!
//! # Features
//!
//! - **Serialized evaluation**: one evaluation per (tenant, entity) at a time
//! - **Optimistic persistence**: compare-and-swap saves, re-evaluated on conflict
//! - **Quiet failures**: a misconfigured rule is reported once, not every tick
//! - **Harvest**: periodic re-evaluation so duration conditions fire without new data
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use alarm_engine::{
//!     AlarmEngine, EngineConfig, InMemoryRuleRepository, InMemorySnapshotProvider,
//!     InMemoryStateStore, TransitionKind,
//! };
//! use alarm_rules::{
//!     AlarmRule, AlarmSeverity, ArgumentValueType, ConditionFilter, EntityId, EntityInfo,
//!     Operation, RuleArgument, RuleCondition, TenantId,
//! };
//! use chrono::Utc;
//!
//! let tenant = TenantId::new();
//! let entity = EntityId::new();
//!
//! let snapshots = Arc::new(InMemorySnapshotProvider::new());
//! let rules = Arc::new(InMemoryRuleRepository::new());
//! rules.register_entity(tenant, EntityInfo::device(entity, "thermostat"));
//!
//! let condition = RuleCondition::new(ConditionFilter::simple("t", Operation::Greater, "limit"))
//!     .with_argument("t", RuleArgument::time_series("temperature", ArgumentValueType::Numeric))
//!     .with_argument("limit", RuleArgument::constant(ArgumentValueType::Numeric, 20.0));
//! let rule = AlarmRule::builder(tenant, "High temperature", "HighTemperature")
//!     .create_rule(AlarmSeverity::Critical, condition)
//!     .build()
//!     .unwrap();
//! rules.add_rule(rule).unwrap();
//!
//! let engine = AlarmEngine::new(
//!     EngineConfig::default(),
//!     snapshots.clone(),
//!     Arc::new(InMemoryStateStore::new()),
//!     rules,
//! )
//! .unwrap();
//!
//! snapshots.record_time_series(tenant, entity, "temperature", 25.0, Utc::now());
//! let report = engine.process_entity(tenant, entity).unwrap();
//! assert_eq!(
//!     report.transitions[0].kind,
//!     TransitionKind::Created { severity: AlarmSeverity::Critical }
//! );
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod engine;
pub mod error;
pub mod harvester;
pub mod memory;
pub mod traits;

// Re-export main types at crate root
pub use config::EngineConfig;
pub use engine::{AlarmEngine, AlarmTransition, EntityReport, HarvestSummary, TransitionKind};
pub use error::{EngineError, Result};
pub use harvester::{HarvestHandle, start_harvest_task};
pub use memory::{InMemoryRuleRepository, InMemorySnapshotProvider, InMemoryStateStore};
pub use traits::{RuleRepository, SnapshotProvider, StateStore};
