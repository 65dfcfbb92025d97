//! Integration tests for the engine against in-memory collaborators.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration as StdDuration;

use alarm_engine::{
    AlarmEngine, EngineConfig, EngineError, InMemoryRuleRepository, InMemorySnapshotProvider,
    InMemoryStateStore, Result, RuleRepository, SnapshotProvider, StateStore, TransitionKind,
    start_harvest_task,
};
use alarm_rules::{
    AlarmRule, AlarmSeverity, ArgumentValueType, ConditionFilter, ConditionSpec, DurationUnit,
    EntityAlarmState, EntityId, EntityInfo, Operation, RuleArgument, RuleCondition, TenantId,
};
use chrono::{Duration, Utc};

/// Wraps a store and bumps the stored revision behind the engine's back
/// before the first `conflicts` saves.
#[derive(Debug)]
struct RacingStateStore {
    inner: InMemoryStateStore,
    conflicts: AtomicU32,
}

impl StateStore for RacingStateStore {
    fn load(&self, tenant_id: TenantId, entity_id: EntityId) -> Result<Option<EntityAlarmState>> {
        self.inner.load(tenant_id, entity_id)
    }

    fn create_if_absent(
        &self,
        tenant_id: TenantId,
        entity_id: EntityId,
    ) -> Result<EntityAlarmState> {
        self.inner.create_if_absent(tenant_id, entity_id)
    }

    fn save(&self, state: &EntityAlarmState) -> Result<EntityAlarmState> {
        if self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            let current = self
                .inner
                .create_if_absent(state.tenant_id, state.entity_id)?;
            self.inner.save(&current)?;
        }
        self.inner.save(state)
    }

    fn delete(&self, tenant_id: TenantId, entity_id: EntityId) -> Result<bool> {
        self.inner.delete(tenant_id, entity_id)
    }

    fn list_entities(&self) -> Result<Vec<(TenantId, EntityId)>> {
        self.inner.list_entities()
    }
}

struct World {
    tenant: TenantId,
    entity: EntityId,
    snapshots: Arc<InMemorySnapshotProvider>,
    rules: Arc<InMemoryRuleRepository>,
}

impl World {
    fn new() -> Self {
        let tenant = TenantId::new();
        let entity = EntityId::new();
        let rules = Arc::new(InMemoryRuleRepository::new());
        rules.register_entity(tenant, EntityInfo::device(entity, "thermostat"));
        Self {
            tenant,
            entity,
            snapshots: Arc::new(InMemorySnapshotProvider::new()),
            rules,
        }
    }

    fn engine(&self, config: EngineConfig, states: Arc<dyn StateStore>) -> AlarmEngine {
        AlarmEngine::new(
            config,
            Arc::clone(&self.snapshots) as Arc<dyn SnapshotProvider>,
            states,
            Arc::clone(&self.rules) as Arc<dyn RuleRepository>,
        )
        .unwrap()
    }

    fn above(&self, limit: f64) -> RuleCondition {
        RuleCondition::new(ConditionFilter::simple("t", Operation::Greater, "limit"))
            .with_argument(
                "t",
                RuleArgument::time_series("temperature", ArgumentValueType::Numeric),
            )
            .with_argument(
                "limit",
                RuleArgument::constant(ArgumentValueType::Numeric, limit),
            )
    }
}

#[test]
fn escalation_and_clear_flow() {
    let world = World::new();
    let rule = AlarmRule::builder(world.tenant, "Temperature", "HighTemperature")
        .create_rule(AlarmSeverity::Critical, world.above(50.0))
        .create_rule(AlarmSeverity::Warning, world.above(20.0))
        .build()
        .unwrap();
    world.rules.add_rule(rule).unwrap();
    let engine = world.engine(EngineConfig::default(), Arc::new(InMemoryStateStore::new()));
    let now = Utc::now();

    let mut kinds = Vec::new();
    for (secs, temperature) in [(0, 25.0), (1, 60.0), (2, 60.0), (3, 10.0)] {
        world.snapshots.record_time_series(
            world.tenant,
            world.entity,
            "temperature",
            temperature,
            now + Duration::seconds(secs),
        );
        let report = engine.process_entity(world.tenant, world.entity).unwrap();
        kinds.extend(report.transitions.into_iter().map(|t| t.kind));
    }

    assert_eq!(
        kinds,
        vec![
            TransitionKind::Created {
                severity: AlarmSeverity::Warning
            },
            TransitionKind::SeverityChanged {
                from: AlarmSeverity::Warning,
                to: AlarmSeverity::Critical
            },
            TransitionKind::Cleared {
                severity: AlarmSeverity::Critical
            },
        ]
    );
}

#[test]
fn save_conflicts_are_retried() {
    let world = World::new();
    world
        .rules
        .add_rule(
            AlarmRule::builder(world.tenant, "Temperature", "HighTemperature")
                .create_rule(AlarmSeverity::Major, world.above(20.0))
                .build()
                .unwrap(),
        )
        .unwrap();
    let states = Arc::new(RacingStateStore {
        inner: InMemoryStateStore::new(),
        conflicts: AtomicU32::new(2),
    });
    let engine = world.engine(EngineConfig::default(), states.clone());
    world
        .snapshots
        .record_time_series(world.tenant, world.entity, "temperature", 30.0, Utc::now());

    let report = engine.process_entity(world.tenant, world.entity).unwrap();

    assert_eq!(report.attempts, 3);
    assert!(report.state_saved);
    assert_eq!(report.transitions.len(), 1);
    let stored = states.load(world.tenant, world.entity).unwrap().unwrap();
    assert!(stored.status("HighTemperature").is_active());
}

#[test]
fn save_conflicts_give_up_after_retries() {
    let world = World::new();
    world
        .rules
        .add_rule(
            AlarmRule::builder(world.tenant, "Temperature", "HighTemperature")
                .create_rule(AlarmSeverity::Major, world.above(20.0))
                .build()
                .unwrap(),
        )
        .unwrap();
    let config = EngineConfig {
        max_save_retries: 1,
        ..EngineConfig::default()
    };
    let states = Arc::new(RacingStateStore {
        inner: InMemoryStateStore::new(),
        conflicts: AtomicU32::new(5),
    });
    let engine = world.engine(config, states);
    world
        .snapshots
        .record_time_series(world.tenant, world.entity, "temperature", 30.0, Utc::now());

    let result = engine.process_entity(world.tenant, world.entity);
    assert!(matches!(result, Err(EngineError::StateConflict { .. })));
}

#[test]
fn concurrent_processing_fires_once() {
    let world = World::new();
    world
        .rules
        .add_rule(
            AlarmRule::builder(world.tenant, "Temperature", "HighTemperature")
                .create_rule(AlarmSeverity::Major, world.above(20.0))
                .build()
                .unwrap(),
        )
        .unwrap();
    let engine = Arc::new(world.engine(
        EngineConfig::default(),
        Arc::new(InMemoryStateStore::new()),
    ));
    world
        .snapshots
        .record_time_series(world.tenant, world.entity, "temperature", 30.0, Utc::now());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let (tenant, entity) = (world.tenant, world.entity);
            std::thread::spawn(move || engine.process_entity(tenant, entity).unwrap())
        })
        .collect();
    let created: usize = handles
        .into_iter()
        .map(|h| h.join().unwrap().transitions.len())
        .sum();

    assert_eq!(created, 1);
}

#[test]
fn harvest_raises_duration_alarms_without_new_data() {
    let world = World::new();
    let held = world
        .above(20.0)
        .with_argument(
            "hold",
            RuleArgument::constant(ArgumentValueType::Numeric, 5.0),
        )
        .with_spec(ConditionSpec::Duration {
            unit: DurationUnit::Minutes,
            arg_id: "hold".to_string(),
        });
    world
        .rules
        .add_rule(
            AlarmRule::builder(world.tenant, "Sustained heat", "SustainedHeat")
                .create_rule(AlarmSeverity::Major, held)
                .build()
                .unwrap(),
        )
        .unwrap();
    let engine = world.engine(EngineConfig::default(), Arc::new(InMemoryStateStore::new()));
    let start = Utc::now();
    world
        .snapshots
        .record_time_series(world.tenant, world.entity, "temperature", 30.0, start);

    let first = engine.process_entity(world.tenant, world.entity).unwrap();
    assert!(first.transitions.is_empty());
    assert!(first.state_saved);

    let early = engine.harvest(start + Duration::minutes(3)).unwrap();
    assert_eq!(early.entities_evaluated, 1);
    assert_eq!(early.alarms_created, 0);

    let late = engine.harvest(start + Duration::minutes(6)).unwrap();
    assert_eq!(late.alarms_created, 1);
}

#[test]
fn harvest_does_not_count_repeats() {
    let world = World::new();
    let repeated = world
        .above(20.0)
        .with_argument(
            "count",
            RuleArgument::constant(ArgumentValueType::Numeric, 3.0),
        )
        .with_spec(ConditionSpec::Repeating {
            arg_id: "count".to_string(),
        });
    world
        .rules
        .add_rule(
            AlarmRule::builder(world.tenant, "Repeated heat", "RepeatedHeat")
                .create_rule(AlarmSeverity::Major, repeated)
                .build()
                .unwrap(),
        )
        .unwrap();
    let engine = world.engine(EngineConfig::default(), Arc::new(InMemoryStateStore::new()));
    let start = Utc::now();
    world
        .snapshots
        .record_time_series(world.tenant, world.entity, "temperature", 30.0, start);
    engine.process_entity(world.tenant, world.entity).unwrap();

    for minutes in [1, 2] {
        let summary = engine.harvest(start + Duration::minutes(minutes)).unwrap();
        assert_eq!(summary.entities_evaluated, 1);
        assert_eq!(summary.alarms_created, 0);
    }

    let second = engine.process_entity(world.tenant, world.entity).unwrap();
    assert!(second.transitions.is_empty());
    let third = engine.process_entity(world.tenant, world.entity).unwrap();
    assert_eq!(third.transitions.len(), 1);
}

#[test]
fn harvest_counts_failures() {
    let world = World::new();
    world
        .rules
        .add_rule(
            AlarmRule::builder(world.tenant, "Temperature", "HighTemperature")
                .create_rule(AlarmSeverity::Major, world.above(20.0))
                .build()
                .unwrap(),
        )
        .unwrap();
    let states = Arc::new(InMemoryStateStore::new());
    let engine = world.engine(EngineConfig::default(), states.clone());
    world
        .snapshots
        .record_time_series(world.tenant, world.entity, "temperature", 30.0, Utc::now());
    engine.process_entity(world.tenant, world.entity).unwrap();

    // A state row for an entity nobody registered.
    states.create_if_absent(world.tenant, EntityId::new()).unwrap();

    let summary = engine.harvest(Utc::now()).unwrap();
    assert_eq!(summary.entities_evaluated, 1);
    assert_eq!(summary.entities_failed, 1);
}

#[tokio::test]
async fn harvest_task_runs_engine() {
    let world = World::new();
    let held = world
        .above(20.0)
        .with_argument(
            "hold",
            RuleArgument::constant(ArgumentValueType::Numeric, 5.0),
        )
        .with_spec(ConditionSpec::Duration {
            unit: DurationUnit::Seconds,
            arg_id: "hold".to_string(),
        });
    world
        .rules
        .add_rule(
            AlarmRule::builder(world.tenant, "Any heat", "AnyHeat")
                .create_rule(AlarmSeverity::Minor, held)
                .build()
                .unwrap(),
        )
        .unwrap();
    let states = Arc::new(InMemoryStateStore::new());
    let config = EngineConfig {
        evaluation_interval_secs: 1,
        ..EngineConfig::default()
    };
    let engine = Arc::new(world.engine(config, states.clone()));
    world.snapshots.record_time_series(
        world.tenant,
        world.entity,
        "temperature",
        30.0,
        Utc::now() - Duration::seconds(10),
    );
    engine.process_entity(world.tenant, world.entity).unwrap();

    let handle = start_harvest_task(Arc::clone(&engine));
    let raised = tokio::time::timeout(StdDuration::from_secs(3), async {
        loop {
            let state = states.load(world.tenant, world.entity).unwrap();
            if state.is_some_and(|s| s.status("AnyHeat").is_active()) {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(20)).await;
        }
    })
    .await;
    handle.stop();

    assert!(raised.is_ok(), "harvest task never raised the alarm");
}
