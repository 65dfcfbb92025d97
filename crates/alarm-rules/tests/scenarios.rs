//! End-to-end evaluation scenarios.

use alarm_rules::{
    AlarmRule, AlarmSeverity, AlarmStatus, ArgumentKey, ArgumentValueType, ConditionFilter,
    DataSnapshot, EntityAlarmState, EntityId, EvaluationOutcome, Operation, RuleArgument,
    RuleCondition, RuleError, RuleEvaluator, TenantId,
};
use chrono::{Duration, Utc};

fn temperature_condition() -> RuleCondition {
    RuleCondition::new(ConditionFilter::and(vec![
        ConditionFilter::simple("temperatureKey", Operation::Greater, "temperatureConst"),
        ConditionFilter::simple("alarmEnabledKey", Operation::Equal, "alarmEnabledConst"),
    ]))
    .with_argument(
        "temperatureKey",
        RuleArgument::time_series("temperature", ArgumentValueType::Numeric),
    )
    .with_argument(
        "temperatureConst",
        RuleArgument::constant(ArgumentValueType::Numeric, 20.0),
    )
    .with_argument(
        "alarmEnabledKey",
        RuleArgument::attribute("alarmEnabled", ArgumentValueType::Boolean),
    )
    .with_argument(
        "alarmEnabledConst",
        RuleArgument::constant(ArgumentValueType::Boolean, true),
    )
}

fn snapshot(temperature: f64) -> DataSnapshot {
    DataSnapshot::new(Utc::now())
        .with_time_series("temperature", temperature)
        .with_attribute("alarmEnabled", true)
}

#[test]
fn high_temperature_raises_critical() {
    let tenant = TenantId::new();
    let entity = EntityId::new();
    let rule = AlarmRule::builder(tenant, "High temperature", "HighTemperature")
        .create_rule(AlarmSeverity::Critical, temperature_condition())
        .build()
        .unwrap();

    let eval = RuleEvaluator::default().evaluate(
        &rule,
        entity,
        &snapshot(25.0),
        &EntityAlarmState::new(tenant, entity),
    );

    assert_eq!(
        eval.outcome,
        EvaluationOutcome::CreateOrUpdate {
            severity: AlarmSeverity::Critical
        }
    );
    assert_eq!(
        eval.state.status("HighTemperature"),
        AlarmStatus::Active {
            severity: AlarmSeverity::Critical
        }
    );
}

#[test]
fn normal_temperature_clears_active_alarm() {
    let tenant = TenantId::new();
    let entity = EntityId::new();
    let rule = AlarmRule::builder(tenant, "High temperature", "HighTemperature")
        .create_rule(AlarmSeverity::Critical, temperature_condition())
        .build()
        .unwrap();
    let evaluator = RuleEvaluator::default();

    let raised = evaluator.evaluate(
        &rule,
        entity,
        &snapshot(25.0),
        &EntityAlarmState::new(tenant, entity),
    );
    let cleared = evaluator.evaluate(&rule, entity, &snapshot(15.0), &raised.state);

    assert_eq!(cleared.outcome, EvaluationOutcome::Clear);
    assert_eq!(cleared.state.status("HighTemperature"), AlarmStatus::Inactive);
}

#[test]
fn constant_without_default_is_configuration_error() {
    let tenant = TenantId::new();
    let entity = EntityId::new();
    let condition = temperature_condition().with_argument(
        "temperatureConst",
        RuleArgument::new(ArgumentKey::constant(""), ArgumentValueType::Numeric),
    );
    let rule = AlarmRule::builder(tenant, "High temperature", "HighTemperature")
        .create_rule(AlarmSeverity::Critical, condition)
        .build_unchecked();
    let evaluator = RuleEvaluator::default();

    for snap in [snapshot(25.0), snapshot(15.0), DataSnapshot::new(Utc::now())] {
        let eval = evaluator.evaluate(&rule, entity, &snap, &EntityAlarmState::new(tenant, entity));
        assert_eq!(
            eval.outcome,
            EvaluationOutcome::ConfigurationError(RuleError::MissingDefault {
                argument: "temperatureConst".to_string()
            })
        );
    }
}

#[test]
fn repeated_match_does_not_fire_twice() {
    let tenant = TenantId::new();
    let entity = EntityId::new();
    let rule = AlarmRule::builder(tenant, "High temperature", "HighTemperature")
        .create_rule(AlarmSeverity::Critical, temperature_condition())
        .build()
        .unwrap();
    let evaluator = RuleEvaluator::default();
    let snap = snapshot(25.0);

    let first = evaluator.evaluate(&rule, entity, &snap, &EntityAlarmState::new(tenant, entity));
    let second = evaluator.evaluate(&rule, entity, &snap, &first.state);

    assert!(first.outcome.is_transition());
    assert_eq!(second.outcome, EvaluationOutcome::NoAction);
    assert!(!second.state_changed);
}

#[test]
fn alarm_holds_until_clear_rule_matches() {
    let tenant = TenantId::new();
    let entity = EntityId::new();
    let clear = RuleCondition::new(ConditionFilter::simple(
        "temperatureKey",
        Operation::LessOrEqual,
        "clearBelow",
    ))
    .with_argument(
        "temperatureKey",
        RuleArgument::time_series("temperature", ArgumentValueType::Numeric),
    )
    .with_argument(
        "clearBelow",
        RuleArgument::constant(ArgumentValueType::Numeric, 10.0),
    );
    let rule = AlarmRule::builder(tenant, "High temperature", "HighTemperature")
        .create_rule(AlarmSeverity::Critical, temperature_condition())
        .clear_rule(clear)
        .build()
        .unwrap();
    let evaluator = RuleEvaluator::default();

    let raised = evaluator.evaluate(
        &rule,
        entity,
        &snapshot(25.0),
        &EntityAlarmState::new(tenant, entity),
    );
    let held = evaluator.evaluate(&rule, entity, &snapshot(15.0), &raised.state);
    assert_eq!(held.outcome, EvaluationOutcome::NoAction);
    assert!(held.state.status("HighTemperature").is_active());

    let cleared = evaluator.evaluate(&rule, entity, &snapshot(5.0), &held.state);
    assert_eq!(cleared.outcome, EvaluationOutcome::Clear);
}

#[test]
fn persisted_state_reproduces_decisions() {
    let tenant = TenantId::new();
    let entity = EntityId::new();
    let rule = AlarmRule::builder(tenant, "High temperature", "HighTemperature")
        .create_rule(AlarmSeverity::Critical, temperature_condition())
        .build()
        .unwrap();
    let evaluator = RuleEvaluator::default();
    let snap = snapshot(25.0);

    let first = evaluator.evaluate(&rule, entity, &snap, &EntityAlarmState::new(tenant, entity));
    let stored = first.state.to_json().unwrap();
    let reloaded = EntityAlarmState::from_json(&stored).unwrap();
    assert_eq!(reloaded, first.state);

    let from_memory = evaluator.evaluate(&rule, entity, &snap, &first.state);
    let from_storage = evaluator.evaluate(&rule, entity, &snap, &reloaded);
    assert_eq!(from_memory, from_storage);
}

#[test]
fn rules_authored_as_json_evaluate() {
    let tenant = TenantId::new();
    let entity = EntityId::new();
    let json = format!(
        r#"{{
            "id": "{id}",
            "tenant_id": "{tenant}",
            "name": "Door open",
            "alarm_type": "DoorOpen",
            "enabled": true,
            "configuration": {{
                "create_rules": {{
                    "MAJOR": {{
                        "arguments": {{
                            "door": {{
                                "key": {{"key_type": "ATTRIBUTE", "name": "doorState"}},
                                "value_type": "STRING"
                            }},
                            "open": {{
                                "key": {{"key_type": "CONSTANT", "name": ""}},
                                "value_type": "STRING",
                                "default_value": "open"
                            }},
                            "hold": {{
                                "key": {{"key_type": "CONSTANT", "name": ""}},
                                "value_type": "NUMERIC",
                                "default_value": 2
                            }}
                        }},
                        "condition": {{
                            "type": "SIMPLE",
                            "left_arg_id": "door",
                            "right_arg_id": "open",
                            "operation": "EQUAL",
                            "ignore_case": true
                        }},
                        "spec": {{"type": "DURATION", "unit": "MINUTES", "arg_id": "hold"}}
                    }}
                }}
            }}
        }}"#,
        id = uuid::Uuid::new_v4(),
    );
    let rule: AlarmRule = serde_json::from_str(&json).unwrap();
    rule.validate().unwrap();

    let evaluator = RuleEvaluator::default();
    let start = Utc::now();
    let reading = |minutes: i64| {
        DataSnapshot::new(start + Duration::minutes(minutes)).with_attribute("doorState", "OPEN")
    };

    let mut state = EntityAlarmState::new(tenant, entity);
    for minutes in [0, 1, 2] {
        let eval = evaluator.evaluate(&rule, entity, &reading(minutes), &state);
        assert_eq!(eval.outcome, EvaluationOutcome::NoAction);
        state = eval.state;
    }
    let eval = evaluator.evaluate(&rule, entity, &reading(3), &state);
    assert_eq!(
        eval.outcome,
        EvaluationOutcome::CreateOrUpdate {
            severity: AlarmSeverity::Major
        }
    );
}
