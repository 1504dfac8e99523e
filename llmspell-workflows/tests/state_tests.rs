//! ABOUTME: Integration tests for the three-tier reactive state manager

use llmspell_workflows::definition::{FromPaths, OnErrorPolicy, TransformDescriptor};
use llmspell_workflows::state::StateManager;
use llmspell_workflows::WorkflowError;
use serde_json::{json, Map};

fn transform(field: &str, from: FromPaths, expr: &str) -> TransformDescriptor {
    TransformDescriptor {
        field: field.to_string(),
        from,
        expression: expr.to_string(),
        on_error: None,
        fallback: None,
    }
}

#[test]
fn integer_field_stays_integer_through_a_transform() {
    let mut inputs = Map::new();
    inputs.insert("items".to_string(), json!(["a", "b", "c"]));
    let transforms = vec![transform("n", FromPaths::Single("inputs.items".to_string()), "input.length")];
    let mgr = StateManager::new(inputs, Map::new(), transforms).unwrap();
    let computed = mgr.snapshot().computed;
    assert_eq!(computed.get("n"), Some(&json!(3)));
    assert!(computed.get("n").unwrap().is_i64());
}

#[test]
fn multi_path_transform_binds_inputs_as_a_list() {
    let mut inputs = Map::new();
    inputs.insert("a".to_string(), json!(2));
    inputs.insert("b".to_string(), json!(3));
    let transforms = vec![transform(
        "sum",
        FromPaths::Many(vec!["inputs.a".to_string(), "inputs.b".to_string()]),
        "inputs[0] + inputs[1]",
    )];
    let mgr = StateManager::new(inputs, Map::new(), transforms).unwrap();
    assert_eq!(mgr.snapshot().computed.get("sum"), Some(&json!(5)));
}

#[test]
fn transform_expression_failure_falls_back_to_on_error_value() {
    let transforms = vec![TransformDescriptor {
        field: "risky".to_string(),
        from: FromPaths::Single("inputs.x".to_string()),
        expression: "input / 0".to_string(),
        on_error: Some(OnErrorPolicy::UseFallback),
        fallback: Some(json!("fallback")),
    }];
    let mut inputs = Map::new();
    inputs.insert("x".to_string(), json!(10));
    let mgr = StateManager::new(inputs, Map::new(), transforms).unwrap();
    assert_eq!(mgr.snapshot().computed.get("risky"), Some(&json!("fallback")));
}

#[test]
fn transform_without_on_error_propagates_as_transform_error() {
    let transforms = vec![TransformDescriptor {
        field: "risky".to_string(),
        from: FromPaths::Single("inputs.x".to_string()),
        expression: "input / 0".to_string(),
        on_error: None,
        fallback: None,
    }];
    let mut inputs = Map::new();
    inputs.insert("x".to_string(), json!(10));
    let err = StateManager::new(inputs, Map::new(), transforms).unwrap_err();
    assert!(matches!(err, WorkflowError::TransformError { .. }));
}

#[test]
fn cyclic_computed_dag_is_rejected_at_construction() {
    let transforms = vec![
        transform("a", FromPaths::Single("computed.b".to_string()), "input"),
        transform("b", FromPaths::Single("computed.a".to_string()), "input"),
    ];
    let err = StateManager::new(Map::new(), Map::new(), transforms).unwrap_err();
    assert!(matches!(err, WorkflowError::CyclicComputedDag(_)));
}

#[test]
fn update_state_only_recomputes_the_dirty_subset() {
    let transforms = vec![
        transform("doubled", FromPaths::Single("state.n".to_string()), "input * 2"),
        transform("label", FromPaths::Single("inputs.name".to_string()), "input"),
    ];
    let mut inputs = Map::new();
    inputs.insert("name".to_string(), json!("alice"));
    let mut state_defaults = Map::new();
    state_defaults.insert("n".to_string(), json!(1));
    let mut mgr = StateManager::new(inputs, state_defaults, transforms).unwrap();
    assert_eq!(mgr.snapshot().computed.get("doubled"), Some(&json!(2)));

    let mut patch = Map::new();
    patch.insert("n".to_string(), json!(10));
    mgr.merge_state(&patch).unwrap();
    assert_eq!(mgr.snapshot().computed.get("doubled"), Some(&json!(20)));
    assert_eq!(mgr.snapshot().computed.get("label"), Some(&json!("alice")));
}
