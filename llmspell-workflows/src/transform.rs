//! ABOUTME: Computed-tier transform evaluation (component B)
//! ABOUTME: Binds a transform's `from` paths as `input`/`inputs` and evaluates its expression

use crate::definition::{OnErrorPolicy, TransformDescriptor};
use crate::error::WorkflowError;
use crate::expr::{self, Scope};
use crate::value::Value;

/// Resolve a dotted path (`"inputs.items"`, `"state.count"`,
/// `"computed.total"`) against the three tiers exposed as scope roots.
fn resolve_path(path: &str, scope: &Scope) -> Value {
    let full = format!("{path}");
    expr::evaluate(&full, scope).unwrap_or(Value::Undefined)
}

/// Evaluate one `computed.*` transform. `scope` must already have
/// `inputs`/`state`/`computed` (the already-resolved subset) bound as
/// roots so that `from` paths and the expression itself can reference
/// them.
///
/// Binding convention (resolved Open Question, see SPEC_FULL.md): a single
/// `from` path binds as `input`; more than one binds as `inputs`, a list
/// in `from` order.
pub fn evaluate_transform(
    descriptor: &TransformDescriptor,
    scope: &Scope,
) -> Result<Value, WorkflowError> {
    let paths = descriptor.from.as_slice();
    let mut local = scope.clone();
    match paths.as_slice() {
        [] => {}
        [single] => {
            local.set("input", resolve_path(single, scope));
        }
        many => {
            let values: Vec<Value> = many.iter().map(|p| resolve_path(p, scope)).collect();
            local.set("inputs", Value::List(values));
        }
    }

    match expr::evaluate(&descriptor.expression, &local) {
        Ok(v) => Ok(v),
        Err(e) => match descriptor.on_error {
            Some(OnErrorPolicy::UseFallback) => {
                Ok(descriptor.fallback.as_ref().map(Value::from_json).unwrap_or(Value::Undefined))
            }
            Some(OnErrorPolicy::Propagate) | None => Err(WorkflowError::TransformError {
                field: descriptor.field.clone(),
                message: e.to_string(),
            }),
        },
    }
}
