//! ABOUTME: Three-tier reactive state manager (component C)
//! ABOUTME: inputs/state/computed tiers plus dirty-subset DAG recompute, grounded on
//! ABOUTME: the topological-sort/cycle-detection pattern in llmspell-core's Workflow::plan_execution

use crate::definition::TransformDescriptor;
use crate::error::WorkflowError;
use crate::expr::Scope;
use crate::transform;
use crate::value::Value;
use serde_json::{Map, Value as Json};
use std::collections::{HashMap, HashSet, VecDeque};

/// A read-only view of all three tiers at a point in time, suitable for
/// handing to the expression evaluator or serializing back to the agent.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    pub inputs: Map<String, Json>,
    pub state: Map<String, Json>,
    pub computed: Map<String, Json>,
}

impl StateSnapshot {
    pub fn to_scope(&self) -> Scope {
        Scope::new()
            .bind("inputs", Value::Map(self.inputs.clone()))
            .bind("state", Value::Map(self.state.clone()))
            .bind("computed", Value::Map(self.computed.clone()))
    }
}

/// Owns the three tiers for one workflow instance and the declarative
/// transform DAG that derives `computed.*` from the others.
#[derive(Debug)]
pub struct StateManager {
    inputs: Map<String, Json>,
    state: Map<String, Json>,
    computed: Map<String, Json>,
    transforms: Vec<TransformDescriptor>,
    /// transforms[i] depends on transforms[order[i]] for each entry in edges[i]
    edges: Vec<Vec<usize>>,
    topo: Vec<usize>,
}

impl StateManager {
    /// Build a manager from initial inputs/state defaults and the
    /// workflow's transform list, validating the DAG eagerly (load-time
    /// cycle detection, per spec §4.9: definition errors are instance-fatal
    /// at spawn, not deferred to first access).
    pub fn new(
        inputs: Map<String, Json>,
        state_defaults: Map<String, Json>,
        transforms: Vec<TransformDescriptor>,
    ) -> Result<Self, WorkflowError> {
        let edges = build_edges(&transforms);
        let topo = topological_order(&transforms, &edges)?;
        let mut mgr = Self {
            inputs,
            state: state_defaults,
            computed: Map::new(),
            transforms,
            edges,
            topo,
        };
        mgr.recompute_all()?;
        Ok(mgr)
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            inputs: self.inputs.clone(),
            state: self.state.clone(),
            computed: self.computed.clone(),
        }
    }

    pub fn scope(&self) -> Scope {
        self.snapshot().to_scope()
    }

    /// Full recompute of every transform in topological order. Used at
    /// instance spawn and sub-agent item spawn (component H requires a
    /// full recompute, not a dirty-subset one, since every computed field
    /// starts undefined for a fresh instance).
    pub fn recompute_all(&mut self) -> Result<(), WorkflowError> {
        for &idx in &self.topo.clone() {
            self.recompute_one(idx)?;
        }
        Ok(())
    }

    /// Write a value under `state.*` and recompute only the transforms
    /// reachable from it (dirty-subset recompute).
    ///
    /// `path` must be a single top-level `state` field name; deeper dotted
    /// writes are the caller's responsibility to flatten (the executor
    /// validates `state_update` targets stay under `state.*` at the RPC
    /// boundary, per spec §7 `BadStatePath`).
    pub fn set_state(&mut self, field: &str, value: Json) -> Result<(), WorkflowError> {
        self.state.insert(field.to_string(), value);
        self.recompute_dirty(&[format!("state.{field}")])
    }

    pub fn merge_state(&mut self, patch: &Map<String, Json>) -> Result<(), WorkflowError> {
        let mut touched = Vec::with_capacity(patch.len());
        for (k, v) in patch {
            self.state.insert(k.clone(), v.clone());
            touched.push(format!("state.{k}"));
        }
        self.recompute_dirty(&touched)
    }

    fn recompute_dirty(&mut self, changed_paths: &[String]) -> Result<(), WorkflowError> {
        let mut dirty: HashSet<usize> = HashSet::new();
        for (i, t) in self.transforms.iter().enumerate() {
            if t.from
                .as_slice()
                .iter()
                .any(|p| changed_paths.iter().any(|c| p == c || p.starts_with(c.as_str())))
            {
                dirty.insert(i);
            }
        }
        // Propagate downstream: anything depending on a dirty field (via
        // `computed.<field>` in its `from` list) is dirty too.
        let mut changed = true;
        while changed {
            changed = false;
            for (i, deps) in self.edges.iter().enumerate() {
                if dirty.contains(&i) {
                    continue;
                }
                if deps.iter().any(|d| dirty.contains(d)) {
                    dirty.insert(i);
                    changed = true;
                }
            }
        }
        for &idx in &self.topo.clone() {
            if dirty.contains(&idx) {
                self.recompute_one(idx)?;
            }
        }
        Ok(())
    }

    fn recompute_one(&mut self, idx: usize) -> Result<(), WorkflowError> {
        let scope = self.scope();
        let descriptor = self.transforms[idx].clone();
        let value = transform::evaluate_transform(&descriptor, &scope)?;
        self.computed.insert(descriptor.field, value.into_json());
        Ok(())
    }
}

fn build_edges(transforms: &[TransformDescriptor]) -> Vec<Vec<usize>> {
    let field_index: HashMap<&str, usize> = transforms
        .iter()
        .enumerate()
        .map(|(i, t)| (t.field.as_str(), i))
        .collect();
    transforms
        .iter()
        .map(|t| {
            t.from
                .as_slice()
                .iter()
                .filter_map(|p| p.strip_prefix("computed."))
                .filter_map(|field| field_index.get(field).copied())
                .collect()
        })
        .collect()
}

/// Kahn's-algorithm topological sort with explicit cycle detection,
/// grounded on `llmspell_core::traits::workflow::Workflow::plan_execution`.
fn topological_order(
    transforms: &[TransformDescriptor],
    edges: &[Vec<usize>],
) -> Result<Vec<usize>, WorkflowError> {
    let n = transforms.len();
    let mut in_degree = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, deps) in edges.iter().enumerate() {
        in_degree[i] = deps.len();
        for &d in deps {
            dependents[d].push(i);
        }
    }
    let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(i) = queue.pop_front() {
        order.push(i);
        for &dep in &dependents[i] {
            in_degree[dep] -= 1;
            if in_degree[dep] == 0 {
                queue.push_back(dep);
            }
        }
    }
    if order.len() != n {
        let stuck: Vec<String> = (0..n)
            .filter(|i| !order.contains(i))
            .map(|i| transforms[i].field.clone())
            .collect();
        return Err(WorkflowError::CyclicComputedDag(stuck.join(", ")));
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::FromPaths;

    fn transform(field: &str, from: &str, expr: &str) -> TransformDescriptor {
        TransformDescriptor {
            field: field.to_string(),
            from: FromPaths::Single(from.to_string()),
            expression: expr.to_string(),
            on_error: None,
            fallback: None,
        }
    }

    #[test]
    fn full_recompute_populates_every_field() {
        let mut inputs = Map::new();
        inputs.insert("items".to_string(), serde_json::json!(["a", "b"]));
        let transforms = vec![transform("count", "inputs.items", "input.length")];
        let mgr = StateManager::new(inputs, Map::new(), transforms).unwrap();
        assert_eq!(mgr.snapshot().computed.get("count"), Some(&serde_json::json!(2)));
    }

    #[test]
    fn cyclic_dag_is_rejected_at_construction() {
        let transforms = vec![
            transform("a", "computed.b", "input"),
            transform("b", "computed.a", "input"),
        ];
        let err = StateManager::new(Map::new(), Map::new(), transforms).unwrap_err();
        assert!(matches!(err, WorkflowError::CyclicComputedDag(_)));
    }

    #[test]
    fn dirty_subset_recompute_only_touches_dependents() {
        let transforms = vec![
            transform("doubled", "state.count", "input * 2"),
            transform("unrelated", "inputs.items", "input.length"),
        ];
        let mut inputs = Map::new();
        inputs.insert("items".to_string(), serde_json::json!(["x"]));
        let mut state_defaults = Map::new();
        state_defaults.insert("count".to_string(), serde_json::json!(5));
        let mut mgr = StateManager::new(inputs, state_defaults, transforms).unwrap();
        assert_eq!(mgr.snapshot().computed.get("doubled"), Some(&serde_json::json!(10)));
        mgr.set_state("count", serde_json::json!(7)).unwrap();
        assert_eq!(mgr.snapshot().computed.get("doubled"), Some(&serde_json::json!(14)));
        assert_eq!(mgr.snapshot().computed.get("unrelated"), Some(&serde_json::json!(1)));
    }

    #[test]
    fn downstream_computed_dependency_recomputes_transitively() {
        let transforms = vec![
            transform("base", "state.count", "input + 1"),
            transform("derived", "computed.base", "input * 10"),
        ];
        let mut state_defaults = Map::new();
        state_defaults.insert("count".to_string(), serde_json::json!(1));
        let mut mgr = StateManager::new(Map::new(), state_defaults, transforms).unwrap();
        assert_eq!(mgr.snapshot().computed.get("derived"), Some(&serde_json::json!(20)));
        mgr.set_state("count", serde_json::json!(2)).unwrap();
        assert_eq!(mgr.snapshot().computed.get("base"), Some(&serde_json::json!(3)));
        assert_eq!(mgr.snapshot().computed.get("derived"), Some(&serde_json::json!(30)));
    }
}
