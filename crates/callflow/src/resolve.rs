//! Materializing callback declarations against the current layout paths.
//!
//! Everything here is a pure function of the graph and a `PathIndex`: given a
//! changed property, a mounted subtree or an existing instance, produce the
//! callback instances it implies.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;

use crate::callback::{CallbackInstance, CallbackKey, MatchRef, Priority, PropRef, Resolved};
use crate::graph::{CallbackDeclaration, DependencyGraph};
use crate::id::{ComponentId, Dependency, IdPattern, IdValue, KeyPattern, PropId, Wildcard};
use crate::layout::{self, LayoutPath};
use crate::paths::PathIndex;

/// Does a concrete object id (`keys`/`values`) match `patterns`?
///
/// With a `reference`, wildcards other than `ALL` are compared against the
/// reference value of the same key: `MATCH` must be equal, `ALLSMALLER`
/// smaller, and a `MATCH` resolved against an `ALLSMALLER` reference larger.
pub fn id_match(keys: &[String], values: &[IdValue], patterns: &[KeyPattern], reference: Option<&MatchRef>) -> bool {
    if keys.len() != values.len() || keys.len() != patterns.len() {
        return false;
    }
    keys.iter().zip(values).zip(patterns).all(|((key, value), pattern)| match pattern {
        KeyPattern::Exact(expected) => value == expected,
        KeyPattern::Wild(Wildcard::All) => true,
        KeyPattern::Wild(wildcard) => {
            let Some(reference) = reference else {
                return true;
            };
            let Some(position) = reference.keys.iter().position(|k| k == key) else {
                return true;
            };
            let reference_pattern = &reference.patterns[position];
            let reference_value = &reference.values[position];
            let expected = match (wildcard, reference_pattern) {
                (Wildcard::AllSmaller, KeyPattern::Wild(Wildcard::AllSmaller)) => return false,
                (Wildcard::AllSmaller, _) => Ordering::Less,
                (_, KeyPattern::Wild(Wildcard::AllSmaller)) => Ordering::Greater,
                _ => Ordering::Equal,
            };
            value.wildcard_cmp(reference_value) == expected
        }
    })
}

/// Values of the `MATCH` positions of a pattern, in key order.
fn any_vals(patterns: &[KeyPattern], values: &[IdValue]) -> Vec<IdValue> {
    patterns
        .iter()
        .zip(values)
        .filter(|(pattern, _)| **pattern == KeyPattern::Wild(Wildcard::Match))
        .map(|(_, value)| value.clone())
        .collect()
}

fn object_parts(id: &ComponentId) -> Option<(String, Vec<String>, Vec<IdValue>)> {
    match id {
        ComponentId::Str(_) => None,
        ComponentId::Obj(map) => Some((
            id.key_signature().unwrap_or_default(),
            map.keys().cloned().collect(),
            map.values().cloned().collect(),
        )),
    }
}

/// How a layout chunk is scanned for callbacks.
#[derive(Clone, Copy, Debug, Default)]
pub struct LayoutScan<'p> {
    /// Where the chunk is mounted. Input-triggered callbacks whose outputs all
    /// live inside the chunk are skipped (they are found through their outputs).
    pub chunk_path: Option<&'p LayoutPath>,
    pub outputs_only: bool,
    /// The chunk was removed: the resolver holds the old paths and these are
    /// the paths after removal. Only multi-valued inputs that contained a
    /// removed component trigger.
    pub removed: Option<&'p PathIndex>,
    /// Version recorded on input-triggered callbacks.
    pub version: u64,
}

#[derive(Clone, Copy)]
pub struct Resolver<'a> {
    graph: &'a DependencyGraph,
    paths: &'a PathIndex,
}

impl<'a> Resolver<'a> {
    pub fn new(graph: &'a DependencyGraph, paths: &'a PathIndex) -> Self {
        Self { graph, paths }
    }

    pub fn paths(&self) -> &'a PathIndex {
        self.paths
    }

    /// Every live property a dependency refers to.
    pub fn resolve_dep(&self, dependency: &Dependency, reference: Option<&MatchRef>) -> Vec<PropRef> {
        match &dependency.id {
            IdPattern::Str(id) => {
                let id = ComponentId::Str(id.clone());
                match self.paths.get(&id) {
                    Some(path) => vec![PropRef {
                        id,
                        property: dependency.property.clone(),
                        path: path.clone(),
                    }],
                    None => Vec::new(),
                }
            }
            IdPattern::Obj(_) => {
                let keys = dependency.id.keys();
                let patterns = dependency.id.values();
                let signature = dependency.id.key_signature().unwrap_or_default();
                self.paths
                    .objects(&signature)
                    .iter()
                    .filter(|entry| id_match(&keys, &entry.values, &patterns, reference))
                    .map(|entry| PropRef {
                        id: entry.id.clone(),
                        property: dependency.property.clone(),
                        path: entry.path.clone(),
                    })
                    .collect()
            }
        }
    }

    fn resolve_all(&self, dependencies: &[Dependency], reference: Option<&MatchRef>) -> Option<Vec<Resolved>> {
        dependencies
            .iter()
            .map(|dependency| {
                let mut props = self.resolve_dep(dependency, reference);
                if dependency.id.is_multi() {
                    Some(Resolved::Multi(props))
                } else if props.len() == 1 {
                    props.pop().map(Resolved::Single)
                } else {
                    None
                }
            })
            .collect()
    }

    /// Resolve every dependency of a declaration. `None` when a single-valued
    /// dependency is not mounted or no output is.
    pub fn make_instance(
        &self,
        callback: &Arc<CallbackDeclaration>,
        reference: Option<MatchRef>,
        any_vals: Vec<IdValue>,
    ) -> Option<CallbackInstance> {
        let outputs: Vec<_> = callback.output_dependencies().cloned().collect();
        let resolved_outputs = self.resolve_all(&outputs, reference.as_ref())?;
        if resolved_outputs.iter().all(|resolved| resolved.props().is_empty()) {
            return None;
        }
        let resolved_inputs = self.resolve_all(&callback.inputs, reference.as_ref())?;
        let resolved_state = self.resolve_all(&callback.state, reference.as_ref())?;
        Some(CallbackInstance::new(
            callback.clone(),
            reference,
            any_vals,
            resolved_inputs,
            resolved_outputs,
            resolved_state,
        ))
    }

    /// One instance per resolved output component for `MATCH` callbacks,
    /// otherwise a single instance.
    fn add_from_outputs(
        &self,
        callback: &Arc<CallbackDeclaration>,
        reference: Option<&MatchRef>,
        found: &mut Vec<CallbackInstance>,
    ) {
        let has_match = callback
            .outputs
            .first()
            .is_some_and(|output| !output.dependency.id.keys_with(Wildcard::Match).is_empty());
        if !has_match {
            if let Some(instance) = self.make_instance(callback, reference.cloned(), Vec::new()) {
                found.push(instance);
            }
            return;
        }

        let single_output = callback.outputs.iter().find(|output| !output.dependency.id.is_multi());
        let candidates: Vec<&Dependency> = match single_output {
            Some(output) => vec![&output.dependency],
            None => callback.output_dependencies().collect(),
        };
        let mut seen = HashSet::new();
        for pattern in candidates {
            let keys = pattern.id.keys();
            let patterns = pattern.id.values();
            for output in self.resolve_dep(pattern, reference) {
                let values = output.id.values();
                let match_values = any_vals(&patterns, &values);
                if !seen.insert(match_values.clone()) {
                    continue;
                }
                let output_reference = MatchRef {
                    keys: keys.clone(),
                    values,
                    patterns: patterns.clone(),
                };
                if let Some(instance) = self.make_instance(callback, Some(output_reference), match_values) {
                    found.push(instance);
                }
            }
        }
    }

    fn collect_by_input(&self, id: &ComponentId, property: &str, version: u64) -> Vec<CallbackInstance> {
        let mut found = Vec::new();
        match object_parts(id) {
            None => {
                if let ComponentId::Str(name) = id {
                    for position in self.graph.input_callbacks(name, property) {
                        if let Some(callback) = self.graph.callback(*position) {
                            self.add_from_outputs(callback, None, &mut found);
                        }
                    }
                }
            }
            Some((signature, keys, values)) => {
                for route in self.graph.input_routes(&signature, property) {
                    if !id_match(&keys, &values, &route.values, None) {
                        continue;
                    }
                    let reference = MatchRef {
                        keys: keys.clone(),
                        values: values.clone(),
                        patterns: route.values.clone(),
                    };
                    if let Some(callback) = self.graph.callback(route.callback) {
                        self.add_from_outputs(callback, Some(&reference), &mut found);
                    }
                }
            }
        }
        let changed = PropId::new(id.clone(), property);
        for instance in &mut found {
            instance.mark_changed(changed.clone(), version);
        }
        found
    }

    /// Every callback with `id.property` among its inputs, with wildcard
    /// inputs expanded against the mounted components.
    pub fn callbacks_by_input(&self, id: &ComponentId, property: &str, version: u64) -> Vec<CallbackInstance> {
        let mut found = self.collect_by_input(id, property, version);
        for instance in &mut found {
            instance.priority = self.priority(instance);
        }
        found
    }

    /// Callbacks that write `id.property`.
    pub fn callbacks_by_output(&self, id: &ComponentId, property: &str) -> Vec<CallbackInstance> {
        let mut found = Vec::new();
        match object_parts(id) {
            None => {
                if let ComponentId::Str(name) = id {
                    for position in self.graph.output_callbacks(name, property) {
                        if let Some(callback) = self.graph.callback(*position) {
                            found.extend(self.make_instance(callback, None, Vec::new()));
                        }
                    }
                }
            }
            Some((signature, keys, values)) => {
                for route in self.graph.output_routes(&signature, property) {
                    if !id_match(&keys, &values, &route.values, None) {
                        continue;
                    }
                    let match_values = any_vals(&route.values, &values);
                    let reference = MatchRef {
                        keys: keys.clone(),
                        values: values.clone(),
                        patterns: route.values.clone(),
                    };
                    if let Some(callback) = self.graph.callback(route.callback) {
                        found.extend(self.make_instance(callback, Some(reference), match_values));
                    }
                }
            }
        }
        found
    }

    /// Callbacks implied by mounting (or removing) a layout chunk.
    pub fn layout_callbacks(&self, chunk: &Value, scan: LayoutScan<'_>) -> Vec<CallbackInstance> {
        let mut found = Found::default();
        let new_paths = scan.removed.map(|paths| Resolver::new(self.graph, paths));

        layout::crawl(chunk, &LayoutPath::root(), &mut |component, _| {
            let Some(id) = layout::component_id(component) else {
                return;
            };
            let signature = id.key_signature();
            if scan.removed.is_some() && signature.is_none() {
                return;
            }

            if scan.removed.is_none() {
                let properties: Vec<String> = match (&id, &signature) {
                    (ComponentId::Str(name), _) => self.graph.output_properties(name).map(str::to_owned).collect(),
                    (_, Some(signature)) => self
                        .graph
                        .output_pattern_properties(signature)
                        .map(str::to_owned)
                        .collect(),
                    _ => Vec::new(),
                };
                for property in properties {
                    for mut instance in self.callbacks_by_output(&id, &property) {
                        if !instance.callback.prevent_initial_call {
                            instance.initial_call = true;
                            found.add(instance);
                        }
                    }
                }
            }

            if scan.outputs_only {
                return;
            }
            let properties: Vec<String> = match (&id, &signature) {
                (ComponentId::Str(name), _) => self.graph.input_properties(name).map(str::to_owned).collect(),
                (_, Some(signature)) => self
                    .graph
                    .input_pattern_properties(signature)
                    .map(str::to_owned)
                    .collect(),
                _ => Vec::new(),
            };
            for property in properties {
                for instance in self.collect_by_input(&id, &property, scan.version) {
                    let inside_chunk = scan
                        .chunk_path
                        .is_some_and(|chunk_path| instance.output_props().all(|output| output.path.starts_with(chunk_path)));
                    if inside_chunk {
                        continue;
                    }
                    match &new_paths {
                        None => found.add(instance),
                        Some(resolver) => {
                            let contained_removed = instance
                                .resolved_inputs
                                .iter()
                                .any(|input| matches!(input, Resolved::Multi(props) if props.iter().any(|p| p.id == id)));
                            if contained_removed {
                                found.extend(resolver.refresh(&instance));
                            }
                        }
                    }
                }
            }
        });

        let resolver = new_paths.unwrap_or(*self);
        let mut instances = resolver.follow_forward(found.into_vec());
        for instance in &mut instances {
            instance.priority = resolver.priority(instance);
        }
        instances
    }

    /// Add every callback downstream of `instances` (through their outputs),
    /// transitively. Downstream callbacks carry version 0: nothing changed yet.
    pub fn follow_forward(&self, instances: Vec<CallbackInstance>) -> Vec<CallbackInstance> {
        let mut found = Found::default();
        found.extend(instances);
        let mut position = 0;
        while position < found.instances.len() {
            let outputs = found.instances[position].output_ids();
            for output in outputs {
                for next in self.collect_by_input(&output.id, &output.property, 0) {
                    found.add(next);
                }
            }
            position += 1;
        }
        found.into_vec()
    }

    /// Re-resolve an instance against the current paths. `None` when its
    /// outputs are gone or a single-valued dependency is no longer mounted.
    pub fn refresh(&self, instance: &CallbackInstance) -> Option<CallbackInstance> {
        let mut refreshed = self.make_instance(&instance.callback, instance.match_ref.clone(), instance.any_vals.clone())?;
        refreshed.predecessors = instance.predecessors.clone();
        refreshed.execution_groups = instance.execution_groups.clone();
        refreshed.priority = instance.priority.clone();
        refreshed.initial_call = instance.initial_call;
        refreshed.changed_props = instance
            .changed_props
            .iter()
            .filter(|(prop, _)| self.paths.contains(&prop.id))
            .map(|(prop, version)| (prop.clone(), *version))
            .collect();
        Some(refreshed)
    }

    /// Depth and fan-out of the downstream callback chain.
    pub fn priority(&self, instance: &CallbackInstance) -> Priority {
        let mut touched_callbacks: HashSet<CallbackKey> = HashSet::new();
        let mut touched_outputs: HashSet<PropId> = HashSet::new();
        let mut levels = Vec::new();
        let mut current = vec![instance.clone()];
        while !current.is_empty() {
            current.retain(|callback| touched_callbacks.insert(callback.key.clone()));
            let outputs: Vec<PropId> = current
                .iter()
                .flat_map(CallbackInstance::output_ids)
                .filter(|output| touched_outputs.insert(output.clone()))
                .collect();
            current = outputs
                .iter()
                .flat_map(|output| self.collect_by_input(&output.id, &output.property, 0))
                .collect();
            if !current.is_empty() {
                levels.push(current.len());
            }
        }
        Priority::from_levels(&levels)
    }

    /// Outputs of every callback transitively downstream of `instance`.
    pub fn subsequent_outputs(&self, instance: &CallbackInstance) -> Vec<PropId> {
        let mut seen_callbacks: HashSet<CallbackKey> = HashSet::from([instance.key.clone()]);
        let mut seen_outputs: HashSet<PropId> = instance.output_ids().into_iter().collect();
        let mut frontier: Vec<PropId> = seen_outputs.iter().cloned().collect();
        let mut subsequent = Vec::new();
        while let Some(output) = frontier.pop() {
            for next in self.collect_by_input(&output.id, &output.property, 0) {
                if !seen_callbacks.insert(next.key.clone()) {
                    continue;
                }
                for prop in next.output_ids() {
                    if seen_outputs.insert(prop.clone()) {
                        subsequent.push(prop.clone());
                        frontier.push(prop);
                    }
                }
            }
        }
        subsequent
    }
}

/// Every callback triggered by a change of `id.property`.
pub fn resolve_inputs_outputs(
    graph: &DependencyGraph,
    paths: &PathIndex,
    id: &ComponentId,
    property: &str,
) -> Vec<CallbackInstance> {
    Resolver::new(graph, paths).callbacks_by_input(id, property, 0)
}

/// Instances collected by key; duplicates merge into the first one found.
#[derive(Default)]
struct Found {
    instances: Vec<CallbackInstance>,
    by_key: HashMap<CallbackKey, usize>,
}

impl Found {
    fn add(&mut self, instance: CallbackInstance) {
        match self.by_key.get(&instance.key) {
            Some(position) => {
                let existing = &mut self.instances[*position];
                for (prop, version) in instance.changed_props {
                    existing.mark_changed(prop, version);
                }
                existing.initial_call |= instance.initial_call;
            }
            None => {
                self.by_key.insert(instance.key.clone(), self.instances.len());
                self.instances.push(instance);
            }
        }
    }

    fn extend(&mut self, instances: impl IntoIterator<Item = CallbackInstance>) {
        for instance in instances {
            self.add(instance);
        }
    }

    fn into_vec(self) -> Vec<CallbackInstance> {
        self.instances
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Layout;
    use serde_json::json;

    fn component(id: Value, props: Value) -> Value {
        let mut props = props;
        props["id"] = id;
        json!({"type": "Input", "namespace": "core", "props": props})
    }

    fn row(index: i64) -> Value {
        component(json!({"type": "row", "index": index}), json!({"value": index}))
    }

    fn setup(callbacks: Value, children: Vec<Value>) -> (DependencyGraph, Layout, PathIndex) {
        let graph = DependencyGraph::from_json(&callbacks.to_string()).unwrap();
        let layout = Layout::new(json!({
            "type": "Div", "namespace": "html", "props": {"id": "root", "children": children}
        }));
        let paths = PathIndex::build(&layout);
        (graph, layout, paths)
    }

    #[test]
    fn string_input_resolves_outputs_and_state() {
        let (graph, _, paths) = setup(
            json!([{"output": "b.value", "inputs": [{"id": "a", "property": "value"}],
                    "state": [{"id": "c", "property": "value"}]}]),
            vec![
                component(json!("a"), json!({"value": 1})),
                component(json!("b"), json!({})),
                component(json!("c"), json!({})),
            ],
        );
        let found = resolve_inputs_outputs(&graph, &paths, &"a".into(), "value");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].output_ids(), vec![PropId::new("b", "value")]);
        assert_eq!(found[0].state_ids(), vec![PropId::new("c", "value")]);
        assert!(found[0].changed_props.contains_key(&PropId::new("a", "value")));
    }

    #[test]
    fn unmounted_dependencies_exclude_the_callback() {
        let (graph, _, paths) = setup(
            json!([{"output": "b.value", "inputs": [{"id": "a", "property": "value"}]}]),
            vec![component(json!("a"), json!({}))],
        );
        assert!(resolve_inputs_outputs(&graph, &paths, &"a".into(), "value").is_empty());
    }

    #[test]
    fn match_callbacks_resolve_per_component() {
        let (graph, _, paths) = setup(
            json!([{"output": "{\"type\":\"label\",\"index\":[\"MATCH\"]}.children",
                    "inputs": [{"id": {"type": "row", "index": ["MATCH"]}, "property": "value"}]}]),
            vec![
                row(0),
                row(1),
                component(json!({"type": "label", "index": 0}), json!({})),
                component(json!({"type": "label", "index": 1}), json!({})),
            ],
        );
        let trigger = ComponentId::from_json(&json!({"type": "row", "index": 1})).unwrap();
        let found = resolve_inputs_outputs(&graph, &paths, &trigger, "value");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].any_vals, vec![IdValue::Int(1)]);
        assert_eq!(found[0].input_ids(), vec![PropId::new(trigger, "value")]);
    }

    #[test]
    fn all_smaller_inputs_take_smaller_indices() {
        let (graph, _, paths) = setup(
            json!([{"output": "{\"type\":\"row\",\"index\":[\"MATCH\"]}.label",
                    "inputs": [{"id": {"type": "row", "index": ["ALLSMALLER"]}, "property": "value"}]}]),
            vec![row(0), row(1), row(2)],
        );
        let trigger = ComponentId::from_json(&json!({"type": "row", "index": 0})).unwrap();
        let mut found = resolve_inputs_outputs(&graph, &paths, &trigger, "value");
        found.sort_by(|a, b| a.any_vals.cmp(&b.any_vals));
        // Row 0 feeds the labels of rows 1 and 2.
        assert_eq!(found.len(), 2);
        assert_eq!(found[1].any_vals, vec![IdValue::Int(2)]);
        assert_eq!(found[1].input_props().count(), 2);
    }

    #[test]
    fn layout_scan_marks_initial_calls_and_follows_forward() {
        let (graph, layout, paths) = setup(
            json!([
                {"output": "b.value", "inputs": [{"id": "a", "property": "value"}]},
                {"output": "c.value", "inputs": [{"id": "b", "property": "value"}], "prevent_initial_call": true}
            ]),
            vec![
                component(json!("a"), json!({})),
                component(json!("b"), json!({})),
                component(json!("c"), json!({})),
            ],
        );
        let resolver = Resolver::new(&graph, &paths);
        let found = resolver.layout_callbacks(layout.root(), LayoutScan::default());
        let keys: Vec<_> = found.iter().map(|i| (i.key.to_string(), i.initial_call)).collect();
        assert_eq!(keys, vec![("b.value".to_owned(), true), ("c.value".to_owned(), false)]);
        assert!(found[0].priority > found[1].priority);
    }

    #[test]
    fn removal_triggers_multi_valued_inputs() {
        let (graph, layout, paths) = setup(
            json!([{"output": "total.value",
                    "inputs": [{"id": {"type": "row", "index": ["ALL"]}, "property": "value"}]}]),
            vec![component(json!("total"), json!({})), row(0), row(1)],
        );
        let removed = layout.get(&LayoutPath::root().props_path("children").index(2)).unwrap().clone();
        let base = LayoutPath::root().props_path("children");
        let remaining = json!([component(json!("total"), json!({})), row(0)]);
        let new_paths = paths.with_subtree(&remaining, &base);

        let found = Resolver::new(&graph, &paths).layout_callbacks(
            &removed,
            LayoutScan {
                removed: Some(&new_paths),
                version: 3,
                ..LayoutScan::default()
            },
        );
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].input_props().count(), 1);
    }

    #[test]
    fn subsequent_outputs_follow_the_chain() {
        let (graph, _, paths) = setup(
            json!([
                {"output": "b.value", "inputs": [{"id": "a", "property": "value"}]},
                {"output": "c.value", "inputs": [{"id": "b", "property": "value"}]}
            ]),
            vec![
                component(json!("a"), json!({})),
                component(json!("b"), json!({})),
                component(json!("c"), json!({})),
            ],
        );
        let resolver = Resolver::new(&graph, &paths);
        let first = resolver.callbacks_by_input(&"a".into(), "value", 1).remove(0);
        assert_eq!(resolver.subsequent_outputs(&first), vec![PropId::new("c", "value")]);
    }
}
