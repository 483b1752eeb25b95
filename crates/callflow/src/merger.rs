//! Writing callback results and property changes into the layout.
//!
//! Every write goes through `apply_props`, which keeps the path index current
//! when a prop holds components and returns the callbacks the change
//! triggers: inputs of the written props, callbacks of a newly mounted chunk
//! and multi-valued inputs that lost a component.

use indexmap::IndexMap;
use serde_json::Value;

use crate::callback::CallbackInstance;
use crate::error::MutationError;
use crate::graph::DependencyGraph;
use crate::id::{ComponentId, PropId};
use crate::layout::{self, Layout, LayoutPath};
use crate::paths::PathIndex;
use crate::persistence::Persistence;
use crate::reconcile::Reconciler;
use crate::resolve::{LayoutScan, Resolver};
use crate::runner::CallbackResponse;

/// Who set a property.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSource {
    /// An edit made by the user; recorded for persistence.
    User,
    /// Set programmatically from outside the scheduler.
    External,
    Callback,
}

pub const MUTATION_MARKER: &str = "__mutation";

/// Result of one write.
#[derive(Debug, Default)]
pub struct Merged {
    pub updated: Vec<PropId>,
    pub requested: Vec<CallbackInstance>,
}

impl Merged {
    fn extend(&mut self, other: Merged) {
        self.updated.extend(other.updated);
        self.requested.extend(other.requested);
    }
}

enum Write {
    Replace(Value),
    Mutate { operation: String, payload: Value },
}

pub struct MergeContext<'a> {
    pub graph: &'a DependencyGraph,
    pub layout: &'a mut Layout,
    pub paths: &'a mut PathIndex,
    pub persistence: &'a dyn Persistence,
    pub reconciler: &'a dyn Reconciler,
}

impl MergeContext<'_> {
    /// Apply a successful response. Mutation envelopes are all validated
    /// and reconciled before anything is written.
    pub fn apply_response(
        &mut self,
        instance: &CallbackInstance,
        response: CallbackResponse,
        version: u64,
    ) -> Result<Merged, MutationError> {
        let callback = instance.callback.id.to_string();
        let mut writes = Vec::with_capacity(response.updates.len());
        for update in response.updates {
            let Some(mutable) = output_mutability(instance, &update.id, &update.property) else {
                log::debug!("{callback} returned `{}.{}`, which it does not output", update.id, update.property);
                continue;
            };
            let output = PropId::new(update.id, update.property);
            let write = envelope(&callback, &output.to_string(), update.value, mutable)?;
            writes.push((output, write));
        }

        let mut values: IndexMap<ComponentId, Vec<(String, Value)>> = IndexMap::new();
        for (output, write) in writes {
            let value = match write {
                Write::Replace(value) => value,
                Write::Mutate { operation, payload } => {
                    let current = self
                        .paths
                        .get(&output.id)
                        .and_then(|path| self.layout.prop(path, &output.property))
                        .cloned()
                        .unwrap_or(Value::Null);
                    self.reconciler
                        .reconcile(&operation, &current, payload)
                        .map_err(|message| MutationError::Unsupported {
                            output: output.to_string(),
                            operation: operation.clone(),
                            message,
                        })?
                }
            };
            values.entry(output.id).or_default().push((output.property, value));
        }

        let mut applied = Merged::default();
        for (id, props) in values {
            applied.extend(self.apply_props(&id, props, version, ChangeSource::Callback));
        }
        Ok(applied)
    }

    /// Write props of one component and collect the callbacks this triggers.
    pub fn apply_props(&mut self, id: &ComponentId, props: Vec<(String, Value)>, version: u64, source: ChangeSource) -> Merged {
        let mut applied = Merged::default();
        let Some(path) = self.paths.get(id).cloned() else {
            log::debug!("dropping update of unmounted `{id}`");
            return applied;
        };

        for (property, value) in props {
            if let Some(component) = self.layout.component(&path) {
                match source {
                    ChangeSource::User => self.persistence.record_edit(component, &property, &value),
                    ChangeSource::Callback => self.persistence.prune(component, &property),
                    ChangeSource::External => {}
                }
            }
            let structural = layout::contains_components(&value);
            let value = if structural { self.persistence.apply(value) } else { value };
            let Some(old) = self.layout.set_prop(&path, &property, value) else {
                continue;
            };
            if structural || layout::contains_components(&old) {
                applied.requested.extend(self.remount(&path.props_path(&property), &old, version));
            }
            applied.updated.push(PropId::new(id.clone(), property));
        }

        let resolver = Resolver::new(self.graph, &*self.paths);
        for prop in &applied.updated {
            applied
                .requested
                .extend(resolver.callbacks_by_input(&prop.id, &prop.property, version));
        }
        applied
    }

    /// Reindex a replaced chunk: callbacks of the new components, and
    /// multi-valued inputs that contained removed ones.
    fn remount(&mut self, chunk_path: &LayoutPath, old: &Value, version: u64) -> Vec<CallbackInstance> {
        let chunk = self.layout.get(chunk_path).cloned().unwrap_or(Value::Null);
        let old_paths = std::mem::take(self.paths);
        *self.paths = old_paths.with_subtree(&chunk, chunk_path);

        let mut requested = Resolver::new(self.graph, &*self.paths).layout_callbacks(
            &chunk,
            LayoutScan {
                chunk_path: Some(chunk_path),
                version,
                ..LayoutScan::default()
            },
        );
        if layout::contains_components(old) {
            requested.extend(Resolver::new(self.graph, &old_paths).layout_callbacks(
                old,
                LayoutScan {
                    removed: Some(&*self.paths),
                    version,
                    ..LayoutScan::default()
                },
            ));
        }
        requested
    }
}

/// Whether the resolved output accepts mutations, `None` if it is not an output.
fn output_mutability(instance: &CallbackInstance, id: &ComponentId, property: &str) -> Option<bool> {
    instance
        .resolved_outputs
        .iter()
        .zip(&instance.callback.outputs)
        .find(|(resolved, _)| resolved.props().iter().any(|prop| prop.id == *id && prop.property == property))
        .map(|(_, output)| output.mutable)
}

fn envelope(callback: &str, output: &str, value: Value, mutable: bool) -> Result<Write, MutationError> {
    let is_envelope = value.get(MUTATION_MARKER).and_then(Value::as_bool) == Some(true);
    if !is_envelope {
        return Ok(Write::Replace(value));
    }
    if !mutable {
        return Err(MutationError::NotMutable {
            callback: callback.to_owned(),
            output: output.to_owned(),
        });
    }
    let Some(operation) = value.get("mutation").and_then(Value::as_str) else {
        return Err(MutationError::InvalidOperation {
            callback: callback.to_owned(),
            output: output.to_owned(),
        });
    };
    Ok(Write::Mutate {
        operation: operation.to_owned(),
        payload: value.get("output").cloned().unwrap_or(Value::Null),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{MemoryPersistence, NoPersistence};
    use crate::reconcile::StandardReconciler;
    use serde_json::json;

    fn component(id: Value, props: Value) -> Value {
        let mut props = props;
        props["id"] = id;
        json!({"type": "Div", "namespace": "html", "props": props})
    }

    struct Fixture {
        graph: DependencyGraph,
        layout: Layout,
        paths: PathIndex,
    }

    impl Fixture {
        fn new(callbacks: Value, children: Vec<Value>) -> Self {
            let graph = DependencyGraph::from_json(&callbacks.to_string()).unwrap();
            let layout = Layout::new(component(json!("root"), json!({"children": children})));
            let paths = PathIndex::build(&layout);
            Self { graph, layout, paths }
        }

        fn context<'a>(&'a mut self, persistence: &'a dyn Persistence) -> MergeContext<'a> {
            MergeContext {
                graph: &self.graph,
                layout: &mut self.layout,
                paths: &mut self.paths,
                persistence,
                reconciler: &StandardReconciler,
            }
        }

        fn instance(&self, id: &str, property: &str) -> CallbackInstance {
            Resolver::new(&self.graph, &self.paths)
                .callbacks_by_input(&id.into(), property, 1)
                .remove(0)
        }
    }

    #[test]
    fn responses_update_props_and_trigger_inputs() {
        let mut fixture = Fixture::new(
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
        let instance = fixture.instance("a", "value");
        let applied = fixture
            .context(&NoPersistence)
            .apply_response(&instance, CallbackResponse::new().set("b", "value", json!(5)), 2)
            .unwrap();
        assert_eq!(applied.updated, vec![PropId::new("b", "value")]);
        assert_eq!(applied.requested.len(), 1);
        assert_eq!(&*applied.requested[0].key, "c.value");
        let path = fixture.paths.get(&"b".into()).unwrap().clone();
        assert_eq!(fixture.layout.prop(&path, "value"), Some(&json!(5)));
    }

    #[test]
    fn mutations_require_a_mutable_output() {
        let mut fixture = Fixture::new(
            json!([{"output": "b.value", "inputs": [{"id": "a", "property": "value"}]}]),
            vec![component(json!("a"), json!({})), component(json!("b"), json!({"value": [1]}))],
        );
        let instance = fixture.instance("a", "value");
        let response = CallbackResponse::new().set(
            "b",
            "value",
            json!({"__mutation": true, "mutation": "append", "output": 2}),
        );
        let error = fixture
            .context(&NoPersistence)
            .apply_response(&instance, response, 2)
            .unwrap_err();
        assert!(matches!(error, MutationError::NotMutable { .. }));
        let path = fixture.paths.get(&"b".into()).unwrap().clone();
        assert_eq!(fixture.layout.prop(&path, "value"), Some(&json!([1])));
    }

    #[test]
    fn mutations_go_through_the_reconciler() {
        let mut fixture = Fixture::new(
            json!([{"output": "b.value", "inputs": [{"id": "a", "property": "value"}], "mutations": true}]),
            vec![component(json!("a"), json!({})), component(json!("b"), json!({"value": [1]}))],
        );
        let instance = fixture.instance("a", "value");
        let response = CallbackResponse::new().set(
            "b",
            "value",
            json!({"__mutation": true, "mutation": "append", "output": 2}),
        );
        fixture
            .context(&NoPersistence)
            .apply_response(&instance, response, 2)
            .unwrap();
        let path = fixture.paths.get(&"b".into()).unwrap().clone();
        assert_eq!(fixture.layout.prop(&path, "value"), Some(&json!([1, 2])));

        let bad = CallbackResponse::new().set("b", "value", json!({"__mutation": true, "mutation": 7}));
        let error = fixture.context(&NoPersistence).apply_response(&instance, bad, 3).unwrap_err();
        assert!(matches!(error, MutationError::InvalidOperation { .. }));
    }

    #[test]
    fn new_children_are_indexed_and_discovered() {
        let mut fixture = Fixture::new(
            json!([{"output": "label.children", "inputs": [{"id": "field", "property": "value"}]}]),
            vec![component(json!("holder"), json!({}))],
        );
        let children = json!([component(json!("field"), json!({"value": 1})), component(json!("label"), json!({}))]);
        let applied = fixture.context(&NoPersistence).apply_props(
            &"holder".into(),
            vec![("children".to_owned(), children)],
            4,
            ChangeSource::Callback,
        );
        assert!(fixture.paths.contains(&"field".into()));
        assert_eq!(applied.requested.len(), 1);
        assert!(applied.requested[0].initial_call);
    }

    #[test]
    fn user_edits_are_recorded_for_persistence() {
        let mut fixture = Fixture::new(
            json!([]),
            vec![component(json!("name"), json!({"value": "a", "persistence": 1}))],
        );
        let persistence = MemoryPersistence::new();
        fixture.context(&persistence).apply_props(
            &"name".into(),
            vec![("value".to_owned(), json!("b"))],
            1,
            ChangeSource::User,
        );
        assert_eq!(persistence.len(), 1);
    }
}
