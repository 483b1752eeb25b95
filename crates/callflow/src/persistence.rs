//! Persisted user edits.
//!
//! A component opts in with a truthy `persistence` prop; `persisted_props`
//! lists the props to keep (default `["value"]`). A user edit is stored with
//! the value it replaced and re-applied whenever the component is mounted
//! again with that same original value.

use std::cell::RefCell;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::ComponentId;
use crate::layout;

pub trait Persistence {
    /// A user is about to set `property` of `component` to `value`.
    fn record_edit(&self, component: &Value, property: &str, value: &Value);
    /// Re-apply stored edits to the components of a newly mounted chunk.
    fn apply(&self, chunk: Value) -> Value;
    /// A callback wrote `property`; a stored edit of it no longer holds.
    fn prune(&self, component: &Value, property: &str);
}

#[derive(Default)]
pub struct NoPersistence;

impl Persistence for NoPersistence {
    fn record_edit(&self, _component: &Value, _property: &str, _value: &Value) {}

    fn apply(&self, chunk: Value) -> Value {
        chunk
    }

    fn prune(&self, _component: &Value, _property: &str) {}
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedEdit {
    pub original: Value,
    pub modified: Value,
}

struct Settings {
    id: ComponentId,
    persistence: Value,
    props: Vec<String>,
}

fn settings(component: &Value) -> Option<Settings> {
    let props = component.get("props")?;
    let persistence = props.get("persistence")?;
    let enabled = match persistence {
        Value::Null | Value::Bool(false) => false,
        Value::String(text) => !text.is_empty(),
        _ => true,
    };
    if !enabled {
        return None;
    }
    let persisted = match props.get("persisted_props") {
        Some(Value::Array(items)) => items.iter().filter_map(|item| item.as_str().map(str::to_owned)).collect(),
        _ => vec!["value".to_owned()],
    };
    Some(Settings {
        id: layout::component_id(component)?,
        persistence: persistence.clone(),
        props: persisted,
    })
}

fn storage_key(settings: &Settings, property: &str) -> String {
    format!("{}.{property}::{}", settings.id.stringify(), settings.persistence)
}

/// Edits kept in memory, exportable as JSON.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    edits: RefCell<BTreeMap<String, PersistedEdit>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn export(&self) -> Value {
        serde_json::to_value(&*self.edits.borrow()).unwrap_or(Value::Null)
    }

    pub fn import(value: Value) -> Result<Self, serde_json::Error> {
        Ok(Self {
            edits: RefCell::new(serde_json::from_value(value)?),
        })
    }

    pub fn len(&self) -> usize {
        self.edits.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.borrow().is_empty()
    }

    fn apply_in_place(&self, value: &mut Value) {
        match value {
            Value::Array(items) => items.iter_mut().for_each(|item| self.apply_in_place(item)),
            component if layout::is_component(component) => {
                if let Some(settings) = settings(component) {
                    self.restore(&settings, component);
                }
                if let Some(Value::Object(props)) = component.get_mut("props") {
                    props.values_mut().for_each(|prop| self.apply_in_place(prop));
                }
            }
            _ => {}
        }
    }

    fn restore(&self, settings: &Settings, component: &mut Value) {
        let Some(Value::Object(props)) = component.get_mut("props") else {
            return;
        };
        let mut edits = self.edits.borrow_mut();
        for property in &settings.props {
            let key = storage_key(settings, property);
            let Some(edit) = edits.get(&key) else {
                continue;
            };
            let current = props.get(property).cloned().unwrap_or(Value::Null);
            if current == edit.original {
                log::debug!("restoring persisted {}.{property}", settings.id);
                props.insert(property.clone(), edit.modified.clone());
            } else {
                edits.remove(&key);
            }
        }
    }
}

impl Persistence for MemoryPersistence {
    fn record_edit(&self, component: &Value, property: &str, value: &Value) {
        let Some(settings) = settings(component) else {
            return;
        };
        if !settings.props.iter().any(|persisted| persisted == property) {
            return;
        }
        let current = component
            .get("props")
            .and_then(|props| props.get(property))
            .cloned()
            .unwrap_or(Value::Null);
        let key = storage_key(&settings, property);
        let mut edits = self.edits.borrow_mut();
        let original = edits.get(&key).map(|edit| edit.original.clone()).unwrap_or(current);
        if original == *value {
            edits.remove(&key);
        } else {
            edits.insert(
                key,
                PersistedEdit {
                    original,
                    modified: value.clone(),
                },
            );
        }
    }

    fn apply(&self, mut chunk: Value) -> Value {
        if !self.is_empty() {
            self.apply_in_place(&mut chunk);
        }
        chunk
    }

    fn prune(&self, component: &Value, property: &str) {
        if let Some(settings) = settings(component) {
            self.edits.borrow_mut().remove(&storage_key(&settings, property));
        }
    }
}
