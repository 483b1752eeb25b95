//! The live component tree.
//!
//! Components are JSON objects `{"type": .., "namespace": .., "props": {..}}`;
//! any prop may hold a component or an array of components. A component's
//! position is a `LayoutPath` of object fields and array indices from the root.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::ComponentId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathKey {
    Index(usize),
    Field(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayoutPath(pub Vec<PathKey>);

impl LayoutPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn child(&self, key: PathKey) -> Self {
        let mut keys = self.0.clone();
        keys.push(key);
        Self(keys)
    }

    pub fn field(&self, name: &str) -> Self {
        self.child(PathKey::Field(name.to_owned()))
    }

    pub fn index(&self, index: usize) -> Self {
        self.child(PathKey::Index(index))
    }

    /// Path of a prop value inside the component at this path.
    pub fn props_path(&self, property: &str) -> Self {
        self.field("props").field(property)
    }

    pub fn starts_with(&self, prefix: &LayoutPath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    pub fn keys(&self) -> &[PathKey] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for LayoutPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<root>");
        }
        for (position, key) in self.0.iter().enumerate() {
            match key {
                PathKey::Index(index) => write!(f, "[{index}]")?,
                PathKey::Field(name) if position == 0 => f.write_str(name)?,
                PathKey::Field(name) => write!(f, ".{name}")?,
            }
        }
        Ok(())
    }
}

pub fn is_component(value: &Value) -> bool {
    value.get("type").is_some_and(Value::is_string) && value.get("props").is_some_and(Value::is_object)
}

pub fn component_id(component: &Value) -> Option<ComponentId> {
    component.get("props")?.get("id").and_then(ComponentId::from_json)
}

/// True when the value is, or contains, at least one component.
pub fn contains_components(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.iter().any(contains_components),
        other => is_component(other),
    }
}

/// Visit every component in `value` (depth first, parents before children).
pub fn crawl(value: &Value, path: &LayoutPath, visit: &mut impl FnMut(&Value, &LayoutPath)) {
    match value {
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                crawl(item, &path.index(index), visit);
            }
        }
        component if is_component(component) => {
            visit(component, path);
            if let Some(Value::Object(props)) = component.get("props") {
                for (property, prop_value) in props {
                    crawl(prop_value, &path.props_path(property), visit);
                }
            }
        }
        _ => {}
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Layout {
    root: Value,
}

impl Layout {
    pub fn new(root: Value) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn into_value(self) -> Value {
        self.root
    }

    pub fn get(&self, path: &LayoutPath) -> Option<&Value> {
        path.keys().iter().try_fold(&self.root, |value, key| match key {
            PathKey::Index(index) => value.get(*index),
            PathKey::Field(name) => value.get(name.as_str()),
        })
    }

    pub fn get_mut(&mut self, path: &LayoutPath) -> Option<&mut Value> {
        path.keys().iter().try_fold(&mut self.root, |value, key| match key {
            PathKey::Index(index) => value.get_mut(*index),
            PathKey::Field(name) => value.get_mut(name.as_str()),
        })
    }

    /// The component at `path`, if the path still points at one.
    pub fn component(&self, path: &LayoutPath) -> Option<&Value> {
        self.get(path).filter(|value| is_component(value))
    }

    pub fn prop(&self, path: &LayoutPath, property: &str) -> Option<&Value> {
        self.component(path)?.get("props")?.get(property)
    }

    /// Replace one prop, returning the previous value (`Null` if unset).
    /// `None` when the path no longer points at a component.
    pub fn set_prop(&mut self, path: &LayoutPath, property: &str, value: Value) -> Option<Value> {
        let component = self.get_mut(path)?;
        let props = component.get_mut("props")?.as_object_mut()?;
        Some(props.insert(property.to_owned(), value).unwrap_or(Value::Null))
    }
}
