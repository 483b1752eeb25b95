//! App definition and event script files.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use callflow::{CallbackSpec, ChangeSource, ComponentId, DependencyGraph, GraphError, PropertyChange};
use serde::Deserialize;
use serde_json::Value;

/// A server callback answered by a built-in function after a delay.
#[derive(Clone, Debug, Deserialize)]
pub struct ServerBinding {
    pub function: String,
    #[serde(default)]
    pub delay_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct AppCallback {
    #[serde(flatten)]
    pub spec: CallbackSpec,
    #[serde(default)]
    pub server: Option<ServerBinding>,
}

#[derive(Debug, Deserialize)]
pub struct AppFile {
    pub layout: Value,
    #[serde(default)]
    pub callbacks: Vec<AppCallback>,
}

impl AppFile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("invalid app file {}", path.display()))
    }

    pub fn specs(&self) -> Vec<CallbackSpec> {
        self.callbacks.iter().map(|callback| callback.spec.clone()).collect()
    }

    pub fn graph(&self) -> Result<DependencyGraph, Vec<GraphError>> {
        DependencyGraph::from_specs(&self.specs())
    }

    /// Server bindings by callback id (the output specification).
    pub fn bindings(&self) -> HashMap<String, ServerBinding> {
        self.callbacks
            .iter()
            .filter_map(|callback| Some((callback.spec.output.clone(), callback.server.clone()?)))
            .collect()
    }
}

fn user() -> ChangeSource {
    ChangeSource::User
}

/// One scripted property change.
#[derive(Debug, Deserialize)]
pub struct Event {
    pub id: Value,
    pub property: String,
    pub value: Value,
    #[serde(default = "user")]
    pub source: ChangeSource,
    /// Wait before dispatching.
    #[serde(default)]
    pub after_ms: u64,
}

impl Event {
    pub fn change(&self) -> Result<PropertyChange> {
        let id = ComponentId::from_json(&self.id).with_context(|| format!("invalid component id {}", self.id))?;
        Ok(PropertyChange::new(id, self.property.as_str(), self.value.clone(), self.source))
    }
}

pub fn load_events(path: &Path) -> Result<Vec<Event>> {
    let text = fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid events file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn server_bindings_are_keyed_by_output() {
        let app: AppFile = serde_json::from_value(json!({
            "layout": {"type": "Div", "namespace": "html", "props": {"id": "root"}},
            "callbacks": [
                {"output": "b.value", "inputs": [{"id": "a", "property": "value"}],
                 "server": {"function": "upper", "delay_ms": 20}},
                {"output": "c.value", "inputs": [{"id": "b", "property": "value"}],
                 "clientside_function": {"namespace": "builtin", "function_name": "identity"}}
            ]
        }))
        .unwrap();
        let bindings = app.bindings();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings["b.value"].delay_ms, 20);
        assert_eq!(app.graph().unwrap().len(), 2);
    }

    #[test]
    fn events_default_to_user_edits() {
        let events: Vec<Event> =
            serde_json::from_value(json!([{"id": {"type": "row", "index": 1}, "property": "value", "value": 3}])).unwrap();
        let change = events[0].change().unwrap();
        assert_eq!(change.source, ChangeSource::User);
        assert_eq!(change.id.stringify(), "{\"index\":1,\"type\":\"row\"}");
    }
}
