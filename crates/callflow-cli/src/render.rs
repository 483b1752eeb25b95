//! Text outline of a layout.
//!
//! Each component kind renders through its own `Renderable`; the kind is
//! picked from the component's `type` once, by `ComponentKind::of`.

use std::fmt::Write;

use callflow::layout::{LayoutPath, component_id, is_component};
use callflow::{Layout, LoadingMap};
use serde_json::{Map, Value};

pub trait Renderable {
    /// The props shown on the component's own line.
    fn summary(&self, props: &Map<String, Value>) -> Vec<String>;

    /// Props holding nested components, in render order.
    fn slots(&self) -> &'static [&'static str] {
        &["children"]
    }
}

struct Container;
struct Input;
struct Text;
struct Button;
struct Generic;

fn shown(props: &Map<String, Value>, names: &[&str]) -> Vec<String> {
    names
        .iter()
        .filter_map(|name| props.get(*name).map(|value| format!("{name}={value}")))
        .collect()
}

impl Renderable for Container {
    fn summary(&self, props: &Map<String, Value>) -> Vec<String> {
        shown(props, &["className"])
    }
}

impl Renderable for Input {
    fn summary(&self, props: &Map<String, Value>) -> Vec<String> {
        shown(props, &["value", "placeholder", "disabled"])
    }

    fn slots(&self) -> &'static [&'static str] {
        &[]
    }
}

impl Renderable for Text {
    fn summary(&self, props: &Map<String, Value>) -> Vec<String> {
        match props.get("children") {
            Some(Value::String(text)) => vec![format!("{text:?}")],
            Some(value) if !is_component(value) && !value.is_array() => vec![value.to_string()],
            _ => Vec::new(),
        }
    }
}

impl Renderable for Button {
    fn summary(&self, props: &Map<String, Value>) -> Vec<String> {
        let mut summary = shown(props, &["n_clicks"]);
        if let Some(Value::String(label)) = props.get("children") {
            summary.insert(0, format!("{label:?}"));
        }
        summary
    }
}

impl Renderable for Generic {
    fn summary(&self, props: &Map<String, Value>) -> Vec<String> {
        props
            .iter()
            .filter(|(name, value)| *name != "id" && !value.is_object() && !value.is_array())
            .map(|(name, value)| format!("{name}={value}"))
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ComponentKind {
    Container,
    Input,
    Text,
    Button,
    Other(String),
}

impl ComponentKind {
    pub fn of(component: &Value) -> Self {
        match component.get("type").and_then(Value::as_str).unwrap_or_default() {
            "Div" | "Section" | "Form" | "Row" | "Column" => ComponentKind::Container,
            "Input" | "Checkbox" | "Slider" | "Dropdown" => ComponentKind::Input,
            "Span" | "P" | "Label" | "H1" | "H2" | "H3" | "Markdown" => ComponentKind::Text,
            "Button" => ComponentKind::Button,
            other => ComponentKind::Other(other.to_owned()),
        }
    }

    pub fn renderer(&self) -> &'static dyn Renderable {
        match self {
            ComponentKind::Container => &Container,
            ComponentKind::Input => &Input,
            ComponentKind::Text => &Text,
            ComponentKind::Button => &Button,
            ComponentKind::Other(_) => &Generic,
        }
    }
}

/// Outline of the layout, one component per line. Components with pending
/// outputs are marked `[loading]`.
pub fn outline(layout: &Layout, loading: &LoadingMap) -> String {
    let mut out = String::new();
    render(layout.root(), &LayoutPath::root(), 0, loading, &mut out);
    out
}

fn render(value: &Value, path: &LayoutPath, depth: usize, loading: &LoadingMap, out: &mut String) {
    match value {
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                render(item, &path.index(index), depth, loading, out);
            }
        }
        component if is_component(component) => {
            let kind = ComponentKind::of(component);
            let renderer = kind.renderer();
            let empty = Map::new();
            let props = component.get("props").and_then(Value::as_object).unwrap_or(&empty);

            let mut line = component.get("type").and_then(Value::as_str).unwrap_or("?").to_owned();
            if let Some(id) = component_id(component) {
                let _ = write!(line, "#{}", id.stringify());
                let pending = loading
                    .at(path)
                    .is_some_and(|node| node.props.iter().any(|prop| prop.id == id));
                for item in renderer.summary(props) {
                    let _ = write!(line, " {item}");
                }
                if pending {
                    line.push_str(" [loading]");
                }
            } else {
                for item in renderer.summary(props) {
                    let _ = write!(line, " {item}");
                }
            }
            let _ = writeln!(out, "{}{line}", "  ".repeat(depth));

            for slot in renderer.slots() {
                if let Some(child) = props.get(*slot) {
                    render(child, &path.props_path(slot), depth + 1, loading, out);
                }
            }
        }
        _ => {}
    }
}
