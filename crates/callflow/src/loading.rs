//! Loading annotations for the component tree.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::callback::CallbackInstance;
use crate::id::PropId;
use crate::layout::{LayoutPath, PathKey};

/// Tree mirroring the layout paths of pending outputs. Every node lists the
/// pending props at or below it.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct LoadingMap {
    pub props: BTreeSet<PropId>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<PathKey, LoadingMap>,
}

impl LoadingMap {
    pub fn build<'a>(pending: impl IntoIterator<Item = &'a CallbackInstance>) -> Self {
        let mut map = Self::default();
        for instance in pending {
            for output in instance.output_props() {
                let prop = output.prop_id();
                let mut node = &mut map;
                node.props.insert(prop.clone());
                for key in output.path.keys() {
                    node = node.children.entry(key.clone()).or_default();
                    node.props.insert(prop.clone());
                }
            }
        }
        map
    }

    pub fn at(&self, path: &LayoutPath) -> Option<&LoadingMap> {
        path.keys().iter().try_fold(self, |node, key| node.children.get(key))
    }

    pub fn is_loading(&self) -> bool {
        !self.props.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_harness::{Fixture, component};
    use serde_json::json;

    #[test]
    fn ancestors_aggregate_pending_props() {
        let fixture = Fixture::new(
            json!([{"output": "b.value", "inputs": [{"id": "a", "property": "value"}]}]),
            vec![
                component(json!("a"), json!({})),
                component(json!("box"), json!({"children": component(json!("b"), json!({}))})),
            ],
        );
        let pending = fixture.by_input("a", "value", 1);
        let map = LoadingMap::build(&pending);
        assert!(map.is_loading());

        let b_path = fixture.paths.get(&"b".into()).unwrap().clone();
        let box_path = fixture.paths.get(&"box".into()).unwrap().clone();
        let a_path = fixture.paths.get(&"a".into()).unwrap().clone();
        assert!(map.at(&b_path).unwrap().props.contains(&PropId::new("b", "value")));
        assert!(map.at(&box_path).unwrap().is_loading());
        assert!(map.at(&a_path).is_none());
    }
}
