//! Index from component ids to their current layout paths.

use std::collections::HashMap;

use crate::id::{ComponentId, IdValue};
use crate::layout::{self, Layout, LayoutPath};

/// A mounted component with an object id.
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectEntry {
    pub id: ComponentId,
    /// Id values in sorted key order, aligned with the key signature.
    pub values: Vec<IdValue>,
    pub path: LayoutPath,
}

/// String ids map directly to paths; object ids are grouped by key signature
/// so wildcard patterns only scan components with the same keys.
#[derive(Clone, Debug, Default)]
pub struct PathIndex {
    strs: HashMap<String, LayoutPath>,
    objs: HashMap<String, Vec<ObjectEntry>>,
}

impl PathIndex {
    pub fn build(layout: &Layout) -> Self {
        let mut index = Self::default();
        index.crawl_into(layout.root(), &LayoutPath::root());
        index
    }

    /// Copy of this index with everything under `base` replaced by the
    /// components found in `subtree`, which now lives at `base`.
    pub fn with_subtree(&self, subtree: &serde_json::Value, base: &LayoutPath) -> Self {
        let mut index = self.clone();
        index.strs.retain(|_, path| !path.starts_with(base));
        for entries in index.objs.values_mut() {
            entries.retain(|entry| !entry.path.starts_with(base));
        }
        index.objs.retain(|_, entries| !entries.is_empty());
        index.crawl_into(subtree, base);
        index
    }

    fn crawl_into(&mut self, value: &serde_json::Value, base: &LayoutPath) {
        layout::crawl(value, base, &mut |component, path| {
            match layout::component_id(component) {
                Some(ComponentId::Str(id)) => {
                    self.strs.insert(id, path.clone());
                }
                Some(id @ ComponentId::Obj(_)) => {
                    let signature = id.key_signature().unwrap_or_default();
                    let values = id.values();
                    self.objs.entry(signature).or_default().push(ObjectEntry {
                        id,
                        values,
                        path: path.clone(),
                    });
                }
                None => {}
            }
        });
    }

    pub fn get(&self, id: &ComponentId) -> Option<&LayoutPath> {
        match id {
            ComponentId::Str(id) => self.strs.get(id),
            ComponentId::Obj(_) => {
                let signature = id.key_signature()?;
                self.objs
                    .get(&signature)?
                    .iter()
                    .find(|entry| &entry.id == id)
                    .map(|entry| &entry.path)
            }
        }
    }

    pub fn contains(&self, id: &ComponentId) -> bool {
        self.get(id).is_some()
    }

    /// Mounted components whose object id has exactly these keys.
    pub fn objects(&self, signature: &str) -> &[ObjectEntry] {
        self.objs.get(signature).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every mounted id with its path.
    pub fn iter(&self) -> impl Iterator<Item = (ComponentId, &LayoutPath)> {
        self.strs
            .iter()
            .map(|(id, path)| (ComponentId::Str(id.clone()), path))
            .chain(
                self.objs
                    .values()
                    .flatten()
                    .map(|entry| (entry.id.clone(), &entry.path)),
            )
    }

    pub fn len(&self) -> usize {
        self.strs.len() + self.objs.values().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(index: i64) -> serde_json::Value {
        json!({"type": "Input", "namespace": "core", "props": {"id": {"type": "item", "index": index}}})
    }

    #[test]
    fn indexes_string_and_object_ids() {
        let layout = Layout::new(json!({
            "type": "Div", "namespace": "html",
            "props": {"id": "list", "children": [item(0), item(1)]}
        }));
        let paths = PathIndex::build(&layout);
        assert_eq!(paths.get(&"list".into()), Some(&LayoutPath::root()));
        assert_eq!(paths.objects("index,type").len(), 2);
        let second = ComponentId::from_json(&json!({"type": "item", "index": 1})).unwrap();
        assert_eq!(
            paths.get(&second),
            Some(&LayoutPath::root().props_path("children").index(1))
        );
    }

    #[test]
    fn subtree_replacement_drops_old_entries() {
        let layout = Layout::new(json!({
            "type": "Div", "namespace": "html",
            "props": {"id": "list", "children": [item(0), item(1)]}
        }));
        let paths = PathIndex::build(&layout);
        let base = LayoutPath::root().props_path("children");
        let updated = paths.with_subtree(&json!([item(5)]), &base);
        assert_eq!(updated.objects("index,type").len(), 1);
        assert_eq!(updated.objects("index,type")[0].values[0], IdValue::Int(5));
        assert!(updated.contains(&"list".into()));
        // The original index is untouched.
        assert_eq!(paths.objects("index,type").len(), 2);
    }
}
