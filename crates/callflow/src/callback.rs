//! Callback instances: declarations materialized against the live layout.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use smallvec::SmallVec;
use ulid::Ulid;

use crate::graph::{CallbackDeclaration, CallbackId};
use crate::id::{ComponentId, IdValue, KeyPattern, PropId};
use crate::layout::LayoutPath;

/// Identity used for deduplication: declaration id plus `MATCH` values.
pub type CallbackKey = Arc<str>;

/// A concrete component property resolved from a dependency.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct PropRef {
    pub id: ComponentId,
    pub property: String,
    pub path: LayoutPath,
}

impl PropRef {
    pub fn prop_id(&self) -> PropId {
        PropId::new(self.id.clone(), self.property.as_str())
    }
}

/// Resolution of one declared dependency.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum Resolved {
    Single(PropRef),
    /// `ALL` / `ALLSMALLER` dependency: every matching component, possibly none.
    Multi(Vec<PropRef>),
}

impl Resolved {
    pub fn props(&self) -> &[PropRef] {
        match self {
            Resolved::Single(prop) => std::slice::from_ref(prop),
            Resolved::Multi(props) => props,
        }
    }
}

/// The wildcard reference a dependency is resolved against: key names,
/// concrete values and the pattern values they were matched with.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MatchRef {
    pub keys: Vec<String>,
    pub values: Vec<IdValue>,
    pub patterns: Vec<KeyPattern>,
}

/// Token shared by every instance spawned from one triggering event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecutionGroup(pub Ulid);

impl ExecutionGroup {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ExecutionGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecutionGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for ExecutionGroup {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

/// Depth of the downstream callback chain followed by the number of
/// callbacks at each level, each capped at 35. Compared lexicographically;
/// higher runs first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Priority(pub SmallVec<[u8; 8]>);

impl Priority {
    pub const CAP: usize = 35;

    pub fn from_levels(levels: &[usize]) -> Self {
        let mut digits = SmallVec::new();
        digits.push(levels.len().min(Self::CAP) as u8);
        digits.extend(levels.iter().map(|count| (*count).min(Self::CAP) as u8));
        Self(digits)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for digit in &self.0 {
            let character = char::from_digit(u32::from(*digit), 36).unwrap_or('z');
            write!(f, "{character}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CallbackInstance {
    pub callback: Arc<CallbackDeclaration>,
    /// Output-side reference that inputs and state were resolved against.
    pub match_ref: Option<MatchRef>,
    pub any_vals: Vec<IdValue>,
    pub resolved_inputs: Vec<Resolved>,
    pub resolved_outputs: Vec<Resolved>,
    pub resolved_state: Vec<Resolved>,
    pub key: CallbackKey,
    pub predecessors: SmallVec<[CallbackId; 4]>,
    pub execution_groups: SmallVec<[ExecutionGroup; 1]>,
    pub priority: Priority,
    /// Triggering props with the version of the change that touched them.
    pub changed_props: IndexMap<PropId, u64>,
    /// Discovered by mounting its outputs rather than by a property change.
    pub initial_call: bool,
}

impl CallbackInstance {
    pub fn new(
        callback: Arc<CallbackDeclaration>,
        match_ref: Option<MatchRef>,
        any_vals: Vec<IdValue>,
        resolved_inputs: Vec<Resolved>,
        resolved_outputs: Vec<Resolved>,
        resolved_state: Vec<Resolved>,
    ) -> Self {
        let key = unique_key(&callback.id, &any_vals);
        Self {
            callback,
            match_ref,
            any_vals,
            resolved_inputs,
            resolved_outputs,
            resolved_state,
            key,
            predecessors: SmallVec::new(),
            execution_groups: SmallVec::new(),
            priority: Priority::default(),
            changed_props: IndexMap::new(),
            initial_call: false,
        }
    }

    pub fn input_props(&self) -> impl Iterator<Item = &PropRef> {
        self.resolved_inputs.iter().flat_map(Resolved::props)
    }

    pub fn output_props(&self) -> impl Iterator<Item = &PropRef> {
        self.resolved_outputs.iter().flat_map(Resolved::props)
    }

    pub fn state_props(&self) -> impl Iterator<Item = &PropRef> {
        self.resolved_state.iter().flat_map(Resolved::props)
    }

    pub fn input_ids(&self) -> Vec<PropId> {
        self.input_props().map(PropRef::prop_id).collect()
    }

    pub fn output_ids(&self) -> Vec<PropId> {
        self.output_props().map(PropRef::prop_id).collect()
    }

    pub fn state_ids(&self) -> Vec<PropId> {
        self.state_props().map(PropRef::prop_id).collect()
    }

    /// Its own declaration is among its causes.
    pub fn is_circular(&self) -> bool {
        self.predecessors.contains(&self.callback.id)
    }

    /// Some declared input resolves to a list of components.
    pub fn has_multi_valued_input(&self) -> bool {
        self.callback.inputs.iter().any(|input| input.id.is_multi())
    }

    /// Every component touched as input, state or output.
    pub fn component_ids(&self) -> Vec<ComponentId> {
        let mut ids: Vec<ComponentId> = self
            .input_props()
            .chain(self.state_props())
            .chain(self.output_props())
            .map(|prop| prop.id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn in_group(&self, group: &ExecutionGroup) -> bool {
        self.execution_groups.contains(group)
    }

    pub fn with_group(mut self, group: ExecutionGroup) -> Self {
        if !self.execution_groups.contains(&group) {
            self.execution_groups.push(group);
        }
        self
    }

    pub fn with_predecessors(mut self, predecessors: impl IntoIterator<Item = CallbackId>) -> Self {
        self.predecessors.extend(predecessors);
        self
    }

    /// Record a triggering change, keeping the newest version per prop.
    pub fn mark_changed(&mut self, prop: PropId, version: u64) {
        let entry = self.changed_props.entry(prop).or_insert(version);
        *entry = (*entry).max(version);
    }
}

pub fn unique_key(callback: &CallbackId, any_vals: &[IdValue]) -> CallbackKey {
    if any_vals.is_empty() {
        callback.clone()
    } else {
        let values: Vec<_> = any_vals.iter().map(IdValue::to_json).collect();
        Arc::from(format!("{callback}{}", serde_json::Value::Array(values)))
    }
}
