//! Serializable view of the queue state, for tracing and debugging.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::callback::CallbackInstance;
use crate::queue::{Queue, QueueState, QueuedCallback};

/// A serializable snapshot of the seven queues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Version for migration support
    pub version: u32,
    pub tick: u64,
    pub completed: u64,
    /// Queue name -> entries in queue order
    pub queues: BTreeMap<String, Vec<SnapshotEntry>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub key: String,
    pub priority: String,
    pub initial_call: bool,
    pub execution_groups: Vec<String>,
    pub predecessors: Vec<String>,
    pub changed_props: BTreeMap<String, u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket: Option<u64>,
}

impl SnapshotEntry {
    fn capture(entry: &QueuedCallback) -> Self {
        let instance: &CallbackInstance = &entry.instance;
        Self {
            key: instance.key.to_string(),
            priority: instance.priority.to_string(),
            initial_call: instance.initial_call,
            execution_groups: instance.execution_groups.iter().map(ToString::to_string).collect(),
            predecessors: instance.predecessors.iter().map(ToString::to_string).collect(),
            changed_props: instance
                .changed_props
                .iter()
                .map(|(prop, version)| (prop.to_string(), *version))
                .collect(),
            ticket: entry.ticket.map(|ticket| ticket.0),
        }
    }
}

impl QueueSnapshot {
    /// Current snapshot version.
    pub const VERSION: u32 = 1;

    pub fn capture(state: &QueueState, tick: u64) -> Self {
        Self {
            version: Self::VERSION,
            tick,
            completed: state.completed(),
            queues: Queue::ALL
                .into_iter()
                .map(|queue| {
                    let entries = state.entries(queue).map(|(_, entry)| SnapshotEntry::capture(entry)).collect();
                    (queue.name().to_owned(), entries)
                })
                .collect(),
        }
    }

    /// Entries across all queues.
    pub fn len(&self) -> usize {
        self.queues.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self, queue: Queue) -> Vec<&str> {
        self.queues
            .get(queue.name())
            .map(|entries| entries.iter().map(|entry| entry.key.as_str()).collect())
            .unwrap_or_default()
    }
}
