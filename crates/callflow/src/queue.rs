//! The seven lifecycle queues and their only mutation primitive, `Batch`.
//!
//! Every transition is computed as a batch of add/remove actions against a
//! read-only `QueueState` and applied in one step.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::arena::{Arena, SlotId};
use crate::callback::{CallbackInstance, CallbackKey};
use crate::id::PropId;
use crate::runner::CallbackOutcome;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Queue {
    Requested,
    Prioritized,
    Blocked,
    Executing,
    Watched,
    Executed,
    Stored,
}

impl Queue {
    pub const ALL: [Queue; 7] = [
        Queue::Requested,
        Queue::Prioritized,
        Queue::Blocked,
        Queue::Executing,
        Queue::Watched,
        Queue::Executed,
        Queue::Stored,
    ];

    /// Queues whose members have not completed yet.
    pub const PENDING: [Queue; 6] = [
        Queue::Requested,
        Queue::Prioritized,
        Queue::Blocked,
        Queue::Executing,
        Queue::Watched,
        Queue::Executed,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Queue::Requested => "requested",
            Queue::Prioritized => "prioritized",
            Queue::Blocked => "blocked",
            Queue::Executing => "executing",
            Queue::Watched => "watched",
            Queue::Executed => "executed",
            Queue::Stored => "stored",
        }
    }
}

impl fmt::Display for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identifies a suspended continuation (a `blocked` or `watched` entry).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Ticket(pub u64);

/// Execution state attached in `executing`.
#[derive(Clone, Debug)]
pub enum Execution {
    Pending,
    Finished(CallbackOutcome),
}

/// What one completed instance could have updated and what it did update.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ExecutionMeta {
    pub all_props: Vec<PropId>,
    pub updated_props: Vec<PropId>,
}

#[derive(Clone, Debug)]
pub struct QueuedCallback {
    pub instance: CallbackInstance,
    pub ticket: Option<Ticket>,
    pub execution: Option<Execution>,
    pub meta: Option<ExecutionMeta>,
}

impl QueuedCallback {
    pub fn new(instance: CallbackInstance) -> Self {
        Self {
            instance,
            ticket: None,
            execution: None,
            meta: None,
        }
    }

    pub fn key(&self) -> &CallbackKey {
        &self.instance.key
    }
}

#[derive(Clone, Debug)]
pub enum QueueAction {
    Add(Queue, QueuedCallback),
    Remove(Queue, SlotId),
    Completed(u64),
}

/// Actions computed by one transition, applied together.
#[derive(Clone, Debug, Default)]
pub struct Batch {
    actions: Vec<QueueAction>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, queue: Queue, callback: QueuedCallback) {
        self.actions.push(QueueAction::Add(queue, callback));
    }

    pub fn add_instance(&mut self, queue: Queue, instance: CallbackInstance) {
        self.add(queue, QueuedCallback::new(instance));
    }

    pub fn remove(&mut self, queue: Queue, slot: SlotId) {
        let already = self
            .actions
            .iter()
            .any(|action| matches!(action, QueueAction::Remove(q, s) if *q == queue && *s == slot));
        if !already {
            self.actions.push(QueueAction::Remove(queue, slot));
        }
    }

    /// Move an entry, replacing its payload.
    pub fn transfer(&mut self, from: Queue, slot: SlotId, to: Queue, callback: QueuedCallback) {
        self.remove(from, slot);
        self.add(to, callback);
    }

    pub fn completed(&mut self, count: u64) {
        if count > 0 {
            self.actions.push(QueueAction::Completed(count));
        }
    }

    /// Add instances to `requested`, evicting entries with the same key from
    /// every later queue so a key never sits in two queues.
    pub fn request(&mut self, state: &QueueState, instances: impl IntoIterator<Item = CallbackInstance>) {
        for instance in instances {
            for queue in Queue::ALL.into_iter().skip(1) {
                for (slot, entry) in state.entries(queue) {
                    if entry.instance.key == instance.key {
                        log::debug!("{} supersedes its {queue} entry", instance.key);
                        self.remove(queue, slot);
                    }
                }
            }
            self.add_instance(Queue::Requested, instance);
        }
    }

    pub fn extend(&mut self, other: Batch) {
        for action in other.actions {
            match action {
                QueueAction::Remove(queue, slot) => self.remove(queue, slot),
                other => self.actions.push(other),
            }
        }
    }

    pub fn actions(&self) -> &[QueueAction] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Record of one applied action.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Applied {
    pub action: AppliedKind,
    pub queue: Option<Queue>,
    pub key: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AppliedKind {
    Added,
    Removed,
    Completed,
}

struct Entry {
    queue: Queue,
    callback: QueuedCallback,
}

pub struct QueueState {
    entries: Arena<Entry>,
    queues: [Vec<SlotId>; 7],
    completed: u64,
}

impl Default for QueueState {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueState {
    pub fn new() -> Self {
        Self {
            entries: Arena::new(),
            queues: Default::default(),
            completed: 0,
        }
    }

    /// Entries of one queue in insertion order.
    pub fn entries(&self, queue: Queue) -> impl Iterator<Item = (SlotId, &QueuedCallback)> {
        self.queues[queue.index()]
            .iter()
            .filter_map(|slot| self.entries.get(*slot).map(|entry| (*slot, &entry.callback)))
    }

    pub fn instances(&self, queue: Queue) -> impl Iterator<Item = &CallbackInstance> {
        self.entries(queue).map(|(_, entry)| &entry.instance)
    }

    pub fn get(&self, slot: SlotId) -> Option<&QueuedCallback> {
        self.entries.get(slot).map(|entry| &entry.callback)
    }

    pub fn contains(&self, queue: Queue, slot: SlotId) -> bool {
        self.entries.get(slot).is_some_and(|entry| entry.queue == queue)
    }

    pub fn len(&self, queue: Queue) -> usize {
        self.queues[queue.index()].len()
    }

    /// Nothing left to run.
    pub fn is_idle(&self) -> bool {
        Queue::PENDING.iter().all(|queue| self.queues[queue.index()].is_empty())
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn find_ticket(&self, queue: Queue, ticket: Ticket) -> Option<SlotId> {
        self.entries(queue)
            .find(|(_, entry)| entry.ticket == Some(ticket))
            .map(|(slot, _)| slot)
    }

    /// Instances that have not completed.
    pub fn pending_instances(&self) -> impl Iterator<Item = &CallbackInstance> {
        Queue::PENDING.into_iter().flat_map(|queue| self.instances(queue))
    }

    /// Apply a batch in order. Removals of entries no longer in the named
    /// queue are skipped, so replaying a batch never double-applies.
    pub fn apply(&mut self, batch: Batch) -> Vec<Applied> {
        let mut applied = Vec::with_capacity(batch.len());
        for action in batch.actions {
            match action {
                QueueAction::Add(queue, callback) => {
                    let key = callback.instance.key.to_string();
                    let slot = self.entries.alloc(Entry { queue, callback });
                    self.queues[queue.index()].push(slot);
                    applied.push(Applied {
                        action: AppliedKind::Added,
                        queue: Some(queue),
                        key: Some(key),
                    });
                }
                QueueAction::Remove(queue, slot) => {
                    if !self.contains(queue, slot) {
                        continue;
                    }
                    self.queues[queue.index()].retain(|s| *s != slot);
                    if let Some(entry) = self.entries.free(slot) {
                        applied.push(Applied {
                            action: AppliedKind::Removed,
                            queue: Some(queue),
                            key: Some(entry.callback.instance.key.to_string()),
                        });
                    }
                }
                QueueAction::Completed(count) => {
                    self.completed += count;
                    applied.push(Applied {
                        action: AppliedKind::Completed,
                        queue: None,
                        key: None,
                    });
                }
            }
        }
        applied
    }

    /// Keys present in more than one queue (or twice in one queue other than
    /// `requested`, where duplicates wait for the dedup pass).
    pub fn check_disjoint(&self) -> Vec<CallbackKey> {
        let mut seen: HashMap<CallbackKey, Queue> = HashMap::new();
        let mut violations = Vec::new();
        for queue in Queue::ALL {
            for instance in self.instances(queue) {
                match seen.insert(instance.key.clone(), queue) {
                    Some(Queue::Requested) if queue == Queue::Requested => {}
                    Some(_) => violations.push(instance.key.clone()),
                    None => {}
                }
            }
        }
        violations.sort();
        violations.dedup();
        violations
    }

    pub fn sizes(&self) -> [(Queue, usize); 7] {
        Queue::ALL.map(|queue| (queue, self.len(queue)))
    }
}
