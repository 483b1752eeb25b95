//! Transition ledger.
//!
//! Records every dispatched change and applied queue action for tracing.

use serde::Serialize;

use crate::merger::ChangeSource;
use crate::queue::Applied;

/// A recorded entry
#[derive(Debug, Clone, Serialize)]
pub struct LedgerEntry {
    /// The tick when this happened
    pub tick: u64,
    #[serde(flatten)]
    pub kind: LedgerKind,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerKind {
    /// A property change entered the scheduler
    Dispatched { prop: String, source: ChangeSource },
    /// One queue action applied by an observer
    Transition {
        observer: &'static str,
        #[serde(flatten)]
        change: Applied,
    },
}

#[derive(Debug, Default)]
pub struct Ledger {
    entries: Vec<LedgerEntry>,
    enabled: bool,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn record(&mut self, tick: u64, kind: LedgerKind) {
        if self.enabled {
            self.entries.push(LedgerEntry { tick, kind });
        }
    }

    pub fn record_applied(&mut self, tick: u64, observer: &'static str, applied: Vec<Applied>) {
        if self.enabled {
            self.entries.extend(applied.into_iter().map(|change| LedgerEntry {
                tick,
                kind: LedgerKind::Transition { observer, change },
            }));
        }
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries_for_tick(&self, tick: u64) -> Vec<&LedgerEntry> {
        self.entries.iter().filter(|e| e.tick == tick).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{AppliedKind, Queue};

    fn added(key: &str) -> Applied {
        Applied {
            action: AppliedKind::Added,
            queue: Some(Queue::Requested),
            key: Some(key.to_owned()),
        }
    }

    #[test]
    fn disabled_ledger_records_nothing() {
        let mut ledger = Ledger::new();
        ledger.record_applied(1, "requested", vec![added("a.value")]);
        assert!(ledger.entries().is_empty());
    }

    #[test]
    fn entries_are_grouped_by_tick() {
        let mut ledger = Ledger::new();
        ledger.enable();
        ledger.record(
            1,
            LedgerKind::Dispatched {
                prop: "a.value".into(),
                source: ChangeSource::User,
            },
        );
        ledger.record_applied(2, "requested", vec![added("b.value"), added("c.value")]);
        assert_eq!(ledger.entries_for_tick(2).len(), 2);

        let json = serde_json::to_value(&ledger.entries()[1]).unwrap();
        assert_eq!(json["kind"], "transition");
        assert_eq!(json["observer"], "requested");
        assert_eq!(json["queue"], "requested");
    }
}
