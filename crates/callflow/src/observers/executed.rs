//! `executed → stored`: merge results into the layout and request what the
//! changes trigger.

use std::collections::HashSet;

use crate::callback::{CallbackInstance, CallbackKey, ExecutionGroup};
use crate::error::{CallbackError, ErrorReport, ErrorReporter, MutationError};
use crate::merger::MergeContext;
use crate::queue::{Batch, Execution, ExecutionMeta, Queue, QueueState, QueuedCallback};

/// Transitions of one pass, and the declaration error that stopped it.
#[derive(Debug, Default)]
pub struct Completion {
    pub batch: Batch,
    pub error: Option<MutationError>,
}

pub fn report(instance: &CallbackInstance, error: &CallbackError) -> ErrorReport {
    ErrorReport {
        callback: instance.callback.id.to_string(),
        outputs: instance.output_ids().iter().map(ToString::to_string).collect(),
        function: instance.callback.function_name(),
        message: error.to_string(),
    }
}

/// Retire executed instances in order. Each completion bumps `version`.
/// A mutation error retires the offending instance and ends the pass.
///
/// Stores are written last: a completion later in the pass may request an
/// instance that already completed, and then it must not be stored.
pub fn run(
    state: &QueueState,
    merge: &mut MergeContext<'_>,
    reporter: &dyn ErrorReporter,
    version: &mut u64,
) -> Completion {
    let mut completion = Completion::default();
    let mut superseded: HashSet<CallbackKey> = HashSet::new();
    let mut finished: Vec<(&CallbackInstance, ExecutionMeta)> = Vec::new();

    for (slot, entry) in state.entries(Queue::Executed) {
        let Some(Execution::Finished(outcome)) = &entry.execution else {
            continue;
        };
        let instance = &entry.instance;
        if superseded.contains(&instance.key) {
            log::debug!("discarding the result of {}: requested again", instance.key);
            continue;
        }
        *version += 1;

        let (updated, requested) = match outcome {
            Ok(response) => match merge.apply_response(instance, response.clone(), *version) {
                Ok(applied) => (applied.updated, applied.requested),
                Err(error) => {
                    completion.batch.remove(Queue::Executed, slot);
                    completion.batch.completed(1);
                    completion.error = Some(error);
                    break;
                }
            },
            Err(error) => {
                reporter.report(report(instance, error));
                (Vec::new(), Vec::new())
            }
        };

        let group = ExecutionGroup::new();
        let mut causes = instance.predecessors.clone();
        causes.push(instance.callback.id.clone());
        let fresh: Vec<CallbackInstance> = requested
            .into_iter()
            .map(|next| {
                let mut next = next.with_group(group);
                next.predecessors = causes.clone();
                next
            })
            .filter(|next| {
                let circular = next.is_circular();
                if circular {
                    log::debug!("not requesting {}: it caused itself", next.key);
                }
                !circular
            })
            .collect();
        superseded.extend(fresh.iter().map(|next| next.key.clone()));

        completion.batch.remove(Queue::Executed, slot);
        completion.batch.completed(1);
        finished.push((
            instance,
            ExecutionMeta {
                all_props: instance.output_ids(),
                updated_props: updated,
            },
        ));
        completion.batch.request(state, fresh);
    }

    for (instance, meta) in finished {
        if superseded.contains(&instance.key) {
            log::debug!("not storing {}: requested again in this pass", instance.key);
            continue;
        }
        store(state, &mut completion.batch, instance, meta);
    }
    completion
}

/// Keep the metadata for the group relevance rule. An older stored entry
/// with the same key is folded into the new one.
fn store(state: &QueueState, batch: &mut Batch, instance: &CallbackInstance, mut meta: ExecutionMeta) {
    let mut stored = QueuedCallback::new(instance.clone());
    for (slot, older) in state.entries(Queue::Stored) {
        if older.instance.key != instance.key {
            continue;
        }
        batch.remove(Queue::Stored, slot);
        for group in &older.instance.execution_groups {
            stored.instance = stored.instance.with_group(*group);
        }
        if let Some(older_meta) = &older.meta {
            meta.all_props.extend(older_meta.all_props.iter().cloned());
            meta.updated_props.extend(older_meta.updated_props.iter().cloned());
        }
    }
    meta.all_props.sort();
    meta.all_props.dedup();
    meta.updated_props.sort();
    meta.updated_props.dedup();
    stored.meta = Some(meta);
    batch.add(Queue::Stored, stored);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::PropId;
    use crate::persistence::NoPersistence;
    use crate::reconcile::StandardReconciler;
    use crate::runner::CallbackResponse;
    use crate::test_harness::{CollectingReporter, Fixture, components};
    use serde_json::json;

    fn finished(instance: CallbackInstance, outcome: crate::runner::CallbackOutcome) -> QueuedCallback {
        let mut entry = QueuedCallback::new(instance);
        entry.execution = Some(Execution::Finished(outcome));
        entry
    }

    fn chain() -> Fixture {
        Fixture::new(
            json!([
                {"output": "b.value", "inputs": [{"id": "a", "property": "value"}]},
                {"output": "c.value", "inputs": [{"id": "b", "property": "value"}]}
            ]),
            components(&["a", "b", "c"]),
        )
    }

    fn pass(fixture: &mut Fixture, state: &QueueState, reporter: &CollectingReporter, version: &mut u64) -> Completion {
        let mut merge = MergeContext {
            graph: &fixture.graph,
            layout: &mut fixture.layout,
            paths: &mut fixture.paths,
            persistence: &NoPersistence,
            reconciler: &StandardReconciler,
        };
        run(state, &mut merge, reporter, version)
    }

    #[test]
    fn completions_store_metadata_and_request_downstream() {
        let mut fixture = chain();
        let instance = fixture.by_input("a", "value", 1).remove(0);
        let mut state = QueueState::new();
        let mut batch = Batch::new();
        batch.add(Queue::Executed, finished(instance, Ok(CallbackResponse::new().set("b", "value", json!(1)))));
        state.apply(batch);

        let reporter = CollectingReporter::default();
        let mut version = 0;
        let completion = pass(&mut fixture, &state, &reporter, &mut version);
        assert!(completion.error.is_none());
        state.apply(completion.batch);

        assert_eq!(version, 1);
        assert_eq!(state.completed(), 1);
        let next: Vec<_> = state.instances(Queue::Requested).collect();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].predecessors.as_slice(), &[fixture.graph.callbacks()[0].id.clone()]);
        let (_, stored) = state.entries(Queue::Stored).next().unwrap();
        assert_eq!(stored.meta.as_ref().unwrap().updated_props, vec![PropId::new("b", "value")]);
        assert!(reporter.reports().is_empty());
    }

    #[test]
    fn failures_are_reported_with_empty_updates() {
        let mut fixture = chain();
        let instance = fixture.by_input("a", "value", 1).remove(0);
        let mut state = QueueState::new();
        let mut batch = Batch::new();
        batch.add(Queue::Executed, finished(instance, Err(CallbackError::Failed("boom".into()))));
        state.apply(batch);

        let reporter = CollectingReporter::default();
        let completion = pass(&mut fixture, &state, &reporter, &mut 0);
        state.apply(completion.batch);
        let reports = reporter.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].outputs, vec!["b.value".to_owned()]);
        assert_eq!(reports[0].message, "boom");
        let (_, stored) = state.entries(Queue::Stored).next().unwrap();
        assert!(stored.meta.as_ref().unwrap().updated_props.is_empty());
        assert_eq!(state.len(Queue::Requested), 0);
    }

    #[test]
    fn completions_requested_again_later_in_the_pass_are_not_stored() {
        let mut fixture = Fixture::new(
            json!([
                {"output": "x.value", "inputs": [{"id": "a", "property": "value"}, {"id": "y", "property": "value"}]},
                {"output": "y.value", "inputs": [{"id": "b", "property": "value"}]}
            ]),
            components(&["a", "b", "x", "y"]),
        );
        let x = fixture.by_input("a", "value", 1).remove(0);
        let y = fixture.by_input("b", "value", 2).remove(0);
        let mut state = QueueState::new();
        let mut batch = Batch::new();
        batch.add(Queue::Executed, finished(x, Ok(CallbackResponse::new().set("x", "value", json!(1)))));
        batch.add(Queue::Executed, finished(y, Ok(CallbackResponse::new().set("y", "value", json!(2)))));
        state.apply(batch);

        let completion = pass(&mut fixture, &state, &CollectingReporter::default(), &mut 0);
        assert!(completion.error.is_none());
        state.apply(completion.batch);

        assert!(state.check_disjoint().is_empty());
        assert_eq!(state.completed(), 2);
        let requested: Vec<_> = state.instances(Queue::Requested).map(|next| next.key.to_string()).collect();
        assert_eq!(requested, vec!["x.value".to_owned()]);
        let stored: Vec<_> = state.instances(Queue::Stored).map(|done| done.key.to_string()).collect();
        assert_eq!(stored, vec!["y.value".to_owned()]);
    }

    #[test]
    fn mutation_errors_stop_the_pass() {
        let mut fixture = chain();
        let mut found = fixture.by_input("a", "value", 1);
        let first = found.remove(0);
        let second = fixture.by_input("b", "value", 1).remove(0);
        let bad = CallbackResponse::new().set("b", "value", json!({"__mutation": true, "mutation": "append", "output": 1}));
        let mut state = QueueState::new();
        let mut batch = Batch::new();
        batch.add(Queue::Executed, finished(first, Ok(bad)));
        batch.add(Queue::Executed, finished(second, Ok(CallbackResponse::new())));
        state.apply(batch);

        let completion = pass(&mut fixture, &state, &CollectingReporter::default(), &mut 0);
        assert!(matches!(completion.error, Some(MutationError::NotMutable { .. })));
        state.apply(completion.batch);
        assert_eq!(state.len(Queue::Executed), 1);
        assert_eq!(state.completed(), 1);
    }
}
