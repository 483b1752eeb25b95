//! End-to-end scheduling through the public scheduler API.

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use callflow::test_harness::{DeferredBackend, HeldReadiness, TestApp, component, components, root};
use callflow::{
    AppReadiness, CallbackResponse, ClientsideRegistry, Collaborators, ComponentId, DependencyGraph, Layout, Ledger,
    LedgerKind, OutputValue, PathIndex, PropertyChange, Queue, Readiness, Scheduler, SchedulerConfig,
};
use callflow::queue::AppliedKind;
use futures_util::FutureExt;
use serde_json::{Value, json};

fn number(request: &callflow::CallbackRequest, index: usize) -> i64 {
    request.input_values()[index].as_i64().unwrap_or(0)
}

fn chain() -> TestApp {
    let mut app = TestApp::new(
        json!([
            {"output": "b.value", "inputs": [{"id": "a", "property": "value"}]},
            {"output": "c.value", "inputs": [{"id": "b", "property": "value"}]}
        ]),
        vec![
            component(json!("a"), json!({"value": 1})),
            component(json!("b"), json!({})),
            component(json!("c"), json!({})),
        ],
    );
    app.backend
        .script("b.value", |request| Ok(CallbackResponse::new().set("b", "value", json!(number(request, 0) + 1))));
    app.backend
        .script("c.value", |request| Ok(CallbackResponse::new().set("c", "value", json!(number(request, 0) * 10))));
    app
}

#[test]
fn downstream_callbacks_wait_for_their_inputs() {
    let mut app = chain();
    app.start();
    app.assert_prop("b", "value", json!(2));
    app.assert_prop("c", "value", json!(20));
    // `c` is requested on mount but only runs once `b` has settled.
    assert_eq!(app.backend.call_count("c.value"), 1);
    assert!(app.scheduler.is_idle());
    assert_eq!(app.scheduler.completed(), 2);
}

#[test]
fn user_edits_propagate_along_the_chain() {
    let mut app = chain();
    app.start();
    app.set("a", "value", json!(4));
    app.assert_prop("b", "value", json!(5));
    app.assert_prop("c", "value", json!(50));

    let calls = app.backend.calls();
    let last = calls.last().unwrap();
    assert_eq!(last.callback, "c.value");
    assert_eq!(last.changed_prop_ids, vec!["b.value".to_owned()]);
}

#[test]
fn coalesced_dispatches_run_the_callback_once() {
    let mut app = chain();
    app.start();
    let before = app.backend.call_count("b.value");
    app.dispatch(PropertyChange::user("a", "value", json!(7)));
    app.dispatch(PropertyChange::user("a", "value", json!(8)));
    app.settle();
    assert_eq!(app.backend.call_count("b.value"), before + 1);
    app.assert_prop("b", "value", json!(9));
}

#[test]
fn group_members_without_updated_inputs_are_dropped() {
    let mut app = TestApp::new(
        json!([
            {"output": "..x.value...y.value..", "inputs": [{"id": "a", "property": "value"}]},
            {"output": "z.value", "inputs": [{"id": "y", "property": "value"}]}
        ]),
        components(&["a", "x", "y", "z"]),
    );
    app.backend
        .script("..x.value...y.value..", |_| Ok(CallbackResponse::new().set("x", "value", json!("only x"))));
    app.backend.script("z.value", |_| Ok(CallbackResponse::new().set("z", "value", json!("ran"))));
    app.start();

    app.assert_prop("x", "value", json!("only x"));
    assert_eq!(app.backend.call_count("z.value"), 0);
    assert_eq!(app.prop("z", "value"), Value::Null);
    assert_eq!(app.scheduler.completed(), 1);
    assert!(app.scheduler.is_idle());
}

#[test]
fn mutual_dependencies_run_each_side_once() {
    let mut app = TestApp::new(
        json!([
            {"output": "a.value", "inputs": [{"id": "b", "property": "value"}]},
            {"output": "b.value", "inputs": [{"id": "a", "property": "value"}]}
        ]),
        vec![
            component(json!("a"), json!({"value": 0})),
            component(json!("b"), json!({"value": 0})),
        ],
    );
    app.backend
        .script("a.value", |request| Ok(CallbackResponse::new().set("a", "value", json!(number(request, 0) + 1))));
    app.backend
        .script("b.value", |request| Ok(CallbackResponse::new().set("b", "value", json!(number(request, 0) + 1))));
    app.start();

    assert!(app.scheduler.is_idle());
    app.assert_prop("a", "value", json!(1));
    app.assert_prop("b", "value", json!(2));
    assert_eq!(app.backend.call_count("a.value"), 1);
    assert_eq!(app.backend.call_count("b.value"), 1);
}

fn fan_out(count: usize, backend: &DeferredBackend) -> Scheduler {
    let callbacks: Vec<Value> = (0..count)
        .map(|index| json!({"output": format!("out{index}.value"), "inputs": [{"id": "a", "property": "value"}]}))
        .collect();
    let mut ids = vec!["a".to_owned()];
    ids.extend((0..count).map(|index| format!("out{index}")));
    let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
    let graph = DependencyGraph::from_json(&json!(callbacks).to_string()).unwrap();
    Scheduler::new(
        Arc::new(graph),
        root(components(&ids)),
        SchedulerConfig::default(),
        Collaborators::default().with_backend(Rc::new(backend.clone())),
    )
}

#[test]
fn in_flight_callbacks_respect_the_concurrency_budget() {
    let backend = DeferredBackend::default();
    let mut scheduler = fan_out(15, &backend);
    scheduler.start();
    scheduler.tick().unwrap();

    assert_eq!(backend.in_flight(), 12);
    assert_eq!(scheduler.queues().len(Queue::Watched), 12);
    assert_eq!(scheduler.queues().len(Queue::Prioritized), 3);
    assert!(scheduler.queues().check_disjoint().is_empty());

    let first = backend.requests()[0].callback.clone();
    let output = first.trim_end_matches(".value").to_owned();
    assert!(backend.complete(0, Ok(CallbackResponse::new().set(output.as_str(), "value", json!(1)))));
    scheduler.tick().unwrap();
    assert_eq!(backend.requests().len(), 13);
    assert_eq!(backend.in_flight(), 12);
    assert_eq!(scheduler.completed(), 1);

    for index in 0..backend.requests().len() {
        backend.complete(index, Ok(CallbackResponse::new()));
    }
    for _ in 0..4 {
        scheduler.tick().unwrap();
        assert!(scheduler.queues().check_disjoint().is_empty());
        assert!(backend.in_flight() + scheduler.queues().len(Queue::Executing) <= 12);
        for index in 0..backend.requests().len() {
            backend.complete(index, Ok(CallbackResponse::new()));
        }
    }
    assert_eq!(scheduler.completed(), 15);
    assert!(scheduler.is_idle());
}

/// Holds every callback except the one writing to `open`.
struct HoldAllBut(&'static str);

impl AppReadiness for HoldAllBut {
    fn is_ready(&self, _layout: &Layout, _paths: &PathIndex, ids: &[ComponentId]) -> Readiness {
        if ids.contains(&ComponentId::from(self.0)) {
            Readiness::Ready
        } else {
            Readiness::Waiting(futures_util::future::pending().boxed_local())
        }
    }
}

#[test]
fn blocked_callbacks_do_not_starve_ready_ones() {
    let callbacks: Vec<Value> = (0..13)
        .map(|index| json!({"output": format!("out{index}.value"), "inputs": [{"id": "a", "property": "value"}]}))
        .collect();
    let mut ids = vec!["a".to_owned()];
    ids.extend((0..13).map(|index| format!("out{index}")));
    let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
    let mut app = TestApp::configured(
        json!(callbacks),
        components(&ids),
        SchedulerConfig::default(),
        Collaborators::default().with_readiness(Rc::new(HoldAllBut("out12"))),
    );
    app.backend.script("out12.value", |_| Ok(CallbackResponse::new().set("out12", "value", json!("ran"))));
    app.start();

    app.assert_prop("out12", "value", json!("ran"));
    assert_eq!(app.backend.call_count("out12.value"), 1);
    assert_eq!(app.scheduler.queues().len(Queue::Blocked), 12);
    assert_eq!(app.scheduler.queues().len(Queue::Prioritized), 0);
}

#[test]
fn loading_state_follows_in_flight_callbacks() {
    let backend = DeferredBackend::default();
    let mut scheduler = fan_out(2, &backend);
    scheduler.start();
    scheduler.tick().unwrap();
    assert!(scheduler.is_loading());
    assert_eq!(scheduler.pending_callbacks().len(), 2);
    assert!(scheduler.loading_map().is_loading());

    backend.complete(0, Ok(CallbackResponse::new()));
    backend.complete(1, Ok(CallbackResponse::new()));
    scheduler.tick().unwrap();
    assert!(!scheduler.is_loading());
    assert!(!scheduler.loading_map().is_loading());
}

#[test]
fn results_of_superseded_calls_are_discarded() {
    let backend = DeferredBackend::default();
    let graph = DependencyGraph::from_json(
        &json!([{"output": "b.value", "inputs": [{"id": "a", "property": "value"}]}]).to_string(),
    )
    .unwrap();
    let mut scheduler = Scheduler::new(
        Arc::new(graph),
        root(vec![component(json!("a"), json!({"value": 1})), component(json!("b"), json!({}))]),
        SchedulerConfig::default(),
        Collaborators::default().with_backend(Rc::new(backend.clone())),
    );
    scheduler.start();
    scheduler.tick().unwrap();
    assert_eq!(backend.in_flight(), 1);

    // A new edit while the first call is running replaces it.
    scheduler.dispatch(PropertyChange::user("a", "value", json!(2))).unwrap();
    scheduler.tick().unwrap();
    assert_eq!(backend.requests().len(), 2);
    assert_eq!(backend.requests()[1].input_values(), vec![json!(2)]);
    assert_eq!(scheduler.queues().len(Queue::Watched), 1);
    assert!(scheduler.queues().check_disjoint().is_empty());

    backend.complete(0, Ok(CallbackResponse::new().set("b", "value", json!("first"))));
    scheduler.tick().unwrap();
    assert_eq!(scheduler.prop(&"b".into(), "value"), None);

    backend.complete(1, Ok(CallbackResponse::new().set("b", "value", json!("second"))));
    scheduler.tick().unwrap();
    assert_eq!(scheduler.prop(&"b".into(), "value"), Some(&json!("second")));
    assert_eq!(scheduler.completed(), 1);
    assert!(scheduler.is_idle());
}

#[test]
fn held_callbacks_start_when_the_app_is_ready() {
    let readiness = HeldReadiness::held();
    let mut app = TestApp::configured(
        json!([{"output": "b.value", "inputs": [{"id": "a", "property": "value"}]}]),
        vec![component(json!("a"), json!({"value": 1})), component(json!("b"), json!({}))],
        SchedulerConfig::default(),
        Collaborators::default().with_readiness(Rc::new(readiness.clone())),
    );
    app.backend.script("b.value", |_| Ok(CallbackResponse::new().set("b", "value", json!("done"))));
    app.start();
    assert_eq!(app.scheduler.queues().len(Queue::Blocked), 1);
    assert_eq!(app.backend.call_count("b.value"), 0);

    readiness.release();
    app.settle();
    app.assert_prop("b", "value", json!("done"));
    assert!(app.scheduler.is_idle());
}

#[test]
fn ledger_traces_every_transition() {
    let mut config = SchedulerConfig::default();
    config.record_ledger = true;
    let mut app = TestApp::configured(
        json!([{"output": "b.value", "inputs": [{"id": "a", "property": "value"}]}]),
        components(&["a", "b"]),
        config,
        Collaborators::default(),
    );
    app.backend.script("b.value", |_| Ok(CallbackResponse::new()));
    app.start();

    let entries = serde_json::to_value(app.scheduler.ledger().entries()).unwrap();
    let observers: Vec<&str> = entries
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|entry| entry["observer"].as_str())
        .collect();
    for observer in ["start", "requested", "prioritized", "executing", "resume", "executed", "stored"] {
        assert!(observers.contains(&observer), "no `{observer}` transitions in {observers:?}");
    }
    assert!(app.scheduler.snapshot().is_empty());
}

fn overlapping(queues: &HashMap<String, Vec<Queue>>, observer: &str, overlaps: &mut Vec<String>) {
    for (key, held) in queues {
        let outside_requested = held.iter().filter(|queue| **queue != Queue::Requested).count();
        if outside_requested > 1 || (outside_requested == 1 && held.len() > 1) {
            overlaps.push(format!("after `{observer}`: {key} in {held:?}"));
        }
    }
}

/// Replay the ledger and list keys that sat in two queues once an
/// observer's transitions were applied.
fn overlaps_between_observers(ledger: &Ledger) -> Vec<String> {
    let mut queues: HashMap<String, Vec<Queue>> = HashMap::new();
    let mut overlaps = Vec::new();
    let mut current: Option<&str> = None;
    for entry in ledger.entries() {
        let LedgerKind::Transition { observer, change } = &entry.kind else {
            continue;
        };
        if let Some(previous) = current.filter(|previous| previous != observer) {
            overlapping(&queues, previous, &mut overlaps);
        }
        current = Some(*observer);
        let (Some(queue), Some(key)) = (change.queue, change.key.clone()) else {
            continue;
        };
        let held = queues.entry(key).or_default();
        match change.action {
            AppliedKind::Added => held.push(queue),
            AppliedKind::Removed => {
                if let Some(position) = held.iter().position(|q| *q == queue) {
                    held.remove(position);
                }
            }
            AppliedKind::Completed => {}
        }
    }
    if let Some(observer) = current {
        overlapping(&queues, observer, &mut overlaps);
    }
    overlaps
}

#[test]
fn a_completion_requested_again_in_the_same_pass_is_not_stored() {
    let backend = DeferredBackend::default();
    let graph = DependencyGraph::from_json(
        &json!([
            {"output": "x.value", "inputs": [{"id": "a", "property": "value"}, {"id": "y", "property": "value"}]},
            {"output": "y.value", "inputs": [{"id": "b", "property": "value"}],
             "clientside_function": {"namespace": "copy", "function_name": "first"}}
        ])
        .to_string(),
    )
    .unwrap();
    let mut clientside = ClientsideRegistry::new();
    clientside.register("copy", "first", |request| Ok(vec![OutputValue::Value(request.input_values()[0].clone())]));
    let mut config = SchedulerConfig::default();
    config.record_ledger = true;
    let mut scheduler = Scheduler::new(
        Arc::new(graph),
        root(vec![
            component(json!("a"), json!({"value": 1})),
            component(json!("b"), json!({"value": 1})),
            component(json!("x"), json!({})),
            component(json!("y"), json!({})),
        ]),
        config,
        Collaborators::default()
            .with_backend(Rc::new(backend.clone()))
            .with_clientside(clientside),
    );
    scheduler.start();
    scheduler.tick().unwrap();
    assert_eq!(backend.in_flight(), 1);
    assert_eq!(scheduler.queues().len(Queue::Watched), 1);

    // `x` finishes while an edit of `b` re-triggers it through `y`.
    scheduler.dispatch(PropertyChange::user("b", "value", json!(2))).unwrap();
    let running = backend.requests().len() - 1;
    assert!(backend.complete(running, Ok(CallbackResponse::new().set("x", "value", json!("old")))));
    scheduler.tick().unwrap();

    assert_eq!(overlaps_between_observers(scheduler.ledger()), Vec::<String>::new());
    assert_eq!(scheduler.prop(&"y".into(), "value"), Some(&json!(2)));
    assert_eq!(backend.in_flight(), 1);
    let rerun = backend.requests().last().unwrap().clone();
    assert_eq!(rerun.input_values(), vec![json!(1), json!(2)]);

    let last = backend.requests().len() - 1;
    backend.complete(last, Ok(CallbackResponse::new().set("x", "value", json!("new"))));
    scheduler.tick().unwrap();
    assert_eq!(scheduler.prop(&"x".into(), "value"), Some(&json!("new")));
    assert!(scheduler.is_idle());
    assert_eq!(overlaps_between_observers(scheduler.ledger()), Vec::<String>::new());
}
