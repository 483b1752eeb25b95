//! Execution errors are reported and recovered; declaration errors end the tick.

use callflow::test_harness::{TestApp, component, components};
use callflow::{
    CallbackError, CallbackResponse, ClientsideRegistry, Collaborators, MutationError, OutputValue, SchedulerConfig,
    SchedulerError,
};
use serde_json::json;

#[test]
fn failed_callbacks_are_reported_and_retired() {
    let mut app = TestApp::new(
        json!([
            {"output": "b.value", "inputs": [{"id": "a", "property": "value"}]},
            {"output": "c.value", "inputs": [{"id": "b", "property": "value"}]}
        ]),
        components(&["a", "b", "c"]),
    );
    app.backend.script("b.value", |_| Err(CallbackError::Failed("boom".into())));
    app.backend.script("c.value", |_| Ok(CallbackResponse::new().set("c", "value", json!(1))));
    app.start();

    let reports = app.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].callback, "b.value");
    assert_eq!(reports[0].outputs, vec!["b.value".to_owned()]);
    assert_eq!(reports[0].function, None);
    assert_eq!(reports[0].message, "boom");
    // `c` reads only what the failed callback would have written.
    assert_eq!(app.backend.call_count("c.value"), 0);
    assert!(app.scheduler.is_idle());

    // No retry until something triggers it again.
    app.set("a", "value", json!(2));
    assert_eq!(app.backend.call_count("b.value"), 2);
    assert_eq!(app.reports().len(), 2);
}

#[test]
fn mutations_on_plain_outputs_fail_the_tick() {
    let mut app = TestApp::new(
        json!([{"output": "b.value", "inputs": [{"id": "a", "property": "value"}]}]),
        vec![component(json!("a"), json!({"value": 1})), component(json!("b"), json!({"value": []}))],
    );
    app.backend.script("b.value", |request| {
        let value = if request.input_values()[0] == json!(1) {
            json!({"__mutation": true, "mutation": "append", "output": 1})
        } else {
            json!(["plain"])
        };
        Ok(CallbackResponse::new().set("b", "value", value))
    });
    app.scheduler.start();

    let error = app.try_settle().unwrap_err();
    assert!(matches!(error, SchedulerError::Mutation(MutationError::NotMutable { .. })));
    app.assert_prop("b", "value", json!([]));
    assert!(app.scheduler.queues().is_idle());
    assert!(app.reports().is_empty());

    // The scheduler keeps working after the error.
    app.set("a", "value", json!(2));
    app.assert_prop("b", "value", json!(["plain"]));
}

#[test]
fn declared_mutations_go_through_the_reconciler() {
    let mut app = TestApp::new(
        json!([{"output": "log.value", "inputs": [{"id": "a", "property": "value"}],
                "mutations": ["log.value"], "prevent_initial_call": true}]),
        vec![component(json!("a"), json!({"value": 1})), component(json!("log"), json!({"value": ["start"]}))],
    );
    app.backend.script("log.value", |request| {
        Ok(CallbackResponse::new().set(
            "log",
            "value",
            json!({"__mutation": true, "mutation": "append", "output": request.input_values()[0]}),
        ))
    });
    app.start();
    assert_eq!(app.backend.call_count("log.value"), 0);

    app.set("a", "value", json!("x"));
    app.set("a", "value", json!("y"));
    app.assert_prop("log", "value", json!(["start", "x", "y"]));

    app.backend.script("log.value", |_| {
        Ok(CallbackResponse::new().set("log", "value", json!({"__mutation": true, "mutation": "shuffle", "output": 1})))
    });
    app.dispatch(callflow::PropertyChange::user("a", "value", json!("z")));
    let error = app.try_settle().unwrap_err();
    assert!(matches!(error, SchedulerError::Mutation(MutationError::Unsupported { .. })));
    app.assert_prop("log", "value", json!(["start", "x", "y"]));
}

#[test]
fn clientside_functions_can_skip_outputs() {
    let mut clientside = ClientsideRegistry::new();
    clientside.register("app", "skip", |request| {
        if request.input_values()[0] == json!("stop") {
            Err(CallbackError::PreventUpdate)
        } else {
            Ok(vec![OutputValue::Value(request.input_values()[0].clone()), OutputValue::NoUpdate])
        }
    });
    let mut app = TestApp::configured(
        json!([{"output": "..b.value...c.value..", "inputs": [{"id": "a", "property": "value"}],
                "clientside_function": {"namespace": "app", "function_name": "skip"}}]),
        vec![
            component(json!("a"), json!({"value": "go"})),
            component(json!("b"), json!({})),
            component(json!("c"), json!({"value": "kept"})),
        ],
        SchedulerConfig::default(),
        Collaborators::default().with_clientside(clientside),
    );
    app.start();
    app.assert_prop("b", "value", json!("go"));
    app.assert_prop("c", "value", json!("kept"));

    app.set("a", "value", json!("stop"));
    app.assert_prop("b", "value", json!("go"));
    assert!(app.reports().is_empty());
}

#[test]
fn missing_functions_are_reported_with_their_name() {
    let mut app = TestApp::configured(
        json!([{"output": "b.value", "inputs": [{"id": "a", "property": "value"}],
                "clientside_function": {"namespace": "app", "function_name": "missing"}}]),
        components(&["a", "b"]),
        SchedulerConfig::default(),
        Collaborators::default(),
    );
    app.start();
    let reports = app.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].function.as_deref(), Some("app.missing"));
    assert!(reports[0].to_string().contains("app.missing"));
}
