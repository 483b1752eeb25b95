//! Built-in functions for app files, usable as client-side functions
//! (`{"namespace": "builtin", "function_name": ...}`) or server callbacks.

use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use callflow::merger::MUTATION_MARKER;
use callflow::runner::OutputValue;
use callflow::{Backend, CallbackError, CallbackOutcome, CallbackRequest, ClientsideRegistry, Resolved};
use futures_util::FutureExt;
use futures_util::future::LocalBoxFuture;
use serde_json::{Value, json};

use crate::app::ServerBinding;

pub const NAMESPACE: &str = "builtin";

type Builtin = fn(&CallbackRequest) -> Result<Value, CallbackError>;

const BUILTINS: &[(&str, Builtin)] = &[
    ("identity", identity),
    ("concat", concat),
    ("sum", sum),
    ("count", count),
    ("upper", upper),
    ("append", append),
    ("fail", fail),
];

/// Every value the callback reads, multi-valued dependencies flattened.
fn values(request: &CallbackRequest) -> Vec<Value> {
    request
        .input_values()
        .into_iter()
        .chain(request.state_values())
        .flat_map(|value| match value {
            Value::Array(items) => items,
            other => vec![other],
        })
        .collect()
}

fn text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn first(request: &CallbackRequest) -> Value {
    request.input_values().into_iter().next().unwrap_or(Value::Null)
}

fn identity(request: &CallbackRequest) -> Result<Value, CallbackError> {
    Ok(first(request))
}

fn concat(request: &CallbackRequest) -> Result<Value, CallbackError> {
    Ok(Value::String(values(request).iter().map(text).collect()))
}

fn sum(request: &CallbackRequest) -> Result<Value, CallbackError> {
    let values = values(request);
    if values.iter().all(|value| value.is_i64() || value.is_null()) {
        Ok(json!(values.iter().filter_map(Value::as_i64).sum::<i64>()))
    } else {
        Ok(json!(values.iter().filter_map(Value::as_f64).sum::<f64>()))
    }
}

fn count(request: &CallbackRequest) -> Result<Value, CallbackError> {
    Ok(json!(values(request).iter().filter(|value| !value.is_null()).count()))
}

fn upper(request: &CallbackRequest) -> Result<Value, CallbackError> {
    Ok(Value::String(text(&first(request)).to_uppercase()))
}

/// Appends the last value read, so a click input can carry a state value.
fn append(request: &CallbackRequest) -> Result<Value, CallbackError> {
    let last = request.input_values().into_iter().chain(request.state_values()).last();
    Ok(json!({MUTATION_MARKER: true, "mutation": "append", "output": last.unwrap_or(Value::Null)}))
}

fn fail(request: &CallbackRequest) -> Result<Value, CallbackError> {
    Err(CallbackError::Failed(format!("`{}` failed on purpose", request.callback)))
}

/// The same value for every output, once per component of multi-valued ones.
fn spread(request: &CallbackRequest, value: Value) -> Vec<OutputValue> {
    request
        .outputs
        .iter()
        .map(|output| match output {
            Resolved::Single(_) => OutputValue::Value(value.clone()),
            Resolved::Multi(props) => OutputValue::Many(vec![OutputValue::Value(value.clone()); props.len()]),
        })
        .collect()
}

/// Registry holding every built-in under `builtin.<name>`, plus `no_update`
/// and `prevent_update`.
pub fn registry() -> ClientsideRegistry {
    let mut registry = ClientsideRegistry::new();
    for (name, builtin) in BUILTINS {
        let builtin = *builtin;
        registry.register(NAMESPACE, name, move |request| Ok(spread(request, builtin(request)?)));
    }
    registry.register(NAMESPACE, "no_update", |request| {
        Ok(request.outputs.iter().map(|_| OutputValue::NoUpdate).collect())
    });
    registry.register(NAMESPACE, "prevent_update", |_| Err(CallbackError::PreventUpdate));
    registry
}

pub fn names() -> Vec<&'static str> {
    let mut names: Vec<&str> = BUILTINS.iter().map(|(name, _)| *name).collect();
    names.extend(["no_update", "prevent_update"]);
    names
}

/// Answers server callbacks with built-ins after their configured delay.
pub struct BuiltinBackend {
    registry: Rc<ClientsideRegistry>,
    bindings: HashMap<String, ServerBinding>,
}

impl BuiltinBackend {
    pub fn new(bindings: HashMap<String, ServerBinding>) -> Self {
        Self {
            registry: Rc::new(registry()),
            bindings,
        }
    }
}

impl Backend for BuiltinBackend {
    fn invoke(&self, request: CallbackRequest) -> LocalBoxFuture<'static, CallbackOutcome> {
        let Some(binding) = self.bindings.get(&request.callback) else {
            return futures_util::future::ready(Err(CallbackError::MissingFunction(request.callback))).boxed_local();
        };
        let outcome = self.registry.call(&format!("{NAMESPACE}.{}", binding.function), &request);
        let delay = Duration::from_millis(binding.delay_ms);
        log::debug!("server call {} answers in {delay:?}", request.callback);
        async move {
            tokio::time::sleep(delay).await;
            outcome
        }
        .boxed_local()
    }
}
