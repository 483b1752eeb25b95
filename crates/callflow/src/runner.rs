//! Invoking callbacks: server backends and client-side functions.

use std::collections::HashMap;
use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use futures_util::FutureExt;
use futures_util::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::callback::{CallbackInstance, PropRef, Resolved};
use crate::error::CallbackError;
use crate::id::ComponentId;
use crate::layout::Layout;

pub type CallbackOutcome = Result<CallbackResponse, CallbackError>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropValue {
    pub id: ComponentId,
    pub property: String,
    pub value: Value,
}

/// Current value of one declared input or state.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DepValue {
    Single(PropValue),
    Multi(Vec<PropValue>),
}

impl DepValue {
    fn read(resolved: &Resolved, layout: &Layout) -> Self {
        let read = |prop: &PropRef| PropValue {
            id: prop.id.clone(),
            property: prop.property.clone(),
            value: layout.prop(&prop.path, &prop.property).cloned().unwrap_or(Value::Null),
        };
        match resolved {
            Resolved::Single(prop) => DepValue::Single(read(prop)),
            Resolved::Multi(props) => DepValue::Multi(props.iter().map(read).collect()),
        }
    }

    /// The value, or an array of values for multi-valued dependencies.
    pub fn value(&self) -> Value {
        match self {
            DepValue::Single(prop) => prop.value.clone(),
            DepValue::Multi(props) => Value::Array(props.iter().map(|prop| prop.value.clone()).collect()),
        }
    }
}

/// Everything a backend needs to run one callback instance.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CallbackRequest {
    pub callback: String,
    pub outputs: Vec<Resolved>,
    pub inputs: Vec<DepValue>,
    pub state: Vec<DepValue>,
    /// Inputs whose change triggered this run, as `id.property`.
    pub changed_prop_ids: Vec<String>,
}

impl CallbackRequest {
    pub fn new(instance: &CallbackInstance, layout: &Layout) -> Self {
        Self {
            callback: instance.callback.id.to_string(),
            outputs: instance.resolved_outputs.clone(),
            inputs: instance.resolved_inputs.iter().map(|input| DepValue::read(input, layout)).collect(),
            state: instance.resolved_state.iter().map(|state| DepValue::read(state, layout)).collect(),
            changed_prop_ids: instance
                .changed_props
                .iter()
                .filter(|(_, version)| **version > 0)
                .map(|(prop, _)| prop.to_string())
                .collect(),
        }
    }

    pub fn input_values(&self) -> Vec<Value> {
        self.inputs.iter().map(DepValue::value).collect()
    }

    pub fn state_values(&self) -> Vec<Value> {
        self.state.iter().map(DepValue::value).collect()
    }

    /// Resolved output targets, flattened in declaration order.
    pub fn output_props(&self) -> impl Iterator<Item = &PropRef> {
        self.outputs.iter().flat_map(Resolved::props)
    }
}

/// Property values produced by a callback. Outputs it leaves out are not updated.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CallbackResponse {
    pub updates: Vec<PropValue>,
}

impl CallbackResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, id: impl Into<ComponentId>, property: impl Into<String>, value: Value) -> Self {
        self.updates.push(PropValue {
            id: id.into(),
            property: property.into(),
            value,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }
}

/// Remote (or otherwise asynchronous) callback execution.
pub trait Backend {
    fn invoke(&self, request: CallbackRequest) -> LocalBoxFuture<'static, CallbackOutcome>;
}

/// Backend for apps without server callbacks.
#[derive(Default)]
pub struct NoBackend;

impl Backend for NoBackend {
    fn invoke(&self, request: CallbackRequest) -> LocalBoxFuture<'static, CallbackOutcome> {
        futures_util::future::ready(Err(CallbackError::MissingFunction(request.callback))).boxed_local()
    }
}

/// Value a client-side function returns for one declared output.
#[derive(Clone, Debug, PartialEq)]
pub enum OutputValue {
    Value(Value),
    NoUpdate,
    /// One value per component of a multi-valued output.
    Many(Vec<OutputValue>),
}

pub type ClientsideFn = Rc<dyn Fn(&CallbackRequest) -> Result<Vec<OutputValue>, CallbackError>>;

/// Client-side functions by `namespace.function_name`.
#[derive(Clone, Default)]
pub struct ClientsideRegistry {
    functions: HashMap<String, ClientsideFn>,
}

impl fmt::Debug for ClientsideRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientsideRegistry")
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ClientsideRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        namespace: &str,
        function_name: &str,
        function: impl Fn(&CallbackRequest) -> Result<Vec<OutputValue>, CallbackError> + 'static,
    ) {
        self.functions
            .insert(format!("{namespace}.{function_name}"), Rc::new(function));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Runs a function and pairs its values with the resolved outputs.
    pub fn call(&self, name: &str, request: &CallbackRequest) -> CallbackOutcome {
        let function = self
            .functions
            .get(name)
            .ok_or_else(|| CallbackError::MissingFunction(name.to_owned()))?;
        let values = catch_unwind(AssertUnwindSafe(|| function(request)))
            .map_err(|payload| CallbackError::Failed(format!("`{name}` panicked: {}", panic_message(&*payload))))??;
        if values.len() != request.outputs.len() {
            return Err(CallbackError::Failed(format!(
                "`{name}` returned {} values for {} outputs",
                values.len(),
                request.outputs.len()
            )));
        }
        let mut response = CallbackResponse::new();
        for (resolved, value) in request.outputs.iter().zip(values) {
            match (resolved, value) {
                (_, OutputValue::NoUpdate) => {}
                (Resolved::Single(prop), OutputValue::Value(value)) => {
                    response = response.set(prop.id.clone(), prop.property.as_str(), value);
                }
                (Resolved::Multi(props), OutputValue::Many(values)) if props.len() == values.len() => {
                    for (prop, value) in props.iter().zip(values) {
                        if let OutputValue::Value(value) = value {
                            response = response.set(prop.id.clone(), prop.property.as_str(), value);
                        }
                    }
                }
                _ => {
                    return Err(CallbackError::Failed(format!(
                        "`{name}` returned a value that does not match its outputs"
                    )));
                }
            }
        }
        Ok(response)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// A started callback: finished on the spot, or still running.
pub enum Invocation {
    Finished(CallbackOutcome),
    Pending(LocalBoxFuture<'static, CallbackOutcome>),
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Invocation::Finished(outcome) => f.debug_tuple("Finished").field(outcome).finish(),
            Invocation::Pending(_) => f.write_str("Pending"),
        }
    }
}

fn prevent_update_is_empty(outcome: CallbackOutcome) -> CallbackOutcome {
    match outcome {
        Err(CallbackError::PreventUpdate) => Ok(CallbackResponse::new()),
        other => other,
    }
}

/// Start one callback instance. Exactly one backend or function call per
/// invocation; failures end up in the outcome.
pub fn execute_callback(
    instance: &CallbackInstance,
    layout: &Layout,
    backend: &dyn Backend,
    clientside: &ClientsideRegistry,
) -> Invocation {
    let request = CallbackRequest::new(instance, layout);
    match instance.callback.function_name() {
        Some(name) => Invocation::Finished(prevent_update_is_empty(clientside.call(&name, &request))),
        None => Invocation::Pending(backend.invoke(request).map(prevent_update_is_empty).boxed_local()),
    }
}
