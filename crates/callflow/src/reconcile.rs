//! Combining mutation operations with current property values.

use serde_json::Value;

pub trait Reconciler {
    fn reconcile(&self, operation: &str, current: &Value, payload: Value) -> Result<Value, String>;
}

/// `append`, `prepend`, `extend`, `merge`, `remove` and `assign`.
#[derive(Default)]
pub struct StandardReconciler;

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

fn as_list(operation: &str, current: &Value) -> Result<Vec<Value>, String> {
    match current {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(items.clone()),
        other => Err(format!("`{operation}` needs a list, found {}", kind(other))),
    }
}

impl Reconciler for StandardReconciler {
    fn reconcile(&self, operation: &str, current: &Value, payload: Value) -> Result<Value, String> {
        match operation {
            "assign" => Ok(payload),
            "append" => {
                let mut items = as_list(operation, current)?;
                items.push(payload);
                Ok(Value::Array(items))
            }
            "prepend" => {
                let mut items = as_list(operation, current)?;
                items.insert(0, payload);
                Ok(Value::Array(items))
            }
            "extend" => {
                let mut items = as_list(operation, current)?;
                match payload {
                    Value::Array(extra) => items.extend(extra),
                    other => return Err(format!("`extend` needs a list payload, found {}", kind(&other))),
                }
                Ok(Value::Array(items))
            }
            "remove" => {
                let items = as_list(operation, current)?;
                Ok(Value::Array(items.into_iter().filter(|item| *item != payload).collect()))
            }
            "merge" => {
                let mut merged = match current {
                    Value::Null => serde_json::Map::new(),
                    Value::Object(map) => map.clone(),
                    other => return Err(format!("`merge` needs an object, found {}", kind(other))),
                };
                match payload {
                    Value::Object(extra) => merged.extend(extra),
                    other => return Err(format!("`merge` needs an object payload, found {}", kind(&other))),
                }
                Ok(Value::Object(merged))
            }
            other => Err(format!("unknown operation `{other}`")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn list_operations() {
        let reconciler = StandardReconciler;
        assert_eq!(reconciler.reconcile("append", &json!([1]), json!(2)), Ok(json!([1, 2])));
        assert_eq!(reconciler.reconcile("prepend", &Value::Null, json!(0)), Ok(json!([0])));
        assert_eq!(reconciler.reconcile("extend", &json!([1]), json!([2, 3])), Ok(json!([1, 2, 3])));
        assert_eq!(reconciler.reconcile("remove", &json!([1, 2, 1]), json!(1)), Ok(json!([2])));
    }

    #[test]
    fn merge_overrides_keys() {
        let merged = StandardReconciler.reconcile("merge", &json!({"a": 1, "b": 1}), json!({"b": 2}));
        assert_eq!(merged, Ok(json!({"a": 1, "b": 2})));
    }

    #[test]
    fn mismatched_values_are_errors() {
        let reconciler = StandardReconciler;
        assert!(reconciler.reconcile("append", &json!("text"), json!(1)).is_err());
        assert!(reconciler.reconcile("extend", &json!([]), json!(1)).is_err());
        assert_eq!(
            reconciler.reconcile("shuffle", &json!([]), json!(null)),
            Err("unknown operation `shuffle`".to_owned())
        );
    }
}
