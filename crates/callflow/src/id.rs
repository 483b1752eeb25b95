//! Component identifiers, property addresses and wildcard patterns.
//!
//! A live component is identified either by a plain string or by an object of
//! scalar values (`{"type": "item", "index": 3}`). Callback declarations may
//! use object patterns where a value is replaced by a wildcard
//! (`["MATCH"]`, `["ALL"]`, `["ALLSMALLER"]`) to address many components.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::IdError;

/// Scalar allowed as a value of an object id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdValue {
    Bool(bool),
    Int(i64),
    Float(OrderedFloat<f64>),
    Str(String),
}

impl IdValue {
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(Self::Int(i)),
                None => n.as_f64().map(|f| Self::Float(OrderedFloat(f))),
            },
            Value::String(s) => Some(Self::Str(s.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(f.0)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::Str(s) => Value::String(s.clone()),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(f.0),
            _ => None,
        }
    }

    /// Ordering used to resolve `ALLSMALLER`: numbers compare numerically,
    /// anything else by its text form.
    pub fn wildcard_cmp(&self, other: &Self) -> Ordering {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
            _ => self.to_string().cmp(&other.to_string()),
        }
    }
}

impl fmt::Display for IdValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{}", x.0),
            Self::Str(s) => write!(f, "{s}"),
        }
    }
}

/// Identifier of a live component.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ComponentId {
    Str(String),
    Obj(BTreeMap<String, IdValue>),
}

impl ComponentId {
    /// Reads a concrete id from a layout `props.id` value.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self::Str(s.clone())),
            Value::Object(map) => map
                .iter()
                .map(|(key, value)| IdValue::from_json(value).map(|v| (key.clone(), v)))
                .collect::<Option<BTreeMap<_, _>>>()
                .map(Self::Obj),
            _ => None,
        }
    }

    /// Comma-joined sorted keys of an object id; `None` for string ids.
    pub fn key_signature(&self) -> Option<String> {
        match self {
            Self::Str(_) => None,
            Self::Obj(map) => Some(map.keys().cloned().collect::<Vec<_>>().join(",")),
        }
    }

    /// Values of an object id in sorted key order.
    pub fn values(&self) -> Vec<IdValue> {
        match self {
            Self::Str(_) => Vec::new(),
            Self::Obj(map) => map.values().cloned().collect(),
        }
    }

    /// Canonical text form: the string itself, or JSON with sorted keys.
    pub fn stringify(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            Self::Obj(map) => {
                let entries = map
                    .iter()
                    .map(|(key, value)| format!("{}:{}", Value::String(key.clone()), value.to_json()))
                    .collect::<Vec<_>>();
                format!("{{{}}}", entries.join(","))
            }
        }
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stringify())
    }
}

impl From<&str> for ComponentId {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for ComponentId {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

/// Full address of a component property.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PropId {
    pub id: ComponentId,
    pub property: String,
}

impl PropId {
    pub fn new(id: impl Into<ComponentId>, property: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            property: property.into(),
        }
    }
}

impl fmt::Display for PropId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.id, self.property)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Wildcard {
    /// Same value as the triggering (or output) component.
    Match,
    /// Every value.
    All,
    /// Every value smaller than the matched one.
    AllSmaller,
}

impl Wildcard {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Match => "MATCH",
            Self::All => "ALL",
            Self::AllSmaller => "ALLSMALLER",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "MATCH" => Some(Self::Match),
            "ALL" => Some(Self::All),
            "ALLSMALLER" => Some(Self::AllSmaller),
            _ => None,
        }
    }
}

/// One key of an object id pattern.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyPattern {
    Exact(IdValue),
    Wild(Wildcard),
}

impl KeyPattern {
    fn from_json(key: &str, value: &Value) -> Result<Self, IdError> {
        if let Value::Array(items) = value {
            return match items.as_slice() {
                [Value::String(name)] => Wildcard::from_name(name)
                    .map(Self::Wild)
                    .ok_or_else(|| IdError::UnknownWildcard(name.clone())),
                _ => Err(IdError::InvalidKeyValue(key.to_owned())),
            };
        }
        IdValue::from_json(value)
            .map(Self::Exact)
            .ok_or_else(|| IdError::InvalidKeyValue(key.to_owned()))
    }

    fn to_json(&self) -> Value {
        match self {
            Self::Exact(value) => value.to_json(),
            Self::Wild(wildcard) => Value::Array(vec![Value::String(wildcard.name().to_owned())]),
        }
    }

    pub fn is_multi(&self) -> bool {
        matches!(self, Self::Wild(Wildcard::All | Wildcard::AllSmaller))
    }
}

/// Component id as written in a callback declaration.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IdPattern {
    Str(String),
    Obj(BTreeMap<String, KeyPattern>),
}

impl IdPattern {
    /// Parses the id part of a dependency string. Object ids are JSON text.
    pub fn parse(text: &str) -> Result<Self, IdError> {
        if text.starts_with('{') {
            let value: Value =
                serde_json::from_str(text).map_err(|error| IdError::InvalidJson(error.to_string()))?;
            Self::from_json(&value)
        } else if text.is_empty() {
            Err(IdError::Empty)
        } else {
            Ok(Self::Str(text.to_owned()))
        }
    }

    pub fn from_json(value: &Value) -> Result<Self, IdError> {
        match value {
            Value::String(s) => Self::parse(s),
            Value::Object(map) => map
                .iter()
                .map(|(key, value)| KeyPattern::from_json(key, value).map(|p| (key.clone(), p)))
                .collect::<Result<BTreeMap<_, _>, _>>()
                .map(Self::Obj),
            _ => Err(IdError::NotAnObject),
        }
    }

    pub fn key_signature(&self) -> Option<String> {
        match self {
            Self::Str(_) => None,
            Self::Obj(map) => Some(map.keys().cloned().collect::<Vec<_>>().join(",")),
        }
    }

    pub fn keys(&self) -> Vec<String> {
        match self {
            Self::Str(_) => Vec::new(),
            Self::Obj(map) => map.keys().cloned().collect(),
        }
    }

    pub fn values(&self) -> Vec<KeyPattern> {
        match self {
            Self::Str(_) => Vec::new(),
            Self::Obj(map) => map.values().cloned().collect(),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        match self {
            Self::Str(_) => false,
            Self::Obj(map) => map.values().any(|p| matches!(p, KeyPattern::Wild(_))),
        }
    }

    /// True when the pattern resolves to a list of components (`ALL`/`ALLSMALLER`).
    pub fn is_multi(&self) -> bool {
        match self {
            Self::Str(_) => false,
            Self::Obj(map) => map.values().any(KeyPattern::is_multi),
        }
    }

    pub fn keys_with(&self, wildcard: Wildcard) -> Vec<String> {
        match self {
            Self::Str(_) => Vec::new(),
            Self::Obj(map) => map
                .iter()
                .filter(|(_, p)| **p == KeyPattern::Wild(wildcard))
                .map(|(k, _)| k.clone())
                .collect(),
        }
    }
}

impl fmt::Display for IdPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Obj(map) => {
                let entries = map
                    .iter()
                    .map(|(key, pattern)| format!("{}:{}", Value::String(key.clone()), pattern.to_json()))
                    .collect::<Vec<_>>();
                write!(f, "{{{}}}", entries.join(","))
            }
        }
    }
}

/// A declared input, state or output: id pattern plus property name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Dependency {
    pub id: IdPattern,
    pub property: String,
}

impl Dependency {
    pub fn new(id: IdPattern, property: impl Into<String>) -> Self {
        Self {
            id,
            property: property.into(),
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.id, self.property)
    }
}
