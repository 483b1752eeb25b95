//! Static dependency graph: callback declarations and routing maps.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GraphError, IdError};
use crate::id::{Dependency, IdPattern, KeyPattern, Wildcard};
use crate::parser::{parse_output_spec, span_messages};

/// Declared identity of a callback: its output specification string.
pub type CallbackId = Arc<str>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DependencySpec {
    pub id: Value,
    pub property: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientsideFunction {
    pub namespace: String,
    pub function_name: String,
}

impl ClientsideFunction {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.namespace, self.function_name)
    }
}

/// Which outputs may receive mutation envelopes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MutationSpec {
    Flag(bool),
    Outputs(Vec<String>),
}

impl Default for MutationSpec {
    fn default() -> Self {
        MutationSpec::Flag(false)
    }
}

/// Wire form of a callback declaration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallbackSpec {
    pub output: String,
    #[serde(default)]
    pub inputs: Vec<DependencySpec>,
    #[serde(default)]
    pub state: Vec<DependencySpec>,
    #[serde(default)]
    pub prevent_initial_call: bool,
    #[serde(default)]
    pub clientside_function: Option<ClientsideFunction>,
    #[serde(default)]
    pub mutations: MutationSpec,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OutputDeclaration {
    pub dependency: Dependency,
    /// The `@tag` that lets other callbacks set the same output.
    pub duplicate_tag: Option<String>,
    pub mutable: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CallbackKind {
    Server,
    Clientside(ClientsideFunction),
}

#[derive(Clone, Debug, PartialEq)]
pub struct CallbackDeclaration {
    pub id: CallbackId,
    /// Position in the declaration list.
    pub index: usize,
    pub outputs: Vec<OutputDeclaration>,
    pub inputs: Vec<Dependency>,
    pub state: Vec<Dependency>,
    pub multi_output: bool,
    pub prevent_initial_call: bool,
    pub kind: CallbackKind,
}

impl CallbackDeclaration {
    pub fn from_spec(index: usize, spec: &CallbackSpec) -> Result<Self, Vec<GraphError>> {
        let mut errors = Vec::new();

        let parsed = match parse_output_spec(&spec.output) {
            Ok(parsed) => parsed,
            Err(parse_errors) => {
                return Err(vec![GraphError::OutputSyntax {
                    callback: index,
                    source: spec.output.clone(),
                    errors: span_messages(&parse_errors),
                }]);
            }
        };

        let mutable_targets = match &spec.mutations {
            MutationSpec::Flag(_) => Vec::new(),
            MutationSpec::Outputs(targets) => targets
                .iter()
                .filter_map(|target| match parse_dependency_text(target) {
                    Ok(dependency) => Some(dependency),
                    Err(error) => {
                        errors.push(GraphError::InvalidId {
                            callback: index,
                            dependency: target.clone(),
                            error,
                        });
                        None
                    }
                })
                .collect(),
        };

        let mut outputs = Vec::new();
        for target in &parsed.targets {
            let dependency = match IdPattern::parse(target.id) {
                Ok(id) => Dependency::new(id, target.property),
                Err(error) => {
                    errors.push(GraphError::InvalidId {
                        callback: index,
                        dependency: format!("{}.{}", target.id, target.property),
                        error,
                    });
                    continue;
                }
            };
            if !dependency.id.keys_with(Wildcard::AllSmaller).is_empty() {
                errors.push(GraphError::AllSmallerInOutput {
                    callback: index,
                    output: dependency.to_string(),
                });
            }
            let mutable = match &spec.mutations {
                MutationSpec::Flag(all) => *all,
                MutationSpec::Outputs(_) => mutable_targets.contains(&dependency),
            };
            outputs.push(OutputDeclaration {
                dependency,
                duplicate_tag: target.duplicate_tag.map(str::to_owned),
                mutable,
            });
        }

        for target in &mutable_targets {
            if !outputs.iter().any(|output| &output.dependency == target) {
                errors.push(GraphError::UnknownMutationTarget {
                    callback: index,
                    target: target.to_string(),
                });
            }
        }

        let inputs = dependencies(index, &spec.inputs, &mut errors);
        let state = dependencies(index, &spec.state, &mut errors);
        if spec.inputs.is_empty() {
            errors.push(GraphError::NoInputs { callback: index });
        }

        for dependency in inputs.iter().chain(&state) {
            let referenced = dependency.id.keys_with(Wildcard::Match).into_iter();
            for key in referenced.chain(dependency.id.keys_with(Wildcard::AllSmaller)) {
                let matched_everywhere = outputs.iter().all(|output| match &output.dependency.id {
                    IdPattern::Obj(keys) => keys.get(&key) == Some(&KeyPattern::Wild(Wildcard::Match)),
                    IdPattern::Str(_) => false,
                });
                if !matched_everywhere {
                    errors.push(GraphError::UnmatchedWildcard {
                        callback: index,
                        dependency: dependency.to_string(),
                    });
                }
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(Self {
            id: Arc::from(spec.output.as_str()),
            index,
            outputs,
            inputs,
            state,
            multi_output: parsed.multi,
            prevent_initial_call: spec.prevent_initial_call,
            kind: match &spec.clientside_function {
                Some(function) => CallbackKind::Clientside(function.clone()),
                None => CallbackKind::Server,
            },
        })
    }

    pub fn is_clientside(&self) -> bool {
        matches!(self.kind, CallbackKind::Clientside(_))
    }

    pub fn function_name(&self) -> Option<String> {
        match &self.kind {
            CallbackKind::Clientside(function) => Some(function.qualified_name()),
            CallbackKind::Server => None,
        }
    }

    /// True when some output may also be written by other callbacks.
    pub fn allows_multiple_outputs_to_same_component(&self) -> bool {
        self.outputs.iter().any(|output| output.duplicate_tag.is_some())
    }

    pub fn allows_mutations(&self) -> bool {
        self.outputs.iter().any(|output| output.mutable)
    }

    pub fn output(&self, dependency: &Dependency) -> Option<&OutputDeclaration> {
        self.outputs.iter().find(|output| &output.dependency == dependency)
    }

    pub fn output_dependencies(&self) -> impl Iterator<Item = &Dependency> {
        self.outputs.iter().map(|output| &output.dependency)
    }
}

fn dependencies(callback: usize, specs: &[DependencySpec], errors: &mut Vec<GraphError>) -> Vec<Dependency> {
    specs
        .iter()
        .filter_map(|spec| match IdPattern::from_json(&spec.id) {
            Ok(id) => Some(Dependency::new(id, spec.property.as_str())),
            Err(error) => {
                errors.push(GraphError::InvalidId {
                    callback,
                    dependency: format!("{}.{}", spec.id, spec.property),
                    error,
                });
                None
            }
        })
        .collect()
}

/// Parses `id.property` where the id may be JSON.
pub fn parse_dependency_text(text: &str) -> Result<Dependency, IdError> {
    let (id, property) = text.rsplit_once('.').ok_or(IdError::Empty)?;
    Ok(Dependency::new(IdPattern::parse(id)?, property))
}

/// Route from an object-id pattern to the callback that declared it.
#[derive(Clone, Debug, PartialEq)]
pub struct PatternRoute {
    /// Pattern values in sorted key order.
    pub values: Vec<KeyPattern>,
    pub keys: Vec<String>,
    pub callback: usize,
}

type RouteMap = HashMap<String, HashMap<String, Vec<usize>>>;
type PatternMap = HashMap<String, HashMap<String, Vec<PatternRoute>>>;

#[derive(Debug, Default)]
pub struct DependencyGraph {
    callbacks: Vec<Arc<CallbackDeclaration>>,
    input_map: RouteMap,
    input_patterns: PatternMap,
    output_map: RouteMap,
    output_patterns: PatternMap,
}

impl DependencyGraph {
    pub fn from_json(text: &str) -> Result<Self, Vec<GraphError>> {
        let specs: Vec<CallbackSpec> =
            serde_json::from_str(text).map_err(|error| vec![GraphError::Json(error.to_string())])?;
        Self::from_specs(&specs)
    }

    pub fn from_specs(specs: &[CallbackSpec]) -> Result<Self, Vec<GraphError>> {
        let mut errors = Vec::new();
        let mut callbacks = Vec::new();
        for (index, spec) in specs.iter().enumerate() {
            match CallbackDeclaration::from_spec(index, spec) {
                Ok(declaration) => callbacks.push(declaration),
                Err(mut callback_errors) => errors.append(&mut callback_errors),
            }
        }

        let mut seen: HashMap<(&Dependency, Option<&str>), usize> = HashMap::new();
        for declaration in &callbacks {
            for output in &declaration.outputs {
                let key = (&output.dependency, output.duplicate_tag.as_deref());
                if let Some(first) = seen.insert(key, declaration.index) {
                    errors.push(GraphError::DuplicateOutput {
                        output: output.dependency.to_string(),
                        first,
                        second: declaration.index,
                    });
                }
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        let mut graph = Self::default();
        for declaration in callbacks {
            let position = graph.callbacks.len();
            for input in &declaration.inputs {
                add_route(&mut graph.input_map, &mut graph.input_patterns, input, position);
            }
            for output in declaration.output_dependencies() {
                add_route(&mut graph.output_map, &mut graph.output_patterns, output, position);
            }
            graph.callbacks.push(Arc::new(declaration));
        }
        Ok(graph)
    }

    pub fn callbacks(&self) -> &[Arc<CallbackDeclaration>] {
        &self.callbacks
    }

    pub fn callback(&self, position: usize) -> Option<&Arc<CallbackDeclaration>> {
        self.callbacks.get(position)
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Callbacks with an input on a string-id component property.
    pub fn input_callbacks(&self, id: &str, property: &str) -> &[usize] {
        lookup(&self.input_map, id, property)
    }

    /// Object-id input patterns with this key signature and property.
    pub fn input_routes(&self, signature: &str, property: &str) -> &[PatternRoute] {
        lookup(&self.input_patterns, signature, property)
    }

    pub fn output_callbacks(&self, id: &str, property: &str) -> &[usize] {
        lookup(&self.output_map, id, property)
    }

    pub fn output_routes(&self, signature: &str, property: &str) -> &[PatternRoute] {
        lookup(&self.output_patterns, signature, property)
    }

    /// Every property of a string id that some callback writes.
    pub fn output_properties(&self, id: &str) -> impl Iterator<Item = &str> {
        self.output_map.get(id).into_iter().flat_map(|props| props.keys().map(String::as_str))
    }

    pub fn output_pattern_properties(&self, signature: &str) -> impl Iterator<Item = &str> {
        self.output_patterns
            .get(signature)
            .into_iter()
            .flat_map(|props| props.keys().map(String::as_str))
    }

    pub fn input_properties(&self, id: &str) -> impl Iterator<Item = &str> {
        self.input_map.get(id).into_iter().flat_map(|props| props.keys().map(String::as_str))
    }

    pub fn input_pattern_properties(&self, signature: &str) -> impl Iterator<Item = &str> {
        self.input_patterns
            .get(signature)
            .into_iter()
            .flat_map(|props| props.keys().map(String::as_str))
    }
}

fn add_route(plain: &mut RouteMap, patterns: &mut PatternMap, dependency: &Dependency, callback: usize) {
    match &dependency.id {
        IdPattern::Str(id) => plain
            .entry(id.clone())
            .or_default()
            .entry(dependency.property.clone())
            .or_default()
            .push(callback),
        IdPattern::Obj(_) => patterns
            .entry(dependency.id.key_signature().unwrap_or_default())
            .or_default()
            .entry(dependency.property.clone())
            .or_default()
            .push(PatternRoute {
                values: dependency.id.values(),
                keys: dependency.id.keys(),
                callback,
            }),
    }
}

fn lookup<'a, T>(map: &'a HashMap<String, HashMap<String, Vec<T>>>, id: &str, property: &str) -> &'a [T] {
    map.get(id)
        .and_then(|props| props.get(property))
        .map(Vec::as_slice)
        .unwrap_or(&[])
}
