//! Function registry
//!
//! Maps function names to compiled Rust callables. Jobs reference functions
//! by name; nothing is built from caller-supplied source text. Each function
//! declares its parameters so that positional and keyword arguments coming
//! from JSON rows can be bound the same way for every activation.

pub mod builtins;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

use crate::error::{ComputeError, Result};

/// Signature of every registered callable
pub type FunctionBody =
    Arc<dyn Fn(&[Value], &CallContext) -> std::result::Result<Value, FunctionError> + Send + Sync>;

/// Error raised inside an activation: a kind such as `TypeError` plus a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionError {
    pub kind: String,
    pub message: String,
}

impl FunctionError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new("ValueError", message)
    }
}

impl fmt::Display for FunctionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for FunctionError {}

/// Per-activation context handed to the callable
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    pub call_id: String,
    /// Variables from the job's `extra_env`
    pub env: HashMap<String, String>,
}

/// Arguments of one activation before binding to parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallArgs {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub positional: Vec<Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub keyword: Map<String, Value>,
}

impl CallArgs {
    pub fn positional(values: Vec<Value>) -> Self {
        Self {
            positional: values,
            keyword: Map::new(),
        }
    }

    pub fn keyword(values: Map<String, Value>) -> Self {
        Self {
            positional: Vec::new(),
            keyword: values,
        }
    }
}

/// Declared parameter of a registered function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// A registered callable and its signature
#[derive(Clone)]
pub struct FunctionSpec {
    name: String,
    description: String,
    params: Vec<Param>,
    body: FunctionBody,
}

impl fmt::Debug for FunctionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionSpec")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl FunctionSpec {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&[Value], &CallContext) -> std::result::Result<Value, FunctionError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            description: String::new(),
            params: Vec::new(),
            body: Arc::new(body),
        }
    }

    /// Append a required parameter
    pub fn param(mut self, name: impl Into<String>) -> Self {
        self.params.push(Param {
            name: name.into(),
            default: None,
        });
        self
    }

    /// Append a parameter with a default value
    pub fn optional(mut self, name: impl Into<String>, default: Value) -> Self {
        self.params.push(Param {
            name: name.into(),
            default: Some(default),
        });
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Bind positional and keyword arguments to the declared parameters
    pub fn bind(&self, args: CallArgs) -> std::result::Result<Vec<Value>, FunctionError> {
        let CallArgs {
            positional,
            keyword,
        } = args;

        if positional.len() > self.params.len() {
            return Err(FunctionError::type_error(format!(
                "{}() takes {} positional arguments but {} were given",
                self.name,
                self.params.len(),
                positional.len()
            )));
        }

        let mut slots: Vec<Option<Value>> = positional.into_iter().map(Some).collect();
        slots.resize(self.params.len(), None);

        for (key, value) in keyword {
            let index = self
                .params
                .iter()
                .position(|p| p.name == key)
                .ok_or_else(|| {
                    FunctionError::type_error(format!(
                        "{}() got an unexpected keyword argument '{}'",
                        self.name, key
                    ))
                })?;
            if slots[index].is_some() {
                return Err(FunctionError::type_error(format!(
                    "{}() got multiple values for argument '{}'",
                    self.name, key
                )));
            }
            slots[index] = Some(value);
        }

        slots
            .into_iter()
            .zip(&self.params)
            .map(|(slot, param)| {
                slot.or_else(|| param.default.clone()).ok_or_else(|| {
                    FunctionError::type_error(format!(
                        "{}() missing required argument: '{}'",
                        self.name, param.name
                    ))
                })
            })
            .collect()
    }

    /// Bind and run the callable
    pub fn invoke(
        &self,
        args: CallArgs,
        context: &CallContext,
    ) -> std::result::Result<Value, FunctionError> {
        let bound = self.bind(args)?;
        (self.body)(&bound, context)
    }

    pub fn info(&self) -> FunctionInfo {
        FunctionInfo {
            name: self.name.clone(),
            description: self.description.clone(),
            params: self.params.clone(),
        }
    }
}

/// Serializable description of a registered function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub name: String,
    pub description: String,
    pub params: Vec<Param>,
}

/// Registry holding the mapping between function names and their implementation
#[derive(Default)]
pub struct FunctionRegistry {
    functions: RwLock<HashMap<String, Arc<FunctionSpec>>>,
}

impl FunctionRegistry {
    /// Creates a new, empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry pre-loaded with the built-in functions
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        builtins::register_all(&registry);
        registry
    }

    /// Registers a function; an existing registration with the same name is replaced
    pub fn register(&self, spec: FunctionSpec) {
        let name = spec.name.clone();
        let previous = self
            .functions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), Arc::new(spec));

        if previous.is_some() {
            info!("Replaced function registration: {}", name);
        } else {
            debug!("Registered function: {}", name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<FunctionSpec>> {
        self.functions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Looks up a function by name, failing with a resolution error if absent
    pub fn resolve(&self, name: &str) -> Result<Arc<FunctionSpec>> {
        self.get(name)
            .ok_or_else(|| ComputeError::function_not_found(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.functions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Catalog of registered functions sorted by name
    pub fn catalog(&self) -> Vec<FunctionInfo> {
        let mut infos: Vec<FunctionInfo> = self
            .functions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|spec| spec.info())
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }
}
