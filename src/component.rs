// Boundary collaborators
//
// Input-source drivers feed values into a program; integration components
// consume its results. Both are resolved through a static registry that maps a
// component type tag to a factory, configured from a JSON definitions file.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::ast::Program;
use crate::config::{ConfigurationError, Options};
use crate::error::{ErrorKind, GenericError};
use crate::evaluator::Evaluator;
use crate::value::Value;

/// A component failed while producing.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{code}: {message}")]
pub struct ComponentError {
    pub code: String,
    pub message: String,
}

impl ComponentError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<ComponentError> for GenericError {
    fn from(e: ComponentError) -> Self {
        let mut payload = IndexMap::new();
        payload.insert("code".to_string(), Value::from(e.code.as_str()));
        payload.insert("message".to_string(), Value::from(e.message.as_str()));
        GenericError::new(ErrorKind::Component, e.message)
            .with_code(e.code)
            .with_payload(Value::object(payload))
    }
}

/// A component could not be resolved or instantiated.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ComponentLoadError {
    #[error("no definition for component '{0}'")]
    UnknownComponent(String),

    #[error("no factory registered for component type '{0}'")]
    UnknownType(String),

    #[error("malformed component definitions: {0}")]
    Definitions(String),

    #[error("component '{name}' is misconfigured: {source}")]
    Configuration {
        name: String,
        #[source]
        source: ConfigurationError,
    },
}

impl From<ComponentLoadError> for GenericError {
    fn from(e: ComponentLoadError) -> Self {
        GenericError::new(ErrorKind::ComponentLoad, e.to_string())
    }
}

/// Output side of a pipeline: an opaque, fallible transformation step.
pub trait IntegrationComponent {
    fn name(&self) -> &str;

    fn produce(&mut self, value: Value) -> Result<Value, ComponentError>;
}

/// Input side of a pipeline.
pub trait InputSourceDriver {
    fn configure(&mut self, options: &Value) -> Result<(), ConfigurationError>;

    /// Run until the source is exhausted or `stop` is called.
    fn start(&mut self, context: &mut ContextManager) -> Result<(), GenericError>;

    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

/// One entry of a definitions file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub resolve_uri: Option<String>,
    #[serde(default)]
    pub configuration: Option<serde_json::Value>,
}

impl ComponentDefinition {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            resolve_uri: None,
            configuration: None,
        }
    }

    /// The configuration as a program value; `Empty` when absent.
    pub fn options(&self) -> Value {
        self.configuration
            .clone()
            .map(Value::from)
            .unwrap_or(Value::Empty)
    }
}

pub type ComponentFactory =
    fn(&ComponentDefinition) -> Result<Box<dyn IntegrationComponent>, ConfigurationError>;

/// Type tag → factory, plus the definitions loaded so far.
pub struct ComponentRegistry {
    factories: IndexMap<String, ComponentFactory>,
    definitions: IndexMap<String, ComponentDefinition>,
}

impl ComponentRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        ComponentRegistry {
            factories: IndexMap::new(),
            definitions: IndexMap::new(),
        }
    }

    /// A registry with the built-in `log` and `memory` types.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("log", log_factory);
        registry.register("memory", memory_factory);
        registry
    }

    /// Register a factory for a component type.
    pub fn register(&mut self, kind: &str, factory: ComponentFactory) {
        self.factories.insert(kind.to_string(), factory);
    }

    pub fn define(&mut self, definition: ComponentDefinition) {
        self.definitions.insert(definition.name.clone(), definition);
    }

    /// Load `[{type, name, resolveUri, configuration}]`; returns how many were added.
    pub fn load_definitions(&mut self, json: &str) -> Result<usize, ComponentLoadError> {
        let defs: Vec<ComponentDefinition> =
            serde_json::from_str(json).map_err(|e| ComponentLoadError::Definitions(e.to_string()))?;
        let count = defs.len();
        for def in defs {
            debug!(name = %def.name, kind = %def.kind, "component definition loaded");
            self.define(def);
        }
        Ok(count)
    }

    pub fn definition(&self, name: &str) -> Option<&ComponentDefinition> {
        self.definitions.get(name)
    }

    pub fn is_registered(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Materialize the component defined under `name`.
    pub fn instantiate(&self, name: &str) -> Result<Box<dyn IntegrationComponent>, ComponentLoadError> {
        let def = self
            .definitions
            .get(name)
            .ok_or_else(|| ComponentLoadError::UnknownComponent(name.to_string()))?;
        let factory = self
            .factories
            .get(&def.kind)
            .ok_or_else(|| ComponentLoadError::UnknownType(def.kind.clone()))?;
        factory(def).map_err(|source| ComponentLoadError::Configuration {
            name: name.to_string(),
            source,
        })
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("types", &self.factories.keys().collect::<Vec<_>>())
            .field("definitions", &self.definitions.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn log_factory(def: &ComponentDefinition) -> Result<Box<dyn IntegrationComponent>, ConfigurationError> {
    Ok(Box::new(LogComponent::new(&def.name)))
}

fn memory_factory(def: &ComponentDefinition) -> Result<Box<dyn IntegrationComponent>, ConfigurationError> {
    Ok(Box::new(MemoryComponent::configured(&def.name, &def.options())?))
}

/// Logs each value and passes it through.
pub struct LogComponent {
    name: String,
}

impl LogComponent {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl IntegrationComponent for LogComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn produce(&mut self, value: Value) -> Result<Value, ComponentError> {
        info!(component = %self.name, %value, "produce");
        Ok(value)
    }
}

/// Shared view of what a [`MemoryComponent`] collected.
#[derive(Clone, Default, Debug)]
pub struct Collected(Rc<RefCell<Vec<Value>>>);

impl Collected {
    pub fn values(&self) -> Vec<Value> {
        self.0.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }
}

/// Collects produced values, up to `capacity`.
pub struct MemoryComponent {
    name: String,
    capacity: usize,
    collected: Collected,
}

pub const DEFAULT_MEMORY_CAPACITY: usize = 10_000;

impl MemoryComponent {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            capacity: DEFAULT_MEMORY_CAPACITY,
            collected: Collected::default(),
        }
    }

    /// Options: `{"capacity": 1..=1000000}`.
    pub fn configured(name: &str, options: &Value) -> Result<Self, ConfigurationError> {
        let options = Options::new(options)?;
        options.only(&["capacity"])?;
        let capacity = options.integer("capacity", 1, 1_000_000, DEFAULT_MEMORY_CAPACITY as i64)?;
        Ok(Self {
            capacity: capacity as usize,
            ..Self::new(name)
        })
    }

    pub fn collected(&self) -> Collected {
        self.collected.clone()
    }
}

impl IntegrationComponent for MemoryComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn produce(&mut self, value: Value) -> Result<Value, ComponentError> {
        if self.collected.len() >= self.capacity {
            return Err(ComponentError::new(
                "CAPACITY",
                format!("component '{}' is full ({} values)", self.name, self.capacity),
            ));
        }
        self.collected.0.borrow_mut().push(value.clone());
        Ok(value)
    }
}

type ResultSink = Box<dyn FnMut(Result<Value, GenericError>)>;

/// A program and an evaluator, driven by an input source.
pub struct ContextManager {
    program: Program,
    evaluator: Evaluator,
    sink: Option<ResultSink>,
    runs: usize,
}

impl ContextManager {
    pub fn new(program: Program, evaluator: Evaluator) -> Self {
        Self {
            program,
            evaluator,
            sink: None,
            runs: 0,
        }
    }

    /// Where results (or unhandled errors) are delivered.
    #[must_use]
    pub fn with_sink(mut self, sink: impl FnMut(Result<Value, GenericError>) + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    pub fn evaluator(&mut self) -> &mut Evaluator {
        &mut self.evaluator
    }

    pub fn runs(&self) -> usize {
        self.runs
    }

    /// Evaluate the program against `input` and deliver the outcome.
    pub fn run(&mut self, input: Value) -> Result<Value, GenericError> {
        self.runs += 1;
        let result = self.evaluator.try_evaluate(&self.program, input);
        if let Some(sink) = self.sink.as_mut() {
            sink(result.clone());
        }
        result
    }
}

/// Emits a fixed list of values, `repeat` times over.
#[derive(Debug)]
pub struct ValueSourceDriver {
    values: Vec<Value>,
    repeat: usize,
    running: bool,
}

impl ValueSourceDriver {
    pub fn new() -> Self {
        Self {
            values: Vec::new(),
            repeat: 1,
            running: false,
        }
    }
}

impl Default for ValueSourceDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl InputSourceDriver for ValueSourceDriver {
    /// Options: `{"values": [...], "repeat": 1..=1000}`.
    fn configure(&mut self, options: &Value) -> Result<(), ConfigurationError> {
        let options = Options::new(options)?;
        options.only(&["values", "repeat"])?;
        self.repeat = options.integer("repeat", 1, 1000, 1)? as usize;
        if let Some(values) = options.array("values")? {
            self.values = values.clone();
        }
        Ok(())
    }

    fn start(&mut self, context: &mut ContextManager) -> Result<(), GenericError> {
        self.running = true;
        'outer: for _ in 0..self.repeat {
            for value in &self.values {
                if !self.running {
                    break 'outer;
                }
                // Unhandled errors go to the sink; the source keeps going.
                let _ = context.run(value.clone());
            }
        }
        self.running = false;
        Ok(())
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value;

    #[test]
    fn test_load_and_instantiate() {
        let mut registry = ComponentRegistry::with_builtins();
        let loaded = registry
            .load_definitions(
                r#"[
                    {"type": "log", "name": "audit"},
                    {"type": "memory", "name": "buffer", "resolveUri": "builtin:memory",
                     "configuration": {"capacity": 2}},
                    {"type": "socket", "name": "remote"}
                ]"#,
            )
            .unwrap();
        assert_eq!(loaded, 3);
        assert_eq!(
            registry.definition("buffer").and_then(|d| d.resolve_uri.clone()),
            Some("builtin:memory".to_string())
        );

        let mut log = registry.instantiate("audit").unwrap();
        assert_eq!(log.produce(value!(1)).unwrap(), value!(1));

        let mut buffer = registry.instantiate("buffer").unwrap();
        buffer.produce(value!(1)).unwrap();
        buffer.produce(value!(2)).unwrap();
        let full = buffer.produce(value!(3)).unwrap_err();
        assert_eq!(full.code, "CAPACITY");

        assert_eq!(
            registry.instantiate("remote").err(),
            Some(ComponentLoadError::UnknownType("socket".to_string()))
        );
        assert_eq!(
            registry.instantiate("missing").err(),
            Some(ComponentLoadError::UnknownComponent("missing".to_string()))
        );
    }

    #[test]
    fn test_bad_definitions() {
        let mut registry = ComponentRegistry::with_builtins();
        assert!(matches!(
            registry.load_definitions("{not json"),
            Err(ComponentLoadError::Definitions(_))
        ));
        registry
            .load_definitions(r#"[{"type": "memory", "name": "m", "configuration": {"capacity": 0}}]"#)
            .unwrap();
        assert!(matches!(
            registry.instantiate("m"),
            Err(ComponentLoadError::Configuration { .. })
        ));
    }

    #[test]
    fn test_component_error_becomes_generic() {
        let err: GenericError = ComponentError::new("E42", "socket closed").into();
        assert_eq!(err.kind, ErrorKind::Component);
        assert_eq!(err.code.as_deref(), Some("E42"));
        assert_eq!(err.payload.get("message"), Some(&value!("socket closed")));
    }

    #[test]
    fn test_driver_configuration() {
        let mut driver = ValueSourceDriver::new();
        assert!(driver.configure(&value!({"values": [1, 2], "repeat": 2})).is_ok());
        assert!(matches!(
            driver.configure(&value!({"repeat": 5000})),
            Err(ConfigurationError::OutOfRange { .. })
        ));
        assert!(matches!(
            driver.configure(&value!({"values": 1})),
            Err(ConfigurationError::InvalidType { .. })
        ));
        assert!(matches!(
            driver.configure(&value!({"port": 80})),
            Err(ConfigurationError::Unknown { .. })
        ));
    }
}
