// Structured errors and control-flow signals
//
// Errors are ordinary values to the program: every failure, whether raised by an
// operator, a function, a boundary component or the program itself, is a
// `GenericError` that handlers can inspect as a `Value::Error`.
//
// Control signals (Break / Continue / BreakSelect) share the `Signal` channel so
// that `?` propagates them, but handlers only ever match `Signal::Error`.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use thiserror::Error;

use crate::value::{Evaluated, Value};

/// Result of evaluating anything that may raise an error or a control signal.
pub type Flow<T = Evaluated> = Result<T, Signal>;

/// Error classification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unsupported operand kinds for an operator.
    Operator,
    /// Arity or parameter resolution failure.
    Function,
    /// A boundary component failed while producing.
    Component,
    /// A component could not be resolved or instantiated.
    ComponentLoad,
    /// An option or configuration value is invalid.
    Configuration,
    /// Interpreter-level failure (depth limit, stray control signal).
    Evaluation,
    /// Raised by the program itself, with its own type name.
    Raised(String),
}

impl ErrorKind {
    pub fn name(&self) -> &str {
        match self {
            ErrorKind::Operator => "OperatorError",
            ErrorKind::Function => "FunctionError",
            ErrorKind::Component => "ComponentError",
            ErrorKind::ComponentLoad => "ComponentLoadError",
            ErrorKind::Configuration => "ConfigurationError",
            ErrorKind::Evaluation => "EvaluationError",
            ErrorKind::Raised(name) => name,
        }
    }

    /// Inverse of [`ErrorKind::name`]; unknown names are user-raised kinds.
    pub fn from_name(name: &str) -> ErrorKind {
        match name {
            "OperatorError" => ErrorKind::Operator,
            "FunctionError" => ErrorKind::Function,
            "ComponentError" => ErrorKind::Component,
            "ComponentLoadError" => ErrorKind::ComponentLoad,
            "ConfigurationError" => ErrorKind::Configuration,
            "EvaluationError" => ErrorKind::Evaluation,
            other => ErrorKind::Raised(other.to_string()),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A structured error: classification fields plus an arbitrary payload value.
#[derive(Error, Clone, Debug, PartialEq)]
#[error("{kind}: {message}")]
pub struct GenericError {
    pub kind: ErrorKind,
    pub code: Option<String>,
    pub message: String,
    pub payload: Value,
    pub function_namespace: Option<String>,
    pub function_name: Option<String>,
    pub location: Option<String>,
    /// The error this one re-wraps, when a handler failed while handling it.
    pub cause: Option<Rc<GenericError>>,
}

impl GenericError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        GenericError {
            kind,
            code: None,
            message: message.into(),
            payload: Value::Empty,
            function_namespace: None,
            function_name: None,
            location: None,
            cause: None,
        }
    }

    /// Unsupported binary operand combination.
    pub fn operator(symbol: &str, lhs_type: &str, rhs_type: &str) -> Self {
        let mut details = IndexMap::new();
        details.insert("operator".to_string(), Value::from(symbol));
        details.insert("lhsType".to_string(), Value::from(lhs_type));
        details.insert("rhsType".to_string(), Value::from(rhs_type));
        GenericError::new(
            ErrorKind::Operator,
            format!("operator '{symbol}' is not defined for {lhs_type} and {rhs_type}"),
        )
        .with_payload(Value::object(details))
    }

    /// Unsupported unary operand.
    pub fn unary_operator(symbol: &str, value_type: &str) -> Self {
        let mut details = IndexMap::new();
        details.insert("operator".to_string(), Value::from(symbol));
        details.insert("valueType".to_string(), Value::from(value_type));
        GenericError::new(
            ErrorKind::Operator,
            format!("unary operator '{symbol}' is not defined for {value_type}"),
        )
        .with_payload(Value::object(details))
    }

    pub fn function(namespace: &str, name: &str, message: impl Into<String>) -> Self {
        GenericError::new(ErrorKind::Function, message).with_function(namespace, name)
    }

    pub fn evaluation(message: impl Into<String>) -> Self {
        GenericError::new(ErrorKind::Evaluation, message)
    }

    /// A program-raised error of the given type name.
    pub fn raised(kind: &str, message: impl Into<String>, payload: Value) -> Self {
        GenericError::new(ErrorKind::from_name(kind), message).with_payload(payload)
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    #[must_use]
    pub fn with_function(mut self, namespace: &str, name: &str) -> Self {
        if !namespace.is_empty() {
            self.function_namespace = Some(namespace.to_string());
        }
        self.function_name = Some(name.to_string());
        self
    }

    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Re-wrap: `self` becomes the outer error, `cause` the one it replaced.
    #[must_use]
    pub fn wrapping(mut self, cause: GenericError) -> Self {
        self.cause = Some(Rc::new(cause));
        self
    }

    /// The error as a program value.
    pub fn to_value(&self) -> Value {
        Value::Error(Rc::new(self.clone()))
    }
}

/// Why a select was asked to stop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakType {
    /// An aggregate has not finished collecting.
    FromAggregate,
    /// The program explicitly stopped.
    FromStop,
}

impl fmt::Display for BreakType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakType::FromAggregate => write!(f, "fromAggregate"),
            BreakType::FromStop => write!(f, "fromStop"),
        }
    }
}

/// Non-local exit out of an evaluation.
#[derive(Error, Clone, Debug, PartialEq)]
pub enum Signal {
    /// A structured error; the only variant exception handlers intercept.
    #[error(transparent)]
    Error(GenericError),

    #[error("break outside of a loop")]
    Break,

    #[error("continue outside of a loop")]
    Continue,

    #[error("select stopped ({break_type})")]
    BreakSelect {
        break_type: BreakType,
        value_on_break: Value,
    },
}

impl Signal {
    /// True for Break / Continue / BreakSelect.
    #[inline]
    pub fn is_control(&self) -> bool {
        !matches!(self, Signal::Error(_))
    }
}

impl From<GenericError> for Signal {
    #[inline]
    fn from(e: GenericError) -> Self {
        Signal::Error(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_error_payload() {
        let err = GenericError::operator("-", "Object", "Object");
        assert_eq!(err.kind, ErrorKind::Operator);
        assert_eq!(err.payload.get("operator"), Some(&Value::from("-")));
        assert_eq!(err.payload.get("lhsType"), Some(&Value::from("Object")));
        assert_eq!(err.payload.get("rhsType"), Some(&Value::from("Object")));
        assert!(err.to_string().starts_with("OperatorError"));
    }

    #[test]
    fn test_kind_names_round_trip() {
        for kind in [
            ErrorKind::Operator,
            ErrorKind::Function,
            ErrorKind::Component,
            ErrorKind::ComponentLoad,
            ErrorKind::Configuration,
            ErrorKind::Evaluation,
            ErrorKind::Raised("Custom".to_string()),
        ] {
            assert_eq!(ErrorKind::from_name(kind.name()), kind);
        }
    }

    #[test]
    fn test_control_signals_are_not_errors() {
        assert!(Signal::Break.is_control());
        assert!(Signal::Continue.is_control());
        assert!(Signal::BreakSelect {
            break_type: BreakType::FromStop,
            value_on_break: Value::Null,
        }
        .is_control());
        assert!(!Signal::from(GenericError::evaluation("x")).is_control());
    }

    #[test]
    fn test_wrapping_keeps_cause() {
        let inner = GenericError::raised("First", "first", Value::Null);
        let outer = GenericError::raised("Second", "second", Value::Null).wrapping(inner.clone());
        assert_eq!(outer.cause.as_deref(), Some(&inner));
    }
}
