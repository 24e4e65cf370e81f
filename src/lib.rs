// jsonflow_core - Evaluation engine for a JSON-native query language
// Copyright (c) 2025 jsonflow contributors
// Licensed under the MIT License

//! # jsonflow_core
//!
//! The interpreter core of a JSON-native query and transformation language.
//! Programs are trees of [`Node`]s, evaluated against a [`Value`] by an
//! [`Evaluator`].
//!
//! ## Architecture
//!
//! - `value` - Runtime values, operator bindings and let memo slots
//! - `number` - Numbers with decimal precision tracking
//! - `raw` - Byte buffers and their text codecs
//! - `path` - Concrete paths, path patterns, retain and reclude
//! - `ast` - Program trees
//! - `error` - Structured errors and control signals
//! - `statement` - The scope chain evaluation runs on
//! - `operators` - Built-in operator semantics
//! - `evaluator` - Node evaluation, operator overrides, let memoization, handlers
//! - `functions` - Built-in function library
//! - `signature` - Function signature validation
//! - `component` - Input drivers, output components and their registry
//! - `state` - Keyed state across evaluations
//! - `config` - Evaluator and component configuration
//!
//! ## Example
//!
//! ```
//! use jsonflow_core::{value, BinaryOp, Evaluator, Node, Program};
//!
//! let program = Program::new(Node::binary(
//!     BinaryOp::Add,
//!     Node::get("price"),
//!     Node::decimal("0.50"),
//! ));
//! let result = Evaluator::new().evaluate(&program, value!({"price": 2}));
//! assert_eq!(result.to_string(), "2.50");
//! ```

pub mod ast;
pub mod component;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod functions;
pub mod number;
pub mod operators;
pub mod path;
pub mod raw;
pub mod signature;
pub mod state;
pub mod statement;
pub mod value;

pub use ast::{
    BinaryOp, EvaluatePolicy, ExceptionHandler, LambdaDef, LetBinding, Node, Param, Program, ResetPolicy, UnaryOp,
};
pub use component::{
    ComponentDefinition, ComponentError, ComponentLoadError, ComponentRegistry, ContextManager, InputSourceDriver,
    IntegrationComponent, LogComponent, MemoryComponent, ValueSourceDriver,
};
pub use config::{ConfigurationError, EvaluatorConfig, RetryPolicy};
pub use error::{BreakType, ErrorKind, Flow, GenericError, Signal};
pub use evaluator::Evaluator;
pub use number::Number;
pub use path::{MatchPart, Path, PathMatch, PathPart};
pub use raw::Raw;
pub use state::{MemoryBackend, RetryingStore, StateBackend, StateStore};
pub use value::{Evaluated, Value};

#[doc(hidden)]
pub mod __private {
    pub use indexmap::IndexMap;
}
