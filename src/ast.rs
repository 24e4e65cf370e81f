// Program node tree
// Programs are built directly as trees; there is no text grammar in this crate

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::BreakType;
use crate::number::Number;
use crate::path::{PathMatch, PathPart};

/// Program node types
///
/// Every node is immutable once built. Shared sub-trees (lambda definitions,
/// let-bindings, handlers) sit behind `Arc`, so a whole program is `Send + Sync`
/// and can be evaluated from several threads, each with its own `Evaluator`.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// The absence value
    Empty,

    /// Null literal
    Null,

    /// Boolean literal
    Boolean(bool),

    /// Number literal, carrying the precision of its written form
    Number(Number),

    /// String literal
    String(String),

    /// Raw byte literal
    Raw(Vec<u8>),

    /// Array constructor; `Empty` elements are dropped
    Array(Vec<Node>),

    /// Object constructor; `Empty` members are dropped
    Object(Vec<(String, Node)>),

    /// The current value (`@`)
    CurrentValue,

    /// A named runtime value or let-binding (`$name`)
    ValueRef(String),

    /// Member of the current value
    Get(String),

    /// Element of the current value
    Index(usize),

    /// Sequential navigation: each step runs against the previous step's result
    Chain(Vec<Node>),

    /// Binary operation
    Binary {
        op: BinaryOp,
        lhs: Box<Node>,
        rhs: Box<Node>,
    },

    /// Unary operation
    Unary { op: UnaryOp, operand: Box<Node> },

    /// Built-in function call (`namespace:name(args)`)
    FunctionCall {
        namespace: String,
        name: String,
        args: Vec<Node>,
    },

    /// Lambda definition; evaluates to a `LambdaRef`
    Lambda(Arc<LambdaDef>),

    /// Invocation of a lambda value
    Invoke { target: Box<Node>, args: Vec<Node> },

    /// Default expression scope
    Scope {
        body: Box<Node>,
        handler: Option<Arc<ExceptionHandler>>,
    },

    /// Let-binding scope
    Let {
        bindings: Vec<Arc<LetBinding>>,
        body: Box<Node>,
        handler: Option<Arc<ExceptionHandler>>,
    },

    /// Select-query scope; the construct `Stop` breaks out of
    Select {
        bindings: Vec<Arc<LetBinding>>,
        body: Box<Node>,
        handler: Option<Arc<ExceptionHandler>>,
    },

    /// if / then / else
    Conditional {
        condition: Box<Node>,
        then: Box<Node>,
        otherwise: Option<Box<Node>>,
    },

    /// Loop over an Array, collecting non-Empty results
    Map { over: Box<Node>, body: Box<Node> },

    /// Fold over an Array with `$acc`
    Aggregate {
        over: Box<Node>,
        initial: Box<Node>,
        body: Box<Node>,
    },

    /// Leave the innermost loop
    Break,

    /// Skip to the next loop iteration
    Continue,

    /// Stop the innermost select with a value
    Stop {
        break_type: BreakType,
        value: Box<Node>,
    },

    /// Raise a structured error
    Raise {
        kind: String,
        code: Option<String>,
        message: Box<Node>,
        payload: Option<Box<Node>>,
    },

    /// A concrete path, linked to the current value
    PathLiteral(Vec<PathPart>),

    /// A path pattern, matched against the current value
    PathMatch(PathMatch),

    /// Hand a value to a named integration component (`->`)
    Sink { input: Box<Node>, component: String },
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    // Arithmetic and set-style
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,

    // Comparison
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,

    // Logical
    And,
    Or,
}

impl BinaryOp {
    pub const ALL: [BinaryOp; 14] = [
        BinaryOp::Add,
        BinaryOp::Subtract,
        BinaryOp::Multiply,
        BinaryOp::Divide,
        BinaryOp::Modulo,
        BinaryOp::Power,
        BinaryOp::Equal,
        BinaryOp::NotEqual,
        BinaryOp::LessThan,
        BinaryOp::LessThanOrEqual,
        BinaryOp::GreaterThan,
        BinaryOp::GreaterThanOrEqual,
        BinaryOp::And,
        BinaryOp::Or,
    ];

    /// The symbol used in error payloads and operator bindings.
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Power => "^",
            BinaryOp::Equal => "=",
            BinaryOp::NotEqual => "!=",
            BinaryOp::LessThan => "<",
            BinaryOp::LessThanOrEqual => "<=",
            BinaryOp::GreaterThan => ">",
            BinaryOp::GreaterThanOrEqual => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// Negation (-)
    Negate,

    /// Logical NOT
    Not,
}

impl UnaryOp {
    pub const ALL: [UnaryOp; 2] = [UnaryOp::Negate, UnaryOp::Not];

    /// The symbol used in error payloads.
    pub fn symbol(&self) -> &'static str {
        match self {
            UnaryOp::Negate => "-",
            UnaryOp::Not => "not",
        }
    }

    /// The key an operator binding uses; `-` alone would clash with subtraction.
    pub fn binding_symbol(&self) -> &'static str {
        match self {
            UnaryOp::Negate => "neg",
            UnaryOp::Not => "not",
        }
    }
}

/// Whether `symbol` names an operator that can be bound.
pub fn is_bindable_symbol(symbol: &str) -> bool {
    BinaryOp::ALL.iter().any(|op| op.symbol() == symbol)
        || UnaryOp::ALL.iter().any(|op| op.binding_symbol() == symbol)
}

/// One lambda parameter; a parameter without a default is required.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: Option<Node>,
}

impl Param {
    pub fn required(name: impl Into<String>) -> Self {
        Param {
            name: name.into(),
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>, default: Node) -> Self {
        Param {
            name: name.into(),
            default: Some(default),
        }
    }
}

/// A function definition.
#[derive(Debug, Clone, PartialEq)]
pub struct LambdaDef {
    pub params: Vec<Param>,
    pub body: Node,
    /// Invoke on first structural access instead of being passed around.
    pub invoke_on_access: bool,
    pub handler: Option<Arc<ExceptionHandler>>,
}

impl LambdaDef {
    pub fn new(params: Vec<Param>, body: Node) -> Self {
        LambdaDef {
            params,
            body,
            invoke_on_access: false,
            handler: None,
        }
    }

    #[must_use]
    pub fn invoked_on_access(mut self) -> Self {
        self.invoke_on_access = true;
        self
    }

    #[must_use]
    pub fn with_handler(mut self, handler: ExceptionHandler) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn required_params(&self) -> usize {
        self.params.iter().filter(|p| p.default.is_none()).count()
    }
}

/// When a let-binding's memoized value is cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResetPolicy {
    Never,
    AfterScope,
    AfterQuery,
    Always,
}

impl ResetPolicy {
    pub fn from_name(name: &str) -> Option<ResetPolicy> {
        match name {
            "NEVER" => Some(ResetPolicy::Never),
            "AFTER_SCOPE" => Some(ResetPolicy::AfterScope),
            "AFTER_QUERY" => Some(ResetPolicy::AfterQuery),
            "ALWAYS" => Some(ResetPolicy::Always),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ResetPolicy::Never => "NEVER",
            ResetPolicy::AfterScope => "AFTER_SCOPE",
            ResetPolicy::AfterQuery => "AFTER_QUERY",
            ResetPolicy::Always => "ALWAYS",
        }
    }
}

/// When a let-binding is first forced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluatePolicy {
    Lazy,
    Eager,
}

impl EvaluatePolicy {
    pub fn from_name(name: &str) -> Option<EvaluatePolicy> {
        match name {
            "LAZY" => Some(EvaluatePolicy::Lazy),
            "EAGER" => Some(EvaluatePolicy::Eager),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EvaluatePolicy::Lazy => "LAZY",
            EvaluatePolicy::Eager => "EAGER",
        }
    }
}

/// A named, memoizable sub-expression of a `Let` or `Select` scope.
///
/// `config`, when present, is evaluated once per binding to an Object with
/// optional `reset`, `evaluate` and `bind` members.
#[derive(Debug, Clone, PartialEq)]
pub struct LetBinding {
    pub name: String,
    pub expr: Node,
    pub config: Option<Node>,
    pub handler: Option<Arc<ExceptionHandler>>,
}

impl LetBinding {
    pub fn new(name: impl Into<String>, expr: Node) -> Self {
        LetBinding {
            name: name.into(),
            expr,
            config: None,
            handler: None,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: Node) -> Self {
        self.config = Some(config);
        self
    }

    /// Shorthand for a config object naming only the two policies.
    #[must_use]
    pub fn with_policies(self, reset: ResetPolicy, evaluate: EvaluatePolicy) -> Self {
        self.with_config(Node::Object(vec![
            ("reset".to_string(), Node::string(reset.name())),
            ("evaluate".to_string(), Node::string(evaluate.name())),
        ]))
    }

    #[must_use]
    pub fn with_handler(mut self, handler: ExceptionHandler) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }
}

/// An expression run when a statement fails with a structured error.
///
/// `handled` is the starting value of the statement's errorHandled flag; the
/// body may change it with `error:handled(bool)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionHandler {
    pub body: Node,
    pub handled: bool,
}

impl ExceptionHandler {
    /// A handler whose result replaces the failed statement's result.
    pub fn recover(body: Node) -> Self {
        ExceptionHandler {
            body,
            handled: true,
        }
    }

    /// A handler that observes the error and lets it propagate.
    pub fn observe(body: Node) -> Self {
        ExceptionHandler {
            body,
            handled: false,
        }
    }
}

/// A complete program: a root node run in the top-level From scope.
#[derive(Debug, Clone)]
pub struct Program {
    pub root: Arc<Node>,
    pub handler: Option<Arc<ExceptionHandler>>,
}

impl Program {
    pub fn new(root: Node) -> Self {
        Program {
            root: Arc::new(root),
            handler: None,
        }
    }

    #[must_use]
    pub fn with_handler(mut self, handler: ExceptionHandler) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }
}

impl Node {
    /// Create a string literal node
    pub fn string(s: impl Into<String>) -> Self {
        Node::String(s.into())
    }

    /// Create a number literal node; precision resolves from the value
    pub fn number(n: f64) -> Self {
        Node::Number(Number::new(n))
    }

    /// Create an integer literal node
    pub fn integer(n: i64) -> Self {
        Node::Number(Number::integer(n))
    }

    /// Create a number literal from its written form, keeping its precision
    pub fn decimal(text: &str) -> Self {
        match Number::parse(text) {
            Some(n) => Node::Number(n),
            None => Node::Null,
        }
    }

    /// Create a boolean literal node
    pub fn boolean(b: bool) -> Self {
        Node::Boolean(b)
    }

    /// Create a value reference node
    pub fn value_ref(name: impl Into<String>) -> Self {
        Node::ValueRef(name.into())
    }

    pub fn get(key: impl Into<String>) -> Self {
        Node::Get(key.into())
    }

    pub fn binary(op: BinaryOp, lhs: Node, rhs: Node) -> Self {
        Node::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn unary(op: UnaryOp, operand: Node) -> Self {
        Node::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn call(namespace: impl Into<String>, name: impl Into<String>, args: Vec<Node>) -> Self {
        Node::FunctionCall {
            namespace: namespace.into(),
            name: name.into(),
            args,
        }
    }

    pub fn lambda(params: Vec<Param>, body: Node) -> Self {
        Node::Lambda(Arc::new(LambdaDef::new(params, body)))
    }

    pub fn invoke(target: Node, args: Vec<Node>) -> Self {
        Node::Invoke {
            target: Box::new(target),
            args,
        }
    }

    pub fn scope(body: Node, handler: Option<ExceptionHandler>) -> Self {
        Node::Scope {
            body: Box::new(body),
            handler: handler.map(Arc::new),
        }
    }

    pub fn let_in(bindings: Vec<LetBinding>, body: Node) -> Self {
        Node::Let {
            bindings: bindings.into_iter().map(Arc::new).collect(),
            body: Box::new(body),
            handler: None,
        }
    }

    pub fn select(bindings: Vec<LetBinding>, body: Node) -> Self {
        Node::Select {
            bindings: bindings.into_iter().map(Arc::new).collect(),
            body: Box::new(body),
            handler: None,
        }
    }

    pub fn raise(kind: impl Into<String>, message: impl Into<String>, payload: Option<Node>) -> Self {
        Node::Raise {
            kind: kind.into(),
            code: None,
            message: Box::new(Node::String(message.into())),
            payload: payload.map(Box::new),
        }
    }

    pub fn map(over: Node, body: Node) -> Self {
        Node::Map {
            over: Box::new(over),
            body: Box::new(body),
        }
    }

    pub fn conditional(condition: Node, then: Node, otherwise: Option<Node>) -> Self {
        Node::Conditional {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: otherwise.map(Box::new),
        }
    }
}
