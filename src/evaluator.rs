// Program evaluator
// Walks a Node tree over the statement chain; errors and control signals travel as `Signal`

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, error, trace, warn};

use crate::ast::{
    is_bindable_symbol, BinaryOp, EvaluatePolicy, ExceptionHandler, LambdaDef, LetBinding, Node, Program,
    ResetPolicy, UnaryOp,
};
use crate::component::{ComponentLoadError, ComponentRegistry, IntegrationComponent};
use crate::config::{ConfigurationError, EvaluatorConfig, Options};
use crate::error::{ErrorKind, Flow, GenericError, Signal};
use crate::functions::{self, FunctionError};
use crate::operators;
use crate::path::{self, MatchEnv, Path, PathMatch, PathPart};
use crate::signature::{self, SignatureError};
use crate::state::StateStore;
use crate::statement::{Resolved, StatementChain, StatementKind, ACCUMULATOR, ERROR};
use crate::value::{Evaluated, LambdaRef, OperatorBinding, OperatorBindings, Value};

/// Let-binding identity: the same `Arc` in the same program instance.
#[derive(Clone)]
struct LetKey(Arc<LetBinding>);

impl PartialEq for LetKey {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for LetKey {}

impl Hash for LetKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.0).hash(state);
    }
}

/// A let-binding's configuration, resolved once.
#[derive(Debug, Clone)]
struct LetConfig {
    reset: ResetPolicy,
    evaluate: EvaluatePolicy,
    bindings: OperatorBindings,
}

/// Grow the stack when less than this much remains.
const RED_ZONE: usize = 128 * 1024;

/// Size of each new stack segment.
const STACK_PER_RECURSION: usize = 1024 * 1024;

/// Run `f` with enough stack left for one more level of node evaluation;
/// debug builds use several kilobytes per level.
#[inline]
#[cfg(not(target_arch = "wasm32"))]
fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}

#[inline]
#[cfg(target_arch = "wasm32")]
fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    f()
}

/// Evaluator state shared by every evaluation of every program it runs.
pub struct Evaluator {
    config: EvaluatorConfig,
    statements: StatementChain,
    depth: usize,
    let_configs: HashMap<LetKey, Rc<LetConfig>>,
    /// NEVER memos; survive across evaluations.
    persistent: HashMap<LetKey, Evaluated>,
    /// AFTER_QUERY memos; cleared when a top-level evaluation ends.
    per_query: HashMap<LetKey, Evaluated>,
    components: IndexMap<String, Box<dyn IntegrationComponent>>,
    state: Option<Box<dyn StateStore>>,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator {
    pub fn new() -> Self {
        Self::with_config(EvaluatorConfig::default())
    }

    pub fn with_config(config: EvaluatorConfig) -> Self {
        Evaluator {
            config,
            statements: StatementChain::new(),
            depth: 0,
            let_configs: HashMap::new(),
            persistent: HashMap::new(),
            per_query: HashMap::new(),
            components: IndexMap::new(),
            state: None,
        }
    }

    #[must_use]
    pub fn with_state_store(mut self, store: impl StateStore + 'static) -> Self {
        self.state = Some(Box::new(store));
        self
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Make a component reachable from `Sink` nodes under its own name.
    pub fn register_component(&mut self, component: Box<dyn IntegrationComponent>) {
        self.components.insert(component.name().to_string(), component);
    }

    /// Instantiate the definition `name` from `registry` and register it.
    pub fn load_component(&mut self, registry: &ComponentRegistry, name: &str) -> Result<(), ComponentLoadError> {
        let component = registry.instantiate(name)?;
        self.components.insert(name.to_string(), component);
        Ok(())
    }

    /// Statements currently on the chain; zero between evaluations.
    pub fn live_statements(&self) -> usize {
        self.statements.len()
    }

    /// Drop every NEVER memo and every resolved let configuration.
    pub fn forget_memos(&mut self) {
        debug!(count = self.persistent.len(), "persistent let memos cleared");
        self.persistent.clear();
        self.let_configs.clear();
    }

    /// Evaluate `program` against `input`. An unhandled error comes back as a
    /// `Value::Error`.
    #[tracing::instrument(skip_all)]
    pub fn evaluate(&mut self, program: &Program, input: Value) -> Value {
        match self.try_evaluate(program, input) {
            Ok(value) => value,
            Err(e) => {
                error!(kind = %e.kind, message = %e.message, "unhandled error");
                e.to_value()
            }
        }
    }

    pub fn try_evaluate(&mut self, program: &Program, input: Value) -> Result<Value, GenericError> {
        let base = self.statements.len();
        let root = self.statements.push(StatementKind::From, None);
        self.statements.set_path(root, Path::root_path().linked_to(&input));
        self.statements.set_current(root, Evaluated::new(input));

        let result = self.eval(&program.root, root);
        let result = self.guarded(root, program.handler.as_deref(), result);

        self.statements.truncate(base);
        if !self.per_query.is_empty() {
            debug!(count = self.per_query.len(), "per-query let memos cleared");
            self.per_query.clear();
        }

        match result {
            Ok(evaluated) => Ok(evaluated.value),
            Err(Signal::Error(e)) => Err(e),
            Err(Signal::BreakSelect {
                break_type,
                value_on_break,
            }) => {
                debug!(%break_type, "select stopped at top level");
                Ok(value_on_break)
            }
            Err(control) => Err(GenericError::evaluation(control.to_string())),
        }
    }

    /// Evaluate a node, enforcing the depth limit.
    fn eval(&mut self, node: &Node, stmt: usize) -> Flow {
        self.depth += 1;
        if self.depth > self.config.max_depth {
            self.depth -= 1;
            return Err(GenericError::evaluation(format!(
                "maximum evaluation depth ({}) exceeded",
                self.config.max_depth
            ))
            .into());
        }

        let result = ensure_sufficient_stack(|| self.eval_node(node, stmt));

        self.depth -= 1;
        result
    }

    fn eval_node(&mut self, node: &Node, stmt: usize) -> Flow {
        trace!(node = node_name(node), stmt, "eval");
        match node {
            Node::Empty => Ok(Value::Empty.into()),
            Node::Null => Ok(Value::Null.into()),
            Node::Boolean(b) => Ok(Value::Bool(*b).into()),
            Node::Number(n) => Ok(Value::Number(*n).into()),
            Node::String(s) => Ok(Value::from(s.as_str()).into()),
            Node::Raw(bytes) => Ok(Value::raw(bytes.clone()).into()),
            Node::Array(items) => self.eval_array(items, stmt),
            Node::Object(members) => self.eval_object(members, stmt),
            Node::CurrentValue => Ok(self.statements.current(stmt)),
            Node::ValueRef(name) => self.eval_ref(name, stmt),
            Node::Get(key) => self.eval_get(key, stmt),
            Node::Index(index) => self.eval_index(*index, stmt),
            Node::Chain(steps) => self.eval_chain(steps, stmt),
            Node::Binary { op, lhs, rhs } => self.eval_binary(*op, lhs, rhs, stmt),
            Node::Unary { op, operand } => self.eval_unary(*op, operand, stmt),
            Node::FunctionCall {
                namespace,
                name,
                args,
            } => self.call_function(namespace, name, args, stmt),
            Node::Lambda(def) => Ok(self.make_lambda(def, stmt)),
            Node::Invoke { target, args } => self.eval_invoke(target, args, stmt),
            Node::Scope { body, handler } => self.within(StatementKind::Scope, stmt, |ev, idx| {
                let result = ev.eval(body, idx);
                ev.guarded(idx, handler.as_deref(), result)
            }),
            Node::Let {
                bindings,
                body,
                handler,
            } => self.eval_let(StatementKind::Let, bindings, body, handler.as_deref(), stmt),
            Node::Select {
                bindings,
                body,
                handler,
            } => self.eval_let(StatementKind::Select, bindings, body, handler.as_deref(), stmt),
            Node::Conditional {
                condition,
                then,
                otherwise,
            } => self.eval_conditional(condition, then, otherwise.as_deref(), stmt),
            Node::Map { over, body } => self.eval_map(over, body, stmt),
            Node::Aggregate {
                over,
                initial,
                body,
            } => self.eval_aggregate(over, initial, body, stmt),
            Node::Break => Err(Signal::Break),
            Node::Continue => Err(Signal::Continue),
            Node::Stop { break_type, value } => {
                let value = self.eval(value, stmt)?;
                Err(Signal::BreakSelect {
                    break_type: *break_type,
                    value_on_break: value.value,
                })
            }
            Node::Raise {
                kind,
                code,
                message,
                payload,
            } => self.eval_raise(kind, code.as_deref(), message, payload.as_deref(), stmt),
            Node::PathLiteral(parts) => {
                let current = self.statements.current(stmt).value;
                Ok(Value::path(Path::new(parts.clone()).linked_to(&current)).into())
            }
            Node::PathMatch(pattern) => self.eval_path_match(pattern, stmt),
            Node::Sink { input, component } => self.eval_sink(input, component, stmt),
        }
    }

    /// Run `f` in a fresh child statement of `parent`, popping it (and anything
    /// left above it) afterwards.
    fn within<T>(&mut self, kind: StatementKind, parent: usize, f: impl FnOnce(&mut Self, usize) -> T) -> T {
        let idx = self.statements.push(kind, Some(parent));
        let result = f(self, idx);
        self.statements.truncate(idx);
        result
    }

    /// Evaluate `node` against its own fork of the current value, so siblings
    /// never see each other's changes.
    fn eval_forked(&mut self, node: &Node, stmt: usize, current: &Evaluated) -> Flow {
        self.within(StatementKind::Scope, stmt, |ev, idx| {
            ev.statements.set_current(idx, current.clone());
            ev.eval(node, idx)
        })
    }

    /// Force an invoke-on-access lambda to its value; anything else as is.
    fn unbox(&mut self, evaluated: Evaluated, stmt: usize) -> Flow {
        let lambda = match &evaluated.value {
            Value::Lambda(lambda) if lambda.invokes_on_access() => lambda.clone(),
            _ => return Ok(evaluated),
        };
        let mut result = match lambda.forced() {
            Some(done) => done,
            None => {
                let done = self.invoke_lambda(&lambda, Vec::new(), stmt)?;
                lambda.set_forced(done.clone());
                done
            }
        };
        if result.bindings.is_empty() {
            result.bindings = evaluated.bindings;
        }
        Ok(result)
    }

    fn eval_array(&mut self, items: &[Node], stmt: usize) -> Flow {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let value = self.eval(item, stmt)?.value;
            if !value.is_empty() {
                out.push(value);
            }
        }
        Ok(Value::array(out).into())
    }

    fn eval_object(&mut self, members: &[(String, Node)], stmt: usize) -> Flow {
        let mut out = IndexMap::with_capacity(members.len());
        for (key, node) in members {
            let value = self.eval(node, stmt)?.value;
            if !value.is_empty() {
                out.insert(key.clone(), value);
            }
        }
        Ok(Value::object(out).into())
    }

    fn eval_ref(&mut self, name: &str, stmt: usize) -> Flow {
        match self.statements.resolve(stmt, name) {
            Some(Resolved::Value(value)) => Ok(value),
            Some(Resolved::Let(owner, binding)) => self.force_let(owner, &binding),
            None => Ok(Value::Empty.into()),
        }
    }

    fn eval_get(&mut self, key: &str, stmt: usize) -> Flow {
        let current = self.statements.current(stmt);
        let current = self.unbox(current, stmt)?;
        Ok(get_member(&current.value, key).into())
    }

    fn eval_index(&mut self, index: usize, stmt: usize) -> Flow {
        let current = self.statements.current(stmt);
        let current = self.unbox(current, stmt)?;
        Ok(current.value.get_index(index).cloned().unwrap_or_default().into())
    }

    fn eval_chain(&mut self, steps: &[Node], stmt: usize) -> Flow {
        self.within(StatementKind::Scope, stmt, |ev, idx| {
            let mut result = ev.statements.current(idx);
            for step in steps {
                let cursor = ev.statements.path(idx).cloned();
                let before = ev.statements.current(idx).value;
                result = ev.eval(step, idx)?;
                let next = match (step, cursor) {
                    (Node::Get(key), Some(cursor)) if before.is_object() => cursor.child(PathPart::Key(key.clone())),
                    (Node::Index(index), Some(cursor)) if before.is_array() => cursor.child(PathPart::Index(*index)),
                    _ => Path::root_path().linked_to(&result.value),
                };
                ev.statements.set_path(idx, next);
                ev.statements.set_current(idx, result.clone());
            }
            Ok(result)
        })
    }

    fn eval_binary(&mut self, op: BinaryOp, lhs: &Node, rhs: &Node, stmt: usize) -> Flow {
        let current = self.statements.current(stmt);
        let left = self.eval_forked(lhs, stmt, &current)?;
        let right = self.eval_forked(rhs, stmt, &current)?;
        let left = self.unbox(left, stmt)?;
        let right = self.unbox(right, stmt)?;

        if let Some(result) = self.delegate(op.symbol(), &left, Some(&right), stmt)? {
            return Ok(result);
        }
        Ok(operators::binary(op, &left.value, &right.value)?.into())
    }

    fn eval_unary(&mut self, op: UnaryOp, operand: &Node, stmt: usize) -> Flow {
        let value = self.eval(operand, stmt)?;
        let value = self.unbox(value, stmt)?;

        if let Some(result) = self.delegate(op.binding_symbol(), &value, None, stmt)? {
            return Ok(result);
        }
        Ok(operators::unary(op, &value.value)?.into())
    }

    /// Hand the operator to a user override when an operand carries an active
    /// one for `symbol`. The left operand's override wins.
    fn delegate(
        &mut self,
        symbol: &str,
        lhs: &Evaluated,
        rhs: Option<&Evaluated>,
        stmt: usize,
    ) -> Flow<Option<Evaluated>> {
        let winner = lhs
            .bindings
            .lookup(symbol)
            .map(|binding| (binding.clone(), lhs.bindings.clone()))
            .or_else(|| {
                rhs.and_then(|r| r.bindings.lookup(symbol).map(|binding| (binding.clone(), r.bindings.clone())))
            });
        let Some((binding, winning)) = winner else {
            return Ok(None);
        };
        debug!(symbol, cascade = binding.cascade, "operator delegated to binding");

        // Operands go in deactivated so the override cannot recurse into itself.
        let mut args = vec![Evaluated::with_bindings(lhs.value.deep_copy(), lhs.bindings.deactivated())];
        if let Some(rhs) = rhs {
            args.push(Evaluated::with_bindings(rhs.value.deep_copy(), rhs.bindings.deactivated()));
        }
        let result = self.invoke_lambda(&binding.function, args, stmt)?;

        let bindings = if binding.cascade {
            winning.activated()
        } else {
            OperatorBindings::default()
        };
        Ok(Some(Evaluated::with_bindings(result.value, bindings)))
    }

    fn call_function(&mut self, namespace: &str, name: &str, args: &[Node], stmt: usize) -> Flow {
        let at = |e: SignatureError| FunctionError::from(e).at(namespace, name);
        let signature = signature::builtin(namespace, name).map_err(at)?;
        signature.validate_arg_count(args.len()).map_err(at)?;

        // Every argument sees the original current value.
        let current = self.statements.current(stmt);
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            let value = self.eval_forked(arg, stmt, &current)?;
            values.push(self.unbox(value, stmt)?);
        }
        let plain: Vec<Value> = values.iter().map(|e| e.value.clone()).collect();
        signature.validate_types(&plain).map_err(at)?;

        Ok(self.dispatch(namespace, name, &values, stmt)?)
    }

    fn dispatch(
        &mut self,
        namespace: &str,
        name: &str,
        args: &[Evaluated],
        stmt: usize,
    ) -> Result<Evaluated, GenericError> {
        use functions::{common, error as errors, object, path as paths, raw, state, stream};

        let at = |e: FunctionError| e.at(namespace, name);
        let value = match (namespace, name, args) {
            ("core", "type", [v]) => common::type_of(&v.value),
            ("core", "copy", [v]) => return Ok(v.copy()),
            ("core", "isEmpty", [v]) => common::is_empty(&v.value),
            ("core", "count", [v]) => common::count(&v.value),

            ("object", "update", [obj, patch]) => object::update(&obj.value, &patch.value).map_err(at)?,
            ("object", "upsert", [obj, patch]) => object::upsert(&obj.value, &patch.value).map_err(at)?,
            ("object", "rename", [obj, from, to]) => object::rename(&obj.value, text(from), text(to)).map_err(at)?,
            ("object", "remove", [obj, key]) => object::remove(&obj.value, text(key)).map_err(at)?,

            ("path", "retain", [obj, list]) => paths::retain(&obj.value, &list.value).map_err(at)?,
            ("path", "reclude", [obj, list]) => paths::reclude(&obj.value, &list.value).map_err(at)?,
            ("path", "merge", [a, b]) => paths::merge(&a.value, &b.value),
            ("path", "paths", [v]) => paths::leaves(&v.value),
            ("path", "value", [p]) => p.value.as_path().map(paths::value).unwrap_or_default(),
            ("path", "get", [v, p]) => p.value.as_path().map(|p| paths::get(&v.value, p)).unwrap_or_default(),
            ("path", "current", []) => self.statements.path(stmt).cloned().map(Value::path).unwrap_or_default(),
            ("path", "create", [parts]) => paths::create(&parts.value).map_err(at)?,

            ("raw", "encodeBase64", [r]) => raw::encode_base64(&bytes(r)),
            ("raw", "toHex", [r]) => raw::to_hex(&bytes(r)),
            ("raw", "toString", [r]) => raw::to_string(&bytes(r)).map_err(at)?,
            ("raw", "decodeBase64", [s]) => raw::decode_base64(text(s)).map_err(at)?,
            ("raw", "fromHex", [s]) => raw::from_hex(text(s)).map_err(at)?,
            ("raw", "fromString", [s]) => raw::from_string(text(s)),

            ("error", "create", [kind, message, rest @ ..]) => {
                errors::create(text(kind), text(message), rest.first().map(|p| &p.value))
            }
            ("error", "kind", [e]) => e.value.as_error().map(errors::kind).unwrap_or_default(),
            ("error", "message", [e]) => e.value.as_error().map(errors::message).unwrap_or_default(),
            ("error", "payload", [e]) => e.value.as_error().map(errors::payload).unwrap_or_default(),
            ("error", "handled", [flag]) => self.mark_handled(stmt, flag.value.as_bool().unwrap_or(false))?,

            ("state", "get", [key, rest @ ..]) => {
                let store = self.state_store()?;
                state::get(store, text(key), rest.first().map(|d| &d.value)).map_err(at)?
            }
            ("state", "set", [key, value]) => {
                let store = self.state_store()?;
                state::set(store, text(key), &value.value).map_err(at)?
            }

            ("stream", "collect", [s]) => match &s.value {
                Value::Stream(source) => stream::collect(source),
                _ => Value::Empty,
            },

            _ => {
                return Err(at(FunctionError::Argument(format!(
                    "{} arguments do not fit {}:{}",
                    args.len(),
                    namespace,
                    name
                ))))
            }
        };
        Ok(value.into())
    }

    /// `error:handled(flag)`: set errorHandled on the nearest handler statement.
    fn mark_handled(&mut self, stmt: usize, handled: bool) -> Result<Value, GenericError> {
        let idx = self
            .statements
            .nearest(stmt, StatementKind::Exception)
            .ok_or_else(|| {
                GenericError::function("error", "handled", "called outside of an exception handler")
            })?;
        if let Some(statement) = self.statements.get_mut(idx) {
            statement.handled = handled;
        }
        Ok(Value::Bool(handled))
    }

    fn state_store(&mut self) -> Result<&mut (dyn StateStore + 'static), GenericError> {
        self.state.as_deref_mut().ok_or_else(|| {
            GenericError::new(ErrorKind::Component, "no state store configured").with_code("NO_STATE_STORE")
        })
    }

    fn make_lambda(&self, def: &Arc<LambdaDef>, stmt: usize) -> Evaluated {
        let captured = self.statements.visible_values(stmt);
        Evaluated::new(Value::Lambda(Rc::new(LambdaRef::new(def.clone(), captured))))
    }

    fn eval_invoke(&mut self, target: &Node, args: &[Node], stmt: usize) -> Flow {
        let callee = self.eval(target, stmt)?;
        let lambda = match &callee.value {
            Value::Lambda(lambda) => lambda.clone(),
            other => {
                return Err(GenericError::evaluation(format!(
                    "cannot invoke a value of type {}",
                    other.type_name()
                ))
                .into())
            }
        };

        let current = self.statements.current(stmt);
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval_forked(arg, stmt, &current)?);
        }
        self.invoke_lambda(&lambda, values, stmt)
    }

    /// Run a lambda body in a Function statement parented on the caller.
    fn invoke_lambda(&mut self, lambda: &LambdaRef, args: Vec<Evaluated>, caller: usize) -> Flow {
        let def = lambda.def.clone();
        if args.len() > def.params.len() {
            return Err(GenericError::new(
                ErrorKind::Function,
                format!("lambda takes {} arguments, got {}", def.params.len(), args.len()),
            )
            .into());
        }

        self.within(StatementKind::Function, caller, |ev, idx| {
            for (name, value) in lambda.captured.iter() {
                ev.statements.set_value(idx, name, value.clone());
            }

            let mut args = args.into_iter();
            for param in &def.params {
                // An Empty argument falls back to the parameter's default.
                let supplied = args
                    .next()
                    .filter(|arg| !(arg.value.is_empty() && param.default.is_some()));
                let value = match (supplied, &param.default) {
                    (Some(value), _) => value,
                    (None, Some(default)) => ev.eval(default, idx)?,
                    (None, None) => {
                        return Err(GenericError::new(
                            ErrorKind::Function,
                            format!("missing argument '{}'", param.name),
                        )
                        .into())
                    }
                };
                ev.statements.set_value(idx, &param.name, value);
            }

            let result = ev.eval(&def.body, idx);
            ev.guarded(idx, def.handler.as_deref(), result)
        })
    }

    fn eval_let(
        &mut self,
        kind: StatementKind,
        bindings: &[Arc<LetBinding>],
        body: &Node,
        handler: Option<&ExceptionHandler>,
        stmt: usize,
    ) -> Flow {
        self.within(kind, stmt, |ev, idx| {
            let result = ev.enter_let(idx, bindings, body);
            let result = ev.guarded(idx, handler, result);
            match result {
                Err(Signal::BreakSelect {
                    break_type,
                    value_on_break,
                }) if kind == StatementKind::Select => {
                    debug!(%break_type, "select stopped");
                    Ok(value_on_break.into())
                }
                other => other,
            }
        })
    }

    fn enter_let(&mut self, idx: usize, bindings: &[Arc<LetBinding>], body: &Node) -> Flow {
        for binding in bindings {
            self.statements.declare_let(idx, binding.clone());
        }
        for binding in bindings {
            if self.let_config(binding, idx)?.evaluate == EvaluatePolicy::Eager {
                self.force_let(idx, binding)?;
            }
        }
        self.eval(body, idx)
    }

    /// Resolve (once per binding) the let configuration.
    fn let_config(&mut self, binding: &Arc<LetBinding>, stmt: usize) -> Flow<Rc<LetConfig>> {
        let key = LetKey(binding.clone());
        if let Some(config) = self.let_configs.get(&key) {
            return Ok(config.clone());
        }

        let config = match &binding.config {
            None => LetConfig {
                reset: self.config.default_reset,
                evaluate: self.config.default_evaluate,
                bindings: OperatorBindings::default(),
            },
            Some(node) => {
                let value = self.eval(node, stmt)?.value;
                self.parse_let_config(&value).map_err(GenericError::from)?
            }
        };
        debug!(
            name = %binding.name,
            reset = config.reset.name(),
            evaluate = config.evaluate.name(),
            bound = ?config.bindings.symbols(),
            "let configuration resolved"
        );

        let config = Rc::new(config);
        self.let_configs.insert(key, config.clone());
        Ok(config)
    }

    fn parse_let_config(&self, value: &Value) -> Result<LetConfig, ConfigurationError> {
        let options = Options::new(value)?;
        options.only(&["reset", "evaluate", "bind"])?;

        let reset = match options.get("reset") {
            None => self.config.default_reset,
            Some(v) => v
                .as_str()
                .and_then(ResetPolicy::from_name)
                .ok_or_else(|| invalid_value("reset", v))?,
        };
        let evaluate = match options.get("evaluate") {
            None => self.config.default_evaluate,
            Some(v) => v
                .as_str()
                .and_then(EvaluatePolicy::from_name)
                .ok_or_else(|| invalid_value("evaluate", v))?,
        };

        let mut map = IndexMap::new();
        match options.get("bind") {
            None => {}
            Some(Value::Object(entries)) => {
                for (symbol, entry) in entries.iter() {
                    if !is_bindable_symbol(symbol) {
                        return Err(ConfigurationError::InvalidValue {
                            option: "bind".to_string(),
                            value: symbol.clone(),
                        });
                    }
                    let function = match entry.get("function") {
                        Some(Value::Lambda(lambda)) => lambda.clone(),
                        other => {
                            return Err(ConfigurationError::InvalidType {
                                option: format!("bind.{}.function", symbol),
                                expected: "a Lambda",
                                found: other.map_or("Empty", Value::type_name).to_string(),
                            })
                        }
                    };
                    let cascade = entry.get("cascade").and_then(Value::as_bool).unwrap_or(false);
                    map.insert(symbol.clone(), OperatorBinding { function, cascade });
                }
            }
            Some(other) => {
                return Err(ConfigurationError::InvalidType {
                    option: "bind".to_string(),
                    expected: "an Object",
                    found: other.type_name().to_string(),
                })
            }
        }

        Ok(LetConfig {
            reset,
            evaluate,
            bindings: OperatorBindings::new(map),
        })
    }

    /// The value of a let-binding declared on `owner`, memoized per its reset
    /// policy.
    fn force_let(&mut self, owner: usize, binding: &Arc<LetBinding>) -> Flow {
        let config = self.let_config(binding, owner)?;
        let key = LetKey(binding.clone());

        let memo = match config.reset {
            ResetPolicy::AfterScope => self.statements.let_memo(owner, &binding.name).cloned(),
            ResetPolicy::AfterQuery => self.per_query.get(&key).cloned(),
            ResetPolicy::Never => self.persistent.get(&key).cloned(),
            ResetPolicy::Always => None,
        };
        if let Some(value) = memo {
            debug!(name = %binding.name, reset = config.reset.name(), "let memo hit");
            return Ok(value);
        }

        let computed = self.within(StatementKind::Binding, owner, |ev, idx| {
            let result = ev.eval(&binding.expr, idx);
            ev.guarded(idx, binding.handler.as_deref(), result)
        })?;
        let bindings = if config.bindings.is_empty() {
            computed.bindings
        } else {
            config.bindings.clone()
        };
        let value = Evaluated::with_bindings(computed.value, bindings);

        match config.reset {
            ResetPolicy::AfterScope => self.statements.store_let_memo(owner, &binding.name, value.clone()),
            ResetPolicy::AfterQuery => {
                self.per_query.insert(key, value.clone());
            }
            ResetPolicy::Never => {
                self.persistent.insert(key, value.clone());
            }
            ResetPolicy::Always => debug!(name = %binding.name, "let recomputed"),
        }
        Ok(value)
    }

    fn eval_conditional(&mut self, condition: &Node, then: &Node, otherwise: Option<&Node>, stmt: usize) -> Flow {
        let verdict = self.eval(condition, stmt)?;
        let verdict = self.unbox(verdict, stmt)?;
        if operators::truthy(&verdict.value) {
            self.eval(then, stmt)
        } else if let Some(otherwise) = otherwise {
            self.eval(otherwise, stmt)
        } else {
            Ok(Value::Empty.into())
        }
    }

    /// The values a loop walks, plus the source they came from.
    fn loop_items(&mut self, over: &Node, stmt: usize) -> Flow<(Value, Vec<Value>)> {
        let source = self.eval(over, stmt)?;
        let source = self.unbox(source, stmt)?.value;
        let items = match &source {
            Value::Empty => Vec::new(),
            Value::Array(items) => items.iter().cloned().collect(),
            Value::Stream(stream) => stream.drain(),
            other => vec![other.clone()],
        };
        Ok((source, items))
    }

    /// Evaluate `body` once for `item` in a Loop statement.
    fn iterate(&mut self, body: &Node, stmt: usize, source: &Value, index: usize, item: Value, acc: Option<&Evaluated>) -> Flow {
        self.within(StatementKind::Loop, stmt, |ev, idx| {
            if source.is_array() {
                let cursor = Path::root_path().linked_to(source).child(PathPart::Index(index));
                ev.statements.set_path(idx, cursor);
            }
            ev.statements.set_current(idx, Evaluated::new(item));
            if let Some(acc) = acc {
                ev.statements.set_value(idx, ACCUMULATOR, acc.clone());
            }
            ev.eval(body, idx)
        })
    }

    fn eval_map(&mut self, over: &Node, body: &Node, stmt: usize) -> Flow {
        let (source, items) = self.loop_items(over, stmt)?;
        let mut out = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            match self.iterate(body, stmt, &source, index, item, None) {
                Ok(result) if result.value.is_empty() => {}
                Ok(result) => out.push(result.value),
                Err(Signal::Continue) => continue,
                Err(Signal::Break) => break,
                Err(other) => return Err(other),
            }
        }
        Ok(Value::array(out).into())
    }

    fn eval_aggregate(&mut self, over: &Node, initial: &Node, body: &Node, stmt: usize) -> Flow {
        let (source, items) = self.loop_items(over, stmt)?;
        let mut acc = self.eval(initial, stmt)?;
        for (index, item) in items.into_iter().enumerate() {
            match self.iterate(body, stmt, &source, index, item, Some(&acc)) {
                Ok(result) => acc = result,
                Err(Signal::Continue) => continue,
                Err(Signal::Break) => break,
                Err(other) => return Err(other),
            }
        }
        Ok(acc)
    }

    fn eval_raise(
        &mut self,
        kind: &str,
        code: Option<&str>,
        message: &Node,
        payload: Option<&Node>,
        stmt: usize,
    ) -> Flow {
        let message = match self.eval(message, stmt)?.value {
            Value::String(s) => s.to_string(),
            other => other.to_string(),
        };
        let payload = match payload {
            Some(node) => self.eval(node, stmt)?.value,
            None => Value::Empty,
        };

        let mut err = GenericError::raised(kind, message, payload);
        if let Some(code) = code {
            err = err.with_code(code);
        }
        if let Some(cursor) = self.statements.path(stmt) {
            err = err.with_location(cursor.to_string());
        }
        Err(err.into())
    }

    fn eval_path_match(&mut self, pattern: &PathMatch, stmt: usize) -> Flow {
        let current = self.statements.current(stmt);
        let current = self.unbox(current, stmt)?.value;
        let mut scope = MatchScope { evaluator: self, stmt };
        let found = path::find_matches(pattern, &current, &mut scope)?;
        Ok(Value::array(found.into_iter().map(Value::path).collect()).into())
    }

    fn eval_sink(&mut self, input: &Node, component: &str, stmt: usize) -> Flow {
        let value = self.eval(input, stmt)?;
        let value = self.unbox(value, stmt)?;
        let target = self
            .components
            .get_mut(component)
            .ok_or_else(|| GenericError::from(ComponentLoadError::UnknownComponent(component.to_string())))?;
        let produced = target.produce(value.value).map_err(GenericError::from)?;
        Ok(Evaluated::with_bindings(produced, value.bindings))
    }

    /// Apply `handler` to a failed statement. Only structured errors reach the
    /// handler; control signals and successes pass through untouched.
    fn guarded(&mut self, stmt: usize, handler: Option<&ExceptionHandler>, result: Flow) -> Flow {
        let Some(handler) = handler else {
            return result;
        };
        let original = match result {
            Err(Signal::Error(e)) => e,
            other => return other,
        };

        let (outcome, handled) = self.within(StatementKind::Exception, stmt, |ev, idx| {
            let error_value = Evaluated::new(original.to_value());
            ev.statements.set_current(idx, error_value.clone());
            ev.statements.set_value(idx, ERROR, error_value);
            if let Some(statement) = ev.statements.get_mut(idx) {
                statement.handled = handler.handled;
            }
            let outcome = ev.eval(&handler.body, idx);
            let handled = ev.statements.get(idx).is_some_and(|s| s.handled);
            (outcome, handled)
        });

        match outcome {
            Ok(recovered) if handled => {
                if self.statements.kind(stmt) == Some(StatementKind::From) {
                    warn!(kind = %original.kind, message = %original.message, "error handled at top level");
                }
                Ok(recovered)
            }
            Ok(_) => {
                debug!(kind = %original.kind, "handler left the error unhandled");
                Err(original.into())
            }
            Err(Signal::Error(secondary)) => Err(secondary.wrapping(original).into()),
            Err(control) => Err(control),
        }
    }
}

/// Member access on an Object, mapped over an Array (flattening one level).
fn get_member(value: &Value, key: &str) -> Value {
    match value {
        Value::Object(map) => map.get(key).cloned().unwrap_or_default(),
        Value::Array(items) => {
            let mut out = Vec::new();
            for item in items.iter() {
                match get_member(item, key) {
                    Value::Empty => {}
                    Value::Array(inner) => out.extend(inner.iter().cloned()),
                    other => out.push(other),
                }
            }
            Value::array(out)
        }
        _ => Value::Empty,
    }
}

fn text(arg: &Evaluated) -> &str {
    arg.value.as_str().unwrap_or_default()
}

fn bytes(arg: &Evaluated) -> crate::raw::Raw {
    arg.value.as_raw().cloned().unwrap_or_default()
}

fn invalid_value(option: &str, value: &Value) -> ConfigurationError {
    ConfigurationError::InvalidValue {
        option: option.to_string(),
        value: value.to_string(),
    }
}

fn node_name(node: &Node) -> &'static str {
    match node {
        Node::Empty => "Empty",
        Node::Null => "Null",
        Node::Boolean(_) => "Boolean",
        Node::Number(_) => "Number",
        Node::String(_) => "String",
        Node::Raw(_) => "Raw",
        Node::Array(_) => "Array",
        Node::Object(_) => "Object",
        Node::CurrentValue => "CurrentValue",
        Node::ValueRef(_) => "ValueRef",
        Node::Get(_) => "Get",
        Node::Index(_) => "Index",
        Node::Chain(_) => "Chain",
        Node::Binary { .. } => "Binary",
        Node::Unary { .. } => "Unary",
        Node::FunctionCall { .. } => "FunctionCall",
        Node::Lambda(_) => "Lambda",
        Node::Invoke { .. } => "Invoke",
        Node::Scope { .. } => "Scope",
        Node::Let { .. } => "Let",
        Node::Select { .. } => "Select",
        Node::Conditional { .. } => "Conditional",
        Node::Map { .. } => "Map",
        Node::Aggregate { .. } => "Aggregate",
        Node::Break => "Break",
        Node::Continue => "Continue",
        Node::Stop { .. } => "Stop",
        Node::Raise { .. } => "Raise",
        Node::PathLiteral(_) => "PathLiteral",
        Node::PathMatch(_) => "PathMatch",
        Node::Sink { .. } => "Sink",
    }
}

/// Evaluates the expression-bearing parts of a path pattern.
struct MatchScope<'e> {
    evaluator: &'e mut Evaluator,
    stmt: usize,
}

impl MatchEnv for MatchScope<'_> {
    fn dynamic_key(&mut self, expr: &Node, position: &Value) -> Flow<String> {
        let current = Evaluated::new(position.clone());
        match self.evaluator.eval_forked(expr, self.stmt, &current)?.value {
            Value::String(s) => Ok(s.to_string()),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(GenericError::evaluation(format!(
                "dynamic path key must be a String or Number, got {}",
                other.type_name()
            ))
            .into()),
        }
    }

    fn filter_selects(&mut self, predicates: &[Node], element: &Value, index: usize) -> Flow<bool> {
        let current = Evaluated::new(element.clone());
        for predicate in predicates {
            let verdict = self.evaluator.eval_forked(predicate, self.stmt, &current)?.value;
            let selected = match &verdict {
                Value::Number(n) => n.as_i64() == Some(index as i64),
                other => operators::truthy(other),
            };
            if selected {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
