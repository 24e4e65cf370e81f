// Statement chain
// Arena of execution contexts linked by parent index

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;

use crate::ast::LetBinding;
use crate::path::Path;
use crate::value::{Evaluated, Thunk, Value};

/// Reserved name of the current value.
pub const CURRENT: &str = "@";
/// Reserved name of the error inside an exception handler.
pub const ERROR: &str = "error";
/// Reserved name of the aggregate accumulator.
pub const ACCUMULATOR: &str = "acc";

/// What construct created a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// Outermost scope of one evaluation
    From,
    /// Default expression scope
    Scope,
    /// Let-binding scope
    Let,
    /// Evaluation of one let-binding's expression
    Binding,
    /// Function body
    Function,
    /// Select query
    Select,
    /// Exception handler body
    Exception,
    /// One loop iteration
    Loop,
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatementKind::From => "from",
            StatementKind::Scope => "scope",
            StatementKind::Let => "let",
            StatementKind::Binding => "binding",
            StatementKind::Function => "function",
            StatementKind::Select => "select",
            StatementKind::Exception => "exception",
            StatementKind::Loop => "loop",
        };
        f.write_str(name)
    }
}

/// A let-binding declared on a statement, with its scope-lifetime memo.
#[derive(Debug, Clone)]
pub struct LetSlot {
    pub binding: Arc<LetBinding>,
    pub memo: Thunk,
}

/// One execution context.
#[derive(Debug)]
pub struct Statement {
    pub kind: StatementKind,
    pub parent: Option<usize>,
    values: IndexMap<String, Evaluated>,
    lets: IndexMap<String, LetSlot>,
    /// The errorHandled flag (meaningful on exception statements).
    pub handled: bool,
    path: Option<Path>,
}

impl Statement {
    fn new(kind: StatementKind, parent: Option<usize>) -> Self {
        Statement {
            kind,
            parent,
            values: IndexMap::new(),
            lets: IndexMap::new(),
            handled: false,
            path: None,
        }
    }
}

/// Where a name resolved to.
#[derive(Debug, Clone)]
pub enum Resolved {
    Value(Evaluated),
    /// A let-binding declared on the statement at this index.
    Let(usize, Arc<LetBinding>),
}

/// LIFO arena of statements.
///
/// Indices stay valid while the statement is live; a popped index may be reused
/// by the next push.
#[derive(Debug, Default)]
pub struct StatementChain {
    statements: Vec<Statement>,
}

impl StatementChain {
    pub fn new() -> Self {
        StatementChain::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Push a new statement and return its index.
    pub fn push(&mut self, kind: StatementKind, parent: Option<usize>) -> usize {
        let index = self.statements.len();
        debug!(index, %kind, ?parent, "push statement");
        self.statements.push(Statement::new(kind, parent));
        index
    }

    /// Pop the most recent statement; its scope-lifetime memos go with it.
    pub fn pop(&mut self) -> Option<Statement> {
        let statement = self.statements.pop();
        if let Some(s) = &statement {
            debug!(index = self.statements.len(), kind = %s.kind, "pop statement");
        }
        statement
    }

    /// Drop every statement above `len`.
    pub fn truncate(&mut self, len: usize) {
        while self.statements.len() > len {
            self.pop();
        }
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&Statement> {
        self.statements.get(index)
    }

    #[inline]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Statement> {
        self.statements.get_mut(index)
    }

    pub fn kind(&self, index: usize) -> Option<StatementKind> {
        self.get(index).map(|s| s.kind)
    }

    pub fn parent(&self, index: usize) -> Option<usize> {
        self.get(index).and_then(|s| s.parent)
    }

    /// `index` and its ancestors, innermost first.
    pub fn ancestors(&self, index: usize) -> Ancestors<'_> {
        Ancestors {
            chain: self,
            next: self.get(index).map(|_| index),
        }
    }

    pub fn set_value(&mut self, index: usize, name: &str, value: Evaluated) {
        if let Some(s) = self.get_mut(index) {
            s.values.insert(name.to_string(), value);
        }
    }

    pub fn set_current(&mut self, index: usize, value: Evaluated) {
        self.set_value(index, CURRENT, value);
    }

    /// The current value: the nearest `@` walking outward, `Empty` if none.
    pub fn current(&self, index: usize) -> Evaluated {
        self.lookup_value(index, CURRENT)
            .cloned()
            .unwrap_or_else(|| Evaluated::new(Value::Empty))
    }

    /// A runtime value by name, walking outward.
    pub fn lookup_value(&self, index: usize, name: &str) -> Option<&Evaluated> {
        self.ancestors(index)
            .find_map(|i| self.statements[i].values.get(name))
    }

    /// A runtime value or let-binding by name; the innermost statement declaring
    /// either wins, runtime values before let-bindings on the same statement.
    pub fn resolve(&self, index: usize, name: &str) -> Option<Resolved> {
        self.ancestors(index).find_map(|i| {
            let s = &self.statements[i];
            if let Some(v) = s.values.get(name) {
                Some(Resolved::Value(v.clone()))
            } else {
                s.lets
                    .get(name)
                    .map(|slot| Resolved::Let(i, slot.binding.clone()))
            }
        })
    }

    /// Every runtime value visible from `index`, inner declarations shadowing
    /// outer ones.
    pub fn visible_values(&self, index: usize) -> IndexMap<String, Evaluated> {
        let mut out = IndexMap::new();
        for i in self.ancestors(index) {
            for (name, value) in &self.statements[i].values {
                if !out.contains_key(name) {
                    out.insert(name.clone(), value.clone());
                }
            }
        }
        out
    }

    pub fn declare_let(&mut self, index: usize, binding: Arc<LetBinding>) {
        if let Some(s) = self.get_mut(index) {
            s.lets.insert(
                binding.name.clone(),
                LetSlot {
                    binding,
                    memo: Thunk::Pending,
                },
            );
        }
    }

    /// The scope-lifetime memo of `name` on statement `index`, if forced.
    pub fn let_memo(&self, index: usize, name: &str) -> Option<&Evaluated> {
        self.get(index)
            .and_then(|s| s.lets.get(name))
            .and_then(|slot| slot.memo.get())
    }

    pub fn store_let_memo(&mut self, index: usize, name: &str, value: Evaluated) {
        if let Some(slot) = self.get_mut(index).and_then(|s| s.lets.get_mut(name)) {
            slot.memo = Thunk::Ready(value);
        }
    }

    /// The path cursor, falling back to the nearest ancestor's.
    pub fn path(&self, index: usize) -> Option<&Path> {
        self.ancestors(index)
            .find_map(|i| self.statements[i].path.as_ref())
    }

    pub fn set_path(&mut self, index: usize, path: Path) {
        if let Some(s) = self.get_mut(index) {
            s.path = Some(path);
        }
    }

    /// Nearest enclosing statement of `kind`, including `index` itself.
    pub fn nearest(&self, index: usize, kind: StatementKind) -> Option<usize> {
        self.ancestors(index).find(|i| self.statements[*i].kind == kind)
    }
}

/// Iterator over a statement and its parents.
pub struct Ancestors<'a> {
    chain: &'a StatementChain,
    next: Option<usize>,
}

impl Iterator for Ancestors<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let current = self.next?;
        self.next = self.chain.parent(current);
        Some(current)
    }
}
