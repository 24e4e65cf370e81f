// Structural addressing
//
// `Path` is a concrete address (keys and indices) into an Object/Array tree,
// optionally linked back to the structure it was resolved against. The link is a
// `Weak`, so a path never keeps its root alive.
//
// `PathMatch` is a pattern: keys, dynamic keys, `?` / `?+` / `?*` wildcards and
// array filters. Matching explores every descent and yields the set of concrete
// paths, in discovery order.

use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};

use crate::ast::Node;
use crate::error::Flow;
use crate::value::Value;

/// One step of a concrete path.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PathPart {
    Key(String),
    Index(usize),
}

impl fmt::Display for PathPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathPart::Key(key) if is_plain_key(key) => write!(f, ".{}", key),
            PathPart::Key(key) => write!(f, ".{}", crate::value::canonical_key(key)),
            PathPart::Index(index) => write!(f, "[{}]", index),
        }
    }
}

fn is_plain_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
}

/// Non-owning link to the structure a path was resolved against.
#[derive(Clone, Debug)]
pub enum PathRoot {
    Object(Weak<IndexMap<String, Value>>),
    Array(Weak<Vec<Value>>),
}

impl PathRoot {
    fn of(value: &Value) -> Option<PathRoot> {
        match value {
            Value::Object(map) => Some(PathRoot::Object(Rc::downgrade(map))),
            Value::Array(arr) => Some(PathRoot::Array(Rc::downgrade(arr))),
            _ => None,
        }
    }

    fn upgrade(&self) -> Option<Value> {
        match self {
            PathRoot::Object(weak) => weak.upgrade().map(Value::Object),
            PathRoot::Array(weak) => weak.upgrade().map(Value::Array),
        }
    }
}

/// A resolved structural address.
#[derive(Clone, Debug, Default)]
pub struct Path {
    parts: Vec<PathPart>,
    root: Option<PathRoot>,
}

impl Path {
    pub fn new(parts: Vec<PathPart>) -> Self {
        Path { parts, root: None }
    }

    /// The empty path, addressing the root itself.
    pub fn root_path() -> Self {
        Path::default()
    }

    /// Build from an Array of Strings (keys) and Numbers (indices).
    pub fn from_value(parts: &Value) -> Option<Path> {
        let items = parts.as_array()?;
        let mut out = Vec::with_capacity(items.len());
        for item in items.iter() {
            match item {
                Value::String(key) => out.push(PathPart::Key(key.to_string())),
                Value::Number(n) => {
                    let index = n.as_i64().filter(|i| *i >= 0)?;
                    out.push(PathPart::Index(index as usize));
                }
                _ => return None,
            }
        }
        Some(Path::new(out))
    }

    #[inline]
    pub fn parts(&self) -> &[PathPart] {
        &self.parts
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// A new path one step deeper, keeping the root link.
    pub fn child(&self, part: PathPart) -> Path {
        let mut parts = Vec::with_capacity(self.parts.len() + 1);
        parts.extend_from_slice(&self.parts);
        parts.push(part);
        Path {
            parts,
            root: self.root.clone(),
        }
    }

    /// Link this path to `root` for later retrieval.
    #[must_use]
    pub fn linked_to(mut self, root: &Value) -> Path {
        self.root = PathRoot::of(root);
        self
    }

    /// The linked root, if it is still alive.
    pub fn root(&self) -> Option<Value> {
        self.root.as_ref().and_then(PathRoot::upgrade)
    }

    /// Whether the root link was set (alive or not).
    pub fn is_linked(&self) -> bool {
        self.root.is_some()
    }

    /// Walk `value` along this path. Missing locations are `Empty`.
    pub fn resolve(&self, value: &Value) -> Value {
        let mut current = value;
        for part in &self.parts {
            let next = match (part, current) {
                (PathPart::Key(key), Value::Object(map)) => map.get(key),
                (PathPart::Index(index), Value::Array(arr)) => arr.get(*index),
                _ => None,
            };
            match next {
                Some(v) => current = v,
                None => return Value::Empty,
            }
        }
        current.clone()
    }

    /// Retrieve through the root link. `Empty` when unlinked, dropped or missing.
    pub fn value(&self) -> Value {
        match self.root() {
            Some(root) => self.resolve(&root),
            None => Value::Empty,
        }
    }

    /// The parts as a program value.
    pub fn to_value_parts(&self) -> Value {
        Value::array(
            self.parts
                .iter()
                .map(|part| match part {
                    PathPart::Key(key) => Value::from(key.as_str()),
                    PathPart::Index(index) => Value::from(*index),
                })
                .collect(),
        )
    }
}

impl PartialEq for Path {
    fn eq(&self, other: &Self) -> bool {
        self.parts == other.parts
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "~")?;
        for part in &self.parts {
            write!(f, "{}", part)?;
        }
        Ok(())
    }
}

/// One step of a path pattern.
#[derive(Clone, Debug, PartialEq)]
pub enum MatchPart {
    Key(String),
    /// Key computed from an expression evaluated against the current position.
    DynamicKey(Arc<Node>),
    /// `?`: exactly one Object-or-Array level.
    AnySingle,
    /// `?+`: one or more levels.
    AnySingleOrMore,
    /// `?*`: zero or more levels.
    AnyNoneOrMore,
    /// Array element selection; any predicate selecting an element includes it.
    Filter(Arc<Vec<Node>>),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PathMatch {
    parts: Vec<MatchPart>,
}

impl PathMatch {
    pub fn new(parts: Vec<MatchPart>) -> Self {
        PathMatch { parts }
    }

    #[inline]
    pub fn parts(&self) -> &[MatchPart] {
        &self.parts
    }
}

impl fmt::Display for PathMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "~")?;
        for part in &self.parts {
            match part {
                MatchPart::Key(key) => write!(f, "{}", PathPart::Key(key.clone()))?,
                MatchPart::DynamicKey(_) => write!(f, ".(expr)")?,
                MatchPart::AnySingle => write!(f, ".?")?,
                MatchPart::AnySingleOrMore => write!(f, ".?+")?,
                MatchPart::AnyNoneOrMore => write!(f, ".?*")?,
                MatchPart::Filter(preds) => write!(f, "[{} predicates]", preds.len())?,
            }
        }
        Ok(())
    }
}

/// Evaluation hooks the matcher needs for expression-bearing parts.
pub trait MatchEnv {
    /// Evaluate a dynamic key expression with `position` as the current value.
    fn dynamic_key(&mut self, expr: &Node, position: &Value) -> Flow<String>;

    /// Whether the predicate list selects `element` at `index`.
    fn filter_selects(&mut self, predicates: &[Node], element: &Value, index: usize) -> Flow<bool>;
}

/// Every concrete path in `root` matching `pattern`, linked to `root`.
pub fn find_matches(pattern: &PathMatch, root: &Value, env: &mut impl MatchEnv) -> Flow<Vec<Path>> {
    let mut found = IndexSet::new();
    let mut prefix = Vec::new();
    descend(&pattern.parts, root, &mut prefix, &mut found, env)?;
    Ok(found
        .into_iter()
        .map(|parts| Path::new(parts).linked_to(root))
        .collect())
}

fn children(at: &Value) -> Vec<(PathPart, &Value)> {
    match at {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| (PathPart::Key(k.clone()), v))
            .collect(),
        Value::Array(arr) => arr
            .iter()
            .enumerate()
            .map(|(i, v)| (PathPart::Index(i), v))
            .collect(),
        _ => Vec::new(),
    }
}

fn descend(
    parts: &[MatchPart],
    at: &Value,
    prefix: &mut Vec<PathPart>,
    found: &mut IndexSet<Vec<PathPart>>,
    env: &mut impl MatchEnv,
) -> Flow<()> {
    let Some((first, rest)) = parts.split_first() else {
        found.insert(prefix.clone());
        return Ok(());
    };

    match first {
        MatchPart::Key(key) => descend_key(key, rest, at, prefix, found, env),
        MatchPart::DynamicKey(expr) => {
            let key = env.dynamic_key(expr, at)?;
            descend_key(&key, rest, at, prefix, found, env)
        }
        MatchPart::AnySingle => {
            for (part, child) in children(at) {
                prefix.push(part);
                descend(rest, child, prefix, found, env)?;
                prefix.pop();
            }
            Ok(())
        }
        MatchPart::AnySingleOrMore => {
            for (part, child) in children(at) {
                prefix.push(part);
                // exactly one level here, then more through the same part
                descend(rest, child, prefix, found, env)?;
                descend(parts, child, prefix, found, env)?;
                prefix.pop();
            }
            Ok(())
        }
        MatchPart::AnyNoneOrMore => {
            descend(rest, at, prefix, found, env)?;
            for (part, child) in children(at) {
                prefix.push(part);
                descend(parts, child, prefix, found, env)?;
                prefix.pop();
            }
            Ok(())
        }
        MatchPart::Filter(predicates) => {
            if let Value::Array(arr) = at {
                for (index, element) in arr.iter().enumerate() {
                    if env.filter_selects(predicates, element, index)? {
                        prefix.push(PathPart::Index(index));
                        descend(rest, element, prefix, found, env)?;
                        prefix.pop();
                    }
                }
            }
            Ok(())
        }
    }
}

fn descend_key(
    key: &str,
    rest: &[MatchPart],
    at: &Value,
    prefix: &mut Vec<PathPart>,
    found: &mut IndexSet<Vec<PathPart>>,
    env: &mut impl MatchEnv,
) -> Flow<()> {
    if let Value::Object(map) = at {
        if let Some(child) = map.get(key) {
            prefix.push(PathPart::Key(key.to_string()));
            descend(rest, child, prefix, found, env)?;
            prefix.pop();
        }
    }
    Ok(())
}

/// Every leaf location of `value`: scalars and empty containers.
///
/// `Empty` array slots are holes left by retain or reclude and hold no location.
pub fn leaf_paths(value: &Value) -> Vec<Path> {
    fn walk(at: &Value, prefix: &mut Vec<PathPart>, out: &mut Vec<Path>) {
        let kids: Vec<_> = children(at).into_iter().filter(|(_, v)| !v.is_empty()).collect();
        if kids.is_empty() {
            if !prefix.is_empty() {
                out.push(Path::new(prefix.clone()));
            }
            return;
        }
        for (part, child) in kids {
            prefix.push(part);
            walk(child, prefix, out);
            prefix.pop();
        }
    }
    let mut out = Vec::new();
    walk(value, &mut Vec::new(), &mut out);
    out.into_iter().map(|p| p.linked_to(value)).collect()
}

/// Prefix tree over a set of paths; `terminal` marks where a path ends.
#[derive(Default, Debug)]
struct PathTrie {
    terminal: bool,
    children: IndexMap<PathPart, PathTrie>,
}

impl PathTrie {
    fn build(paths: &[Path]) -> PathTrie {
        let mut trie = PathTrie::default();
        for path in paths {
            let mut node = &mut trie;
            for part in path.parts() {
                node = node.children.entry(part.clone()).or_default();
            }
            node.terminal = true;
        }
        trie
    }
}

fn empty_like(value: &Value) -> Value {
    match value {
        Value::Array(_) => Value::array(Vec::new()),
        Value::Object(_) => Value::object(IndexMap::new()),
        _ => Value::Empty,
    }
}

/// The sub-structure reachable by any of `paths` (their union), in original order.
///
/// Arrays keep their length: elements outside the union become `Empty`, so
/// every kept element stays at its original index.
pub fn retain(value: &Value, paths: &[Path]) -> Value {
    let trie = PathTrie::build(paths);
    retain_at(value, &trie).unwrap_or_else(|| empty_like(value))
}

fn retain_at(value: &Value, trie: &PathTrie) -> Option<Value> {
    if trie.terminal {
        return Some(value.clone());
    }
    match value {
        Value::Object(map) => {
            let mut out = IndexMap::new();
            for (key, child) in map.iter() {
                if let Some(sub) = trie.children.get(&PathPart::Key(key.clone())) {
                    if let Some(kept) = retain_at(child, sub) {
                        out.insert(key.clone(), kept);
                    }
                }
            }
            (!out.is_empty()).then(|| Value::object(out))
        }
        Value::Array(arr) => {
            let out: Vec<Option<Value>> = arr
                .iter()
                .enumerate()
                .map(|(index, child)| {
                    trie.children
                        .get(&PathPart::Index(index))
                        .and_then(|sub| retain_at(child, sub))
                })
                .collect();
            holed(out)
        }
        _ => None,
    }
}

/// `value` minus every location reachable by `paths`, in original order.
///
/// Containers emptied by the removal are removed with their contents. Removed
/// array elements leave `Empty` holes, as in [`retain`].
pub fn reclude(value: &Value, paths: &[Path]) -> Value {
    let trie = PathTrie::build(paths);
    reclude_at(value, &trie).unwrap_or_else(|| empty_like(value))
}

fn reclude_at(value: &Value, trie: &PathTrie) -> Option<Value> {
    if trie.terminal {
        return None;
    }
    match value {
        Value::Object(map) if !trie.children.is_empty() => {
            let mut out = IndexMap::new();
            for (key, child) in map.iter() {
                match trie.children.get(&PathPart::Key(key.clone())) {
                    Some(sub) => {
                        if let Some(kept) = reclude_at(child, sub) {
                            out.insert(key.clone(), kept);
                        }
                    }
                    None => {
                        out.insert(key.clone(), child.clone());
                    }
                }
            }
            (!out.is_empty()).then(|| Value::object(out))
        }
        Value::Array(arr) if !trie.children.is_empty() => {
            let out: Vec<Option<Value>> = arr
                .iter()
                .enumerate()
                .map(|(index, child)| match trie.children.get(&PathPart::Index(index)) {
                    Some(sub) => reclude_at(child, sub),
                    None => Some(child.clone()),
                })
                .collect();
            holed(out)
        }
        _ => Some(value.clone()),
    }
}

/// An array with `Empty` in place of dropped elements, or `None` when nothing is left.
fn holed(slots: Vec<Option<Value>>) -> Option<Value> {
    if slots.iter().all(Option::is_none) {
        return None;
    }
    Some(Value::array(
        slots.into_iter().map(Option::unwrap_or_default).collect(),
    ))
}

/// Overlay two disjoint parts of one structure, such as the results of
/// [`retain`] and [`reclude`] over the same paths.
///
/// Objects merge key by key, arrays slot by slot; an `Empty` slot takes the
/// other side's element. Where both sides hold a scalar, `base` wins.
pub fn merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Empty, other) | (other, Value::Empty) => other.clone(),
        (Value::Object(a), Value::Object(b)) => {
            let mut out = (**a).clone();
            for (key, theirs) in b.iter() {
                let merged = match out.get(key) {
                    Some(ours) => merge(ours, theirs),
                    None => theirs.clone(),
                };
                out.insert(key.clone(), merged);
            }
            Value::object(out)
        }
        (Value::Array(a), Value::Array(b)) => {
            let len = a.len().max(b.len());
            Value::array(
                (0..len)
                    .map(|i| match (a.get(i), b.get(i)) {
                        (Some(x), Some(y)) => merge(x, y),
                        (Some(x), None) | (None, Some(x)) => x.clone(),
                        (None, None) => Value::Empty,
                    })
                    .collect(),
            )
        }
        (ours, _) => ours.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value;
    use pretty_assertions::assert_eq;

    struct NoExprs;

    impl MatchEnv for NoExprs {
        fn dynamic_key(&mut self, _expr: &Node, _position: &Value) -> Flow<String> {
            Ok("b".to_string())
        }

        fn filter_selects(&mut self, _predicates: &[Node], _element: &Value, index: usize) -> Flow<bool> {
            Ok(index % 2 == 0)
        }
    }

    fn key(k: &str) -> PathPart {
        PathPart::Key(k.to_string())
    }

    fn sample() -> Value {
        value!({"a": {"b": 1, "c": [10, 20, 30]}, "d": {"b": 2}, "e": 3})
    }

    #[test]
    fn test_display() {
        let path = Path::new(vec![key("a"), PathPart::Index(0), key("b c")]);
        assert_eq!(path.to_string(), "~.a[0].\"b c\"");
        assert_eq!(Path::root_path().to_string(), "~");
    }

    #[test]
    fn test_key_match() {
        let root = sample();
        let pattern = PathMatch::new(vec![MatchPart::Key("a".into()), MatchPart::Key("b".into())]);
        let found = find_matches(&pattern, &root, &mut NoExprs).unwrap();
        assert_eq!(found, vec![Path::new(vec![key("a"), key("b")])]);
        assert_eq!(found[0].value(), value!(1));
    }

    #[test]
    fn test_any_single() {
        let root = sample();
        let pattern = PathMatch::new(vec![MatchPart::AnySingle, MatchPart::Key("b".into())]);
        let found = find_matches(&pattern, &root, &mut NoExprs).unwrap();
        assert_eq!(
            found,
            vec![
                Path::new(vec![key("a"), key("b")]),
                Path::new(vec![key("d"), key("b")]),
            ]
        );
    }

    #[test]
    fn test_any_none_or_more_explores_every_depth() {
        let root = value!({"b": 0, "x": {"b": 1, "y": {"b": 2}}});
        let pattern = PathMatch::new(vec![MatchPart::AnyNoneOrMore, MatchPart::Key("b".into())]);
        let found = find_matches(&pattern, &root, &mut NoExprs).unwrap();
        assert_eq!(
            found,
            vec![
                Path::new(vec![key("b")]),
                Path::new(vec![key("x"), key("b")]),
                Path::new(vec![key("x"), key("y"), key("b")]),
            ]
        );
    }

    #[test]
    fn test_any_single_or_more_requires_a_level() {
        let root = value!({"b": 0, "x": {"b": 1, "y": {"b": 2}}});
        let pattern = PathMatch::new(vec![MatchPart::AnySingleOrMore, MatchPart::Key("b".into())]);
        let found = find_matches(&pattern, &root, &mut NoExprs).unwrap();
        assert_eq!(
            found,
            vec![
                Path::new(vec![key("x"), key("b")]),
                Path::new(vec![key("x"), key("y"), key("b")]),
            ]
        );
    }

    #[test]
    fn test_filter_and_dynamic_key() {
        let root = sample();
        let pattern = PathMatch::new(vec![
            MatchPart::Key("a".into()),
            MatchPart::Key("c".into()),
            MatchPart::Filter(Arc::new(vec![])),
        ]);
        let found = find_matches(&pattern, &root, &mut NoExprs).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[1], Path::new(vec![key("a"), key("c"), PathPart::Index(2)]));

        let pattern = PathMatch::new(vec![
            MatchPart::Key("d".into()),
            MatchPart::DynamicKey(Arc::new(Node::Null)),
        ]);
        let found = find_matches(&pattern, &root, &mut NoExprs).unwrap();
        assert_eq!(found[0].value(), value!(2));
    }

    #[test]
    fn test_retain_keeps_order() {
        let root = sample();
        let paths = vec![
            Path::new(vec![key("e")]),
            Path::new(vec![key("a"), key("c"), PathPart::Index(1)]),
        ];
        assert_eq!(retain(&root, &paths), value!({"a": {"c": [empty, 20, empty]}, "e": 3}));
        assert_eq!(retain(&root, &paths).to_string(), "{\"a\": {\"c\": [20]}, \"e\": 3}");
    }

    #[test]
    fn test_reclude_drops_emptied_containers() {
        let root = sample();
        let paths = vec![Path::new(vec![key("d"), key("b")]), Path::new(vec![key("a"), key("c")])];
        assert_eq!(reclude(&root, &paths), value!({"a": {"b": 1}, "e": 3}));
    }

    #[test]
    fn test_retain_and_reclude_partition_leaves() {
        let root = sample();
        let paths = vec![Path::new(vec![key("a"), key("b")]), Path::new(vec![key("e")])];
        let kept: Vec<Path> = leaf_paths(&retain(&root, &paths));
        let rest: Vec<Path> = leaf_paths(&reclude(&root, &paths));
        let all = leaf_paths(&root);
        assert!(kept.iter().all(|p| !rest.contains(p)));
        assert_eq!(kept.len() + rest.len(), all.len());
        assert!(all.iter().all(|p| kept.contains(p) || rest.contains(p)));
    }

    #[test]
    fn test_array_elements_keep_their_index() {
        let root = value!({"a": [1, 2, 3]});
        let paths = vec![Path::new(vec![key("a"), PathPart::Index(1)])];

        let kept = retain(&root, &paths);
        let rest = reclude(&root, &paths);
        assert_eq!(kept, value!({"a": [empty, 2, empty]}));
        assert_eq!(rest, value!({"a": [1, empty, 3]}));

        let names = |v: &Value| leaf_paths(v).iter().map(Path::to_string).collect::<Vec<_>>();
        assert_eq!(names(&kept), vec!["~.a[1]"]);
        assert_eq!(names(&rest), vec!["~.a[0]", "~.a[2]"]);
        assert_eq!(merge(&kept, &rest), root);
    }

    #[test]
    fn test_reclude_of_every_element_drops_the_array() {
        let root = value!({"a": [1, 2], "b": 3});
        let paths = vec![
            Path::new(vec![key("a"), PathPart::Index(0)]),
            Path::new(vec![key("a"), PathPart::Index(1)]),
        ];
        assert_eq!(reclude(&root, &paths), value!({"b": 3}));
        assert_eq!(merge(&retain(&root, &paths), &reclude(&root, &paths)), root);
    }

    #[test]
    fn test_root_link_is_weak() {
        let path = {
            let root = sample();
            Path::new(vec![key("e")]).linked_to(&root)
        };
        assert!(path.is_linked());
        assert_eq!(path.value(), Value::Empty);
    }
}
