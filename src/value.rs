// Runtime values
// Rc-wrapped tagged union with O(1) clones; mutation goes through Rc::make_mut

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use crate::ast::LambdaDef;
use crate::error::GenericError;
use crate::number::Number;
use crate::path::Path;
use crate::raw::Raw;

/// A structured runtime value.
///
/// Containers and strings are `Rc`-wrapped, so cloning shares structure and any
/// write (`as_array_mut`, `as_object_mut`, `Raw::bytes_mut`) copies first when
/// the structure is shared.
#[derive(Clone, Debug)]
pub enum Value {
    /// Absence: a missing key, a deleted member, a default return. Not `Null`.
    Empty,
    Null,
    Bool(bool),
    Number(Number),
    String(Rc<str>),
    Raw(Raw),
    Array(Rc<Vec<Value>>),
    Object(Rc<IndexMap<String, Value>>),
    Error(Rc<GenericError>),
    Path(Rc<Path>),
    Stream(Stream),
    Lambda(Rc<LambdaRef>),
}

/// The canonical (quoted, escaped) form of an object key.
pub fn canonical_key(key: &str) -> String {
    format!("\"{}\"", escape_json_string(key))
}

// ── Type checks ──────────────────────────────────────────────────────────────

impl Value {
    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    #[inline]
    pub fn is_number(&self) -> bool {
        matches!(self, Value::Number(_))
    }

    #[inline]
    pub fn is_string(&self) -> bool {
        matches!(self, Value::String(_))
    }

    #[inline]
    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }

    #[inline]
    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    #[inline]
    pub fn is_raw(&self) -> bool {
        matches!(self, Value::Raw(_))
    }

    #[inline]
    pub fn is_path(&self) -> bool {
        matches!(self, Value::Path(_))
    }

    #[inline]
    pub fn is_lambda(&self) -> bool {
        matches!(self, Value::Lambda(_))
    }

    /// An evaluation result carrying an unhandled error.
    #[inline]
    pub fn is_fault(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    /// Object or Array.
    #[inline]
    pub fn is_structure(&self) -> bool {
        matches!(self, Value::Object(_) | Value::Array(_))
    }

    /// String, Number, Bool or Null.
    #[inline]
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Value::String(_) | Value::Number(_) | Value::Bool(_) | Value::Null
        )
    }

    /// Type name used in error payloads and `core:type`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Empty => "Empty",
            Value::Null => "Null",
            Value::Bool(true) => "True",
            Value::Bool(false) => "False",
            Value::Number(_) => "Number",
            Value::String(_) => "String",
            Value::Raw(_) => "Raw",
            Value::Array(_) => "Array",
            Value::Object(_) => "Object",
            Value::Error(_) => "Error",
            Value::Path(_) => "Path",
            Value::Stream(_) => "Stream",
            Value::Lambda(_) => "Lambda",
        }
    }
}

// ── Extraction ───────────────────────────────────────────────────────────────

impl Value {
    #[inline]
    pub fn as_number(&self) -> Option<Number> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        self.as_number().map(|n| n.value())
    }

    #[inline]
    pub fn as_i64(&self) -> Option<i64> {
        self.as_number().and_then(|n| n.as_i64())
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[inline]
    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(arr) => Some(arr),
            _ => None,
        }
    }

    #[inline]
    pub fn as_object(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    #[inline]
    pub fn as_raw(&self) -> Option<&Raw> {
        match self {
            Value::Raw(raw) => Some(raw),
            _ => None,
        }
    }

    #[inline]
    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Value::Path(path) => Some(path),
            _ => None,
        }
    }

    #[inline]
    pub fn as_error(&self) -> Option<&GenericError> {
        match self {
            Value::Error(err) => Some(err),
            _ => None,
        }
    }

    #[inline]
    pub fn as_lambda(&self) -> Option<&Rc<LambdaRef>> {
        match self {
            Value::Lambda(lambda) => Some(lambda),
            _ => None,
        }
    }

    /// Get a mutable reference to the inner Vec, cloning if shared (Rc::make_mut).
    #[inline]
    pub fn as_array_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::Array(arr) => Some(Rc::make_mut(arr)),
            _ => None,
        }
    }

    /// Get a mutable reference to the inner IndexMap, cloning if shared (Rc::make_mut).
    #[inline]
    pub fn as_object_mut(&mut self) -> Option<&mut IndexMap<String, Value>> {
        match self {
            Value::Object(map) => Some(Rc::make_mut(map)),
            _ => None,
        }
    }

    /// Index into an object by key.
    #[inline]
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(map) => map.get(key),
            _ => None,
        }
    }

    /// Index into an array by position.
    #[inline]
    pub fn get_index(&self, index: usize) -> Option<&Value> {
        match self {
            Value::Array(arr) => arr.get(index),
            _ => None,
        }
    }
}

// ── Constructors ─────────────────────────────────────────────────────────────

impl Value {
    #[inline]
    pub fn string(s: impl Into<Rc<str>>) -> Self {
        Value::String(s.into())
    }

    #[inline]
    pub fn array(v: Vec<Value>) -> Self {
        Value::Array(Rc::new(v))
    }

    #[inline]
    pub fn object(m: IndexMap<String, Value>) -> Self {
        Value::Object(Rc::new(m))
    }

    #[inline]
    pub fn raw(bytes: impl Into<Raw>) -> Self {
        Value::Raw(bytes.into())
    }

    #[inline]
    pub fn path(path: Path) -> Self {
        Value::Path(Rc::new(path))
    }

    /// A structurally independent clone: no Array, Object or Raw buffer is
    /// shared with `self`.
    pub fn deep_copy(&self) -> Value {
        match self {
            Value::Array(arr) => Value::array(arr.iter().map(Value::deep_copy).collect()),
            Value::Object(map) => Value::object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.deep_copy()))
                    .collect(),
            ),
            Value::Raw(raw) => Value::Raw(raw.deep_copy()),
            other => other.clone(),
        }
    }
}

// ── Lambda references ────────────────────────────────────────────────────────

/// An unevaluated function: its definition plus the runtime values it captured.
#[derive(Clone, Debug)]
pub struct LambdaRef {
    pub def: Arc<LambdaDef>,
    pub captured: Rc<IndexMap<String, Evaluated>>,
    /// Result of the first invoke-on-access; shared by every clone.
    forced: Rc<RefCell<Thunk>>,
}

impl LambdaRef {
    pub fn new(def: Arc<LambdaDef>, captured: IndexMap<String, Evaluated>) -> Self {
        LambdaRef {
            def,
            captured: Rc::new(captured),
            forced: Rc::default(),
        }
    }

    /// Whether a structural access or operator should invoke this lambda to get
    /// at its value.
    pub fn invokes_on_access(&self) -> bool {
        self.def.invoke_on_access && self.def.params.iter().all(|p| p.default.is_some())
    }

    /// The value of an earlier invoke-on-access, if there was one.
    pub fn forced(&self) -> Option<Evaluated> {
        self.forced.borrow().get().cloned()
    }

    pub fn set_forced(&self, value: Evaluated) {
        *self.forced.borrow_mut() = Thunk::Ready(value);
    }
}

impl PartialEq for LambdaRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.def, &other.def) && Rc::ptr_eq(&self.captured, &other.captured)
    }
}

// ── Streams ──────────────────────────────────────────────────────────────────

type StreamSource = Box<dyn Iterator<Item = Value>>;

/// A lazy, single-consumer source of records or byte chunks.
#[derive(Clone)]
pub struct Stream {
    source: Rc<RefCell<StreamSource>>,
}

impl Stream {
    pub fn from_iter(iter: impl Iterator<Item = Value> + 'static) -> Self {
        Stream {
            source: Rc::new(RefCell::new(Box::new(iter))),
        }
    }

    /// A byte stream delivered in chunks.
    pub fn from_chunks(chunks: Vec<Vec<u8>>) -> Self {
        Stream::from_iter(chunks.into_iter().map(|c| Value::Raw(Raw::new(c))))
    }

    /// Take everything left in the stream.
    pub fn drain(&self) -> Vec<Value> {
        self.source.borrow_mut().by_ref().collect()
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Stream")
    }
}

impl PartialEq for Stream {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.source, &other.source)
    }
}

// ── Operator bindings ────────────────────────────────────────────────────────

/// A user-defined override for one operator symbol.
#[derive(Clone, Debug, PartialEq)]
pub struct OperatorBinding {
    pub function: Rc<LambdaRef>,
    /// Copy the override onto the operator's result.
    pub cascade: bool,
}

/// Operator overrides a value carries, and whether they apply (`doBindings`).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OperatorBindings {
    map: Option<Rc<IndexMap<String, OperatorBinding>>>,
    active: bool,
}

impl OperatorBindings {
    pub fn new(map: IndexMap<String, OperatorBinding>) -> Self {
        let active = !map.is_empty();
        OperatorBindings {
            map: (!map.is_empty()).then(|| Rc::new(map)),
            active,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_none()
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// The override for `symbol`, only when bindings are active.
    pub fn lookup(&self, symbol: &str) -> Option<&OperatorBinding> {
        if !self.active {
            return None;
        }
        self.map.as_ref().and_then(|m| m.get(symbol))
    }

    /// Declared symbols, regardless of the active flag.
    pub fn symbols(&self) -> Vec<&str> {
        self.map
            .as_ref()
            .map(|m| m.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Same overrides with `doBindings` cleared.
    #[must_use]
    pub fn deactivated(&self) -> Self {
        OperatorBindings {
            map: self.map.clone(),
            active: false,
        }
    }

    /// Same overrides with `doBindings` set (if there is anything to apply).
    #[must_use]
    pub fn activated(&self) -> Self {
        OperatorBindings {
            map: self.map.clone(),
            active: self.map.is_some(),
        }
    }
}

// ── Evaluation results ───────────────────────────────────────────────────────

/// A concrete value produced by one evaluation step, with its operator bindings.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Evaluated {
    pub value: Value,
    pub bindings: OperatorBindings,
}

impl Default for Value {
    fn default() -> Self {
        Value::Empty
    }
}

impl Evaluated {
    #[inline]
    pub fn new(value: Value) -> Self {
        Evaluated {
            value,
            bindings: OperatorBindings::default(),
        }
    }

    #[inline]
    pub fn with_bindings(value: Value, bindings: OperatorBindings) -> Self {
        Evaluated { value, bindings }
    }

    /// Structurally independent copy keeping bindings and their active flag.
    pub fn copy(&self) -> Evaluated {
        Evaluated {
            value: self.value.deep_copy(),
            bindings: self.bindings.clone(),
        }
    }

    #[inline]
    pub fn into_value(self) -> Value {
        self.value
    }
}

impl From<Value> for Evaluated {
    #[inline]
    fn from(value: Value) -> Self {
        Evaluated::new(value)
    }
}

/// Memo slot of a let-binding: forced at most once, then reused.
#[derive(Clone, Debug, Default)]
pub enum Thunk {
    #[default]
    Pending,
    Ready(Evaluated),
}

impl Thunk {
    #[inline]
    pub fn is_ready(&self) -> bool {
        matches!(self, Thunk::Ready(_))
    }

    #[inline]
    pub fn get(&self) -> Option<&Evaluated> {
        match self {
            Thunk::Ready(e) => Some(e),
            Thunk::Pending => None,
        }
    }

    /// Return the memo, computing and storing it first if pending.
    pub fn force<E>(&mut self, compute: impl FnOnce() -> Result<Evaluated, E>) -> Result<Evaluated, E> {
        if let Thunk::Ready(e) = self {
            return Ok(e.clone());
        }
        let value = compute()?;
        *self = Thunk::Ready(value.clone());
        Ok(value)
    }

    pub fn reset(&mut self) {
        *self = Thunk::Pending;
    }
}

// ── From impls ───────────────────────────────────────────────────────────────

impl From<bool> for Value {
    #[inline]
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    #[inline]
    fn from(n: i64) -> Self {
        Value::Number(Number::integer(n))
    }
}

impl From<i32> for Value {
    #[inline]
    fn from(n: i32) -> Self {
        Value::Number(Number::integer(n as i64))
    }
}

impl From<u64> for Value {
    #[inline]
    fn from(n: u64) -> Self {
        Value::Number(Number::with_precision(n as f64, 0))
    }
}

impl From<usize> for Value {
    #[inline]
    fn from(n: usize) -> Self {
        Value::Number(Number::with_precision(n as f64, 0))
    }
}

impl From<f64> for Value {
    #[inline]
    fn from(n: f64) -> Self {
        Value::Number(Number::new(n))
    }
}

impl From<Number> for Value {
    #[inline]
    fn from(n: Number) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    #[inline]
    fn from(s: &str) -> Self {
        Value::String(s.into())
    }
}

impl From<String> for Value {
    #[inline]
    fn from(s: String) -> Self {
        Value::String(s.into())
    }
}

impl From<Rc<str>> for Value {
    #[inline]
    fn from(s: Rc<str>) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    #[inline]
    fn from(v: Vec<Value>) -> Self {
        Value::Array(Rc::new(v))
    }
}

impl From<IndexMap<String, Value>> for Value {
    #[inline]
    fn from(m: IndexMap<String, Value>) -> Self {
        Value::Object(Rc::new(m))
    }
}

impl From<Raw> for Value {
    #[inline]
    fn from(raw: Raw) -> Self {
        Value::Raw(raw)
    }
}

impl From<Path> for Value {
    #[inline]
    fn from(path: Path) -> Self {
        Value::Path(Rc::new(path))
    }
}

impl From<GenericError> for Value {
    #[inline]
    fn from(err: GenericError) -> Self {
        Value::Error(Rc::new(err))
    }
}

// ── PartialEq ────────────────────────────────────────────────────────────────

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Empty, Value::Empty) => true,
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a.numeric_eq(b),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Raw(a), Value::Raw(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => a == b,
            (Value::Path(a), Value::Path(b)) => a == b,
            (Value::Stream(a), Value::Stream(b)) => a == b,
            (Value::Lambda(a), Value::Lambda(b)) => a == b,
            _ => false,
        }
    }
}

// ── Display ──────────────────────────────────────────────────────────────────

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Empty => write!(f, "empty"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "\"{}\"", escape_json_string(s)),
            Value::Raw(raw) => write!(f, "{}", raw),
            Value::Array(arr) => {
                write!(f, "[")?;
                let mut first = true;
                for v in arr.iter().filter(|v| !v.is_empty()) {
                    if !first {
                        write!(f, ", ")?;
                    }
                    first = false;
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Value::Object(map) => {
                write!(f, "{{")?;
                let mut first = true;
                for (k, v) in map.iter().filter(|(_, v)| !v.is_empty()) {
                    if !first {
                        write!(f, ", ")?;
                    }
                    first = false;
                    write!(f, "{}: {}", canonical_key(k), v)?;
                }
                write!(f, "}}")
            }
            Value::Error(err) => write!(f, "Error({}: {})", err.kind, err.message),
            Value::Path(path) => write!(f, "{}", path),
            Value::Stream(_) => write!(f, "\"<stream>\""),
            Value::Lambda(_) => write!(f, "\"<lambda>\""),
        }
    }
}

fn escape_json_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => result.push_str("\\\""),
            '\\' => result.push_str("\\\\"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            c if c < '\x20' => {
                result.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => result.push(c),
        }
    }
    result
}

// ── Serialization ────────────────────────────────────────────────────────────

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Empty | Value::Null => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => {
                let v = n.value();
                if !v.is_finite() {
                    serializer.serialize_none()
                } else if let Some(i) = n.as_i64() {
                    serializer.serialize_i64(i)
                } else {
                    serializer.serialize_f64(n.rounded())
                }
            }
            Value::String(s) => serializer.serialize_str(s),
            Value::Raw(raw) => serializer.serialize_str(&raw.to_base64()),
            Value::Array(arr) => {
                let kept: Vec<&Value> = arr.iter().filter(|v| !v.is_empty()).collect();
                let mut seq = serializer.serialize_seq(Some(kept.len()))?;
                for v in kept {
                    seq.serialize_element(v)?;
                }
                seq.end()
            }
            Value::Object(map) => {
                let kept: Vec<(&String, &Value)> =
                    map.iter().filter(|(_, v)| !v.is_empty()).collect();
                let mut m = serializer.serialize_map(Some(kept.len()))?;
                for (k, v) in kept {
                    m.serialize_entry(k, v)?;
                }
                m.end()
            }
            Value::Error(err) => {
                let mut m = serializer.serialize_map(None)?;
                m.serialize_entry("type", err.kind.name())?;
                if let Some(code) = &err.code {
                    m.serialize_entry("code", code)?;
                }
                m.serialize_entry("message", &err.message)?;
                if !err.payload.is_empty() {
                    m.serialize_entry("value", &err.payload)?;
                }
                if let Some(ns) = &err.function_namespace {
                    m.serialize_entry("functionNamespace", ns)?;
                }
                if let Some(name) = &err.function_name {
                    m.serialize_entry("functionName", name)?;
                }
                if let Some(location) = &err.location {
                    m.serialize_entry("location", location)?;
                }
                m.end()
            }
            Value::Path(path) => serializer.serialize_str(&path.to_string()),
            Value::Stream(_) | Value::Lambda(_) => serializer.serialize_str(""),
        }
    }
}

// ── Deserialization (single-pass JSON→Value) ─────────────────────────────────

impl<'de> serde::Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(ValueVisitor)
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "any valid JSON value")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(Value::from(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        Ok(Value::from(v))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        Ok(Value::from(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        Ok(Value::string(v))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
        Ok(Value::String(v.into()))
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut vec = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(elem) = seq.next_element()? {
            vec.push(elem);
        }
        Ok(Value::array(vec))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Value, A::Error> {
        let mut m = IndexMap::with_capacity(map.size_hint().unwrap_or(0));
        while let Some((k, v)) = map.next_entry()? {
            m.insert(k, v);
        }
        Ok(Value::object(m))
    }
}

// ── JSON string I/O ──────────────────────────────────────────────────────────

impl Value {
    /// Serialize to a JSON string.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serialize to a pretty-printed JSON string.
    pub fn to_json_string_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parse a JSON string into a Value (single pass, no intermediate serde_json::Value).
    pub fn from_json_str(s: &str) -> Result<Value, serde_json::Error> {
        serde_json::from_str(s)
    }
}

// ── Conversion from serde_json::Value ────────────────────────────────────────

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::from(i),
                None => Value::from(n.as_f64().unwrap_or(0.0)),
            },
            serde_json::Value::String(s) => Value::String(s.into()),
            serde_json::Value::Array(arr) => {
                Value::Array(Rc::new(arr.into_iter().map(Value::from).collect()))
            }
            serde_json::Value::Object(map) => {
                let m: IndexMap<String, Value> =
                    map.into_iter().map(|(k, v)| (k, Value::from(v))).collect();
                Value::Object(Rc::new(m))
            }
        }
    }
}

impl From<&Value> for serde_json::Value {
    fn from(v: &Value) -> Self {
        serde_json::to_value(v).unwrap_or(serde_json::Value::Null)
    }
}

// ── value! macro ─────────────────────────────────────────────────────────────

/// Macro for constructing Value literals, similar to serde_json::json!
///
/// Usage:
///   value!(empty)          → Value::Empty
///   value!(null)           → Value::Null
///   value!(true)           → Value::Bool(true)
///   value!(42)             → Value::Number (precision 0)
///   value!(2.5)            → Value::Number (precision resolved on demand)
///   value!("hello")        → Value::String
///   value!([1, 2, 3])      → Value::Array
///   value!({"k": v, ...})  → Value::Object, keys in written order
///   value!(expr)           → Value::from(expr)
#[macro_export]
macro_rules! value {
    (empty) => {
        $crate::value::Value::Empty
    };

    (null) => {
        $crate::value::Value::Null
    };

    (true) => {
        $crate::value::Value::Bool(true)
    };

    (false) => {
        $crate::value::Value::Bool(false)
    };

    ([ $($elem:tt),* $(,)? ]) => {
        $crate::value::Value::Array(std::rc::Rc::new(vec![ $( $crate::value!($elem) ),* ]))
    };

    ({ $($key:tt : $val:tt),* $(,)? }) => {
        {
            #[allow(unused_mut)]
            let mut map = $crate::__private::IndexMap::new();
            $(
                map.insert(($key).to_string(), $crate::value!($val));
            )*
            $crate::value::Value::Object(std::rc::Rc::new(map))
        }
    };

    ($other:expr) => {
        $crate::value::Value::from($other)
    };
}

// ── Tests ────────────────────────────────────────────────────────────────────
