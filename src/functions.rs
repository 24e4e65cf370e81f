// Built-in function implementations
// Grouped by namespace; the evaluator resolves arguments and dispatches here

use thiserror::Error;

use crate::error::{ErrorKind, GenericError};
use crate::raw::RawError;
use crate::signature::SignatureError;
use crate::state::StateError;
use crate::value::Value;

/// Function errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FunctionError {
    #[error(transparent)]
    Signature(#[from] SignatureError),

    #[error("argument error: {0}")]
    Argument(String),

    #[error(transparent)]
    Raw(#[from] RawError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("{0}")]
    Runtime(String),
}

impl FunctionError {
    /// The structured error, tagged with the function that raised it.
    pub fn at(self, namespace: &str, name: &str) -> GenericError {
        let err = match self {
            FunctionError::State(e) => GenericError::from(e),
            other => GenericError::new(ErrorKind::Function, other.to_string()),
        };
        err.with_function(namespace, name)
    }
}

/// The `core` namespace: type-independent functions
pub mod common {
    use super::*;

    /// core:type() - the value's type name
    pub fn type_of(value: &Value) -> Value {
        Value::from(value.type_name())
    }

    /// core:copy() - a structurally independent copy
    pub fn copy(value: &Value) -> Value {
        value.deep_copy()
    }

    /// core:isEmpty() - Empty, or a zero-length String, Array, Object or Raw
    pub fn is_empty(value: &Value) -> Value {
        let empty = match value {
            Value::Empty => true,
            Value::String(s) => s.is_empty(),
            Value::Array(a) => a.is_empty(),
            Value::Object(o) => o.is_empty(),
            Value::Raw(r) => r.is_empty(),
            _ => false,
        };
        Value::Bool(empty)
    }

    /// core:count() - members of a container; 0 for Empty, 1 for anything else
    pub fn count(value: &Value) -> Value {
        let n = match value {
            Value::Empty => 0,
            Value::Array(a) => a.len(),
            Value::Object(o) => o.len(),
            _ => 1,
        };
        Value::from(n)
    }
}

/// Object mutation functions; every result is built on a copy
pub mod object {
    use super::*;
    use indexmap::IndexMap;

    fn copied(obj: &Value) -> Result<Value, FunctionError> {
        match obj {
            Value::Object(_) => Ok(obj.deep_copy()),
            other => Err(FunctionError::Argument(format!(
                "expected an Object, got {}",
                other.type_name()
            ))),
        }
    }

    fn patch_members(patch: &Value) -> Result<&IndexMap<String, Value>, FunctionError> {
        patch
            .as_object()
            .ok_or_else(|| FunctionError::Argument("patch must be an Object".to_string()))
    }

    fn apply(obj: &Value, patch: &Value, insert_new: bool) -> Result<Value, FunctionError> {
        let mut out = copied(obj)?;
        let members = patch_members(patch)?;
        if let Some(map) = out.as_object_mut() {
            for (key, value) in members {
                if value.is_empty() {
                    map.shift_remove(key);
                } else if insert_new || map.contains_key(key) {
                    map.insert(key.clone(), value.deep_copy());
                }
            }
        }
        Ok(out)
    }

    /// object:update() - replace members that already exist; Empty deletes
    pub fn update(obj: &Value, patch: &Value) -> Result<Value, FunctionError> {
        apply(obj, patch, false)
    }

    /// object:upsert() - replace or append members; Empty deletes
    pub fn upsert(obj: &Value, patch: &Value) -> Result<Value, FunctionError> {
        apply(obj, patch, true)
    }

    /// object:rename() - rename a member in place, keeping its position
    pub fn rename(obj: &Value, from: &str, to: &str) -> Result<Value, FunctionError> {
        let out = copied(obj)?;
        let Some(map) = out.as_object() else {
            return Ok(out);
        };
        if !map.contains_key(from) || from == to {
            return Ok(out);
        }
        let renamed: IndexMap<String, Value> = map
            .iter()
            .filter(|(k, _)| k.as_str() != to)
            .map(|(k, v)| {
                if k == from {
                    (to.to_string(), v.clone())
                } else {
                    (k.clone(), v.clone())
                }
            })
            .collect();
        Ok(Value::object(renamed))
    }

    /// object:remove() - drop a member
    pub fn remove(obj: &Value, key: &str) -> Result<Value, FunctionError> {
        let mut out = copied(obj)?;
        if let Some(map) = out.as_object_mut() {
            map.shift_remove(key);
        }
        Ok(out)
    }
}

/// Structural path functions
pub mod path {
    use super::*;
    use crate::operators::path_list;
    use crate::path::{self as paths, Path};

    fn paths_arg(value: &Value) -> Result<Vec<Path>, FunctionError> {
        path_list(value)
            .ok_or_else(|| FunctionError::Argument("expected a Path or an Array of Paths".to_string()))
    }

    /// path:retain() - the union of locations reachable by the paths
    pub fn retain(obj: &Value, list: &Value) -> Result<Value, FunctionError> {
        Ok(paths::retain(obj, &paths_arg(list)?))
    }

    /// path:reclude() - everything except the locations reachable by the paths
    pub fn reclude(obj: &Value, list: &Value) -> Result<Value, FunctionError> {
        Ok(paths::reclude(obj, &paths_arg(list)?))
    }

    /// path:merge() - overlay disjoint parts, e.g. a retain and a reclude
    pub fn merge(base: &Value, overlay: &Value) -> Value {
        paths::merge(base, overlay)
    }

    /// path:paths() - every leaf location, linked to the value
    pub fn leaves(value: &Value) -> Value {
        Value::array(paths::leaf_paths(value).into_iter().map(Value::from).collect())
    }

    /// path:value() - retrieve through the path's root link
    pub fn value(path: &Path) -> Value {
        path.value()
    }

    /// path:get() - walk a value along a path
    pub fn get(value: &Value, path: &Path) -> Value {
        path.resolve(value)
    }

    /// path:create() - a path from an Array of keys and indices
    pub fn create(parts: &Value) -> Result<Value, FunctionError> {
        Path::from_value(parts).map(Value::from).ok_or_else(|| {
            FunctionError::Argument("path parts must be Strings or non-negative integers".to_string())
        })
    }
}

/// Raw byte functions
pub mod raw {
    use super::*;
    use crate::raw::Raw;

    pub fn encode_base64(raw: &Raw) -> Value {
        Value::from(raw.to_base64())
    }

    pub fn decode_base64(text: &str) -> Result<Value, FunctionError> {
        Ok(Value::Raw(Raw::from_base64(text)?))
    }

    pub fn to_hex(raw: &Raw) -> Value {
        Value::from(raw.to_hex())
    }

    pub fn from_hex(text: &str) -> Result<Value, FunctionError> {
        Ok(Value::Raw(Raw::from_hex(text)?))
    }

    /// raw:toString() - decode as UTF-8
    pub fn to_string(raw: &Raw) -> Result<Value, FunctionError> {
        Ok(Value::from(raw.to_utf8()?))
    }

    /// raw:fromString() - UTF-8 bytes of a string
    pub fn from_string(text: &str) -> Value {
        Value::Raw(Raw::from(text))
    }
}

/// Error inspection and construction
pub mod error {
    use super::*;

    /// error:create() - an error value (not raised)
    pub fn create(kind: &str, message: &str, payload: Option<&Value>) -> Value {
        let payload = payload.cloned().unwrap_or(Value::Empty);
        Value::from(GenericError::raised(kind, message, payload))
    }

    pub fn kind(err: &GenericError) -> Value {
        Value::from(err.kind.name())
    }

    pub fn message(err: &GenericError) -> Value {
        Value::from(err.message.as_str())
    }

    pub fn payload(err: &GenericError) -> Value {
        err.payload.clone()
    }
}

/// State store functions
pub mod state {
    use super::*;
    use crate::state::StateStore;

    /// state:get() - stored value, Empty on a miss; a default is stored on a miss
    pub fn get(store: &mut dyn StateStore, key: &str, default: Option<&Value>) -> Result<Value, FunctionError> {
        Ok(store.get(key, default)?)
    }

    /// state:set() - store a value, returning it
    pub fn set(store: &mut dyn StateStore, key: &str, value: &Value) -> Result<Value, FunctionError> {
        store.set(key, value)?;
        Ok(value.clone())
    }
}

/// Stream functions
pub mod stream {
    use super::*;
    use crate::raw::Raw;
    use crate::value::Stream;

    /// stream:collect() - Raw chunks concatenate; anything else becomes an Array
    pub fn collect(stream: &Stream) -> Value {
        let items = stream.drain();
        if !items.is_empty() && items.iter().all(Value::is_raw) {
            let mut bytes = Vec::new();
            for item in &items {
                if let Value::Raw(chunk) = item {
                    bytes.extend_from_slice(chunk.as_bytes());
                }
            }
            return Value::Raw(Raw::new(bytes));
        }
        Value::array(items)
    }
}
