// Function signature validation and type checking
// One signature per built-in function, looked up by namespace and name

use thiserror::Error;

use crate::value::Value;

/// Signature validation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SignatureError {
    #[error("unknown function {namespace}:{name}")]
    UnknownFunction { namespace: String, name: String },

    #[error("argument count mismatch: expected {min}..={max}, got {actual}")]
    ArgumentCountMismatch {
        min: usize,
        max: usize,
        actual: usize,
    },

    #[error("argument {index}: expected {expected:?}, got {found}")]
    TypeMismatch {
        index: usize,
        expected: ParamType,
        found: &'static str,
    },
}

/// Parameter type
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamType {
    String,
    Boolean,
    Array,
    Object,
    Raw,
    Path,
    Error,
    Stream,
    Any,
}

impl ParamType {
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Boolean => matches!(value, Value::Bool(_)),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
            ParamType::Raw => value.is_raw(),
            ParamType::Path => value.is_path(),
            ParamType::Error => value.is_fault(),
            ParamType::Stream => matches!(value, Value::Stream(_)),
            ParamType::Any => true,
        }
    }
}

/// Function parameter definition
#[derive(Debug, Clone, Copy)]
pub struct Parameter {
    pub param_type: ParamType,
    pub optional: bool,
}

const fn req(param_type: ParamType) -> Parameter {
    Parameter {
        param_type,
        optional: false,
    }
}

const fn opt(param_type: ParamType) -> Parameter {
    Parameter {
        param_type,
        optional: true,
    }
}

/// Function signature
#[derive(Debug, Clone, Copy)]
pub struct Signature {
    pub params: &'static [Parameter],
}

impl Signature {
    /// Create a new signature
    pub const fn new(params: &'static [Parameter]) -> Self {
        Signature { params }
    }

    /// Validate argument count
    pub fn validate_arg_count(&self, actual: usize) -> Result<(), SignatureError> {
        let required = self.params.iter().filter(|p| !p.optional).count();
        let max = self.params.len();

        if actual < required || actual > max {
            return Err(SignatureError::ArgumentCountMismatch {
                min: required,
                max,
                actual,
            });
        }

        Ok(())
    }

    /// Validate argument types; an `Empty` optional argument counts as absent
    pub fn validate_types(&self, args: &[Value]) -> Result<(), SignatureError> {
        for (index, (param, arg)) in self.params.iter().zip(args).enumerate() {
            if param.optional && arg.is_empty() {
                continue;
            }
            if !param.param_type.accepts(arg) {
                return Err(SignatureError::TypeMismatch {
                    index,
                    expected: param.param_type,
                    found: arg.type_name(),
                });
            }
        }
        Ok(())
    }

    pub fn validate(&self, args: &[Value]) -> Result<(), SignatureError> {
        self.validate_arg_count(args.len())?;
        self.validate_types(args)
    }
}

use ParamType as P;

const ONE_ANY: Signature = Signature::new(&[req(P::Any)]);
const OBJECT_PATCH: Signature = Signature::new(&[req(P::Object), req(P::Object)]);
const OBJECT_PATHS: Signature = Signature::new(&[req(P::Object), req(P::Any)]);
const ONE_RAW: Signature = Signature::new(&[req(P::Raw)]);
const ONE_STRING: Signature = Signature::new(&[req(P::String)]);
const ONE_ERROR: Signature = Signature::new(&[req(P::Error)]);
const RENAME: Signature = Signature::new(&[req(P::Object), req(P::String), req(P::String)]);
const REMOVE: Signature = Signature::new(&[req(P::Object), req(P::String)]);
const PATH_VALUE: Signature = Signature::new(&[req(P::Path)]);
const TWO_ANY: Signature = Signature::new(&[req(P::Any), req(P::Any)]);
const PATH_GET: Signature = Signature::new(&[req(P::Any), req(P::Path)]);
const NO_ARGS: Signature = Signature::new(&[]);
const ONE_ARRAY: Signature = Signature::new(&[req(P::Array)]);
const ERROR_CREATE: Signature = Signature::new(&[req(P::String), req(P::String), opt(P::Any)]);
const ONE_BOOLEAN: Signature = Signature::new(&[req(P::Boolean)]);
const STATE_GET: Signature = Signature::new(&[req(P::String), opt(P::Any)]);
const STATE_SET: Signature = Signature::new(&[req(P::String), req(P::Any)]);
const ONE_STREAM: Signature = Signature::new(&[req(P::Stream)]);

/// Signature of a built-in function.
pub fn builtin(namespace: &str, name: &str) -> Result<Signature, SignatureError> {
    let sig = match (namespace, name) {
        ("core", "type" | "copy" | "isEmpty" | "count") => ONE_ANY,

        ("object", "update" | "upsert") => OBJECT_PATCH,
        ("object", "rename") => RENAME,
        ("object", "remove") => REMOVE,

        ("path", "retain" | "reclude") => OBJECT_PATHS,
        ("path", "merge") => TWO_ANY,
        ("path", "paths") => ONE_ANY,
        ("path", "value") => PATH_VALUE,
        ("path", "get") => PATH_GET,
        ("path", "current") => NO_ARGS,
        ("path", "create") => ONE_ARRAY,

        ("raw", "encodeBase64" | "toHex" | "toString") => ONE_RAW,
        ("raw", "decodeBase64" | "fromHex" | "fromString") => ONE_STRING,

        ("error", "create") => ERROR_CREATE,
        ("error", "kind" | "message" | "payload") => ONE_ERROR,
        ("error", "handled") => ONE_BOOLEAN,

        ("state", "get") => STATE_GET,
        ("state", "set") => STATE_SET,

        ("stream", "collect") => ONE_STREAM,

        _ => {
            return Err(SignatureError::UnknownFunction {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
        }
    };
    Ok(sig)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value;

    #[test]
    fn test_signature_validation() {
        let sig = STATE_GET;

        // Valid: 1 required arg provided
        assert!(sig.validate_arg_count(1).is_ok());

        // Valid: both args provided
        assert!(sig.validate_arg_count(2).is_ok());

        // Invalid: too few args
        assert!(sig.validate_arg_count(0).is_err());

        // Invalid: too many args
        assert_eq!(
            sig.validate_arg_count(3),
            Err(SignatureError::ArgumentCountMismatch {
                min: 1,
                max: 2,
                actual: 3
            })
        );
    }

    #[test]
    fn test_type_validation() {
        let sig = builtin("object", "rename").unwrap();
        assert!(sig.validate(&[value!({"a": 1}), value!("a"), value!("b")]).is_ok());
        assert_eq!(
            sig.validate(&[value!([1]), value!("a"), value!("b")]),
            Err(SignatureError::TypeMismatch {
                index: 0,
                expected: ParamType::Object,
                found: "Array"
            })
        );
    }

    #[test]
    fn test_empty_optional_is_absent() {
        let sig = builtin("state", "get").unwrap();
        assert!(sig.validate(&[value!("k"), Value::Empty]).is_ok());
    }

    #[test]
    fn test_unknown_function() {
        assert!(matches!(
            builtin("core", "nope"),
            Err(SignatureError::UnknownFunction { .. })
        ));
    }
}
