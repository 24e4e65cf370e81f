// Keyed state across evaluations
// Values travel as text: a one-character tag, then base64 (raw) or JSON

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use indexmap::IndexMap;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::error::{ErrorKind, GenericError};
use crate::raw::Raw;
use crate::value::Value;

const RAW_TAG: char = 'r';
const JSON_TAG: char = 'j';

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateError {
    /// The backend could not be reached; worth retrying.
    #[error("state backend unavailable: {0}")]
    Transient(String),

    #[error("state backend failed: {0}")]
    Backend(String),

    #[error("malformed stored value for '{key}': {reason}")]
    Codec { key: String, reason: String },

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

impl From<StateError> for GenericError {
    fn from(e: StateError) -> Self {
        let code = match &e {
            StateError::Transient(_) => "TRANSIENT",
            StateError::Backend(_) => "BACKEND",
            StateError::Codec { .. } => "CODEC",
            StateError::Exhausted { .. } => "EXHAUSTED",
        };
        let mut payload = IndexMap::new();
        payload.insert("code".to_string(), Value::from(code));
        GenericError::new(ErrorKind::Component, e.to_string())
            .with_code(code)
            .with_payload(Value::object(payload))
    }
}

/// Keyed get/set as seen by programs.
pub trait StateStore {
    /// The stored value, or `Empty` on a miss. With a default, a miss stores
    /// and returns the default.
    fn get(&mut self, key: &str, default: Option<&Value>) -> Result<Value, StateError>;

    fn set(&mut self, key: &str, value: &Value) -> Result<(), StateError>;
}

/// Text storage underneath a [`StateStore`].
pub trait StateBackend {
    fn read(&self, key: &str) -> Result<Option<String>, StateError>;
    fn write(&self, key: &str, text: &str) -> Result<(), StateError>;
}

/// Encode a value for the wire.
pub fn encode(value: &Value) -> Result<String, StateError> {
    match value {
        Value::Raw(raw) => Ok(format!("{}{}", RAW_TAG, raw.to_base64())),
        other => other
            .to_json_string()
            .map(|json| format!("{}{}", JSON_TAG, json))
            .map_err(|e| StateError::Codec {
                key: String::new(),
                reason: e.to_string(),
            }),
    }
}

/// Decode a wire value stored under `key`.
pub fn decode(key: &str, text: &str) -> Result<Value, StateError> {
    let codec = |reason: String| StateError::Codec {
        key: key.to_string(),
        reason,
    };
    let mut chars = text.chars();
    match chars.next() {
        Some(RAW_TAG) => Raw::from_base64(chars.as_str())
            .map(Value::Raw)
            .map_err(|e| codec(e.to_string())),
        Some(JSON_TAG) => Value::from_json_str(chars.as_str()).map_err(|e| codec(e.to_string())),
        Some(other) => Err(codec(format!("unknown tag '{}'", other))),
        None => Err(codec("empty payload".to_string())),
    }
}

/// A store that retries transient backend failures with exponential backoff.
///
/// Delivery is at-least-once and the last write per key wins.
pub struct RetryingStore<B> {
    backend: B,
    policy: RetryPolicy,
}

impl<B: StateBackend> RetryingStore<B> {
    pub fn new(backend: B, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn with_retry<T>(&self, op: &str, mut f: impl FnMut(&B) -> Result<T, StateError>) -> Result<T, StateError> {
        let attempts = self.policy.max_attempts.max(1);
        let mut last = String::new();
        for attempt in 0..attempts {
            match f(&self.backend) {
                Err(StateError::Transient(reason)) => {
                    warn!(op, attempt, %reason, "state backend unavailable, retrying");
                    last = reason;
                    if attempt + 1 < attempts {
                        thread::sleep(self.policy.backoff(attempt));
                    }
                }
                other => return other,
            }
        }
        Err(StateError::Exhausted { attempts, last })
    }
}

impl<B: StateBackend> StateStore for RetryingStore<B> {
    fn get(&mut self, key: &str, default: Option<&Value>) -> Result<Value, StateError> {
        let stored = self.with_retry("read", |b| b.read(key))?;
        match (stored, default) {
            (Some(text), _) => decode(key, &text),
            (None, Some(default)) if !default.is_empty() => {
                debug!(key, "state miss, storing default");
                self.set(key, default)?;
                Ok(default.clone())
            }
            (None, _) => Ok(Value::Empty),
        }
    }

    fn set(&mut self, key: &str, value: &Value) -> Result<(), StateError> {
        let text = encode(value).map_err(|e| match e {
            StateError::Codec { reason, .. } => StateError::Codec {
                key: key.to_string(),
                reason,
            },
            other => other,
        })?;
        self.with_retry("write", |b| b.write(key, &text))
    }
}

/// In-process backend. Clones share the same map.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    entries: Arc<Mutex<HashMap<String, String>>>,
    failures: Arc<Mutex<u32>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` operations fail transiently.
    pub fn fail_next(&self, count: u32) {
        *self.failures.lock() = count;
    }

    pub fn raw_entry(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn check_failure(&self) -> Result<(), StateError> {
        let mut failures = self.failures.lock();
        if *failures > 0 {
            *failures -= 1;
            return Err(StateError::Transient("connection refused".to_string()));
        }
        Ok(())
    }
}

impl StateBackend for MemoryBackend {
    fn read(&self, key: &str) -> Result<Option<String>, StateError> {
        self.check_failure()?;
        Ok(self.entries.lock().get(key).cloned())
    }

    fn write(&self, key: &str, text: &str) -> Result<(), StateError> {
        self.check_failure()?;
        self.entries.lock().insert(key.to_string(), text.to_string());
        Ok(())
    }
}

/// A retrying store over a fresh in-memory backend.
pub fn memory_store() -> RetryingStore<MemoryBackend> {
    RetryingStore::new(MemoryBackend::new(), RetryPolicy::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value;
    use pretty_assertions::assert_eq;

    fn store() -> RetryingStore<MemoryBackend> {
        RetryingStore::new(MemoryBackend::new(), RetryPolicy::immediate(3))
    }

    #[test]
    fn test_wire_tags() {
        assert_eq!(encode(&Value::raw("hi")).unwrap(), "raGk=");
        assert_eq!(encode(&value!({"a": 1})).unwrap(), r#"j{"a":1}"#);
        assert_eq!(decode("k", "raGk=").unwrap(), Value::raw("hi"));
        assert_eq!(decode("k", r#"j[1,2]"#).unwrap(), value!([1, 2]));
        assert!(matches!(decode("k", "x1"), Err(StateError::Codec { .. })));
        assert!(matches!(decode("k", ""), Err(StateError::Codec { .. })));
    }

    #[test]
    fn test_miss_semantics() {
        let mut store = store();
        assert_eq!(store.get("k", None).unwrap(), Value::Empty);
        assert!(store.backend().is_empty());

        assert_eq!(store.get("k", Some(&value!(5))).unwrap(), value!(5));
        assert_eq!(store.backend().raw_entry("k").as_deref(), Some("j5"));
        assert_eq!(store.get("k", Some(&value!(9))).unwrap(), value!(5));
    }

    #[test]
    fn test_last_write_wins() {
        let mut store = store();
        store.set("k", &value!(1)).unwrap();
        store.set("k", &value!("two")).unwrap();
        assert_eq!(store.get("k", None).unwrap(), value!("two"));
    }

    #[test]
    fn test_retries_transient_failures() {
        let mut store = store();
        store.backend().fail_next(2);
        store.set("k", &value!(true)).unwrap();
        assert_eq!(store.get("k", None).unwrap(), value!(true));

        store.backend().fail_next(3);
        assert_eq!(
            store.set("k", &value!(false)),
            Err(StateError::Exhausted {
                attempts: 3,
                last: "connection refused".to_string()
            })
        );
    }

    #[test]
    fn test_clones_share_entries() {
        let backend = MemoryBackend::new();
        let mut a = RetryingStore::new(backend.clone(), RetryPolicy::immediate(1));
        let mut b = RetryingStore::new(backend, RetryPolicy::immediate(1));
        a.set("shared", &value!(1)).unwrap();
        assert_eq!(b.get("shared", None).unwrap(), value!(1));
    }
}
