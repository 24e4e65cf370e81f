// Configuration
// Evaluator settings, state-store retry policy and option validation

use std::time::Duration;

use indexmap::IndexMap;
use serde::Deserialize;
use thiserror::Error;

use crate::ast::{EvaluatePolicy, ResetPolicy};
use crate::error::{ErrorKind, GenericError};
use crate::value::Value;

/// Invalid configuration or option value.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("option '{option}' = {value} is out of range {min}..={max}")]
    OutOfRange {
        option: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("option '{option}' must be {expected}, got {found}")]
    InvalidType {
        option: String,
        expected: &'static str,
        found: String,
    },

    #[error("option '{option}' has unknown value '{value}'")]
    InvalidValue { option: String, value: String },

    #[error("unknown option '{option}'")]
    Unknown { option: String },

    #[error("malformed configuration: {0}")]
    Malformed(String),
}

impl From<ConfigurationError> for GenericError {
    fn from(e: ConfigurationError) -> Self {
        let option = match &e {
            ConfigurationError::OutOfRange { option, .. }
            | ConfigurationError::InvalidType { option, .. }
            | ConfigurationError::InvalidValue { option, .. }
            | ConfigurationError::Unknown { option } => Value::from(option.as_str()),
            ConfigurationError::Malformed(_) => Value::Empty,
        };
        let mut payload = IndexMap::new();
        payload.insert("option".to_string(), option);
        GenericError::new(ErrorKind::Configuration, e.to_string()).with_payload(Value::object(payload))
    }
}

/// Evaluator settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EvaluatorConfig {
    /// Nested evaluations allowed before an EvaluationError.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Reset policy of let-bindings that do not name one.
    #[serde(default = "default_reset")]
    pub default_reset: ResetPolicy,
    /// Evaluate policy of let-bindings that do not name one.
    #[serde(default = "default_evaluate")]
    pub default_evaluate: EvaluatePolicy,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            default_reset: default_reset(),
            default_evaluate: default_evaluate(),
        }
    }
}

fn default_max_depth() -> usize {
    302
}

fn default_reset() -> ResetPolicy {
    ResetPolicy::AfterScope
}

fn default_evaluate() -> EvaluatePolicy {
    EvaluatePolicy::Lazy
}

pub const MAX_DEPTH_LIMIT: usize = 10_000;

impl EvaluatorConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigurationError> {
        let config: EvaluatorConfig =
            serde_json::from_str(text).map_err(|e| ConfigurationError::Malformed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        check_range("maxDepth", self.max_depth as f64, 1.0, MAX_DEPTH_LIMIT as f64)
    }
}

/// Retry-with-backoff settings for the state store.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            multiplier: default_multiplier(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    50
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_backoff_ms() -> u64 {
    2000
}

impl RetryPolicy {
    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms: 0,
            multiplier: 1.0,
            max_backoff_ms: 0,
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigurationError> {
        let policy: RetryPolicy =
            serde_json::from_str(text).map_err(|e| ConfigurationError::Malformed(e.to_string()))?;
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        check_range("maxAttempts", self.max_attempts as f64, 1.0, 100.0)?;
        check_range("multiplier", self.multiplier, 1.0, 10.0)
    }

    /// Delay before retry number `retry` (0-based), capped at `max_backoff_ms`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = self.multiplier.powi(retry as i32);
        let ms = (self.initial_backoff_ms as f64 * factor).min(self.max_backoff_ms as f64);
        Duration::from_millis(ms.max(0.0) as u64)
    }
}

fn check_range(option: &str, value: f64, min: f64, max: f64) -> Result<(), ConfigurationError> {
    if value < min || value > max {
        return Err(ConfigurationError::OutOfRange {
            option: option.to_string(),
            value,
            min,
            max,
        });
    }
    Ok(())
}

/// Read component or driver options out of a program Object.
pub struct Options<'a> {
    map: Option<&'a IndexMap<String, Value>>,
}

impl<'a> Options<'a> {
    /// `Empty` and `Null` mean "no options"; anything else must be an Object.
    pub fn new(options: &'a Value) -> Result<Self, ConfigurationError> {
        match options {
            Value::Object(map) => Ok(Options { map: Some(map) }),
            Value::Empty | Value::Null => Ok(Options { map: None }),
            other => Err(ConfigurationError::InvalidType {
                option: "options".to_string(),
                expected: "Object",
                found: other.type_name().to_string(),
            }),
        }
    }

    /// Fail on any key outside `known`.
    pub fn only(&self, known: &[&str]) -> Result<(), ConfigurationError> {
        if let Some(map) = self.map {
            if let Some(key) = map.keys().find(|k| !known.contains(&k.as_str())) {
                return Err(ConfigurationError::Unknown {
                    option: key.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn get(&self, option: &str) -> Option<&'a Value> {
        self.map.and_then(|m| m.get(option))
    }

    /// An integer option within `min..=max`, or `default` when absent.
    pub fn integer(&self, option: &str, min: i64, max: i64, default: i64) -> Result<i64, ConfigurationError> {
        let Some(value) = self.get(option) else {
            return Ok(default);
        };
        let n = value
            .as_number()
            .filter(|n| n.is_integral())
            .ok_or_else(|| ConfigurationError::InvalidType {
                option: option.to_string(),
                expected: "an integer",
                found: value.type_name().to_string(),
            })?;
        check_range(option, n.value(), min as f64, max as f64)?;
        Ok(n.value() as i64)
    }

    pub fn array(&self, option: &str) -> Result<Option<&'a Vec<Value>>, ConfigurationError> {
        match self.get(option) {
            None => Ok(None),
            Some(Value::Array(items)) => Ok(Some(items)),
            Some(other) => Err(ConfigurationError::InvalidType {
                option: option.to_string(),
                expected: "an Array",
                found: other.type_name().to_string(),
            }),
        }
    }
}
