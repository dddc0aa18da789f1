// src/util.rs
// Shared helpers: call normalization, nested state lookup, subscriber guards

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::state_mod::StoreError;

/// Options accepted by `commit` and `dispatch`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallOptions {
    /// Skip the namespace prefix of a local context and address the root registry.
    pub root: bool,
}

impl CallOptions {
    pub fn root() -> Self {
        Self { root: true }
    }
}

/// A `commit`/`dispatch` call after type normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedCall {
    pub call_type: String,
    pub payload: Value,
    pub options: CallOptions,
}

/// Accepts both `("type", payload, options)` and `({ "type": .., ..fields }, options)`.
///
/// In the object style the object itself becomes the payload and the second
/// argument is read as the options. The resolved type must be a string.
pub fn normalize_call(
    type_or_object: Value,
    payload: Value,
    options: CallOptions,
) -> Result<NormalizedCall, StoreError> {
    let object_type = match &type_or_object {
        Value::Object(map) => map.get("type").cloned(),
        _ => None,
    };

    let (call_type, payload, options) = match object_type {
        Some(call_type) => {
            let options = match payload {
                Value::Object(_) => match serde_json::from_value(payload) {
                    Ok(parsed) => parsed,
                    Err(error) => {
                        tracing::warn!("ignoring malformed call options: {}", error);
                        options
                    }
                },
                _ => options,
            };
            (call_type, type_or_object, options)
        }
        None => (type_or_object, payload, options),
    };

    match call_type {
        Value::String(call_type) => Ok(NormalizedCall {
            call_type,
            payload,
            options,
        }),
        other => Err(StoreError::InvalidType {
            found: value_kind(&other).to_string(),
        }),
    }
}

/// Short name of a JSON value's kind, used in error messages.
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Walks `path` from `root` one key at a time.
pub fn nested_state<'a>(root: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(root, |value, key| value.get(key.as_str()))
}

pub fn nested_state_mut<'a>(root: &'a mut Value, path: &[String]) -> Option<&'a mut Value> {
    path.iter()
        .try_fold(root, |value, key| value.get_mut(key.as_str()))
}

/// Renders a module path for log lines, `<root>` for the empty path.
pub fn display_path(path: &[String]) -> String {
    if path.is_empty() {
        "<root>".to_string()
    } else {
        path.join("/")
    }
}

/// Converts a slice of string-likes into an owned module path.
pub fn to_path<S: AsRef<str>>(keys: &[S]) -> Vec<String> {
    keys.iter().map(|k| k.as_ref().to_string()).collect()
}

// Lock helpers that recover from poisoning left by a panicking handler.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

pub(crate) fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

pub(crate) fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

/// Runs a subscriber callback, logging and swallowing a panic instead of
/// letting it reach the caller.
pub(crate) fn notify_guarded<F: FnOnce()>(label: &str, notify: F) {
    if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(notify)) {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        tracing::error!("{} subscriber failed: {}", label, message);
    }
}
