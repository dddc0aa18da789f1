// src/reactive_mod.rs
// Reactive collaborator - wraps the root state tree and memoizes getter results

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::state_mod::StoreError;
use crate::util::{lock, nested_state_mut, read_lock, write_lock};

/// Factory for reactive wrappers. Injected into the store instead of living
/// in a process-wide global.
pub trait Reactivity: Send + Sync {
    /// Wraps a root state tree. In strict mode the wrapper rejects writes
    /// that are not sanctioned by a commit.
    fn wrap(&self, state: Value, strict: bool) -> Arc<dyn ReactiveTree>;
}

/// A wrapped root state tree with a memo table for named accessors.
///
/// `read` and `mutate` must invoke their visitor exactly once.
pub trait ReactiveTree: Send + Sync {
    fn read(&self, reader: &mut dyn FnMut(&Value));

    /// Applies `writer` to the root tree and invalidates memoized values.
    fn mutate(&self, sanctioned: bool, writer: &mut dyn FnMut(&mut Value))
        -> Result<(), StoreError>;

    /// Previously memoized value for `key`, if still valid.
    fn memo(&self, key: &str) -> Option<Value>;

    fn memoize(&self, key: &str, value: Value);

    /// Moves the tree out of the wrapper, leaving `Null` behind.
    fn take_state(&self) -> Value;

    /// Releases the wrapper. Safe to run after the store has moved on.
    fn teardown(&self);

    fn is_torn_down(&self) -> bool;

    /// Attaches `value` under `key` on the object at `parent`.
    ///
    /// Returns `false` without writing when the parent is not an object or
    /// already has a property named `key`.
    fn set_property(
        &self,
        sanctioned: bool,
        parent: &[String],
        key: &str,
        value: Value,
    ) -> Result<bool, StoreError> {
        let mut slot = Some(value);
        let mut attached = false;
        self.mutate(sanctioned, &mut |root| {
            if let Some(Value::Object(map)) = nested_state_mut(root, parent) {
                if !map.contains_key(key) {
                    if let Some(value) = slot.take() {
                        map.insert(key.to_string(), value);
                        attached = true;
                    }
                }
            }
        })?;
        Ok(attached)
    }

    /// Removes the property `key` from the object at `parent`, returning it.
    fn delete_property(
        &self,
        sanctioned: bool,
        parent: &[String],
        key: &str,
    ) -> Result<Option<Value>, StoreError> {
        let mut removed = None;
        self.mutate(sanctioned, &mut |root| {
            if let Some(Value::Object(map)) = nested_state_mut(root, parent) {
                removed = map.remove(key);
            }
        })?;
        Ok(removed)
    }
}

/// Runs `f` against the current tree and returns its result.
pub fn read_with<T, F>(tree: &dyn ReactiveTree, f: F) -> Option<T>
where
    F: FnOnce(&Value) -> T,
{
    let mut f = Some(f);
    let mut out = None;
    tree.read(&mut |state| {
        if let Some(f) = f.take() {
            out = Some(f(state));
        }
    });
    out
}

/// Default collaborator: a lock around the tree and a memo table that is
/// cleared on every write.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoReactivity;

impl Reactivity for MemoReactivity {
    fn wrap(&self, state: Value, strict: bool) -> Arc<dyn ReactiveTree> {
        Arc::new(MemoTree::new(state, strict))
    }
}

pub struct MemoTree {
    state: RwLock<Value>,
    memo: Mutex<HashMap<String, Value>>,
    /// Bumped on every write.
    version: AtomicU64,
    strict: bool,
    torn_down: AtomicBool,
}

impl fmt::Debug for MemoTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoTree")
            .field("version", &self.version())
            .field("strict", &self.strict)
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}

impl MemoTree {
    pub fn new(state: Value, strict: bool) -> Self {
        Self {
            state: RwLock::new(state),
            memo: Mutex::new(HashMap::new()),
            version: AtomicU64::new(0),
            strict,
            torn_down: AtomicBool::new(false),
        }
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    fn invalidate(&self) {
        self.version.fetch_add(1, Ordering::SeqCst);
        lock(&self.memo).clear();
    }
}

impl ReactiveTree for MemoTree {
    fn read(&self, reader: &mut dyn FnMut(&Value)) {
        let state = read_lock(&self.state);
        reader(&state);
    }

    fn mutate(
        &self,
        sanctioned: bool,
        writer: &mut dyn FnMut(&mut Value),
    ) -> Result<(), StoreError> {
        if self.strict && !sanctioned {
            tracing::error!("do not mutate store state outside mutation handlers");
            return Err(StoreError::StrictViolation);
        }
        {
            let mut state = write_lock(&self.state);
            writer(&mut state);
        }
        self.invalidate();
        Ok(())
    }

    fn memo(&self, key: &str) -> Option<Value> {
        if self.is_torn_down() {
            return None;
        }
        lock(&self.memo)
            .get(key)
            .cloned()
    }

    fn memoize(&self, key: &str, value: Value) {
        if self.is_torn_down() {
            return;
        }
        lock(&self.memo)
            .insert(key.to_string(), value);
    }

    fn take_state(&self) -> Value {
        let mut state = write_lock(&self.state);
        let taken = std::mem::take(&mut *state);
        drop(state);
        self.invalidate();
        taken
    }

    fn teardown(&self) {
        self.torn_down.store(true, Ordering::SeqCst);
        lock(&self.memo).clear();
    }

    fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }
}
