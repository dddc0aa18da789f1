// src/local_context.rs
// Local context - a module's namespace-rebased view of the store

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

use crate::reactive_mod::ReactiveTree;
use crate::state_mod::{Store, StoreError, StoreInner};
use crate::util::{normalize_call, CallOptions, NormalizedCall};

/// `dispatch`/`commit`/`getters`/`state` rebased to one module.
///
/// Calls are prefixed with the module namespace unless `CallOptions::root` is
/// set. State and getters are resolved against the live store on every access.
#[derive(Clone)]
pub struct LocalContext {
    store: Weak<StoreInner>,
    namespace: String,
    path: Vec<String>,
}

impl fmt::Debug for LocalContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalContext")
            .field("namespace", &self.namespace)
            .field("path", &self.path)
            .finish()
    }
}

impl LocalContext {
    pub(crate) fn new(store: Weak<StoreInner>, namespace: String, path: Vec<String>) -> Self {
        Self {
            store,
            namespace,
            path,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    fn store(&self) -> Result<Store, StoreError> {
        self.store
            .upgrade()
            .map(Store::from_inner)
            .ok_or(StoreError::Disposed)
    }

    fn localize(&self, call: NormalizedCall) -> NormalizedCall {
        if call.options.root {
            call
        } else {
            NormalizedCall {
                call_type: format!("{}{}", self.namespace, call.call_type),
                ..call
            }
        }
    }

    pub fn commit(&self, call_type: impl Into<Value>, payload: Value) -> Result<(), StoreError> {
        self.commit_with(call_type, payload, CallOptions::default())
    }

    pub fn commit_with(
        &self,
        call_type: impl Into<Value>,
        payload: Value,
        options: CallOptions,
    ) -> Result<(), StoreError> {
        let store = self.store()?;
        self.commit_on(&store, call_type.into(), payload, options)
    }

    pub(crate) fn commit_on(
        &self,
        store: &Store,
        call_type: Value,
        payload: Value,
        options: CallOptions,
    ) -> Result<(), StoreError> {
        if self.namespace.is_empty() {
            return store.commit_with(call_type, payload, options);
        }

        let call = self.localize(normalize_call(call_type, payload, options)?);
        if !call.options.root && !store.has_mutation(&call.call_type) {
            tracing::warn!(
                "unknown local mutation type, global type: {}",
                call.call_type
            );
            return Ok(());
        }
        store.commit_with(call.call_type, call.payload, call.options)
    }

    pub async fn dispatch(
        &self,
        call_type: impl Into<Value>,
        payload: Value,
    ) -> Result<Value, StoreError> {
        self.dispatch_with(call_type, payload, CallOptions::default())
            .await
    }

    pub async fn dispatch_with(
        &self,
        call_type: impl Into<Value>,
        payload: Value,
        options: CallOptions,
    ) -> Result<Value, StoreError> {
        let store = self.store()?;
        self.dispatch_on(&store, call_type.into(), payload, options)
            .await
    }

    pub(crate) async fn dispatch_on(
        &self,
        store: &Store,
        call_type: Value,
        payload: Value,
        options: CallOptions,
    ) -> Result<Value, StoreError> {
        if self.namespace.is_empty() {
            return store.dispatch_with(call_type, payload, options).await;
        }

        let call = self.localize(normalize_call(call_type, payload, options)?);
        if !call.options.root && !store.has_action(&call.call_type) {
            tracing::warn!("unknown local action type, global type: {}", call.call_type);
            return Ok(Value::Null);
        }
        store
            .dispatch_with(call.call_type, call.payload, call.options)
            .await
    }

    /// The module's state, walked from the current root on each call.
    pub fn state(&self) -> Value {
        self.store()
            .ok()
            .and_then(|store| store.module_state(&self.path))
            .unwrap_or(Value::Null)
    }

    /// Evaluates the getter registered as `namespace + name`.
    pub fn getter(&self, name: &str) -> Option<Value> {
        self.store().ok()?.inner().local_getter(&self.namespace, name)
    }

    /// Local getter names visible from this module.
    pub fn getter_keys(&self) -> Vec<String> {
        match self.store.upgrade() {
            Some(inner) => inner.getter_index(&self.namespace).keys(),
            None => Vec::new(),
        }
    }
}

/// Maps local getter names to their fully-namespaced registry keys.
///
/// Built once per namespace and cached until the next reactive rebuild.
#[derive(Debug, Default)]
pub(crate) struct GetterIndex {
    local_to_full: BTreeMap<String, String>,
}

impl GetterIndex {
    pub(crate) fn build<I>(namespace: &str, full_keys: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let local_to_full = full_keys
            .into_iter()
            .filter_map(|full| {
                full.strip_prefix(namespace)
                    .map(|local| (local.to_string(), full.clone()))
            })
            .collect();
        Self { local_to_full }
    }

    pub(crate) fn full_key(&self, local: &str) -> Option<&str> {
        self.local_to_full.get(local).map(String::as_str)
    }

    pub(crate) fn keys(&self) -> Vec<String> {
        self.local_to_full.keys().cloned().collect()
    }
}

/// Getter accessors handed to getter functions.
///
/// Every lookup goes through the store's memo table; values are never
/// snapshotted into the view itself.
pub struct Getters<'a> {
    inner: &'a StoreInner,
    tree: &'a dyn ReactiveTree,
    root: &'a Value,
    index: Arc<GetterIndex>,
}

impl<'a> Getters<'a> {
    pub(crate) fn new(
        inner: &'a StoreInner,
        tree: &'a dyn ReactiveTree,
        root: &'a Value,
        index: Arc<GetterIndex>,
    ) -> Self {
        Self {
            inner,
            tree,
            root,
            index,
        }
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        let full_key = self.index.full_key(name)?;
        self.inner.evaluate_getter(self.tree, full_key, self.root)
    }

    /// Shorthand for numeric getters.
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(|v| v.as_f64())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.full_key(name).is_some()
    }

    pub fn keys(&self) -> Vec<String> {
        self.index.keys()
    }
}

impl fmt::Debug for Getters<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Getters")
            .field("keys", &self.index.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_strips_namespace_prefix() {
        let index = GetterIndex::build(
            "cart/",
            vec![
                "cart/total".to_string(),
                "cart/items/count".to_string(),
                "user/name".to_string(),
            ],
        );
        assert_eq!(index.keys(), vec!["items/count", "total"]);
        assert_eq!(index.full_key("total"), Some("cart/total"));
        assert_eq!(index.full_key("name"), None);
    }

    #[test]
    fn root_index_exposes_every_key() {
        let index = GetterIndex::build("", vec!["a/x".to_string(), "y".to_string()]);
        assert_eq!(index.full_key("a/x"), Some("a/x"));
        assert_eq!(index.keys().len(), 2);
    }
}
