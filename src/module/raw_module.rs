// src/module/raw_module.rs
// Raw module configuration - what callers hand to the store

use serde_json::{json, Value};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::action_dispatcher::{
    ActionContext, ActionError, ActionHandler, AsyncActionFn, SyncActionFn,
};
use crate::local_context::Getters;

/// Produces a fresh state value each time a module is registered.
pub type StateFactory = Arc<dyn Fn() -> Value + Send + Sync>;

/// Synchronous state change: receives the module's local state and the payload.
pub type MutationFn = Arc<dyn Fn(&mut Value, &Value) + Send + Sync>;

/// Read-only derivation: `(local state, local getters, root state, root getters)`.
pub type GetterFn =
    Arc<dyn for<'a> Fn(&'a Value, &Getters<'a>, &'a Value, &Getters<'a>) -> Value + Send + Sync>;

/// Where a module's initial state comes from.
#[derive(Clone)]
pub enum StateSource {
    Value(Value),
    Factory(StateFactory),
}

impl StateSource {
    /// Computes the initial state, defaulting to an empty record.
    pub fn produce(&self) -> Value {
        let value = match self {
            StateSource::Value(value) => value.clone(),
            StateSource::Factory(factory) => factory(),
        };
        match value {
            Value::Null => json!({}),
            other => other,
        }
    }
}

/// A declared action plus its scoping.
#[derive(Clone)]
pub struct ActionDef {
    /// Registered under the bare key, ignoring the module namespace.
    pub root: bool,
    pub handler: Arc<dyn ActionHandler>,
}

/// Declarative module configuration.
///
/// Entries keep insertion order, which is the order handlers are registered
/// and child modules are installed.
#[derive(Clone, Default)]
pub struct ModuleConfig {
    pub(crate) state: Option<StateSource>,
    pub(crate) namespaced: bool,
    pub(crate) mutations: Vec<(String, MutationFn)>,
    pub(crate) actions: Vec<(String, ActionDef)>,
    pub(crate) getters: Vec<(String, GetterFn)>,
    pub(crate) modules: Vec<(String, ModuleConfig)>,
}

impl fmt::Debug for ModuleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleConfig")
            .field("namespaced", &self.namespaced)
            .field("mutations", &keys(&self.mutations))
            .field("actions", &keys(&self.actions))
            .field("getters", &keys(&self.getters))
            .field("modules", &keys(&self.modules))
            .finish()
    }
}

fn keys<T>(entries: &[(String, T)]) -> Vec<&str> {
    entries.iter().map(|(k, _)| k.as_str()).collect()
}

fn upsert<T>(entries: &mut Vec<(String, T)>, key: &str, value: T) {
    match entries.iter_mut().find(|(k, _)| k == key) {
        Some(entry) => entry.1 = value,
        None => entries.push((key.to_string(), value)),
    }
}

impl ModuleConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `state` as the module's initial state.
    pub fn state(mut self, state: Value) -> Self {
        self.state = Some(StateSource::Value(state));
        self
    }

    /// Compute the initial state with `factory` at registration time.
    pub fn state_fn<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.state = Some(StateSource::Factory(Arc::new(factory)));
        self
    }

    pub fn namespaced(mut self, namespaced: bool) -> Self {
        self.namespaced = namespaced;
        self
    }

    pub fn mutation<F>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(&mut Value, &Value) + Send + Sync + 'static,
    {
        upsert(&mut self.mutations, name, Arc::new(handler) as MutationFn);
        self
    }

    /// Register a synchronous action; its return value resolves immediately.
    pub fn action<F>(self, name: &str, handler: F) -> Self
    where
        F: Fn(&ActionContext, Value) -> Result<Value, ActionError> + Send + Sync + 'static,
    {
        self.action_handler(name, SyncActionFn::new(handler))
    }

    pub fn action_async<F, Fut>(self, name: &str, handler: F) -> Self
    where
        F: Fn(ActionContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ActionError>> + Send + 'static,
    {
        self.action_handler(name, AsyncActionFn::new(handler))
    }

    pub fn action_handler<H>(mut self, name: &str, handler: H) -> Self
    where
        H: ActionHandler + 'static,
    {
        let def = ActionDef {
            root: false,
            handler: Arc::new(handler),
        };
        upsert(&mut self.actions, name, def);
        self
    }

    /// Register an action under its bare name even inside a namespaced module.
    pub fn root_action<H>(mut self, name: &str, handler: H) -> Self
    where
        H: ActionHandler + 'static,
    {
        let def = ActionDef {
            root: true,
            handler: Arc::new(handler),
        };
        upsert(&mut self.actions, name, def);
        self
    }

    pub fn getter<F>(mut self, name: &str, getter: F) -> Self
    where
        F: for<'a> Fn(&'a Value, &Getters<'a>, &'a Value, &Getters<'a>) -> Value
            + Send
            + Sync
            + 'static,
    {
        upsert(&mut self.getters, name, Arc::new(getter) as GetterFn);
        self
    }

    pub fn module(mut self, key: &str, module: ModuleConfig) -> Self {
        upsert(&mut self.modules, key, module);
        self
    }

    pub fn is_namespaced(&self) -> bool {
        self.namespaced
    }

    pub fn child_keys(&self) -> Vec<&str> {
        keys(&self.modules)
    }
}
