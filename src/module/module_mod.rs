// src/module/module_mod.rs
// Module - a single node of the module tree

use serde_json::{json, Value};
use std::fmt;

use crate::local_context::LocalContext;
use crate::module::raw_module::ModuleConfig;

/// A registered module: its raw configuration, its initial state until that
/// state is installed into the root tree, and its direct children.
pub struct Module {
    /// Registered after store construction; only runtime modules may be unregistered.
    pub(crate) runtime: bool,
    pub(crate) raw: ModuleConfig,
    state: Option<Value>,
    children: Vec<(String, Module)>,
    pub(crate) context: Option<LocalContext>,
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("runtime", &self.runtime)
            .field("namespaced", &self.namespaced())
            .field("installed", &self.state.is_none())
            .field("children", &self.child_keys())
            .finish()
    }
}

impl Module {
    /// Builds a node from raw configuration, computing its state once.
    pub fn new(raw: ModuleConfig, runtime: bool) -> Self {
        let state = raw
            .state
            .as_ref()
            .map(|source| source.produce())
            .unwrap_or_else(|| json!({}));

        Self {
            runtime,
            raw,
            state: Some(state),
            children: Vec::new(),
            context: None,
        }
    }

    pub fn namespaced(&self) -> bool {
        self.raw.namespaced
    }

    pub fn is_runtime(&self) -> bool {
        self.runtime
    }

    /// State computed at registration, `None` once it has moved into the root tree.
    pub fn pending_state(&self) -> Option<&Value> {
        self.state.as_ref()
    }

    /// Hands the state over to the root tree. Subsequent calls return `None`.
    pub(crate) fn take_state(&mut self) -> Option<Value> {
        self.state.take()
    }

    pub fn context(&self) -> Option<&LocalContext> {
        self.context.as_ref()
    }

    pub fn add_child(&mut self, key: &str, module: Module) {
        match self.children.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = module,
            None => self.children.push((key.to_string(), module)),
        }
    }

    pub fn remove_child(&mut self, key: &str) -> Option<Module> {
        let index = self.children.iter().position(|(k, _)| k == key)?;
        Some(self.children.remove(index).1)
    }

    pub fn get_child(&self, key: &str) -> Option<&Module> {
        self.children.iter().find(|(k, _)| k == key).map(|(_, m)| m)
    }

    pub fn get_child_mut(&mut self, key: &str) -> Option<&mut Module> {
        self.children
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, m)| m)
    }

    pub fn has_child(&self, key: &str) -> bool {
        self.get_child(key).is_some()
    }

    pub fn child_keys(&self) -> Vec<&str> {
        self.children.iter().map(|(k, _)| k.as_str()).collect()
    }

    pub(crate) fn children_mut(&mut self) -> impl Iterator<Item = (&String, &mut Module)> {
        self.children.iter_mut().map(|(k, m)| (&*k, m))
    }

    /// Replaces the handler tables and namespacing of this node, keeping its state.
    ///
    /// Tables absent from `raw` are left as they were.
    pub fn update(&mut self, raw: &ModuleConfig) {
        self.raw.namespaced = raw.namespaced;
        if !raw.mutations.is_empty() {
            self.raw.mutations = raw.mutations.clone();
        }
        if !raw.actions.is_empty() {
            self.raw.actions = raw.actions.clone();
        }
        if !raw.getters.is_empty() {
            self.raw.getters = raw.getters.clone();
        }
    }
}
