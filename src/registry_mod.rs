// src/registry_mod.rs
// Flat handler registry keyed by fully-namespaced type strings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::installer::{WrappedAction, WrappedGetter, WrappedMutation};

/// The kinds of operation a module can register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HandlerKind {
    Mutation,
    Action,
    Getter,
}

/// A registry slot. Mutations and actions fan out to every handler registered
/// under the same type; a getter type holds exactly one accessor.
pub(crate) enum RegistryEntry {
    Mutations(Vec<Arc<WrappedMutation>>),
    Actions(Vec<Arc<WrappedAction>>),
    Getter(Arc<WrappedGetter>),
}

impl RegistryEntry {
    pub(crate) fn kind(&self) -> HandlerKind {
        match self {
            RegistryEntry::Mutations(_) => HandlerKind::Mutation,
            RegistryEntry::Actions(_) => HandlerKind::Action,
            RegistryEntry::Getter(_) => HandlerKind::Getter,
        }
    }

    fn len(&self) -> usize {
        match self {
            RegistryEntry::Mutations(list) => list.len(),
            RegistryEntry::Actions(list) => list.len(),
            RegistryEntry::Getter(_) => 1,
        }
    }
}

/// Mutation, action and getter tables plus the namespace map.
///
/// Populated by the installer walk and rebuilt from scratch whenever modules
/// are removed or hot-updated.
#[derive(Default)]
pub(crate) struct Registry {
    tables: HashMap<HandlerKind, HashMap<String, RegistryEntry>>,
    /// Namespace -> path of the namespaced module that owns it.
    namespace_map: HashMap<String, Vec<String>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("mutations", &self.types(HandlerKind::Mutation))
            .field("actions", &self.types(HandlerKind::Action))
            .field("getters", &self.types(HandlerKind::Getter))
            .field("namespaces", &self.namespace_map.len())
            .finish()
    }
}

impl Registry {
    fn table(&self, kind: HandlerKind) -> Option<&HashMap<String, RegistryEntry>> {
        self.tables.get(&kind)
    }

    pub(crate) fn push_mutation(&mut self, call_type: String, mutation: WrappedMutation) {
        let entry = self
            .tables
            .entry(HandlerKind::Mutation)
            .or_default()
            .entry(call_type)
            .or_insert_with(|| RegistryEntry::Mutations(Vec::new()));
        if let RegistryEntry::Mutations(list) = entry {
            list.push(Arc::new(mutation));
        }
    }

    pub(crate) fn push_action(&mut self, call_type: String, action: WrappedAction) {
        let entry = self
            .tables
            .entry(HandlerKind::Action)
            .or_default()
            .entry(call_type)
            .or_insert_with(|| RegistryEntry::Actions(Vec::new()));
        if let RegistryEntry::Actions(list) = entry {
            list.push(Arc::new(action));
        }
    }

    /// Keeps the first getter registered for a type. Returns `false` for a duplicate.
    pub(crate) fn insert_getter(&mut self, call_type: String, getter: WrappedGetter) -> bool {
        let table = self.tables.entry(HandlerKind::Getter).or_default();
        if table.contains_key(&call_type) {
            return false;
        }
        table.insert(call_type, RegistryEntry::Getter(Arc::new(getter)));
        true
    }

    /// Handlers registered for a mutation type, in registration order.
    pub(crate) fn mutations(&self, call_type: &str) -> Vec<Arc<WrappedMutation>> {
        match self.table(HandlerKind::Mutation).and_then(|t| t.get(call_type)) {
            Some(RegistryEntry::Mutations(list)) => list.clone(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn actions(&self, call_type: &str) -> Vec<Arc<WrappedAction>> {
        match self.table(HandlerKind::Action).and_then(|t| t.get(call_type)) {
            Some(RegistryEntry::Actions(list)) => list.clone(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn getter(&self, call_type: &str) -> Option<Arc<WrappedGetter>> {
        match self.table(HandlerKind::Getter).and_then(|t| t.get(call_type)) {
            Some(RegistryEntry::Getter(getter)) => Some(getter.clone()),
            _ => None,
        }
    }

    pub(crate) fn contains(&self, kind: HandlerKind, call_type: &str) -> bool {
        self.table(kind)
            .and_then(|t| t.get(call_type))
            .map(|entry| entry.kind() == kind && entry.len() > 0)
            .unwrap_or(false)
    }

    /// Registered types of one kind, sorted.
    pub(crate) fn types(&self, kind: HandlerKind) -> Vec<String> {
        let mut types: Vec<String> = self
            .table(kind)
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default();
        types.sort();
        types
    }

    /// Records the owner of a namespace, returning the previous owner if any.
    pub(crate) fn record_namespace(
        &mut self,
        namespace: &str,
        path: Vec<String>,
    ) -> Option<Vec<String>> {
        self.namespace_map.insert(namespace.to_string(), path)
    }

    pub(crate) fn namespace_owner(&self, namespace: &str) -> Option<&Vec<String>> {
        self.namespace_map.get(namespace)
    }

    pub(crate) fn clear(&mut self) {
        self.tables.clear();
        self.namespace_map.clear();
    }
}
