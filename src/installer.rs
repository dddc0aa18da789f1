// src/installer.rs
// Registry installer - walks the module tree, wiring state and handler tables

use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::{Arc, Weak};

use crate::action_dispatcher::{ActionContext, ActionError, ActionHandler};
use crate::local_context::LocalContext;
use crate::module::{GetterFn, Module, MutationFn, NAMESPACE_SEPARATOR};
use crate::reactive_mod::ReactiveTree;
use crate::registry_mod::Registry;
use crate::state_mod::{Store, StoreInner};
use crate::util::{display_path, nested_state, nested_state_mut};

static MISSING_STATE: Value = Value::Null;

/// Mutation handler bound to the module it was declared on.
pub(crate) struct WrappedMutation {
    module_path: Vec<String>,
    handler: MutationFn,
}

impl WrappedMutation {
    pub(crate) fn new(module_path: Vec<String>, handler: MutationFn) -> Self {
        Self {
            module_path,
            handler,
        }
    }

    /// Resolves the module's local state inside `root` at call time and runs the handler on it.
    pub(crate) fn invoke(&self, root: &mut Value, payload: &Value) {
        match nested_state_mut(root, &self.module_path) {
            Some(local) => (self.handler)(local, payload),
            None => tracing::warn!(
                "mutation skipped: no state at module path '{}'",
                display_path(&self.module_path)
            ),
        }
    }
}

/// Action handler bound to its module's local context.
pub(crate) struct WrappedAction {
    context: LocalContext,
    handler: Arc<dyn ActionHandler>,
}

impl WrappedAction {
    pub(crate) fn new(context: LocalContext, handler: Arc<dyn ActionHandler>) -> Self {
        Self { context, handler }
    }

    pub(crate) fn invoke(
        &self,
        store: &Store,
        payload: Value,
    ) -> BoxFuture<'static, Result<Value, ActionError>> {
        let context = ActionContext::new(store.clone(), self.context.clone());
        let handler = self.handler.clone();
        Box::pin(async move { handler.execute(context, payload).await })
    }
}

/// Getter bound to its module's namespace and state path.
pub(crate) struct WrappedGetter {
    namespace: String,
    module_path: Vec<String>,
    getter: GetterFn,
}

impl WrappedGetter {
    pub(crate) fn evaluate(&self, inner: &StoreInner, tree: &dyn ReactiveTree, root: &Value) -> Value {
        let local_state = nested_state(root, &self.module_path).unwrap_or(&MISSING_STATE);
        let local_getters = inner.getters_view(tree, root, &self.namespace);
        let root_getters = inner.getters_view(tree, root, "");
        (self.getter)(local_state, &local_getters, root, &root_getters)
    }
}

/// A module state waiting to be attached under `parent` at `key`.
#[derive(Debug)]
pub(crate) struct StateAttachment {
    pub parent: Vec<String>,
    pub key: String,
    pub state: Value,
}

/// One installer pass over a subtree of modules.
pub(crate) struct Installer<'r> {
    store: Weak<StoreInner>,
    registry: &'r mut Registry,
    /// Reinstalls and preserved-state registrations leave the root tree alone.
    skip_state: bool,
    attachments: Vec<StateAttachment>,
}

impl<'r> Installer<'r> {
    pub(crate) fn new(store: Weak<StoreInner>, registry: &'r mut Registry, skip_state: bool) -> Self {
        Self {
            store,
            registry,
            skip_state,
            attachments: Vec::new(),
        }
    }

    /// Installs `module` (registered at `path`) and its descendants.
    ///
    /// `parent_namespace` is the namespace of the module's parent.
    pub(crate) fn install(&mut self, path: &mut Vec<String>, parent_namespace: &str, module: &mut Module) {
        let namespace = match path.last() {
            Some(key) if module.namespaced() => {
                format!("{}{}{}", parent_namespace, key, NAMESPACE_SEPARATOR)
            }
            _ => parent_namespace.to_string(),
        };

        if module.namespaced() {
            if let Some(previous) = self.registry.record_namespace(&namespace, path.clone()) {
                if previous != *path {
                    tracing::warn!(
                        "duplicate namespace '{}' for the namespaced module '{}'",
                        namespace,
                        display_path(path)
                    );
                }
            }
        }

        if let Some((key, parent)) = path.split_last() {
            if !self.skip_state {
                if let Some(state) = module.take_state() {
                    self.attachments.push(StateAttachment {
                        parent: parent.to_vec(),
                        key: key.clone(),
                        state,
                    });
                }
            }
        }

        let context = LocalContext::new(self.store.clone(), namespace.clone(), path.clone());
        module.context = Some(context.clone());

        for (name, handler) in &module.raw.mutations {
            self.registry.push_mutation(
                format!("{}{}", namespace, name),
                WrappedMutation::new(path.clone(), handler.clone()),
            );
        }

        for (name, def) in &module.raw.actions {
            let call_type = if def.root {
                name.clone()
            } else {
                format!("{}{}", namespace, name)
            };
            self.registry
                .push_action(call_type, WrappedAction::new(context.clone(), def.handler.clone()));
        }

        for (name, getter) in &module.raw.getters {
            let call_type = format!("{}{}", namespace, name);
            let wrapped = WrappedGetter {
                namespace: namespace.clone(),
                module_path: path.clone(),
                getter: getter.clone(),
            };
            if !self.registry.insert_getter(call_type.clone(), wrapped) {
                tracing::warn!("duplicate getter key: {}", call_type);
            }
        }

        tracing::debug!(
            path = %display_path(path),
            namespace = %namespace,
            "installed module"
        );

        for (key, child) in module.children_mut() {
            path.push(key.clone());
            self.install(path, &namespace, child);
            path.pop();
        }
    }

    pub(crate) fn into_attachments(self) -> Vec<StateAttachment> {
        self.attachments
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{ModuleConfig, ModuleTree};
    use crate::registry_mod::HandlerKind;
    use crate::util::to_path;
    use serde_json::json;

    fn install_tree(tree: &mut ModuleTree) -> (Registry, Vec<StateAttachment>) {
        let mut registry = Registry::default();
        let mut installer = Installer::new(Weak::new(), &mut registry, false);
        installer.install(&mut Vec::new(), "", tree.root_mut());
        let attachments = installer.into_attachments();
        (registry, attachments)
    }

    #[test]
    fn registers_under_namespaced_keys() {
        let mut tree = ModuleTree::new(
            ModuleConfig::new().module(
                "a",
                ModuleConfig::new().namespaced(true).module(
                    "b",
                    ModuleConfig::new()
                        .mutation("inc", |_, _| {})
                        .module("c", ModuleConfig::new().namespaced(true).mutation("inc", |_, _| {})),
                ),
            ),
        )
        .unwrap();
        let (registry, attachments) = install_tree(&mut tree);

        assert_eq!(registry.types(HandlerKind::Mutation), vec!["a/c/inc", "a/inc"]);
        assert_eq!(registry.namespace_owner("a/c/"), Some(&to_path(&["a", "b", "c"])));

        let keys: Vec<_> = attachments.iter().map(|a| (a.parent.clone(), a.key.clone())).collect();
        assert_eq!(
            keys,
            vec![
                (Vec::<String>::new(), "a".to_string()),
                (to_path(&["a"]), "b".to_string()),
                (to_path(&["a", "b"]), "c".to_string()),
            ]
        );
        assert!(tree.get(&to_path(&["a", "b"])).unwrap().pending_state().is_none());
        assert_eq!(
            tree.get(&to_path(&["a", "b", "c"])).unwrap().context().unwrap().namespace(),
            "a/c/"
        );
    }

    #[test]
    fn first_getter_wins() {
        let mut tree = ModuleTree::new(
            ModuleConfig::new()
                .getter("total", |_, _, _, _| json!(1))
                .module("plain", ModuleConfig::new().getter("total", |_, _, _, _| json!(2))),
        )
        .unwrap();
        let (registry, _) = install_tree(&mut tree);
        assert_eq!(registry.types(HandlerKind::Getter), vec!["total"]);
    }

    #[test]
    fn mutation_resolves_local_state_at_call_time() {
        let mutation = WrappedMutation::new(
            to_path(&["a"]),
            Arc::new(|state: &mut Value, payload: &Value| state["n"] = payload.clone()),
        );
        let mut root = json!({"a": {"n": 0}});
        mutation.invoke(&mut root, &json!(3));
        assert_eq!(root, json!({"a": {"n": 3}}));

        let mut replaced = json!({"a": {"n": 10, "extra": true}});
        mutation.invoke(&mut replaced, &json!(4));
        assert_eq!(replaced["a"]["n"], json!(4));
    }
}
