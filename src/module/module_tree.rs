// src/module/module_tree.rs
// ModuleTree - path-addressed tree of registered modules

use crate::module::module_mod::Module;
use crate::module::raw_module::ModuleConfig;
use crate::state_mod::StoreError;
use crate::util::display_path;

/// Separator appended after each namespaced key.
pub const NAMESPACE_SEPARATOR: char = '/';

/// Owns the root module and resolves descendants by key path.
#[derive(Debug)]
pub struct ModuleTree {
    root: Module,
}

impl ModuleTree {
    /// Registers `raw` and all of its nested modules as static (non-runtime) modules.
    pub fn new(raw: ModuleConfig) -> Result<Self, StoreError> {
        let mut tree = Self {
            root: Module::new(ModuleConfig::default(), false),
        };
        tree.register(&[], raw, false)?;
        Ok(tree)
    }

    pub fn root(&self) -> &Module {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Module {
        &mut self.root
    }

    /// Walks `children` one key at a time from the root.
    pub fn get(&self, path: &[String]) -> Option<&Module> {
        path.iter()
            .try_fold(&self.root, |module, key| module.get_child(key))
    }

    pub fn get_mut(&mut self, path: &[String]) -> Option<&mut Module> {
        path.iter()
            .try_fold(&mut self.root, |module, key| module.get_child_mut(key))
    }

    /// Concatenates `key/` for every namespaced module along `path`, root excluded.
    pub fn namespace(&self, path: &[String]) -> String {
        let mut module = &self.root;
        let mut namespace = String::new();
        for key in path {
            match module.get_child(key) {
                Some(child) => module = child,
                None => break,
            }
            if module.namespaced() {
                namespace.push_str(key);
                namespace.push(NAMESPACE_SEPARATOR);
            }
        }
        namespace
    }

    /// Registers `raw` at `path`, then its nested modules depth-first in declaration order.
    pub fn register(
        &mut self,
        path: &[String],
        raw: ModuleConfig,
        runtime: bool,
    ) -> Result<(), StoreError> {
        let nested = raw.modules.clone();
        let module = Module::new(raw, runtime);

        match path.split_last() {
            None => self.root = module,
            Some((key, parent_path)) => {
                let parent = self
                    .get_mut(parent_path)
                    .ok_or_else(|| StoreError::ModuleNotFound {
                        path: display_path(parent_path),
                    })?;
                parent.add_child(key, module);
            }
        }

        for (key, child) in nested {
            let mut child_path = path.to_vec();
            child_path.push(key);
            self.register(&child_path, child, runtime)?;
        }
        Ok(())
    }

    /// Detaches a runtime module from its parent.
    ///
    /// Returns `false` (after a warning) when the target is missing or was
    /// registered statically. State and registries are not touched here.
    pub fn unregister(&mut self, path: &[String]) -> bool {
        let Some((key, parent_path)) = path.split_last() else {
            tracing::warn!("refusing to unregister the root module");
            return false;
        };
        let Some(parent) = self.get_mut(parent_path) else {
            return false;
        };
        match parent.get_child(key).map(Module::is_runtime) {
            Some(true) => {
                parent.remove_child(key);
                true
            }
            Some(false) => {
                tracing::warn!(
                    "trying to unregister module '{}', which is not registered at runtime",
                    display_path(path)
                );
                false
            }
            None => false,
        }
    }

    pub fn is_registered(&self, path: &[String]) -> bool {
        match path.split_last() {
            None => true,
            Some((key, parent_path)) => self
                .get(parent_path)
                .map(|parent| parent.has_child(key))
                .unwrap_or(false),
        }
    }

    /// Applies new handler tables from `raw` across the existing tree.
    pub fn update(&mut self, raw: &ModuleConfig) {
        update_module(&mut Vec::new(), &mut self.root, raw);
    }
}

fn update_module(path: &mut Vec<String>, target: &mut Module, raw: &ModuleConfig) {
    target.update(raw);

    for (key, child_raw) in &raw.modules {
        path.push(key.clone());
        match target.get_child_mut(key) {
            Some(child) => update_module(path, child, child_raw),
            None => tracing::warn!(
                "trying to add a new module '{}' on hot reloading, manual reload is needed",
                display_path(path)
            ),
        }
        path.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::to_path;
    use serde_json::json;

    fn sample() -> ModuleTree {
        ModuleTree::new(
            ModuleConfig::new().state(json!({"root": true})).module(
                "a",
                ModuleConfig::new().namespaced(true).module(
                    "b",
                    ModuleConfig::new().module("c", ModuleConfig::new().namespaced(true)),
                ),
            ),
        )
        .unwrap()
    }

    #[test]
    fn namespace_skips_plain_modules() {
        let tree = sample();
        assert_eq!(tree.namespace(&[]), "");
        assert_eq!(tree.namespace(&to_path(&["a"])), "a/");
        assert_eq!(tree.namespace(&to_path(&["a", "b"])), "a/");
        assert_eq!(tree.namespace(&to_path(&["a", "b", "c"])), "a/c/");
    }

    #[test]
    fn static_modules_cannot_be_unregistered() {
        let mut tree = sample();
        assert!(!tree.unregister(&to_path(&["a"])));
        assert!(tree.is_registered(&to_path(&["a"])));
    }

    #[test]
    fn runtime_modules_register_under_existing_parents() {
        let mut tree = sample();
        tree.register(&to_path(&["a", "d"]), ModuleConfig::new(), true)
            .unwrap();
        assert!(tree.get(&to_path(&["a", "d"])).unwrap().is_runtime());
        assert!(tree.unregister(&to_path(&["a", "d"])));
        assert!(!tree.is_registered(&to_path(&["a", "d"])));

        let err = tree
            .register(&to_path(&["x", "y"]), ModuleConfig::new(), true)
            .unwrap_err();
        assert!(matches!(err, StoreError::ModuleNotFound { .. }));
    }

    #[test]
    fn update_recurses_into_known_children() {
        let mut tree = sample();
        tree.update(&ModuleConfig::new().module(
            "a",
            ModuleConfig::new()
                .namespaced(false)
                .module("zzz", ModuleConfig::new()),
        ));
        assert_eq!(tree.namespace(&to_path(&["a", "b", "c"])), "c/");
        assert!(!tree.is_registered(&to_path(&["a", "zzz"])));
    }
}
