// src/module/mod.rs
// Module system: raw configuration, module nodes and the module tree

pub mod module_mod;
pub mod module_tree;
pub mod raw_module;

// Re-export main types
pub use module_mod::Module;
pub use module_tree::{ModuleTree, NAMESPACE_SEPARATOR};
pub use raw_module::{ActionDef, GetterFn, ModuleConfig, MutationFn, StateFactory, StateSource};
