//! Library root for the `statetree` store.
//!
//! A hierarchical state container: modules declare state, mutations, actions
//! and getters; the store installs them under namespaced keys and exposes
//! `commit`, `dispatch` and `subscribe` over a single root state tree.

pub mod action_dispatcher;
pub mod config_mod;
pub mod installer;
pub mod local_context;
pub mod module;
pub mod reactive_mod;
pub mod registry_mod;
pub mod state_mod;
pub mod util;

pub use action_dispatcher::{
    ActionContext, ActionError, ActionHandler, ActionMetadata, ActionRecord, ActionSubscriber,
};
pub use config_mod::StoreConfig;
pub use local_context::{Getters, LocalContext};
pub use module::{ModuleConfig, NAMESPACE_SEPARATOR};
pub use reactive_mod::{MemoReactivity, ReactiveTree, Reactivity};
pub use registry_mod::HandlerKind;
pub use state_mod::{
    create_store, MutationRecord, MutationSubscriber, Plugin, RegisterOptions, Store,
    StoreError, StoreOptions, StoreStatus, SubscribeOptions, Subscription,
};
pub use util::CallOptions;
