// src/state_mod.rs
// Store runtime - commit/dispatch engine, subscribers and the reactive root state

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::thread::{self, ThreadId};

use crate::action_dispatcher::{ActionDispatcher, ActionError, ActionRecord, ActionSubscriber};
use crate::config_mod::StoreConfig;
use crate::installer::{Installer, StateAttachment, WrappedMutation};
use crate::local_context::{GetterIndex, Getters, LocalContext};
use crate::module::{ModuleConfig, ModuleTree};
use crate::reactive_mod::{read_with, MemoReactivity, ReactiveTree, Reactivity};
use crate::registry_mod::{HandlerKind, Registry};
use crate::util::{
    display_path, lock, nested_state, normalize_call, notify_guarded, read_lock, to_path,
    write_lock, CallOptions,
};

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Expects string as the type, but found {found}")]
    InvalidType { found: String },

    #[error("Invalid module path: {message}")]
    InvalidPath { message: String },

    #[error("Module not found at '{path}'")]
    ModuleNotFound { path: String },

    #[error("Action failed: {0}")]
    Action(#[from] ActionError),

    #[error("Do not mutate store state outside mutation handlers")]
    StrictViolation,

    #[error("Store has been disposed")]
    Disposed,

    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Store lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreStatus {
    Uninitialized,
    Ready,
    Disposed,
}

/// A committed mutation as seen by subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRecord {
    pub mutation_type: String,
    pub payload: Value,
}

type MutationHook = dyn Fn(&MutationRecord, &Value) + Send + Sync;

/// Mutation subscriber, called with the record and the state after the commit.
///
/// Clones share identity, so subscribing a clone twice registers it once.
#[derive(Clone)]
pub struct MutationSubscriber {
    hook: Arc<MutationHook>,
}

impl fmt::Debug for MutationSubscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationSubscriber").finish_non_exhaustive()
    }
}

impl MutationSubscriber {
    pub fn new<F>(hook: F) -> Self
    where
        F: Fn(&MutationRecord, &Value) + Send + Sync + 'static,
    {
        Self {
            hook: Arc::new(hook),
        }
    }

    pub fn same_as(&self, other: &MutationSubscriber) -> bool {
        Arc::ptr_eq(&self.hook, &other.hook)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Notify this subscriber before the ones already registered.
    pub prepend: bool,
}

impl SubscribeOptions {
    pub fn prepend() -> Self {
        Self { prepend: true }
    }
}

#[derive(Debug)]
enum SubscriptionTarget {
    Mutation(MutationSubscriber),
    Action(ActionSubscriber),
}

/// Handle returned by `subscribe*` and `watch`.
#[derive(Debug)]
pub struct Subscription {
    store: Weak<StoreInner>,
    target: SubscriptionTarget,
}

impl Subscription {
    /// Removes the subscriber if it is still registered. Safe to call repeatedly.
    pub fn unsubscribe(&self) -> bool {
        let Some(inner) = self.store.upgrade() else {
            return false;
        };
        match &self.target {
            SubscriptionTarget::Mutation(subscriber) => {
                let mut subscribers = lock(&inner.subscribers);
                match subscribers.iter().position(|s| s.same_as(subscriber)) {
                    Some(index) => {
                        subscribers.remove(index);
                        true
                    }
                    None => false,
                }
            }
            SubscriptionTarget::Action(subscriber) => inner.dispatcher.unsubscribe(subscriber),
        }
    }
}

/// Called once with the fully constructed store.
pub type Plugin = Arc<dyn Fn(&Store) + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisterOptions {
    /// Keep whatever state already lives at the module's path instead of attaching the module's own.
    pub preserve_state: bool,
}

/// Everything needed to build a store
#[derive(Clone, Default)]
pub struct StoreOptions {
    pub root: ModuleConfig,
    pub plugins: Vec<Plugin>,
    /// Overrides `config.strict` when set.
    pub strict: Option<bool>,
    /// Defaults to `MemoReactivity`.
    pub reactivity: Option<Arc<dyn Reactivity>>,
    pub config: StoreConfig,
}

impl fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("root", &self.root)
            .field("plugins", &self.plugins.len())
            .field("strict", &self.strict)
            .field("custom_reactivity", &self.reactivity.is_some())
            .field("config", &self.config)
            .finish()
    }
}

impl StoreOptions {
    pub fn new(root: ModuleConfig) -> Self {
        Self {
            root,
            ..Self::default()
        }
    }

    pub fn plugin<F>(mut self, plugin: F) -> Self
    where
        F: Fn(&Store) + Send + Sync + 'static,
    {
        self.plugins.push(Arc::new(plugin));
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = Some(strict);
        self
    }

    pub fn reactivity(mut self, reactivity: Arc<dyn Reactivity>) -> Self {
        self.reactivity = Some(reactivity);
        self
    }

    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }
}

/// Shared store internals. Handler wrappers and local contexts hold a `Weak`
/// to this so they never keep a dropped store alive.
pub(crate) struct StoreInner {
    this: Weak<StoreInner>,
    config: StoreConfig,
    reactivity: Arc<dyn Reactivity>,
    status: RwLock<StoreStatus>,
    committing: AtomicBool,
    // Lock order: modules, then registry. No lock is held across an await.
    modules: RwLock<ModuleTree>,
    registry: RwLock<Registry>,
    view: RwLock<Option<Arc<dyn ReactiveTree>>>,
    getter_indexes: Mutex<HashMap<String, Arc<GetterIndex>>>,
    subscribers: Mutex<Vec<MutationSubscriber>>,
    dispatcher: ActionDispatcher,
    /// Thread currently running mutation handlers under the state write lock.
    mutation_pass: Mutex<Option<ThreadId>>,
    /// Commits issued from inside a mutation handler, applied after the running pass.
    nested_commits: Mutex<VecDeque<NestedCommit>>,
}

struct NestedCommit {
    record: MutationRecord,
    handlers: Vec<Arc<WrappedMutation>>,
}

/// Marks the current thread as running mutation handlers until dropped.
struct MutationPass<'a> {
    inner: &'a StoreInner,
}

impl Drop for MutationPass<'_> {
    fn drop(&mut self) {
        *lock(&self.inner.mutation_pass) = None;
        lock(&self.inner.nested_commits).clear();
    }
}

/// Restores the committing flag to its previous value, also on unwind.
struct CommitGuard<'a> {
    flag: &'a AtomicBool,
    previous: bool,
}

impl Drop for CommitGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(self.previous, Ordering::SeqCst);
    }
}

impl StoreInner {
    /// Runs `f` with the committing flag raised.
    pub(crate) fn with_committing<T>(&self, f: impl FnOnce() -> T) -> T {
        let previous = self.committing.swap(true, Ordering::SeqCst);
        let _guard = CommitGuard {
            flag: &self.committing,
            previous,
        };
        f()
    }

    pub(crate) fn is_committing(&self) -> bool {
        self.committing.load(Ordering::SeqCst)
    }

    fn enter_mutation_pass(&self) -> MutationPass<'_> {
        *lock(&self.mutation_pass) = Some(thread::current().id());
        MutationPass { inner: self }
    }

    /// True when called from a mutation handler of a running commit.
    fn in_mutation_pass(&self) -> bool {
        *lock(&self.mutation_pass) == Some(thread::current().id())
    }

    fn next_nested_commit(&self) -> Option<NestedCommit> {
        lock(&self.nested_commits).pop_front()
    }

    fn status(&self) -> StoreStatus {
        *read_lock(&self.status)
    }

    fn ensure_live(&self) -> Result<(), StoreError> {
        match self.status() {
            StoreStatus::Disposed => Err(StoreError::Disposed),
            _ => Ok(()),
        }
    }

    /// The current reactive wrapper, `None` once disposed.
    pub(crate) fn tree(&self) -> Option<Arc<dyn ReactiveTree>> {
        read_lock(&self.view).clone()
    }

    /// Installs a fresh wrapper around `state` (or around the state moved out of
    /// the current wrapper) and retires the old one.
    ///
    /// The swap happens under the view write lock, so readers see either the
    /// old or the new wrapper, never a half-built one.
    pub(crate) fn rebuild_reactive_view(&self, state: Option<Value>, hot: bool) {
        let retired = {
            let mut view = write_lock(&self.view);
            let old = view.take();
            let state = match state {
                Some(state) => state,
                None => old
                    .as_ref()
                    .map(|tree| tree.take_state())
                    .unwrap_or_else(|| json!({})),
            };
            lock(&self.getter_indexes).clear();
            *view = Some(self.reactivity.wrap(state, self.config.strict));
            old
        };

        tracing::debug!(hot, "rebuilt reactive view");
        if let Some(old) = retired {
            self.retire(old);
        }
    }

    /// Tears an old wrapper down, on the next tokio tick when possible.
    fn retire(&self, old: Arc<dyn ReactiveTree>) {
        if self.config.deferred_teardown {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    tokio::task::yield_now().await;
                    old.teardown();
                });
                return;
            }
        }
        old.teardown();
    }

    /// Rebuilds every registry from the module tree and then the reactive view.
    /// Module state already lives in the root tree and is left in place.
    pub(crate) fn reset_store(&self, hot: bool) {
        {
            let mut modules = write_lock(&self.modules);
            let mut registry = write_lock(&self.registry);
            registry.clear();
            let mut installer = Installer::new(self.this.clone(), &mut registry, true);
            installer.install(&mut Vec::new(), "", modules.root_mut());
        }
        self.rebuild_reactive_view(None, hot);
    }

    /// Attaches installed module states to the live tree as a sanctioned write.
    fn attach_states(&self, attachments: Vec<StateAttachment>) -> Result<(), StoreError> {
        if attachments.is_empty() {
            return Ok(());
        }
        let tree = self.tree().ok_or(StoreError::Disposed)?;
        self.with_committing(|| {
            // Paths whose module state was refused; their descendants are skipped too.
            let mut refused: Vec<Vec<String>> = Vec::new();
            for StateAttachment { parent, key, state } in attachments {
                if refused.iter().any(|path| parent.starts_with(path)) {
                    tracing::warn!(
                        "module state '{}' under '{}' skipped, an ancestor module state was not attached",
                        key,
                        display_path(&parent)
                    );
                    continue;
                }
                let attached = tree.set_property(self.is_committing(), &parent, &key, state)?;
                if !attached {
                    tracing::warn!(
                        "state field '{}' already exists under '{}', module state was not attached",
                        key,
                        display_path(&parent)
                    );
                    let mut path = parent;
                    path.push(key);
                    refused.push(path);
                }
            }
            Ok(())
        })
    }

    /// Cached local-name index for `namespace`.
    pub(crate) fn getter_index(&self, namespace: &str) -> Arc<GetterIndex> {
        if let Some(index) = lock(&self.getter_indexes).get(namespace) {
            return index.clone();
        }
        let keys = read_lock(&self.registry).types(HandlerKind::Getter);
        let index = Arc::new(GetterIndex::build(namespace, keys));
        lock(&self.getter_indexes)
            .entry(namespace.to_string())
            .or_insert(index)
            .clone()
    }

    /// Memoized value of the getter `full_key`, evaluating it on a miss.
    ///
    /// `root` is the tree already borrowed by the caller; nested getter
    /// lookups reuse it instead of taking the state lock again.
    pub(crate) fn evaluate_getter(
        &self,
        tree: &dyn ReactiveTree,
        full_key: &str,
        root: &Value,
    ) -> Option<Value> {
        if let Some(value) = tree.memo(full_key) {
            return Some(value);
        }
        let getter = read_lock(&self.registry).getter(full_key)?;
        let value = getter.evaluate(self, tree, root);
        tree.memoize(full_key, value.clone());
        Some(value)
    }

    pub(crate) fn getters_view<'a>(
        &'a self,
        tree: &'a dyn ReactiveTree,
        root: &'a Value,
        namespace: &str,
    ) -> Getters<'a> {
        Getters::new(self, tree, root, self.getter_index(namespace))
    }

    /// Evaluates `namespace + name` if it is a registered getter.
    pub(crate) fn local_getter(&self, namespace: &str, name: &str) -> Option<Value> {
        let full_key = self.getter_index(namespace).full_key(name)?.to_string();
        let tree = self.tree()?;
        read_with(tree.as_ref(), |root| {
            self.evaluate_getter(tree.as_ref(), &full_key, root)
        })
        .flatten()
    }

    fn notify_subscribers(&self, record: &MutationRecord, tree: &dyn ReactiveTree) {
        let subscribers = lock(&self.subscribers).clone();
        if subscribers.is_empty() {
            return;
        }
        let state = read_with(tree, Value::clone).unwrap_or(Value::Null);
        for subscriber in &subscribers {
            notify_guarded("mutation", || (subscriber.hook)(record, &state));
        }
    }
}

/// Store - the single source of truth
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("status", &self.inner.status())
            .field("config", &self.inner.config)
            .field("registry", &*read_lock(&self.inner.registry))
            .finish()
    }
}

/// Build a store from a root module with default options.
pub fn create_store(root: ModuleConfig) -> Result<Store, StoreError> {
    Store::new(StoreOptions::new(root))
}

impl Store {
    /// Builds the module tree, installs every module, wraps the root state and
    /// runs the plugins.
    pub fn new(options: StoreOptions) -> Result<Self, StoreError> {
        let StoreOptions {
            root,
            plugins,
            strict,
            reactivity,
            mut config,
        } = options;
        if let Some(strict) = strict {
            config.strict = strict;
        }
        let reactivity = reactivity.unwrap_or_else(|| Arc::new(MemoReactivity));
        let modules = ModuleTree::new(root)?;

        let inner = Arc::new_cyclic(|this| StoreInner {
            this: this.clone(),
            config,
            reactivity,
            status: RwLock::new(StoreStatus::Uninitialized),
            committing: AtomicBool::new(false),
            modules: RwLock::new(modules),
            registry: RwLock::new(Registry::default()),
            view: RwLock::new(None),
            getter_indexes: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
            dispatcher: ActionDispatcher::new(),
            mutation_pass: Mutex::new(None),
            nested_commits: Mutex::new(VecDeque::new()),
        });

        let (root_state, attachments) = {
            let mut modules = write_lock(&inner.modules);
            let mut registry = write_lock(&inner.registry);
            let mut installer = Installer::new(Arc::downgrade(&inner), &mut registry, false);
            installer.install(&mut Vec::new(), "", modules.root_mut());
            let attachments = installer.into_attachments();
            let root_state = modules.root_mut().take_state().unwrap_or_else(|| json!({}));
            (root_state, attachments)
        };

        inner.rebuild_reactive_view(Some(root_state), false);
        inner.attach_states(attachments)?;
        *write_lock(&inner.status) = StoreStatus::Ready;

        let store = Store { inner };
        tracing::info!(
            strict = store.inner.config.strict,
            mutations = store.mutation_types().len(),
            actions = store.action_types().len(),
            getters = store.getter_types().len(),
            "store ready"
        );

        for plugin in &plugins {
            plugin(&store);
        }
        Ok(store)
    }

    pub(crate) fn from_inner(inner: Arc<StoreInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &StoreInner {
        &self.inner
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn status(&self) -> StoreStatus {
        self.inner.status()
    }

    /// Snapshot of the whole root state, `Null` once disposed.
    pub fn state(&self) -> Value {
        self.with_state(Value::clone).unwrap_or(Value::Null)
    }

    /// Runs `f` against the live root state without cloning it.
    pub fn with_state<T>(&self, f: impl FnOnce(&Value) -> T) -> Option<T> {
        let tree = self.inner.tree()?;
        read_with(tree.as_ref(), f)
    }

    /// Snapshot of the state of the module registered at `path`.
    pub fn module_state<S: AsRef<str>>(&self, path: &[S]) -> Option<Value> {
        let path = to_path(path);
        self.with_state(|root| nested_state(root, &path).cloned())
            .flatten()
    }

    /// Writes to the state outside of any mutation. Rejected in strict mode.
    pub fn mutate_state<F>(&self, mut writer: F) -> Result<(), StoreError>
    where
        F: FnMut(&mut Value),
    {
        self.inner.ensure_live()?;
        let tree = self.inner.tree().ok_or(StoreError::Disposed)?;
        tree.mutate(self.inner.is_committing(), &mut writer)
    }

    pub fn commit(&self, call_type: impl Into<Value>, payload: Value) -> Result<(), StoreError> {
        self.commit_with(call_type, payload, CallOptions::default())
    }

    /// Runs every handler registered for the type, then notifies subscribers.
    ///
    /// An unknown type is logged and ignored. A commit issued from inside a
    /// mutation handler is queued and applied within the same write, right
    /// after the running handlers; its subscribers are notified after the
    /// outer commit's.
    pub fn commit_with(
        &self,
        call_type: impl Into<Value>,
        payload: Value,
        options: CallOptions,
    ) -> Result<(), StoreError> {
        let call = normalize_call(call_type.into(), payload, options)?;
        self.inner.ensure_live()?;

        let handlers = read_lock(&self.inner.registry).mutations(&call.call_type);
        if handlers.is_empty() {
            tracing::warn!("unknown mutation type: {}", call.call_type);
            return Ok(());
        }
        let record = MutationRecord {
            mutation_type: call.call_type,
            payload: call.payload,
        };
        if self.inner.in_mutation_pass() {
            tracing::debug!(mutation = %record.mutation_type, "queued nested commit");
            lock(&self.inner.nested_commits).push_back(NestedCommit { record, handlers });
            return Ok(());
        }
        let tree = self.inner.tree().ok_or(StoreError::Disposed)?;

        let mut nested = Vec::new();
        self.inner.with_committing(|| {
            tree.mutate(self.inner.is_committing(), &mut |root| {
                let _pass = self.inner.enter_mutation_pass();
                for handler in &handlers {
                    handler.invoke(root, &record.payload);
                }
                while let Some(queued) = self.inner.next_nested_commit() {
                    for handler in &queued.handlers {
                        handler.invoke(root, &queued.record.payload);
                    }
                    nested.push(queued.record);
                }
            })
        })?;
        tracing::debug!(
            mutation = %record.mutation_type,
            handlers = handlers.len(),
            nested = nested.len(),
            "committed mutation"
        );

        self.inner.notify_subscribers(&record, tree.as_ref());
        for record in &nested {
            self.inner.notify_subscribers(record, tree.as_ref());
        }
        Ok(())
    }

    pub async fn dispatch(
        &self,
        call_type: impl Into<Value>,
        payload: Value,
    ) -> Result<Value, StoreError> {
        self.dispatch_with(call_type, payload, CallOptions::default())
            .await
    }

    /// Runs the action handlers for the type between the action subscriber hooks.
    ///
    /// An unknown type resolves to `Null`. Several handlers resolve to an array
    /// of their results in registration order.
    pub async fn dispatch_with(
        &self,
        call_type: impl Into<Value>,
        payload: Value,
        options: CallOptions,
    ) -> Result<Value, StoreError> {
        let call = normalize_call(call_type.into(), payload, options)?;
        self.inner.ensure_live()?;

        let handlers = read_lock(&self.inner.registry).actions(&call.call_type);
        if handlers.is_empty() {
            tracing::warn!("unknown action type: {}", call.call_type);
            return Ok(Value::Null);
        }
        let record = ActionRecord::new(&call.call_type, call.payload);
        self.inner
            .dispatcher
            .execute_action(self, record, handlers)
            .await
    }

    pub fn subscribe(&self, subscriber: MutationSubscriber) -> Subscription {
        self.subscribe_with(subscriber, SubscribeOptions::default())
    }

    pub fn subscribe_with(
        &self,
        subscriber: MutationSubscriber,
        options: SubscribeOptions,
    ) -> Subscription {
        {
            let mut subscribers = lock(&self.inner.subscribers);
            if !subscribers.iter().any(|s| s.same_as(&subscriber)) {
                if options.prepend {
                    subscribers.insert(0, subscriber.clone());
                } else {
                    subscribers.push(subscriber.clone());
                }
            }
        }
        Subscription {
            store: Arc::downgrade(&self.inner),
            target: SubscriptionTarget::Mutation(subscriber),
        }
    }

    pub fn subscribe_action(&self, subscriber: ActionSubscriber) -> Subscription {
        self.subscribe_action_with(subscriber, SubscribeOptions::default())
    }

    pub fn subscribe_action_with(
        &self,
        subscriber: ActionSubscriber,
        options: SubscribeOptions,
    ) -> Subscription {
        self.inner
            .dispatcher
            .subscribe(subscriber.clone(), options.prepend);
        Subscription {
            store: Arc::downgrade(&self.inner),
            target: SubscriptionTarget::Action(subscriber),
        }
    }

    /// Calls `callback(new, old)` after a commit changes the value `selector`
    /// derives from the root state.
    pub fn watch<S, C>(&self, selector: S, callback: C) -> Subscription
    where
        S: Fn(&Value) -> Value + Send + Sync + 'static,
        C: Fn(&Value, &Value) + Send + Sync + 'static,
    {
        let initial = self.with_state(&selector).unwrap_or(Value::Null);
        let last = Mutex::new(initial);
        self.subscribe(MutationSubscriber::new(move |_, state| {
            let next = selector(state);
            let previous = {
                let mut last = lock(&last);
                if *last == next {
                    return;
                }
                std::mem::replace(&mut *last, next.clone())
            };
            callback(&next, &previous);
        }))
    }

    /// Evaluates a root getter by its fully-namespaced key.
    pub fn getter(&self, name: &str) -> Option<Value> {
        let tree = self.inner.tree()?;
        read_with(tree.as_ref(), |root| {
            self.inner.evaluate_getter(tree.as_ref(), name, root)
        })
        .flatten()
    }

    pub fn getter_types(&self) -> Vec<String> {
        read_lock(&self.inner.registry).types(HandlerKind::Getter)
    }

    pub fn mutation_types(&self) -> Vec<String> {
        read_lock(&self.inner.registry).types(HandlerKind::Mutation)
    }

    pub fn action_types(&self) -> Vec<String> {
        read_lock(&self.inner.registry).types(HandlerKind::Action)
    }

    pub fn has_mutation(&self, call_type: &str) -> bool {
        read_lock(&self.inner.registry).contains(HandlerKind::Mutation, call_type)
    }

    pub fn has_action(&self, call_type: &str) -> bool {
        read_lock(&self.inner.registry).contains(HandlerKind::Action, call_type)
    }

    /// Path of the namespaced module that owns `namespace` (e.g. `"cart/"`).
    pub fn namespace_module(&self, namespace: &str) -> Option<Vec<String>> {
        read_lock(&self.inner.registry)
            .namespace_owner(namespace)
            .cloned()
    }

    /// Registers a module after construction and installs it.
    pub fn register_module<S: AsRef<str>>(
        &self,
        path: &[S],
        config: ModuleConfig,
        options: RegisterOptions,
    ) -> Result<(), StoreError> {
        let path = to_path(path);
        if path.is_empty() {
            return Err(StoreError::InvalidPath {
                message: "cannot register the root module by using register_module".to_string(),
            });
        }
        self.inner.ensure_live()?;

        let attachments = {
            let mut modules = write_lock(&self.inner.modules);
            modules.register(&path, config, true)?;
            let parent_namespace = modules.namespace(&path[..path.len() - 1]);
            let module = modules
                .get_mut(&path)
                .ok_or_else(|| StoreError::ModuleNotFound {
                    path: display_path(&path),
                })?;
            let mut registry = write_lock(&self.inner.registry);
            let mut installer =
                Installer::new(self.inner.this.clone(), &mut registry, options.preserve_state);
            installer.install(&mut path.clone(), &parent_namespace, module);
            installer.into_attachments()
        };

        self.inner.attach_states(attachments)?;
        self.inner.rebuild_reactive_view(None, false);
        tracing::info!(
            path = %display_path(&path),
            preserve_state = options.preserve_state,
            "registered module"
        );
        Ok(())
    }

    /// Removes a runtime-registered module, its state and its handlers.
    ///
    /// Statically declared modules are left alone and yield `Ok(false)`.
    pub fn unregister_module<S: AsRef<str>>(&self, path: &[S]) -> Result<bool, StoreError> {
        let path = to_path(path);
        let Some((key, parent)) = path.split_last() else {
            return Err(StoreError::InvalidPath {
                message: "cannot unregister the root module".to_string(),
            });
        };
        self.inner.ensure_live()?;

        let removed = {
            let mut modules = write_lock(&self.inner.modules);
            if !modules.is_registered(&path) {
                tracing::warn!("module '{}' is not registered", display_path(&path));
                return Ok(false);
            }
            modules.unregister(&path)
        };
        if !removed {
            return Ok(false);
        }

        let tree = self.inner.tree().ok_or(StoreError::Disposed)?;
        self.inner
            .with_committing(|| tree.delete_property(self.inner.is_committing(), parent, key))?;
        self.inner.reset_store(false);
        tracing::info!(path = %display_path(&path), "unregistered module");
        Ok(true)
    }

    /// The namespace-rebased context of the module registered at `path`.
    pub fn module_context<S: AsRef<str>>(&self, path: &[S]) -> Option<LocalContext> {
        read_lock(&self.inner.modules)
            .get(&to_path(path))
            .and_then(|module| module.context().cloned())
    }

    pub fn has_module<S: AsRef<str>>(&self, path: &[S]) -> bool {
        read_lock(&self.inner.modules).is_registered(&to_path(path))
    }

    /// Swaps in new handler tables across the existing tree, keeping state.
    pub fn hot_update(&self, config: ModuleConfig) -> Result<(), StoreError> {
        self.inner.ensure_live()?;
        write_lock(&self.inner.modules).update(&config);
        self.inner.reset_store(true);
        tracing::info!("hot update applied");
        Ok(())
    }

    /// Replaces the whole root state. Does not notify mutation subscribers.
    pub fn replace_state(&self, state: Value) -> Result<(), StoreError> {
        self.inner.ensure_live()?;
        let tree = self.inner.tree().ok_or(StoreError::Disposed)?;
        let mut next = Some(state);
        self.inner.with_committing(|| {
            tree.mutate(self.inner.is_committing(), &mut |root| {
                if let Some(state) = next.take() {
                    *root = state;
                }
            })
        })
    }

    /// Retires the reactive wrapper. Later commits and dispatches fail with `Disposed`.
    pub fn dispose(&self) {
        {
            let mut status = write_lock(&self.inner.status);
            if *status == StoreStatus::Disposed {
                return;
            }
            *status = StoreStatus::Disposed;
        }
        let retired = write_lock(&self.inner.view).take();
        if let Some(old) = retired {
            self.inner.retire(old);
        }
        tracing::info!("store disposed");
    }
}
