// src/action_dispatcher.rs
// Action Dispatcher - runs action handlers between before/after/error subscriber hooks

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use crate::installer::WrappedAction;
use crate::local_context::LocalContext;
use crate::state_mod::{Store, StoreError};
use crate::util::{lock, notify_guarded, CallOptions};

/// Action that has been dispatched through the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action_type: String,
    pub payload: Value,
    pub metadata: ActionMetadata,
}

/// Metadata for action tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionMetadata {
    pub action_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ActionRecord {
    /// Create new action record
    pub fn new(action_type: &str, payload: Value) -> Self {
        Self {
            action_type: action_type.to_string(),
            payload,
            metadata: ActionMetadata {
                action_id: uuid::Uuid::new_v4().to_string(),
                timestamp: chrono::Utc::now(),
            },
        }
    }
}

/// Action errors
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("Execution error: {message}")]
    ExecutionError { message: String },

    #[error("Validation error in field '{field}': {message}")]
    ValidationError { field: String, message: String },

    #[error("Store error: {0}")]
    Store(#[source] Box<StoreError>),

    #[error("System error: {message}")]
    SystemError { message: String },
}

impl ActionError {
    pub fn execution(message: impl Into<String>) -> Self {
        ActionError::ExecutionError {
            message: message.into(),
        }
    }
}

// A failed nested dispatch keeps its original action error instead of nesting it.
impl From<StoreError> for ActionError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Action(inner) => inner,
            other => ActionError::Store(Box::new(other)),
        }
    }
}

/// Action handler trait
#[async_trait::async_trait]
pub trait ActionHandler: Send + Sync {
    /// Execute the action with the declaring module's context
    async fn execute(&self, context: ActionContext, payload: Value) -> Result<Value, ActionError>;
}

/// Adapts a synchronous closure; its return value is an already-resolved result.
pub struct SyncActionFn<F> {
    handler: F,
}

impl<F> SyncActionFn<F>
where
    F: Fn(&ActionContext, Value) -> Result<Value, ActionError> + Send + Sync,
{
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

#[async_trait::async_trait]
impl<F> ActionHandler for SyncActionFn<F>
where
    F: Fn(&ActionContext, Value) -> Result<Value, ActionError> + Send + Sync,
{
    async fn execute(&self, context: ActionContext, payload: Value) -> Result<Value, ActionError> {
        (self.handler)(&context, payload)
    }
}

/// Adapts a closure returning a future.
pub struct AsyncActionFn<F, Fut> {
    handler: F,
    _future: PhantomData<fn() -> Fut>,
}

impl<F, Fut> AsyncActionFn<F, Fut>
where
    F: Fn(ActionContext, Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ActionError>> + Send,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _future: PhantomData,
        }
    }
}

#[async_trait::async_trait]
impl<F, Fut> ActionHandler for AsyncActionFn<F, Fut>
where
    F: Fn(ActionContext, Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ActionError>> + Send,
{
    async fn execute(&self, context: ActionContext, payload: Value) -> Result<Value, ActionError> {
        (self.handler)(context, payload).await
    }
}

/// Action execution context
///
/// `commit`, `dispatch`, `state` and `getter` are rebased to the declaring
/// module; `root_state` and `root_getter` always address the whole store.
#[derive(Clone)]
pub struct ActionContext {
    store: Store,
    local: LocalContext,
}

impl fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionContext")
            .field("namespace", &self.local.namespace())
            .field("path", &self.local.path())
            .finish()
    }
}

impl ActionContext {
    pub(crate) fn new(store: Store, local: LocalContext) -> Self {
        Self { store, local }
    }

    pub fn namespace(&self) -> &str {
        self.local.namespace()
    }

    pub fn store(&self) -> &Store {
        &self.store
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
        self.local
            .commit_on(&self.store, call_type.into(), payload, options)
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
        self.local
            .dispatch_on(&self.store, call_type.into(), payload, options)
            .await
    }

    /// Local module state at the time of the call.
    pub fn state(&self) -> Value {
        self.store
            .module_state(self.local.path())
            .unwrap_or(Value::Null)
    }

    pub fn getter(&self, name: &str) -> Option<Value> {
        self.store
            .inner()
            .local_getter(self.local.namespace(), name)
    }

    pub fn root_state(&self) -> Value {
        self.store.state()
    }

    pub fn root_getter(&self, name: &str) -> Option<Value> {
        self.store.getter(name)
    }
}

type ActionHook = Box<dyn Fn(&ActionRecord, &Value) + Send + Sync>;
type ActionErrorHook = Box<dyn Fn(&ActionRecord, &Value, &ActionError) + Send + Sync>;

#[derive(Default)]
struct ActionHooks {
    before: Option<ActionHook>,
    after: Option<ActionHook>,
    error: Option<ActionErrorHook>,
}

/// Action subscriber with optional `before`/`after`/`error` hooks.
///
/// Clones share identity: subscribing a clone of an already-subscribed
/// subscriber is a no-op.
#[derive(Clone)]
pub struct ActionSubscriber {
    hooks: Arc<ActionHooks>,
}

impl fmt::Debug for ActionSubscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionSubscriber")
            .field("before", &self.hooks.before.is_some())
            .field("after", &self.hooks.after.is_some())
            .field("error", &self.hooks.error.is_some())
            .finish()
    }
}

impl ActionSubscriber {
    /// A plain function subscriber runs before the action handlers.
    pub fn before<F>(hook: F) -> Self
    where
        F: Fn(&ActionRecord, &Value) + Send + Sync + 'static,
    {
        Self::builder().before(hook).build()
    }

    pub fn builder() -> ActionSubscriberBuilder {
        ActionSubscriberBuilder {
            hooks: ActionHooks::default(),
        }
    }

    pub fn same_as(&self, other: &ActionSubscriber) -> bool {
        Arc::ptr_eq(&self.hooks, &other.hooks)
    }
}

pub struct ActionSubscriberBuilder {
    hooks: ActionHooks,
}

impl ActionSubscriberBuilder {
    pub fn before<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ActionRecord, &Value) + Send + Sync + 'static,
    {
        self.hooks.before = Some(Box::new(hook));
        self
    }

    pub fn after<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ActionRecord, &Value) + Send + Sync + 'static,
    {
        self.hooks.after = Some(Box::new(hook));
        self
    }

    pub fn error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ActionRecord, &Value, &ActionError) + Send + Sync + 'static,
    {
        self.hooks.error = Some(Box::new(hook));
        self
    }

    pub fn build(self) -> ActionSubscriber {
        ActionSubscriber {
            hooks: Arc::new(self.hooks),
        }
    }
}

/// Action Dispatcher - owns the action subscriber list and the dispatch protocol
pub struct ActionDispatcher {
    subscribers: Mutex<Vec<ActionSubscriber>>,
}

impl fmt::Debug for ActionDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionDispatcher")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

impl Default for ActionDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionDispatcher {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Adds `subscriber` unless it is already present. Returns whether it was added.
    pub(crate) fn subscribe(&self, subscriber: ActionSubscriber, prepend: bool) -> bool {
        let mut subscribers = lock(&self.subscribers);
        if subscribers.iter().any(|s| s.same_as(&subscriber)) {
            return false;
        }
        if prepend {
            subscribers.insert(0, subscriber);
        } else {
            subscribers.push(subscriber);
        }
        true
    }

    pub(crate) fn unsubscribe(&self, subscriber: &ActionSubscriber) -> bool {
        let mut subscribers = lock(&self.subscribers);
        match subscribers.iter().position(|s| s.same_as(subscriber)) {
            Some(index) => {
                subscribers.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }

    fn snapshot(&self) -> Vec<ActionSubscriber> {
        lock(&self.subscribers).clone()
    }

    /// Execute an action
    ///
    /// Runs `before` hooks, then every handler (concurrently when there are
    /// several, each driven to completion), then `after` hooks on success or
    /// `error` hooks on failure. Hook failures are logged and never change the outcome.
    pub(crate) async fn execute_action(
        &self,
        store: &Store,
        record: ActionRecord,
        handlers: Vec<Arc<WrappedAction>>,
    ) -> Result<Value, StoreError> {
        tracing::debug!(
            action = %record.action_type,
            action_id = %record.metadata.action_id,
            handlers = handlers.len(),
            "dispatching action"
        );

        {
            let subscribers = self.snapshot();
            if subscribers.iter().any(|s| s.hooks.before.is_some()) {
                let state = store.state();
                for subscriber in &subscribers {
                    if let Some(before) = &subscriber.hooks.before {
                        notify_guarded("before action", || before(&record, &state));
                    }
                }
            }
        }

        let result = match handlers.as_slice() {
            [single] => single.invoke(store, record.payload.clone()).await,
            // The first failure in registration order decides the outcome.
            many => join_all(
                many.iter()
                    .map(|handler| handler.invoke(store, record.payload.clone())),
            )
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        };

        let subscribers = self.snapshot();
        match result {
            Ok(value) => {
                if subscribers.iter().any(|s| s.hooks.after.is_some()) {
                    let state = store.state();
                    for subscriber in &subscribers {
                        if let Some(after) = &subscriber.hooks.after {
                            notify_guarded("after action", || after(&record, &state));
                        }
                    }
                }
                tracing::debug!(action = %record.action_type, "action completed");
                Ok(value)
            }
            Err(error) => {
                if subscribers.iter().any(|s| s.hooks.error.is_some()) {
                    let state = store.state();
                    for subscriber in &subscribers {
                        if let Some(on_error) = &subscriber.hooks.error {
                            notify_guarded("action error", || on_error(&record, &state, &error));
                        }
                    }
                }
                tracing::debug!(action = %record.action_type, error = %error, "action failed");
                Err(StoreError::Action(error))
            }
        }
    }
}
