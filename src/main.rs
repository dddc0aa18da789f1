// src/main.rs
// Demo binary: a counter store with a namespaced cart module

use serde_json::{json, Value};
use statetree::{
    ActionError, ActionSubscriber, CallOptions, ModuleConfig, MutationSubscriber, Store, StoreConfig,
    StoreOptions,
};

fn cart() -> ModuleConfig {
    ModuleConfig::new()
        .namespaced(true)
        .state_fn(|| json!({"items": []}))
        .mutation("add", |state, item| {
            if let Some(items) = state["items"].as_array_mut() {
                items.push(item.clone());
            }
        })
        .getter("count", |state, _, _, _| {
            json!(state["items"].as_array().map(Vec::len).unwrap_or(0))
        })
        .action_async("checkout", |ctx, _payload| async move {
            let count = ctx.getter("count").unwrap_or(Value::Null);
            ctx.commit_with("inc", json!(1), CallOptions::root())?;
            Ok::<_, ActionError>(json!({"checked_out": count}))
        })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = StoreConfig::from_env()?;
    let root = ModuleConfig::new()
        .state(json!({"orders": 0}))
        .mutation("inc", |state, n| {
            let orders = state["orders"].as_i64().unwrap_or(0) + n.as_i64().unwrap_or(1);
            state["orders"] = json!(orders);
        })
        .module("cart", cart());

    let store = Store::new(StoreOptions::new(root).config(config))?;

    let _mutations = store.subscribe(MutationSubscriber::new(|mutation, _| {
        tracing::info!(mutation = %mutation.mutation_type, "committed");
    }));
    let _actions = store.subscribe_action(
        ActionSubscriber::builder()
            .before(|action, _| tracing::info!(action = %action.action_type, "dispatching"))
            .after(|action, state| {
                tracing::info!(action = %action.action_type, state = %state, "dispatched")
            })
            .build(),
    );

    store.commit("cart/add", json!({"sku": "apple"}))?;
    store.commit("cart/add", json!({"sku": "pear"}))?;
    let receipt = store.dispatch("cart/checkout", Value::Null).await?;

    tracing::info!(receipt = %receipt, state = %store.state(), "demo finished");
    store.dispose();
    Ok(())
}
