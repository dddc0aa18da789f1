use serde_json::{json, Value};
use statetree::{
    create_store, ActionContext, ActionError, ActionHandler, ActionSubscriber, ModuleConfig, Store,
    StoreError, SubscribeOptions,
};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

// Dispatch protocol: hook ordering, failures, fan-out and nested dispatch.

type TestResult = Result<(), Box<dyn std::error::Error>>;
type Log = Arc<Mutex<Vec<String>>>;

fn push(log: &Log, entry: impl Into<String>) {
    log.lock().unwrap().push(entry.into());
}

fn before(log: &Log, label: &'static str) -> ActionSubscriber {
    let log = log.clone();
    ActionSubscriber::before(move |action, _| push(&log, format!("{}:{}", label, action.action_type)))
}

/// Counts up through the root mutation regardless of where it is declared.
struct Increment;

#[async_trait::async_trait]
impl ActionHandler for Increment {
    async fn execute(&self, context: ActionContext, payload: Value) -> Result<Value, ActionError> {
        context.commit_with("inc", payload, statetree::CallOptions::root())?;
        Ok(context.root_state()["count"].clone())
    }
}

fn counter() -> ModuleConfig {
    ModuleConfig::new()
        .state(json!({"count": 0}))
        .mutation("inc", |state, n| {
            let count = state["count"].as_i64().unwrap_or(0) + n.as_i64().unwrap_or(1);
            state["count"] = json!(count);
        })
}

#[tokio::test]
async fn test_before_handler_after_ordering() -> TestResult {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let handler_log = log.clone();
    let store = create_store(counter().action("run", move |_, _| {
        push(&handler_log, "handler");
        Ok(json!("done"))
    }))?;

    store.subscribe_action(before(&log, "before1"));
    store.subscribe_action(before(&log, "before2"));
    let after_log = log.clone();
    store.subscribe_action(
        ActionSubscriber::builder()
            .after(move |action, _| push(&after_log, format!("after:{}", action.action_type)))
            .build(),
    );

    let result = store.dispatch("run", Value::Null).await?;

    assert_eq!(result, json!("done"));
    assert_eq!(
        *log.lock().unwrap(),
        vec!["before1:run", "before2:run", "handler", "after:run"]
    );
    Ok(())
}

#[tokio::test]
async fn test_failed_action_runs_error_hooks_with_original_error() -> TestResult {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let store = create_store(
        counter().action("explode", |_, _| Err(ActionError::execution("boom"))),
    )?;

    let after_log = log.clone();
    let error_log = log.clone();
    store.subscribe_action(
        ActionSubscriber::builder()
            .after(move |_, _| push(&after_log, "after"))
            .error(move |action, _, error| {
                push(&error_log, format!("error:{}:{}", action.action_type, error))
            })
            .build(),
    );

    let err = store.dispatch("explode", Value::Null).await.unwrap_err();

    assert!(matches!(
        err,
        StoreError::Action(ActionError::ExecutionError { ref message }) if message == "boom"
    ));
    assert_eq!(
        *log.lock().unwrap(),
        vec!["error:explode:Execution error: boom"]
    );
    Ok(())
}

#[tokio::test]
async fn test_panicking_hooks_do_not_mask_the_outcome() -> TestResult {
    let store = create_store(counter().action("ok", |_, _| Ok(json!(1))))?;
    store.subscribe_action(
        ActionSubscriber::builder()
            .before(|_, _| panic!("before hook bug"))
            .after(|_, _| panic!("after hook bug"))
            .build(),
    );

    assert_eq!(store.dispatch("ok", Value::Null).await?, json!(1));
    Ok(())
}

#[tokio::test]
async fn test_hooks_receive_record_and_state() -> TestResult {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let store = create_store(counter().action_handler("bump", Increment))?;

    let sink = seen.clone();
    let after_sink = seen.clone();
    store.subscribe_action(
        ActionSubscriber::builder()
            .before(move |action, state| {
                sink.lock()
                    .unwrap()
                    .push((action.payload.clone(), state["count"].clone()))
            })
            .after(move |action, state| {
                after_sink
                    .lock()
                    .unwrap()
                    .push((action.payload.clone(), state["count"].clone()))
            })
            .build(),
    );

    store.dispatch("bump", json!(4)).await?;

    assert_eq!(
        *seen.lock().unwrap(),
        vec![(json!(4), json!(0)), (json!(4), json!(4))]
    );
    Ok(())
}

#[tokio::test]
async fn test_root_scoped_action_registers_without_prefix() -> TestResult {
    let store = create_store(
        counter().module(
            "a",
            ModuleConfig::new()
                .namespaced(true)
                .root_action("inc", Increment),
        ),
    )?;

    assert!(store.has_action("inc"));
    assert!(!store.has_action("a/inc"));
    assert_eq!(store.dispatch("inc", json!(2)).await?, json!(2));
    assert_eq!(store.state()["count"], json!(2));
    Ok(())
}

#[tokio::test]
async fn test_shared_action_key_fans_out_in_registration_order() -> TestResult {
    let store = create_store(
        ModuleConfig::new()
            .action_async("ping", |_, _| async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok::<_, ActionError>(json!("root"))
            })
            .module(
                "child",
                ModuleConfig::new().action("ping", |_, _| Ok(json!("child"))),
            ),
    )?;

    let result = store.dispatch("ping", Value::Null).await?;
    assert_eq!(result, json!(["root", "child"]));
    Ok(())
}

fn failing_fan_out() -> ModuleConfig {
    ModuleConfig::new()
        .action("go", |_, _| Err(ActionError::execution("root failed")))
        .module(
            "child",
            ModuleConfig::new()
                .state(json!({"done": false}))
                .mutation("mark", |state, _| state["done"] = json!(true))
                .action_async("go", |ctx, _| async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    ctx.commit("mark", Value::Null)?;
                    Ok::<_, ActionError>(json!("child"))
                }),
        )
}

#[tokio::test]
async fn test_failing_handler_does_not_cancel_its_siblings() -> TestResult {
    let store = create_store(failing_fan_out())?;

    let err = store.dispatch("go", Value::Null).await.unwrap_err();

    assert!(matches!(
        err,
        StoreError::Action(ActionError::ExecutionError { ref message }) if message == "root failed"
    ));
    // The sibling finished before the dispatch settled.
    assert_eq!(store.state()["child"]["done"], json!(true));
    Ok(())
}

#[tokio::test]
async fn test_fan_out_failure_reports_first_error_in_registration_order() -> TestResult {
    let store = create_store(
        ModuleConfig::new()
            .action_async("go", |_, _| async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Err::<Value, _>(ActionError::execution("slow first"))
            })
            .module(
                "child",
                ModuleConfig::new().action("go", |_, _| Err(ActionError::execution("fast second"))),
            ),
    )?;

    let err = store.dispatch("go", Value::Null).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::Action(ActionError::ExecutionError { ref message }) if message == "slow first"
    ));
    Ok(())
}

#[tokio::test]
async fn test_fan_out_failure_runs_error_hooks_after_every_handler() -> TestResult {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let store = create_store(failing_fan_out())?;

    let after_log = log.clone();
    let error_log = log.clone();
    store.subscribe_action(
        ActionSubscriber::builder()
            .after(move |_, _| push(&after_log, "after"))
            .error(move |action, state, error| {
                push(
                    &error_log,
                    format!("error:{}:{}:{}", action.action_type, error, state["child"]["done"]),
                )
            })
            .build(),
    );

    assert!(store.dispatch("go", Value::Null).await.is_err());
    assert_eq!(
        *log.lock().unwrap(),
        vec!["error:go:Execution error: root failed:true"]
    );
    Ok(())
}

#[tokio::test]
async fn test_action_commit_that_nests_a_commit_completes() -> TestResult {
    let handle: Arc<OnceLock<Store>> = Arc::new(OnceLock::new());
    let nested = handle.clone();
    let store = create_store(
        counter()
            .mutation("audit", move |state, _| {
                state["audited"] = json!(true);
                if let Some(store) = nested.get() {
                    let _ = store.commit("inc", json!(10));
                }
            })
            .action("checkout", |ctx, _| {
                ctx.commit("audit", Value::Null)?;
                Ok(ctx.state()["count"].clone())
            }),
    )?;
    let _ = handle.set(store.clone());

    let result = store.dispatch("checkout", Value::Null).await?;

    assert_eq!(result, json!(10));
    assert_eq!(store.state()["audited"], json!(true));
    Ok(())
}

#[tokio::test]
async fn test_nested_dispatch_failure_surfaces_the_inner_error() -> TestResult {
    let store = create_store(
        counter()
            .action("inner", |_, _| {
                Err(ActionError::ValidationError {
                    field: "amount".to_string(),
                    message: "must be positive".to_string(),
                })
            })
            .action_async("outer", |ctx, payload| async move {
                ctx.commit("inc", json!(1))?;
                ctx.dispatch("inner", payload).await?;
                Ok::<_, ActionError>(json!("unreachable"))
            }),
    )?;

    let err = store.dispatch("outer", json!(-1)).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::Action(ActionError::ValidationError { ref field, .. }) if field == "amount"
    ));
    assert_eq!(store.state()["count"], json!(1));
    Ok(())
}

#[tokio::test]
async fn test_overlapping_dispatches_complete_independently() -> TestResult {
    let store = create_store(counter().action_async("slow", |ctx, delay| async move {
        let millis = delay.as_u64().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(millis)).await;
        ctx.commit("inc", json!(1))?;
        Ok::<_, ActionError>(json!(millis))
    }))?;

    let (first, second) = tokio::join!(
        store.dispatch("slow", json!(30)),
        store.dispatch("slow", json!(5)),
    );

    assert_eq!(first?, json!(30));
    assert_eq!(second?, json!(5));
    assert_eq!(store.state()["count"], json!(2));
    Ok(())
}

#[tokio::test]
async fn test_action_subscriber_prepend_and_unsubscribe() -> TestResult {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let store = create_store(counter().action("go", |_, _| Ok(Value::Null)))?;

    let late = store.subscribe_action(before(&log, "late"));
    store.subscribe_action_with(before(&log, "early"), SubscribeOptions::prepend());
    store.dispatch("go", Value::Null).await?;

    assert!(late.unsubscribe());
    assert!(!late.unsubscribe());
    store.dispatch("go", Value::Null).await?;

    assert_eq!(
        *log.lock().unwrap(),
        vec!["early:go", "late:go", "early:go"]
    );
    Ok(())
}

#[tokio::test]
async fn test_action_context_reads_local_and_root_views() -> TestResult {
    let store = create_store(
        counter()
            .getter("double", |state, _, _, _| {
                json!(state["count"].as_i64().unwrap_or(0) * 2)
            })
            .module(
                "profile",
                ModuleConfig::new()
                    .namespaced(true)
                    .state(json!({"name": "ada"}))
                    .getter("upper", |state, _, _, _| {
                        json!(state["name"].as_str().unwrap_or("").to_uppercase())
                    })
                    .action("describe", |ctx, _| {
                        Ok(json!({
                            "local": ctx.state(),
                            "upper": ctx.getter("upper"),
                            "double": ctx.root_getter("double"),
                            "count": ctx.root_state()["count"].clone(),
                        }))
                    }),
            ),
    )?;

    store.commit("inc", json!(3))?;
    let result = store.dispatch("profile/describe", Value::Null).await?;

    assert_eq!(
        result,
        json!({"local": {"name": "ada"}, "upper": "ADA", "double": 6, "count": 3})
    );
    Ok(())
}
