use serde_json::{json, Value};
use statetree::{create_store, ActionError, CallOptions, ModuleConfig};

// Module tree installation: namespaced keys, state placement and local contexts.

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn bump(state: &mut Value, _payload: &Value) {
    let n = state["n"].as_i64().unwrap_or(0) + 1;
    state["n"] = json!(n);
}

fn nested_tree() -> ModuleConfig {
    ModuleConfig::new().module(
        "a",
        ModuleConfig::new().namespaced(true).module(
            "b",
            ModuleConfig::new()
                .state(json!({"n": 0}))
                .mutation("inc", bump)
                .module(
                    "c",
                    ModuleConfig::new()
                        .namespaced(true)
                        .state(json!({"n": 0}))
                        .mutation("inc", bump),
                ),
        ),
    )
}

#[test]
fn test_namespace_prefixes_follow_namespaced_ancestors() -> TestResult {
    let store = create_store(nested_tree())?;

    assert_eq!(store.mutation_types(), vec!["a/c/inc", "a/inc"]);
    assert!(store.has_mutation("a/inc"));
    assert!(!store.has_mutation("inc"));
    assert_eq!(
        store.namespace_module("a/c/"),
        Some(vec!["a".to_string(), "b".to_string(), "c".to_string()])
    );
    Ok(())
}

#[test]
fn test_module_state_is_attached_under_registration_keys() -> TestResult {
    let store = create_store(nested_tree())?;

    assert_eq!(
        store.state(),
        json!({"a": {"b": {"n": 0, "c": {"n": 0}}}})
    );
    assert_eq!(store.module_state(&["a", "b", "c"]), Some(json!({"n": 0})));
    assert_eq!(store.module_state(&["a", "missing"]), None);
    Ok(())
}

#[test]
fn test_commit_changes_exactly_the_owning_subtree() -> TestResult {
    let store = create_store(nested_tree())?;

    store.commit("a/c/inc", Value::Null)?;
    assert_eq!(store.module_state(&["a", "b", "c"]), Some(json!({"n": 1})));
    assert_eq!(store.state()["a"]["b"]["n"], json!(0));

    store.commit("a/inc", Value::Null)?;
    assert_eq!(store.state()["a"]["b"]["n"], json!(1));
    assert_eq!(store.state()["a"]["b"]["c"]["n"], json!(1));
    Ok(())
}

#[tokio::test]
async fn test_module_context_addresses_its_own_namespace() -> TestResult {
    let store = create_store(nested_tree())?;
    let context = store
        .module_context(&["a", "b", "c"])
        .ok_or("module context missing")?;

    assert_eq!(context.namespace(), "a/c/");
    context.commit("inc", Value::Null)?;
    assert_eq!(context.state(), json!({"n": 1}));
    assert_eq!(context.dispatch("missing", Value::Null).await?, Value::Null);

    let plain = store.module_context(&["a", "b"]).ok_or("module context missing")?;
    assert_eq!(plain.namespace(), "a/");
    plain.commit("inc", Value::Null)?;
    assert_eq!(store.state()["a"]["b"]["n"], json!(1));
    assert!(store.module_context(&["nope"]).is_none());
    Ok(())
}

#[test]
fn test_state_factory_gives_each_module_its_own_value() -> TestResult {
    let shared = ModuleConfig::new()
        .namespaced(true)
        .state_fn(|| json!({"n": 0}))
        .mutation("inc", bump);
    let store = create_store(
        ModuleConfig::new()
            .module("left", shared.clone())
            .module("right", shared),
    )?;

    store.commit("left/inc", Value::Null)?;
    store.commit("left/inc", Value::Null)?;
    assert_eq!(store.state()["left"]["n"], json!(2));
    assert_eq!(store.state()["right"]["n"], json!(0));
    Ok(())
}

#[test]
fn test_module_key_colliding_with_parent_state_keeps_parent_value() -> TestResult {
    let store = create_store(
        ModuleConfig::new()
            .state(json!({"profile": "plain field"}))
            .module("profile", ModuleConfig::new().state(json!({"name": "x"}))),
    )?;

    assert_eq!(store.state()["profile"], json!("plain field"));
    Ok(())
}

#[test]
fn test_refused_module_state_keeps_descendants_out_of_parent_field() -> TestResult {
    let store = create_store(
        ModuleConfig::new()
            .state(json!({"profile": {"kind": "plain"}}))
            .module(
                "profile",
                ModuleConfig::new()
                    .state(json!({"name": "x"}))
                    .module("avatar", ModuleConfig::new().state(json!({"url": null})))
                    .module(
                        "badges",
                        ModuleConfig::new()
                            .state(json!({"items": []}))
                            .module("latest", ModuleConfig::new().state(json!({"id": 0}))),
                    ),
            )
            .module("settings", ModuleConfig::new().state(json!({"theme": "dark"}))),
    )?;

    assert_eq!(
        store.state(),
        json!({"profile": {"kind": "plain"}, "settings": {"theme": "dark"}})
    );
    Ok(())
}

#[test]
fn test_duplicate_getter_keeps_first_registration() -> TestResult {
    let store = create_store(
        ModuleConfig::new()
            .getter("label", |_, _, _, _| json!("root"))
            .module(
                "plain",
                ModuleConfig::new().getter("label", |_, _, _, _| json!("child")),
            ),
    )?;

    assert_eq!(store.getter_types(), vec!["label"]);
    assert_eq!(store.getter("label"), Some(json!("root")));
    Ok(())
}

#[test]
fn test_getters_see_local_and_root_views() -> TestResult {
    let store = create_store(
        ModuleConfig::new()
            .state(json!({"tax": 2}))
            .getter("total", |_, _, _, root_getters| {
                let subtotal = root_getters.get_f64("cart/subtotal").unwrap_or(0.0);
                json!(subtotal + 2.0)
            })
            .module(
                "cart",
                ModuleConfig::new()
                    .namespaced(true)
                    .state(json!({"prices": [1.5, 2.5]}))
                    .getter("subtotal", |state, _, _, _| {
                        let sum: f64 = state["prices"]
                            .as_array()
                            .map(|p| p.iter().filter_map(Value::as_f64).sum())
                            .unwrap_or(0.0);
                        json!(sum)
                    })
                    .getter("summary", |_, getters, root_state, _| {
                        json!({
                            "subtotal": getters.get("subtotal"),
                            "tax": root_state["tax"].clone(),
                            "keys": getters.keys(),
                        })
                    }),
            ),
    )?;

    assert_eq!(store.getter("cart/subtotal"), Some(json!(4.0)));
    assert_eq!(store.getter("total"), Some(json!(6.0)));
    assert_eq!(
        store.getter("cart/summary"),
        Some(json!({"subtotal": 4.0, "tax": 2, "keys": ["subtotal", "summary"]}))
    );
    assert_eq!(store.getter("subtotal"), None);
    Ok(())
}

#[tokio::test]
async fn test_local_context_prefixes_calls_with_namespace() -> TestResult {
    let store = create_store(
        ModuleConfig::new()
            .state(json!({"log": []}))
            .mutation("log", |state, entry| {
                if let Some(log) = state["log"].as_array_mut() {
                    log.push(entry.clone());
                }
            })
            .module(
                "cart",
                ModuleConfig::new()
                    .namespaced(true)
                    .state(json!({"items": []}))
                    .mutation("add", |state, item| {
                        if let Some(items) = state["items"].as_array_mut() {
                            items.push(item.clone());
                        }
                    })
                    .getter("size", |state, _, _, _| {
                        json!(state["items"].as_array().map(Vec::len).unwrap_or(0))
                    })
                    .action("add_twice", |ctx, item| {
                        ctx.commit("add", item.clone())?;
                        ctx.commit("add", item)?;
                        ctx.commit_with("log", json!("added twice"), CallOptions::root())?;
                        // Unknown local types are ignored.
                        ctx.commit("nope", Value::Null)?;
                        Ok(json!({
                            "size": ctx.getter("size"),
                            "local": ctx.state(),
                            "namespace": ctx.namespace(),
                        }))
                    }),
            ),
    )?;

    let result = store.dispatch("cart/add_twice", json!("pear")).await?;

    assert_eq!(
        result,
        json!({
            "size": 2,
            "local": {"items": ["pear", "pear"]},
            "namespace": "cart/",
        })
    );
    assert_eq!(store.state()["log"], json!(["added twice"]));
    Ok(())
}

#[tokio::test]
async fn test_local_dispatch_reaches_sibling_action_in_same_namespace() -> TestResult {
    let store = create_store(
        ModuleConfig::new().module(
            "users",
            ModuleConfig::new()
                .namespaced(true)
                .action("lookup", |_, id| Ok(json!({"id": id, "name": "ada"})))
                .action_async("greet", |ctx, id| async move {
                    let user = ctx.dispatch("lookup", id).await?;
                    let missing = ctx.dispatch("not_there", Value::Null).await?;
                    Ok::<_, ActionError>(json!({
                        "greeting": format!("hello {}", user["name"].as_str().unwrap_or("?")),
                        "missing": missing,
                    }))
                }),
        ),
    )?;

    let result = store.dispatch("users/greet", json!(7)).await?;
    assert_eq!(result, json!({"greeting": "hello ada", "missing": null}));
    Ok(())
}
