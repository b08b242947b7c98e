//! End-to-end orchestrator tests: lifecycle, registration protocol, and
//! the four hook compositions.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use armature_core::ErrorKind;
use armature_plugin::api::MethodPayload;
use armature_plugin::declaration::PluginStub;
use armature_plugin::hook::HookOpts;
use armature_plugin::loader::{PluginOutput, RegistryLoader};
use armature_plugin::pluggable::{ApplyKind, ApplyPluginsOpts, LoadState, Pluggable, PluggableOpts};
use armature_plugin::plugin::PluginMergeOpts;
use armature_sdk::{apply_fn, enable_fn, hook_fn, method_fn, ModuleBuilder};

/// Creates an empty module file so identity resolution finds it on disk.
fn touch(dir: &std::path::Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"").expect("write module file");
    path
}

fn opts(cwd: &std::path::Path, loader: Arc<RegistryLoader>) -> PluggableOpts {
    PluggableOpts {
        cwd: cwd.to_path_buf(),
        loader: Some(loader),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_load_with_no_declarations() {
    let temp = tempfile::tempdir().expect("tempdir");
    let engine = Pluggable::new(opts(temp.path(), Arc::new(RegistryLoader::new())))
        .expect("constructs");

    assert_eq!(engine.state(), LoadState::Uninitialized);
    engine.load().await.expect("loads");
    assert_eq!(engine.state(), LoadState::Loaded);
    assert!(engine.plugins().await.is_empty());
    assert!(engine.hook_keys().await.is_empty());
}

#[tokio::test]
async fn test_load_twice_is_a_state_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let engine = Pluggable::new(opts(temp.path(), Arc::new(RegistryLoader::new())))
        .expect("constructs");

    engine.load().await.expect("loads");
    let err = engine.load().await.expect_err("second load must fail");
    assert_eq!(err.kind, ErrorKind::State);
}

#[tokio::test]
async fn test_event_with_no_hooks_resolves() {
    let temp = tempfile::tempdir().expect("tempdir");
    let engine = Pluggable::new(opts(temp.path(), Arc::new(RegistryLoader::new())))
        .expect("constructs");
    engine.load().await.expect("loads");

    let result = engine
        .apply_plugins("onStart", ApplyPluginsOpts::default())
        .await
        .expect("event resolves");
    assert_eq!(result, None);
}

#[tokio::test]
async fn test_unmatched_prefix_without_kind_is_runtime_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let engine = Pluggable::new(opts(temp.path(), Arc::new(RegistryLoader::new())))
        .expect("constructs");
    engine.load().await.expect("loads");

    let err = engine
        .apply_plugins("runChecks", ApplyPluginsOpts::default())
        .await
        .expect_err("must fail");
    assert_eq!(err.kind, ErrorKind::Runtime);
}

#[tokio::test]
async fn test_add_composition() {
    let temp = tempfile::tempdir().expect("tempdir");
    let loader = Arc::new(RegistryLoader::new());
    touch(temp.path(), "adder.so");
    ModuleBuilder::new(apply_fn(|api, _| async move {
        api.register(
            "addChecks",
            hook_fn(|_| async { Ok(Some(json!(["b"]))) }),
            HookOpts::default(),
        )
        .await?;
        Ok(None)
    }))
    .register(&loader, temp.path().join("adder.so"));

    let engine = Pluggable::new(PluggableOpts {
        plugins: vec!["./adder.so".into()],
        ..opts(temp.path(), loader)
    })
    .expect("constructs");
    engine.load().await.expect("loads");

    let result = engine
        .apply_plugins(
            "addChecks",
            ApplyPluginsOpts {
                kind: Some(ApplyKind::Add),
                initial_value: Some(json!(["a"])),
                args: None,
            },
        )
        .await
        .expect("applies");
    assert_eq!(result, Some(json!(["a", "b"])));

    let err = engine
        .apply_plugins(
            "addChecks",
            ApplyPluginsOpts {
                kind: Some(ApplyKind::Add),
                initial_value: Some(json!({"not": "array"})),
                args: None,
            },
        )
        .await
        .expect_err("non-array initial value must fail");
    assert_eq!(err.kind, ErrorKind::Runtime);
}

#[tokio::test]
async fn test_modify_composition() {
    let temp = tempfile::tempdir().expect("tempdir");
    let loader = Arc::new(RegistryLoader::new());
    touch(temp.path(), "modifier.so");
    ModuleBuilder::new(apply_fn(|api, _| async move {
        api.register(
            "modifyConfig",
            hook_fn(|ctx| async move {
                let mut memo = ctx.memo.unwrap_or(Value::Null);
                memo["a"] = json!(2);
                Ok(Some(memo))
            }),
            HookOpts::default(),
        )
        .await?;
        Ok(None)
    }))
    .register(&loader, temp.path().join("modifier.so"));

    let engine = Pluggable::new(PluggableOpts {
        plugins: vec!["./modifier.so".into()],
        ..opts(temp.path(), loader)
    })
    .expect("constructs");
    engine.load().await.expect("loads");

    let result = engine
        .apply_plugins(
            "modifyConfig",
            ApplyPluginsOpts {
                kind: None,
                initial_value: Some(json!({"a": 1})),
                args: None,
            },
        )
        .await
        .expect("applies");
    assert_eq!(result, Some(json!({"a": 2})));
}

#[tokio::test]
async fn test_get_runs_every_hook_and_observes_first_defined() {
    let temp = tempfile::tempdir().expect("tempdir");
    let loader = Arc::new(RegistryLoader::new());
    let runs = Arc::new(AtomicUsize::new(0));

    for (name, produced) in [
        ("silent.so", None),
        ("first.so", Some(json!("x"))),
        ("second.so", Some(json!("y"))),
    ] {
        touch(temp.path(), name);
        let runs = runs.clone();
        ModuleBuilder::new(apply_fn(move |api, _| {
            let runs = runs.clone();
            let produced = produced.clone();
            async move {
                api.register(
                    "getVersion",
                    hook_fn(move |_| {
                        let runs = runs.clone();
                        let produced = produced.clone();
                        async move {
                            runs.fetch_add(1, Ordering::SeqCst);
                            Ok(produced)
                        }
                    }),
                    HookOpts::default(),
                )
                .await?;
                Ok(None)
            }
        }))
        .register(&loader, temp.path().join(name));
    }

    let engine = Pluggable::new(PluggableOpts {
        plugins: vec![
            "./silent.so".into(),
            "./first.so".into(),
            "./second.so".into(),
        ],
        ..opts(temp.path(), loader)
    })
    .expect("constructs");
    engine.load().await.expect("loads");

    let result = engine
        .apply_plugins("getVersion", ApplyPluginsOpts::default())
        .await
        .expect("applies");
    assert_eq!(result, Some(json!("x")));
    assert_eq!(runs.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_event_ordering_stage_and_before() {
    let temp = tempfile::tempdir().expect("tempdir");
    let loader = Arc::new(RegistryLoader::new());
    let order = Arc::new(Mutex::new(Vec::<&'static str>::new()));

    // Registration order: late (stage 5), early (stage -5), chaser
    // (stage 5, before early). Expected run order: chaser, early, late.
    for (name, label, stage, before) in [
        ("late.so", "late", 5, None),
        ("early.so", "early", -5, None),
        ("chaser.so", "chaser", 5, Some("early".to_string())),
    ] {
        touch(temp.path(), name);
        let order = order.clone();
        ModuleBuilder::new(apply_fn(move |api, _| {
            let order = order.clone();
            let before = before.clone();
            async move {
                api.register(
                    "onStart",
                    hook_fn(move |_| {
                        let order = order.clone();
                        async move {
                            order.lock().expect("order lock").push(label);
                            Ok(None)
                        }
                    }),
                    HookOpts { stage, before },
                )
                .await?;
                Ok(None)
            }
        }))
        .register(&loader, temp.path().join(name));
    }

    let engine = Pluggable::new(PluggableOpts {
        plugins: vec!["./late.so".into(), "./early.so".into(), "./chaser.so".into()],
        ..opts(temp.path(), loader)
    })
    .expect("constructs");
    engine.load().await.expect("loads");

    let result = engine
        .apply_plugins("onStart", ApplyPluginsOpts::default())
        .await
        .expect("applies");
    assert_eq!(result, None);
    assert_eq!(*order.lock().expect("order lock"), ["chaser", "early", "late"]);
}

#[tokio::test]
async fn test_disabled_plugin_contributes_nothing() {
    let temp = tempfile::tempdir().expect("tempdir");
    let loader = Arc::new(RegistryLoader::new());
    let ran = Arc::new(AtomicUsize::new(0));

    touch(temp.path(), "disabled.so");
    let ran_probe = ran.clone();
    ModuleBuilder::new(apply_fn(move |api, _| {
        let ran = ran_probe.clone();
        async move {
            api.describe(PluginMergeOpts {
                key: None,
                enable: Some(enable_fn(|| false)),
            });
            api.register(
                "addChecks",
                hook_fn(move |_| {
                    let ran = ran.clone();
                    async move {
                        ran.fetch_add(1, Ordering::SeqCst);
                        Ok(Some(json!(["never"])))
                    }
                }),
                HookOpts::default(),
            )
            .await?;
            Ok(None)
        }
    }))
    .register(&loader, temp.path().join("disabled.so"));

    let engine = Pluggable::new(PluggableOpts {
        plugins: vec!["./disabled.so".into()],
        ..opts(temp.path(), loader)
    })
    .expect("constructs");
    engine.load().await.expect("loads");

    let result = engine
        .apply_plugins(
            "addChecks",
            ApplyPluginsOpts {
                kind: Some(ApplyKind::Add),
                initial_value: Some(json!([])),
                args: None,
            },
        )
        .await
        .expect("applies");
    assert_eq!(result, Some(json!([])));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert!(!engine.is_plugin_enabled("disabled").await.expect("known key"));
}

#[tokio::test]
async fn test_skip_set_takes_priority_over_enable() {
    let temp = tempfile::tempdir().expect("tempdir");
    let loader = Arc::new(RegistryLoader::new());

    touch(temp.path(), "target.so");
    ModuleBuilder::new(apply_fn(|api, _| async move {
        api.describe(PluginMergeOpts {
            key: None,
            enable: Some(enable_fn(|| true)),
        });
        Ok(None)
    }))
    .register(&loader, temp.path().join("target.so"));

    touch(temp.path(), "skipper.so");
    ModuleBuilder::new(apply_fn(|api, _| async move {
        api.skip_plugins(&["target".to_string()]).await?;
        Ok(None)
    }))
    .register(&loader, temp.path().join("skipper.so"));

    let engine = Pluggable::new(PluggableOpts {
        plugins: vec!["./target.so".into(), "./skipper.so".into()],
        ..opts(temp.path(), loader)
    })
    .expect("constructs");
    engine.load().await.expect("loads");

    // The predicate says enabled; the skip set wins.
    assert!(!engine.is_plugin_enabled("target").await.expect("known key"));
}

#[tokio::test]
async fn test_skip_plugins_rejects_self_and_unknown() {
    let temp = tempfile::tempdir().expect("tempdir");

    for (name, keys, kind) in [
        ("self-skip.so", vec!["selfSkip".to_string()], ErrorKind::State),
        ("unknown-skip.so", vec!["ghost".to_string()], ErrorKind::Configuration),
    ] {
        let loader = Arc::new(RegistryLoader::new());
        touch(temp.path(), name);
        ModuleBuilder::new(apply_fn(move |api, _| {
            let keys = keys.clone();
            async move {
                api.skip_plugins(&keys).await?;
                Ok(None)
            }
        }))
        .register(&loader, temp.path().join(name));

        let engine = Pluggable::new(PluggableOpts {
            plugins: vec![format!("./{name}").into()],
            ..opts(temp.path(), loader)
        })
        .expect("constructs");
        let err = engine.load().await.expect_err("skip must fail");
        assert_eq!(err.kind, kind, "case {name}");
    }
}

#[tokio::test]
async fn test_duplicate_id_aborts_before_second_apply() {
    let temp = tempfile::tempdir().expect("tempdir");
    let loader = Arc::new(RegistryLoader::new());
    let applies = Arc::new(AtomicUsize::new(0));

    touch(temp.path(), "dup.so");
    let applies_probe = applies.clone();
    ModuleBuilder::new(apply_fn(move |_, _| {
        let applies = applies_probe.clone();
        async move {
            applies.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    }))
    .register(&loader, temp.path().join("dup.so"));

    let engine = Pluggable::new(PluggableOpts {
        plugins: vec!["./dup.so".into(), "./dup.so".into()],
        ..opts(temp.path(), loader)
    })
    .expect("constructs");

    let err = engine.load().await.expect_err("duplicate id must fail");
    assert_eq!(err.kind, ErrorKind::Configuration);
    assert_eq!(applies.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_preset_expansion_order() {
    let temp = tempfile::tempdir().expect("tempdir");
    let loader = Arc::new(RegistryLoader::new());
    let order = Arc::new(Mutex::new(Vec::<&'static str>::new()));

    let record = |label: &'static str, order: &Arc<Mutex<Vec<&'static str>>>| {
        let order = order.clone();
        apply_fn(move |_, _| {
            let order = order.clone();
            async move {
                order.lock().expect("order lock").push(label);
                Ok(None)
            }
        })
    };

    // preset-a yields a sub-preset and a plugin; the sub-preset must run
    // before the sibling preset-b, the yielded plugin before declared ones.
    touch(temp.path(), "sub-a.so");
    ModuleBuilder::new(record("sub-a", &order)).register(&loader, temp.path().join("sub-a.so"));
    touch(temp.path(), "plugin-y.so");
    ModuleBuilder::new(record("plugin-y", &order))
        .register(&loader, temp.path().join("plugin-y.so"));
    touch(temp.path(), "plugin-x.so");
    ModuleBuilder::new(record("plugin-x", &order))
        .register(&loader, temp.path().join("plugin-x.so"));
    touch(temp.path(), "preset-b.so");
    ModuleBuilder::new(record("preset-b", &order))
        .register(&loader, temp.path().join("preset-b.so"));

    touch(temp.path(), "preset-a.so");
    let order_a = order.clone();
    ModuleBuilder::new(apply_fn(move |_, _| {
        let order = order_a.clone();
        async move {
            order.lock().expect("order lock").push("preset-a");
            Ok(Some(
                PluginOutput::new()
                    .with_presets(vec!["./sub-a.so".into()])
                    .with_plugins(vec!["./plugin-y.so".into()]),
            ))
        }
    }))
    .register(&loader, temp.path().join("preset-a.so"));

    let engine = Pluggable::new(PluggableOpts {
        presets: vec!["./preset-a.so".into(), "./preset-b.so".into()],
        plugins: vec!["./plugin-x.so".into()],
        ..opts(temp.path(), loader)
    })
    .expect("constructs");
    engine.load().await.expect("loads");

    assert_eq!(
        *order.lock().expect("order lock"),
        ["preset-a", "sub-a", "preset-b", "plugin-y", "plugin-x"]
    );
}

#[tokio::test]
async fn test_register_plugins_front_inserts_during_plugin_phase() {
    let temp = tempfile::tempdir().expect("tempdir");
    let loader = Arc::new(RegistryLoader::new());
    let order = Arc::new(Mutex::new(Vec::<&'static str>::new()));

    for (name, label) in [("plugin-z.so", "z"), ("plugin-w.so", "w")] {
        touch(temp.path(), name);
        let order = order.clone();
        ModuleBuilder::new(apply_fn(move |_, _| {
            let order = order.clone();
            async move {
                order.lock().expect("order lock").push(label);
                Ok(None)
            }
        }))
        .register(&loader, temp.path().join(name));
    }

    touch(temp.path(), "plugin-x.so");
    let order_x = order.clone();
    ModuleBuilder::new(apply_fn(move |api, _| {
        let order = order_x.clone();
        async move {
            order.lock().expect("order lock").push("x");
            api.register_plugins(vec!["./plugin-z.so".into()]).await?;
            Ok(None)
        }
    }))
    .register(&loader, temp.path().join("plugin-x.so"));

    let engine = Pluggable::new(PluggableOpts {
        plugins: vec!["./plugin-x.so".into(), "./plugin-w.so".into()],
        ..opts(temp.path(), loader)
    })
    .expect("constructs");
    engine.load().await.expect("loads");

    // z was front-inserted by x, so it runs before the queued w.
    assert_eq!(*order.lock().expect("order lock"), ["x", "z", "w"]);
}

#[tokio::test]
async fn test_plugin_must_not_yield_modules() {
    let temp = tempfile::tempdir().expect("tempdir");
    let loader = Arc::new(RegistryLoader::new());

    touch(temp.path(), "other.so");
    ModuleBuilder::new(apply_fn(|_, _| async { Ok(None) }))
        .register(&loader, temp.path().join("other.so"));

    touch(temp.path(), "greedy.so");
    ModuleBuilder::new(apply_fn(|_, _| async {
        Ok(Some(
            PluginOutput::new().with_plugins(vec!["./other.so".into()]),
        ))
    }))
    .register(&loader, temp.path().join("greedy.so"));

    let engine = Pluggable::new(PluggableOpts {
        plugins: vec!["./greedy.so".into()],
        ..opts(temp.path(), loader)
    })
    .expect("constructs");

    let err = engine.load().await.expect_err("plugin yield must fail");
    assert_eq!(err.kind, ErrorKind::Configuration);
}

#[tokio::test]
async fn test_register_presets_illegal_during_plugin_phase() {
    let temp = tempfile::tempdir().expect("tempdir");
    let loader = Arc::new(RegistryLoader::new());

    touch(temp.path(), "some-preset.so");
    ModuleBuilder::new(apply_fn(|_, _| async { Ok(None) }))
        .register(&loader, temp.path().join("some-preset.so"));

    touch(temp.path(), "sneaky.so");
    ModuleBuilder::new(apply_fn(|api, _| async move {
        api.register_presets(vec!["./some-preset.so".into()]).await?;
        Ok(None)
    }))
    .register(&loader, temp.path().join("sneaky.so"));

    let engine = Pluggable::new(PluggableOpts {
        plugins: vec!["./sneaky.so".into()],
        ..opts(temp.path(), loader)
    })
    .expect("constructs");

    let err = engine.load().await.expect_err("late preset must fail");
    assert_eq!(err.kind, ErrorKind::State);
}

#[tokio::test]
async fn test_register_method_shim_and_duplicate() {
    let temp = tempfile::tempdir().expect("tempdir");
    let loader = Arc::new(RegistryLoader::new());
    let fired = Arc::new(AtomicUsize::new(0));

    touch(temp.path(), "framework.so");
    ModuleBuilder::new(apply_fn(|api, _| async move {
        api.register_method("onRelease", None).await?;
        Ok(None)
    }))
    .register(&loader, temp.path().join("framework.so"));

    touch(temp.path(), "consumer.so");
    let fired_probe = fired.clone();
    ModuleBuilder::new(apply_fn(move |api, _| {
        let fired = fired_probe.clone();
        async move {
            // The shim forwards to the *calling* plugin's register.
            api.invoke(
                "onRelease",
                MethodPayload::Hook(hook_fn(move |_| {
                    let fired = fired.clone();
                    async move {
                        fired.fetch_add(1, Ordering::SeqCst);
                        Ok(None)
                    }
                })),
            )
            .await?;
            // A duplicate method name must fail before mutating state.
            let err = api
                .register_method("onRelease", None)
                .await
                .expect_err("duplicate method");
            assert_eq!(err.kind, ErrorKind::State);
            Ok(None)
        }
    }))
    .register(&loader, temp.path().join("consumer.so"));

    let engine = Pluggable::new(PluggableOpts {
        plugins: vec!["./framework.so".into(), "./consumer.so".into()],
        ..opts(temp.path(), loader)
    })
    .expect("constructs");
    engine.load().await.expect("loads");

    engine
        .apply_plugins("onRelease", ApplyPluginsOpts::default())
        .await
        .expect("applies");
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    let hook = engine
        .plugin_by_key("consumer")
        .await
        .expect("consumer registered");
    assert_eq!(hook.timing().hooks["onRelease"].len(), 1);
}

#[tokio::test]
async fn test_invoke_priority_plugin_method_shadows_engine_member() {
    let temp = tempfile::tempdir().expect("tempdir");
    let loader = Arc::new(RegistryLoader::new());

    touch(temp.path(), "shadower.so");
    ModuleBuilder::new(apply_fn(|api, _| async move {
        api.register_method(
            "cwd",
            Some(method_fn(|_, _| async { Ok(Some(json!("shadowed"))) })),
        )
        .await?;
        // Through dispatch, the plugin-method now wins over the engine's
        // own cwd member.
        let via_dispatch = api.invoke("cwd", MethodPayload::Value(Value::Null)).await?;
        assert_eq!(via_dispatch, Some(json!("shadowed")));
        // The typed accessor still reaches the engine member.
        assert!(api.cwd()?.is_dir());
        Ok(None)
    }))
    .register(&loader, temp.path().join("shadower.so"));

    let engine = Pluggable::new(PluggableOpts {
        plugins: vec!["./shadower.so".into()],
        ..opts(temp.path(), loader)
    })
    .expect("constructs");
    engine.load().await.expect("loads");
}

#[tokio::test]
async fn test_stub_instances_participate_in_composition() {
    let temp = tempfile::tempdir().expect("tempdir");
    let loader = Arc::new(RegistryLoader::new());

    touch(temp.path(), "composer.so");
    ModuleBuilder::new(apply_fn(|api, _| async move {
        api.register_plugins(vec![armature_plugin::Declaration::Instance(PluginStub {
            id: "inline-metrics".to_string(),
            key: "inlineMetrics".to_string(),
            apply: Some(apply_fn(|api, _| async move {
                api.register(
                    "addChecks",
                    hook_fn(|_| async { Ok(Some(json!(["inline"]))) }),
                    HookOpts::default(),
                )
                .await?;
                Ok(None)
            })),
            ..Default::default()
        })])
        .await?;
        Ok(None)
    }))
    .register(&loader, temp.path().join("composer.so"));

    let engine = Pluggable::new(PluggableOpts {
        plugins: vec!["./composer.so".into()],
        ..opts(temp.path(), loader)
    })
    .expect("constructs");
    engine.load().await.expect("loads");

    assert!(engine.has_plugin("inlineMetrics").await);
    let result = engine
        .apply_plugins(
            "addChecks",
            ApplyPluginsOpts {
                kind: Some(ApplyKind::Add),
                initial_value: Some(json!([])),
                args: None,
            },
        )
        .await
        .expect("applies");
    assert_eq!(result, Some(json!(["inline"])));
}

#[tokio::test]
async fn test_describe_renames_key() {
    let temp = tempfile::tempdir().expect("tempdir");
    let loader = Arc::new(RegistryLoader::new());

    touch(temp.path(), "chameleon.so");
    ModuleBuilder::new(apply_fn(|api, _| async move {
        api.describe(PluginMergeOpts {
            key: Some("renamed".to_string()),
            enable: None,
        });
        Ok(None)
    }))
    .register(&loader, temp.path().join("chameleon.so"));

    let engine = Pluggable::new(PluggableOpts {
        plugins: vec!["./chameleon.so".into()],
        ..opts(temp.path(), loader)
    })
    .expect("constructs");
    engine.load().await.expect("loads");

    assert!(engine.has_plugin("renamed").await);
    assert!(!engine.has_plugin("chameleon").await);
}

#[tokio::test]
async fn test_hook_failure_aborts_remaining_hooks() {
    let temp = tempfile::tempdir().expect("tempdir");
    let loader = Arc::new(RegistryLoader::new());
    let later_ran = Arc::new(AtomicUsize::new(0));

    touch(temp.path(), "faulty.so");
    ModuleBuilder::new(apply_fn(|api, _| async move {
        api.register(
            "onStart",
            hook_fn(|_| async { Err(armature_core::CoreError::plugin("boom")) }),
            HookOpts::default(),
        )
        .await?;
        Ok(None)
    }))
    .register(&loader, temp.path().join("faulty.so"));

    touch(temp.path(), "after.so");
    let later_probe = later_ran.clone();
    ModuleBuilder::new(apply_fn(move |api, _| {
        let later = later_probe.clone();
        async move {
            api.register(
                "onStart",
                hook_fn(move |_| {
                    let later = later.clone();
                    async move {
                        later.fetch_add(1, Ordering::SeqCst);
                        Ok(None)
                    }
                }),
                HookOpts::default(),
            )
            .await?;
            Ok(None)
        }
    }))
    .register(&loader, temp.path().join("after.so"));

    let engine = Pluggable::new(PluggableOpts {
        plugins: vec!["./faulty.so".into(), "./after.so".into()],
        ..opts(temp.path(), loader)
    })
    .expect("constructs");
    engine.load().await.expect("loads");

    let err = engine
        .apply_plugins("onStart", ApplyPluginsOpts::default())
        .await
        .expect_err("hook failure propagates");
    assert_eq!(err.kind, ErrorKind::Plugin);
    assert_eq!(later_ran.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_config_file_declarations_and_extra() {
    let temp = tempfile::tempdir().expect("tempdir");
    let loader = Arc::new(RegistryLoader::new());

    touch(temp.path(), "from-config.so");
    ModuleBuilder::new(apply_fn(|api, config| async move {
        assert_eq!(config["level"], json!(3));
        api.register(
            "getLevel",
            hook_fn(|_| async { Ok(Some(json!(3))) }),
            HookOpts::default(),
        )
        .await?;
        Ok(None)
    }))
    .register(&loader, temp.path().join("from-config.so"));

    std::fs::write(
        temp.path().join(".armaturerc.toml"),
        r#"
plugins = [["./from-config.so", { level = 3 }]]

[release]
tag = "v%s"
"#,
    )
    .expect("write config");

    let engine = Pluggable::new(PluggableOpts {
        default_config_files: vec![".armaturerc".to_string()],
        ..opts(temp.path(), loader)
    })
    .expect("constructs");
    engine.load().await.expect("loads");

    assert!(engine.has_plugin("fromConfig").await);
    assert_eq!(engine.user_config().await["release"]["tag"], json!("v%s"));

    let result = engine
        .apply_plugins("getLevel", ApplyPluginsOpts::default())
        .await
        .expect("applies");
    assert_eq!(result, Some(json!(3)));
}

#[tokio::test]
async fn test_register_timing_recorded() {
    let temp = tempfile::tempdir().expect("tempdir");
    let loader = Arc::new(RegistryLoader::new());

    touch(temp.path(), "timed.so");
    ModuleBuilder::new(apply_fn(|api, _| async move {
        api.register(
            "onStart",
            hook_fn(|_| async { Ok(None) }),
            HookOpts::default(),
        )
        .await?;
        Ok(None)
    }))
    .register(&loader, temp.path().join("timed.so"));

    let engine = Pluggable::new(PluggableOpts {
        plugins: vec!["./timed.so".into()],
        ..opts(temp.path(), loader)
    })
    .expect("constructs");
    engine.load().await.expect("loads");

    let plugin = engine.plugin_by_key("timed").await.expect("registered");
    assert!(plugin.timing().register.is_some());
    assert!(plugin.timing().hooks.is_empty());

    engine
        .apply_plugins("onStart", ApplyPluginsOpts::default())
        .await
        .expect("applies");
    engine
        .apply_plugins("onStart", ApplyPluginsOpts::default())
        .await
        .expect("applies");
    assert_eq!(plugin.timing().hooks["onStart"].len(), 2);
}
