//! Page-load and user trigger execution against a fixture dispatcher.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};

use bindgraph_core::{Entity, EntitySnapshot, PropertyPath};
use bindgraph_eval::TriggerEffect;
use bindgraph_runtime::{
    ActionDispatcher, DispatchFuture, Engine, EngineConfig, EngineHandle, Fixture, FixtureDispatcher,
    SchedulerError, TriggerScheduler, TriggerState,
};
use bindgraph_store::{SqliteStore, StorageAdapter};

fn path(raw: &str) -> PropertyPath {
    PropertyPath::parse(raw).unwrap()
}

async fn handle_with(entities: Vec<Entity>) -> EngineHandle {
    let (handle, _worker) = EngineHandle::spawn(Engine::new(EngineConfig::default()));
    handle
        .replace(EntitySnapshot::from_entities(entities).unwrap())
        .unwrap();
    handle.flush().await.unwrap();
    handle
}

async fn value(handle: &EngineHandle, raw: &str) -> Value {
    handle.evaluation_result(&path(raw)).await.unwrap().value
}

fn orders_app() -> Vec<Entity> {
    vec![
        Entity::action("Users").with_literal("data", json!([])),
        Entity::action("Orders")
            .with_binding("params.user", "{{Users.data[0].id}}")
            .with_literal("data", json!([])),
        Entity::action("Config").with_literal("data", json!({})),
        Entity::widget("Table1").with_binding("tableData", "{{Orders.data}}"),
        Entity::widget("Title").with_binding("text", "{{Config.data.title || 'untitled'}}"),
    ]
}

#[tokio::test]
async fn test_page_load_runs_layers_in_order() {
    let handle = handle_with(orders_app()).await;
    let dispatcher = Arc::new(
        FixtureDispatcher::default()
            .with("Users", Fixture::Ok(json!([{"id": 7}])))
            .with("Orders", Fixture::Ok(json!([{"order": 1}, {"order": 2}])))
            .with("Config", Fixture::Ok(json!({"title": "Shop"})))
            .with_delay(Duration::from_millis(5)),
    );
    let scheduler = TriggerScheduler::new(handle.clone(), dispatcher.clone());

    let report = scheduler.run_page_load(None).await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.states.len(), 3);

    let calls = dispatcher.calls();
    let position = |name: &str| calls.iter().position(|(a, _)| a == name).unwrap();
    assert!(position("Users") < position("Orders"));
    let orders_params = &calls[position("Orders")].1;
    assert_eq!(orders_params, &json!({"params": {"user": 7}}));

    assert_eq!(value(&handle, "Table1.tableData").await, json!([{"order": 1}, {"order": 2}]));
    assert_eq!(value(&handle, "Title.text").await, json!("Shop"));
    let snapshot = handle.with_engine(|e| e.snapshot().clone()).await;
    assert_eq!(
        snapshot.property(&path("Orders.isLoading")),
        Some(&bindgraph_core::PropertyValue::literal(false))
    );
    assert_eq!(scheduler.state("Orders"), Some(TriggerState::Completed));
}

#[tokio::test]
async fn test_failed_action_fails_only_its_dependents() {
    let handle = handle_with(orders_app()).await;
    let dispatcher = Arc::new(
        FixtureDispatcher::default()
            .with("Users", Fixture::Err("503 from upstream".into()))
            .with("Config", Fixture::Ok(json!({"title": "Shop"}))),
    );
    let scheduler = TriggerScheduler::new(handle.clone(), dispatcher.clone());

    let report = scheduler.run_page_load(None).await.unwrap();
    assert_eq!(
        report.states["Users"],
        TriggerState::Failed {
            reason: "503 from upstream".into()
        }
    );
    assert_eq!(
        report.states["Orders"],
        TriggerState::Failed {
            reason: "dependency Users failed".into()
        }
    );
    assert_eq!(report.states["Config"], TriggerState::Completed);
    assert!(dispatcher.calls().iter().all(|(a, _)| a != "Orders"));
    assert_eq!(value(&handle, "Title.text").await, json!("Shop"));
}

/// Answers from fixtures, except that `Users` panics mid-request.
struct PanickingUsers(FixtureDispatcher);

impl ActionDispatcher for PanickingUsers {
    fn dispatch(&self, action: &str, params: Value) -> DispatchFuture {
        if action == "Users" {
            return Box::pin(async { panic!("connection reset") });
        }
        self.0.dispatch(action, params)
    }
}

#[tokio::test]
async fn test_aborted_action_task_fails_that_action() {
    let handle = handle_with(orders_app()).await;
    let dispatcher = Arc::new(PanickingUsers(
        FixtureDispatcher::default().with("Config", Fixture::Ok(json!({"title": "Shop"}))),
    ));
    let scheduler = TriggerScheduler::new(handle.clone(), dispatcher);

    let report = scheduler.run_page_load(None).await.unwrap();
    assert_eq!(
        report.states["Users"],
        TriggerState::Failed {
            reason: "action task aborted".into()
        }
    );
    assert_eq!(
        report.states["Orders"],
        TriggerState::Failed {
            reason: "dependency Users failed".into()
        }
    );
    assert_eq!(report.states["Config"], TriggerState::Completed);
    assert_eq!(scheduler.state("Users"), report.states.get("Users").cloned());

    let snapshot = handle.with_engine(|e| e.snapshot().clone()).await;
    assert_eq!(
        snapshot.property(&path("Users.isLoading")),
        Some(&bindgraph_core::PropertyValue::literal(false))
    );
    assert_eq!(value(&handle, "Title.text").await, json!("Shop"));
}

#[tokio::test]
async fn test_cyclic_page_load_actions_are_reported() {
    let handle = handle_with(vec![
        Entity::action("A")
            .with_binding("params.b", "{{B.data}}")
            .with_run_on_page_load(true),
        Entity::action("B")
            .with_binding("params.a", "{{A.data}}")
            .with_run_on_page_load(true),
    ])
    .await;
    let reported = Arc::new(Mutex::new(Vec::new()));
    let sink = reported.clone();
    handle
        .on_cyclic_dependency(move |paths| sink.lock().unwrap().push(paths.clone()))
        .await;
    let dispatcher = Arc::new(FixtureDispatcher::default());
    let scheduler = TriggerScheduler::new(handle, dispatcher.clone());

    let report = scheduler.run_page_load(None).await.unwrap();
    assert_eq!(report.failed().count(), 2);
    assert!(dispatcher.calls().is_empty());
    assert_eq!(
        reported.lock().unwrap().as_slice(),
        &[[path("A"), path("B")].into()]
    );
}

#[tokio::test]
async fn test_trigger_effects_run_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("store.db");
    let db = db.to_str().unwrap();

    let handle = handle_with(vec![
        Entity::widget("Input1").with_literal("text", "ada"),
        Entity::action("Save").with_literal("data", json!(null)),
        Entity::widget("Greeting").with_binding("text", "{{'hi ' + (appsmith.store.name || '?')}}"),
        Entity::widget("Button1").with_trigger(
            "onClick",
            "{{Save.run(); storeValue('name', Input1.text, true); showAlert('saved', 'success')}}",
        ),
        Entity::app_store(Default::default()),
    ])
    .await;
    let dispatcher = Arc::new(FixtureDispatcher::default().with("Save", Fixture::Ok(json!({"ok": true}))));
    let scheduler = TriggerScheduler::new(handle.clone(), dispatcher)
        .with_storage(Box::new(SqliteStore::new(db, "app").unwrap()));

    let report = scheduler.execute_trigger(&path("Button1.onClick")).await.unwrap();
    assert!(report
        .effects
        .iter()
        .all(|run| run.state == TriggerState::Completed));
    assert_eq!(
        report.external().collect::<Vec<_>>(),
        vec![&TriggerEffect::ShowAlert {
            message: "saved".into(),
            style: Some("success".into()),
        }]
    );
    assert_eq!(value(&handle, "Greeting.text").await, json!("hi ada"));
    assert_eq!(value(&handle, "Save.data").await, json!({"ok": true}));

    let persisted = SqliteStore::new(db, "app").unwrap();
    assert_eq!(persisted.get("name").unwrap(), Some(json!("ada")));
}

#[tokio::test]
async fn test_failed_effect_skips_the_rest() {
    let handle = handle_with(vec![
        Entity::action("Broken").with_literal("data", json!(null)),
        Entity::widget("Button1").with_trigger("onClick", "{{Broken.run(); storeValue('x', 1)}}"),
    ])
    .await;
    let dispatcher = Arc::new(FixtureDispatcher::default().with("Broken", Fixture::Err("timeout".into())));
    let scheduler = TriggerScheduler::new(handle.clone(), dispatcher);

    let report = scheduler.execute_trigger(&path("Button1.onClick")).await.unwrap();
    assert!(report.effects[0].state.is_failed());
    assert_eq!(
        report.effects[1].state,
        TriggerState::Failed {
            reason: "earlier effect Broken.run failed".into()
        }
    );
    let snapshot = handle.with_engine(|e| e.snapshot().clone()).await;
    assert!(!snapshot.contains_entity("appsmith"));
}

#[tokio::test]
async fn test_missing_trigger_is_an_error() {
    let handle = handle_with(vec![Entity::widget("Button1")]).await;
    let scheduler = TriggerScheduler::new(handle, Arc::new(FixtureDispatcher::default()));
    let err = scheduler
        .execute_trigger(&path("Button1.onClick"))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::UnknownTrigger { .. }));
}

#[tokio::test]
async fn test_persisted_store_is_restored() {
    let mut storage = bindgraph_store::MemoryStorage::new();
    storage.set("theme", &json!("dark")).unwrap();
    let handle = handle_with(vec![
        Entity::widget("Page").with_binding("theme", "{{appsmith.store.theme}}"),
    ])
    .await;
    let scheduler = TriggerScheduler::new(handle.clone(), Arc::new(FixtureDispatcher::default()))
        .with_storage(Box::new(storage));
    scheduler.restore_app_store().await.unwrap();
    assert_eq!(value(&handle, "Page.theme").await, json!("dark"));
}
