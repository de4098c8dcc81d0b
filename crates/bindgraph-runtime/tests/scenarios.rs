//! End-to-end evaluation scenarios over the engine and its async worker.

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use bindgraph_core::{Entity, EntitySnapshot, Mutation, PropertyPath, PropertyValue};
use bindgraph_eval::DiagnosticKind;
use bindgraph_runtime::{Engine, EngineConfig, EngineHandle};

fn path(raw: &str) -> PropertyPath {
    PropertyPath::parse(raw).unwrap()
}

fn set(raw: &str, value: PropertyValue) -> Mutation {
    Mutation::SetProperty {
        path: path(raw),
        value,
    }
}

fn loaded(entities: Vec<Entity>) -> Engine {
    let mut engine = Engine::new(EngineConfig::default());
    engine
        .load(EntitySnapshot::from_entities(entities).unwrap())
        .unwrap();
    engine
}

fn value(engine: &Engine, raw: &str) -> Value {
    engine.evaluation_result(&path(raw)).unwrap().value.clone()
}

fn kinds(engine: &Engine, raw: &str) -> Vec<DiagnosticKind> {
    engine
        .evaluation_result(&path(raw))
        .unwrap()
        .errors
        .iter()
        .map(|d| d.kind)
        .collect()
}

#[test]
fn test_literal_edit_recomputes_only_its_dependent() {
    let mut engine = loaded(vec![
        Entity::widget("A").with_literal("x", 5),
        Entity::widget("B").with_binding("y", "{{A.x + 1}}"),
        Entity::widget("C").with_literal("z", 1).with_binding("w", "{{C.z}}"),
    ]);
    assert_eq!(value(&engine, "B.y"), json!(6));

    engine.stage(&[set("A.x", PropertyValue::literal(10))]).unwrap();
    let pass = engine.begin();
    assert_eq!(pass.pass().affected().bindings, [path("B.y")].into());
    let mut pass = pass;
    while !engine.step(&mut pass, 1) {}
    engine.finish(pass).unwrap();
    assert_eq!(value(&engine, "B.y"), json!(11));
}

#[test]
fn test_mutual_bindings_report_one_cycle() {
    let mut engine = Engine::new(EngineConfig::default());
    let cycles = Arc::new(Mutex::new(Vec::new()));
    let sink = cycles.clone();
    engine.on_cyclic_dependency(move |paths| sink.lock().unwrap().push(paths.clone()));
    engine
        .load(
            EntitySnapshot::from_entities([
                Entity::widget("A").with_binding("x", "{{B.y}}"),
                Entity::widget("B").with_binding("y", "{{A.x}}"),
                Entity::widget("D").with_literal("n", 3).with_binding("m", "{{D.n * 2}}"),
            ])
            .unwrap(),
        )
        .unwrap();

    assert_eq!(
        cycles.lock().unwrap().as_slice(),
        &[[path("A.x"), path("B.y")].into()]
    );
    for member in ["A.x", "B.y"] {
        assert_eq!(kinds(&engine, member), vec![DiagnosticKind::CyclicDependency]);
        assert_eq!(value(&engine, member), Value::Null);
    }
    // The rest of the graph is evaluated normally.
    assert_eq!(value(&engine, "D.m"), json!(6));
    assert!(kinds(&engine, "D.m").is_empty());

    engine
        .apply(&[set("B.y", PropertyValue::binding("{{4}}"))])
        .unwrap();
    assert_eq!(value(&engine, "A.x"), json!(4));
    assert!(kinds(&engine, "A.x").is_empty());
}

#[test]
fn test_errored_dependency_short_circuits() {
    let mut engine = loaded(vec![
        Entity::widget("A")
            .with_literal("items", json!([1, 2]))
            .with_binding("x", "{{A.items.length}}"),
        Entity::widget("C").with_binding("z", "{{A.x * 100}}"),
    ]);
    assert_eq!(value(&engine, "C.z"), json!(200));

    engine
        .apply(&[set("A.items", PropertyValue::literal(Value::Null))])
        .unwrap();
    assert_eq!(kinds(&engine, "A.x"), vec![DiagnosticKind::EvalError]);
    assert_eq!(kinds(&engine, "C.z"), vec![DiagnosticKind::DependencyError]);
    assert_eq!(value(&engine, "C.z"), json!(200));
    assert_eq!(
        engine.evaluation_result(&path("C.z")).unwrap().errors[0].source,
        path("A.x")
    );
}

#[test]
fn test_unchanged_snapshot_is_idempotent() {
    let mut engine = loaded(vec![
        Entity::widget("A").with_literal("x", 5),
        Entity::widget("B").with_binding("y", "{{A.x + 1}}"),
    ]);
    let before = engine.evaluator().results().clone();
    let snapshot = engine.latest().clone();
    let report = engine.load(snapshot).unwrap();
    assert!(report.changed.is_empty());
    for (path, result) in engine.evaluator().results() {
        assert!(!result.is_dirty, "{path} still dirty");
        assert_eq!(result.value, before[path].value);
        assert_eq!(result.errors, before[path].errors);
    }
}

#[test]
fn test_unreferenced_literal_has_no_fan_out() {
    let mut engine = loaded(vec![
        Entity::widget("A").with_literal("x", 5).with_literal("unused", 1),
        Entity::widget("B").with_binding("y", "{{A.x + 1}}"),
    ]);
    let report = engine
        .apply(&[set("A.unused", PropertyValue::literal(2))])
        .unwrap();
    assert_eq!(report.affected, [path("A.unused")].into());
}

#[test]
fn test_shrunk_binding_drops_stale_edges() {
    let mut engine = loaded(vec![
        Entity::widget("A").with_literal("x", 1).with_literal("y", 2),
        Entity::widget("B").with_binding("sum", "{{A.x + A.y}}"),
    ]);
    assert_eq!(value(&engine, "B.sum"), json!(3));
    engine
        .apply(&[set("B.sum", PropertyValue::binding("{{A.x}}"))])
        .unwrap();
    assert_eq!(
        engine.evaluator().graph().dependencies_of(&path("B.sum")),
        [path("A.x")].into()
    );

    let report = engine
        .apply(&[set("A.y", PropertyValue::literal(50))])
        .unwrap();
    assert!(!report.affected.contains(&path("B.sum")));
    assert_eq!(value(&engine, "B.sum"), json!(1));
}

#[test]
fn test_removed_entity_cascades() {
    let mut engine = loaded(vec![
        Entity::widget("A").with_literal("x", 1),
        Entity::widget("B").with_binding("y", "{{A.x + 1}}"),
    ]);
    let report = engine
        .apply(&[Mutation::RemoveEntity { name: "A".into() }])
        .unwrap();
    assert!(report.removed.contains(&path("A.x")));
    assert!(engine.evaluation_result(&path("A.x")).is_none());
    // `A` no longer names anything; the last good value stays.
    assert_eq!(kinds(&engine, "B.y"), vec![DiagnosticKind::EvalError]);
    assert_eq!(value(&engine, "B.y"), json!(2));
    assert!(engine.evaluator().graph().dependencies_of(&path("B.y")).is_empty());
}

#[test]
fn test_reset_recomputes_everything() {
    let mut engine = loaded(vec![
        Entity::widget("A").with_literal("x", 5),
        Entity::widget("B").with_binding("y", "{{A.x + 1}}"),
    ]);
    let report = engine.reset().unwrap();
    assert_eq!(report.affected, [path("A.x"), path("B.y")].into());
    assert_eq!(value(&engine, "B.y"), json!(6));
}

fn chain(len: usize) -> EntitySnapshot {
    let mut entities = vec![Entity::widget("W0").with_literal("v", 0)];
    for i in 1..len {
        entities.push(
            Entity::widget(&format!("W{i}")).with_binding("v", &format!("{{{{W{}.v + 1}}}}", i - 1)),
        );
    }
    EntitySnapshot::from_entities(entities).unwrap()
}

#[tokio::test]
async fn test_chunked_worker_matches_single_pass() {
    let mut direct = Engine::new(EngineConfig::default());
    direct.load(chain(12)).unwrap();

    let config = EngineConfig {
        chunk_size: 1,
        ..EngineConfig::default()
    };
    let (handle, _worker) = EngineHandle::spawn(Engine::new(config));
    handle.replace(chain(12)).unwrap();
    handle.flush().await.unwrap();

    let chunked = handle
        .with_engine(|engine| engine.evaluator().results().clone())
        .await;
    assert_eq!(&chunked, direct.evaluator().results());
    assert_eq!(chunked[&path("W11.v")].value, json!(11));
}

#[tokio::test]
async fn test_superseded_pass_is_never_committed() {
    let config = EngineConfig {
        chunk_size: 1,
        ..EngineConfig::default()
    };
    let (handle, _worker) = EngineHandle::spawn(Engine::new(config));
    handle.replace(chain(8)).unwrap();
    handle.flush().await.unwrap();

    let commits = Arc::new(Mutex::new(Vec::new()));
    let sink = commits.clone();
    handle
        .subscribe(move |report| sink.lock().unwrap().push(report.version))
        .await;

    handle
        .apply(vec![set("W0.v", PropertyValue::literal(100))])
        .await
        .unwrap();
    let latest = handle
        .apply(vec![set("W0.v", PropertyValue::literal(200))])
        .await
        .unwrap();
    handle.flush().await.unwrap();

    assert_eq!(commits.lock().unwrap().as_slice(), &[latest]);
    assert_eq!(
        handle.evaluation_result(&path("W7.v")).await.unwrap().value,
        json!(207)
    );
}
