//! bindgraph command-line tools.
//!
//! Provides the `bindgraph` binary for inspecting an application snapshot
//! stored as JSON: evaluate every binding, print the evaluation order, plan
//! or dry-run the page-load actions, and execute a trigger.
//!
//! Reads configuration from environment variables:
//! - `BINDGRAPH_DB_PATH`: SQLite file backing the persistent app store
//!   (default: "bindgraph.db")
//! - `BINDGRAPH_CHUNK_SIZE`, `BINDGRAPH_INVALIDATION`,
//!   `BINDGRAPH_APP_STORE_KEY`: engine settings
//! - `RUST_LOG`: log filter (logs go to stderr)
//!
//! Exit codes: 0 = success, 1 = diagnostics or failed actions,
//! 2 = invalid input, 3 = I/O error.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use bindgraph_core::{EntitySnapshot, Mutation, PropertyPath};
use bindgraph_runtime::{
    Engine, EngineConfig, EngineHandle, Fixture, FixtureDispatcher, TriggerScheduler,
};
use bindgraph_store::{EntitySnapshotProvider, JsonFileProvider, SqliteStore};

/// Reactive binding evaluation tools.
#[derive(Parser)]
#[command(name = "bindgraph", about = "Reactive binding evaluation tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate every binding of a snapshot.
    Evaluate {
        /// Snapshot JSON file.
        #[arg(short, long)]
        snapshot: PathBuf,

        /// JSON array of mutations applied as one batch after loading.
        #[arg(short, long)]
        mutations: Option<PathBuf>,

        /// Print only paths that carry errors.
        #[arg(long)]
        errors_only: bool,
    },

    /// Print the evaluation order and the cyclic paths.
    Order {
        #[arg(short, long)]
        snapshot: PathBuf,
    },

    /// Evaluate one template against a snapshot.
    Eval {
        #[arg(short, long)]
        snapshot: PathBuf,

        /// Template text, e.g. "{{Table1.data.length}}".
        template: String,
    },

    /// Print the page-load plan, or run it against fixture responses.
    PageLoad {
        #[arg(short, long)]
        snapshot: PathBuf,

        /// Only plan actions of this page.
        #[arg(short, long)]
        page: Option<String>,

        /// Run the plan, answering actions from this fixture file.
        #[arg(long)]
        run: Option<PathBuf>,
    },

    /// Execute a trigger property, answering actions from a fixture file.
    Trigger {
        #[arg(short, long)]
        snapshot: PathBuf,

        /// Trigger path, e.g. "Button1.onClick".
        #[arg(short, long)]
        path: String,

        #[arg(short, long)]
        fixtures: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::from_env();

    let exit_code = match cli.command {
        Commands::Evaluate {
            snapshot,
            mutations,
            errors_only,
        } => run_evaluate(config, &snapshot, mutations.as_deref(), errors_only),
        Commands::Order { snapshot } => run_order(config, &snapshot),
        Commands::Eval { snapshot, template } => run_eval(config, &snapshot, &template),
        Commands::PageLoad {
            snapshot,
            page,
            run,
        } => run_page_load(config, &snapshot, page.as_deref(), run.as_deref()).await,
        Commands::Trigger {
            snapshot,
            path,
            fixtures,
        } => run_trigger(config, &snapshot, &path, fixtures.as_deref()).await,
    };
    process::exit(exit_code);
}

fn print_json(value: &impl Serialize) {
    let json = serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize result: {}\"}}", e));
    println!("{}", json);
}

fn load_snapshot(path: &Path) -> Result<EntitySnapshot, i32> {
    JsonFileProvider::new(path).snapshot().map_err(|e| {
        eprintln!("Error: failed to load snapshot '{}': {}", path.display(), e);
        3
    })
}

fn load_engine(config: EngineConfig, path: &Path) -> Result<Engine, i32> {
    let snapshot = load_snapshot(path)?;
    let mut engine = Engine::new(config);
    engine.load(snapshot).map_err(|e| {
        eprintln!("Error: {}", e);
        2
    })?;
    Ok(engine)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, i32> {
    let body = std::fs::read(path).map_err(|e| {
        eprintln!("Error: failed to read '{}': {}", path.display(), e);
        3
    })?;
    serde_json::from_slice(&body).map_err(|e| {
        eprintln!("Error: invalid JSON in '{}': {}", path.display(), e);
        2
    })
}

fn run_evaluate(config: EngineConfig, snapshot: &Path, mutations: Option<&Path>, errors_only: bool) -> i32 {
    let mut engine = match load_engine(config, snapshot) {
        Ok(engine) => engine,
        Err(code) => return code,
    };
    if let Some(path) = mutations {
        let batch: Vec<Mutation> = match read_json(path) {
            Ok(batch) => batch,
            Err(code) => return code,
        };
        if let Err(e) = engine.apply(&batch) {
            eprintln!("Error: mutation batch rejected: {}", e);
            return 2;
        }
    }

    let results: BTreeMap<_, _> = engine
        .evaluator()
        .results()
        .iter()
        .filter(|(_, r)| !errors_only || r.is_errored())
        .collect();
    print_json(&results);
    if engine.evaluator().results().values().any(|r| r.is_errored()) {
        1
    } else {
        0
    }
}

fn run_order(config: EngineConfig, snapshot: &Path) -> i32 {
    let engine = match load_engine(config, snapshot) {
        Ok(engine) => engine,
        Err(code) => return code,
    };
    let mut graph = engine.evaluator().graph().clone();
    print_json(graph.sort_order());
    if graph.cycles().is_empty() {
        0
    } else {
        1
    }
}

fn run_eval(config: EngineConfig, snapshot: &Path, template: &str) -> i32 {
    let engine = match load_engine(config, snapshot) {
        Ok(engine) => engine,
        Err(code) => return code,
    };
    match engine.evaluator().evaluate_text(template) {
        Ok(value) => {
            print_json(&value);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn fixture_dispatcher(fixtures: Option<&Path>) -> Result<FixtureDispatcher, i32> {
    let fixtures: BTreeMap<String, Fixture> = match fixtures {
        Some(path) => read_json(path)?,
        None => BTreeMap::new(),
    };
    Ok(FixtureDispatcher::new(fixtures))
}

/// Spawns the engine worker and a scheduler backed by the SQLite app store.
async fn scheduler(
    config: EngineConfig,
    snapshot: &Path,
    fixtures: Option<&Path>,
) -> Result<TriggerScheduler, i32> {
    let snapshot = load_snapshot(snapshot)?;
    let dispatcher = fixture_dispatcher(fixtures)?;
    let db_path = std::env::var("BINDGRAPH_DB_PATH").unwrap_or_else(|_| "bindgraph.db".to_string());
    tracing::debug!(db_path = %db_path, "opening app store");
    let storage = SqliteStore::new(&db_path, &config.app_store_key).map_err(|e| {
        eprintln!("Error: failed to open database '{}': {}", db_path, e);
        3
    })?;

    let (handle, _worker) = EngineHandle::spawn(Engine::new(config));
    let scheduler = TriggerScheduler::new(handle.clone(), Arc::new(dispatcher))
        .with_storage(Box::new(storage));
    let loaded = async {
        handle.replace(snapshot)?;
        handle.flush().await?;
        scheduler.restore_app_store().await
    };
    loaded.await.map_err(|e| {
        eprintln!("Error: {}", e);
        2
    })?;
    Ok(scheduler)
}

async fn run_page_load(config: EngineConfig, snapshot: &Path, page: Option<&str>, run: Option<&Path>) -> i32 {
    let Some(fixtures) = run else {
        let engine = match load_engine(config, snapshot) {
            Ok(engine) => engine,
            Err(code) => return code,
        };
        let plan = engine.plan_page_load(page);
        print_json(&plan);
        return if plan.cycles.is_empty() { 0 } else { 1 };
    };

    let scheduler = match scheduler(config, snapshot, Some(fixtures)).await {
        Ok(scheduler) => scheduler,
        Err(code) => return code,
    };
    match scheduler.run_page_load(page).await {
        Ok(report) => {
            print_json(&report);
            if report.is_success() {
                0
            } else {
                1
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            3
        }
    }
}

async fn run_trigger(config: EngineConfig, snapshot: &Path, path: &str, fixtures: Option<&Path>) -> i32 {
    let path = match PropertyPath::parse(path) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 2;
        }
    };
    let scheduler = match scheduler(config, snapshot, fixtures).await {
        Ok(scheduler) => scheduler,
        Err(code) => return code,
    };
    match scheduler.execute_trigger(&path).await {
        Ok(report) => {
            print_json(&report);
            if report.effects.iter().any(|run| run.state.is_failed()) {
                1
            } else {
                0
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}
