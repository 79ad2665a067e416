//! Ready-made dispatchers and stored graphs for integration tests.

use std::time::Duration;

use latticeflow::dag::WorkflowManifest;
use latticeflow::engine::{
    Dispatcher, DispatcherBuilder, ExportOptions, ExportOutcome, ExportResponse,
};
use latticeflow::store::{Database, DispatchRecord, TransportGraph, records};
use serde_json::{Value, json};

use crate::builders::TestConfig;
use crate::fake_executor::{ExecutorLog, RecordingExecutor};
use crate::with_timeout;

/// Name under which fixtures register the recording executor.
pub const RECORDING: &str = "recording";

/// Builder pre-loaded with the task functions the dispatch tests use and a
/// recording executor writing into `log`.
///
/// - `add` sums integer arguments
/// - `double` doubles its first argument
/// - `boom` always fails
/// - `pair` returns `{"a": 1}`
/// - `sleepy` blocks for 1.5s
pub fn dispatcher_builder(cfg: &TestConfig, log: &ExecutorLog) -> DispatcherBuilder {
    Dispatcher::builder(cfg.config.clone())
        .register_executor(RECORDING, RecordingExecutor::constructor(log.clone()), Value::Null)
        .register_function("add", |args, _| {
            Ok(json!(args.iter().filter_map(Value::as_i64).sum::<i64>()))
        })
        .register_function("double", |args, _| {
            let x = args
                .first()
                .and_then(Value::as_i64)
                .ok_or_else(|| "double needs an integer".to_string())?;
            Ok(json!(x * 2))
        })
        .register_function("boom", |_, _| Err("ZeroDivisionError: division by zero".to_string()))
        .register_function("pair", |_, _| Ok(json!({ "a": 1 })))
        .register_function("sleepy", |_, _| {
            std::thread::sleep(Duration::from_millis(1500));
            Ok(json!("woke up"))
        })
}

pub fn dispatcher(cfg: &TestConfig, log: &ExecutorLog) -> Dispatcher {
    dispatcher_builder(cfg, log)
        .build()
        .expect("dispatcher should build")
}

/// Full export of a dispatch, without waiting.
pub async fn export(dispatcher: &Dispatcher, dispatch_id: &str) -> ExportResponse {
    match dispatcher
        .export_result(dispatch_id, ExportOptions::default())
        .await
        .expect("export should succeed")
    {
        ExportOutcome::Ready(response) => response,
        ExportOutcome::NotReady { .. } => panic!("export without wait is always ready"),
    }
}

/// Store `manifest` as dispatch `dispatch_id` in a fresh in-memory database
/// and return a lazy view of its graph.
pub fn stored_graph(manifest: WorkflowManifest, dispatch_id: &str) -> TransportGraph {
    let db = Database::in_memory().expect("in-memory database");
    let graph = manifest
        .to_task_graph("local")
        .expect("manifest should validate");
    records::insert_dispatch_graph(
        &mut db.conn(),
        &DispatchRecord::new(dispatch_id.into(), manifest),
        &graph,
    )
    .expect("dispatch should insert");
    TransportGraph::bare(db, dispatch_id)
}

/// Poll `cond` every 10ms until it holds.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    with_timeout(async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
}
