mod common;
use crate::common::{
    ConfigFileBuilder, ExecutorLog, ManifestBuilder, RECORDING, dispatcher, export, init_tracing,
    with_timeout,
};

use std::error::Error;

use latticeflow::dag::manifest::OutputExpr;
use latticeflow::types::{DispatchStatus, NodeStatus};
use serde_json::json;

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn chain_runs_to_completion_and_postprocesses_output() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new().build();
    let log = ExecutorLog::new();
    let dispatcher = dispatcher(&cfg, &log);

    // 0=2, 1=3 -> 2=add(0, 1) -> 3=double(2)
    let manifest = ManifestBuilder::new("chain")
        .executor(RECORDING)
        .param(0, json!(2))
        .param(1, json!(3))
        .task(2, "add")
        .task(3, "double")
        .arg(0, 2, 0)
        .arg(1, 2, 1)
        .arg(2, 3, 0)
        .output(OutputExpr::List(vec![OutputExpr::Node(2), OutputExpr::Node(3)]))
        .build();

    let receipt = dispatcher.register_dispatch(manifest)?;
    assert_eq!(dispatcher.get_status(&receipt.dispatch_id)?, DispatchStatus::NewObject);
    assert!(receipt.asset_uris.contains_key("result.json"));

    dispatcher.start_dispatch(&receipt.dispatch_id).await?;
    let status = with_timeout(dispatcher.wait_for_terminal(&receipt.dispatch_id)).await?;
    assert_eq!(status, DispatchStatus::Completed);

    let response = export(&dispatcher, &receipt.dispatch_id).await;
    let result = response.result_export.expect("full export");
    assert_eq!(result.result, Some(json!([5, 10])));
    assert!(result.error.is_none());
    assert!(result.nodes.iter().all(|n| n.status == NodeStatus::Completed));

    // Parameters never reach an executor.
    assert_eq!(log.sent_nodes(), vec![2, 3]);
    // Settled dispatches keep no status watcher.
    assert_eq!(dispatcher.watched_dispatches(), 0);

    dispatcher.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn failure_cancels_descendants_and_fails_dispatch() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new().build();
    let log = ExecutorLog::new();
    let dispatcher = dispatcher(&cfg, &log);

    // A -> B -> C with A failing.
    let manifest = ManifestBuilder::new("failing")
        .executor(RECORDING)
        .task(0, "boom")
        .task(1, "double")
        .task(2, "double")
        .arg(0, 1, 0)
        .arg(1, 2, 0)
        .output(OutputExpr::Node(2))
        .build();

    let id = dispatcher.register_dispatch(manifest)?.dispatch_id;
    dispatcher.start_dispatch(&id).await?;
    let status = with_timeout(dispatcher.wait_for_terminal(&id)).await?;
    assert_eq!(status, DispatchStatus::Failed);

    let result = export(&dispatcher, &id).await.result_export.expect("full export");
    assert!(result.result.is_none());
    assert!(
        result
            .error
            .as_deref()
            .is_some_and(|e| e.contains("ZeroDivisionError"))
    );

    let statuses: Vec<_> = result.nodes.iter().map(|n| (n.node_id, n.status)).collect();
    assert_eq!(
        statuses,
        vec![
            (0, NodeStatus::Failed),
            (1, NodeStatus::Cancelled),
            (2, NodeStatus::Cancelled),
        ]
    );
    assert_eq!(log.sent_nodes(), vec![0]);

    dispatcher.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn independent_branch_still_runs_after_a_failure() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new().build();
    let log = ExecutorLog::new();
    let dispatcher = dispatcher(&cfg, &log);

    let manifest = ManifestBuilder::new("branches")
        .executor(RECORDING)
        .task(0, "boom")
        .param(1, json!(21))
        .task(2, "double")
        .arg(1, 2, 0)
        .build();

    let id = dispatcher.register_dispatch(manifest)?.dispatch_id;
    dispatcher.start_dispatch(&id).await?;
    let status = with_timeout(dispatcher.wait_for_terminal(&id)).await?;
    assert_eq!(status, DispatchStatus::Failed);

    let result = export(&dispatcher, &id).await.result_export.expect("full export");
    let doubled = result.nodes.iter().find(|n| n.node_id == 2).expect("node 2");
    assert_eq!(doubled.status, NodeStatus::Completed);
    assert_eq!(doubled.output, Some(json!(42)));

    dispatcher.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn postprocessing_error_is_recorded_on_the_dispatch() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new().build();
    let log = ExecutorLog::new();
    let dispatcher = dispatcher(&cfg, &log);

    let manifest = ManifestBuilder::new("bad-output")
        .executor(RECORDING)
        .task(0, "pair")
        .output(OutputExpr::Index {
            node: 0,
            key: json!("missing"),
        })
        .build();

    let id = dispatcher.register_dispatch(manifest)?.dispatch_id;
    dispatcher.start_dispatch(&id).await?;
    let status = with_timeout(dispatcher.wait_for_terminal(&id)).await?;
    assert_eq!(status, DispatchStatus::PostprocessingFailed);

    let result = export(&dispatcher, &id).await.result_export.expect("full export");
    assert!(result.result.is_none());
    assert!(result.error.as_deref().is_some_and(|e| e.contains("missing")));
    assert_eq!(result.nodes[0].status, NodeStatus::Completed);

    dispatcher.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn result_that_cannot_be_stored_fails_postprocessing() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new().build();
    let log = ExecutorLog::new();
    let dispatcher = dispatcher(&cfg, &log);

    let manifest = ManifestBuilder::new("unwritable")
        .executor(RECORDING)
        .task(0, "pair")
        .output(OutputExpr::Node(0))
        .build();
    let receipt = dispatcher.register_dispatch(manifest)?;
    let result_uri = &receipt.asset_uris["result.json"];
    let result_path = result_uri
        .strip_prefix("file://")
        .ok_or_else(|| format!("unexpected result uri {result_uri}"))?;
    // A directory in the way makes the result write fail.
    std::fs::create_dir_all(result_path)?;

    let id = receipt.dispatch_id;
    dispatcher.start_dispatch(&id).await?;
    let status = with_timeout(dispatcher.wait_for_terminal(&id)).await?;
    assert_eq!(status, DispatchStatus::PostprocessingFailed);

    let result = export(&dispatcher, &id).await.result_export.expect("full export");
    assert!(result.result.is_none());
    assert!(
        result
            .error
            .as_deref()
            .is_some_and(|e| e.contains("failed to store workflow result"))
    );

    dispatcher.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn starting_twice_is_a_no_op() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new().build();
    let log = ExecutorLog::new();
    let dispatcher = dispatcher(&cfg, &log);

    let manifest = ManifestBuilder::new("once")
        .executor(RECORDING)
        .task(0, "pair")
        .output(OutputExpr::Node(0))
        .build();

    let id = dispatcher.register_dispatch(manifest)?.dispatch_id;
    dispatcher.start_dispatch(&id).await?;
    dispatcher.start_dispatch(&id).await?;
    let status = with_timeout(dispatcher.wait_for_terminal(&id)).await?;
    assert_eq!(status, DispatchStatus::Completed);
    assert_eq!(log.send_count(), 1);

    dispatcher.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn unknown_dispatch_ids_are_errors() {
    init_tracing();
    let cfg = ConfigFileBuilder::new().build();
    let log = ExecutorLog::new();
    let dispatcher = dispatcher(&cfg, &log);

    assert!(dispatcher.get_status("nope").is_err());
    assert!(dispatcher.start_dispatch("nope").await.is_err());
    assert!(dispatcher.cancel("nope", &[]).await.is_err());

    dispatcher.shutdown().await;
}
