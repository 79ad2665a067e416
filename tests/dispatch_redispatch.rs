mod common;
use crate::common::{
    ConfigFileBuilder, ExecutorLog, ManifestBuilder, RECORDING, dispatcher, export, init_tracing,
    with_timeout,
};

use std::error::Error;

use latticeflow::dag::WorkflowManifest;
use latticeflow::dag::manifest::OutputExpr;
use latticeflow::engine::Dispatcher;
use latticeflow::types::DispatchStatus;
use serde_json::{Value, json};

type TestResult = Result<(), Box<dyn Error>>;

/// 0=x, 1=10; 2=add(0, 1); 3=double(1)
fn pipeline(x: i64) -> WorkflowManifest {
    ManifestBuilder::new("pipeline")
        .executor(RECORDING)
        .param(0, json!(x))
        .param(1, json!(10))
        .task(2, "add")
        .task(3, "double")
        .arg(0, 2, 0)
        .arg(1, 2, 1)
        .arg(1, 3, 0)
        .output(OutputExpr::List(vec![OutputExpr::Node(2), OutputExpr::Node(3)]))
        .build()
}

async fn run(dispatcher: &Dispatcher, dispatch_id: &str) -> Result<Option<Value>, Box<dyn Error>> {
    dispatcher.start_dispatch(dispatch_id).await?;
    let status = with_timeout(dispatcher.wait_for_terminal(dispatch_id)).await?;
    assert_eq!(status, DispatchStatus::Completed);
    Ok(export(dispatcher, dispatch_id)
        .await
        .result_export
        .and_then(|r| r.result))
}

fn sorted(mut ids: Vec<u32>) -> Vec<u32> {
    ids.sort_unstable();
    ids
}

#[tokio::test]
async fn changed_parameter_reruns_only_its_descendants() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new().build();
    let log = ExecutorLog::new();
    let dispatcher = dispatcher(&cfg, &log);

    let first = dispatcher.register_dispatch(pipeline(5))?.dispatch_id;
    assert_eq!(run(&dispatcher, &first).await?, Some(json!([15, 20])));
    assert_eq!(sorted(log.sent_nodes()), vec![2, 3]);

    let second = dispatcher
        .register_redispatch(Some(pipeline(6)), &first, true)?
        .dispatch_id;
    assert_ne!(first, second);
    assert_eq!(run(&dispatcher, &second).await?, Some(json!([16, 20])));

    // Only node 2 depends on the changed parameter.
    assert_eq!(sorted(log.sent_nodes()), vec![2, 2, 3]);

    dispatcher.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn without_reuse_everything_runs_again() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new().build();
    let log = ExecutorLog::new();
    let dispatcher = dispatcher(&cfg, &log);

    let first = dispatcher.register_dispatch(pipeline(5))?.dispatch_id;
    run(&dispatcher, &first).await?;

    let second = dispatcher
        .register_redispatch(Some(pipeline(6)), &first, false)?
        .dispatch_id;
    assert_eq!(run(&dispatcher, &second).await?, Some(json!([16, 20])));
    assert_eq!(sorted(log.sent_nodes()), vec![2, 2, 3, 3]);

    dispatcher.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn identical_redispatch_completes_from_previous_results() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new().build();
    let log = ExecutorLog::new();
    let dispatcher = dispatcher(&cfg, &log);

    let first = dispatcher.register_dispatch(pipeline(5))?.dispatch_id;
    run(&dispatcher, &first).await?;
    let sends = log.send_count();

    // No manifest: the previous one is reused as is.
    let second = dispatcher.register_redispatch(None, &first, true)?;
    assert_eq!(second.manifest, pipeline(5));
    assert_eq!(run(&dispatcher, &second.dispatch_id).await?, Some(json!([15, 20])));
    assert_eq!(log.send_count(), sends);

    dispatcher.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn redispatch_of_unknown_dispatch_fails() {
    init_tracing();
    let cfg = ConfigFileBuilder::new().build();
    let log = ExecutorLog::new();
    let dispatcher = dispatcher(&cfg, &log);

    assert!(dispatcher.register_redispatch(None, "missing", true).is_err());
    dispatcher.shutdown().await;
}
