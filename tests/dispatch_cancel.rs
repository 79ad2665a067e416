mod common;
use crate::common::{
    ConfigFileBuilder, ExecutorLog, ManifestBuilder, RECORDING, dispatcher, eventually, export,
    init_tracing, with_timeout,
};

use std::error::Error;

use latticeflow::dag::manifest::OutputExpr;
use latticeflow::errors::DispatchError;
use latticeflow::types::{DispatchStatus, NodeStatus};
use serde_json::json;

type TestResult = Result<(), Box<dyn Error>>;

fn chain() -> latticeflow::dag::WorkflowManifest {
    ManifestBuilder::new("chain")
        .executor(RECORDING)
        .param(0, json!(1))
        .task(1, "double")
        .task(2, "double")
        .arg(0, 1, 0)
        .arg(1, 2, 0)
        .output(OutputExpr::Node(2))
        .build()
}

#[tokio::test]
async fn cancel_before_start_submits_nothing() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new().build();
    let log = ExecutorLog::new();
    let dispatcher = dispatcher(&cfg, &log);

    let id = dispatcher.register_dispatch(chain())?.dispatch_id;
    let message = dispatcher.cancel(&id, &[]).await?;
    assert_eq!(message, format!("Dispatch {id} cancelled."));
    assert_eq!(dispatcher.get_status(&id)?, DispatchStatus::Cancelled);

    // A later start must not resurrect it.
    dispatcher.start_dispatch(&id).await?;
    let status = with_timeout(dispatcher.wait_for_terminal(&id)).await?;
    assert_eq!(status, DispatchStatus::Cancelled);

    let result = export(&dispatcher, &id).await.result_export.expect("full export");
    assert!(result.nodes.iter().all(|n| n.status == NodeStatus::Cancelled));
    assert_eq!(log.send_count(), 0);

    dispatcher.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn cancelling_one_node_before_start_skips_its_descendants() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new().build();
    let log = ExecutorLog::new();
    let dispatcher = dispatcher(&cfg, &log);

    let id = dispatcher.register_dispatch(chain())?.dispatch_id;
    let message = dispatcher.cancel(&id, &[2]).await?;
    assert_eq!(message, format!("Cancelled tasks [2] in dispatch {id}."));
    assert_eq!(dispatcher.get_status(&id)?, DispatchStatus::NewObject);

    dispatcher.start_dispatch(&id).await?;
    let status = with_timeout(dispatcher.wait_for_terminal(&id)).await?;
    assert_eq!(status, DispatchStatus::Cancelled);

    let result = export(&dispatcher, &id).await.result_export.expect("full export");
    let statuses: Vec<_> = result.nodes.iter().map(|n| n.status).collect();
    assert_eq!(
        statuses,
        vec![NodeStatus::Completed, NodeStatus::Completed, NodeStatus::Cancelled]
    );
    assert_eq!(log.sent_nodes(), vec![1]);

    dispatcher.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn cancelling_one_group_member_skips_the_whole_group() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new().build();
    let log = ExecutorLog::new();
    let dispatcher = dispatcher(&cfg, &log);

    let manifest = ManifestBuilder::new("grouped")
        .executor(RECORDING)
        .param(0, json!(1))
        .task(1, "double")
        .task(2, "double")
        .task(3, "double")
        .group(1, &[1, 2])
        .arg(0, 1, 0)
        .arg(1, 2, 0)
        .arg(0, 3, 0)
        .output(OutputExpr::List(vec![OutputExpr::Node(2), OutputExpr::Node(3)]))
        .build();
    let id = dispatcher.register_dispatch(manifest)?.dispatch_id;
    dispatcher.cancel(&id, &[2]).await?;

    dispatcher.start_dispatch(&id).await?;
    let status = with_timeout(dispatcher.wait_for_terminal(&id)).await?;
    assert_eq!(status, DispatchStatus::Cancelled);

    let result = export(&dispatcher, &id).await.result_export.expect("full export");
    let statuses: Vec<_> = result.nodes.iter().map(|n| n.status).collect();
    assert_eq!(
        statuses,
        vec![
            NodeStatus::Completed,
            NodeStatus::Cancelled,
            NodeStatus::Cancelled,
            NodeStatus::Completed,
        ]
    );
    assert_eq!(log.sent_nodes(), vec![3]);

    dispatcher.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn cancel_rejects_unknown_nodes() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new().build();
    let log = ExecutorLog::new();
    let dispatcher = dispatcher(&cfg, &log);

    let id = dispatcher.register_dispatch(chain())?.dispatch_id;
    let err = dispatcher.cancel(&id, &[99]).await.unwrap_err();
    assert!(matches!(err, DispatchError::NodeNotFound { node_id: 99, .. }));
    assert_eq!(dispatcher.get_status(&id)?, DispatchStatus::NewObject);

    dispatcher.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn cancel_while_running_aborts_the_job() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new().build();
    let log = ExecutorLog::new();
    let dispatcher = dispatcher(&cfg, &log);

    let manifest = ManifestBuilder::new("slow")
        .executor(RECORDING)
        .task(0, "sleepy")
        .task(1, "double")
        .arg(0, 1, 0)
        .output(OutputExpr::Node(1))
        .build();
    let id = dispatcher.register_dispatch(manifest)?.dispatch_id;
    dispatcher.start_dispatch(&id).await?;

    let sent = log.clone();
    eventually(move || sent.send_count() == 1).await;
    dispatcher.cancel(&id, &[]).await?;

    let status = with_timeout(dispatcher.wait_for_terminal(&id)).await?;
    assert_eq!(status, DispatchStatus::Cancelled);

    let result = export(&dispatcher, &id).await.result_export.expect("full export");
    assert!(result.nodes.iter().all(|n| n.status == NodeStatus::Cancelled));
    assert_eq!(log.sent_nodes(), vec![0]);

    dispatcher.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn cancel_after_completion_changes_nothing() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new().build();
    let log = ExecutorLog::new();
    let dispatcher = dispatcher(&cfg, &log);

    let id = dispatcher.register_dispatch(chain())?.dispatch_id;
    dispatcher.start_dispatch(&id).await?;
    let status = with_timeout(dispatcher.wait_for_terminal(&id)).await?;
    assert_eq!(status, DispatchStatus::Completed);

    dispatcher.cancel(&id, &[]).await?;
    assert_eq!(dispatcher.get_status(&id)?, DispatchStatus::Completed);
    let result = export(&dispatcher, &id).await.result_export.expect("full export");
    assert_eq!(result.result, Some(json!(4)));

    dispatcher.shutdown().await;
    Ok(())
}
