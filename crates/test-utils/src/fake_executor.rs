use std::sync::{Arc, Mutex};

use latticeflow::errors::{DispatchError, Result};
use latticeflow::exec::backend::BoxFuture;
use latticeflow::exec::{
    Executor, ExecutorConstructor, JobHandle, JobPoll, LocalExecutor, ResourceMap,
    TaskGroupMetadata, TaskResult, TaskSpec,
};
use serde_json::Value;

/// Shared log of everything a [`RecordingExecutor`] was asked to do.
#[derive(Debug, Clone, Default)]
pub struct ExecutorLog {
    sent: Arc<Mutex<Vec<TaskGroupMetadata>>>,
    cancelled: Arc<Mutex<Vec<String>>>,
}

impl ExecutorLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Task groups submitted, in submission order.
    pub fn sent(&self) -> Vec<TaskGroupMetadata> {
        self.sent.lock().unwrap().clone()
    }

    pub fn send_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Every node id submitted, flattened.
    pub fn sent_nodes(&self) -> Vec<u32> {
        self.sent()
            .into_iter()
            .flat_map(|meta| meta.node_ids)
            .collect()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }
}

/// An executor that:
/// - records which task groups were submitted and which jobs were cancelled
/// - delegates the actual work to a `local` executor instance.
pub struct RecordingExecutor {
    inner: Arc<dyn Executor>,
    log: ExecutorLog,
}

impl RecordingExecutor {
    /// Constructor to hand to `DispatcherBuilder::register_executor`.
    pub fn constructor(log: ExecutorLog) -> ExecutorConstructor {
        Arc::new(move |ctx, name, config: &Value| {
            let inner: Arc<dyn Executor> = Arc::new(LocalExecutor::from_config(ctx, name, config)?);
            Ok(Arc::new(RecordingExecutor {
                inner,
                log: log.clone(),
            }) as Arc<dyn Executor>)
        })
    }
}

impl Executor for RecordingExecutor {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn send<'a>(
        &'a self,
        specs: Vec<TaskSpec>,
        resources: ResourceMap,
        meta: &'a TaskGroupMetadata,
    ) -> BoxFuture<'a, Result<JobHandle>> {
        self.log.sent.lock().unwrap().push(meta.clone());
        self.inner.send(specs, resources, meta)
    }

    fn poll<'a>(
        &'a self,
        meta: &'a TaskGroupMetadata,
        handle: &'a str,
    ) -> BoxFuture<'a, Result<JobPoll>> {
        self.inner.poll(meta, handle)
    }

    fn receive<'a>(
        &'a self,
        meta: &'a TaskGroupMetadata,
        handle: &'a str,
    ) -> BoxFuture<'a, Result<Vec<TaskResult>>> {
        self.inner.receive(meta, handle)
    }

    fn cancel<'a>(&'a self, handle: &'a str) -> BoxFuture<'a, Result<bool>> {
        self.log.cancelled.lock().unwrap().push(handle.to_string());
        self.inner.cancel(handle)
    }

    fn get_upload_uri(&self, meta: &TaskGroupMetadata, object_key: &str) -> String {
        self.inner.get_upload_uri(meta, object_key)
    }
}

/// An executor whose infrastructure is down: every submission fails.
pub struct UnavailableExecutor {
    name: String,
}

impl UnavailableExecutor {
    pub fn constructor() -> ExecutorConstructor {
        Arc::new(|_ctx, name, _config| {
            Ok(Arc::new(UnavailableExecutor {
                name: name.to_string(),
            }) as Arc<dyn Executor>)
        })
    }
}

impl Executor for UnavailableExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn send<'a>(
        &'a self,
        _specs: Vec<TaskSpec>,
        _resources: ResourceMap,
        _meta: &'a TaskGroupMetadata,
    ) -> BoxFuture<'a, Result<JobHandle>> {
        Box::pin(async move {
            Err(DispatchError::Executor(format!(
                "executor '{}' is unavailable",
                self.name
            )))
        })
    }

    fn poll<'a>(
        &'a self,
        _meta: &'a TaskGroupMetadata,
        _handle: &'a str,
    ) -> BoxFuture<'a, Result<JobPoll>> {
        Box::pin(async { Ok(JobPoll::Failed("unavailable".to_string())) })
    }

    fn receive<'a>(
        &'a self,
        _meta: &'a TaskGroupMetadata,
        _handle: &'a str,
    ) -> BoxFuture<'a, Result<Vec<TaskResult>>> {
        Box::pin(async { Ok(Vec::new()) })
    }

    fn cancel<'a>(&'a self, _handle: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async { Ok(false) })
    }

    fn get_upload_uri(&self, meta: &TaskGroupMetadata, object_key: &str) -> String {
        format!("unavailable://{}/{object_key}", meta.dispatch_id)
    }
}
