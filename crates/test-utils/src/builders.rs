#![allow(dead_code)]

use latticeflow::config::{ConfigFile, PluginConfig, PluginKind, RawConfigFile};
use latticeflow::dag::ExecutorSpec;
use latticeflow::dag::manifest::{
    DepsSpec, EdgeSpec, LatticeMetadata, NodeSpec, OutputExpr, WorkflowManifest,
};
use latticeflow::dag::node::{ArgSlot, NodeKind};
use latticeflow::types::NodeId;
use serde_json::Value;
use tempfile::TempDir;

/// Builder for `ConfigFile` to simplify test setup.
///
/// Assets go to a fresh temporary directory that lives as long as the
/// returned [`TestConfig`].
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

/// A validated config plus the temp directory backing its asset store.
pub struct TestConfig {
    pub config: ConfigFile,
    pub dir: TempDir,
}

impl ConfigFileBuilder {
    /// In-memory database, `local` as the default executor.
    pub fn new() -> Self {
        let mut config = RawConfigFile::default();
        config.executors.default = "local".to_string();
        Self { config }
    }

    pub fn default_executor(mut self, name: &str) -> Self {
        self.config.executors.default = name.to_string();
        self
    }

    pub fn workflow_executor(mut self, name: &str) -> Self {
        self.config.executors.workflow_executor = name.to_string();
        self
    }

    pub fn plugin(mut self, name: &str, kind: PluginKind) -> Self {
        self.config
            .executors
            .plugins
            .insert(name.to_string(), PluginConfig::new(kind));
        self
    }

    pub fn export_wait_secs(mut self, secs: u64) -> Self {
        self.config.server.export_wait_secs = secs;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.server.node_event_queue_capacity = capacity;
        self.config.server.job_event_queue_capacity = capacity;
        self
    }

    pub fn raw(&self) -> &RawConfigFile {
        &self.config
    }

    pub fn build(mut self) -> TestConfig {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        self.config.storage.asset_dir = Some(dir.path().join("assets"));
        let config =
            ConfigFile::try_from(self.config).expect("Failed to build valid config from builder");
        TestConfig { config, dir }
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `WorkflowManifest`.
pub struct ManifestBuilder {
    manifest: WorkflowManifest,
}

impl ManifestBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            manifest: WorkflowManifest {
                name: name.to_string(),
                metadata: LatticeMetadata::default(),
                nodes: vec![],
                edges: vec![],
                output: OutputExpr::default(),
            },
        }
    }

    pub fn param(mut self, node_id: NodeId, value: Value) -> Self {
        self.manifest
            .nodes
            .push(NodeSpec::new(node_id, NodeKind::Parameter { value }));
        self
    }

    pub fn task(mut self, node_id: NodeId, function: &str) -> Self {
        self.manifest.nodes.push(NodeSpec::new(
            node_id,
            NodeKind::Task {
                function: function.to_string(),
            },
        ));
        self
    }

    pub fn sublattice(mut self, node_id: NodeId, workflow: &str) -> Self {
        self.manifest.nodes.push(NodeSpec::new(
            node_id,
            NodeKind::Sublattice {
                workflow: workflow.to_string(),
            },
        ));
        self
    }

    /// Put the given (already added) nodes into one task group.
    pub fn group(mut self, task_group_id: NodeId, members: &[NodeId]) -> Self {
        for spec in &mut self.manifest.nodes {
            if members.contains(&spec.node_id) {
                spec.task_group_id = Some(task_group_id);
            }
        }
        self
    }

    /// Executor for one (already added) node.
    pub fn node_executor(mut self, node_id: NodeId, executor: &str) -> Self {
        if let Some(spec) = self.manifest.nodes.iter_mut().find(|s| s.node_id == node_id) {
            spec.executor = Some(ExecutorSpec::named(executor));
        }
        self
    }

    pub fn node_bash(mut self, node_id: NodeId, commands: &[&str]) -> Self {
        if let Some(spec) = self.manifest.nodes.iter_mut().find(|s| s.node_id == node_id) {
            spec.deps = DepsSpec {
                bash: Some(commands.iter().map(|c| c.to_string()).collect()),
                pip: None,
            };
        }
        self
    }

    pub fn executor(mut self, executor: &str) -> Self {
        self.manifest.metadata.executor = Some(ExecutorSpec::named(executor));
        self
    }

    pub fn workflow_executor(mut self, executor: &str) -> Self {
        self.manifest.metadata.workflow_executor = Some(executor.to_string());
        self
    }

    pub fn arg(self, source: NodeId, target: NodeId, index: usize) -> Self {
        self.edge(source, target, Some(ArgSlot::Positional(index)))
    }

    pub fn kwarg(self, source: NodeId, target: NodeId, name: &str) -> Self {
        self.edge(source, target, Some(ArgSlot::Keyword(name.to_string())))
    }

    pub fn wait_for(self, source: NodeId, target: NodeId) -> Self {
        self.edge(source, target, None)
    }

    fn edge(mut self, source: NodeId, target: NodeId, slot: Option<ArgSlot>) -> Self {
        self.manifest.edges.push(EdgeSpec {
            source,
            target,
            edge_name: "data".to_string(),
            slot,
        });
        self
    }

    pub fn output(mut self, output: OutputExpr) -> Self {
        self.manifest.output = output;
        self
    }

    pub fn build(self) -> WorkflowManifest {
        self.manifest
    }
}
