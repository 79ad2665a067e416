#![allow(dead_code)]

pub use latticeflow_test_utils::builders::{ConfigFileBuilder, ManifestBuilder, TestConfig};
pub use latticeflow_test_utils::fake_executor::{ExecutorLog, RecordingExecutor};
pub use latticeflow_test_utils::fixtures::{
    RECORDING, dispatcher, dispatcher_builder as builder, eventually, export,
};
pub use latticeflow_test_utils::{init_tracing, with_timeout};
