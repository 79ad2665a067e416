// src/exec/mod.rs

//! Execution layer.
//!
//! - [`backend`] defines the [`Executor`] contract and its wire types.
//! - [`registry`] holds executor plugins, task functions and workflow
//!   builders.
//! - [`executor_loop`] is the job table shared by the built-in executors.
//! - [`local`] runs registered functions in-process; [`process`] runs shell
//!   commands.
//! - [`hooks`] runs dependency hooks around a task.
//! - [`job_manager`] persists job handles and cancellation flags.
//! - [`task_runner`] drives a scheduled task group from submission to
//!   reported results.

pub mod backend;
pub mod executor_loop;
pub mod hooks;
pub mod job_manager;
pub mod local;
pub mod process;
pub mod registry;
pub mod task_runner;

pub use backend::{
    BoxFuture, Executor, InputRef, JobEvent, JobHandle, JobPoll, JobStatus, ResourceMap,
    TaskGroupMetadata, TaskResult, TaskSpec,
};
pub use local::LocalExecutor;
pub use process::ProcessExecutor;
pub use registry::{
    ExecutorConstructor, ExecutorContext, ExecutorRegistry, FunctionRegistry, WorkflowRegistry,
};
