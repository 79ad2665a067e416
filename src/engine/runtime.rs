// src/engine/runtime.rs

use std::fmt;

use tokio::sync::mpsc;
use tracing::{Instrument, debug, info};

use crate::errors::Result;
use crate::exec::task_runner;
use crate::logging::{dispatch_span, task_group_span};

use super::core::CoreRuntime;
use super::dispatcher::Dispatcher;
use super::{CoreCommand, RuntimeEvent, finalize};

/// Drives the schedulers in response to `RuntimeEvent`s and hands the
/// resulting work to the task runner and to finalization.
///
/// This is a pure IO shell around `CoreRuntime`, which contains all the
/// scheduling semantics. Every command is executed on its own Tokio task so
/// the loop never waits on an executor.
pub struct Runtime {
    core: CoreRuntime,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    dispatcher: Dispatcher,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    pub fn new(core: CoreRuntime, event_rx: mpsc::Receiver<RuntimeEvent>, dispatcher: Dispatcher) -> Self {
        Self {
            core,
            event_rx,
            dispatcher,
        }
    }

    /// Main event loop.
    ///
    /// - Consumes `RuntimeEvent`s from `event_rx`.
    /// - Feeds them into the core runtime.
    /// - Executes the commands returned by the core.
    pub async fn run(mut self) -> Result<()> {
        info!("latticeflow runtime started");

        loop {
            let event = match self.event_rx.recv().await {
                Some(e) => e,
                None => {
                    info!("runtime event channel closed; exiting");
                    break;
                }
            };

            debug!(?event, "runtime received event");

            let step = self.core.step(event);
            for command in step.commands {
                self.execute_command(command);
            }

            if !step.keep_running {
                info!(
                    active = self.core.active_dispatches().len(),
                    "core requested exit; stopping runtime"
                );
                break;
            }
        }

        info!("runtime exiting");
        Ok(())
    }

    fn execute_command(&self, command: CoreCommand) {
        match command {
            CoreCommand::SubmitGroups {
                dispatch_id,
                groups,
            } => {
                debug!(
                    %dispatch_id,
                    groups = ?groups.iter().map(|g| g.task_group_id).collect::<Vec<_>>(),
                    "submitting ready task groups"
                );
                for group in groups {
                    let span = task_group_span(&dispatch_id, group.task_group_id);
                    tokio::spawn(
                        task_runner::run_task_group(self.dispatcher.clone(), dispatch_id.clone(), group)
                            .instrument(span),
                    );
                }
            }
            CoreCommand::Finalize {
                dispatch_id,
                outcome,
            } => {
                let dispatcher = self.dispatcher.clone();
                let span = dispatch_span(&dispatch_id);
                tokio::spawn(
                    async move {
                        finalize::finalize_dispatch(&dispatcher, &dispatch_id, outcome);
                    }
                    .instrument(span),
                );
            }
        }
    }
}
