// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.
//!
//! Each handler works on one dispatch's [`Scheduler`]. An error fails only
//! that dispatch: the scheduler is dropped and a `Finalize` with the error
//! is emitted, so the runtime loop keeps serving every other dispatch.

use std::collections::HashMap;

use tracing::{debug, error};

use crate::dag::{ScheduledGroup, Scheduler, SchedulerStep};
use crate::errors::Result;
use crate::store::{Database, TransportGraph};
use crate::tracker::{Aggregate, NodeResult};
use crate::types::{DispatchId, NodeId, NodeStatus};

/// How a dispatch ended, as seen by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalOutcome {
    /// Every node completed; the output still has to be postprocessed.
    Completed,
    Failed(String),
    Cancelled,
}

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreCommand {
    /// Hand these groups to the task runner.
    SubmitGroups {
        dispatch_id: DispatchId,
        groups: Vec<ScheduledGroup>,
    },
    /// Every node is terminal (or the dispatch broke); write the final state.
    Finalize {
        dispatch_id: DispatchId,
        outcome: FinalOutcome,
    },
}

/// Decision returned by the core after handling a single `RuntimeEvent`.
#[derive(Debug, Clone, Default)]
pub struct CoreStep {
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

impl CoreStep {
    pub(crate) fn continue_with(commands: Vec<CoreCommand>) -> Self {
        Self {
            commands,
            keep_running: true,
        }
    }
}

pub type Schedulers = HashMap<DispatchId, Scheduler>;

/// Create the scheduler of a dispatch that just entered RUNNING and
/// schedule its initial groups.
pub fn handle_start(db: &Database, schedulers: &mut Schedulers, dispatch_id: DispatchId) -> CoreStep {
    if schedulers.contains_key(&dispatch_id) {
        debug!(%dispatch_id, "dispatch already started; ignoring");
        return CoreStep::continue_with(Vec::new());
    }

    let started = TransportGraph::materialized(db.clone(), dispatch_id.as_str())
        .and_then(Scheduler::new)
        .and_then(|mut scheduler| {
            let step = scheduler.start()?;
            Ok((scheduler, step))
        });
    match started {
        Ok((scheduler, step)) => {
            schedulers.insert(dispatch_id.clone(), scheduler);
            CoreStep::continue_with(commands_for(schedulers, dispatch_id, step))
        }
        Err(err) => fail_dispatch(schedulers, dispatch_id, err.to_string()),
    }
}

/// Apply a batch of node results to their dispatch.
pub fn handle_node_update(
    schedulers: &mut Schedulers,
    dispatch_id: DispatchId,
    results: Vec<NodeResult>,
) -> CoreStep {
    let Some(scheduler) = schedulers.get_mut(&dispatch_id) else {
        debug!(%dispatch_id, "node update for inactive dispatch; ignoring");
        return CoreStep::continue_with(Vec::new());
    };

    let applied: Result<SchedulerStep> = results.iter().try_fold(
        SchedulerStep::default(),
        |mut acc, result| {
            let step = scheduler.apply(result)?;
            acc.newly_scheduled.extend(step.newly_scheduled);
            acc.newly_cancelled.extend(step.newly_cancelled);
            acc.dispatch_finished |= step.dispatch_finished;
            Ok(acc)
        },
    );
    match applied {
        Ok(step) => CoreStep::continue_with(commands_for(schedulers, dispatch_id, step)),
        Err(err) => fail_dispatch(schedulers, dispatch_id, err.to_string()),
    }
}

/// Cancel the unsubmitted nodes of a running dispatch. An empty list targets
/// every node.
pub fn handle_cancel(
    schedulers: &mut Schedulers,
    dispatch_id: DispatchId,
    node_ids: Vec<NodeId>,
) -> CoreStep {
    let Some(scheduler) = schedulers.get_mut(&dispatch_id) else {
        debug!(%dispatch_id, "cancel for inactive dispatch; ignoring");
        return CoreStep::continue_with(Vec::new());
    };

    let targets = (!node_ids.is_empty()).then_some(node_ids.as_slice());
    match scheduler.cancel_unsubmitted(targets) {
        Ok(step) => CoreStep::continue_with(commands_for(schedulers, dispatch_id, step)),
        Err(err) => fail_dispatch(schedulers, dispatch_id, err.to_string()),
    }
}

fn commands_for(schedulers: &mut Schedulers, dispatch_id: DispatchId, step: SchedulerStep) -> Vec<CoreCommand> {
    let mut commands = Vec::new();
    if !step.newly_scheduled.is_empty() {
        commands.push(CoreCommand::SubmitGroups {
            dispatch_id: dispatch_id.clone(),
            groups: step.newly_scheduled,
        });
    }
    if step.dispatch_finished {
        if let Some(scheduler) = schedulers.remove(&dispatch_id) {
            commands.push(CoreCommand::Finalize {
                dispatch_id,
                outcome: outcome_of(&scheduler),
            });
        }
    }
    commands
}

fn fail_dispatch(schedulers: &mut Schedulers, dispatch_id: DispatchId, reason: String) -> CoreStep {
    error!(%dispatch_id, error = %reason, "dispatch failed while scheduling");
    schedulers.remove(&dispatch_id);
    CoreStep::continue_with(vec![CoreCommand::Finalize {
        dispatch_id,
        outcome: FinalOutcome::Failed(reason),
    }])
}

/// Final outcome of a finished scheduler. The dispatch error is the error of
/// the first node that failed.
pub fn outcome_of(scheduler: &Scheduler) -> FinalOutcome {
    match scheduler.aggregate() {
        Aggregate::AllCompleted => FinalOutcome::Completed,
        Aggregate::Cancelled => FinalOutcome::Cancelled,
        Aggregate::Failed => {
            let error = scheduler
                .first_failure()
                .map(|f| f.error.clone())
                .or_else(|| {
                    scheduler.graph().cached().and_then(|g| {
                        g.nodes()
                            .find(|n| n.status == NodeStatus::Failed)
                            .map(|n| n.error.clone().unwrap_or_default())
                    })
                })
                .unwrap_or_default();
            FinalOutcome::Failed(error)
        }
        Aggregate::Running => {
            FinalOutcome::Failed("dispatch finished with nodes still in flight".to_string())
        }
    }
}
