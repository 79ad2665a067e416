// src/engine/finalize.rs

//! Final dispatch state once every node is terminal.

use serde_json::Value;
use tracing::{error, info, warn};

use crate::context::AppContext;
use crate::dag::manifest::OutputExpr;
use crate::engine::dispatcher::Dispatcher;
use crate::engine::event_handlers::FinalOutcome;
use crate::errors::Result;
use crate::store::{TransportGraph, records};
use crate::tracker::{PostprocessError, postprocess};
use crate::types::{DispatchStatus, NodeId};

/// Object key of the postprocessed workflow result.
pub const RESULT_KEY: &str = "result.json";

/// Write the final state of a dispatch and wake its waiters. Errors are
/// logged; the dispatch is forced to FAILED when possible.
pub fn finalize_dispatch(dispatcher: &Dispatcher, dispatch_id: &str, outcome: FinalOutcome) {
    let ctx = dispatcher.context();
    let notify = |id: &str| dispatcher.notify(id);
    match finalize(ctx, dispatch_id, outcome, &notify) {
        Ok(status) => info!(%dispatch_id, %status, "dispatch finalized"),
        Err(err) => {
            error!(%dispatch_id, error = %err, "finalizing dispatch failed");
            let forced = {
                let conn = ctx.db.conn();
                records::set_dispatch_outcome(&conn, dispatch_id, None, Some(&err.to_string()))
                    .and_then(|_| records::set_dispatch_status(&conn, dispatch_id, DispatchStatus::Failed))
            };
            if let Err(err) = forced {
                warn!(%dispatch_id, error = %err, "could not mark dispatch failed");
            }
            dispatcher.notify(dispatch_id);
        }
    }
}

/// Move a RUNNING dispatch to its terminal state. `notify` is called after
/// every status write.
pub fn finalize(
    ctx: &AppContext,
    dispatch_id: &str,
    outcome: FinalOutcome,
    notify: &dyn Fn(&str),
) -> Result<DispatchStatus> {
    match outcome {
        FinalOutcome::Failed(error) => {
            {
                let conn = ctx.db.conn();
                records::set_dispatch_outcome(&conn, dispatch_id, None, Some(&error))?;
                records::transition_dispatch(
                    &conn,
                    dispatch_id,
                    DispatchStatus::Running,
                    DispatchStatus::Failed,
                )?;
            }
            notify(dispatch_id);
        }
        FinalOutcome::Cancelled => {
            records::transition_dispatch(
                &ctx.db.conn(),
                dispatch_id,
                DispatchStatus::Running,
                DispatchStatus::Cancelled,
            )?;
            notify(dispatch_id);
        }
        FinalOutcome::Completed => {
            let entered = records::transition_dispatch(
                &ctx.db.conn(),
                dispatch_id,
                DispatchStatus::Running,
                DispatchStatus::Postprocessing,
            )?;
            if entered {
                notify(dispatch_id);
                postprocess_dispatch(ctx, dispatch_id)?;
                notify(dispatch_id);
            }
        }
    }
    records::get_dispatch_status(&ctx.db.conn(), dispatch_id)
}

fn postprocess_dispatch(ctx: &AppContext, dispatch_id: &str) -> Result<()> {
    let output = records::get_dispatch(&ctx.db.conn(), dispatch_id)?
        .manifest
        .output;

    let stored = evaluate_output(ctx, dispatch_id, &output).and_then(|value| {
        ctx.assets
            .store_json(dispatch_id, None, RESULT_KEY, &value)
            .map(|record| record.uri)
            .map_err(|e| PostprocessError::Store(e.to_string()))
    });
    match stored {
        Ok(uri) => {
            let conn = ctx.db.conn();
            records::set_dispatch_outcome(&conn, dispatch_id, Some(&uri), None)?;
            records::transition_dispatch(
                &conn,
                dispatch_id,
                DispatchStatus::Postprocessing,
                DispatchStatus::Completed,
            )?;
        }
        Err(err) => {
            warn!(%dispatch_id, error = %err, "postprocessing failed");
            let conn = ctx.db.conn();
            records::set_dispatch_outcome(&conn, dispatch_id, None, Some(&err.to_string()))?;
            records::transition_dispatch(
                &conn,
                dispatch_id,
                DispatchStatus::Postprocessing,
                DispatchStatus::PostprocessingFailed,
            )?;
        }
    }
    Ok(())
}

/// Substitute stored node outputs into the output expression.
pub fn evaluate_output(
    ctx: &AppContext,
    dispatch_id: &str,
    output: &OutputExpr,
) -> std::result::Result<Value, PostprocessError> {
    let graph = TransportGraph::bare(ctx.db.clone(), dispatch_id);
    let mut lookup = |node_id: NodeId| -> std::result::Result<Value, PostprocessError> {
        let load_err = |reason: String| PostprocessError::Load {
            node: node_id,
            reason,
        };
        let node = graph.get_node(node_id).map_err(|e| load_err(e.to_string()))?;
        let uri = node
            .output_uri
            .ok_or(PostprocessError::MissingOutput(node_id))?;
        ctx.assets.load_json(&uri).map_err(|e| load_err(e.to_string()))
    };
    postprocess(output, &mut lookup)
}
