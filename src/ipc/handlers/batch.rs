use crate::batch::{prepare_deactivate, prepare_enroll, BatchOrchestrator, StudentFilter, WorkItem};
use crate::ipc::error::{bad_params, get_opt_bool, get_opt_usize, get_required_str, ok, HandlerErr};
use crate::ipc::handlers::roster::roster_from_params;
use crate::ipc::types::{AppState, BatchEntry, Request};
use crate::runner::CancelFlag;
use serde_json::{json, Value};
use std::collections::HashSet;

/// Starts a batch on the runtime and registers it. With `wait`, blocks until
/// the run is over and includes per-item results.
fn start_batch(
    state: &mut AppState,
    req: &Request,
    action: &str,
    items: Vec<WorkItem>,
) -> Result<Value, HandlerErr> {
    let concurrency =
        get_opt_usize(&req.params, "concurrency")?.unwrap_or(state.config.concurrency);
    let wait = get_opt_bool(&req.params, "wait")?.unwrap_or(false);

    let orchestrator = BatchOrchestrator::new(state.api()?, concurrency);
    let cancel = CancelFlag::new();
    let (handle, run) = orchestrator.start(action, items, cancel.clone());
    let batch_id = handle.snapshot().batch_id;
    let task = state.runtime.spawn(run);
    let mut entry = BatchEntry::new(handle, cancel, task);

    let result = if wait {
        let run = entry.finish(&state.runtime)?;
        json!({
            "batchId": batch_id,
            "report": run.report,
            "results": run.results,
        })
    } else {
        json!({
            "batchId": batch_id,
            "report": entry.handle.snapshot(),
        })
    };
    state.register_batch(batch_id, entry);
    Ok(result)
}

fn bulk_enroll(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let roster = roster_from_params(&req.params)?;
    let filter: StudentFilter = match req.params.get("filter") {
        None | Some(Value::Null) => StudentFilter::default(),
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| bad_params(format!("invalid params.filter: {}", e)))?,
    };
    let api = state.api()?;
    let items = state
        .runtime
        .block_on(prepare_enroll(api.as_ref(), &roster, &filter))?;
    start_batch(state, req, "enroll", items)
}

fn bulk_deactivate(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let roster = roster_from_params(&req.params)?;
    let selection: Option<HashSet<String>> = match req.params.get("enrollmentIds") {
        None | Some(Value::Null) => None,
        Some(Value::Array(ids)) => Some(ids
            .iter()
            .map(|v| {
                v.as_str()
                    .map(|s| s.to_string())
                    .ok_or_else(|| bad_params("params.enrollmentIds must contain strings"))
            })
            .collect::<Result<_, _>>()?),
        Some(_) => return Err(bad_params("params.enrollmentIds must be an array")),
    };
    let api = state.api()?;
    let items = state
        .runtime
        .block_on(prepare_deactivate(api.as_ref(), &roster, selection.as_ref()))?;
    start_batch(state, req, "deactivate", items)
}

fn entry_mut<'a>(state: &'a mut AppState, req: &Request) -> Result<&'a mut BatchEntry, HandlerErr> {
    let batch_id = get_required_str(&req.params, "batchId")?;
    state
        .batches
        .get_mut(&batch_id)
        .ok_or_else(|| HandlerErr::new("not_found", format!("unknown batch: {}", batch_id)))
}

fn batch_status(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let entry = entry_mut(state, req)?;
    Ok(json!({ "report": entry.handle.snapshot() }))
}

fn batch_wait(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let batch_id = get_required_str(&req.params, "batchId")?;
    let AppState {
        batches, runtime, ..
    } = state;
    let entry = batches
        .get_mut(&batch_id)
        .ok_or_else(|| HandlerErr::new("not_found", format!("unknown batch: {}", batch_id)))?;
    let run = entry.finish(runtime)?;
    Ok(json!({ "report": run.report, "results": run.results }))
}

fn batch_cancel(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let entry = entry_mut(state, req)?;
    entry.cancel.cancel();
    Ok(json!({ "report": entry.handle.snapshot() }))
}

fn batch_forget(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let batch_id = get_required_str(&req.params, "batchId")?;
    let Some(entry) = state.batches.get(&batch_id) else {
        return Err(HandlerErr::new("not_found", format!("unknown batch: {}", batch_id)));
    };
    if !entry.handle.snapshot().is_terminal() {
        return Err(HandlerErr::new("batch_running", "cancel or wait for the batch first"));
    }
    state.batches.remove(&batch_id);
    Ok(json!({ "forgotten": batch_id }))
}

fn batch_list(state: &mut AppState, _req: &Request) -> Result<Value, HandlerErr> {
    let mut reports: Vec<_> = state.batches.values().map(|b| b.handle.snapshot()).collect();
    reports.sort_by(|a, b| a.started_at.cmp(&b.started_at));
    Ok(json!({ "batches": reports }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "enrollments.bulkEnroll" => bulk_enroll(state, req),
        "enrollments.bulkDeactivate" => bulk_deactivate(state, req),
        "batch.status" => batch_status(state, req),
        "batch.wait" => batch_wait(state, req),
        "batch.cancel" => batch_cancel(state, req),
        "batch.forget" => batch_forget(state, req),
        "batch.list" => batch_list(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
