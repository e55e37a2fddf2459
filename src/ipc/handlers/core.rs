use crate::ipc::error::{bad_params, get_opt_usize, get_required_str, ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    let backend = state.backend.as_ref().map(|b| {
        json!({
            "kind": b.kind,
            "target": b.target,
        })
    });
    let running = state
        .batches
        .values()
        .filter(|b| !b.handle.snapshot().is_terminal())
        .count();
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "backend": backend,
            "defaultConcurrency": state.config.concurrency,
            "batchesRunning": running,
            "importState": state.import.state(),
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return bad_params("missing params.path").response(&req.id);
    };

    match state.open_workspace(&path) {
        Ok(()) => ok(&req.id, json!({ "workspacePath": path.to_string_lossy() })),
        Err(e) => HandlerErr::new("db_open_failed", format!("{e:#}")).response(&req.id),
    }
}

fn api_connect(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let base_url = get_required_str(&req.params, "baseUrl")?;
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        return Err(bad_params("params.baseUrl must be an http(s) URL"));
    }
    let token = req
        .params
        .get("token")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .or_else(|| state.config.api_token.clone());
    let timeout = get_opt_usize(&req.params, "timeoutSecs")?
        .map(|s| Duration::from_secs(s.max(1) as u64))
        .unwrap_or_else(|| state.config.request_timeout());

    state.connect_http(&base_url, token, timeout)?;
    Ok(json!({
        "kind": "http",
        "baseUrl": state.backend.as_ref().map(|b| b.target.clone()),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "api.connect" => Some(match api_connect(state, req) {
            Ok(result) => ok(&req.id, result),
            Err(e) => e.response(&req.id),
        }),
        _ => None,
    }
}
