use crate::import::export::write_errors_csv;
use crate::import::{ImportEntity, ImportRun};
use crate::ipc::error::{bad_params, get_required_str, ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};
use std::path::PathBuf;

fn run_json(state: &AppState, run: &ImportRun) -> Value {
    json!({
        "run": run,
        "status": state.import.status(),
    })
}

fn select_entity(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let name = get_required_str(&req.params, "entity")?;
    let Some(entity) = ImportEntity::parse(&name) else {
        let allowed: Vec<&str> = ImportEntity::ALL.iter().map(|e| e.as_str()).collect();
        return Err(bad_params(format!("unknown import entity: {}", name))
            .with_details(json!({ "allowed": allowed })));
    };
    state.import.select_entity(entity);
    Ok(json!({ "status": state.import.status() }))
}

fn select_file(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let path = PathBuf::from(get_required_str(&req.params, "path")?);
    state.import.select_path(&path)?;
    Ok(json!({ "status": state.import.status() }))
}

fn validate(state: &mut AppState, _req: &Request) -> Result<Value, HandlerErr> {
    let api = state.api()?;
    let run = state.runtime.block_on(state.import.validate(api.as_ref()))?;
    Ok(run_json(state, &run))
}

fn commit(state: &mut AppState, _req: &Request) -> Result<Value, HandlerErr> {
    let api = state.api()?;
    let run = state.runtime.block_on(state.import.commit(api.as_ref()))?;
    Ok(run_json(state, &run))
}

fn export_errors(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let out_path = PathBuf::from(get_required_str(&req.params, "outPath")?);
    let Some(run) = state.import.latest_run() else {
        return Err(HandlerErr::new("no_run", "validate a file first"));
    };
    let rows = write_errors_csv(run, &out_path)
        .map_err(|e| HandlerErr::new("io_failed", format!("{e:#}")))?;
    Ok(json!({
        "path": out_path.to_string_lossy(),
        "rowsExported": rows,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "import.selectEntity" => select_entity(state, req),
        "import.selectFile" => select_file(state, req),
        "import.validate" => validate(state, req),
        "import.commit" => commit(state, req),
        "import.status" => Ok(json!({ "status": state.import.status() })),
        "import.reset" => {
            state.import.clear();
            Ok(json!({ "status": state.import.status() }))
        }
        "import.exportErrors" => export_errors(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
