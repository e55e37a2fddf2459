use crate::api::Mutation;
use crate::ipc::error::{bad_params, ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::roster::{self, Roster};
use serde_json::{json, Value};

/// Reads `groupId` or `classId`. Neither yields an empty group id, which the
/// batch preconditions report as "no group selected".
pub(crate) fn roster_from_params(params: &Value) -> Result<Roster, HandlerErr> {
    let group = params.get("groupId").and_then(|v| v.as_str());
    let class = params.get("classId").and_then(|v| v.as_str());
    match (group, class) {
        (Some(g), None) => Ok(Roster::Group(g.trim().to_string())),
        (None, Some(c)) => Ok(Roster::Class(c.trim().to_string())),
        (None, None) => Ok(Roster::Group(String::new())),
        (Some(_), Some(_)) => Err(bad_params("pass only one of groupId or classId")),
    }
}

fn payload_object(params: &Value) -> Result<Value, HandlerErr> {
    match params {
        Value::Object(_) => Ok(params.clone()),
        _ => Err(bad_params("params must be an object")),
    }
}

fn students_list(state: &mut AppState, _req: &Request) -> Result<Value, HandlerErr> {
    let api = state.api()?;
    let students = state.runtime.block_on(roster::list_students(api.as_ref()))?;
    Ok(json!({ "students": students }))
}

fn create(state: &mut AppState, req: &Request, endpoint: &str) -> Result<Value, HandlerErr> {
    let api = state.api()?;
    let mutation = Mutation::post(endpoint, payload_object(&req.params)?);
    let created = state.runtime.block_on(api.mutate(&mutation))?;
    Ok(created)
}

fn enrollments_list(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let target = roster_from_params(&req.params)?;
    if target.id().is_empty() {
        return Err(bad_params("missing params.groupId or params.classId"));
    }
    let api = state.api()?;
    let enrollments = state
        .runtime
        .block_on(roster::list_enrollments(api.as_ref(), &target))?;
    Ok(json!({ "roster": target, "enrollments": enrollments }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "students.list" => students_list(state, req),
        "students.create" => create(state, req, "students"),
        "groups.create" => create(state, req, "groups"),
        "classes.create" => create(state, req, "classes"),
        "enrollments.list" => enrollments_list(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
