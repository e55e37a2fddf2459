//! Offline workspace backend on SQLite.
//!
//! Answers the same endpoints and error shapes as the REST backend for the
//! records the batch engine touches. Duplicate enrollments come back as a
//! 400 with an "already enrolled" message, and dry-run imports run inside a
//! transaction that is rolled back.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{ApiClient, ApiError, Method, Mutation, UploadFile};
use crate::db;
use crate::import::csv::parse_rows;
use crate::import::{ImportEntity, ImportReport, ImportRow, RowStatus};

pub struct LocalApi {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for LocalApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalApi").finish_non_exhaustive()
    }
}

fn db_err(e: rusqlite::Error) -> ApiError {
    ApiError::status(500, format!("database error: {}", e).as_str())
}

fn not_found(what: &str, id: &str) -> ApiError {
    ApiError::status(404, format!("{} not found: {}", what, id).as_str())
}

fn bad_request(message: impl AsRef<str>) -> ApiError {
    ApiError::status(400, message.as_ref())
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn str_field<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Splits `groups/g1/enrollments` into its segments.
fn segments(endpoint: &str) -> Vec<&str> {
    endpoint
        .split('?')
        .next()
        .unwrap_or("")
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect()
}

impl LocalApi {
    pub fn open(workspace: &Path) -> anyhow::Result<Self> {
        Ok(Self::from_connection(db::open_db(workspace)?))
    }

    pub fn in_memory() -> anyhow::Result<Self> {
        Ok(Self::from_connection(db::open_in_memory()?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, ApiError> {
        self.conn
            .lock()
            .map_err(|_| ApiError::status(500, "workspace database lock poisoned"))
    }

    fn handle_fetch(&self, endpoint: &str) -> Result<Value, ApiError> {
        let conn = self.lock()?;
        match segments(endpoint).as_slice() {
            ["students"] => list_students(&conn),
            ["groups"] => list_groups(&conn),
            ["groups", id, "enrollments"] => list_enrollments(&conn, "group", id),
            ["classes", id, "enrollments"] => list_enrollments(&conn, "class", id),
            _ => Err(not_found("endpoint", endpoint)),
        }
    }

    fn handle_mutate(&self, mutation: &Mutation) -> Result<Value, ApiError> {
        let conn = self.lock()?;
        let payload = &mutation.payload;
        match (mutation.method, segments(&mutation.endpoint).as_slice()) {
            (Method::Post, ["students"]) => create_student(&conn, payload),
            (Method::Post, ["groups"]) => create_group(&conn, payload),
            (Method::Post, ["classes"]) => create_class(&conn, payload),
            (Method::Post, ["enrollments"]) => create_enrollment(&conn, payload),
            (Method::Patch, ["enrollments", id]) => update_enrollment(&conn, id, payload),
            _ => Err(not_found(
                "endpoint",
                &format!("{} {}", mutation.method.as_str(), mutation.endpoint),
            )),
        }
    }

    fn handle_upload(
        &self,
        endpoint: &str,
        file: &UploadFile,
        dry_run: bool,
    ) -> Result<ImportReport, ApiError> {
        let entity = match segments(endpoint).as_slice() {
            ["imports", name] => ImportEntity::parse(name)
                .ok_or_else(|| bad_request(format!("unknown import entity: {}", name)))?,
            _ => return Err(not_found("endpoint", endpoint)),
        };
        let import_row: fn(&Connection, &ImportRow) -> Result<RowStatus, String> = match entity {
            ImportEntity::Students => import_student_row,
            ImportEntity::Enrollments => import_enrollment_row,
            other => {
                return Err(bad_request(format!(
                    "import is not supported for {} in a local workspace",
                    other.as_str()
                )))
            }
        };

        let text = String::from_utf8_lossy(&file.bytes);
        let parsed = parse_rows(&text);
        let mut report = ImportReport::new(entity, dry_run);

        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err)?;
        for row in &parsed.rows {
            match import_row(&tx, row) {
                Ok(status) => report.record(status),
                Err(message) => {
                    let data = serde_json::to_value(&row.values).ok();
                    report.record_failure(row.row, message, data);
                }
            }
        }

        if dry_run {
            tx.rollback().map_err(db_err)?;
        } else {
            tx.execute(
                "INSERT INTO import_runs(id, entity, file_name, fingerprint, total, created, updated, skipped, failed, committed_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    Uuid::new_v4().to_string(),
                    entity.as_str(),
                    file.file_name,
                    crate::import::fingerprint(&file.bytes),
                    report.total as i64,
                    report.created as i64,
                    report.updated as i64,
                    report.skipped as i64,
                    report.failed as i64,
                    now(),
                ],
            )
            .map_err(db_err)?;
            tx.commit().map_err(db_err)?;
        }
        Ok(report)
    }
}

#[async_trait]
impl ApiClient for LocalApi {
    async fn fetch(&self, endpoint: &str) -> Result<Value, ApiError> {
        tokio::task::yield_now().await;
        self.handle_fetch(endpoint)
    }

    async fn mutate(&self, mutation: &Mutation) -> Result<Value, ApiError> {
        // Let other in-flight items interleave, as they would over the network.
        tokio::task::yield_now().await;
        self.handle_mutate(mutation)
    }

    async fn upload(
        &self,
        endpoint: &str,
        file: &UploadFile,
        dry_run: bool,
    ) -> Result<ImportReport, ApiError> {
        tokio::task::yield_now().await;
        self.handle_upload(endpoint, file, dry_run)
    }
}

fn student_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "studentNo": r.get::<_, String>(1)?,
        "lastName": r.get::<_, String>(2)?,
        "firstName": r.get::<_, String>(3)?,
        "email": r.get::<_, Option<String>>(4)?,
        "careerId": r.get::<_, Option<String>>(5)?,
        "active": r.get::<_, i64>(6)? != 0,
    }))
}

fn list_students(conn: &Connection) -> Result<Value, ApiError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, student_no, last_name, first_name, email, career_id, active
             FROM students ORDER BY last_name, first_name, id",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map([], student_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    Ok(Value::Array(rows))
}

fn list_groups(conn: &Connection) -> Result<Value, ApiError> {
    let mut stmt = conn
        .prepare("SELECT id, name, period FROM groups ORDER BY name, id")
        .map_err(db_err)?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "period": r.get::<_, Option<String>>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    Ok(Value::Array(rows))
}

fn roster_exists(conn: &Connection, scope: &str, id: &str) -> Result<bool, ApiError> {
    let sql = match scope {
        "group" => "SELECT 1 FROM groups WHERE id = ?",
        _ => "SELECT 1 FROM classes WHERE id = ?",
    };
    conn.query_row(sql, [id], |_| Ok(()))
        .optional()
        .map(|v| v.is_some())
        .map_err(db_err)
}

fn list_enrollments(conn: &Connection, scope: &str, scope_id: &str) -> Result<Value, ApiError> {
    if !roster_exists(conn, scope, scope_id)? {
        return Err(not_found(scope, scope_id));
    }
    let mut stmt = conn
        .prepare(
            "SELECT e.id, e.student_id, e.active
             FROM enrollments e
             JOIN students s ON s.id = e.student_id
             WHERE e.scope = ? AND e.scope_id = ?
             ORDER BY s.last_name, s.first_name, e.id",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map(params![scope, scope_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "studentId": r.get::<_, String>(1)?,
                "active": r.get::<_, i64>(2)? != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    Ok(Value::Array(rows))
}

fn create_student(conn: &Connection, payload: &Value) -> Result<Value, ApiError> {
    let mut missing = Vec::new();
    for key in ["studentNo", "lastName", "firstName"] {
        if str_field(payload, key).is_none() {
            missing.push(format!("{} is required", key));
        }
    }
    if !missing.is_empty() {
        return Err(ApiError::status(400, super::ApiMessage::List(missing)));
    }
    let student_no = str_field(payload, "studentNo").unwrap_or_default();
    let exists = conn
        .query_row(
            "SELECT 1 FROM students WHERE student_no = ?",
            [student_no],
            |_| Ok(()),
        )
        .optional()
        .map_err(db_err)?;
    if exists.is_some() {
        return Err(bad_request(format!(
            "student number already exists: {}",
            student_no
        )));
    }
    let id = Uuid::new_v4().to_string();
    let active = payload.get("active").and_then(|v| v.as_bool()).unwrap_or(true);
    conn.execute(
        "INSERT INTO students(id, student_no, last_name, first_name, email, career_id, active, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            id,
            student_no,
            str_field(payload, "lastName"),
            str_field(payload, "firstName"),
            str_field(payload, "email"),
            str_field(payload, "careerId"),
            active as i64,
            now(),
        ],
    )
    .map_err(db_err)?;
    conn.query_row(
        "SELECT id, student_no, last_name, first_name, email, career_id, active FROM students WHERE id = ?",
        [&id],
        student_json,
    )
    .map_err(db_err)
}

fn create_group(conn: &Connection, payload: &Value) -> Result<Value, ApiError> {
    let Some(name) = str_field(payload, "name") else {
        return Err(bad_request("name is required"));
    };
    let id = str_field(payload, "id")
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let period = str_field(payload, "period");
    let inserted = conn
        .execute(
            "INSERT OR IGNORE INTO groups(id, name, period) VALUES(?, ?, ?)",
            params![id, name, period],
        )
        .map_err(db_err)?;
    if inserted == 0 {
        return Err(bad_request(format!("group already exists: {}", id)));
    }
    Ok(json!({ "id": id, "name": name, "period": period }))
}

fn create_class(conn: &Connection, payload: &Value) -> Result<Value, ApiError> {
    let (Some(group_id), Some(subject)) = (str_field(payload, "groupId"), str_field(payload, "subject"))
    else {
        return Err(bad_request("groupId and subject are required"));
    };
    if !roster_exists(conn, "group", group_id)? {
        return Err(not_found("group", group_id));
    }
    let id = str_field(payload, "id")
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    conn.execute(
        "INSERT INTO classes(id, group_id, subject) VALUES(?, ?, ?)",
        params![id, group_id, subject],
    )
    .map_err(db_err)?;
    Ok(json!({ "id": id, "groupId": group_id, "subject": subject }))
}

/// Outcome of an enroll attempt, shared by the endpoint and the importer.
enum Enrolled {
    Created(String),
    Reactivated(String),
    AlreadyActive,
}

fn enroll(conn: &Connection, scope: &str, scope_id: &str, student_id: &str) -> Result<Enrolled, ApiError> {
    let existing: Option<(String, i64)> = conn
        .query_row(
            "SELECT id, active FROM enrollments WHERE scope = ? AND scope_id = ? AND student_id = ?",
            params![scope, scope_id, student_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(db_err)?;
    match existing {
        Some((_, active)) if active != 0 => Ok(Enrolled::AlreadyActive),
        Some((id, _)) => {
            conn.execute(
                "UPDATE enrollments SET active = 1, updated_at = ? WHERE id = ?",
                params![now(), id],
            )
            .map_err(db_err)?;
            Ok(Enrolled::Reactivated(id))
        }
        None => {
            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO enrollments(id, scope, scope_id, student_id, active, updated_at)
                 VALUES(?, ?, ?, ?, 1, ?)",
                params![id, scope, scope_id, student_id, now()],
            )
            .map_err(db_err)?;
            Ok(Enrolled::Created(id))
        }
    }
}

fn student_exists(conn: &Connection, id: &str) -> Result<bool, ApiError> {
    conn.query_row("SELECT 1 FROM students WHERE id = ?", [id], |_| Ok(()))
        .optional()
        .map(|v| v.is_some())
        .map_err(db_err)
}

fn create_enrollment(conn: &Connection, payload: &Value) -> Result<Value, ApiError> {
    let Some(student_id) = str_field(payload, "studentId") else {
        return Err(bad_request("studentId is required"));
    };
    let (scope, scope_id, key) = match (str_field(payload, "groupId"), str_field(payload, "classId")) {
        (Some(g), None) => ("group", g, "groupId"),
        (None, Some(c)) => ("class", c, "classId"),
        _ => return Err(bad_request("exactly one of groupId or classId is required")),
    };
    if !student_exists(conn, student_id)? {
        return Err(not_found("student", student_id));
    }
    if !roster_exists(conn, scope, scope_id)? {
        return Err(not_found(scope, scope_id));
    }
    let id = match enroll(conn, scope, scope_id, student_id)? {
        Enrolled::AlreadyActive => {
            return Err(bad_request(format!(
                "student already enrolled in {} {}",
                scope, scope_id
            )))
        }
        Enrolled::Created(id) | Enrolled::Reactivated(id) => id,
    };
    let mut body = json!({ "id": id, "studentId": student_id, "active": true });
    body[key] = json!(scope_id);
    Ok(body)
}

fn update_enrollment(conn: &Connection, id: &str, payload: &Value) -> Result<Value, ApiError> {
    let Some(active) = payload.get("active").and_then(|v| v.as_bool()) else {
        return Err(bad_request("active must be a boolean"));
    };
    let current: Option<i64> = conn
        .query_row("SELECT active FROM enrollments WHERE id = ?", [id], |r| r.get(0))
        .optional()
        .map_err(db_err)?;
    let Some(current) = current else {
        return Err(not_found("enrollment", id));
    };
    if (current != 0) == active {
        return Err(bad_request(if active {
            "enrollment already active"
        } else {
            "enrollment already inactive"
        }));
    }
    conn.execute(
        "UPDATE enrollments SET active = ?, updated_at = ? WHERE id = ?",
        params![active as i64, now(), id],
    )
    .map_err(db_err)?;
    Ok(json!({ "id": id, "active": active }))
}

fn require_columns<'a>(row: &'a ImportRow, columns: &[&str]) -> Result<Vec<&'a str>, String> {
    let mut values = Vec::with_capacity(columns.len());
    let mut missing = Vec::new();
    for c in columns {
        match row.required(c) {
            Some(v) => values.push(v),
            None => missing.push(*c),
        }
    }
    if missing.is_empty() {
        Ok(values)
    } else {
        Err(format!("missing required column: {}", missing.join(", ")))
    }
}

fn import_student_row(conn: &Connection, row: &ImportRow) -> Result<RowStatus, String> {
    let values = require_columns(row, &["student_no", "last_name", "first_name"])?;
    let (student_no, last_name, first_name) = (values[0], values[1], values[2]);
    let email = row.required("email");
    if let Some(email) = email {
        if !email.contains('@') {
            return Err(format!("invalid email: {}", email));
        }
    }
    let active = match row.required("active").map(str::to_ascii_lowercase).as_deref() {
        None | Some("1") | Some("true") | Some("yes") | Some("si") | Some("sí") => true,
        Some("0") | Some("false") | Some("no") => false,
        Some(other) => return Err(format!("invalid active flag: {}", other)),
    };

    let existing: Option<(String, String, String, Option<String>, i64)> = conn
        .query_row(
            "SELECT id, last_name, first_name, email, active FROM students WHERE student_no = ?",
            [student_no],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
        )
        .optional()
        .map_err(|e| e.to_string())?;

    match existing {
        Some((id, last, first, old_email, old_active)) => {
            let email = email.map(str::to_string).or(old_email.clone());
            if last == last_name && first == first_name && email == old_email && (old_active != 0) == active {
                return Ok(RowStatus::Skipped);
            }
            conn.execute(
                "UPDATE students SET last_name = ?, first_name = ?, email = ?, active = ?, updated_at = ? WHERE id = ?",
                params![last_name, first_name, email, active as i64, now(), id],
            )
            .map_err(|e| e.to_string())?;
            Ok(RowStatus::Updated)
        }
        None => {
            conn.execute(
                "INSERT INTO students(id, student_no, last_name, first_name, email, career_id, active, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    Uuid::new_v4().to_string(),
                    student_no,
                    last_name,
                    first_name,
                    email,
                    row.required("career_id"),
                    active as i64,
                    now(),
                ],
            )
            .map_err(|e| e.to_string())?;
            Ok(RowStatus::Created)
        }
    }
}

fn import_enrollment_row(conn: &Connection, row: &ImportRow) -> Result<RowStatus, String> {
    let student_no = require_columns(row, &["student_no"])?[0];
    let (scope, scope_id) = match (row.required("group_id"), row.required("class_id")) {
        (Some(g), None) => ("group", g),
        (None, Some(c)) => ("class", c),
        (None, None) => return Err("missing required column: group_id or class_id".into()),
        (Some(_), Some(_)) => return Err("only one of group_id or class_id may be set".into()),
    };
    let student_id: Option<String> = conn
        .query_row(
            "SELECT id FROM students WHERE student_no = ?",
            [student_no],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| e.to_string())?;
    let Some(student_id) = student_id else {
        return Err(format!("unknown student_no: {}", student_no));
    };
    if !roster_exists(conn, scope, scope_id).map_err(|e| e.message())? {
        return Err(format!("unknown {}: {}", scope, scope_id));
    }
    match enroll(conn, scope, scope_id, &student_id).map_err(|e| e.message())? {
        Enrolled::Created(_) => Ok(RowStatus::Created),
        Enrolled::Reactivated(_) => Ok(RowStatus::Updated),
        Enrolled::AlreadyActive => Ok(RowStatus::Skipped),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ErrorKind;

    fn api() -> LocalApi {
        LocalApi::in_memory().expect("in-memory workspace")
    }

    async fn seed_student(api: &LocalApi, no: &str, last: &str) -> String {
        let body = api
            .mutate(&Mutation::post(
                "students",
                json!({ "studentNo": no, "lastName": last, "firstName": "X" }),
            ))
            .await
            .expect("create student");
        body["id"].as_str().expect("id").to_string()
    }

    #[tokio::test]
    async fn second_enrollment_is_a_conflict() {
        let api = api();
        api.mutate(&Mutation::post("groups", json!({ "id": "g1", "name": "1A" })))
            .await
            .expect("group");
        let sid = seed_student(&api, "100", "Diaz").await;
        let enroll = Mutation::post("enrollments", json!({ "studentId": sid, "groupId": "g1" }));
        api.mutate(&enroll).await.expect("first enroll");
        let err = api.mutate(&enroll).await.expect_err("second enroll");
        assert_eq!(err.kind(), ErrorKind::ConflictSkip);
    }

    #[tokio::test]
    async fn missing_student_fields_report_every_message() {
        let err = api()
            .mutate(&Mutation::post("students", json!({ "studentNo": "1" })))
            .await
            .expect_err("invalid student");
        assert_eq!(err.message(), "lastName is required | firstName is required");
        assert_eq!(err.kind(), ErrorKind::ValidationFailure);
    }

    #[tokio::test]
    async fn dry_run_upload_leaves_no_trace() {
        let api = api();
        let file = UploadFile {
            file_name: "s.csv".into(),
            bytes: b"student_no,last_name,first_name\n1,Diaz,Ana\n2,,Luis\n".to_vec(),
        };
        let report = api
            .upload("imports/students", &file, true)
            .await
            .expect("dry run");
        assert!(report.dry_run);
        assert_eq!((report.total, report.created, report.failed), (2, 1, 1));
        assert_eq!(report.errors[0].row, 3);
        let students = api.fetch("students").await.expect("students");
        assert_eq!(students.as_array().map(Vec::len), Some(0));
    }

    #[tokio::test]
    async fn commit_matches_the_dry_run_classification() {
        let api = api();
        seed_student(&api, "1", "Diaz").await;
        let file = UploadFile {
            file_name: "s.csv".into(),
            bytes: b"student_no,last_name,first_name,email\n1,Diaz,X,\n2,Rojas,Ana,ana@x.cl\n3,Paz,Luz,bad\n"
                .to_vec(),
        };
        let dry = api.upload("imports/students", &file, true).await.expect("dry");
        let real = api.upload("imports/students", &file, false).await.expect("real");
        assert_eq!(
            (dry.created, dry.updated, dry.skipped, dry.failed),
            (real.created, real.updated, real.skipped, real.failed)
        );
        assert_eq!((real.created, real.skipped, real.failed), (1, 1, 1));
        assert!(!real.dry_run);
        let students = api.fetch("students").await.expect("students");
        assert_eq!(students.as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn deactivating_twice_is_a_conflict() {
        let api = api();
        api.mutate(&Mutation::post("groups", json!({ "id": "g1", "name": "1A" })))
            .await
            .expect("group");
        let sid = seed_student(&api, "7", "Soto").await;
        let created = api
            .mutate(&Mutation::post("enrollments", json!({ "studentId": sid, "groupId": "g1" })))
            .await
            .expect("enroll");
        let id = created["id"].as_str().expect("id").to_string();
        let off = Mutation::patch(format!("enrollments/{}", id), json!({ "active": false }));
        api.mutate(&off).await.expect("deactivate");
        let err = api.mutate(&off).await.expect_err("again");
        assert_eq!(err.kind(), ErrorKind::ConflictSkip);
    }

    #[tokio::test]
    async fn unsupported_entities_are_rejected() {
        let file = UploadFile {
            file_name: "t.csv".into(),
            bytes: b"name\nx\n".to_vec(),
        };
        let err = api()
            .upload("imports/teachers", &file, true)
            .await
            .expect_err("teachers");
        assert_eq!(err.kind(), ErrorKind::ValidationFailure);
    }

    #[test]
    fn segments_ignore_slashes_and_query() {
        assert_eq!(segments("/groups/g1/enrollments/?x=1"), vec!["groups", "g1", "enrollments"]);
    }
}
