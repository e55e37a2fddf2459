//! Typed reads of the records bulk actions are computed from.

use serde::{Deserialize, Serialize};

use crate::api::{ApiClient, ApiError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    pub id: String,
    #[serde(default)]
    pub student_no: Option<String>,
    pub last_name: String,
    pub first_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub career_id: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentRecord {
    pub id: String,
    pub student_id: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

/// The group or class whose enrollments a bulk action targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "camelCase")]
pub enum Roster {
    Group(String),
    Class(String),
}

impl Roster {
    pub fn id(&self) -> &str {
        match self {
            Roster::Group(id) | Roster::Class(id) => id,
        }
    }

    /// Field name the backend expects in enrollment payloads.
    pub fn payload_key(&self) -> &'static str {
        match self {
            Roster::Group(_) => "groupId",
            Roster::Class(_) => "classId",
        }
    }

    pub fn enrollments_endpoint(&self) -> String {
        match self {
            Roster::Group(id) => format!("groups/{}/enrollments", id),
            Roster::Class(id) => format!("classes/{}/enrollments", id),
        }
    }
}

pub async fn list_students(api: &dyn ApiClient) -> Result<Vec<StudentRecord>, ApiError> {
    decode(api.fetch("students").await?)
}

pub async fn list_enrollments(
    api: &dyn ApiClient,
    roster: &Roster,
) -> Result<Vec<EnrollmentRecord>, ApiError> {
    decode(api.fetch(&roster.enrollments_endpoint()).await?)
}

/// List endpoints answer either a bare array or `{ data: [...] }`.
fn decode<T: for<'de> Deserialize<'de>>(body: serde_json::Value) -> Result<Vec<T>, ApiError> {
    let items = match body {
        serde_json::Value::Object(mut obj) if obj.contains_key("data") => {
            obj.remove("data").unwrap_or_default()
        }
        other => other,
    };
    serde_json::from_value(items).map_err(|e| ApiError::Decode {
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_accepts_bare_and_wrapped_lists() {
        let bare = json!([{ "id": "e1", "studentId": "s1" }]);
        let wrapped = json!({ "data": [{ "id": "e1", "studentId": "s1", "active": false }] });
        let a: Vec<EnrollmentRecord> = decode(bare).expect("bare");
        let b: Vec<EnrollmentRecord> = decode(wrapped).expect("wrapped");
        assert!(a[0].active);
        assert!(!b[0].active);
    }

    #[test]
    fn roster_endpoints() {
        assert_eq!(
            Roster::Group("g1".into()).enrollments_endpoint(),
            "groups/g1/enrollments"
        );
        assert_eq!(Roster::Class("c9".into()).payload_key(), "classId");
    }
}
