//! Candidate sets for bulk actions, computed from current state only. A
//! re-run recomputes these, which is the whole retry story: anything that
//! already succeeded is no longer a candidate.

use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;

use super::WorkItem;
use crate::api::Mutation;
use crate::roster::{EnrollmentRecord, Roster, StudentRecord};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentFilter {
    /// Substring over "last, first" and student number.
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub career_id: Option<String>,
    #[serde(default)]
    pub include_inactive: bool,
}

impl StudentFilter {
    pub fn matches(&self, s: &StudentRecord) -> bool {
        if !self.include_inactive && !s.active {
            return false;
        }
        if let Some(career) = self.career_id.as_deref() {
            if s.career_id.as_deref() != Some(career) {
                return false;
            }
        }
        match self.query.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(q) => {
                let q = q.to_lowercase();
                let name = format!("{}, {}", s.last_name, s.first_name).to_lowercase();
                name.contains(&q)
                    || s
                        .student_no
                        .as_deref()
                        .map(|n| n.to_lowercase().contains(&q))
                        .unwrap_or(false)
            }
        }
    }
}

/// Filtered students with no active enrollment in the roster.
pub fn enroll_candidates<'a>(
    students: &'a [StudentRecord],
    enrollments: &[EnrollmentRecord],
    filter: &StudentFilter,
) -> Vec<&'a StudentRecord> {
    let enrolled: HashSet<&str> = enrollments
        .iter()
        .filter(|e| e.active)
        .map(|e| e.student_id.as_str())
        .collect();
    let mut seen: HashSet<String> = HashSet::new();
    let mut out: Vec<&StudentRecord> = students
        .iter()
        .filter(|s| filter.matches(s))
        .filter(|s| !enrolled.contains(s.id.as_str()))
        .filter(|s| seen.insert(s.id.clone()))
        .collect();
    out.sort_by(|a, b| {
        (a.last_name.to_lowercase(), a.first_name.to_lowercase(), &a.id).cmp(&(
            b.last_name.to_lowercase(),
            b.first_name.to_lowercase(),
            &b.id,
        ))
    });
    out
}

/// Selected enrollments that are still active, in roster order. No selection
/// means every active enrollment; an empty one means none.
pub fn deactivate_candidates<'a>(
    enrollments: &'a [EnrollmentRecord],
    selection: Option<&HashSet<String>>,
) -> Vec<&'a EnrollmentRecord> {
    let mut seen: HashSet<String> = HashSet::new();
    enrollments
        .iter()
        .filter(|e| e.active)
        .filter(|e| selection.map_or(true, |ids| ids.contains(&e.id)))
        .filter(|e| seen.insert(e.id.clone()))
        .collect()
}

pub fn plan_enroll(roster: &Roster, students: &[&StudentRecord]) -> Vec<WorkItem> {
    students
        .iter()
        .map(|s| {
            let mut payload = json!({ "studentId": s.id });
            payload[roster.payload_key()] = json!(roster.id());
            WorkItem {
                key: s.id.clone(),
                mutation: Mutation::post("enrollments", payload),
            }
        })
        .collect()
}

pub fn plan_deactivate(enrollments: &[&EnrollmentRecord]) -> Vec<WorkItem> {
    enrollments
        .iter()
        .map(|e| WorkItem {
            key: e.id.clone(),
            mutation: Mutation::patch(format!("enrollments/{}", e.id), json!({ "active": false })),
        })
        .collect()
}
