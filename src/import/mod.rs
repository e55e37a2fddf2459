//! File-based bulk import with a dry-run validation pass in front of the
//! committing pass.

pub mod csv;
pub mod export;
mod session;

pub use session::{ImportSession, SessionState};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::api::ApiError;

/// Entities the backend accepts imports for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ImportEntity {
    Students,
    Teachers,
    Subjects,
    Groups,
    Enrollments,
}

impl ImportEntity {
    pub const ALL: [ImportEntity; 5] = [
        ImportEntity::Students,
        ImportEntity::Teachers,
        ImportEntity::Subjects,
        ImportEntity::Groups,
        ImportEntity::Enrollments,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ImportEntity::Students => "students",
            ImportEntity::Teachers => "teachers",
            ImportEntity::Subjects => "subjects",
            ImportEntity::Groups => "groups",
            ImportEntity::Enrollments => "enrollments",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|e| e.as_str() == s)
    }

    pub fn endpoint(self) -> String {
        format!("imports/{}", self.as_str())
    }
}

/// One data line of an uploaded file. `row` is the 1-based line number in
/// the source file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportRow {
    pub row: usize,
    pub values: BTreeMap<String, String>,
}

impl ImportRow {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.values.get(column).map(String::as_str)
    }

    /// Trimmed, non-empty value of a column.
    pub fn required(&self, column: &str) -> Option<&str> {
        self.get(column).map(str::trim).filter(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowError {
    pub row: usize,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Wire shape of an import response. `dryRun` echoes the request flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub entity: String,
    pub dry_run: bool,
    pub total: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    #[serde(default)]
    pub errors: Vec<RowError>,
}

impl ImportReport {
    pub fn new(entity: ImportEntity, dry_run: bool) -> Self {
        Self {
            entity: entity.as_str().to_string(),
            dry_run,
            total: 0,
            created: 0,
            updated: 0,
            skipped: 0,
            failed: 0,
            errors: Vec::new(),
        }
    }

    pub fn record(&mut self, status: RowStatus) {
        self.total += 1;
        match status {
            RowStatus::Created => self.created += 1,
            RowStatus::Updated => self.updated += 1,
            RowStatus::Skipped => self.skipped += 1,
            RowStatus::Failed => self.failed += 1,
        }
    }

    pub fn record_failure(&mut self, row: usize, message: impl Into<String>, data: Option<Value>) {
        self.record(RowStatus::Failed);
        self.errors.push(RowError {
            row,
            message: message.into(),
            data,
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RowStatus {
    Created,
    Updated,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    pub row: usize,
    pub status: RowStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// One pass over one file for one entity.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRun {
    pub entity: ImportEntity,
    pub dry_run: bool,
    pub file_name: String,
    pub fingerprint: String,
    pub headers: Vec<String>,
    #[serde(skip)]
    pub rows: Vec<ImportRow>,
    pub report: ImportReport,
    pub outcomes: Vec<ImportOutcome>,
}

impl ImportRun {
    /// Builds the per-row failures from the report, filling missing row
    /// data from the parsed file.
    pub fn new(
        entity: ImportEntity,
        file_name: String,
        fingerprint: String,
        parsed: csv::ParsedFile,
        report: ImportReport,
    ) -> Self {
        let mut outcomes: Vec<ImportOutcome> = report
            .errors
            .iter()
            .map(|e| ImportOutcome {
                row: e.row,
                status: RowStatus::Failed,
                message: Some(e.message.clone()),
                data: e.data.clone().or_else(|| {
                    parsed
                        .rows
                        .iter()
                        .find(|r| r.row == e.row)
                        .and_then(|r| serde_json::to_value(&r.values).ok())
                }),
            })
            .collect();
        outcomes.sort_by_key(|o| o.row);
        Self {
            entity,
            dry_run: report.dry_run,
            file_name,
            fingerprint,
            headers: parsed.headers,
            rows: parsed.rows,
            report,
            outcomes,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.report.failed == 0
    }
}

pub fn fingerprint(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("no entity selected")]
    NoEntity,

    #[error("no file selected")]
    NoFile,

    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("commit rejected: {0}")]
    CommitRejected(String),

    #[error("an import pass is already running")]
    Busy,

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("unexpected import response: {0}")]
    Protocol(String),
}
