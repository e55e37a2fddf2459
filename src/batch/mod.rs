//! Batch mutation orchestration: candidate sets, work item planning,
//! outcome classification and live reports.

pub mod candidates;
pub mod conflict;
mod orchestrator;
pub mod report;

pub use candidates::{deactivate_candidates, enroll_candidates, StudentFilter};
pub use orchestrator::{
    classify, prepare_deactivate, prepare_enroll, BatchOrchestrator, BatchRun, ItemResult,
};
pub use report::{BatchReport, ReportHandle, RunState};

use crate::api::{ApiError, Mutation};

/// One unit of batch work. `key` is the stable identity of the target
/// record; a run never mutates the same key twice.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub key: String,
    pub mutation: Mutation,
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("{0}")]
    Precondition(String),

    #[error("failed to load candidates: {0}")]
    Api(#[from] ApiError),
}
