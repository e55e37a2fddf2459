use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::candidates::{
    deactivate_candidates, enroll_candidates, plan_deactivate, plan_enroll, StudentFilter,
};
use super::report::{BatchReport, ReportHandle, ReportPublisher};
use super::{BatchError, WorkItem};
use crate::api::{ApiClient, ApiError, ErrorKind};
use crate::roster::{list_enrollments, list_students, Roster};
use crate::runner::{run_bounded, CancelFlag, RunOptions, TaskResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemResult {
    pub key: String,
    pub result: TaskResult,
}

/// Terminal report plus one result per settled item, in item order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRun {
    pub report: BatchReport,
    pub results: Vec<ItemResult>,
}

impl BatchRun {
    pub fn failed_keys(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| r.result.is_failed())
            .map(|r| r.key.as_str())
            .collect()
    }
}

/// Maps a mutation response onto a task outcome.
pub fn classify(response: Result<Value, ApiError>) -> TaskResult {
    match response {
        Ok(_) => TaskResult::Success,
        Err(e) if e.kind() == ErrorKind::ConflictSkip => TaskResult::SkippedConflict(e.message()),
        Err(e) => TaskResult::Failed(e.message()),
    }
}

#[derive(Clone)]
pub struct BatchOrchestrator {
    api: Arc<dyn ApiClient>,
    concurrency: usize,
}

impl BatchOrchestrator {
    pub fn new(api: Arc<dyn ApiClient>, concurrency: usize) -> Self {
        Self {
            api,
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Drops repeated keys, keeping the first occurrence.
    pub fn dedupe(items: Vec<WorkItem>) -> Vec<WorkItem> {
        let mut seen = HashSet::new();
        items
            .into_iter()
            .filter(|item| seen.insert(item.key.clone()))
            .collect()
    }

    /// Starts a run. The returned handle sees the report after every settled
    /// item; the future drives the run and must be awaited or spawned.
    pub fn start(
        &self,
        action: &str,
        items: Vec<WorkItem>,
        cancel: CancelFlag,
    ) -> (ReportHandle, BoxFuture<'static, BatchRun>) {
        let items = Self::dedupe(items);
        let batch_id = Uuid::new_v4().to_string();
        let (publisher, handle) =
            ReportPublisher::new(BatchReport::new(batch_id.clone(), action, items.len()));
        let api = Arc::clone(&self.api);
        let options = RunOptions {
            concurrency: self.concurrency,
            cancel: Some(cancel),
        };
        let action = action.to_string();

        let run = async move {
            info!(
                batch_id = %batch_id,
                action = %action,
                total = items.len(),
                concurrency = options.concurrency,
                "batch started"
            );
            let summary = run_bounded(
                &items,
                options,
                |_, item| {
                    let api = Arc::clone(&api);
                    let key = item.key.clone();
                    let mutation = item.mutation.clone();
                    async move {
                        let result = classify(api.mutate(&mutation).await);
                        match &result {
                            TaskResult::Failed(message) => {
                                warn!(key = %key, endpoint = %mutation.endpoint, error = %message, "batch item failed")
                            }
                            other => debug!(key = %key, ?other, "batch item settled"),
                        }
                        Ok::<_, Infallible>(result)
                    }
                },
                |_, result| publisher.record(result),
            )
            .await;

            if summary.cancelled {
                publisher.cancel();
            }
            let report = publisher.snapshot();
            info!(
                batch_id = %report.batch_id,
                processed = report.processed,
                succeeded = report.succeeded,
                skipped = report.skipped,
                failed = report.failed,
                state = ?report.state,
                "batch finished"
            );
            let results = summary
                .results
                .into_iter()
                .map(|(index, result)| ItemResult {
                    key: items[index].key.clone(),
                    result,
                })
                .collect();
            BatchRun { report, results }
        };

        (handle, run.boxed())
    }

    pub async fn run(&self, action: &str, items: Vec<WorkItem>) -> BatchRun {
        let (_handle, run) = self.start(action, items, CancelFlag::new());
        run.await
    }
}

fn require_roster(roster: &Roster) -> Result<(), BatchError> {
    if roster.id().trim().is_empty() {
        return Err(BatchError::Precondition(format!(
            "no {} selected",
            roster.payload_key().trim_end_matches("Id")
        )));
    }
    Ok(())
}

/// Loads current state and plans enrollments for every eligible student.
pub async fn prepare_enroll(
    api: &dyn ApiClient,
    roster: &Roster,
    filter: &StudentFilter,
) -> Result<Vec<WorkItem>, BatchError> {
    require_roster(roster)?;
    let students = list_students(api).await?;
    let enrollments = list_enrollments(api, roster).await?;
    let candidates = enroll_candidates(&students, &enrollments, filter);
    Ok(plan_enroll(roster, &candidates))
}

/// Loads current state and plans deactivation of the selected enrollments.
/// `None` selects every active enrollment of the roster.
pub async fn prepare_deactivate(
    api: &dyn ApiClient,
    roster: &Roster,
    selection: Option<&HashSet<String>>,
) -> Result<Vec<WorkItem>, BatchError> {
    require_roster(roster)?;
    let enrollments = list_enrollments(api, roster).await?;
    let candidates = deactivate_candidates(&enrollments, selection);
    Ok(plan_deactivate(&candidates))
}
