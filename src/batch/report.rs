use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::runner::TaskResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RunState {
    Running,
    Completed,
    Cancelled,
}

/// Live aggregate counters for one batch run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub batch_id: String,
    pub action: String,
    pub total: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub last_error: Option<String>,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BatchReport {
    pub fn new(batch_id: impl Into<String>, action: impl Into<String>, total: usize) -> Self {
        let mut report = Self {
            batch_id: batch_id.into(),
            action: action.into(),
            total,
            processed: 0,
            succeeded: 0,
            skipped: 0,
            failed: 0,
            last_error: None,
            state: RunState::Running,
            started_at: Utc::now(),
            finished_at: None,
        };
        if total == 0 {
            report.complete(RunState::Completed);
        }
        report
    }

    /// The only way counters change. Ignored once the report is terminal.
    pub fn record(&mut self, result: &TaskResult) {
        if self.is_terminal() {
            return;
        }
        match result {
            TaskResult::Success => self.succeeded += 1,
            TaskResult::SkippedConflict(_) => self.skipped += 1,
            TaskResult::Failed(message) => {
                self.failed += 1;
                self.last_error = Some(message.clone());
            }
        }
        self.processed += 1;
        if self.processed >= self.total {
            self.complete(RunState::Completed);
        }
    }

    /// Marks a run that stopped claiming before reaching `total`.
    pub fn cancel(&mut self) {
        if !self.is_terminal() {
            self.complete(RunState::Cancelled);
        }
    }

    fn complete(&mut self, state: RunState) {
        self.state = state;
        self.finished_at = Some(Utc::now());
    }

    pub fn is_terminal(&self) -> bool {
        self.state != RunState::Running
    }

    pub fn is_consistent(&self) -> bool {
        self.processed == self.succeeded + self.skipped + self.failed && self.processed <= self.total
    }
}

/// Owning side of a published report. Workers call [`ReportPublisher::record`]
/// after every settled item; subscribers see each step.
#[derive(Debug)]
pub struct ReportPublisher {
    tx: watch::Sender<BatchReport>,
}

impl ReportPublisher {
    pub fn new(report: BatchReport) -> (Self, ReportHandle) {
        let (tx, rx) = watch::channel(report);
        (Self { tx }, ReportHandle { rx })
    }

    pub fn record(&self, result: &TaskResult) {
        self.tx.send_modify(|report| report.record(result));
    }

    pub fn cancel(&self) {
        self.tx.send_modify(BatchReport::cancel);
    }

    pub fn snapshot(&self) -> BatchReport {
        self.tx.borrow().clone()
    }
}

/// Read side, cheap to clone. Used for polling and for waiting on the end.
#[derive(Debug, Clone)]
pub struct ReportHandle {
    rx: watch::Receiver<BatchReport>,
}

impl ReportHandle {
    pub fn snapshot(&self) -> BatchReport {
        self.rx.borrow().clone()
    }

    /// Resolves with the terminal report. If the publisher is dropped early
    /// the last published state is returned as is.
    pub async fn wait(&mut self) -> BatchReport {
        let done = match self.rx.wait_for(BatchReport::is_terminal).await {
            Ok(report) => Some(report.clone()),
            Err(_) => None,
        };
        done.unwrap_or_else(|| self.rx.borrow().clone())
    }

    pub async fn changed(&mut self) -> Option<BatchReport> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}
