//! Bounded-concurrency task runner.
//!
//! Runs a worker over an ordered list of items with at most `concurrency`
//! in-flight calls. All lanes share one claim cursor, so every item is
//! claimed exactly once and claims happen in list order. The runner knows
//! nothing about the domain: it only converts worker errors and panics into
//! [`TaskResult::Failed`] so a single bad item never aborts the run.

use futures::future::join_all;
use futures::FutureExt;
use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Outcome of one work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "message", rename_all = "camelCase")]
pub enum TaskResult {
    Success,
    SkippedConflict(String),
    Failed(String),
}

impl TaskResult {
    pub fn is_failed(&self) -> bool {
        matches!(self, TaskResult::Failed(_))
    }
}

/// Cooperative cancellation, checked before each claim.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub concurrency: usize,
    pub cancel: Option<CancelFlag>,
}

impl RunOptions {
    pub fn with_concurrency(concurrency: usize) -> Self {
        Self {
            concurrency,
            cancel: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Settled results keyed by item index, ascending.
    pub results: Vec<(usize, TaskResult)>,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn processed(&self) -> usize {
        self.results.len()
    }
}

/// Number of lanes actually spawned for `len` items.
pub fn effective_concurrency(requested: usize, len: usize) -> usize {
    requested.max(1).min(len)
}

pub async fn run_bounded<I, W, Fut, E, S>(
    items: &[I],
    options: RunOptions,
    worker: W,
    on_settled: S,
) -> RunSummary
where
    W: Fn(usize, &I) -> Fut,
    Fut: Future<Output = Result<TaskResult, E>>,
    E: Display,
    S: Fn(usize, &TaskResult),
{
    let lanes = effective_concurrency(options.concurrency, items.len());
    if lanes == 0 {
        return RunSummary {
            results: Vec::new(),
            cancelled: false,
        };
    }

    let cursor = AtomicUsize::new(0);
    let cursor = &cursor;
    let worker = &worker;
    let on_settled = &on_settled;
    let cancel = options.cancel.as_ref();

    let lane_futures = (0..lanes).map(|_| async move {
        let mut settled = Vec::new();
        loop {
            if cancel.map(CancelFlag::is_cancelled).unwrap_or(false) {
                break;
            }
            let index = cursor.fetch_add(1, Ordering::SeqCst);
            let Some(item) = items.get(index) else {
                break;
            };
            let result = settle(async move { worker(index, item).await }).await;
            on_settled(index, &result);
            settled.push((index, result));
        }
        settled
    });

    let mut results: Vec<(usize, TaskResult)> =
        join_all(lane_futures).await.into_iter().flatten().collect();
    results.sort_by_key(|(index, _)| *index);

    let cancelled = results.len() < items.len();
    RunSummary { results, cancelled }
}

async fn settle<Fut, E>(fut: Fut) -> TaskResult
where
    Fut: Future<Output = Result<TaskResult, E>>,
    E: Display,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => TaskResult::Failed(e.to_string()),
        Err(panic) => TaskResult::Failed(format!("worker panicked: {}", panic_message(&*panic))),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
