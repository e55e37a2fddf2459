use anyhow::Context;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::error::HandlerErr;
use crate::api::{ApiClient, ApiError, HttpApi, LocalApi};
use crate::batch::{BatchRun, ReportHandle};
use crate::config::Config;
use crate::import::ImportSession;
use crate::runner::CancelFlag;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// The backend every handler talks to.
pub struct Backend {
    /// "local" or "http".
    pub kind: &'static str,
    /// Workspace path or base URL.
    pub target: String,
    pub api: Arc<dyn ApiClient>,
}

/// A started batch. The run task is joined lazily, the first time someone
/// asks for per-item results.
pub struct BatchEntry {
    pub handle: ReportHandle,
    pub cancel: CancelFlag,
    task: Option<JoinHandle<BatchRun>>,
    run: Option<BatchRun>,
}

impl BatchEntry {
    pub fn new(handle: ReportHandle, cancel: CancelFlag, task: JoinHandle<BatchRun>) -> Self {
        Self {
            handle,
            cancel,
            task: Some(task),
            run: None,
        }
    }

    /// Blocks until the run is over and returns it.
    pub(crate) fn finish(&mut self, runtime: &Runtime) -> Result<&BatchRun, HandlerErr> {
        if let Some(task) = self.task.take() {
            let run = runtime
                .block_on(task)
                .map_err(|e| HandlerErr::new("batch_failed", format!("batch task ended abnormally: {}", e)))?;
            self.run = Some(run);
        }
        self.run
            .as_ref()
            .ok_or_else(|| HandlerErr::new("batch_failed", "batch result is unavailable"))
    }
}

/// Finished batches kept for `batch.status` and `batch.wait`. Older finished
/// entries are dropped as new batches start; running ones are never dropped.
pub(crate) const MAX_FINISHED_BATCHES: usize = 64;

pub struct AppState {
    pub config: Config,
    pub runtime: Runtime,
    pub workspace: Option<PathBuf>,
    pub backend: Option<Backend>,
    pub batches: HashMap<String, BatchEntry>,
    pub import: ImportSession,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("rosterd-worker")
            .build()
            .context("failed to start async runtime")?;
        let mut state = Self {
            config,
            runtime,
            workspace: None,
            backend: None,
            batches: HashMap::new(),
            import: ImportSession::new(),
        };

        if let Some(path) = state.config.workspace.clone() {
            state.open_workspace(&path)?;
        } else if let Some(base_url) = state.config.api_base_url.clone() {
            let token = state.config.api_token.clone();
            let timeout = state.config.request_timeout();
            state
                .connect_http(&base_url, token, timeout)
                .with_context(|| format!("failed to configure backend {}", base_url))?;
        }
        Ok(state)
    }

    pub fn open_workspace(&mut self, path: &Path) -> anyhow::Result<()> {
        let api = LocalApi::open(path)
            .with_context(|| format!("failed to open workspace {}", path.to_string_lossy()))?;
        self.workspace = Some(path.to_path_buf());
        self.set_backend(Backend {
            kind: "local",
            target: path.to_string_lossy().to_string(),
            api: Arc::new(api),
        });
        Ok(())
    }

    pub fn connect_http(
        &mut self,
        base_url: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<(), ApiError> {
        let api = HttpApi::new(base_url, token, timeout)?;
        self.set_backend(Backend {
            kind: "http",
            target: api.base_url().to_string(),
            api: Arc::new(api),
        });
        Ok(())
    }

    fn set_backend(&mut self, backend: Backend) {
        info!(kind = backend.kind, target = %backend.target, "backend selected");
        // Import reports belong to the backend that produced them.
        self.import.clear();
        self.backend = Some(backend);
    }

    pub(crate) fn api(&self) -> Result<Arc<dyn ApiClient>, HandlerErr> {
        self.backend
            .as_ref()
            .map(|b| Arc::clone(&b.api))
            .ok_or_else(|| {
                HandlerErr::new(
                    "no_backend",
                    "select a workspace or connect to a backend first",
                )
            })
    }

    /// Registers a started batch and evicts the oldest finished batches
    /// beyond [`MAX_FINISHED_BATCHES`].
    pub(crate) fn register_batch(&mut self, batch_id: String, entry: BatchEntry) {
        self.batches.insert(batch_id, entry);

        let mut finished: Vec<_> = self
            .batches
            .iter()
            .map(|(id, entry)| (id, entry.handle.snapshot()))
            .filter(|(_, report)| report.is_terminal())
            .map(|(id, report)| (report.started_at, id.clone()))
            .collect();
        if finished.len() <= MAX_FINISHED_BATCHES {
            return;
        }
        finished.sort();
        let excess = finished.len() - MAX_FINISHED_BATCHES;
        for (_, id) in finished.into_iter().take(excess) {
            debug!(batch_id = %id, "evicting finished batch");
            self.batches.remove(&id);
        }
    }

    /// Stops claiming new items in every running batch and waits for the
    /// items already claimed to settle.
    pub fn shutdown(&mut self) {
        for entry in self.batches.values() {
            entry.cancel.cancel();
        }
        let Self {
            batches, runtime, ..
        } = self;
        for (batch_id, entry) in batches.iter_mut() {
            if let Err(e) = entry.finish(runtime) {
                warn!(batch_id = %batch_id, error = %e.message, "batch did not settle");
            }
        }
    }
}
