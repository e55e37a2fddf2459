use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CONCURRENCY: usize = 5;

/// Startup configuration. Flags win over environment variables.
#[derive(Debug, Clone, Parser)]
#[command(name = "rosterd", version, about = "Batch mutation sidecar for the academic admin UI")]
pub struct Config {
    /// Local workspace directory to open on startup
    #[arg(long, env = "ROSTERD_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// REST backend base URL, e.g. https://api.example.edu/v1
    #[arg(long, env = "ROSTERD_API_BASE_URL")]
    pub api_base_url: Option<String>,

    /// Bearer token for the REST backend
    #[arg(long, env = "ROSTERD_API_TOKEN", hide_env_values = true)]
    pub api_token: Option<String>,

    /// Default number of in-flight mutations per batch
    #[arg(long, env = "ROSTERD_CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Per-request timeout for the REST backend
    #[arg(long, default_value_t = 30)]
    pub request_timeout_secs: u64,

    /// Emit logs as JSON lines on stderr
    #[arg(long)]
    pub log_json: bool,
}

impl Config {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: None,
            api_base_url: None,
            api_token: None,
            concurrency: DEFAULT_CONCURRENCY,
            request_timeout_secs: 30,
            log_json: false,
        }
    }
}
