use std::path::PathBuf;
use std::time::Duration;

/// Exponential backoff: `base * factor^attempt`, capped, for at most
/// `max_attempts` tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub factor: u32,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(250),
            factor: 2,
            cap: Duration::from_secs(5),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0 is the first retry).
    pub fn delay(&self, attempt: u32) -> Duration {
        let multiplier = self.factor.max(1).saturating_pow(attempt);
        self.base.saturating_mul(multiplier).min(self.cap)
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server root, e.g. `http://127.0.0.1:8000`.
    pub base_url: String,
    pub project_id: String,
    /// Where the local store snapshot lives. `None` keeps it in memory only.
    pub snapshot_path: Option<PathBuf>,
    pub retry: RetryPolicy,
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            project_id: project_id.into(),
            snapshot_path: None,
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_secs(1),
            max_poll_attempts: 60,
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }
}
