use std::path::PathBuf;
use std::time::Duration;

/// Immutable supervisor settings, constructed once at registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    pub sessions_dir: PathBuf,
    pub workspaces_dir: PathBuf,
    /// Idle window consulted only by cleanup.
    pub session_idle_timeout: Duration,
    /// Authentication capability flag discovered by the host before
    /// registration; `start` refuses to run without it.
    pub auth_available: bool,
    /// Credential directory to materialize into new sessions, when present.
    pub credentials_source: Option<PathBuf>,
    /// Kill the job when the container produces no output at all within
    /// this window.
    pub startup_timeout: Duration,
    /// Kill the job when output stalls for this long after it began.
    pub idle_output_timeout: Duration,
    /// Stop appending past this many output bytes and flag truncation.
    pub max_output_bytes: u64,
    /// Tail length attached to status responses.
    pub status_tail_bytes: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            sessions_dir: PathBuf::from(".warden/sessions"),
            workspaces_dir: PathBuf::from(".warden/workspaces"),
            session_idle_timeout: Duration::from_secs(3_600),
            auth_available: false,
            credentials_source: None,
            startup_timeout: Duration::from_secs(120),
            idle_output_timeout: Duration::from_secs(600),
            max_output_bytes: 10 * 1024 * 1024,
            status_tail_bytes: 500,
        }
    }
}
