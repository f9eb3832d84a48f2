use serde::Serialize;

use warden_store::{ContainerMetrics, JobErrorKind, JobStatus};

const ACTIVITY_RECENT_OUTPUT_SECONDS: u64 = 10;
const ACTIVITY_CPU_BUSY_PCT: f64 = 20.0;

/// Result of a successful `start`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StartReceipt {
    pub job_id: String,
    pub session_key: String,
    pub status: JobStatus,
}

/// Coarse liveness signal derived from output recency and cpu usage.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivityState {
    /// The output log grew within the last few seconds.
    Active,
    /// No recent output but the container is burning cpu.
    Processing,
    Idle,
}

impl ActivityState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Processing => "processing",
            Self::Idle => "idle",
        }
    }
}

/// Derives the activity state from the output log's age and cpu usage.
pub(crate) fn derive_activity_state(
    last_output_seconds_ago: Option<u64>,
    metrics: Option<&ContainerMetrics>,
) -> ActivityState {
    if last_output_seconds_ago
        .is_some_and(|seconds| seconds <= ACTIVITY_RECENT_OUTPUT_SECONDS)
    {
        return ActivityState::Active;
    }
    if metrics
        .and_then(|metrics| metrics.cpu_pct)
        .is_some_and(|cpu| cpu > ACTIVITY_CPU_BUSY_PCT)
    {
        return ActivityState::Processing;
    }
    ActivityState::Idle
}

/// Inspection record returned by `status`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatusReport {
    pub job_id: String,
    pub session_key: String,
    pub status: JobStatus,
    pub elapsed_seconds: i64,
    pub output_size: u64,
    pub last_output_seconds_ago: Option<u64>,
    pub activity_state: ActivityState,
    pub tail_output: String,
    pub exit_code: Option<i64>,
    pub error_kind: Option<JobErrorKind>,
    pub error_message: Option<String>,
    pub metrics: Option<ContainerMetrics>,
}

/// Result of a `cancel` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled { job_id: String },
    /// The job had already finished; cancelling is a no-op.
    AlreadyTerminal { job_id: String, status: JobStatus },
    NotFound { job_id: String },
}

impl CancelOutcome {
    /// Text confirmation for the tool surface.
    pub fn describe(&self) -> String {
        match self {
            Self::Cancelled { job_id } => format!("job {job_id} cancelled"),
            Self::AlreadyTerminal { job_id, status } => {
                format!("job {job_id} already {}", status.as_str())
            }
            Self::NotFound { job_id } => format!("job {job_id} not found"),
        }
    }
}

/// One page of raw job output plus its descriptive header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPage {
    pub job_id: String,
    pub status: JobStatus,
    pub offset: u64,
    pub size: u64,
    pub total_size: u64,
    pub has_more: bool,
    pub content: Vec<u8>,
}

impl OutputPage {
    /// Renders the single header line followed by the raw bytes.
    pub fn render(&self) -> String {
        let end = self.offset + self.size;
        format!(
            "job {} status={} bytes {}-{}/{} more={}\n{}",
            self.job_id,
            self.status.as_str(),
            self.offset,
            end,
            self.total_size,
            self.has_more,
            String::from_utf8_lossy(&self.content)
        )
    }
}

/// Result of a `cleanup` request.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: Vec<String>,
    pub workspaces_deleted: bool,
}

impl CleanupReport {
    /// Text confirmation for the tool surface.
    pub fn describe(&self) -> String {
        if self.removed.is_empty() {
            return "no idle sessions".to_string();
        }
        format!(
            "removed {} idle session(s): {}",
            self.removed.len(),
            self.removed.join(", ")
        )
    }
}

/// Compact view of a session's active job.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ActiveJobSummary {
    pub job_id: String,
    pub status: JobStatus,
    pub elapsed_seconds: i64,
}

/// Enriched session record returned by `sessions`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionSummary {
    pub session_key: String,
    pub age_seconds: i64,
    pub time_since_active_seconds: i64,
    pub message_count: u64,
    pub assistant_session_id: Option<String>,
    pub active_job: Option<ActiveJobSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_activity_state_prefers_recent_output() {
        let busy = ContainerMetrics {
            cpu_pct: Some(80.0),
            ..ContainerMetrics::default()
        };
        assert_eq!(
            derive_activity_state(Some(3), Some(&busy)),
            ActivityState::Active
        );
        assert_eq!(
            derive_activity_state(Some(30), Some(&busy)),
            ActivityState::Processing
        );
        assert_eq!(derive_activity_state(Some(30), None), ActivityState::Idle);
        assert_eq!(derive_activity_state(None, None), ActivityState::Idle);

        let lazy = ContainerMetrics {
            cpu_pct: Some(5.0),
            ..ContainerMetrics::default()
        };
        assert_eq!(
            derive_activity_state(Some(30), Some(&lazy)),
            ActivityState::Idle
        );
    }

    #[test]
    fn unit_output_page_render_carries_byte_range_header() {
        let page = OutputPage {
            job_id: "job-1".to_string(),
            status: JobStatus::Running,
            offset: 4,
            size: 5,
            total_size: 20,
            has_more: true,
            content: b"hello".to_vec(),
        };
        let rendered = page.render();
        assert!(rendered.starts_with("job job-1 status=running bytes 4-9/20 more=true\n"));
        assert!(rendered.ends_with("hello"));
    }

    #[test]
    fn unit_cleanup_report_describe_covers_empty_and_busy() {
        let empty = CleanupReport {
            removed: Vec::new(),
            workspaces_deleted: false,
        };
        assert_eq!(empty.describe(), "no idle sessions");

        let busy = CleanupReport {
            removed: vec!["alpha".to_string(), "beta".to_string()],
            workspaces_deleted: true,
        };
        assert!(busy.describe().contains("2 idle session(s)"));
    }
}
