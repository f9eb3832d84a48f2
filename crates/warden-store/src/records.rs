use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub(crate) const SESSION_SCHEMA_VERSION: u32 = 1;
pub(crate) const JOB_SCHEMA_VERSION: u32 = 1;

pub(crate) fn session_schema_version() -> u32 {
    SESSION_SCHEMA_VERSION
}

pub(crate) fn job_schema_version() -> u32 {
    JOB_SCHEMA_VERSION
}

/// Enumerates the lifecycle states for persisted jobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job record exists but the container has not confirmed start.
    Pending,
    /// Container started; a watcher owns the job.
    Running,
    /// Container exited cleanly with no terminal signal.
    Completed,
    /// Container exited with an error or a terminal signal was seen.
    Failed,
    /// The job was cancelled by an explicit request.
    Cancelled,
}

impl JobStatus {
    /// Returns the stable snake_case wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns true when the job cannot transition any further.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns true for states that hold the session's active-job slot.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

/// Stable failure taxonomy surfaced in terminal job records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    /// No output within the configured startup window.
    StartupTimeout,
    /// No output within the configured idle window during execution.
    IdleTimeout,
    /// Container was killed by the kernel OOM path (exit 137).
    Oom,
    /// Non-zero exit without a more specific kind.
    Crash,
    /// The runtime could not create the container at all.
    SpawnFailed,
    /// The transcript carried a rate-limit terminal signal.
    RateLimit,
    /// The transcript reported an expired OAuth token.
    AuthTokenExpired,
    /// The transcript reported an authentication failure.
    AuthFailed,
}

impl JobErrorKind {
    /// Returns the stable snake_case wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StartupTimeout => "startup_timeout",
            Self::IdleTimeout => "idle_timeout",
            Self::Oom => "oom",
            Self::Crash => "crash",
            Self::SpawnFailed => "spawn_failed",
            Self::RateLimit => "rate_limit",
            Self::AuthTokenExpired => "auth_token_expired",
            Self::AuthFailed => "auth_failed",
        }
    }
}

/// Point-in-time container resource usage attached to status responses and
/// snapshotted into the job record while it runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContainerMetrics {
    #[serde(default)]
    pub mem_mb: Option<f64>,
    #[serde(default)]
    pub mem_limit_mb: Option<f64>,
    #[serde(default)]
    pub mem_pct: Option<f64>,
    #[serde(default)]
    pub cpu_pct: Option<f64>,
}

/// Durable per-session envelope persisted as `session.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionRecord {
    #[serde(default = "session_schema_version")]
    pub schema_version: u32,
    pub session_key: String,
    #[serde(default)]
    pub assistant_session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default)]
    pub active_job_id: Option<String>,
}

/// Durable per-job manifest persisted as `jobs/<jobId>.json`.
///
/// `output_size` and the last-output instant are intentionally absent: both
/// derive from the output file's metadata so that the hot append path never
/// contends on this record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    #[serde(default = "job_schema_version")]
    pub schema_version: u32,
    pub job_id: String,
    pub session_key: String,
    pub container_name: String,
    pub status: JobStatus,
    pub prompt: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub exit_code: Option<i64>,
    #[serde(default)]
    pub error_kind: Option<JobErrorKind>,
    #[serde(default)]
    pub error_message: Option<String>,
    pub output_file: PathBuf,
    #[serde(default)]
    pub output_truncated: bool,
    #[serde(default)]
    pub metrics: Option<ContainerMetrics>,
}

impl JobRecord {
    /// Seconds from start (falling back to creation) to completion or `now`.
    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> i64 {
        let begin = self.started_at.unwrap_or(self.created_at);
        let end = self.completed_at.unwrap_or(now);
        (end - begin).num_seconds().max(0)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn unit_job_status_terminal_and_active_partition() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_ne!(status.is_terminal(), status.is_active());
        }
    }

    #[test]
    fn unit_status_and_error_kind_wire_names_are_snake_case() {
        assert_eq!(JobStatus::Cancelled.as_str(), "cancelled");
        assert_eq!(JobErrorKind::AuthTokenExpired.as_str(), "auth_token_expired");
        let encoded = serde_json::to_string(&JobErrorKind::RateLimit).expect("encode");
        assert_eq!(encoded, "\"rate_limit\"");
    }

    #[test]
    fn unit_elapsed_seconds_prefers_started_and_completed_bounds() {
        let created = Utc.with_ymd_and_hms(2024, 5, 14, 10, 0, 0).single().unwrap();
        let started = Utc.with_ymd_and_hms(2024, 5, 14, 10, 0, 30).single().unwrap();
        let completed = Utc.with_ymd_and_hms(2024, 5, 14, 10, 2, 30).single().unwrap();
        let record = JobRecord {
            schema_version: JOB_SCHEMA_VERSION,
            job_id: "job".to_string(),
            session_key: "s".to_string(),
            container_name: "claude-s".to_string(),
            status: JobStatus::Completed,
            prompt: "hello".to_string(),
            created_at: created,
            started_at: Some(started),
            completed_at: Some(completed),
            exit_code: Some(0),
            error_kind: None,
            error_message: None,
            output_file: std::path::PathBuf::from("/tmp/out.log"),
            output_truncated: false,
            metrics: None,
        };
        let now = Utc.with_ymd_and_hms(2024, 5, 14, 11, 0, 0).single().unwrap();
        assert_eq!(record.elapsed_seconds(now), 120);
    }

    #[test]
    fn regression_job_record_decodes_with_missing_optional_fields() {
        let raw = r#"{
            "job_id": "j1",
            "session_key": "s1",
            "container_name": "claude-s1",
            "status": "running",
            "prompt": "hi",
            "created_at": "2024-05-14T10:00:00Z",
            "output_file": "/tmp/j1.log"
        }"#;
        let record: JobRecord = serde_json::from_str(raw).expect("decode");
        assert_eq!(record.schema_version, JOB_SCHEMA_VERSION);
        assert_eq!(record.status, JobStatus::Running);
        assert!(record.started_at.is_none());
        assert!(!record.output_truncated);
    }
}
