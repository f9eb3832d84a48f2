//! Durable persistence for sessions, jobs, and append-only output logs.
//!
//! The store exclusively owns the on-disk layout:
//!
//! ```text
//! <sessions_dir>/<session_key>/session.json
//! <sessions_dir>/<session_key>/.claude/          credential sink (opaque)
//! <sessions_dir>/<session_key>/jobs/<job_id>.json
//! <sessions_dir>/<session_key>/jobs/<job_id>.log
//! <workspaces_dir>/<session_key>/                workspace (opaque)
//! ```
//!
//! Session and job records are pretty-printed JSON written with temp-file +
//! atomic rename so concurrent readers always observe a point-in-time
//! snapshot. Output logs are plain appends; readers tolerate growth.

pub mod records;

use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use warden_core::{append_bytes, write_text_atomic};

pub use records::{
    ContainerMetrics, JobErrorKind, JobRecord, JobStatus, SessionRecord,
};

const SESSION_RECORD_FILE: &str = "session.json";
const SESSION_JOBS_DIR: &str = "jobs";
const SESSION_CREDENTIALS_DIR: &str = ".claude";
const JOB_RECORD_READ_ATTEMPTS: u32 = 3;
const JOB_RECORD_RETRY_BASE_MS: u64 = 50;

/// Default byte budget for a single `read_job_output` call.
pub const DEFAULT_OUTPUT_READ_LIMIT: u64 = 64 * 1024;

/// A bounded slice of a job's output log.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OutputChunk {
    pub content: Vec<u8>,
    /// Bytes actually read (may be less than the requested limit).
    pub size: u64,
    pub total_size: u64,
    pub has_more: bool,
}

/// The trailing portion of a job's output log.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OutputTail {
    pub tail: String,
    /// Seconds since the log last grew, from the file's mtime.
    pub last_output_seconds_ago: Option<u64>,
    pub total_size: u64,
}

/// Configuration for one store root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub sessions_dir: PathBuf,
    pub workspaces_dir: PathBuf,
    pub session_idle_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sessions_dir: PathBuf::from(".warden/sessions"),
            workspaces_dir: PathBuf::from(".warden/workspaces"),
            session_idle_timeout: Duration::from_secs(3_600),
        }
    }
}

/// Filesystem-backed persistence for sessions and jobs.
#[derive(Debug, Clone)]
pub struct Store {
    config: StoreConfig,
}

impl Store {
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }

    pub fn sessions_dir(&self) -> &Path {
        self.config.sessions_dir.as_path()
    }

    pub fn workspaces_dir(&self) -> &Path {
        self.config.workspaces_dir.as_path()
    }

    pub fn session_idle_timeout(&self) -> Duration {
        self.config.session_idle_timeout
    }

    /// Returns the workspace directory for a session (not created).
    pub fn workspace_path(&self, session_key: &str) -> PathBuf {
        self.config.workspaces_dir.join(session_key)
    }

    /// Creates the workspace directory if missing and returns its path.
    pub fn ensure_workspace(&self, session_key: &str) -> Result<PathBuf> {
        let path = self.workspace_path(session_key);
        std::fs::create_dir_all(&path)
            .with_context(|| format!("failed to create workspace {}", path.display()))?;
        Ok(path)
    }

    /// Returns the credential sink directory for a session (not created).
    pub fn credentials_path(&self, session_key: &str) -> PathBuf {
        self.session_dir(session_key).join(SESSION_CREDENTIALS_DIR)
    }

    pub async fn get_session(&self, session_key: &str) -> Result<Option<SessionRecord>> {
        validate_session_key(session_key)?;
        read_session_record(&self.session_record_path(session_key))
    }

    /// Creates the session layout and writes a fresh record. Directory
    /// creation is idempotent; the record is always rewritten.
    pub async fn create_session(&self, session_key: &str) -> Result<SessionRecord> {
        validate_session_key(session_key)?;
        let session_dir = self.session_dir(session_key);
        std::fs::create_dir_all(session_dir.join(SESSION_JOBS_DIR))
            .with_context(|| format!("failed to create {}", session_dir.display()))?;

        let now = Utc::now();
        let record = SessionRecord {
            schema_version: records::SESSION_SCHEMA_VERSION,
            session_key: session_key.to_string(),
            assistant_session_id: None,
            created_at: now,
            last_activity: now,
            message_count: 0,
            active_job_id: None,
        };
        write_session_record(&self.session_record_path(session_key), &record)?;
        Ok(record)
    }

    pub async fn get_or_create_session(&self, session_key: &str) -> Result<SessionRecord> {
        if let Some(existing) = self.get_session(session_key).await? {
            return Ok(existing);
        }
        self.create_session(session_key).await
    }

    /// Bumps activity, increments the message counter, and records the
    /// assistant's resume handle when one is supplied.
    pub async fn update_session(
        &self,
        session_key: &str,
        assistant_session_id: Option<String>,
    ) -> Result<SessionRecord> {
        let mut record = self
            .get_session(session_key)
            .await?
            .ok_or_else(|| anyhow!("session '{session_key}' was not found"))?;
        if let Some(handle) = assistant_session_id {
            record.assistant_session_id = Some(handle);
        }
        record.last_activity = record.last_activity.max(Utc::now());
        record.message_count = record.message_count.saturating_add(1);
        write_session_record(&self.session_record_path(session_key), &record)?;
        Ok(record)
    }

    /// Sets or clears the session's active-job pointer.
    ///
    /// Setting fails fast when another job already holds the slot; only the
    /// holder (watcher, cancel, or self-healing status) clears it to null.
    pub async fn set_active_job(
        &self,
        session_key: &str,
        job_id: Option<&str>,
    ) -> Result<SessionRecord> {
        let mut record = self
            .get_session(session_key)
            .await?
            .ok_or_else(|| anyhow!("session '{session_key}' was not found"))?;
        match job_id {
            Some(new_job_id) => {
                if let Some(existing) = record.active_job_id.as_deref() {
                    if existing != new_job_id {
                        bail!(
                            "session '{session_key}' already has an active job '{existing}'"
                        );
                    }
                }
                record.active_job_id = Some(new_job_id.to_string());
            }
            None => {
                record.active_job_id = None;
            }
        }
        record.last_activity = record.last_activity.max(Utc::now());
        write_session_record(&self.session_record_path(session_key), &record)?;
        Ok(record)
    }

    /// Best-effort recursive removal of the session subtree. Errors are
    /// logged, never raised. The workspace is untouched.
    pub async fn delete_session(&self, session_key: &str) {
        let session_dir = self.session_dir(session_key);
        if let Err(error) = std::fs::remove_dir_all(&session_dir) {
            if error.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    "failed to delete session '{}' at {}: {error}",
                    session_key,
                    session_dir.display()
                );
            }
        }
    }

    /// Best-effort removal of the session's workspace. Deliberately separate
    /// from `delete_session`: the workspace holds user code.
    pub async fn delete_workspace(&self, session_key: &str) {
        let workspace = self.workspace_path(session_key);
        if let Err(error) = std::fs::remove_dir_all(&workspace) {
            if error.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    "failed to delete workspace '{}' at {}: {error}",
                    session_key,
                    workspace.display()
                );
            }
        }
    }

    /// Lists sessions, tolerating a missing root and skipping entries that
    /// cannot be read or parsed.
    pub async fn list_sessions(&self) -> Result<Vec<SessionRecord>> {
        let root = self.sessions_dir();
        if !root.exists() {
            return Ok(Vec::new());
        }
        let mut sessions = Vec::new();
        let entries = std::fs::read_dir(root)
            .with_context(|| format!("failed to read {}", root.display()))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            match read_session_record(&path.join(SESSION_RECORD_FILE)) {
                Ok(Some(record)) => sessions.push(record),
                Ok(None) => {}
                Err(error) => {
                    tracing::debug!("skipping unreadable session at {}: {error}", path.display());
                }
            }
        }
        sessions.sort_by(|left, right| left.session_key.cmp(&right.session_key));
        Ok(sessions)
    }

    /// Deletes sessions idle past the configured cutoff and returns their
    /// keys. Sessions holding an active job are left alone.
    pub async fn cleanup_idle_sessions(&self) -> Result<Vec<String>> {
        let now = Utc::now();
        let cutoff = chrono::Duration::from_std(self.config.session_idle_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(i64::MAX / 1_000));
        let mut removed = Vec::new();
        for session in self.list_sessions().await? {
            if session.active_job_id.is_some() {
                continue;
            }
            if now - session.last_activity > cutoff {
                self.delete_session(&session.session_key).await;
                removed.push(session.session_key);
            }
        }
        removed.sort();
        Ok(removed)
    }

    /// Allocates a fresh job id, writes the pending manifest, and creates the
    /// empty output log. Fails when the session is absent.
    pub async fn create_job(
        &self,
        session_key: &str,
        prompt: &str,
        container_name: &str,
    ) -> Result<JobRecord> {
        if self.get_session(session_key).await?.is_none() {
            bail!("session '{session_key}' was not found");
        }
        let job_id = Uuid::new_v4().to_string();
        let output_file = self.job_output_path(session_key, &job_id);
        let record = JobRecord {
            schema_version: records::JOB_SCHEMA_VERSION,
            job_id: job_id.clone(),
            session_key: session_key.to_string(),
            container_name: container_name.to_string(),
            status: JobStatus::Pending,
            prompt: prompt.to_string(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            exit_code: None,
            error_kind: None,
            error_message: None,
            output_file: output_file.clone(),
            output_truncated: false,
            metrics: None,
        };
        write_job_record(&self.job_record_path(session_key, &job_id), &record)?;
        if !output_file.exists() {
            std::fs::File::create(&output_file)
                .with_context(|| format!("failed to create {}", output_file.display()))?;
        }
        Ok(record)
    }

    /// Loads a job record, tolerating concurrent atomic rewrites.
    ///
    /// An empty or unparseable file is retried with increasing backoff
    /// before the failure surfaces; `None` means the record definitively
    /// does not exist.
    pub async fn get_job(&self, session_key: &str, job_id: &str) -> Result<Option<JobRecord>> {
        let path = self.job_record_path(session_key, job_id);
        let mut last_error: Option<anyhow::Error> = None;
        for attempt in 1..=JOB_RECORD_READ_ATTEMPTS {
            if !path.exists() {
                return Ok(None);
            }
            match read_job_record_once(&path) {
                Ok(record) => return Ok(Some(record)),
                Err(error) => {
                    last_error = Some(error);
                    if attempt < JOB_RECORD_READ_ATTEMPTS {
                        tokio::time::sleep(Duration::from_millis(
                            JOB_RECORD_RETRY_BASE_MS * u64::from(attempt),
                        ))
                        .await;
                    }
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| anyhow!("failed to read job record {}", path.display())))
    }

    /// Read-modify-write of a job record behind an atomic rename. The final
    /// writer's record wins; callers enforcing status monotonicity re-check
    /// inside `mutate` against the freshly-read state.
    pub async fn update_job<F>(
        &self,
        session_key: &str,
        job_id: &str,
        mutate: F,
    ) -> Result<JobRecord>
    where
        F: FnOnce(&mut JobRecord),
    {
        let mut record = self
            .get_job(session_key, job_id)
            .await?
            .ok_or_else(|| anyhow!("job '{job_id}' was not found in session '{session_key}'"))?;
        mutate(&mut record);
        write_job_record(&self.job_record_path(session_key, job_id), &record)?;
        Ok(record)
    }

    /// Lists a session's jobs, tolerating a missing directory and skipping
    /// records that stay unreadable after retries.
    pub async fn list_jobs(&self, session_key: &str) -> Result<Vec<JobRecord>> {
        let dir = self.jobs_dir(session_key);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut jobs = Vec::new();
        let entries =
            std::fs::read_dir(&dir).with_context(|| format!("failed to read {}", dir.display()))?;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_json = path
                .extension()
                .and_then(|value| value.to_str())
                .map(|value| value.eq_ignore_ascii_case("json"))
                .unwrap_or(false);
            if !path.is_file() || !is_json {
                continue;
            }
            let Some(job_id) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            match self.get_job(session_key, job_id).await {
                Ok(Some(record)) => jobs.push(record),
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!("skipping unreadable job record {}: {error}", path.display());
                }
            }
        }
        jobs.sort_by(|left, right| {
            left.created_at
                .cmp(&right.created_at)
                .then_with(|| left.job_id.cmp(&right.job_id))
        });
        Ok(jobs)
    }

    /// Resolves the session's active-job pointer to its record.
    pub async fn get_active_job(&self, session_key: &str) -> Result<Option<JobRecord>> {
        let Some(session) = self.get_session(session_key).await? else {
            return Ok(None);
        };
        let Some(job_id) = session.active_job_id else {
            return Ok(None);
        };
        self.get_job(session_key, &job_id).await
    }

    /// Appends bytes to the job's output log without touching the job
    /// record; the log's mtime is the authoritative last-output instant.
    pub async fn append_job_output(
        &self,
        session_key: &str,
        job_id: &str,
        bytes: &[u8],
    ) -> Result<()> {
        append_bytes(&self.job_output_path(session_key, job_id), bytes)
    }

    /// Current size of the job's output log in bytes (zero when absent).
    pub async fn output_size(&self, session_key: &str, job_id: &str) -> u64 {
        std::fs::metadata(self.job_output_path(session_key, job_id))
            .map(|metadata| metadata.len())
            .unwrap_or(0)
    }

    /// Seconds since the output log last grew, from its mtime.
    pub async fn last_output_seconds_ago(
        &self,
        session_key: &str,
        job_id: &str,
    ) -> Option<u64> {
        let metadata = std::fs::metadata(self.job_output_path(session_key, job_id)).ok()?;
        let modified = metadata.modified().ok()?;
        modified.elapsed().ok().map(|elapsed| elapsed.as_secs())
    }

    /// Reads at most `limit` bytes from `offset`. Returns an empty chunk
    /// when the offset is at or past the end of the log.
    pub async fn read_job_output(
        &self,
        session_key: &str,
        job_id: &str,
        offset: u64,
        limit: u64,
    ) -> Result<OutputChunk> {
        let path = self.job_output_path(session_key, job_id);
        let total_size = std::fs::metadata(&path)
            .map(|metadata| metadata.len())
            .unwrap_or(0);
        if offset >= total_size || limit == 0 {
            return Ok(OutputChunk {
                content: Vec::new(),
                size: 0,
                total_size,
                has_more: false,
            });
        }

        let mut file = std::fs::File::open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        file.seek(SeekFrom::Start(offset))
            .with_context(|| format!("failed to seek {}", path.display()))?;
        let budget = limit.min(total_size - offset);
        let mut content = Vec::with_capacity(usize::try_from(budget).unwrap_or(0));
        file.take(budget)
            .read_to_end(&mut content)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let size = content.len() as u64;
        Ok(OutputChunk {
            content,
            size,
            total_size,
            has_more: offset + size < total_size,
        })
    }

    /// Reads the trailing `tail_bytes` of the log, prefixing `...` when the
    /// log is longer than the requested tail.
    pub async fn read_job_output_tail(
        &self,
        session_key: &str,
        job_id: &str,
        tail_bytes: u64,
    ) -> Result<OutputTail> {
        let path = self.job_output_path(session_key, job_id);
        let total_size = std::fs::metadata(&path)
            .map(|metadata| metadata.len())
            .unwrap_or(0);
        let offset = total_size.saturating_sub(tail_bytes);
        let chunk = self
            .read_job_output(session_key, job_id, offset, tail_bytes)
            .await?;
        let mut tail = String::from_utf8_lossy(&chunk.content).into_owned();
        if offset > 0 {
            tail = format!("...{tail}");
        }
        Ok(OutputTail {
            tail,
            last_output_seconds_ago: self.last_output_seconds_ago(session_key, job_id).await,
            total_size,
        })
    }

    /// Recursively copies an opaque credential directory into the session's
    /// credential sink. Returns the number of files copied.
    pub async fn copy_credentials(&self, session_key: &str, source: &Path) -> Result<usize> {
        if !source.exists() {
            bail!("credential source {} does not exist", source.display());
        }
        let sink = self.credentials_path(session_key);
        copy_dir_recursive(source, &sink)
    }

    fn session_dir(&self, session_key: &str) -> PathBuf {
        self.config.sessions_dir.join(session_key)
    }

    fn session_record_path(&self, session_key: &str) -> PathBuf {
        self.session_dir(session_key).join(SESSION_RECORD_FILE)
    }

    fn jobs_dir(&self, session_key: &str) -> PathBuf {
        self.session_dir(session_key).join(SESSION_JOBS_DIR)
    }

    fn job_record_path(&self, session_key: &str, job_id: &str) -> PathBuf {
        self.jobs_dir(session_key).join(format!("{job_id}.json"))
    }

    fn job_output_path(&self, session_key: &str, job_id: &str) -> PathBuf {
        self.jobs_dir(session_key).join(format!("{job_id}.log"))
    }
}

fn validate_session_key(session_key: &str) -> Result<()> {
    if session_key.is_empty() {
        bail!("session key must be non-empty");
    }
    if session_key == "." || session_key == ".." {
        bail!("session key '{session_key}' is not a valid directory name");
    }
    if session_key.contains('/') || session_key.contains('\\') {
        bail!("session key '{session_key}' must not contain path separators");
    }
    Ok(())
}

fn read_session_record(path: &Path) -> Result<Option<SessionRecord>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let record = serde_json::from_str::<SessionRecord>(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(record))
}

fn write_session_record(path: &Path, record: &SessionRecord) -> Result<()> {
    let mut payload =
        serde_json::to_string_pretty(record).context("failed to encode session record")?;
    payload.push('\n');
    write_text_atomic(path, &payload)
        .with_context(|| format!("failed to write {}", path.display()))
}

fn read_job_record_once(path: &Path) -> Result<JobRecord> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    if raw.trim().is_empty() {
        bail!("job record {} is empty", path.display());
    }
    serde_json::from_str::<JobRecord>(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))
}

fn write_job_record(path: &Path, record: &JobRecord) -> Result<()> {
    let mut payload =
        serde_json::to_string_pretty(record).context("failed to encode job record")?;
    payload.push('\n');
    write_text_atomic(path, &payload)
        .with_context(|| format!("failed to write {}", path.display()))
}

fn copy_dir_recursive(source: &Path, destination: &Path) -> Result<usize> {
    std::fs::create_dir_all(destination)
        .with_context(|| format!("failed to create {}", destination.display()))?;
    let mut copied = 0;
    let entries = std::fs::read_dir(source)
        .with_context(|| format!("failed to read {}", source.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to read entry in {}", source.display()))?;
        let from = entry.path();
        let to = destination.join(entry.file_name());
        if from.is_dir() {
            copied += copy_dir_recursive(&from, &to)?;
        } else {
            std::fs::copy(&from, &to).with_context(|| {
                format!("failed to copy {} to {}", from.display(), to.display())
            })?;
            copied += 1;
        }
    }
    Ok(copied)
}
