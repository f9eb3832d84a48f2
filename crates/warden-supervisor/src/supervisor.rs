use std::sync::Arc;

use chrono::Utc;

use warden_core::current_unix_timestamp_ms;
use warden_runtime::{
    container_name_from_session_key, ContainerRuntime, ContainerState, LogQuery,
    StartContainerOptions,
};
use warden_store::{
    JobErrorKind, JobRecord, JobStatus, Store, StoreConfig, DEFAULT_OUTPUT_READ_LIMIT,
};
use warden_stream::extract_text_from_stream;

use crate::api::{
    derive_activity_state, ActiveJobSummary, CancelOutcome, CleanupReport, OutputPage,
    SessionSummary, StartReceipt, StatusReport,
};
use crate::classify::{classify_exit, scan_terminal_signal};
use crate::config::SupervisorConfig;
use crate::error::SupervisorError;
use crate::notifier::{JobCompletionEvent, Notifier};

/// Owns the lifecycle of sessions, jobs, and their backing containers.
///
/// Cheap to clone: every spawned watcher carries its own handle.
#[derive(Clone)]
pub struct JobSupervisor {
    pub(crate) store: Store,
    pub(crate) runtime: Arc<dyn ContainerRuntime>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) config: Arc<SupervisorConfig>,
}

impl JobSupervisor {
    pub fn new(
        config: SupervisorConfig,
        runtime: Arc<dyn ContainerRuntime>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let store = Store::new(StoreConfig {
            sessions_dir: config.sessions_dir.clone(),
            workspaces_dir: config.workspaces_dir.clone(),
            session_idle_timeout: config.session_idle_timeout,
        });
        Self {
            store,
            runtime,
            notifier,
            config: Arc::new(config),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Creates (or reuses) the session, launches the job container, and
    /// spawns its watcher. Precondition failures leave no state behind.
    pub async fn start(
        &self,
        prompt: &str,
        session_id: Option<&str>,
    ) -> Result<StartReceipt, SupervisorError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(SupervisorError::MissingPrompt);
        }
        if !self.config.auth_available {
            return Err(SupervisorError::AuthUnavailable);
        }
        let image_present = self
            .runtime
            .check_image()
            .await
            .map_err(|error| SupervisorError::Runtime(format!("{error:#}")))?;
        if !image_present {
            return Err(SupervisorError::ImageMissing);
        }

        let session_key = match session_id.map(str::trim).filter(|value| !value.is_empty()) {
            Some(key) => key.to_string(),
            None => format!("session-{}", current_unix_timestamp_ms()),
        };
        let session = self.store.get_or_create_session(&session_key).await?;
        match self.store.get_active_job(&session_key).await? {
            Some(active) if active.status.is_active() => {
                return Err(SupervisorError::SessionBusy {
                    session_key,
                    job_id: active.job_id,
                });
            }
            Some(_) => {
                // Pointer to an already-terminal job heals here.
                self.store.set_active_job(&session_key, None).await?;
            }
            None if session.active_job_id.is_some() => {
                // Pointer to a vanished job record heals here.
                self.store.set_active_job(&session_key, None).await?;
            }
            None => {}
        }

        if let Some(source) = self.config.credentials_source.as_deref() {
            self.store.copy_credentials(&session_key, source).await?;
        }
        let workspace_dir = self.store.ensure_workspace(&session_key)?;
        let container_name = container_name_from_session_key(&session_key);
        let job = self
            .store
            .create_job(&session_key, prompt, &container_name)
            .await?;

        let credentials_dir = {
            let path = self.store.credentials_path(&session_key);
            path.exists().then_some(path)
        };
        let options = StartContainerOptions {
            container_name,
            session_key: session_key.clone(),
            prompt: prompt.to_string(),
            workspace_dir,
            credentials_dir,
            assistant_session_id: session.assistant_session_id.clone(),
        };
        if let Err(error) = self.runtime.start_detached(&options).await {
            let detail = format!("{error:#}");
            let now = Utc::now();
            let failure = detail.clone();
            if let Err(store_error) = self
                .store
                .update_job(&session_key, &job.job_id, move |record| {
                    record.status = JobStatus::Failed;
                    record.completed_at = Some(now);
                    record.error_kind = Some(JobErrorKind::SpawnFailed);
                    record.error_message = Some(failure);
                })
                .await
            {
                tracing::warn!(
                    "failed to record spawn failure for job '{}': {store_error}",
                    job.job_id
                );
            }
            return Err(SupervisorError::SpawnFailed { detail });
        }

        let started = self
            .store
            .update_job(&session_key, &job.job_id, |record| {
                record.status = JobStatus::Running;
                record.started_at = Some(Utc::now());
            })
            .await?;
        self.store
            .set_active_job(&session_key, Some(&started.job_id))
            .await?;
        let _ = self.store.update_session(&session_key, None).await;

        self.spawn_watcher(&started);
        Ok(StartReceipt {
            job_id: started.job_id,
            session_key,
            status: JobStatus::Running,
        })
    }

    /// Stops the container and forces the job terminal. Idempotent: a job
    /// that already finished reports so instead of erroring.
    pub async fn cancel(
        &self,
        job_id: &str,
        session_key: Option<&str>,
    ) -> Result<CancelOutcome, SupervisorError> {
        let Some((key, job)) = self.find_job(job_id, session_key).await? else {
            return Ok(CancelOutcome::NotFound {
                job_id: job_id.to_string(),
            });
        };
        if job.status.is_terminal() {
            return Ok(CancelOutcome::AlreadyTerminal {
                job_id: job.job_id,
                status: job.status,
            });
        }

        self.runtime.kill(&key).await;
        let now = Utc::now();
        let mut applied = false;
        let updated = self
            .store
            .update_job(&key, job_id, |record| {
                if !record.status.is_terminal() {
                    record.status = JobStatus::Cancelled;
                    record.completed_at = Some(now);
                    applied = true;
                }
            })
            .await?;
        self.clear_active_job_if_matches(&key, job_id).await;
        if applied {
            self.emit_completion(&updated).await;
            Ok(CancelOutcome::Cancelled {
                job_id: updated.job_id,
            })
        } else {
            Ok(CancelOutcome::AlreadyTerminal {
                job_id: updated.job_id,
                status: updated.status,
            })
        }
    }

    /// Inspects a job. While the record says `running` this reconciles
    /// against actual container state, healing jobs whose watcher died.
    pub async fn status(
        &self,
        job_id: &str,
        session_key: Option<&str>,
    ) -> Result<Option<StatusReport>, SupervisorError> {
        let Some((key, mut job)) = self.find_job(job_id, session_key).await? else {
            return Ok(None);
        };

        let mut live_metrics = None;
        if job.status == JobStatus::Running {
            match self.runtime.get_state(&job.container_name).await {
                Ok(Some(state)) if state.running => {
                    live_metrics = self
                        .runtime
                        .get_stats(&job.container_name)
                        .await
                        .ok()
                        .flatten();
                    if let Some(snapshot) = live_metrics.clone() {
                        if let Ok(updated) = self
                            .store
                            .update_job(&key, job_id, |record| {
                                if record.status == JobStatus::Running {
                                    record.metrics = Some(snapshot);
                                }
                            })
                            .await
                        {
                            job = updated;
                        }
                    }
                }
                Ok(state) => {
                    // Container stopped or vanished while the record still
                    // says running: the watcher is gone. Heal in place.
                    job = self
                        .finalize_stopped_job(&key, &job, state, false)
                        .await;
                }
                Err(error) => {
                    tracing::warn!(
                        "state probe for container '{}' failed: {error}",
                        job.container_name
                    );
                }
            }
        }

        let now = Utc::now();
        let output_size = self.store.output_size(&key, job_id).await;
        let last_output_seconds_ago = self.store.last_output_seconds_ago(&key, job_id).await;
        let tail_output = self
            .store
            .read_job_output_tail(&key, job_id, self.config.status_tail_bytes)
            .await
            .map(|tail| tail.tail)
            .unwrap_or_default();
        let metrics = live_metrics.or_else(|| job.metrics.clone());
        Ok(Some(StatusReport {
            job_id: job.job_id.clone(),
            session_key: key,
            status: job.status,
            elapsed_seconds: job.elapsed_seconds(now),
            output_size,
            last_output_seconds_ago,
            activity_state: derive_activity_state(last_output_seconds_ago, metrics.as_ref()),
            tail_output,
            exit_code: job.exit_code,
            error_kind: job.error_kind,
            error_message: job.error_message.clone(),
            metrics,
        }))
    }

    /// Reads one page of raw job output.
    pub async fn output(
        &self,
        job_id: &str,
        session_key: Option<&str>,
        offset: Option<u64>,
        limit: Option<u64>,
    ) -> Result<Option<OutputPage>, SupervisorError> {
        let Some((key, job)) = self.find_job(job_id, session_key).await? else {
            return Ok(None);
        };
        let offset = offset.unwrap_or(0);
        let limit = limit.unwrap_or(DEFAULT_OUTPUT_READ_LIMIT);
        let chunk = self.store.read_job_output(&key, job_id, offset, limit).await?;
        Ok(Some(OutputPage {
            job_id: job.job_id,
            status: job.status,
            offset,
            size: chunk.size,
            total_size: chunk.total_size,
            has_more: chunk.has_more,
            content: chunk.content,
        }))
    }

    /// Prunes idle sessions. Workspaces survive unless explicitly opted in.
    pub async fn cleanup(
        &self,
        delete_workspaces: bool,
    ) -> Result<CleanupReport, SupervisorError> {
        let removed = self.store.cleanup_idle_sessions().await?;
        if delete_workspaces {
            for session_key in &removed {
                self.store.delete_workspace(session_key).await;
            }
        }
        Ok(CleanupReport {
            removed,
            workspaces_deleted: delete_workspaces,
        })
    }

    /// Lists sessions enriched with age and active-job summaries.
    pub async fn sessions(&self) -> Result<Vec<SessionSummary>, SupervisorError> {
        let now = Utc::now();
        let mut summaries = Vec::new();
        for session in self.store.list_sessions().await? {
            let active_job = match session.active_job_id.as_deref() {
                Some(job_id) => self
                    .store
                    .get_job(&session.session_key, job_id)
                    .await
                    .ok()
                    .flatten()
                    .map(|job| ActiveJobSummary {
                        job_id: job.job_id.clone(),
                        status: job.status,
                        elapsed_seconds: job.elapsed_seconds(now),
                    }),
                None => None,
            };
            summaries.push(SessionSummary {
                session_key: session.session_key,
                age_seconds: (now - session.created_at).num_seconds().max(0),
                time_since_active_seconds: (now - session.last_activity).num_seconds().max(0),
                message_count: session.message_count,
                assistant_session_id: session.assistant_session_id,
                active_job,
            });
        }
        Ok(summaries)
    }

    /// Locates a job by id, scanning sessions when no key is supplied. A
    /// supplied key must name an existing session.
    pub(crate) async fn find_job(
        &self,
        job_id: &str,
        session_key: Option<&str>,
    ) -> Result<Option<(String, JobRecord)>, SupervisorError> {
        if let Some(key) = session_key.map(str::trim).filter(|value| !value.is_empty()) {
            if self.store.get_session(key).await?.is_none() {
                return Err(SupervisorError::SessionNotFound(key.to_string()));
            }
            return Ok(self
                .store
                .get_job(key, job_id)
                .await?
                .map(|job| (key.to_string(), job)));
        }
        for session in self.store.list_sessions().await? {
            if let Ok(Some(job)) = self.store.get_job(&session.session_key, job_id).await {
                return Ok(Some((session.session_key, job)));
            }
        }
        Ok(None)
    }

    /// Clears the session's active pointer, but only when this job holds it.
    pub(crate) async fn clear_active_job_if_matches(&self, session_key: &str, job_id: &str) {
        match self.store.get_session(session_key).await {
            Ok(Some(session)) if session.active_job_id.as_deref() == Some(job_id) => {
                if let Err(error) = self.store.set_active_job(session_key, None).await {
                    tracing::warn!(
                        "failed to clear active job for session '{session_key}': {error}"
                    );
                }
            }
            Ok(_) => {}
            Err(error) => {
                tracing::warn!("failed to read session '{session_key}': {error}");
            }
        }
    }

    /// Fire-and-forget completion notification.
    pub(crate) async fn emit_completion(&self, record: &JobRecord) {
        let event = JobCompletionEvent {
            job_id: record.job_id.clone(),
            session_key: record.session_key.clone(),
            status: record.status,
            elapsed_seconds: record.elapsed_seconds(Utc::now()),
            output_size: self
                .store
                .output_size(&record.session_key, &record.job_id)
                .await,
            exit_code: record.exit_code,
            error_kind: record.error_kind,
        };
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            notifier.notify(&event).await;
        });
    }

    /// Classifies and persists the terminal state of a job whose container
    /// stopped without a live watcher. Drains logs to recover output the
    /// watcher never wrote, mirrors its classification, and clears the
    /// active pointer. Emits no notification: nobody is waiting on this
    /// path.
    pub(crate) async fn finalize_stopped_job(
        &self,
        session_key: &str,
        job: &JobRecord,
        state: Option<ContainerState>,
        remove_container: bool,
    ) -> JobRecord {
        let exit_code = state.as_ref().and_then(|state| state.exit_code);
        let finished_at = state
            .as_ref()
            .and_then(|state| state.finished_at)
            .unwrap_or_else(Utc::now);

        let mut signal = None;
        match self
            .runtime
            .get_logs(&job.container_name, &LogQuery::default())
            .await
        {
            Ok(Some(bytes)) => {
                let transcript = String::from_utf8_lossy(&bytes);
                signal = scan_terminal_signal(transcript.lines());
                let extracted = extract_text_from_stream(transcript.lines());
                let existing = self
                    .store
                    .output_size(session_key, &job.job_id)
                    .await;
                let existing = usize::try_from(existing).unwrap_or(usize::MAX);
                if extracted.len() > existing {
                    if let Err(error) = self
                        .store
                        .append_job_output(
                            session_key,
                            &job.job_id,
                            &extracted.as_bytes()[existing..],
                        )
                        .await
                    {
                        tracing::warn!(
                            "failed to recover output for job '{}': {error}",
                            job.job_id
                        );
                    }
                }
            }
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(
                    "log drain for container '{}' failed: {error}",
                    job.container_name
                );
            }
        }

        let outcome = classify_exit(exit_code, signal.as_ref());
        let updated = self
            .store
            .update_job(session_key, &job.job_id, |record| {
                if !record.status.is_terminal() {
                    record.status = outcome.status;
                    record.completed_at = Some(finished_at);
                    record.exit_code = exit_code;
                    record.error_kind = outcome.error_kind;
                    record.error_message = outcome.error_message;
                }
            })
            .await;
        self.clear_active_job_if_matches(session_key, &job.job_id).await;
        if remove_container {
            self.runtime.kill(session_key).await;
        }
        match updated {
            Ok(record) => record,
            Err(error) => {
                tracing::warn!(
                    "failed to persist terminal state for job '{}': {error}",
                    job.job_id
                );
                job.clone()
            }
        }
    }
}
