use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use warden_store::{JobErrorKind, JobRecord, JobStatus};
use warden_stream::{parse_line, LineBuffer, StreamEvent};

use crate::classify::{classify_exit, TerminalOutcome, TerminalSignal};
use crate::JobSupervisor;

const STREAM_CHANNEL_CAPACITY: usize = 64;

impl JobSupervisor {
    /// Spawns the detached watcher that owns a running job's observation,
    /// parsing, and terminal classification.
    pub(crate) fn spawn_watcher(&self, job: &JobRecord) -> JoinHandle<()> {
        let supervisor = self.clone();
        let job = job.clone();
        tokio::spawn(async move {
            supervisor.run_watcher(job).await;
        })
    }

    async fn run_watcher(self, job: JobRecord) {
        let session_key = job.session_key.clone();
        let job_id = job.job_id.clone();
        let container_name = job.container_name.clone();

        let (chunk_tx, mut chunk_rx) = mpsc::channel::<Vec<u8>>(STREAM_CHANNEL_CAPACITY);
        let stream_runtime = Arc::clone(&self.runtime);
        let stream_name = container_name.clone();
        let stream_handle: JoinHandle<anyhow::Result<Option<i64>>> = tokio::spawn(async move {
            match stream_runtime
                .stream_logs(&stream_name, chunk_tx.clone())
                .await
            {
                Ok(exit_code) => Ok(exit_code),
                Err(first) => {
                    tracing::warn!(
                        "log stream for '{stream_name}' failed, retrying once: {first}"
                    );
                    stream_runtime.stream_logs(&stream_name, chunk_tx).await
                }
            }
        });

        let mut buffer = LineBuffer::new();
        let mut signal: Option<TerminalSignal> = None;
        let mut appended = self.store.output_size(&session_key, &job_id).await;
        let mut truncated = job.output_truncated;
        let mut saw_output = false;
        let mut stall: Option<JobErrorKind> = None;

        loop {
            let window = if saw_output {
                self.config.idle_output_timeout
            } else {
                self.config.startup_timeout
            };
            match tokio::time::timeout(window, chunk_rx.recv()).await {
                Ok(Some(chunk)) => {
                    saw_output = true;
                    for line in buffer.push_chunk(&chunk) {
                        self.consume_line(
                            &session_key,
                            &job_id,
                            &line,
                            &mut signal,
                            &mut appended,
                            &mut truncated,
                        )
                        .await;
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    stall = Some(if saw_output {
                        JobErrorKind::IdleTimeout
                    } else {
                        JobErrorKind::StartupTimeout
                    });
                    tracing::warn!(
                        "job '{job_id}' produced no output within its window; stopping container"
                    );
                    self.runtime.kill(&session_key).await;
                    break;
                }
            }
        }
        // Close the channel so a sender blocked on a full buffer can
        // observe it and let the stream task finish.
        drop(chunk_rx);
        if let Some(rest) = buffer.drain() {
            self.consume_line(
                &session_key,
                &job_id,
                &rest,
                &mut signal,
                &mut appended,
                &mut truncated,
            )
            .await;
        }

        let stream_end: Result<Option<i64>, ()> = match stream_handle.await {
            Ok(Ok(exit_code)) => Ok(exit_code),
            Ok(Err(error)) => {
                tracing::warn!(
                    "log stream for '{container_name}' failed after retry: {error}"
                );
                Err(())
            }
            Err(join_error) => {
                tracing::warn!("log stream task for '{container_name}' aborted: {join_error}");
                Err(())
            }
        };

        // Someone may have cancelled while we streamed; their terminal
        // record must not be overwritten.
        let current = match self.store.get_job(&session_key, &job_id).await {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(error) => {
                tracing::warn!("watcher could not re-read job '{job_id}': {error}");
                return;
            }
        };
        if current.status != JobStatus::Running {
            return;
        }

        let (outcome, exit_code_for_record) = match (stall, &stream_end) {
            (Some(kind), _) => {
                let window = if kind == JobErrorKind::StartupTimeout {
                    self.config.startup_timeout
                } else {
                    self.config.idle_output_timeout
                };
                (
                    TerminalOutcome {
                        status: JobStatus::Failed,
                        error_kind: Some(kind),
                        error_message: Some(format!(
                            "no container output for {} seconds",
                            window.as_secs()
                        )),
                    },
                    None,
                )
            }
            (None, Ok(exit_code)) => (classify_exit(*exit_code, signal.as_ref()), *exit_code),
            (None, Err(())) => {
                // Transport failed twice; no exit code was ever observed.
                let outcome = if signal.is_some() {
                    classify_exit(None, signal.as_ref())
                } else {
                    TerminalOutcome {
                        status: JobStatus::Failed,
                        error_kind: Some(JobErrorKind::Crash),
                        error_message: Some("log stream transport failed".to_string()),
                    }
                };
                (outcome, Some(0))
            }
        };

        let mut applied = false;
        let updated = self
            .store
            .update_job(&session_key, &job_id, |record| {
                if record.status == JobStatus::Running {
                    record.status = outcome.status;
                    record.completed_at = Some(Utc::now());
                    record.exit_code = exit_code_for_record;
                    record.error_kind = outcome.error_kind;
                    record.error_message = outcome.error_message;
                    record.output_truncated = truncated;
                    applied = true;
                }
            })
            .await;
        let updated = match updated {
            Ok(record) => record,
            Err(error) => {
                tracing::warn!("watcher could not persist terminal state for '{job_id}': {error}");
                return;
            }
        };
        if !applied {
            return;
        }
        self.clear_active_job_if_matches(&session_key, &job_id).await;
        self.emit_completion(&updated).await;
    }

    /// Feeds one transcript line through the parser: text fragments append
    /// to the output log (up to the size cap), terminal signals land in the
    /// watcher's overwrite-last-wins slot.
    async fn consume_line(
        &self,
        session_key: &str,
        job_id: &str,
        line: &str,
        signal: &mut Option<TerminalSignal>,
        appended: &mut u64,
        truncated: &mut bool,
    ) {
        for event in parse_line(line, Utc::now()) {
            match event {
                StreamEvent::TextFragment { text, .. } => {
                    if *truncated {
                        continue;
                    }
                    let bytes = text.as_bytes();
                    let budget = self.config.max_output_bytes.saturating_sub(*appended);
                    let take = usize::try_from((bytes.len() as u64).min(budget)).unwrap_or(0);
                    let mut cut = take;
                    while cut > 0 && !text.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    if cut > 0 {
                        match self
                            .store
                            .append_job_output(session_key, job_id, &bytes[..cut])
                            .await
                        {
                            Ok(()) => *appended += cut as u64,
                            Err(error) => {
                                tracing::warn!(
                                    "output append for job '{job_id}' failed: {error}"
                                );
                            }
                        }
                    }
                    if (bytes.len() as u64) > budget {
                        *truncated = true;
                        tracing::warn!(
                            "output for job '{job_id}' reached the size cap; discarding further text"
                        );
                        let _ = self
                            .store
                            .update_job(session_key, job_id, |record| {
                                record.output_truncated = true;
                            })
                            .await;
                    }
                }
                StreamEvent::RateLimit {
                    signal: rate_limit, ..
                } => {
                    *signal = Some(TerminalSignal::RateLimit(rate_limit));
                }
                StreamEvent::AuthError { kind, .. } => {
                    *signal = Some(TerminalSignal::Auth(kind));
                }
            }
        }
    }
}
