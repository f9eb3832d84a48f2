use warden_runtime::{session_key_from_container_name, CONTAINER_NAME_PREFIX};

use crate::JobSupervisor;

impl JobSupervisor {
    /// One-shot start-up pass aligning persisted jobs with actual container
    /// state. Best-effort by contract: every failure is logged and
    /// swallowed, because the normal status path heals anything left over.
    ///
    /// Finalized orphans emit no completion notification; the user was not
    /// waiting in this process's lifetime.
    pub async fn reconcile_orphans(&self) {
        let containers = match self.runtime.list_by_prefix(CONTAINER_NAME_PREFIX).await {
            Ok(containers) => containers,
            Err(error) => {
                tracing::warn!("orphan reconciliation skipped: {error}");
                return;
            }
        };

        for container in containers {
            let Some(session_key) = session_key_from_container_name(&container.name) else {
                // Not a name we would have produced; leave it alone.
                continue;
            };
            let active = match self.store.get_active_job(&session_key).await {
                Ok(active) => active,
                Err(error) => {
                    tracing::warn!(
                        "skipping container '{}': could not load active job: {error}",
                        container.name
                    );
                    continue;
                }
            };
            match active {
                Some(job) if job.container_name == container.name && job.status.is_active() => {
                    if container.running {
                        // Still alive; the watcher-or-status path owns it.
                        continue;
                    }
                    tracing::debug!(
                        "finalizing orphaned job '{}' in session '{session_key}'",
                        job.job_id
                    );
                    let state = self
                        .runtime
                        .get_state(&container.name)
                        .await
                        .ok()
                        .flatten();
                    self.finalize_stopped_job(&session_key, &job, state, true)
                        .await;
                }
                _ => {
                    // Stale container: session gone, job terminal, or
                    // pointer mismatch.
                    tracing::debug!("removing stale container '{}'", container.name);
                    self.runtime.kill(&session_key).await;
                }
            }
        }
    }
}
