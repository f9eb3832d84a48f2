use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::{mpsc, Notify};

use warden_runtime::{
    ContainerRuntime, ContainerState, ContainerSummary, LogQuery, StartContainerOptions,
    StartedContainer,
};
use warden_store::{ContainerMetrics, JobErrorKind, JobStatus};

use crate::api::{ActivityState, CancelOutcome};
use crate::notifier::{JobCompletionEvent, Notifier};
use crate::{JobSupervisor, SupervisorConfig, SupervisorError};

fn delta_line(text: &str) -> Vec<u8> {
    format!(
        "{{\"event\":{{\"type\":\"content_block_delta\",\"delta\":{{\"text\":\"{text}\"}}}}}}\n"
    )
    .into_bytes()
}

fn rate_limit_line() -> Vec<u8> {
    b"{\"type\":\"result\",\"is_error\":true,\"result\":\"You've hit your limit \\u00b7 resets 8pm (UTC)\"}\n"
        .to_vec()
}

#[derive(Default)]
struct MockRuntimeState {
    image_present: bool,
    start_error: Option<String>,
    stream_chunks: Vec<Vec<u8>>,
    stream_exit: Option<i64>,
    stream_failures: u32,
    hold_stream: Option<Arc<Notify>>,
    state: Option<ContainerState>,
    stats: Option<ContainerMetrics>,
    listing: Vec<ContainerSummary>,
    logs: Option<Vec<u8>>,
    started: Vec<StartContainerOptions>,
    killed: Vec<String>,
}

#[derive(Clone, Default)]
struct MockRuntime {
    inner: Arc<Mutex<MockRuntimeState>>,
}

impl MockRuntime {
    fn with_image() -> Self {
        let runtime = Self::default();
        runtime.lock().image_present = true;
        runtime
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockRuntimeState> {
        self.inner.lock().expect("mock runtime state")
    }

    fn script_stream(&self, chunks: Vec<Vec<u8>>, exit: Option<i64>) {
        let mut state = self.lock();
        state.stream_chunks = chunks;
        state.stream_exit = exit;
    }

    fn hold_stream(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.lock().hold_stream = Some(Arc::clone(&gate));
        gate
    }

    fn killed_sessions(&self) -> Vec<String> {
        self.lock().killed.clone()
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn check_image(&self) -> Result<bool> {
        Ok(self.lock().image_present)
    }

    async fn start_detached(&self, options: &StartContainerOptions) -> Result<StartedContainer> {
        let failure = {
            let mut state = self.lock();
            state.started.push(options.clone());
            state.start_error.clone()
        };
        if let Some(message) = failure {
            bail!("{message}");
        }
        Ok(StartedContainer {
            container_name: options.container_name.clone(),
            container_id: "mock-container-id".to_string(),
        })
    }

    async fn stream_logs(
        &self,
        _container_name: &str,
        chunks: mpsc::Sender<Vec<u8>>,
    ) -> Result<Option<i64>> {
        let (scripted, exit, gate, should_fail) = {
            let mut state = self.lock();
            let should_fail = if state.stream_failures > 0 {
                state.stream_failures -= 1;
                true
            } else {
                false
            };
            (
                state.stream_chunks.clone(),
                state.stream_exit,
                state.hold_stream.clone(),
                should_fail,
            )
        };
        if should_fail {
            bail!("log transport reset");
        }
        for chunk in scripted {
            if chunks.send(chunk).await.is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(exit)
    }

    async fn get_logs(&self, _container_name: &str, _query: &LogQuery) -> Result<Option<Vec<u8>>> {
        Ok(self.lock().logs.clone())
    }

    async fn get_state(&self, _container_name: &str) -> Result<Option<ContainerState>> {
        Ok(self.lock().state.clone())
    }

    async fn get_stats(&self, _container_name: &str) -> Result<Option<ContainerMetrics>> {
        Ok(self.lock().stats.clone())
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<ContainerSummary>> {
        Ok(self
            .lock()
            .listing
            .iter()
            .filter(|summary| summary.name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn kill(&self, session_key: &str) {
        let gate = {
            let mut state = self.lock();
            state.killed.push(session_key.to_string());
            state.hold_stream.clone()
        };
        if let Some(gate) = gate {
            gate.notify_one();
        }
    }
}

#[derive(Clone, Default)]
struct RecordingNotifier {
    events: Arc<Mutex<Vec<JobCompletionEvent>>>,
}

impl RecordingNotifier {
    fn events(&self) -> Vec<JobCompletionEvent> {
        self.events.lock().expect("notifier events").clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: &JobCompletionEvent) {
        self.events
            .lock()
            .expect("notifier events")
            .push(event.clone());
    }
}

struct Harness {
    supervisor: JobSupervisor,
    runtime: MockRuntime,
    notifier: RecordingNotifier,
    _temp: tempfile::TempDir,
}

fn harness() -> Harness {
    harness_with(|_| {})
}

fn harness_with<F>(adjust: F) -> Harness
where
    F: FnOnce(&mut SupervisorConfig),
{
    let temp = tempfile::tempdir().expect("tempdir");
    let mut config = SupervisorConfig {
        sessions_dir: temp.path().join("sessions"),
        workspaces_dir: temp.path().join("workspaces"),
        auth_available: true,
        startup_timeout: Duration::from_secs(5),
        idle_output_timeout: Duration::from_secs(5),
        ..SupervisorConfig::default()
    };
    adjust(&mut config);
    let runtime = MockRuntime::with_image();
    let notifier = RecordingNotifier::default();
    let supervisor = JobSupervisor::new(
        config,
        Arc::new(runtime.clone()),
        Arc::new(notifier.clone()),
    );
    Harness {
        supervisor,
        runtime,
        notifier,
        _temp: temp,
    }
}

async fn wait_for_terminal(
    supervisor: &JobSupervisor,
    session_key: &str,
    job_id: &str,
) -> warden_store::JobRecord {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let record = supervisor
            .store()
            .get_job(session_key, job_id)
            .await
            .expect("get job")
            .expect("job exists");
        if record.status.is_terminal() {
            return record;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {job_id} did not reach a terminal status"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn wait_until<F>(timeout: Duration, predicate: F)
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate() {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for condition"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn functional_happy_path_streams_text_and_completes() {
    let fixture = harness();
    fixture.runtime.script_stream(
        vec![delta_line("Hi"), delta_line(", "), delta_line("world")],
        Some(0),
    );

    let receipt = fixture
        .supervisor
        .start("hello", Some("alpha"))
        .await
        .expect("start");
    assert_eq!(receipt.status, JobStatus::Running);
    assert_eq!(receipt.session_key, "alpha");

    let record = wait_for_terminal(&fixture.supervisor, "alpha", &receipt.job_id).await;
    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.exit_code, Some(0));
    assert!(record.error_kind.is_none());
    assert!(record.completed_at.is_some());

    let output = std::fs::read_to_string(&record.output_file).expect("read output");
    assert_eq!(output, "Hi, world");

    let session = fixture
        .supervisor
        .store()
        .get_session("alpha")
        .await
        .expect("get session")
        .expect("session exists");
    assert!(session.active_job_id.is_none());

    let notifier = fixture.notifier.clone();
    wait_until(Duration::from_secs(2), || !notifier.events().is_empty()).await;
    let events = fixture.notifier.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, JobStatus::Completed);
    assert_eq!(events[0].exit_code, Some(0));
    assert_eq!(events[0].output_size, 9);
}

#[tokio::test]
async fn functional_oom_exit_classifies_as_oom_failure() {
    let fixture = harness();
    fixture
        .runtime
        .script_stream(vec![delta_line("partial")], Some(137));

    let receipt = fixture
        .supervisor
        .start("heavy prompt", Some("oom-session"))
        .await
        .expect("start");
    let record = wait_for_terminal(&fixture.supervisor, "oom-session", &receipt.job_id).await;
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.error_kind, Some(JobErrorKind::Oom));
    assert_eq!(record.exit_code, Some(137));
}

#[tokio::test]
async fn functional_rate_limit_signal_fails_job_despite_clean_exit() {
    let fixture = harness();
    fixture
        .runtime
        .script_stream(vec![delta_line("working"), rate_limit_line()], Some(0));

    let receipt = fixture
        .supervisor
        .start("long prompt", Some("limited"))
        .await
        .expect("start");
    let record = wait_for_terminal(&fixture.supervisor, "limited", &receipt.job_id).await;
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.error_kind, Some(JobErrorKind::RateLimit));
    assert_eq!(record.exit_code, Some(0));
    let message = record.error_message.expect("rate limit message");
    assert!(message.contains("rate limit hit"), "message: {message}");
    assert!(message.contains("resets at 8pm"), "message: {message}");
}

#[tokio::test]
async fn functional_cancel_races_watcher_without_overwrite() {
    let fixture = harness();
    let _gate = fixture.runtime.hold_stream();
    fixture.runtime.script_stream(Vec::new(), Some(137));

    let receipt = fixture
        .supervisor
        .start("cancel me", Some("doomed"))
        .await
        .expect("start");

    let outcome = fixture
        .supervisor
        .cancel(&receipt.job_id, Some("doomed"))
        .await
        .expect("cancel");
    assert!(matches!(outcome, CancelOutcome::Cancelled { .. }));
    assert_eq!(fixture.runtime.killed_sessions(), vec!["doomed".to_string()]);

    // The released watcher must observe the cancelled record and walk away.
    let notifier = fixture.notifier.clone();
    wait_until(Duration::from_secs(2), || !notifier.events().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let record = fixture
        .supervisor
        .store()
        .get_job("doomed", &receipt.job_id)
        .await
        .expect("get job")
        .expect("job exists");
    assert_eq!(record.status, JobStatus::Cancelled);
    assert!(record.exit_code.is_none());

    let events = fixture.notifier.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, JobStatus::Cancelled);

    let repeat = fixture
        .supervisor
        .cancel(&receipt.job_id, Some("doomed"))
        .await
        .expect("repeat cancel");
    assert!(matches!(repeat, CancelOutcome::AlreadyTerminal { .. }));
}

#[tokio::test]
async fn functional_reconciler_finalizes_stopped_orphan_silently() {
    let fixture = harness();
    let finished_at = Utc.with_ymd_and_hms(2024, 5, 14, 9, 30, 0).single().unwrap();

    let store = fixture.supervisor.store().clone();
    store.create_session("abc").await.expect("create session");
    let job = store
        .create_job("abc", "orphaned prompt", "claude-abc")
        .await
        .expect("create job");
    store
        .update_job("abc", &job.job_id, |record| {
            record.status = JobStatus::Running;
            record.started_at = Some(finished_at - chrono::Duration::seconds(90));
        })
        .await
        .expect("mark running");
    store
        .set_active_job("abc", Some(&job.job_id))
        .await
        .expect("set active");

    {
        let mut state = fixture.runtime.lock();
        state.listing = vec![ContainerSummary {
            name: "claude-abc".to_string(),
            running: false,
            created_at: None,
        }];
        state.state = Some(ContainerState {
            running: false,
            exit_code: Some(0),
            started_at: None,
            finished_at: Some(finished_at),
        });
        state.logs = Some(
            [delta_line("recovered "), delta_line("output")]
                .concat(),
        );
    }

    fixture.supervisor.reconcile_orphans().await;

    let record = store
        .get_job("abc", &job.job_id)
        .await
        .expect("get job")
        .expect("job exists");
    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.exit_code, Some(0));
    assert_eq!(record.completed_at, Some(finished_at));

    let output = std::fs::read_to_string(&record.output_file).expect("read output");
    assert_eq!(output, "recovered output");

    let session = store
        .get_session("abc")
        .await
        .expect("get session")
        .expect("session exists");
    assert!(session.active_job_id.is_none());

    assert_eq!(fixture.runtime.killed_sessions(), vec!["abc".to_string()]);
    assert!(fixture.notifier.events().is_empty(), "no notification for orphans");
}

#[tokio::test]
async fn functional_reconciler_removes_stale_containers() {
    let fixture = harness();
    {
        let mut state = fixture.runtime.lock();
        state.listing = vec![
            ContainerSummary {
                name: "claude-ghost".to_string(),
                running: true,
                created_at: None,
            },
            ContainerSummary {
                name: "unrelated-db".to_string(),
                running: true,
                created_at: None,
            },
        ];
    }
    fixture.supervisor.reconcile_orphans().await;
    assert_eq!(fixture.runtime.killed_sessions(), vec!["ghost".to_string()]);
}

#[tokio::test]
async fn regression_second_start_rejected_while_job_active() {
    let fixture = harness();
    let gate = fixture.runtime.hold_stream();
    fixture.runtime.script_stream(Vec::new(), Some(0));

    let first = fixture
        .supervisor
        .start("first prompt", Some("busy"))
        .await
        .expect("first start");

    let second = fixture
        .supervisor
        .start("second prompt", Some("busy"))
        .await
        .expect_err("second start must fail");
    match &second {
        SupervisorError::SessionBusy {
            session_key,
            job_id,
        } => {
            assert_eq!(session_key, "busy");
            assert_eq!(job_id, &first.job_id);
        }
        other => panic!("expected SessionBusy, got {other:?}"),
    }
    assert!(second.to_string().contains("already has an active job"));

    gate.notify_one();
    wait_for_terminal(&fixture.supervisor, "busy", &first.job_id).await;

    let third = fixture
        .supervisor
        .start("third prompt", Some("busy"))
        .await
        .expect("start after completion");
    assert_ne!(third.job_id, first.job_id);
}

#[tokio::test]
async fn unit_start_preconditions_leave_no_state() {
    let fixture = harness();
    assert!(matches!(
        fixture.supervisor.start("   ", Some("alpha")).await,
        Err(SupervisorError::MissingPrompt)
    ));

    let no_auth = harness_with(|config| config.auth_available = false);
    assert!(matches!(
        no_auth.supervisor.start("hello", Some("alpha")).await,
        Err(SupervisorError::AuthUnavailable)
    ));

    let no_image = harness();
    no_image.runtime.lock().image_present = false;
    assert!(matches!(
        no_image.supervisor.start("hello", Some("alpha")).await,
        Err(SupervisorError::ImageMissing)
    ));
    assert!(no_image
        .supervisor
        .store()
        .get_session("alpha")
        .await
        .expect("get")
        .is_none());
}

#[tokio::test]
async fn functional_spawn_failure_records_failed_job_and_propagates() {
    let fixture = harness();
    fixture.runtime.lock().start_error = Some("no such image variant".to_string());

    let error = fixture
        .supervisor
        .start("hello", Some("alpha"))
        .await
        .expect_err("spawn must fail");
    assert!(matches!(error, SupervisorError::SpawnFailed { .. }));

    let jobs = fixture
        .supervisor
        .store()
        .list_jobs("alpha")
        .await
        .expect("list jobs");
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Failed);
    assert_eq!(jobs[0].error_kind, Some(JobErrorKind::SpawnFailed));
    assert!(jobs[0]
        .error_message
        .as_deref()
        .is_some_and(|message| message.contains("no such image variant")));

    let session = fixture
        .supervisor
        .store()
        .get_session("alpha")
        .await
        .expect("get session")
        .expect("session exists");
    assert!(session.active_job_id.is_none());
}

#[tokio::test]
async fn functional_status_self_heals_when_watcher_is_gone() {
    let fixture = harness();
    let store = fixture.supervisor.store().clone();
    store.create_session("healed").await.expect("create session");
    let job = store
        .create_job("healed", "prompt", "claude-healed")
        .await
        .expect("create job");
    store
        .update_job("healed", &job.job_id, |record| {
            record.status = JobStatus::Running;
            record.started_at = Some(Utc::now());
        })
        .await
        .expect("mark running");
    store
        .set_active_job("healed", Some(&job.job_id))
        .await
        .expect("set active");

    fixture.runtime.lock().state = Some(ContainerState {
        running: false,
        exit_code: Some(2),
        started_at: None,
        finished_at: None,
    });

    let report = fixture
        .supervisor
        .status(&job.job_id, Some("healed"))
        .await
        .expect("status")
        .expect("job found");
    assert_eq!(report.status, JobStatus::Failed);
    assert_eq!(report.error_kind, Some(JobErrorKind::Crash));
    assert_eq!(report.exit_code, Some(2));

    let record = store
        .get_job("healed", &job.job_id)
        .await
        .expect("get job")
        .expect("job exists");
    assert!(record.status.is_terminal());
    let session = store
        .get_session("healed")
        .await
        .expect("get session")
        .expect("session exists");
    assert!(session.active_job_id.is_none());
}

#[tokio::test]
async fn functional_status_attaches_metrics_and_activity_for_live_jobs() {
    let fixture = harness();
    let gate = fixture.runtime.hold_stream();
    fixture
        .runtime
        .script_stream(vec![delta_line("thinking")], Some(0));
    {
        let mut state = fixture.runtime.lock();
        state.state = Some(ContainerState {
            running: true,
            exit_code: None,
            started_at: None,
            finished_at: None,
        });
        state.stats = Some(ContainerMetrics {
            mem_mb: Some(256.0),
            mem_limit_mb: Some(4096.0),
            mem_pct: Some(6.25),
            cpu_pct: Some(55.0),
        });
    }

    let receipt = fixture
        .supervisor
        .start("hello", Some("live"))
        .await
        .expect("start");
    let store = fixture.supervisor.store().clone();
    let job_id = receipt.job_id.clone();
    wait_until(Duration::from_secs(2), || output_has_bytes(&store, &job_id)).await;

    let report = fixture
        .supervisor
        .status(&receipt.job_id, Some("live"))
        .await
        .expect("status")
        .expect("job found");
    assert_eq!(report.status, JobStatus::Running);
    assert_eq!(report.activity_state, ActivityState::Active);
    assert_eq!(
        report.metrics.as_ref().and_then(|metrics| metrics.cpu_pct),
        Some(55.0)
    );
    assert!(report.tail_output.contains("thinking"));
    assert!(report.output_size > 0);

    gate.notify_one();
    wait_for_terminal(&fixture.supervisor, "live", &receipt.job_id).await;
}

// Output appears once the watcher has consumed the first chunk.
fn output_has_bytes(store: &warden_store::Store, job_id: &str) -> bool {
    let path = store
        .sessions_dir()
        .join("live/jobs")
        .join(format!("{job_id}.log"));
    std::fs::metadata(path)
        .map(|metadata| metadata.len() > 0)
        .unwrap_or(false)
}

#[tokio::test]
async fn functional_output_pages_through_the_log() {
    let fixture = harness();
    fixture.runtime.script_stream(
        vec![delta_line("0123456789"), delta_line("abcdef")],
        Some(0),
    );
    let receipt = fixture
        .supervisor
        .start("page me", Some("pager"))
        .await
        .expect("start");
    wait_for_terminal(&fixture.supervisor, "pager", &receipt.job_id).await;

    let page = fixture
        .supervisor
        .output(&receipt.job_id, Some("pager"), Some(4), Some(6))
        .await
        .expect("output")
        .expect("job found");
    assert_eq!(page.content, b"456789");
    assert_eq!(page.total_size, 16);
    assert!(page.has_more);
    let rendered = page.render();
    assert!(rendered.starts_with(&format!(
        "job {} status=completed bytes 4-10/16 more=true\n",
        receipt.job_id
    )));

    let missing = fixture
        .supervisor
        .output("no-such-job", None, None, None)
        .await
        .expect("output");
    assert!(missing.is_none());
}

#[tokio::test]
async fn unit_cancel_and_status_resolve_jobs_without_session_hint() {
    let fixture = harness();
    fixture.runtime.script_stream(vec![delta_line("hi")], Some(0));
    let receipt = fixture
        .supervisor
        .start("hello", Some("findable"))
        .await
        .expect("start");
    wait_for_terminal(&fixture.supervisor, "findable", &receipt.job_id).await;

    let report = fixture
        .supervisor
        .status(&receipt.job_id, None)
        .await
        .expect("status")
        .expect("resolved by scan");
    assert_eq!(report.session_key, "findable");

    let outcome = fixture
        .supervisor
        .cancel(&receipt.job_id, None)
        .await
        .expect("cancel");
    assert!(matches!(outcome, CancelOutcome::AlreadyTerminal { .. }));

    let missing = fixture
        .supervisor
        .cancel("no-such-job", None)
        .await
        .expect("cancel missing");
    assert!(matches!(missing, CancelOutcome::NotFound { .. }));
    assert_eq!(missing.describe(), "job no-such-job not found");

    let unknown_session = fixture.supervisor.status("job", Some("ghost")).await;
    assert!(matches!(
        unknown_session,
        Err(SupervisorError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn regression_startup_stall_classifies_startup_timeout() {
    let fixture = harness_with(|config| {
        config.startup_timeout = Duration::from_millis(120);
        config.idle_output_timeout = Duration::from_millis(120);
    });
    let _gate = fixture.runtime.hold_stream();
    fixture.runtime.script_stream(Vec::new(), None);

    let receipt = fixture
        .supervisor
        .start("silent", Some("stalled"))
        .await
        .expect("start");
    let record = wait_for_terminal(&fixture.supervisor, "stalled", &receipt.job_id).await;
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.error_kind, Some(JobErrorKind::StartupTimeout));
    assert!(record.exit_code.is_none());
    assert!(fixture
        .runtime
        .killed_sessions()
        .contains(&"stalled".to_string()));
}

#[tokio::test]
async fn regression_stream_transport_failure_classifies_crash() {
    let fixture = harness();
    fixture.runtime.lock().stream_failures = 2;
    fixture.runtime.script_stream(Vec::new(), Some(0));

    let receipt = fixture
        .supervisor
        .start("doomed transport", Some("flaky"))
        .await
        .expect("start");
    let record = wait_for_terminal(&fixture.supervisor, "flaky", &receipt.job_id).await;
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.error_kind, Some(JobErrorKind::Crash));
    assert_eq!(record.exit_code, Some(0));
}

#[tokio::test]
async fn functional_sessions_listing_enriches_active_jobs() {
    let fixture = harness();
    let gate = fixture.runtime.hold_stream();
    fixture.runtime.script_stream(Vec::new(), Some(0));

    let receipt = fixture
        .supervisor
        .start("hold on", Some("enriched"))
        .await
        .expect("start");

    let sessions = fixture.supervisor.sessions().await.expect("sessions");
    assert_eq!(sessions.len(), 1);
    let summary = &sessions[0];
    assert_eq!(summary.session_key, "enriched");
    assert_eq!(summary.message_count, 1);
    let active = summary.active_job.as_ref().expect("active job");
    assert_eq!(active.job_id, receipt.job_id);
    assert_eq!(active.status, JobStatus::Running);

    gate.notify_one();
    wait_for_terminal(&fixture.supervisor, "enriched", &receipt.job_id).await;
}

#[tokio::test]
async fn regression_output_stall_after_first_chunk_classifies_idle_timeout() {
    let fixture = harness_with(|config| {
        config.startup_timeout = Duration::from_secs(5);
        config.idle_output_timeout = Duration::from_millis(120);
    });
    let _gate = fixture.runtime.hold_stream();
    fixture
        .runtime
        .script_stream(vec![delta_line("started fine")], None);

    let receipt = fixture
        .supervisor
        .start("goes quiet", Some("quiet"))
        .await
        .expect("start");
    let record = wait_for_terminal(&fixture.supervisor, "quiet", &receipt.job_id).await;
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.error_kind, Some(JobErrorKind::IdleTimeout));

    // The first chunk still made it into the log before the stall.
    let output = std::fs::read_to_string(&record.output_file).expect("read output");
    assert_eq!(output, "started fine");
}

#[tokio::test]
async fn functional_cleanup_ticker_prunes_idle_sessions_until_stopped() {
    let fixture = harness_with(|config| {
        config.session_idle_timeout = Duration::from_millis(50);
    });
    let store = fixture.supervisor.store().clone();
    store.create_session("expiring").await.expect("create session");

    tokio::time::sleep(Duration::from_millis(80)).await;
    let ticker = fixture
        .supervisor
        .spawn_cleanup_ticker(Duration::from_millis(30));

    let probe = store.clone();
    wait_until(Duration::from_secs(2), || {
        let sessions_dir = probe.sessions_dir().join("expiring");
        !sessions_dir.exists()
    })
    .await;
    ticker.stop().await;

    assert!(store
        .get_session("expiring")
        .await
        .expect("get")
        .is_none());
}

#[tokio::test]
async fn functional_output_cap_truncates_and_flags() {
    let fixture = harness_with(|config| config.max_output_bytes = 8);
    fixture.runtime.script_stream(
        vec![delta_line("01234"), delta_line("56789"), delta_line("after")],
        Some(0),
    );

    let receipt = fixture
        .supervisor
        .start("chatty", Some("capped"))
        .await
        .expect("start");
    let record = wait_for_terminal(&fixture.supervisor, "capped", &receipt.job_id).await;
    assert!(record.output_truncated);
    let output = std::fs::read_to_string(&record.output_file).expect("read output");
    assert_eq!(output, "01234567");
}
