use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use warden_core::expand_home;
use warden_runtime::docker::{DockerRuntime, DockerRuntimeConfig};
use warden_supervisor::{
    JobSupervisor, Notifier, NullNotifier, SupervisorConfig, WebhookNotifier,
};

use crate::bootstrap_helpers::probe_auth_capability;
use crate::cli_args::{Cli, CliCommand, GlobalArgs};

const WAIT_POLL_INTERVAL_MS: u64 = 1_000;

pub(crate) fn build_supervisor(global: &GlobalArgs) -> JobSupervisor {
    let credentials_source = global
        .credentials_dir
        .as_deref()
        .map(expand_home)
        .filter(|path| path.is_dir());
    let auth_available = probe_auth_capability(credentials_source.as_deref());

    let config = SupervisorConfig {
        sessions_dir: expand_home(&global.sessions_dir),
        workspaces_dir: expand_home(&global.workspaces_dir),
        session_idle_timeout: Duration::from_secs(global.session_idle_seconds),
        auth_available,
        credentials_source,
        ..SupervisorConfig::default()
    };
    let runtime = DockerRuntime::new(DockerRuntimeConfig {
        image: global.image.clone(),
        ..DockerRuntimeConfig::default()
    });
    let notifier: Arc<dyn Notifier> = match global.webhook_url.as_deref() {
        Some(url) => Arc::new(WebhookNotifier::new(url)),
        None => Arc::new(NullNotifier),
    };
    JobSupervisor::new(config, Arc::new(runtime), notifier)
}

pub(crate) async fn run_cli(cli: Cli) -> Result<()> {
    let supervisor = build_supervisor(&cli.global);
    if !cli.global.skip_reconcile {
        supervisor.reconcile_orphans().await;
    }

    match cli.command {
        CliCommand::Start {
            prompt,
            session_id,
            wait,
        } => {
            let receipt = supervisor.start(&prompt, session_id.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&receipt)?);
            if wait {
                wait_for_job(&supervisor, &receipt.job_id, &receipt.session_key).await?;
            }
        }
        CliCommand::Status { job_id, session_id } => {
            match supervisor.status(&job_id, session_id.as_deref()).await? {
                Some(report) => println!("{}", serde_json::to_string_pretty(&report)?),
                None => println!("job {job_id} not found"),
            }
        }
        CliCommand::Output {
            job_id,
            session_id,
            offset,
            limit,
        } => {
            match supervisor
                .output(&job_id, session_id.as_deref(), offset, limit)
                .await?
            {
                Some(page) => print!("{}", page.render()),
                None => println!("job {job_id} not found"),
            }
        }
        CliCommand::Cancel { job_id, session_id } => {
            let outcome = supervisor.cancel(&job_id, session_id.as_deref()).await?;
            println!("{}", outcome.describe());
        }
        CliCommand::Cleanup { delete_workspaces } => {
            let report = supervisor.cleanup(delete_workspaces).await?;
            println!("{}", report.describe());
        }
        CliCommand::Sessions => {
            let sessions = supervisor.sessions().await?;
            println!("{}", serde_json::to_string_pretty(&sessions)?);
        }
        CliCommand::Tools => {
            let definitions: Vec<serde_json::Value> = crate::tools::builtin_tools(supervisor)
                .iter()
                .map(|tool| {
                    let definition = tool.definition();
                    serde_json::json!({
                        "name": definition.name,
                        "description": definition.description,
                        "parameters": definition.parameters,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&definitions)?);
        }
    }
    Ok(())
}

/// Polls a started job until it leaves `pending`/`running`, printing the
/// final status report. The status path itself heals jobs whose watcher is
/// gone, so this remains correct even across supervisor restarts.
async fn wait_for_job(supervisor: &JobSupervisor, job_id: &str, session_key: &str) -> Result<()> {
    loop {
        tokio::time::sleep(Duration::from_millis(WAIT_POLL_INTERVAL_MS)).await;
        let Some(report) = supervisor.status(job_id, Some(session_key)).await? else {
            println!("job {job_id} disappeared while waiting");
            return Ok(());
        };
        if report.status.is_terminal() {
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }
    }
}
