use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "warden",
    about = "Container-based job supervisor for assistant coding tasks",
    version
)]
pub(crate) struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Args)]
pub(crate) struct GlobalArgs {
    /// Directory holding session state. A leading `~` expands to $HOME.
    #[arg(
        long,
        env = "WARDEN_SESSIONS_DIR",
        default_value = "~/.warden/sessions"
    )]
    pub sessions_dir: String,

    /// Directory holding per-session workspaces. A leading `~` expands to
    /// $HOME.
    #[arg(
        long,
        env = "WARDEN_WORKSPACES_DIR",
        default_value = "~/.warden/workspaces"
    )]
    pub workspaces_dir: String,

    /// Container image used for job containers.
    #[arg(long, env = "WARDEN_IMAGE", default_value = "warden-runner:latest")]
    pub image: String,

    /// Webhook URL receiving completion notifications.
    #[arg(long, env = "WARDEN_WEBHOOK_URL")]
    pub webhook_url: Option<String>,

    /// Credential directory copied into each session's credential sink.
    #[arg(long, env = "WARDEN_CREDENTIALS_DIR")]
    pub credentials_dir: Option<String>,

    /// Seconds a session may sit idle before cleanup deletes it.
    #[arg(long, env = "WARDEN_SESSION_IDLE_SECONDS", default_value_t = 3_600)]
    pub session_idle_seconds: u64,

    /// Skip the start-up orphan reconciliation pass.
    #[arg(long, default_value_t = false)]
    pub skip_reconcile: bool,
}

#[derive(Debug, Subcommand)]
pub(crate) enum CliCommand {
    /// Launch a job for a prompt in a detached container.
    Start {
        #[arg(long)]
        prompt: String,
        #[arg(long)]
        session_id: Option<String>,
        /// Stay attached and poll until the job reaches a terminal status.
        #[arg(long, default_value_t = false)]
        wait: bool,
    },
    /// Inspect a job's status, activity, and output tail.
    Status {
        #[arg(long)]
        job_id: String,
        #[arg(long)]
        session_id: Option<String>,
    },
    /// Read one page of raw job output.
    Output {
        #[arg(long)]
        job_id: String,
        #[arg(long)]
        session_id: Option<String>,
        #[arg(long)]
        offset: Option<u64>,
        #[arg(long)]
        limit: Option<u64>,
    },
    /// Stop a job's container and mark the job cancelled.
    Cancel {
        #[arg(long)]
        job_id: String,
        #[arg(long)]
        session_id: Option<String>,
    },
    /// Delete idle sessions. Workspaces survive unless opted in.
    Cleanup {
        #[arg(long, default_value_t = false)]
        delete_workspaces: bool,
    },
    /// List sessions with activity and active-job summaries.
    Sessions,
    /// Print the tool definitions exposed to an embedding agent framework.
    Tools,
}
