//! Container runtime port.
//!
//! The supervisor sees containers only through the [`ContainerRuntime`]
//! trait; all sandboxing decisions (memory, cpu, network, capability drops,
//! mounts) belong to the adapter behind it. [`docker::DockerRuntime`] is the
//! production adapter, shelling out to the Docker CLI.

pub mod docker;
pub mod naming;

use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use warden_store::ContainerMetrics;

pub use naming::{
    container_name_from_session_key, session_key_from_container_name, CONTAINER_NAME_PREFIX,
};

/// Launch request for one detached job container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartContainerOptions {
    pub container_name: String,
    pub session_key: String,
    pub prompt: String,
    pub workspace_dir: PathBuf,
    /// Session credential sink to mount read-only, when materialized.
    pub credentials_dir: Option<PathBuf>,
    /// Assistant resume handle from a previous job in the session.
    pub assistant_session_id: Option<String>,
}

/// Identifiers returned by a successful detached start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedContainer {
    pub container_name: String,
    pub container_id: String,
}

/// Point-in-time container state from runtime inspection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerState {
    pub running: bool,
    pub exit_code: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// One row of a prefix-scoped container listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSummary {
    pub name: String,
    pub running: bool,
    pub created_at: Option<DateTime<Utc>>,
}

/// Bounds for a non-streaming log fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogQuery {
    pub since: Option<DateTime<Utc>>,
    pub tail: Option<u64>,
}

/// Operations the supervisor needs from a container runtime.
///
/// Introspection calls (`get_state`, `get_stats`) carry a hard 5-second
/// budget enforced by the adapter. `kill` is idempotent and never errors.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Returns true when the configured job image is present.
    async fn check_image(&self) -> Result<bool>;

    /// Launches a detached container for one job.
    async fn start_detached(&self, options: &StartContainerOptions) -> Result<StartedContainer>;

    /// Streams the container's combined stdout/stderr in arrival order until
    /// it exits, then returns the exit code. `None` means the container
    /// disappeared before the code could be observed.
    async fn stream_logs(
        &self,
        container_name: &str,
        chunks: mpsc::Sender<Vec<u8>>,
    ) -> Result<Option<i64>>;

    /// One-shot log fetch. `None` when the container is gone.
    async fn get_logs(&self, container_name: &str, query: &LogQuery) -> Result<Option<Vec<u8>>>;

    /// Inspects current container state. `None` when the container is gone.
    async fn get_state(&self, container_name: &str) -> Result<Option<ContainerState>>;

    /// Samples resource usage. `None` when the container is gone or stopped.
    async fn get_stats(&self, container_name: &str) -> Result<Option<ContainerMetrics>>;

    /// Lists containers whose name begins with `prefix`.
    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<ContainerSummary>>;

    /// Kills and removes the session's container. Safe to call when the
    /// container never existed or is already gone.
    async fn kill(&self, session_key: &str);
}
