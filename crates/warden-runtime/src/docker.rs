//! Docker CLI adapter for the container runtime port.
//!
//! Every operation shells out to the `docker` binary; nothing here links
//! against a daemon API. Sandboxing flags (memory, cpu, network, capability
//! drops, tmpfs, mounts) are owned by this adapter, not by the supervisor.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::timeout;

use warden_store::ContainerMetrics;

use crate::naming::container_name_from_session_key;
use crate::{
    ContainerRuntime, ContainerState, ContainerSummary, LogQuery, StartContainerOptions,
    StartedContainer,
};

const DEFAULT_INTROSPECTION_TIMEOUT_SECONDS: u64 = 5;
const STREAM_READ_BUFFER_BYTES: usize = 8 * 1024;

/// Sandboxing and invocation settings for the Docker adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct DockerRuntimeConfig {
    pub docker_binary: String,
    pub image: String,
    pub memory_limit_mb: u64,
    pub cpu_limit: f64,
    pub network_mode: String,
    /// Mount point of the session workspace inside the container.
    pub workspace_mount: String,
    /// Mount point of the credential sink inside the container.
    pub credentials_mount: String,
    pub introspection_timeout: Duration,
}

impl Default for DockerRuntimeConfig {
    fn default() -> Self {
        Self {
            docker_binary: "docker".to_string(),
            image: "warden-runner:latest".to_string(),
            memory_limit_mb: 4_096,
            cpu_limit: 2.0,
            network_mode: "bridge".to_string(),
            workspace_mount: "/workspace".to_string(),
            credentials_mount: "/home/agent/.claude".to_string(),
            introspection_timeout: Duration::from_secs(DEFAULT_INTROSPECTION_TIMEOUT_SECONDS),
        }
    }
}

/// Container runtime backed by the Docker CLI.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    config: DockerRuntimeConfig,
}

impl DockerRuntime {
    pub fn new(config: DockerRuntimeConfig) -> Self {
        Self { config }
    }

    pub fn image(&self) -> &str {
        self.config.image.as_str()
    }

    async fn run_docker(
        &self,
        args: &[String],
        budget: Option<Duration>,
    ) -> Result<std::process::Output> {
        let mut command = Command::new(&self.config.docker_binary);
        command.args(args);
        command.stdin(Stdio::null());
        command.kill_on_drop(true);
        let pending = command.output();
        let output = match budget {
            Some(limit) => timeout(limit, pending).await.with_context(|| {
                format!(
                    "docker {} exceeded its {}s budget",
                    args.first().map(String::as_str).unwrap_or(""),
                    limit.as_secs()
                )
            })?,
            None => pending.await,
        }
        .with_context(|| format!("failed to invoke {}", self.config.docker_binary))?;
        Ok(output)
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn check_image(&self) -> Result<bool> {
        let args = vec![
            "image".to_string(),
            "inspect".to_string(),
            self.config.image.clone(),
        ];
        let output = self
            .run_docker(&args, Some(self.config.introspection_timeout))
            .await?;
        Ok(output.status.success())
    }

    async fn start_detached(&self, options: &StartContainerOptions) -> Result<StartedContainer> {
        // A stopped container from a previous job holds the deterministic
        // name; clear it before reuse.
        let _ = self
            .run_docker(
                &[
                    "rm".to_string(),
                    "-f".to_string(),
                    options.container_name.clone(),
                ],
                Some(self.config.introspection_timeout),
            )
            .await;

        let args = start_arguments(&self.config, options);
        let output = self.run_docker(&args, None).await?;
        if !output.status.success() {
            bail!(
                "docker run failed for '{}': {}",
                options.container_name,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(StartedContainer {
            container_name: options.container_name.clone(),
            container_id,
        })
    }

    async fn stream_logs(
        &self,
        container_name: &str,
        chunks: mpsc::Sender<Vec<u8>>,
    ) -> Result<Option<i64>> {
        let mut child = Command::new(&self.config.docker_binary)
            .args(["logs", "-f", container_name])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to follow logs for '{container_name}'"))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        tokio::join!(
            forward_stream(stdout, chunks.clone()),
            forward_stream(stderr, chunks),
        );
        let _ = child.wait().await;

        let wait_args = vec!["wait".to_string(), container_name.to_string()];
        let output = self.run_docker(&wait_args, None).await?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse::<i64>()
            .ok())
    }

    async fn get_logs(&self, container_name: &str, query: &LogQuery) -> Result<Option<Vec<u8>>> {
        let mut args = vec!["logs".to_string()];
        if let Some(since) = query.since {
            args.push("--since".to_string());
            args.push(since.to_rfc3339());
        }
        if let Some(tail) = query.tail {
            args.push("--tail".to_string());
            args.push(tail.to_string());
        }
        args.push(container_name.to_string());

        let output = self.run_docker(&args, None).await?;
        if !output.status.success() {
            return Ok(None);
        }
        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);
        Ok(Some(combined))
    }

    async fn get_state(&self, container_name: &str) -> Result<Option<ContainerState>> {
        let args = vec![
            "inspect".to_string(),
            "--format".to_string(),
            "{{json .State}}".to_string(),
            container_name.to_string(),
        ];
        let output = self
            .run_docker(&args, Some(self.config.introspection_timeout))
            .await?;
        if !output.status.success() {
            return Ok(None);
        }
        let raw = String::from_utf8_lossy(&output.stdout);
        Ok(parse_inspect_state(raw.trim()))
    }

    async fn get_stats(&self, container_name: &str) -> Result<Option<ContainerMetrics>> {
        let args = vec![
            "stats".to_string(),
            "--no-stream".to_string(),
            "--format".to_string(),
            "{{json .}}".to_string(),
            container_name.to_string(),
        ];
        let output = self
            .run_docker(&args, Some(self.config.introspection_timeout))
            .await?;
        if !output.status.success() {
            return Ok(None);
        }
        let raw = String::from_utf8_lossy(&output.stdout);
        Ok(parse_stats_line(raw.trim()))
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<ContainerSummary>> {
        let args = vec![
            "ps".to_string(),
            "-a".to_string(),
            "--format".to_string(),
            "{{json .}}".to_string(),
        ];
        let output = self
            .run_docker(&args, Some(self.config.introspection_timeout))
            .await?;
        if !output.status.success() {
            bail!(
                "docker ps failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        let raw = String::from_utf8_lossy(&output.stdout);
        Ok(parse_container_listing(&raw, prefix))
    }

    async fn kill(&self, session_key: &str) {
        let container_name = container_name_from_session_key(session_key);
        let args = vec!["rm".to_string(), "-f".to_string(), container_name.clone()];
        match self.run_docker(&args, Some(self.config.introspection_timeout)).await {
            Ok(output) if !output.status.success() => {
                tracing::debug!(
                    "docker rm -f '{}' reported: {}",
                    container_name,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
            }
            Ok(_) => {}
            Err(error) => {
                tracing::debug!("docker rm -f '{container_name}' failed: {error}");
            }
        }
    }
}

async fn forward_stream<R>(reader: Option<R>, chunks: mpsc::Sender<Vec<u8>>)
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return;
    };
    let mut buffer = [0u8; STREAM_READ_BUFFER_BYTES];
    loop {
        match reader.read(&mut buffer).await {
            Ok(0) => break,
            Ok(read) => {
                if chunks.send(buffer[..read].to_vec()).await.is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    }
}

fn start_arguments(config: &DockerRuntimeConfig, options: &StartContainerOptions) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        options.container_name.clone(),
        "--memory".to_string(),
        format!("{}m", config.memory_limit_mb),
        "--cpus".to_string(),
        config.cpu_limit.to_string(),
        "--network".to_string(),
        config.network_mode.clone(),
        "--cap-drop".to_string(),
        "ALL".to_string(),
        "--security-opt".to_string(),
        "no-new-privileges".to_string(),
        "--tmpfs".to_string(),
        "/tmp".to_string(),
        "-v".to_string(),
        format!(
            "{}:{}",
            options.workspace_dir.display(),
            config.workspace_mount
        ),
        "-w".to_string(),
        config.workspace_mount.clone(),
    ];
    if let Some(credentials_dir) = options.credentials_dir.as_deref() {
        args.push("-v".to_string());
        args.push(format!(
            "{}:{}:ro",
            credentials_dir.display(),
            config.credentials_mount
        ));
    }
    if let Some(resume) = options.assistant_session_id.as_deref() {
        args.push("-e".to_string());
        args.push(format!("ASSISTANT_SESSION_ID={resume}"));
    }
    args.push(config.image.clone());
    args.push(options.prompt.clone());
    args
}

#[derive(Debug, Deserialize)]
struct InspectStateJson {
    #[serde(rename = "Running", default)]
    running: bool,
    #[serde(rename = "ExitCode", default)]
    exit_code: Option<i64>,
    #[serde(rename = "StartedAt", default)]
    started_at: Option<String>,
    #[serde(rename = "FinishedAt", default)]
    finished_at: Option<String>,
}

fn parse_inspect_state(raw: &str) -> Option<ContainerState> {
    let state: InspectStateJson = serde_json::from_str(raw).ok()?;
    Some(ContainerState {
        running: state.running,
        exit_code: if state.running { None } else { state.exit_code },
        started_at: state.started_at.as_deref().and_then(parse_docker_instant),
        finished_at: state.finished_at.as_deref().and_then(parse_docker_instant),
    })
}

/// Docker reports unset instants as the zero time; those map to `None`.
fn parse_docker_instant(raw: &str) -> Option<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw).ok()?;
    let utc = parsed.with_timezone(&Utc);
    if utc.year() <= 1 {
        return None;
    }
    Some(utc)
}

#[derive(Debug, Deserialize)]
struct StatsJson {
    #[serde(rename = "MemUsage", default)]
    mem_usage: String,
    #[serde(rename = "MemPerc", default)]
    mem_perc: String,
    #[serde(rename = "CPUPerc", default)]
    cpu_perc: String,
}

fn parse_stats_line(raw: &str) -> Option<ContainerMetrics> {
    let stats: StatsJson = serde_json::from_str(raw).ok()?;
    let (mem_mb, mem_limit_mb) = parse_mem_usage(&stats.mem_usage);
    Some(ContainerMetrics {
        mem_mb,
        mem_limit_mb,
        mem_pct: parse_percent(&stats.mem_perc),
        cpu_pct: parse_percent(&stats.cpu_perc),
    })
}

fn parse_percent(raw: &str) -> Option<f64> {
    raw.trim().strip_suffix('%')?.trim().parse::<f64>().ok()
}

/// Parses a docker `MemUsage` column, e.g. `"123.4MiB / 4GiB"`, into
/// `(used_mb, limit_mb)`.
fn parse_mem_usage(raw: &str) -> (Option<f64>, Option<f64>) {
    let mut parts = raw.splitn(2, '/');
    let used = parts.next().and_then(|value| parse_size_mb(value.trim()));
    let limit = parts.next().and_then(|value| parse_size_mb(value.trim()));
    (used, limit)
}

fn parse_size_mb(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let split_at = trimmed
        .find(|character: char| character.is_ascii_alphabetic())
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split_at);
    let value = number.trim().parse::<f64>().ok()?;
    let bytes = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => value,
        "kib" => value * 1024.0,
        "mib" => value * 1024.0 * 1024.0,
        "gib" => value * 1024.0 * 1024.0 * 1024.0,
        "tib" => value * 1024.0 * 1024.0 * 1024.0 * 1024.0,
        "kb" => value * 1e3,
        "mb" => value * 1e6,
        "gb" => value * 1e9,
        "tb" => value * 1e12,
        _ => return None,
    };
    Some(bytes / (1024.0 * 1024.0))
}

#[derive(Debug, Deserialize)]
struct PsJson {
    #[serde(rename = "Names", default)]
    names: String,
    #[serde(rename = "State", default)]
    state: String,
    #[serde(rename = "CreatedAt", default)]
    created_at: String,
}

fn parse_container_listing(raw: &str, prefix: &str) -> Vec<ContainerSummary> {
    let mut summaries = Vec::new();
    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Ok(row) = serde_json::from_str::<PsJson>(trimmed) else {
            continue;
        };
        let name = row
            .names
            .split(',')
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();
        if !name.starts_with(prefix) {
            continue;
        }
        summaries.push(ContainerSummary {
            name,
            running: row.state.eq_ignore_ascii_case("running"),
            created_at: parse_ps_created_at(&row.created_at),
        });
    }
    summaries.sort_by(|left, right| left.name.cmp(&right.name));
    summaries
}

/// Parses docker's `CreatedAt` column, e.g. `"2024-05-14 10:00:00 +0000 UTC"`.
fn parse_ps_created_at(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim().trim_end_matches(|character: char| {
        character.is_ascii_alphabetic() || character == ' '
    });
    DateTime::parse_from_str(trimmed.trim(), "%Y-%m-%d %H:%M:%S %z")
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn options() -> StartContainerOptions {
        StartContainerOptions {
            container_name: "claude-alpha".to_string(),
            session_key: "alpha".to_string(),
            prompt: "fix the tests".to_string(),
            workspace_dir: PathBuf::from("/data/workspaces/alpha"),
            credentials_dir: Some(PathBuf::from("/data/sessions/alpha/.claude")),
            assistant_session_id: Some("resume-1".to_string()),
        }
    }

    #[test]
    fn unit_start_arguments_carry_sandbox_and_mount_flags() {
        let config = DockerRuntimeConfig::default();
        let args = start_arguments(&config, &options());

        assert_eq!(args[0], "run");
        assert_eq!(args[1], "-d");
        assert!(args.contains(&"claude-alpha".to_string()));
        assert!(args.contains(&"--memory".to_string()));
        assert!(args.contains(&"4096m".to_string()));
        assert!(args.contains(&"--cap-drop".to_string()));
        assert!(args.contains(&"/data/workspaces/alpha:/workspace".to_string()));
        assert!(args.contains(&"/data/sessions/alpha/.claude:/home/agent/.claude:ro".to_string()));
        assert!(args.contains(&"ASSISTANT_SESSION_ID=resume-1".to_string()));
        assert_eq!(args[args.len() - 2], "warden-runner:latest");
        assert_eq!(args[args.len() - 1], "fix the tests");
    }

    #[test]
    fn unit_start_arguments_omit_optional_mounts() {
        let config = DockerRuntimeConfig::default();
        let mut request = options();
        request.credentials_dir = None;
        request.assistant_session_id = None;
        let args = start_arguments(&config, &request);
        assert!(!args.iter().any(|argument| argument.ends_with(":ro")));
        assert!(!args.iter().any(|argument| argument.starts_with("ASSISTANT_SESSION_ID")));
    }

    #[test]
    fn unit_parse_percent_handles_docker_format() {
        assert_eq!(parse_percent("13.37%"), Some(13.37));
        assert_eq!(parse_percent(" 0.00% "), Some(0.0));
        assert_eq!(parse_percent("--"), None);
        assert_eq!(parse_percent(""), None);
    }

    #[test]
    fn unit_parse_mem_usage_converts_units_to_mb() {
        let (used, limit) = parse_mem_usage("512MiB / 4GiB");
        assert_eq!(used, Some(512.0));
        assert_eq!(limit, Some(4096.0));

        let (small, _) = parse_mem_usage("2048KiB / 1GiB");
        assert_eq!(small, Some(2.0));

        assert_eq!(parse_mem_usage("bogus"), (None, None));
    }

    #[test]
    fn functional_parse_stats_line_builds_metrics() {
        let raw = r#"{"MemUsage":"128MiB / 2GiB","MemPerc":"6.25%","CPUPerc":"42.00%"}"#;
        let metrics = parse_stats_line(raw).expect("metrics");
        assert_eq!(metrics.mem_mb, Some(128.0));
        assert_eq!(metrics.mem_limit_mb, Some(2048.0));
        assert_eq!(metrics.mem_pct, Some(6.25));
        assert_eq!(metrics.cpu_pct, Some(42.0));
    }

    #[test]
    fn functional_parse_inspect_state_maps_zero_instants_to_none() {
        let stopped = r#"{"Running":false,"ExitCode":137,"StartedAt":"2024-05-14T10:00:00Z","FinishedAt":"2024-05-14T10:05:00Z"}"#;
        let state = parse_inspect_state(stopped).expect("state");
        assert!(!state.running);
        assert_eq!(state.exit_code, Some(137));
        assert!(state.finished_at.is_some());

        let fresh = r#"{"Running":true,"ExitCode":0,"StartedAt":"2024-05-14T10:00:00Z","FinishedAt":"0001-01-01T00:00:00Z"}"#;
        let state = parse_inspect_state(fresh).expect("state");
        assert!(state.running);
        assert_eq!(state.exit_code, None);
        assert!(state.finished_at.is_none());
    }

    #[test]
    fn functional_parse_container_listing_filters_by_prefix() {
        let raw = concat!(
            r#"{"Names":"claude-alpha","State":"running","CreatedAt":"2024-05-14 10:00:00 +0000 UTC"}"#,
            "\n",
            r#"{"Names":"postgres-main","State":"running","CreatedAt":"2024-05-14 09:00:00 +0000 UTC"}"#,
            "\n",
            r#"{"Names":"claude-beta","State":"exited","CreatedAt":"2024-05-14 08:00:00 +0000 UTC"}"#,
            "\n",
            "not json",
        );
        let listing = parse_container_listing(raw, "claude-");
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].name, "claude-alpha");
        assert!(listing[0].running);
        assert!(listing[0].created_at.is_some());
        assert_eq!(listing[1].name, "claude-beta");
        assert!(!listing[1].running);
    }
}
