use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use warden_store::{JobErrorKind, JobStatus};

const WEBHOOK_DELIVERY_TIMEOUT_SECONDS: u64 = 10;

/// Logical payload delivered once per terminal job transition.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JobCompletionEvent {
    pub job_id: String,
    pub session_key: String,
    pub status: JobStatus,
    pub elapsed_seconds: i64,
    pub output_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<JobErrorKind>,
}

/// One-shot outbound notification port. Implementations succeed or fail
/// silently; the supervisor never retries and never blocks on delivery.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &JobCompletionEvent);
}

/// Notifier that drops every event. Used when no webhook is configured.
#[derive(Debug, Clone, Default)]
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, _event: &JobCompletionEvent) {}
}

/// Posts completion events as JSON to a fixed webhook URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(WEBHOOK_DELIVERY_TIMEOUT_SECONDS))
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: &JobCompletionEvent) {
        match self.client.post(&self.url).json(event).send().await {
            Ok(response) if !response.status().is_success() => {
                tracing::warn!(
                    "webhook delivery for job {} returned {}",
                    event.job_id,
                    response.status()
                );
            }
            Ok(_) => {}
            Err(error) => {
                tracing::warn!("webhook delivery for job {} failed: {error}", event.job_id);
            }
        }
    }
}
