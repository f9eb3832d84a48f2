//! Job lifecycle supervision for container-backed assistant runs.
//!
//! A `start` request creates (or reuses) a session, launches a detached job
//! container, and spawns a watcher that streams the container's transcript,
//! appends extracted text to the job's output log, detects terminal signals,
//! classifies the exit, persists the terminal record, and fires a completion
//! notification. Status, output, cancel, cleanup, and session listing round
//! out the API surface; a one-shot reconciler aligns persisted jobs with
//! live containers at start-up.

pub mod api;
mod classify;
pub mod config;
pub mod error;
pub mod notifier;
mod reconciler;
mod supervisor;
mod ticker;
mod watcher;

pub use api::{
    ActiveJobSummary, ActivityState, CancelOutcome, CleanupReport, OutputPage, SessionSummary,
    StartReceipt, StatusReport,
};
pub use config::SupervisorConfig;
pub use error::SupervisorError;
pub use notifier::{JobCompletionEvent, Notifier, NullNotifier, WebhookNotifier};
pub use supervisor::JobSupervisor;
pub use ticker::CleanupTicker;

#[cfg(test)]
mod tests;
