use chrono::Utc;

use warden_store::{JobErrorKind, JobStatus};
use warden_stream::{parse_line, AuthErrorKind, RateLimitSignal, StreamEvent};

/// Exit code the kernel reports for an OOM kill.
pub(crate) const OOM_EXIT_CODE: i64 = 137;

/// The last terminal signal seen on a job's stream. Overwrite-last-wins:
/// only the final signal matters for classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TerminalSignal {
    RateLimit(RateLimitSignal),
    Auth(AuthErrorKind),
}

/// Terminal classification of a finished job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TerminalOutcome {
    pub status: JobStatus,
    pub error_kind: Option<JobErrorKind>,
    pub error_message: Option<String>,
}

impl TerminalOutcome {
    fn completed() -> Self {
        Self {
            status: JobStatus::Completed,
            error_kind: None,
            error_message: None,
        }
    }

    fn failed(kind: JobErrorKind, message: String) -> Self {
        Self {
            status: JobStatus::Failed,
            error_kind: Some(kind),
            error_message: Some(message),
        }
    }
}

/// Classifies a finished job from its exit code and any terminal signal.
///
/// A terminal signal forces `failed` regardless of the exit code; exit 137
/// maps to the OOM kind; any other non-zero (or unknown) exit is a crash.
pub(crate) fn classify_exit(
    exit_code: Option<i64>,
    signal: Option<&TerminalSignal>,
) -> TerminalOutcome {
    match signal {
        Some(TerminalSignal::RateLimit(rate_limit)) => TerminalOutcome::failed(
            JobErrorKind::RateLimit,
            format!(
                "rate limit hit; wait {} minutes (resets at {})",
                rate_limit.wait_minutes, rate_limit.reset_time
            ),
        ),
        Some(TerminalSignal::Auth(kind)) => {
            let error_kind = match kind {
                AuthErrorKind::TokenExpired => JobErrorKind::AuthTokenExpired,
                AuthErrorKind::AuthenticationFailed => JobErrorKind::AuthFailed,
            };
            TerminalOutcome::failed(error_kind, kind.describe().to_string())
        }
        None => match exit_code {
            Some(0) => TerminalOutcome::completed(),
            Some(OOM_EXIT_CODE) => TerminalOutcome::failed(
                JobErrorKind::Oom,
                format!("container exited with code {OOM_EXIT_CODE} (out of memory)"),
            ),
            Some(code) => TerminalOutcome::failed(
                JobErrorKind::Crash,
                format!("container exited with code {code}"),
            ),
            None => TerminalOutcome::failed(
                JobErrorKind::Crash,
                "container exited with unknown status".to_string(),
            ),
        },
    }
}

/// Scans drained log lines for the last terminal signal, the same way the
/// watcher would have while streaming.
pub(crate) fn scan_terminal_signal<'a, I>(lines: I) -> Option<TerminalSignal>
where
    I: IntoIterator<Item = &'a str>,
{
    let now = Utc::now();
    let mut last = None;
    for line in lines {
        for event in parse_line(line, now) {
            match event {
                StreamEvent::RateLimit { signal, .. } => {
                    last = Some(TerminalSignal::RateLimit(signal));
                }
                StreamEvent::AuthError { kind, .. } => {
                    last = Some(TerminalSignal::Auth(kind));
                }
                StreamEvent::TextFragment { .. } => {}
            }
        }
    }
    last
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_classify_exit_maps_codes_without_signals() {
        let clean = classify_exit(Some(0), None);
        assert_eq!(clean.status, JobStatus::Completed);
        assert!(clean.error_kind.is_none());

        let oom = classify_exit(Some(137), None);
        assert_eq!(oom.status, JobStatus::Failed);
        assert_eq!(oom.error_kind, Some(JobErrorKind::Oom));

        let crash = classify_exit(Some(2), None);
        assert_eq!(crash.error_kind, Some(JobErrorKind::Crash));
        assert!(crash
            .error_message
            .as_deref()
            .is_some_and(|message| message.contains("code 2")));

        let unknown = classify_exit(None, None);
        assert_eq!(unknown.error_kind, Some(JobErrorKind::Crash));
    }

    #[test]
    fn unit_rate_limit_signal_overrides_clean_exit() {
        let signal = TerminalSignal::RateLimit(RateLimitSignal {
            reset_time: "8pm".to_string(),
            wait_minutes: 120,
        });
        let outcome = classify_exit(Some(0), Some(&signal));
        assert_eq!(outcome.status, JobStatus::Failed);
        assert_eq!(outcome.error_kind, Some(JobErrorKind::RateLimit));
        assert!(outcome
            .error_message
            .as_deref()
            .is_some_and(|message| message.contains("120 minutes")));
    }

    #[test]
    fn unit_auth_signals_map_to_their_kinds() {
        let expired = classify_exit(Some(0), Some(&TerminalSignal::Auth(AuthErrorKind::TokenExpired)));
        assert_eq!(expired.error_kind, Some(JobErrorKind::AuthTokenExpired));

        let failed = classify_exit(
            Some(1),
            Some(&TerminalSignal::Auth(AuthErrorKind::AuthenticationFailed)),
        );
        assert_eq!(failed.error_kind, Some(JobErrorKind::AuthFailed));
    }

    #[test]
    fn functional_scan_terminal_signal_keeps_the_last_signal() {
        let lines = [
            r#"{"event":{"type":"content_block_delta","delta":{"text":"working"}}}"#,
            r#"{"type":"result","is_error":true,"result":"Failed to authenticate"}"#,
            r#"{"type":"result","is_error":true,"result":"You've hit your limit · resets 8pm (UTC)"}"#,
        ];
        let signal = scan_terminal_signal(lines.iter().copied()).expect("signal");
        assert!(matches!(signal, TerminalSignal::RateLimit(_)));
    }
}
