/// Failures the API surface raises to callers.
///
/// Conditions that merely end with a message ("job already completed",
/// "job not found", "no idle sessions") are ordinary results, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    /// `start` requires a non-empty prompt.
    MissingPrompt,
    /// No authentication capability was discovered at registration.
    AuthUnavailable,
    /// The configured job image is not present in the runtime.
    ImageMissing,
    /// The session already has a job in `pending` or `running`.
    SessionBusy {
        session_key: String,
        job_id: String,
    },
    /// An operation named a session that does not exist.
    SessionNotFound(String),
    /// The runtime failed to create the job container.
    SpawnFailed { detail: String },
    /// Runtime introspection failed outright.
    Runtime(String),
    /// Persistence failed outright.
    Store(String),
}

impl std::fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingPrompt => write!(f, "prompt must be non-empty"),
            Self::AuthUnavailable => {
                write!(f, "no authentication capability is available")
            }
            Self::ImageMissing => {
                write!(f, "job container image was not found")
            }
            Self::SessionBusy {
                session_key,
                job_id,
            } => {
                write!(
                    f,
                    "session '{session_key}' already has an active job '{job_id}'"
                )
            }
            Self::SessionNotFound(session_key) => {
                write!(f, "session '{session_key}' was not found")
            }
            Self::SpawnFailed { detail } => {
                write!(f, "failed to start job container: {detail}")
            }
            Self::Runtime(detail) => write!(f, "container runtime failure: {detail}"),
            Self::Store(detail) => write!(f, "persistence failure: {detail}"),
        }
    }
}

impl std::error::Error for SupervisorError {}

impl From<anyhow::Error> for SupervisorError {
    fn from(error: anyhow::Error) -> Self {
        Self::Store(format!("{error:#}"))
    }
}
