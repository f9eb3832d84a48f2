use std::path::Path;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

pub(crate) fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

/// Probes for an authentication capability: an API key in the environment,
/// or a readable credential directory to materialize into sessions. The
/// supervisor core only ever sees the resulting boolean.
pub(crate) fn probe_auth_capability(credentials_dir: Option<&Path>) -> bool {
    let has_api_key = std::env::var("ANTHROPIC_API_KEY")
        .map(|value| !value.trim().is_empty())
        .unwrap_or(false);
    if has_api_key {
        return true;
    }
    credentials_dir.is_some_and(Path::is_dir)
}
