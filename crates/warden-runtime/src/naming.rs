/// Prefix identifying containers owned by the supervisor.
pub const CONTAINER_NAME_PREFIX: &str = "claude-";

/// Derives a container name from a session key.
///
/// Total and deterministic: every character outside `[A-Za-z0-9-]` becomes a
/// dash, and the owned prefix is prepended. The reconciler relies on
/// `session_key_from_container_name` being the exact inverse for names this
/// function produces.
pub fn container_name_from_session_key(session_key: &str) -> String {
    let sanitized: String = session_key
        .chars()
        .map(|character| {
            if character.is_ascii_alphanumeric() || character == '-' {
                character
            } else {
                '-'
            }
        })
        .collect();
    format!("{CONTAINER_NAME_PREFIX}{sanitized}")
}

/// Strips the owned prefix from a container name. `None` marks a container
/// that is not ours.
pub fn session_key_from_container_name(container_name: &str) -> Option<String> {
    container_name
        .strip_prefix(CONTAINER_NAME_PREFIX)
        .map(str::to_string)
}
