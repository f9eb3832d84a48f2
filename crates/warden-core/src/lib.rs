//! Foundational low-level utilities shared across Warden crates.
//!
//! Provides atomic file-write helpers, append-only output primitives, time
//! utilities, and home-directory path expansion used by persisted state.

pub mod atomic_io;
pub mod paths;
pub mod time_utils;

pub use atomic_io::{append_bytes, write_text_atomic};
pub use paths::expand_home;
pub use time_utils::{current_unix_timestamp, current_unix_timestamp_ms};
