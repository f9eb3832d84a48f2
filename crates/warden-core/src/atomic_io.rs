use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, Context, Result};

static WRITE_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Publishes a record by staging it in a hidden sibling file and renaming
/// it over the target, so a concurrent reader sees either the previous
/// snapshot or the new one, never a partial write.
///
/// Stage names are keyed off the record's file name plus the pid and a
/// process-wide sequence number: parallel writers racing on one record
/// (watcher vs. cancel vs. status healing) each stage in their own file.
pub fn write_text_atomic(path: &Path, content: &str) -> Result<()> {
    let Some(record_name) = path.file_name().and_then(|name| name.to_str()) else {
        bail!("record path '{}' has no usable file name", path.display());
    };
    if path.is_dir() {
        bail!("record path '{}' names a directory", path.display());
    }
    let parent = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)
        .with_context(|| format!("failed to prepare record directory {}", parent.display()))?;

    let staged_path = stage_path(&parent, record_name);
    {
        let mut staged = std::fs::File::create(&staged_path).with_context(|| {
            format!("failed to stage {record_name} at {}", staged_path.display())
        })?;
        staged
            .write_all(content.as_bytes())
            .with_context(|| format!("failed to write staged {record_name}"))?;
        staged
            .sync_all()
            .with_context(|| format!("failed to sync staged {record_name}"))?;
    }
    std::fs::rename(&staged_path, path)
        .with_context(|| format!("failed to publish staged record over {}", path.display()))?;
    Ok(())
}

fn stage_path(parent: &Path, record_name: &str) -> PathBuf {
    let sequence = WRITE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    parent.join(format!(
        ".{record_name}.stage.{}-{sequence}",
        std::process::id()
    ))
}

/// Appends raw bytes to `path`, creating parent directories and the file on
/// first use. Appends are O_APPEND; concurrent readers may observe growth.
pub fn append_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.write_all(bytes)
        .with_context(|| format!("failed to append {}", path.display()))?;
    file.flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    Ok(())
}
