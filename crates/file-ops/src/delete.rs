use std::io;
use std::path::{Path, PathBuf};

use peerxfer_transfer::PathValidator;

use crate::FileOpsError;

/// Deletes a single regular file under the validator's root.
///
/// Safety checks:
/// 1. Path must validate (no traversal, no escape through symlinks).
/// 2. Path must not be the root itself.
/// 3. Path must not be a directory.
///
/// A symlink is removed itself; its target is left alone. Returns the path
/// that was removed.
pub async fn delete_file(validator: &PathValidator, raw: &str) -> Result<PathBuf, FileOpsError> {
    let resolved = validator.validate(raw)?.into_path_buf();
    if resolved == validator.root() {
        return Err(FileOpsError::IsRoot);
    }
    let path = entry_path(validator, raw, resolved)?;

    let meta = match tokio::fs::symlink_metadata(&path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(FileOpsError::NotFound(raw.to_string()));
        }
        Err(e) => return Err(e.into()),
    };
    if meta.is_dir() {
        return Err(FileOpsError::IsDirectory(raw.to_string()));
    }

    tokio::fs::remove_file(&path).await?;
    tracing::info!(path = %path.display(), "deleted file");
    Ok(path)
}

/// The directory entry `raw` names: its parent resolved under the root,
/// its final component left as written.
fn entry_path(
    validator: &PathValidator,
    raw: &str,
    resolved: PathBuf,
) -> Result<PathBuf, FileOpsError> {
    let raw_path = Path::new(raw);
    let (Some(parent), Some(name)) = (raw_path.parent(), raw_path.file_name()) else {
        return Ok(resolved);
    };
    let parent = parent.to_string_lossy();
    let dir = if parent.is_empty() || parent == "/" {
        validator.root().to_path_buf()
    } else {
        validator.validate(&parent)?.into_path_buf()
    };
    Ok(dir.join(name))
}
