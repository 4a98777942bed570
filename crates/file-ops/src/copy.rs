use std::path::PathBuf;

use peerxfer_transfer::{PathValidator, destination_for, relative_names};

use crate::FileOpsError;

/// One file copied by [`copy_local`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopiedFile {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub bytes: u64,
}

/// Copies every file matched by `source_pattern` to `dest`, both under the
/// validator's root.
///
/// Destinations follow the same naming rules as peer transfers. Parent
/// directories are created as needed; existing files are overwritten.
/// Stops at the first failure, keeping files already copied.
pub async fn copy_local(
    validator: &PathValidator,
    source_pattern: &str,
    dest: &str,
) -> Result<Vec<CopiedFile>, FileOpsError> {
    let files = validator.expand_sources(source_pattern)?;
    let multiple = files.len() > 1;
    let names = relative_names(&files);

    let mut copied = Vec::with_capacity(files.len());
    for (file, relative) in files.iter().zip(&names) {
        let target = destination_for(relative, dest, multiple);
        let destination = validator.validate(&target)?.into_path_buf();
        if destination == file.as_path() {
            return Err(FileOpsError::SamePath(target));
        }
        if destination == validator.root() || destination.is_dir() {
            return Err(FileOpsError::IsDirectory(target));
        }
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let bytes = tokio::fs::copy(file.as_path(), &destination).await?;
        tracing::info!(
            source = %file,
            destination = %destination.display(),
            bytes,
            "copied file"
        );
        copied.push(CopiedFile {
            source: file.as_path().to_path_buf(),
            destination,
            bytes,
        });
    }
    Ok(copied)
}
