//! Install marker artifact helpers.
//!
//! The marker is a small lock file written at the end of a successful
//! install. Its presence lets later initializations skip straight to the
//! build step. The format is a handful of `key=value` lines; only the
//! file's existence is significant to the coordinator.

use std::path::Path;

use chrono::Utc;
use tracing::debug;

use crate::errors::PipelineResult;

/// Returns true if a marker artifact exists at `path`.
///
/// Errors while probing (permissions, broken mounts) count as "not installed".
pub async fn marker_exists(path: &Path) -> bool {
    match tokio::fs::try_exists(path).await {
        Ok(exists) => exists,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Could not probe install marker");
            false
        }
    }
}

/// Writes the marker artifact at `path`, creating parent directories.
pub async fn write_marker(path: &Path) -> PipelineResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let contents = format!(
        "installed_at={}\nenginecore_version={}\n",
        Utc::now().to_rfc3339(),
        env!("CARGO_PKG_VERSION"),
    );
    tokio::fs::write(path, contents).await?;
    debug!(path = %path.display(), "Wrote install marker");
    Ok(())
}

/// Removes the marker artifact at `path`, forcing the next initialization
/// to run the install step. Removing a missing marker is not an error.
pub async fn remove_marker(path: &Path) -> PipelineResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_then_detect_marker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine").join("install.lock");

        assert!(!marker_exists(&path).await);
        write_marker(&path).await.unwrap();
        assert!(marker_exists(&path).await);

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(contents.starts_with("installed_at="));
        assert!(contents.contains("enginecore_version="));
    }

    #[tokio::test]
    async fn test_remove_marker_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("install.lock");

        write_marker(&path).await.unwrap();
        remove_marker(&path).await.unwrap();
        assert!(!marker_exists(&path).await);
        remove_marker(&path).await.unwrap();
    }
}
