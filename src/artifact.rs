//! Artifact Sink (C8, §4.8): moves the encoder's output file into the persisted artifact area
//! under a content-opaque id, and sweeps expired artifacts on a retention schedule.

use crate::error::{ClipforgeError, Result};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{info, warn};
use uuid::Uuid;

const ARTIFACT_MODE: u32 = 0o644;

/// A produced MP4 and its opaque id (§3).
#[derive(Debug, Clone)]
pub struct Artifact {
    pub id: String,
    pub path: PathBuf,
    pub byte_length: u64,
    pub created_at: SystemTime,
}

fn is_system_path(path: &Path) -> bool {
    const FORBIDDEN_PREFIXES: &[&str] = &["/etc/", "/proc/", "/sys/", "/dev/"];
    let s = path.to_string_lossy();
    FORBIDDEN_PREFIXES.iter().any(|p| s.starts_with(p))
}

fn reject_unsafe_path(path: &Path) -> Result<()> {
    let s = path.to_string_lossy();
    if s.contains("..") {
        return Err(ClipforgeError::StorageFailed(
            "path contains a traversal sequence".to_string(),
        ));
    }
    if is_system_path(path) {
        return Err(ClipforgeError::StorageFailed(
            "path points at a well-known system directory".to_string(),
        ));
    }
    Ok(())
}

/// Moves `local_path` into `output_dir` under a fresh uuid4 filename, mode 0644, and verifies
/// the copied size matches the source (§4.8).
pub async fn store(local_path: &Path, output_dir: &Path) -> Result<Artifact> {
    reject_unsafe_path(local_path)?;

    let source_len = tokio::fs::metadata(local_path)
        .await
        .map_err(|e| ClipforgeError::StorageFailed(format!("cannot stat source file: {e}")))?
        .len();

    tokio::fs::create_dir_all(output_dir)
        .await
        .map_err(|e| ClipforgeError::StorageFailed(format!("cannot create output dir: {e}")))?;

    let id = Uuid::new_v4().to_string();
    let dest = output_dir.join(format!("{id}.mp4"));

    if !dest.starts_with(output_dir) || is_system_path(&dest) {
        return Err(ClipforgeError::StorageFailed(
            "resolved destination escapes the configured output directory".to_string(),
        ));
    }

    // rename() fails across filesystems/mounts; fall back to copy + remove.
    if tokio::fs::rename(local_path, &dest).await.is_err() {
        tokio::fs::copy(local_path, &dest)
            .await
            .map_err(|e| ClipforgeError::StorageFailed(format!("copy to output dir failed: {e}")))?;
        let _ = tokio::fs::remove_file(local_path).await;
    }

    let dest_len = tokio::fs::metadata(&dest)
        .await
        .map_err(|e| ClipforgeError::StorageFailed(format!("cannot stat stored artifact: {e}")))?
        .len();
    if dest_len != source_len {
        return Err(ClipforgeError::StorageFailed(
            "stored artifact size does not match source".to_string(),
        ));
    }

    set_permissions(&dest).await?;

    info!(id, bytes = dest_len, "artifact stored");
    Ok(Artifact {
        id,
        path: dest,
        byte_length: dest_len,
        created_at: SystemTime::now(),
    })
}

#[cfg(unix)]
async fn set_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(ARTIFACT_MODE);
    tokio::fs::set_permissions(path, perms)
        .await
        .map_err(|e| ClipforgeError::StorageFailed(format!("cannot set artifact permissions: {e}")))
}

#[cfg(not(unix))]
async fn set_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

/// Removes artifacts in `output_dir` older than `retention` (§4.8's periodic sweep).
pub async fn sweep_expired(output_dir: &Path, retention: Duration) -> Result<usize> {
    let mut removed = 0usize;
    let mut entries = match tokio::fs::read_dir(output_dir).await {
        Ok(entries) => entries,
        Err(_) => return Ok(0),
    };

    let now = SystemTime::now();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| ClipforgeError::StorageFailed(format!("cannot read output dir: {e}")))?
    {
        let path = entry.path();
        let metadata = match entry.metadata().await {
            Ok(m) => m,
            Err(_) => continue,
        };
        let age = metadata
            .created()
            .or_else(|_| metadata.modified())
            .ok()
            .and_then(|t| now.duration_since(t).ok());
        if let Some(age) = age {
            if age > retention {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %e, "failed to remove expired artifact");
                } else {
                    removed += 1;
                }
            }
        }
    }
    Ok(removed)
}
