use std::path::Path;

use anyhow::{anyhow, Context, Result};
use odoo_backup_core::RetentionPolicy;
use tracing::info;

use crate::retention::{sweep_remote_folder, SweepReport};
use crate::store::{RemoteFile, RemoteStore};

#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub folder_id: String,
    pub file: RemoteFile,
    pub sweep: SweepReport,
}

/// Look up the folder named exactly `name` (case-sensitive), creating it when
/// absent. Repeated calls return the same folder.
pub async fn resolve_folder(store: &dyn RemoteStore, name: &str) -> Result<String> {
    let existing = store
        .find_folders(name)
        .await
        .with_context(|| format!("look up remote folder {name:?}"))?;
    if let Some(folder) = existing.into_iter().find(|f| f.name == name) {
        return Ok(folder.id);
    }

    let created = store
        .create_folder(name)
        .await
        .with_context(|| format!("create remote folder {name:?}"))?;
    info!(folder_id = %created.id, name, "created remote backup folder");
    Ok(created.id)
}

/// Mirror one artifact into `folder_name`, then prune expired remote backups.
/// Pruning is best-effort and never fails the upload.
pub async fn upload_artifact(
    store: &dyn RemoteStore,
    folder_name: &str,
    local_path: &Path,
    policy: RetentionPolicy,
) -> Result<UploadOutcome> {
    let name = local_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("artifact path has no file name: {}", local_path.display()))?;

    let folder_id = resolve_folder(store, folder_name).await?;

    info!(path = %local_path.display(), folder_id = %folder_id, "uploading backup");
    let file = store
        .upload_file(&folder_id, &name, local_path)
        .await
        .with_context(|| format!("upload {}", local_path.display()))?;
    info!(file_id = %file.id, name = %file.name, "upload finished");

    let sweep = sweep_remote_folder(store, &folder_id, policy).await;

    Ok(UploadOutcome {
        folder_id,
        file,
        sweep,
    })
}
