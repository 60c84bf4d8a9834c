//! Age-based pruning of backup artifacts.
//!
//! Both sweepers are best-effort: enumeration or per-entry failures are
//! logged and recorded in the returned [`SweepReport`], never propagated.
//! Eligibility is keyed off the last modification time on both sides; backup
//! artifacts are never rewritten, so this equals their creation time.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use odoo_backup_core::RetentionPolicy;
use tracing::{error, info, warn};

use crate::store::RemoteStore;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Names of deleted entries.
    pub deleted: Vec<String>,
    /// Names of entries that were eligible but could not be deleted or inspected.
    pub failed: Vec<String>,
    /// False when the directory or folder could not be enumerated at all.
    pub enumerated: bool,
}

pub fn sweep_local_dir(dir: &Path, policy: RetentionPolicy) -> SweepReport {
    sweep_local_dir_at(dir, policy, Utc::now())
}

pub fn sweep_local_dir_at(dir: &Path, policy: RetentionPolicy, now: DateTime<Utc>) -> SweepReport {
    let mut report = SweepReport::default();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            error!(dir = %dir.display(), error = %e, "cannot read backup directory");
            return report;
        }
    };
    report.enumerated = true;

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path();

        let modified = match entry.metadata().and_then(|m| {
            if m.is_dir() {
                Ok(None)
            } else {
                m.modified().map(Some)
            }
        }) {
            Ok(Some(modified)) => DateTime::<Utc>::from(modified),
            Ok(None) => continue,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read file metadata");
                report.failed.push(name);
                continue;
            }
        };

        if !policy.is_expired(modified, now) {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(path = %path.display(), "deleted expired local backup");
                report.deleted.push(name);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to delete expired local backup");
                report.failed.push(name);
            }
        }
    }

    info!(
        dir = %dir.display(),
        deleted = report.deleted.len(),
        failed = report.failed.len(),
        max_age_days = policy.max_age_days,
        "local retention sweep finished"
    );
    report
}

pub async fn sweep_remote_folder(store: &dyn RemoteStore, folder_id: &str, policy: RetentionPolicy) -> SweepReport {
    sweep_remote_folder_at(store, folder_id, policy, Utc::now()).await
}

pub async fn sweep_remote_folder_at(
    store: &dyn RemoteStore,
    folder_id: &str,
    policy: RetentionPolicy,
    now: DateTime<Utc>,
) -> SweepReport {
    let mut report = SweepReport::default();
    let files = match store.list_files(folder_id).await {
        Ok(files) => files,
        Err(e) => {
            error!(folder_id, error = %e, "cannot list remote backups");
            return report;
        }
    };
    report.enumerated = true;

    for file in files {
        let Some(reference) = file.modified_time.or(file.created_time) else {
            warn!(file_id = %file.id, name = %file.name, "remote backup has no timestamp, keeping it");
            continue;
        };
        if !policy.is_expired(reference, now) {
            continue;
        }
        match store.delete_file(&file.id).await {
            Ok(()) => {
                info!(file_id = %file.id, name = %file.name, "deleted expired remote backup");
                report.deleted.push(file.name);
            }
            Err(e) => {
                warn!(file_id = %file.id, name = %file.name, error = %e, "failed to delete expired remote backup");
                report.failed.push(file.name);
            }
        }
    }

    info!(
        folder_id,
        deleted = report.deleted.len(),
        failed = report.failed.len(),
        max_age_days = policy.max_age_days,
        "remote retention sweep finished"
    );
    report
}
