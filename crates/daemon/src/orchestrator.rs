use std::fmt;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use odoo_backup_core::RetentionPolicy;
use odoo_backup_export::{export_database, ExportRequest};
use odoo_backup_storage::{sweep_local_dir, upload_artifact, RemoteStore, SweepReport};
use tracing::{error, info, warn};

/// Progress of one backup run. `Failed` is only reached from the backup or
/// upload steps; cleanup and retention failures are logged and the run
/// continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Init,
    BackedUp,
    Uploaded,
    LocalCleaned,
    RetentionSwept,
    Done,
    Failed,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStage::Init => "init",
            RunStage::BackedUp => "backed-up",
            RunStage::Uploaded => "uploaded",
            RunStage::LocalCleaned => "local-cleaned",
            RunStage::RetentionSwept => "retention-swept",
            RunStage::Done => "done",
            RunStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct RunPlan {
    pub export: ExportRequest,
    pub backup_dir: PathBuf,
    pub folder_name: String,
    pub retention: RetentionPolicy,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub artifact: PathBuf,
    pub size_bytes: u64,
    pub export_ms: i64,
    pub remote_file_id: String,
    pub local_removed: bool,
    pub remote_sweep: SweepReport,
    pub local_sweep: SweepReport,
    pub stage: RunStage,
}

struct Run {
    stage: RunStage,
}

impl Run {
    fn advance(&mut self, next: RunStage) {
        info!(from = %self.stage, to = %next, "backup run advanced");
        self.stage = next;
    }

    fn fail(&mut self, e: anyhow::Error) -> anyhow::Error {
        let step = self.stage;
        self.stage = RunStage::Failed;
        error!(after = %step, error = %format!("{e:#}"), "backup run aborted");
        e.context(format!("backup run failed after stage {step}"))
    }
}

/// Export, upload, remove the local copy, prune the backup directory.
pub async fn run_backup(http: &reqwest::Client, store: &dyn RemoteStore, plan: &RunPlan) -> Result<RunReport> {
    let mut run = Run { stage: RunStage::Init };

    if let Err(e) = fs::create_dir_all(&plan.backup_dir)
        .with_context(|| format!("create backup directory {}", plan.backup_dir.display()))
    {
        return Err(run.fail(e));
    }

    let artifact = match export_database(http, &plan.export, &plan.backup_dir).await {
        Ok(artifact) => artifact,
        Err(e) => return Err(run.fail(e.context("database export"))),
    };
    run.advance(RunStage::BackedUp);

    let upload = match upload_artifact(store, &plan.folder_name, &artifact.path, plan.retention).await {
        Ok(upload) => upload,
        Err(e) => return Err(run.fail(e.context("upload to remote storage"))),
    };
    run.advance(RunStage::Uploaded);

    let local_removed = match fs::remove_file(&artifact.path) {
        Ok(()) => {
            info!(path = %artifact.path.display(), "removed uploaded local backup");
            true
        }
        Err(e) => {
            warn!(path = %artifact.path.display(), error = %e, "failed to remove uploaded local backup");
            false
        }
    };
    run.advance(RunStage::LocalCleaned);

    let local_sweep = sweep_local_dir(&plan.backup_dir, plan.retention);
    run.advance(RunStage::RetentionSwept);

    run.advance(RunStage::Done);
    Ok(RunReport {
        artifact: artifact.path,
        size_bytes: artifact.size_bytes,
        export_ms: artifact.duration_ms,
        remote_file_id: upload.file.id,
        local_removed,
        remote_sweep: upload.sweep,
        local_sweep,
        stage: run.stage,
    })
}
