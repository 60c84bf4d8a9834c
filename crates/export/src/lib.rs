use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Local;
use odoo_backup_core::artifact_file_name;
use reqwest::StatusCode;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// Path of Odoo's database manager export route, relative to the base URL.
pub const EXPORT_PATH: &str = "/web/database/backup";

#[derive(Clone)]
pub struct ExportRequest {
    pub base_url: String,
    pub database: String,
    pub master_password: String,
}

impl fmt::Debug for ExportRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportRequest")
            .field("base_url", &self.base_url)
            .field("database", &self.database)
            .field("master_password", &"<redacted>")
            .finish()
    }
}

impl ExportRequest {
    pub fn endpoint(&self) -> String {
        format!("{}{EXPORT_PATH}", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone)]
pub struct ExportedArtifact {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub duration_ms: i64,
}

#[derive(Debug, Error)]
pub enum ExportError {
    /// Odoo answered with something other than 200; `body` is its diagnostic verbatim.
    #[error("odoo export failed with status {status}: {body}")]
    Status { status: u16, body: String },
}

/// Ask Odoo for a zip export of `request.database` and stream it into a new
/// timestamped file under `dir`.
///
/// A non-200 answer creates no file. A transport error while streaming removes
/// the partial file. A body that ends early without a transport error is not
/// detected.
pub async fn export_database(
    client: &reqwest::Client,
    request: &ExportRequest,
    dir: &Path,
) -> Result<ExportedArtifact> {
    let start = Instant::now();
    let url = request.endpoint();
    info!(%url, database = %request.database, "requesting database export");

    let mut response = client
        .post(&url)
        .form(&[
            ("master_pwd", request.master_password.as_str()),
            ("name", request.database.as_str()),
            ("backup_format", "zip"),
        ])
        .send()
        .await
        .with_context(|| format!("send export request to {url}"))?;

    if response.status() != StatusCode::OK {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        return Err(ExportError::Status { status, body }.into());
    }

    let file_name = artifact_file_name(&request.database, Local::now().naive_local());
    let path = dir.join(&file_name);
    let mut file = tokio::fs::File::create(&path)
        .await
        .with_context(|| format!("create backup file: {}", path.display()))?;

    let written = copy_body(&mut response, &mut file, &path).await;
    drop(file);
    let size_bytes = match written {
        Ok(size) => size,
        Err(e) => {
            if let Err(rm) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %rm, "failed to remove partial backup file");
            }
            return Err(e);
        }
    };

    let duration_ms = start.elapsed().as_millis() as i64;
    info!(path = %path.display(), size_bytes, duration_ms, "backup written");
    Ok(ExportedArtifact {
        path,
        size_bytes,
        duration_ms,
    })
}

async fn copy_body(response: &mut reqwest::Response, file: &mut tokio::fs::File, path: &Path) -> Result<u64> {
    let mut written = 0u64;
    while let Some(chunk) = response
        .chunk()
        .await
        .context("read export response body")?
    {
        file.write_all(&chunk)
            .await
            .with_context(|| format!("write backup file: {}", path.display()))?;
        written += chunk.len() as u64;
    }
    file.flush()
        .await
        .with_context(|| format!("flush backup file: {}", path.display()))?;
    Ok(written)
}
