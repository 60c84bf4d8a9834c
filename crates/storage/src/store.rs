use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteFolder {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
    pub created_time: Option<DateTime<Utc>>,
    pub modified_time: Option<DateTime<Utc>>,
}

/// Cloud object-store operations needed to mirror backup artifacts,
/// implemented by the Google Drive client and by an in-memory store.
#[async_trait::async_trait]
pub trait RemoteStore: Send + Sync {
    /// Non-trashed folders whose name matches `name` under the store's
    /// matching rules. Callers filter for an exact match themselves.
    async fn find_folders(&self, name: &str) -> Result<Vec<RemoteFolder>>;

    async fn create_folder(&self, name: &str) -> Result<RemoteFolder>;

    /// Upload the content of `local_path` as a new object named `name` under
    /// `parent_id`. An existing object with the same name is never replaced.
    async fn upload_file(&self, parent_id: &str, name: &str, local_path: &Path) -> Result<RemoteFile>;

    /// Non-folder, non-trashed objects directly under `parent_id`.
    async fn list_files(&self, parent_id: &str) -> Result<Vec<RemoteFile>>;

    async fn delete_file(&self, id: &str) -> Result<()>;
}
