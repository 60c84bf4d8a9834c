use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};

use crate::store::{RemoteFile, RemoteFolder, RemoteStore};

/// In-process `RemoteStore`. Folder lookup matches names case-insensitively,
/// like Drive's `name =` query, so callers must do their own exact match.
#[derive(Debug, Default)]
pub struct MemoryRemoteStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    folders: Vec<RemoteFolder>,
    files: Vec<StoredFile>,
    failing_deletes: HashSet<String>,
    list_calls: usize,
    folders_created: usize,
}

#[derive(Debug, Clone)]
struct StoredFile {
    parent_id: String,
    meta: RemoteFile,
    content: Vec<u8>,
}

impl Inner {
    fn allocate_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed a folder without counting it as created through the trait.
    pub fn insert_folder(&self, name: &str) -> RemoteFolder {
        let mut inner = self.lock();
        let folder = RemoteFolder {
            id: inner.allocate_id("folder"),
            name: name.to_owned(),
        };
        inner.folders.push(folder.clone());
        folder
    }

    /// Seed an object with explicit timestamps.
    pub fn insert_file(&self, parent_id: &str, name: &str, at: DateTime<Utc>, content: &[u8]) -> RemoteFile {
        let mut inner = self.lock();
        let meta = RemoteFile {
            id: inner.allocate_id("file"),
            name: name.to_owned(),
            created_time: Some(at),
            modified_time: Some(at),
        };
        inner.files.push(StoredFile {
            parent_id: parent_id.to_owned(),
            meta: meta.clone(),
            content: content.to_vec(),
        });
        meta
    }

    /// Shift both timestamps of every object under `parent_id` into the past.
    pub fn backdate_files_in(&self, parent_id: &str, by: chrono::Duration) {
        for file in self.lock().files.iter_mut().filter(|f| f.parent_id == parent_id) {
            file.meta.created_time = file.meta.created_time.map(|t| t - by);
            file.meta.modified_time = file.meta.modified_time.map(|t| t - by);
        }
    }

    /// Make every later `delete_file` for `id` fail.
    pub fn fail_deletes_for(&self, id: &str) {
        self.lock().failing_deletes.insert(id.to_owned());
    }

    pub fn files_in(&self, parent_id: &str) -> Vec<RemoteFile> {
        self.lock()
            .files
            .iter()
            .filter(|f| f.parent_id == parent_id)
            .map(|f| f.meta.clone())
            .collect()
    }

    pub fn content_of(&self, id: &str) -> Option<Vec<u8>> {
        self.lock()
            .files
            .iter()
            .find(|f| f.meta.id == id)
            .map(|f| f.content.clone())
    }

    pub fn folders(&self) -> Vec<RemoteFolder> {
        self.lock().folders.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.lock().list_calls
    }

    pub fn folders_created(&self) -> usize {
        self.lock().folders_created
    }
}

#[async_trait::async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn find_folders(&self, name: &str) -> Result<Vec<RemoteFolder>> {
        let wanted = name.to_lowercase();
        Ok(self
            .lock()
            .folders
            .iter()
            .filter(|f| f.name.to_lowercase() == wanted)
            .cloned()
            .collect())
    }

    async fn create_folder(&self, name: &str) -> Result<RemoteFolder> {
        let mut inner = self.lock();
        let folder = RemoteFolder {
            id: inner.allocate_id("folder"),
            name: name.to_owned(),
        };
        inner.folders.push(folder.clone());
        inner.folders_created += 1;
        Ok(folder)
    }

    async fn upload_file(&self, parent_id: &str, name: &str, local_path: &Path) -> Result<RemoteFile> {
        let content = tokio::fs::read(local_path)
            .await
            .with_context(|| format!("read upload source: {}", local_path.display()))?;
        let mut inner = self.lock();
        if !inner.folders.iter().any(|f| f.id == parent_id) {
            bail!("parent folder not found: {parent_id}");
        }
        let now = Utc::now();
        let meta = RemoteFile {
            id: inner.allocate_id("file"),
            name: name.to_owned(),
            created_time: Some(now),
            modified_time: Some(now),
        };
        inner.files.push(StoredFile {
            parent_id: parent_id.to_owned(),
            meta: meta.clone(),
            content,
        });
        Ok(meta)
    }

    async fn list_files(&self, parent_id: &str) -> Result<Vec<RemoteFile>> {
        let mut inner = self.lock();
        inner.list_calls += 1;
        Ok(inner
            .files
            .iter()
            .filter(|f| f.parent_id == parent_id)
            .map(|f| f.meta.clone())
            .collect())
    }

    async fn delete_file(&self, id: &str) -> Result<()> {
        let mut inner = self.lock();
        if inner.failing_deletes.contains(id) {
            bail!("delete rejected for {id}");
        }
        let before = inner.files.len();
        inner.files.retain(|f| f.meta.id != id);
        if inner.files.len() == before {
            bail!("file not found: {id}");
        }
        Ok(())
    }
}
