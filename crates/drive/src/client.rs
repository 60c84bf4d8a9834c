use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use odoo_backup_storage::{RemoteFile, RemoteFolder, RemoteStore};
use futures::stream::{self, Stream, StreamExt};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::Body;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::error::DriveError;
use crate::token_source::TokenSource;

pub const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
pub const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

const FILE_FIELDS: &str = "id,name,createdTime,modifiedTime";
const PAGE_SIZE: &str = "1000";
const UPLOAD_CHUNK_SIZE: usize = 256 * 1024;

/// Google Drive v3 REST client.
#[derive(Clone)]
pub struct DriveClient {
    http: reqwest::Client,
    tokens: Arc<TokenSource>,
    api_base: String,
    upload_base: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    created_time: Option<DateTime<Utc>>,
    modified_time: Option<DateTime<Utc>>,
}

impl From<DriveFile> for RemoteFile {
    fn from(f: DriveFile) -> Self {
        RemoteFile {
            id: f.id,
            name: f.name,
            created_time: f.created_time,
            modified_time: f.modified_time,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewFile<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    mime_type: Option<&'a str>,
    #[serde(skip_serializing_if = "no_parents")]
    parents: &'a [&'a str],
}

fn no_parents(parents: &&[&str]) -> bool {
    parents.is_empty()
}

impl DriveClient {
    pub fn new(http: reqwest::Client, tokens: Arc<TokenSource>) -> Self {
        Self::with_base_urls(http, tokens, DRIVE_API_BASE, DRIVE_UPLOAD_BASE)
    }

    pub fn with_base_urls(
        http: reqwest::Client,
        tokens: Arc<TokenSource>,
        api_base: impl Into<String>,
        upload_base: impl Into<String>,
    ) -> Self {
        Self {
            http,
            tokens,
            api_base: api_base.into().trim_end_matches('/').to_owned(),
            upload_base: upload_base.into().trim_end_matches('/').to_owned(),
        }
    }

    async fn query_files(&self, operation: &'static str, q: &str, fields: &str) -> Result<Vec<DriveFile>> {
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let token = self.tokens.access_token().await?;
            let mut request = self
                .http
                .get(format!("{}/files", self.api_base))
                .bearer_auth(token)
                .query(&[("q", q), ("fields", fields), ("pageSize", PAGE_SIZE), ("spaces", "drive")]);
            if let Some(page) = &page_token {
                request = request.query(&[("pageToken", page.as_str())]);
            }
            let response = check(operation, request.send().await.context(operation)?).await?;
            let page: FileList = response.json().await.with_context(|| format!("{operation}: parse file list"))?;
            files.extend(page.files);
            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => return Ok(files),
            }
        }
    }
}

async fn check(operation: &'static str, response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(DriveError::Api {
        operation,
        status,
        body,
    }
    .into())
}

/// Quote a value for use inside a Drive query string literal.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn media_type(name: &str) -> &'static str {
    if name.ends_with(".zip") {
        "application/zip"
    } else {
        "application/octet-stream"
    }
}

/// Opening and closing delimiters of a two-part multipart/related body. The
/// media bytes go between them.
fn multipart_envelope(boundary: &str, metadata: &[u8], media_type: &str) -> (Vec<u8>, Vec<u8>) {
    let mut head = Vec::with_capacity(metadata.len() + 128);
    head.extend_from_slice(format!("--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n").as_bytes());
    head.extend_from_slice(metadata);
    head.extend_from_slice(format!("\r\n--{boundary}\r\nContent-Type: {media_type}\r\n\r\n").as_bytes());
    let tail = format!("\r\n--{boundary}--\r\n").into_bytes();
    (head, tail)
}

/// Stream `file` in fixed-size chunks between `head` and `tail`.
fn multipart_stream(
    head: Vec<u8>,
    file: tokio::fs::File,
    tail: Vec<u8>,
) -> impl Stream<Item = io::Result<Vec<u8>>> + Send + 'static {
    let media = stream::try_unfold(file, |mut file| async move {
        let mut chunk = vec![0u8; UPLOAD_CHUNK_SIZE];
        let read = file.read(&mut chunk).await?;
        if read == 0 {
            return Ok::<_, io::Error>(None);
        }
        chunk.truncate(read);
        Ok(Some((chunk, file)))
    });
    stream::once(async move { Ok::<_, io::Error>(head) })
        .chain(media)
        .chain(stream::once(async move { Ok(tail) }))
}

#[async_trait::async_trait]
impl RemoteStore for DriveClient {
    async fn find_folders(&self, name: &str) -> Result<Vec<RemoteFolder>> {
        let q = format!("mimeType='{FOLDER_MIME_TYPE}' and trashed=false and name={}", quote(name));
        let files = self
            .query_files("folder lookup", &q, "nextPageToken,files(id,name)")
            .await?;
        Ok(files
            .into_iter()
            .map(|f| RemoteFolder { id: f.id, name: f.name })
            .collect())
    }

    async fn create_folder(&self, name: &str) -> Result<RemoteFolder> {
        let token = self.tokens.access_token().await?;
        let request = self
            .http
            .post(format!("{}/files", self.api_base))
            .bearer_auth(token)
            .query(&[("fields", "id,name")])
            .json(&NewFile {
                name,
                mime_type: Some(FOLDER_MIME_TYPE),
                parents: &[],
            });
        let response = check("folder create", request.send().await.context("folder create")?).await?;
        let created: DriveFile = response.json().await.context("folder create: parse response")?;
        debug!(folder_id = %created.id, "drive folder created");
        Ok(RemoteFolder {
            id: created.id,
            name: created.name,
        })
    }

    async fn upload_file(&self, parent_id: &str, name: &str, local_path: &Path) -> Result<RemoteFile> {
        let file = tokio::fs::File::open(local_path)
            .await
            .with_context(|| format!("open upload source: {}", local_path.display()))?;
        let media_len = file
            .metadata()
            .await
            .with_context(|| format!("stat upload source: {}", local_path.display()))?
            .len();
        let metadata = serde_json::to_vec(&NewFile {
            name,
            mime_type: None,
            parents: &[parent_id],
        })
        .context("serialize file metadata")?;
        let boundary = format!("odoo-backup-{:016x}", rand::random::<u64>());
        let (head, tail) = multipart_envelope(&boundary, &metadata, media_type(name));
        let content_length = head.len() as u64 + media_len + tail.len() as u64;

        let token = self.tokens.access_token().await?;
        debug!(name, media_len, "streaming upload");
        let request = self
            .http
            .post(format!("{}/files", self.upload_base))
            .bearer_auth(token)
            .query(&[("uploadType", "multipart"), ("fields", FILE_FIELDS)])
            .header(CONTENT_TYPE, format!("multipart/related; boundary={boundary}"))
            .header(CONTENT_LENGTH, content_length)
            .body(Body::wrap_stream(multipart_stream(head, file, tail)));
        let response = check("upload", request.send().await.context("upload")?).await?;
        let created: DriveFile = response.json().await.context("upload: parse response")?;
        Ok(created.into())
    }

    async fn list_files(&self, parent_id: &str) -> Result<Vec<RemoteFile>> {
        let q = format!(
            "{} in parents and mimeType!='{FOLDER_MIME_TYPE}' and trashed=false",
            quote(parent_id)
        );
        let fields = format!("nextPageToken,files({FILE_FIELDS})");
        let files = self.query_files("file listing", &q, &fields).await?;
        Ok(files.into_iter().map(RemoteFile::from).collect())
    }

    async fn delete_file(&self, id: &str) -> Result<()> {
        let token = self.tokens.access_token().await?;
        let request = self
            .http
            .delete(format!("{}/files/{id}", self.api_base))
            .bearer_auth(token);
        check("delete", request.send().await.context("delete")?).await?;
        Ok(())
    }
}
