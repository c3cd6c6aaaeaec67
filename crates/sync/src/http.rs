use std::io::Cursor;
use std::path::Path;

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;

use crate::api::{DriveApi, RemoteArtifact};
use crate::error::RemoteError;

pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com/drive/v3";
pub const DEFAULT_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";

const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
const FILE_FIELDS: &str = "id,name,size,webViewLink,createdTime";

/// [`DriveApi`] over the Google Drive v3 REST interface.
#[derive(Debug, Clone)]
pub struct HttpDriveApi {
    http: reqwest::Client,
    api_base: String,
    upload_base: String,
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    web_view_link: Option<String>,
    #[serde(default)]
    created_time: Option<DateTime<Utc>>,
}

impl From<DriveFile> for RemoteArtifact {
    fn from(file: DriveFile) -> Self {
        RemoteArtifact {
            remote_id: file.id,
            name: file.name,
            link: file.web_view_link,
            size: file.size.and_then(|s| s.parse().ok()),
            created_at: file.created_time,
        }
    }
}

impl HttpDriveApi {
    pub fn new(api_base: impl Into<String>, upload_base: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_owned(),
            upload_base: upload_base.into().trim_end_matches('/').to_owned(),
        }
    }

    async fn query_files(
        &self,
        token: &str,
        q: &str,
        fields: &str,
        order_by: Option<&str>,
        page_size: usize,
    ) -> Result<Vec<DriveFile>, RemoteError> {
        let page_size = page_size.to_string();
        let mut query = vec![
            ("q", q),
            ("fields", fields),
            ("pageSize", page_size.as_str()),
            ("spaces", "drive"),
        ];
        if let Some(order_by) = order_by {
            query.push(("orderBy", order_by));
        }

        let resp = self
            .http
            .get(format!("{}/files", self.api_base))
            .bearer_auth(token)
            .query(&query)
            .send()
            .await?;
        let list: FileList = check(resp).await?.json().await?;
        Ok(list.files)
    }
}

impl Default for HttpDriveApi {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE, DEFAULT_UPLOAD_BASE)
    }
}

#[async_trait::async_trait]
impl DriveApi for HttpDriveApi {
    async fn find_folders(&self, token: &str, name: &str) -> Result<Vec<String>, RemoteError> {
        let q = format!(
            "mimeType = '{FOLDER_MIME_TYPE}' and name = '{}' and trashed = false",
            escape_query(name)
        );
        let files = self
            .query_files(token, &q, "files(id,name)", None, 100)
            .await?;
        Ok(files.into_iter().map(|f| f.id).collect())
    }

    async fn create_folder(&self, token: &str, name: &str) -> Result<String, RemoteError> {
        let resp = self
            .http
            .post(format!("{}/files", self.api_base))
            .bearer_auth(token)
            .query(&[("fields", "id")])
            .json(&json!({ "name": name, "mimeType": FOLDER_MIME_TYPE }))
            .send()
            .await?;
        let file: DriveFile = check(resp).await?.json().await?;
        Ok(file.id)
    }

    async fn upload_file(
        &self,
        token: &str,
        folder_id: &str,
        name: &str,
        content_type: &str,
        source: &Path,
    ) -> Result<RemoteArtifact, RemoteError> {
        let local_io =
            |e: std::io::Error| RemoteError::LocalIo(format!("{}: {e}", source.display()));
        let file = tokio::fs::File::open(source).await.map_err(local_io)?;
        let size = file.metadata().await.map_err(local_io)?.len();

        let metadata = json!({ "name": name, "parents": [folder_id] });
        let boundary: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();
        let (head, tail) = multipart_frame(&boundary, &metadata.to_string(), content_type);
        let length = head.len() as u64 + size + tail.len() as u64;
        // Read in chunks as the request goes out.
        let reader = Cursor::new(head)
            .chain(file.take(size))
            .chain(Cursor::new(tail));

        let resp = self
            .http
            .post(format!("{}/files", self.upload_base))
            .bearer_auth(token)
            .query(&[("uploadType", "multipart"), ("fields", FILE_FIELDS)])
            .header(CONTENT_TYPE, format!("multipart/related; boundary={boundary}"))
            .header(CONTENT_LENGTH, length)
            .body(Body::wrap_stream(ReaderStream::new(reader)))
            .send()
            .await?;
        let file: DriveFile = check(resp).await?.json().await?;
        Ok(file.into())
    }

    async fn list_files(
        &self,
        token: &str,
        folder_id: &str,
        page_size: usize,
    ) -> Result<Vec<RemoteArtifact>, RemoteError> {
        let q = format!("'{}' in parents and trashed = false", escape_query(folder_id));
        let fields = format!("files({FILE_FIELDS})");
        let files = self
            .query_files(token, &q, &fields, Some("createdTime desc"), page_size)
            .await?;
        Ok(files.into_iter().map(Into::into).collect())
    }

    async fn delete_file(&self, token: &str, file_id: &str) -> Result<(), RemoteError> {
        let resp = self
            .http
            .delete(format!("{}/files/{file_id}", self.api_base))
            .bearer_auth(token)
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }
}

/// Maps HTTP failures onto the remote error taxonomy; 401 is the expiry signal.
async fn check(resp: Response) -> Result<Response, RemoteError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::UNAUTHORIZED => RemoteError::AuthExpired,
        StatusCode::NOT_FOUND => RemoteError::NotFound(body),
        _ => RemoteError::RemoteUnavailable(format!("{status}: {body}")),
    })
}

fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// The bytes sent before and after the file content in a `multipart/related`
/// upload: a JSON metadata part, then the header of the content part.
fn multipart_frame(boundary: &str, metadata: &str, content_type: &str) -> (Vec<u8>, Vec<u8>) {
    let head = format!(
        "--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n\
         --{boundary}\r\nContent-Type: {content_type}\r\n\r\n"
    );
    let tail = format!("\r\n--{boundary}--\r\n");
    (head.into_bytes(), tail.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_values_are_escaped() {
        assert_eq!(escape_query("it's"), "it\\'s");
        assert_eq!(escape_query(r"a\b"), r"a\\b");
    }

    #[test]
    fn multipart_frame_wraps_metadata_and_content_header() {
        let (head, tail) = multipart_frame("XYZ", r#"{"name":"b.db"}"#, "application/x-sqlite3");
        let head = String::from_utf8(head).unwrap();
        assert!(head.starts_with("--XYZ\r\nContent-Type: application/json"));
        assert!(head.contains(r#"{"name":"b.db"}"#));
        assert!(head.ends_with("--XYZ\r\nContent-Type: application/x-sqlite3\r\n\r\n"));
        assert_eq!(tail, b"\r\n--XYZ--\r\n");
    }

    #[test]
    fn drive_file_size_string_is_parsed() {
        let file: DriveFile = serde_json::from_str(
            r#"{"id":"f1","name":"b.db","size":"1024","createdTime":"2026-10-17T02:00:00.000Z"}"#,
        )
        .unwrap();
        let artifact = RemoteArtifact::from(file);
        assert_eq!(artifact.size, Some(1024));
        assert!(artifact.created_at.is_some());
        assert_eq!(artifact.link, None);
    }
}
