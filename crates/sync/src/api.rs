use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RemoteError;

/// A file in the managed remote folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteArtifact {
    pub remote_id: String,
    pub name: String,
    pub link: Option<String>,
    pub size: Option<u64>,
    pub created_at: Option<DateTime<Utc>>,
}

/// The authenticated calls the remote store must support.
///
/// Every call takes the bearer token explicitly. An expired token must surface
/// as [`RemoteError::AuthExpired`]; that is the only signal that triggers a refresh.
#[async_trait::async_trait]
pub trait DriveApi: Send + Sync {
    /// Ids of non-trashed folders named `name`, in the order the store returns them.
    async fn find_folders(&self, token: &str, name: &str) -> Result<Vec<String>, RemoteError>;

    async fn create_folder(&self, token: &str, name: &str) -> Result<String, RemoteError>;

    /// Uploads the file at `source` as `name`. The file is reopened on every
    /// call, so a retried upload sends the full content again.
    async fn upload_file(
        &self,
        token: &str,
        folder_id: &str,
        name: &str,
        content_type: &str,
        source: &Path,
    ) -> Result<RemoteArtifact, RemoteError>;

    /// Files in `folder_id`, newest first, at most `page_size` of them.
    async fn list_files(
        &self,
        token: &str,
        folder_id: &str,
        page_size: usize,
    ) -> Result<Vec<RemoteArtifact>, RemoteError>;

    async fn delete_file(&self, token: &str, file_id: &str) -> Result<(), RemoteError>;
}
