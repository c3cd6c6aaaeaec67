use std::future::Future;
use std::io;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lifeboat_core::{RemoteCredential, RetentionPolicy};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::api::{DriveApi, RemoteArtifact};
use crate::credential::{CredentialCell, CredentialPhase};
use crate::error::RemoteError;
use crate::oauth::TokenExchange;

/// Remote listings, and so remote rotation, only ever look at this many files.
pub const REMOTE_PAGE_SIZE: usize = 20;

/// Refresh-and-retry cycles allowed per remote operation.
pub const MAX_AUTH_RETRIES: u32 = 1;

pub const DEFAULT_FOLDER_NAME: &str = "lifeboat-backups";
pub const SNAPSHOT_CONTENT_TYPE: &str = "application/x-sqlite3";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteStatus {
    pub configured: bool,
    pub phase: CredentialPhase,
    pub has_access_token: bool,
    pub has_refresh_token: bool,
    pub token_expiry: Option<DateTime<Utc>>,
}

/// Mirrors snapshots into one folder of the remote store.
pub struct RemoteSyncClient {
    api: Arc<dyn DriveApi>,
    tokens: Arc<dyn TokenExchange>,
    credentials: CredentialCell,
    folder_name: String,
    folder_id: RwLock<Option<String>>,
}

impl RemoteSyncClient {
    pub fn new(
        api: Arc<dyn DriveApi>,
        tokens: Arc<dyn TokenExchange>,
        folder_name: impl Into<String>,
    ) -> Self {
        Self {
            api,
            tokens,
            credentials: CredentialCell::default(),
            folder_name: folder_name.into(),
            folder_id: RwLock::new(None),
        }
    }

    pub async fn set_credentials(&self, credential: RemoteCredential) -> Result<(), RemoteError> {
        self.credentials.set(credential).await?;
        info!("remote credential configured");
        Ok(())
    }

    pub async fn clear_credentials(&self) {
        self.credentials.clear().await;
        info!("remote credential cleared");
    }

    pub async fn is_configured(&self) -> bool {
        self.credentials.phase().await != CredentialPhase::Unconfigured
    }

    /// Copy of the credential currently in use, e.g. to persist after a refresh.
    pub async fn credential(&self) -> Option<RemoteCredential> {
        self.credentials.current().await.map(|c| (*c).clone())
    }

    /// Forces a refresh of the current credential.
    pub async fn refresh(&self) -> Result<(), RemoteError> {
        let current = self
            .credentials
            .current()
            .await
            .ok_or(RemoteError::NotConfigured)?;
        self.credentials
            .refresh_after(&current, self.tokens.as_ref())
            .await?;
        Ok(())
    }

    /// Local view of the credential; never touches the network.
    pub async fn status(&self) -> RemoteStatus {
        let phase = self.credentials.phase().await;
        let current = self.credentials.current().await;
        RemoteStatus {
            configured: phase != CredentialPhase::Unconfigured,
            phase,
            has_access_token: current.as_ref().is_some_and(|c| !c.access_token.is_empty()),
            has_refresh_token: current
                .as_ref()
                .and_then(|c| c.refresh_token.as_deref())
                .is_some_and(|t| !t.is_empty()),
            token_expiry: current.and_then(|c| c.expiry),
        }
    }

    /// Finds the managed folder, creating it on first use. The id is cached
    /// for the life of the client. With duplicate folders the first one the
    /// store returns wins.
    pub async fn resolve_folder(&self) -> Result<String, RemoteError> {
        self.resolve_folder_with(&mut AuthBudget::default()).await
    }

    async fn resolve_folder_with(&self, budget: &mut AuthBudget) -> Result<String, RemoteError> {
        if let Some(id) = self.folder_id.read().await.clone() {
            return Ok(id);
        }

        let api = self.api.as_ref();
        let name = self.folder_name.as_str();
        let found = self
            .authorized("find_folder", budget, |token| async move {
                api.find_folders(&token, name).await
            })
            .await?;

        let id = match found.as_slice() {
            [] => {
                let id = self
                    .authorized("create_folder", budget, |token| async move {
                        api.create_folder(&token, name).await
                    })
                    .await?;
                info!(folder = name, folder_id = %id, "created remote backup folder");
                id
            }
            [only] => only.clone(),
            [first, ..] => {
                warn!(
                    folder = name,
                    matches = found.len(),
                    folder_id = %first,
                    "several remote folders share the backup folder name; using the first"
                );
                first.clone()
            }
        };

        *self.folder_id.write().await = Some(id.clone());
        Ok(id)
    }

    /// Streams the file at `local_path` into the managed folder as `name`.
    pub async fn upload(&self, local_path: &Path, name: &str) -> Result<RemoteArtifact, RemoteError> {
        let size = match tokio::fs::metadata(local_path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            Ok(_) => return Err(RemoteError::NotFound(local_path.display().to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(RemoteError::NotFound(local_path.display().to_string()))
            }
            Err(e) => {
                return Err(RemoteError::LocalIo(format!("{}: {e}", local_path.display())))
            }
        };

        let mut budget = AuthBudget::default();
        let folder_id = self.resolve_folder_with(&mut budget).await?;
        let api = self.api.as_ref();
        let folder = folder_id.as_str();
        let artifact = self
            .authorized("upload", &mut budget, |token| async move {
                api.upload_file(&token, folder, name, SNAPSHOT_CONTENT_TYPE, local_path)
                    .await
            })
            .await?;

        info!(name, remote_id = %artifact.remote_id, size, "uploaded snapshot");
        Ok(artifact)
    }

    /// Newest-first files of the managed folder, first page only.
    pub async fn list(&self) -> Result<Vec<RemoteArtifact>, RemoteError> {
        self.list_with(&mut AuthBudget::default()).await
    }

    async fn list_with(&self, budget: &mut AuthBudget) -> Result<Vec<RemoteArtifact>, RemoteError> {
        let folder_id = self.resolve_folder_with(budget).await?;
        let api = self.api.as_ref();
        let folder = folder_id.as_str();
        let mut files = self
            .authorized("list", budget, |token| async move {
                api.list_files(&token, folder, REMOTE_PAGE_SIZE).await
            })
            .await?;
        files.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        files.truncate(REMOTE_PAGE_SIZE);
        Ok(files)
    }

    /// Deletes listed files beyond `policy.keep_last()`. Individual delete
    /// failures are logged and left for the next cycle; an authorization
    /// failure stops the pass and is returned. Returns how many files were
    /// deleted.
    pub async fn rotate(&self, policy: RetentionPolicy) -> Result<usize, RemoteError> {
        let mut budget = AuthBudget::default();
        let (_, doomed) = policy.split(self.list_with(&mut budget).await?);
        if doomed.is_empty() {
            return Ok(0);
        }

        let api = self.api.as_ref();
        let mut deleted = 0;
        for file in doomed {
            let id = file.remote_id.as_str();
            match self
                .authorized("delete", &mut budget, |token| async move {
                    api.delete_file(&token, id).await
                })
                .await
            {
                Ok(()) => {
                    info!(name = %file.name, remote_id = id, "rotated out remote snapshot");
                    deleted += 1;
                }
                Err(e) if e.is_auth() => {
                    warn!(name = %file.name, remote_id = id, error = %e, "remote rotation stopped");
                    return Err(e);
                }
                Err(e) => {
                    warn!(name = %file.name, remote_id = id, error = %e, "failed to delete remote snapshot")
                }
            }
        }
        Ok(deleted)
    }

    /// Runs `call` with the current access token. On `AuthExpired` the
    /// credential is refreshed and the call repeated while `budget` allows;
    /// once it is spent the rejection is returned as is.
    async fn authorized<T, F, Fut>(
        &self,
        op: &'static str,
        budget: &mut AuthBudget,
        call: F,
    ) -> Result<T, RemoteError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let mut credential = self
            .credentials
            .current()
            .await
            .ok_or(RemoteError::NotConfigured)?;

        loop {
            match call(credential.access_token.clone()).await {
                Err(RemoteError::AuthExpired) => {
                    self.credentials.mark_expired(&credential).await;
                    if !budget.spend() {
                        warn!(op, "access token rejected again after refresh");
                        return Err(RemoteError::AuthExpired);
                    }
                    debug!(op, "access token rejected; refreshing");
                    credential = self
                        .credentials
                        .refresh_after(&credential, self.tokens.as_ref())
                        .await?;
                }
                result => return result,
            }
        }
    }
}

/// Refreshes left to one public operation, shared by every API call it makes.
#[derive(Debug)]
struct AuthBudget {
    retries_left: u32,
}

impl Default for AuthBudget {
    fn default() -> Self {
        Self {
            retries_left: MAX_AUTH_RETRIES,
        }
    }
}

impl AuthBudget {
    fn spend(&mut self) -> bool {
        if self.retries_left == 0 {
            return false;
        }
        self.retries_left -= 1;
        true
    }
}
