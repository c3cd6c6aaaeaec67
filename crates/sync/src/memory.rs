//! In-memory stand-ins for the remote store and the token endpoint.

use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::DateTime;

use crate::api::{DriveApi, RemoteArtifact};
use crate::error::RemoteError;
use crate::oauth::{TokenExchange, TokenGrant};

const EPOCH_BASE: i64 = 1_760_000_000;

#[derive(Debug)]
struct StoredFile {
    artifact: RemoteArtifact,
    folder_id: String,
}

#[derive(Debug, Default)]
struct DriveState {
    accepted_token: Option<String>,
    folders: Vec<(String, String)>,
    files: Vec<StoredFile>,
    next_id: u64,
    upload_failure: Option<RemoteError>,
    failing_deletes: HashSet<String>,
    upload_attempts: usize,
    folder_creations: usize,
}

impl DriveState {
    fn authorize(&self, token: &str) -> Result<(), RemoteError> {
        match &self.accepted_token {
            Some(accepted) if accepted != token => Err(RemoteError::AuthExpired),
            _ => Ok(()),
        }
    }

    fn fresh_id(&mut self, kind: &str) -> String {
        self.next_id += 1;
        format!("{kind}-{}", self.next_id)
    }

    fn store(&mut self, folder_id: &str, name: &str, size: u64) -> RemoteArtifact {
        let remote_id = self.fresh_id("file");
        // Strictly increasing creation times keep the newest-first order deterministic.
        let created_at = DateTime::from_timestamp(EPOCH_BASE + self.next_id as i64, 0);
        let artifact = RemoteArtifact {
            link: Some(format!("memory://{remote_id}")),
            remote_id,
            name: name.to_owned(),
            size: Some(size),
            created_at,
        };
        self.files.push(StoredFile {
            artifact: artifact.clone(),
            folder_id: folder_id.to_owned(),
        });
        artifact
    }
}

/// A [`DriveApi`] backed by a vector, with knobs for injecting failures.
#[derive(Debug, Default)]
pub struct MemoryDrive {
    state: Mutex<DriveState>,
}

impl MemoryDrive {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, DriveState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reject every call whose token differs from `token` with `AuthExpired`.
    pub fn accept_only(&self, token: &str) {
        self.state().accepted_token = Some(token.to_owned());
    }

    /// Make every upload fail with `error` until cleared with `None`.
    pub fn fail_uploads(&self, error: Option<RemoteError>) {
        self.state().upload_failure = error;
    }

    pub fn fail_delete(&self, file_id: &str) {
        self.state().failing_deletes.insert(file_id.to_owned());
    }

    pub fn add_folder(&self, name: &str) -> String {
        let mut state = self.state();
        let id = state.fresh_id("folder");
        state.folders.push((id.clone(), name.to_owned()));
        id
    }

    pub fn add_file(&self, folder_id: &str, name: &str) -> RemoteArtifact {
        self.state().store(folder_id, name, 0)
    }

    /// All stored files across folders, newest first.
    pub fn files(&self) -> Vec<RemoteArtifact> {
        let mut files: Vec<_> = self.state().files.iter().map(|f| f.artifact.clone()).collect();
        files.reverse();
        files
    }

    pub fn file_names(&self) -> Vec<String> {
        self.files().into_iter().map(|f| f.name).collect()
    }

    pub fn upload_attempts(&self) -> usize {
        self.state().upload_attempts
    }

    pub fn folder_creations(&self) -> usize {
        self.state().folder_creations
    }
}

#[async_trait::async_trait]
impl DriveApi for MemoryDrive {
    async fn find_folders(&self, token: &str, name: &str) -> Result<Vec<String>, RemoteError> {
        let state = self.state();
        state.authorize(token)?;
        Ok(state
            .folders
            .iter()
            .filter(|(_, n)| n == name)
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn create_folder(&self, token: &str, name: &str) -> Result<String, RemoteError> {
        let mut state = self.state();
        state.authorize(token)?;
        state.folder_creations += 1;
        let id = state.fresh_id("folder");
        state.folders.push((id.clone(), name.to_owned()));
        Ok(id)
    }

    async fn upload_file(
        &self,
        token: &str,
        folder_id: &str,
        name: &str,
        _content_type: &str,
        source: &Path,
    ) -> Result<RemoteArtifact, RemoteError> {
        let size = tokio::fs::metadata(source)
            .await
            .map_err(|e| RemoteError::LocalIo(format!("{}: {e}", source.display())))?
            .len();
        let mut state = self.state();
        state.upload_attempts += 1;
        state.authorize(token)?;
        if let Some(err) = state.upload_failure.clone() {
            return Err(err);
        }
        if !state.folders.iter().any(|(id, _)| id == folder_id) {
            return Err(RemoteError::NotFound(format!("folder {folder_id}")));
        }
        Ok(state.store(folder_id, name, size))
    }

    async fn list_files(
        &self,
        token: &str,
        folder_id: &str,
        page_size: usize,
    ) -> Result<Vec<RemoteArtifact>, RemoteError> {
        let state = self.state();
        state.authorize(token)?;
        Ok(state
            .files
            .iter()
            .rev()
            .filter(|f| f.folder_id == folder_id)
            .take(page_size)
            .map(|f| f.artifact.clone())
            .collect())
    }

    async fn delete_file(&self, token: &str, file_id: &str) -> Result<(), RemoteError> {
        let mut state = self.state();
        state.authorize(token)?;
        if state.failing_deletes.contains(file_id) {
            return Err(RemoteError::RemoteUnavailable(format!("delete {file_id} refused")));
        }
        let before = state.files.len();
        state.files.retain(|f| f.artifact.remote_id != file_id);
        if state.files.len() == before {
            return Err(RemoteError::NotFound(format!("file {file_id}")));
        }
        Ok(())
    }
}

/// A [`TokenExchange`] that replays scripted outcomes in order.
#[derive(Debug, Default)]
pub struct MemoryTokens {
    script: Mutex<VecDeque<Result<TokenGrant, RemoteError>>>,
    calls: AtomicUsize,
}

impl MemoryTokens {
    pub fn new(script: impl IntoIterator<Item = Result<TokenGrant, RemoteError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Convenience script: each refresh yields the next access token from `tokens`.
    pub fn granting<'a>(tokens: impl IntoIterator<Item = &'a str>) -> Self {
        Self::new(tokens.into_iter().map(|t| {
            Ok(TokenGrant {
                access_token: t.to_owned(),
                refresh_token: None,
                expires_in: Some(3600),
            })
        }))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl TokenExchange for MemoryTokens {
    async fn refresh(&self, _refresh_token: &str) -> Result<TokenGrant, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| Err(RemoteError::AuthFailure("invalid_grant".to_owned())))
    }
}
