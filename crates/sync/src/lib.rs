//! Remote mirroring of snapshots into an OAuth2-protected cloud folder.

pub mod api;
pub mod client;
pub mod credential;
pub mod error;
pub mod http;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod oauth;

pub use api::{DriveApi, RemoteArtifact};
pub use client::{
    RemoteStatus, RemoteSyncClient, DEFAULT_FOLDER_NAME, MAX_AUTH_RETRIES, REMOTE_PAGE_SIZE,
};
pub use credential::{CredentialCell, CredentialPhase};
pub use error::RemoteError;
pub use http::{HttpDriveApi, DEFAULT_API_BASE, DEFAULT_UPLOAD_BASE};
#[cfg(any(test, feature = "test-util"))]
pub use memory::{MemoryDrive, MemoryTokens};
pub use oauth::{OAuthClient, OAuthConfig, TokenExchange, TokenGrant, DEFAULT_TOKEN_URL};
