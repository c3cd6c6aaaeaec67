use std::path::PathBuf;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

pub const SNAPSHOT_PREFIX: &str = "backup-";
pub const SNAPSHOT_EXTENSION: &str = ".db";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%SZ";

/// Where a snapshot was mirrored to once the remote upload succeeded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteRef {
    pub remote_id: String,
    pub link: Option<String>,
}

/// A point-in-time copy of the primary data file held in the local store.
///
/// The name is the identity. It embeds the UTC creation time in a fixed-width
/// format, so sorting names lexicographically sorts snapshots chronologically.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotArtifact {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    /// Hex SHA-256 of the snapshot bytes; only known for snapshots written by this process.
    pub sha256: Option<String>,
    pub remote: Option<RemoteRef>,
}

impl SnapshotArtifact {
    pub fn with_remote(mut self, remote: RemoteRef) -> Self {
        self.remote = Some(remote);
        self
    }
}

/// Snapshot file name for a backup taken at `at`, truncated to the second.
pub fn snapshot_name(at: DateTime<Utc>) -> String {
    format!(
        "{SNAPSHOT_PREFIX}{}{SNAPSHOT_EXTENSION}",
        at.format(TIMESTAMP_FORMAT)
    )
}

/// Recovers the creation time from a snapshot file name.
///
/// Returns `None` for anything that is not exactly a name produced by
/// [`snapshot_name`], which is how stray files in the backup directory are ignored.
pub fn parse_snapshot_name(name: &str) -> Option<DateTime<Utc>> {
    let stamp = name
        .strip_prefix(SNAPSHOT_PREFIX)?
        .strip_suffix(SNAPSHOT_EXTENSION)?;
    let created_at = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT)
        .ok()?
        .and_utc();
    (snapshot_name(created_at) == name).then_some(created_at)
}
