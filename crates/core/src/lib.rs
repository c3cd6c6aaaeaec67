pub mod clock;
pub mod config;
pub mod hash;
pub mod retention;
pub mod schedule;
pub mod snapshot;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BackupConfig, ConfigError, ConfigPatch, RemoteCredential};
pub use hash::{content_hash, HashingWriter};
pub use retention::RetentionPolicy;
pub use schedule::Schedule;
pub use snapshot::{parse_snapshot_name, snapshot_name, RemoteRef, SnapshotArtifact};
