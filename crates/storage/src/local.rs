use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use lifeboat_core::{parse_snapshot_name, HashingWriter, RetentionPolicy, SnapshotArtifact};
use tracing::{info, warn};

const TEMP_PREFIX: &str = ".backup-";
const TEMP_SUFFIX: &str = ".tmp";

/// The local backup directory. Snapshots are plain files named by
/// [`lifeboat_core::snapshot_name`]; anything else in the directory is ignored.
#[derive(Debug, Clone)]
pub struct LocalStore {
    dir: PathBuf,
}

impl LocalStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Creates the directory and removes temp files left behind by an
    /// interrupted copy. Must not run concurrently with [`LocalStore::write`].
    pub fn ensure_directory(&self) -> Result<()> {
        self.create_directory()?;
        self.sweep_temp_files();
        Ok(())
    }

    fn create_directory(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create backup directory: {}", self.dir.display()))
    }

    fn sweep_temp_files(&self) {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "cannot scan for stale temp files");
                return;
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !(name.starts_with(TEMP_PREFIX) && name.ends_with(TEMP_SUFFIX)) {
                continue;
            }
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => info!(file = name, "removed stale temp file"),
                Err(e) => warn!(file = name, error = %e, "failed to remove stale temp file"),
            }
        }
    }

    /// Flushes the directory entry created by a rename.
    #[cfg(unix)]
    fn sync_directory(&self) -> Result<()> {
        File::open(&self.dir)
            .and_then(|dir| dir.sync_all())
            .with_context(|| format!("sync backup directory: {}", self.dir.display()))
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> Result<()> {
        Ok(())
    }

    /// Copies `source` into the store as snapshot `name`.
    ///
    /// Bytes go to a temp file in the same directory which is renamed into place
    /// only after a complete, synced copy, so a failed copy never leaves a file
    /// under `name`. An existing snapshot with the same name is never replaced.
    pub fn write(&self, name: &str, source: &Path) -> Result<SnapshotArtifact> {
        let created_at = parse_snapshot_name(name)
            .with_context(|| format!("not a snapshot name: {name}"))?;
        self.create_directory()?;

        let mut input = File::open(source)
            .with_context(|| format!("open backup source: {}", source.display()))?;
        let staging = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(TEMP_SUFFIX)
            .tempfile_in(&self.dir)
            .with_context(|| format!("create temp file in {}", self.dir.display()))?;

        let mut writer = HashingWriter::new(staging);
        io::copy(&mut input, &mut writer)
            .with_context(|| format!("copy {} into backup directory", source.display()))?;
        writer.flush().context("flush snapshot")?;
        let (staging, sha256, size_bytes) = writer.finish();
        staging.as_file().sync_all().context("sync snapshot")?;

        let path = self.dir.join(name);
        staging
            .persist_noclobber(&path)
            .with_context(|| format!("publish snapshot: {}", path.display()))?;
        self.sync_directory()?;

        Ok(SnapshotArtifact {
            name: name.to_owned(),
            path,
            size_bytes,
            created_at,
            sha256: Some(sha256),
            remote: None,
        })
    }

    /// Snapshots in the store, newest first. A missing directory lists as empty.
    pub fn list(&self) -> Result<Vec<SnapshotArtifact>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("read backup directory: {}", self.dir.display()))
            }
        };

        let mut snapshots = Vec::new();
        for entry in entries {
            let entry = entry.context("read backup directory entry")?;
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let Some(created_at) = parse_snapshot_name(&name) else {
                continue;
            };
            let meta = match entry.metadata() {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => continue,
                // Rotated away between read_dir and stat.
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e).with_context(|| format!("stat snapshot {name}")),
            };
            snapshots.push(SnapshotArtifact {
                path: entry.path(),
                name,
                size_bytes: meta.len(),
                created_at,
                sha256: None,
                remote: None,
            });
        }

        snapshots.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.name.cmp(&a.name))
        });
        Ok(snapshots)
    }

    pub fn latest(&self) -> Result<Option<SnapshotArtifact>> {
        Ok(self.list()?.into_iter().next())
    }

    /// Deletes every snapshot beyond the newest `policy.keep_last()`.
    ///
    /// Best effort: a file that cannot be removed is logged and skipped.
    /// Returns the names actually deleted.
    pub fn rotate(&self, policy: RetentionPolicy) -> Result<Vec<String>> {
        let (_, doomed) = policy.split(self.list()?);
        let mut removed = Vec::with_capacity(doomed.len());
        for snapshot in doomed {
            match fs::remove_file(&snapshot.path) {
                Ok(()) => {
                    info!(name = %snapshot.name, "rotated out local snapshot");
                    removed.push(snapshot.name);
                }
                Err(e) => {
                    warn!(name = %snapshot.name, error = %e, "failed to delete local snapshot")
                }
            }
        }
        Ok(removed)
    }
}
