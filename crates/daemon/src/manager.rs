use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Local, Utc};
use lifeboat_core::{
    snapshot_name, BackupConfig, Clock, ConfigError, ConfigPatch, RemoteCredential, RemoteRef,
    RetentionPolicy, Schedule, SnapshotArtifact, SystemClock,
};
use lifeboat_storage::{ConfigStore, LocalStore};
use lifeboat_sync::{RemoteArtifact, RemoteError, RemoteStatus, RemoteSyncClient};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::error::BackupError;
use crate::scheduler::{ScheduleTrigger, TickFuture, TickHandler};

/// Outcome of one backup run. The local leg always succeeded if a report
/// exists; the remote leg may not have.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub local: SnapshotArtifact,
    pub remote: Option<RemoteArtifact>,
    pub remote_error: Option<RemoteError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatus {
    pub enabled: bool,
    pub running: bool,
    pub schedule: String,
    pub schedule_description: String,
    pub next_run_at: Option<DateTime<Utc>>,
    pub keep_last: u32,
    pub total_local_backups: usize,
    pub last_backup: Option<SnapshotArtifact>,
    pub last_remote_error: Option<String>,
    pub remote_enabled: bool,
    pub remote: Option<RemoteStatus>,
}

pub struct BackupManagerBuilder {
    source_path: PathBuf,
    local: LocalStore,
    store: Arc<dyn ConfigStore>,
    trigger: Arc<dyn ScheduleTrigger>,
    remote: Option<Arc<RemoteSyncClient>>,
    clock: Arc<dyn Clock>,
}

impl BackupManagerBuilder {
    pub fn remote(mut self, remote: Arc<RemoteSyncClient>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Builds the manager around `config`, normally the result of [`load_config`].
    /// A stored credential is handed to the remote client; the schedule is not
    /// registered until [`BackupManager::start`].
    pub async fn build(self, config: BackupConfig) -> Arc<BackupManager> {
        if let (Some(remote), Some(credential)) = (&self.remote, &config.remote_credential) {
            if let Err(e) = remote.set_credentials(credential.clone()).await {
                warn!(error = %e, "ignoring stored remote credential");
            }
        }

        Arc::new(BackupManager {
            source_path: self.source_path,
            local: self.local,
            store: self.store,
            trigger: self.trigger,
            remote: self.remote,
            clock: self.clock,
            config: RwLock::new(config),
            running: Mutex::new(false),
            run_guard: Mutex::new(()),
            last_backup: RwLock::new(None),
            last_remote_error: RwLock::new(None),
        })
    }
}

/// Orchestrates snapshot runs and owns the schedule registration.
pub struct BackupManager {
    source_path: PathBuf,
    local: LocalStore,
    store: Arc<dyn ConfigStore>,
    trigger: Arc<dyn ScheduleTrigger>,
    remote: Option<Arc<RemoteSyncClient>>,
    clock: Arc<dyn Clock>,
    config: RwLock<BackupConfig>,
    /// Whether a schedule is registered. Held while (un)registering.
    running: Mutex<bool>,
    /// Held for the duration of a run.
    run_guard: Mutex<()>,
    last_backup: RwLock<Option<SnapshotArtifact>>,
    last_remote_error: RwLock<Option<RemoteError>>,
}

impl BackupManager {
    pub fn builder(
        source_path: impl Into<PathBuf>,
        local: LocalStore,
        store: Arc<dyn ConfigStore>,
        trigger: Arc<dyn ScheduleTrigger>,
    ) -> BackupManagerBuilder {
        BackupManagerBuilder {
            source_path: source_path.into(),
            local,
            store,
            trigger,
            remote: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub async fn config(&self) -> BackupConfig {
        self.config.read().await.clone()
    }

    /// Registers the configured schedule. A no-op when already running.
    pub async fn start(self: &Arc<Self>) -> Result<(), BackupError> {
        let mut running = self.running.lock().await;
        if *running {
            info!("backup schedule already registered");
            return Ok(());
        }
        let schedule = self.config.read().await.parsed_schedule()?;
        self.arm(&schedule)?;
        *running = true;
        Ok(())
    }

    /// Deregisters the schedule. Runs already in flight are not interrupted.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        if *running {
            self.trigger.unregister();
            *running = false;
            info!("backup schedule stopped");
        }
    }

    /// Stops scheduling and waits for an in-flight run to finish.
    pub async fn shutdown(&self) {
        self.stop().await;
        let _guard = self.run_guard.lock().await;
        info!("backup manager shut down");
    }

    pub async fn run_backup(&self) -> Result<RunReport, BackupError> {
        let _guard = self.run_guard.lock().await;
        self.run_locked().await
    }

    async fn scheduled_tick(&self) {
        let Ok(_guard) = self.run_guard.try_lock() else {
            warn!("previous backup still running; skipping scheduled run");
            return;
        };
        match self.run_locked().await {
            Ok(report) => info!(
                name = %report.local.name,
                mirrored = report.remote.is_some(),
                "scheduled backup finished"
            ),
            Err(e) => error!(error = %e, "scheduled backup failed"),
        }
    }

    async fn run_locked(&self) -> Result<RunReport, BackupError> {
        let config = self.config.read().await.clone();
        let policy = config.retention()?;

        match tokio::fs::metadata(&self.source_path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(BackupError::SourceMissing(self.source_path.clone())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(BackupError::SourceMissing(self.source_path.clone()))
            }
            Err(e) => return Err(BackupError::Io(e.into())),
        }

        let name = snapshot_name(self.clock.now());
        let local = self.local.clone();
        let source = self.source_path.clone();
        let artifact = tokio::task::spawn_blocking(move || -> anyhow::Result<SnapshotArtifact> {
            local.ensure_directory()?;
            let artifact = local.write(&name, &source)?;
            match local.rotate(policy) {
                Ok(removed) if !removed.is_empty() => {
                    debug!(removed = removed.len(), "local rotation done")
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "local rotation failed"),
            }
            Ok(artifact)
        })
        .await
        .map_err(|e| BackupError::Io(e.into()))?
        .map_err(BackupError::Io)?;

        info!(
            name = %artifact.name,
            size = artifact.size_bytes,
            sha256 = artifact.sha256.as_deref().unwrap_or_default(),
            "local snapshot created"
        );

        let mut report = RunReport {
            local: artifact,
            remote: None,
            remote_error: None,
        };
        if config.remote_enabled {
            self.mirror(&mut report, policy).await;
        }

        *self.last_backup.write().await = Some(report.local.clone());
        *self.last_remote_error.write().await = report.remote_error.clone();
        Ok(report)
    }

    /// Remote leg of a run. Failures land in the report, never in an `Err`.
    async fn mirror(&self, report: &mut RunReport, policy: RetentionPolicy) {
        let Some(remote) = self.remote.as_ref() else {
            debug!("remote mirroring enabled but no remote client; skipping");
            return;
        };
        if !remote.is_configured().await {
            debug!("remote mirroring enabled but no credential configured; skipping");
            return;
        }
        let before = remote.credential().await;

        let uploaded = remote.upload(&report.local.path, &report.local.name).await;
        match uploaded {
            Ok(uploaded) => {
                report.local = report.local.clone().with_remote(RemoteRef {
                    remote_id: uploaded.remote_id.clone(),
                    link: uploaded.link.clone(),
                });
                report.remote = Some(uploaded);
            }
            Err(e) => {
                warn!(name = %report.local.name, error = %e, "remote mirror failed; local snapshot kept");
                report.remote_error = Some(e);
            }
        }

        if report.remote_error.as_ref().is_some_and(RemoteError::is_auth) {
            debug!("credential refused; skipping remote rotation");
        } else {
            match remote.rotate(policy).await {
                Ok(deleted) if deleted > 0 => debug!(deleted, "remote rotation done"),
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "remote rotation failed");
                    report.remote_error.get_or_insert(e);
                }
            }
        }

        let after = remote.credential().await;
        if after.is_some() && after != before {
            self.persist_credential(after).await;
        }
    }

    async fn persist_credential(&self, credential: Option<RemoteCredential>) {
        let mut config = self.config.write().await;
        let mut next = config.clone();
        next.remote_credential = credential;
        match self.store.save(&next).await {
            Ok(()) => {
                *config = next;
                info!("refreshed remote credential persisted");
            }
            Err(e) => warn!(error = %e, "failed to persist refreshed remote credential"),
        }
    }

    pub async fn status(&self) -> Result<ManagerStatus, BackupError> {
        let config = self.config.read().await.clone();
        let running = *self.running.lock().await;

        let local = self.local.clone();
        let snapshots = tokio::task::spawn_blocking(move || local.list())
            .await
            .map_err(|e| BackupError::Io(e.into()))?
            .map_err(BackupError::Io)?;

        // The in-memory record carries the remote reference; the listing is
        // the fallback after a restart.
        let last_backup = match self.last_backup.read().await.clone() {
            Some(last) => Some(last),
            None => snapshots.first().cloned(),
        };

        let schedule = Schedule::parse(&config.schedule).ok();
        let next_run_at = match (&schedule, running) {
            (Some(schedule), true) => schedule
                .next_after(&self.clock.now().with_timezone(&Local))
                .map(|at| at.with_timezone(&Utc)),
            _ => None,
        };

        let remote = match &self.remote {
            Some(remote) => Some(remote.status().await),
            None => None,
        };

        Ok(ManagerStatus {
            enabled: config.enabled,
            running,
            schedule_description: schedule
                .map(|s| s.description())
                .unwrap_or_else(|| config.schedule.clone()),
            schedule: config.schedule,
            next_run_at,
            keep_last: config.keep_last,
            total_local_backups: snapshots.len(),
            last_backup,
            last_remote_error: self
                .last_remote_error
                .read()
                .await
                .as_ref()
                .map(ToString::to_string),
            remote_enabled: config.remote_enabled,
            remote,
        })
    }

    /// Validates and persists `patch`, then brings the registration in line:
    /// a running schedule is re-registered, disabling stops it, and enabling
    /// a stopped manager starts it.
    pub async fn update_config(
        self: &Arc<Self>,
        patch: ConfigPatch,
    ) -> Result<BackupConfig, BackupError> {
        let mut running = self.running.lock().await;
        let current = self.config.read().await.clone();
        let mut next = current.clone();
        next.apply(patch);
        next.validate()?;
        self.store
            .save(&next)
            .await
            .map_err(BackupError::ConfigStore)?;
        *self.config.write().await = next.clone();
        info!(
            enabled = next.enabled,
            schedule = %next.schedule,
            keep_last = next.keep_last,
            remote_enabled = next.remote_enabled,
            "backup settings updated"
        );

        let should_run = next.enabled && (*running || !current.enabled);
        if *running {
            self.trigger.unregister();
            *running = false;
        }
        if should_run {
            self.arm(&next.parsed_schedule()?)?;
            *running = true;
        } else if current.enabled && !next.enabled {
            info!("backups disabled; schedule stopped");
        }
        Ok(next)
    }

    /// Stores `credential` for remote mirroring and persists it.
    pub async fn set_credentials(&self, credential: RemoteCredential) -> Result<(), BackupError> {
        if credential.access_token.trim().is_empty() {
            return Err(ConfigError::Invalid("access token must not be empty".to_owned()).into());
        }
        let mut config = self.config.write().await;
        let mut next = config.clone();
        next.remote_credential = Some(credential.clone());
        self.store
            .save(&next)
            .await
            .map_err(BackupError::ConfigStore)?;
        if let Some(remote) = &self.remote {
            remote
                .set_credentials(credential)
                .await
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        *config = next;
        Ok(())
    }

    pub async fn clear_credentials(&self) -> Result<(), BackupError> {
        let mut config = self.config.write().await;
        let mut next = config.clone();
        next.remote_credential = None;
        self.store
            .save(&next)
            .await
            .map_err(BackupError::ConfigStore)?;
        if let Some(remote) = &self.remote {
            remote.clear_credentials().await;
        }
        *config = next;
        Ok(())
    }

    fn arm(self: &Arc<Self>, schedule: &Schedule) -> Result<(), BackupError> {
        self.trigger
            .register(schedule, tick_handler(Arc::downgrade(self)))
            .map_err(BackupError::Scheduler)?;
        info!(schedule = schedule.as_str(), cadence = %schedule.description(), "backup schedule registered");
        Ok(())
    }
}

// The trigger only holds a weak reference so dropping the manager ends ticks.
fn tick_handler(manager: Weak<BackupManager>) -> TickHandler {
    Arc::new(move || -> TickFuture {
        let manager = manager.clone();
        Box::pin(async move {
            if let Some(manager) = manager.upgrade() {
                manager.scheduled_tick().await;
            }
        })
    })
}

/// Reads the persisted settings, falling back to `fallback` when the record
/// is missing, unreadable or invalid. A stored credential survives an
/// otherwise invalid record.
pub async fn load_config(store: &dyn ConfigStore, fallback: &BackupConfig) -> BackupConfig {
    match store.load().await {
        Ok(Some(config)) => match config.validate() {
            Ok(()) => config,
            Err(e) => {
                warn!(error = %e, "persisted backup settings invalid; using fallback");
                BackupConfig {
                    remote_credential: config.remote_credential,
                    ..fallback.clone()
                }
            }
        },
        Ok(None) => {
            info!("no persisted backup settings; using defaults");
            fallback.clone()
        }
        Err(e) => {
            warn!(error = %e, "failed to read backup settings; using fallback");
            fallback.clone()
        }
    }
}
