use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use lifeboat_core::BackupConfig;
use tracing::info;

use crate::postgres_store::PostgresConfigStore;
use crate::sqlite_store::SqliteConfigStore;

/// Persistence for the single backup settings record, implemented by the
/// SQLite and Postgres backends.
#[async_trait::async_trait]
pub trait ConfigStore: Send + Sync {
    /// The stored record, or `None` if nothing was ever saved.
    async fn load(&self) -> Result<Option<BackupConfig>>;

    /// Replace the stored record.
    async fn save(&self, config: &BackupConfig) -> Result<()>;
}

/// Postgres when a database URL is given, otherwise SQLite at `sqlite_path`.
pub async fn open_config_store(
    sqlite_path: &Path,
    database_url: Option<&str>,
) -> Result<Arc<dyn ConfigStore>> {
    match database_url {
        Some(url) => {
            info!("using postgres settings store");
            Ok(Arc::new(PostgresConfigStore::new(url).await?))
        }
        None => {
            info!(path = %sqlite_path.display(), "using sqlite settings store");
            let path = sqlite_path.to_path_buf();
            let store = tokio::task::spawn_blocking(move || SqliteConfigStore::new(path)).await??;
            Ok(Arc::new(store))
        }
    }
}

/// Process-local store for tests and one-off runs without persistence.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    record: Mutex<Option<BackupConfig>>,
}

impl MemoryConfigStore {
    pub fn new(initial: Option<BackupConfig>) -> Self {
        Self {
            record: Mutex::new(initial),
        }
    }

    pub fn snapshot(&self) -> Option<BackupConfig> {
        self.record.lock().ok().and_then(|r| r.clone())
    }
}

#[async_trait::async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn load(&self) -> Result<Option<BackupConfig>> {
        let record = self
            .record
            .lock()
            .map_err(|_| anyhow!("settings store lock poisoned"))?;
        Ok(record.clone())
    }

    async fn save(&self, config: &BackupConfig) -> Result<()> {
        let mut record = self
            .record
            .lock()
            .map_err(|_| anyhow!("settings store lock poisoned"))?;
        *record = Some(config.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trips_latest_save() {
        let store = MemoryConfigStore::default();
        assert!(store.load().await.unwrap().is_none());

        let cfg = BackupConfig {
            enabled: true,
            keep_last: 3,
            ..BackupConfig::default()
        };
        store.save(&cfg).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(cfg.clone()));
        assert_eq!(store.snapshot(), Some(cfg));
    }

    #[tokio::test]
    async fn open_defaults_to_sqlite() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("settings.db");
        let store = open_config_store(&path, None).await.unwrap();
        store.save(&BackupConfig::default()).await.unwrap();
        assert!(path.exists());
        assert_eq!(store.load().await.unwrap(), Some(BackupConfig::default()));
    }
}
