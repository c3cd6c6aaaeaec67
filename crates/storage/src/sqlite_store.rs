use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use lifeboat_core::{BackupConfig, RemoteCredential};
use rusqlite::{params, Connection, OptionalExtension};

use crate::store::ConfigStore;

/// SQLite-backed settings store. Each call opens a fresh connection on the blocking pool.
pub struct SqliteConfigStore {
    db_path: PathBuf,
}

impl SqliteConfigStore {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create settings directory: {}", parent.display()))?;
        }
        let store = Self { db_path };
        store.init_db()?;
        Ok(store)
    }

    fn connect(&self) -> Result<Connection> {
        Connection::open(&self.db_path).context("open settings db")
    }

    fn init_db(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS backup_settings (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                enabled INTEGER NOT NULL,
                schedule TEXT NOT NULL,
                keep_last INTEGER NOT NULL,
                remote_enabled INTEGER NOT NULL,
                access_token TEXT,
                refresh_token TEXT,
                token_expiry TEXT,
                updated_at TEXT NOT NULL
            );",
        )?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ConfigStore for SqliteConfigStore {
    async fn load(&self) -> Result<Option<BackupConfig>> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).context("open settings db")?;
            let row = conn
                .query_row(
                    "SELECT enabled, schedule, keep_last, remote_enabled,
                     access_token, refresh_token, token_expiry
                     FROM backup_settings WHERE id = 1",
                    [],
                    |row| {
                        Ok(SettingsRow {
                            enabled: row.get(0)?,
                            schedule: row.get(1)?,
                            keep_last: row.get(2)?,
                            remote_enabled: row.get(3)?,
                            access_token: row.get(4)?,
                            refresh_token: row.get(5)?,
                            token_expiry: row.get(6)?,
                        })
                    },
                )
                .optional()
                .context("read backup settings")?;
            row.map(SettingsRow::into_config).transpose()
        })
        .await?
    }

    async fn save(&self, config: &BackupConfig) -> Result<()> {
        let config = config.clone();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).context("open settings db")?;
            let cred = config.remote_credential.as_ref();
            conn.execute(
                "INSERT INTO backup_settings (id, enabled, schedule, keep_last, remote_enabled,
                 access_token, refresh_token, token_expiry, updated_at)
                 VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                   enabled = excluded.enabled,
                   schedule = excluded.schedule,
                   keep_last = excluded.keep_last,
                   remote_enabled = excluded.remote_enabled,
                   access_token = excluded.access_token,
                   refresh_token = excluded.refresh_token,
                   token_expiry = excluded.token_expiry,
                   updated_at = excluded.updated_at",
                params![
                    config.enabled,
                    config.schedule,
                    i64::from(config.keep_last),
                    config.remote_enabled,
                    cred.map(|c| c.access_token.as_str()),
                    cred.and_then(|c| c.refresh_token.as_deref()),
                    cred.and_then(|c| c.expiry).map(|t| t.to_rfc3339()),
                    Utc::now().to_rfc3339(),
                ],
            )
            .context("write backup settings")?;
            Ok(())
        })
        .await?
    }
}

struct SettingsRow {
    enabled: bool,
    schedule: String,
    keep_last: i64,
    remote_enabled: bool,
    access_token: Option<String>,
    refresh_token: Option<String>,
    token_expiry: Option<String>,
}

impl SettingsRow {
    fn into_config(self) -> Result<BackupConfig> {
        let keep_last = u32::try_from(self.keep_last)
            .with_context(|| format!("stored keep_last out of range: {}", self.keep_last))?;
        let expiry = self
            .token_expiry
            .as_deref()
            .map(parse_ts)
            .transpose()?;
        Ok(BackupConfig {
            enabled: self.enabled,
            schedule: self.schedule,
            keep_last,
            remote_enabled: self.remote_enabled,
            remote_credential: self.access_token.map(|access_token| RemoteCredential {
                access_token,
                refresh_token: self.refresh_token,
                expiry,
            }),
        })
    }
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("stored token_expiry is not RFC 3339: {raw}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn store_in(dir: &tempfile::TempDir) -> SqliteConfigStore {
        SqliteConfigStore::new(dir.path().join("state").join("settings.db")).expect("store")
    }

    #[tokio::test]
    async fn empty_store_loads_none() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(store_in(&tmp).load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_then_load_round_trips_credential() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(&tmp);
        let cfg = BackupConfig {
            enabled: true,
            schedule: "*/30 * * * *".into(),
            keep_last: 4,
            remote_enabled: true,
            remote_credential: Some(RemoteCredential {
                access_token: "access".into(),
                refresh_token: Some("refresh".into()),
                expiry: Some(Utc.with_ymd_and_hms(2026, 10, 17, 12, 0, 0).unwrap()),
            }),
        };
        store.save(&cfg).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(cfg));
    }

    #[tokio::test]
    async fn second_save_replaces_the_record() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(&tmp);
        store.save(&BackupConfig::default()).await.unwrap();
        let updated = BackupConfig {
            keep_last: 2,
            ..BackupConfig::default()
        };
        store.save(&updated).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.keep_last, 2);
        assert!(loaded.remote_credential.is_none());
    }

    #[tokio::test]
    async fn corrupt_row_is_an_error_not_a_default() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(&tmp);
        store.save(&BackupConfig::default()).await.unwrap();

        let conn = Connection::open(tmp.path().join("state").join("settings.db")).unwrap();
        conn.execute(
            "UPDATE backup_settings SET keep_last = -1, access_token = 'a', token_expiry = 'soon'",
            [],
        )
        .unwrap();
        drop(conn);

        assert!(store.load().await.is_err());
    }
}
