use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use lifeboat_core::{BackupConfig, RemoteCredential};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use crate::store::ConfigStore;

/// Postgres-backed settings store.
pub struct PostgresConfigStore {
    pool: PgPool,
}

impl PostgresConfigStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(database_url)
            .await
            .context("connect to postgres")?;
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS backup_settings (
                id SMALLINT PRIMARY KEY CHECK (id = 1),
                enabled BOOLEAN NOT NULL,
                schedule TEXT NOT NULL,
                keep_last BIGINT NOT NULL,
                remote_enabled BOOLEAN NOT NULL,
                access_token TEXT,
                refresh_token TEXT,
                token_expiry TIMESTAMPTZ,
                updated_at TIMESTAMPTZ NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .context("create backup_settings table")?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ConfigStore for PostgresConfigStore {
    async fn load(&self) -> Result<Option<BackupConfig>> {
        let row = sqlx::query(
            "SELECT enabled, schedule, keep_last, remote_enabled,
             access_token, refresh_token, token_expiry
             FROM backup_settings WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await
        .context("read backup settings")?;

        row.as_ref().map(pg_row_to_config).transpose()
    }

    async fn save(&self, config: &BackupConfig) -> Result<()> {
        let cred = config.remote_credential.as_ref();
        sqlx::query(
            "INSERT INTO backup_settings (id, enabled, schedule, keep_last, remote_enabled,
             access_token, refresh_token, token_expiry, updated_at)
             VALUES (1, $1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (id) DO UPDATE SET
               enabled = EXCLUDED.enabled,
               schedule = EXCLUDED.schedule,
               keep_last = EXCLUDED.keep_last,
               remote_enabled = EXCLUDED.remote_enabled,
               access_token = EXCLUDED.access_token,
               refresh_token = EXCLUDED.refresh_token,
               token_expiry = EXCLUDED.token_expiry,
               updated_at = EXCLUDED.updated_at",
        )
        .bind(config.enabled)
        .bind(&config.schedule)
        .bind(i64::from(config.keep_last))
        .bind(config.remote_enabled)
        .bind(cred.map(|c| c.access_token.clone()))
        .bind(cred.and_then(|c| c.refresh_token.clone()))
        .bind(cred.and_then(|c| c.expiry))
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .context("write backup settings")?;
        Ok(())
    }
}

fn pg_row_to_config(row: &sqlx::postgres::PgRow) -> Result<BackupConfig> {
    let keep_last: i64 = row.try_get("keep_last")?;
    let access_token: Option<String> = row.try_get("access_token")?;
    let refresh_token: Option<String> = row.try_get("refresh_token")?;
    let expiry: Option<DateTime<Utc>> = row.try_get("token_expiry")?;

    Ok(BackupConfig {
        enabled: row.try_get("enabled")?,
        schedule: row.try_get("schedule")?,
        keep_last: u32::try_from(keep_last)
            .with_context(|| format!("stored keep_last out of range: {keep_last}"))?,
        remote_enabled: row.try_get("remote_enabled")?,
        remote_credential: access_token.map(|access_token| RemoteCredential {
            access_token,
            refresh_token,
            expiry,
        }),
    })
}
