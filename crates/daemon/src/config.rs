use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use lifeboat_sync::{DEFAULT_API_BASE, DEFAULT_FOLDER_NAME, DEFAULT_TOKEN_URL, DEFAULT_UPLOAD_BASE};
use serde::Deserialize;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub remote: RemoteConfig,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// The live data file that gets snapshotted.
    pub source_path: Option<String>,
    pub backup_dir: Option<String>,
    /// SQLite file holding the backup settings record.
    pub config_db: Option<String>,
    /// Postgres URL; takes precedence over `config_db` when set.
    pub database_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct RemoteConfig {
    pub folder_name: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub token_url: Option<String>,
    pub api_base: Option<String>,
    pub upload_base: Option<String>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading config file {path:?}"))?;
    toml::from_str(&contents).with_context(|| format!("parsing config file {path:?}"))
}

/// File settings with `LIFEBOAT_*` environment overrides applied and
/// defaults filled in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub source_path: PathBuf,
    pub backup_dir: PathBuf,
    pub config_db: PathBuf,
    pub database_url: Option<String>,
    pub folder_name: String,
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
    pub api_base: String,
    pub upload_base: String,
}

impl Config {
    pub fn resolve(&self) -> Resolved {
        self.resolve_with(|key| env::var(key).ok())
    }

    pub fn resolve_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Resolved {
        let pick = |key: &str, file: &Option<String>, default: &str| {
            lookup(key)
                .or_else(|| file.clone())
                .unwrap_or_else(|| default.to_owned())
        };
        let storage = &self.storage;
        let remote = &self.remote;
        Resolved {
            source_path: pick("LIFEBOAT_SOURCE_PATH", &storage.source_path, "./data/primary.sqlite").into(),
            backup_dir: pick("LIFEBOAT_BACKUP_DIR", &storage.backup_dir, "./data/backups").into(),
            config_db: pick("LIFEBOAT_CONFIG_DB", &storage.config_db, "./data/lifeboat.sqlite").into(),
            database_url: lookup("DATABASE_URL").or_else(|| storage.database_url.clone()),
            folder_name: pick("LIFEBOAT_FOLDER_NAME", &remote.folder_name, DEFAULT_FOLDER_NAME),
            client_id: pick("LIFEBOAT_CLIENT_ID", &remote.client_id, ""),
            client_secret: pick("LIFEBOAT_CLIENT_SECRET", &remote.client_secret, ""),
            token_url: pick("LIFEBOAT_TOKEN_URL", &remote.token_url, DEFAULT_TOKEN_URL),
            api_base: pick("LIFEBOAT_API_BASE", &remote.api_base, DEFAULT_API_BASE),
            upload_base: pick("LIFEBOAT_UPLOAD_BASE", &remote.upload_base, DEFAULT_UPLOAD_BASE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn parses_sections_and_tolerates_missing_ones() {
        let cfg: Config = toml::from_str(
            r#"
            [storage]
            source_path = "/srv/app/app.sqlite"
            backup_dir = "/srv/backups"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.storage.source_path.as_deref(), Some("/srv/app/app.sqlite"));
        assert!(cfg.remote.client_id.is_none());
    }

    #[test]
    fn environment_overrides_file_and_defaults_fill_gaps() {
        let cfg: Config = toml::from_str(
            r#"
            [storage]
            backup_dir = "/srv/backups"
            [remote]
            folder_name = "from-file"
            "#,
        )
        .unwrap();
        let env: HashMap<&str, &str> = [
            ("LIFEBOAT_FOLDER_NAME", "from-env"),
            ("DATABASE_URL", "postgres://localhost/lifeboat"),
        ]
        .into();

        let resolved = cfg.resolve_with(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(resolved.backup_dir, PathBuf::from("/srv/backups"));
        assert_eq!(resolved.folder_name, "from-env");
        assert_eq!(resolved.database_url.as_deref(), Some("postgres://localhost/lifeboat"));
        assert_eq!(resolved.token_url, DEFAULT_TOKEN_URL);
        assert_eq!(resolved.source_path, PathBuf::from("./data/primary.sqlite"));
    }

    #[test]
    fn load_config_reports_the_path_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lifeboat.toml");
        std::fs::write(&path, "[storage\nbroken").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("lifeboat.toml"));
    }
}
