use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retention::RetentionPolicy;
use crate::schedule::Schedule;

pub const DEFAULT_SCHEDULE: &str = "0 2 * * *";
pub const DEFAULT_KEEP_LAST: u32 = 7;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid backup configuration: {0}")]
    Invalid(String),
}

/// OAuth2 token pair for the remote store.
///
/// Never mutated in place: a refresh builds a new value which replaces the old one whole.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteCredential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expiry: Option<DateTime<Utc>>,
}

impl fmt::Debug for RemoteCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCredential")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expiry", &self.expiry)
            .finish()
    }
}

/// The persisted backup settings record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackupConfig {
    pub enabled: bool,
    pub schedule: String,
    pub keep_last: u32,
    pub remote_enabled: bool,
    pub remote_credential: Option<RemoteCredential>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            schedule: DEFAULT_SCHEDULE.to_owned(),
            keep_last: DEFAULT_KEEP_LAST,
            remote_enabled: false,
            remote_credential: None,
        }
    }
}

impl BackupConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retention()?;
        self.parsed_schedule()?;
        Ok(())
    }

    pub fn retention(&self) -> Result<RetentionPolicy, ConfigError> {
        RetentionPolicy::new(self.keep_last as usize)
    }

    pub fn parsed_schedule(&self) -> Result<Schedule, ConfigError> {
        Schedule::parse(&self.schedule)
    }

    /// Merges the fields present in `patch`; credentials are managed separately.
    pub fn apply(&mut self, patch: ConfigPatch) {
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
        if let Some(schedule) = patch.schedule {
            self.schedule = schedule;
        }
        if let Some(keep_last) = patch.keep_last {
            self.keep_last = keep_last;
        }
        if let Some(remote_enabled) = patch.remote_enabled {
            self.remote_enabled = remote_enabled;
        }
    }
}

/// Partial update of [`BackupConfig`] coming from the admin side.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConfigPatch {
    pub enabled: Option<bool>,
    pub schedule: Option<String>,
    pub keep_last: Option<u32>,
    pub remote_enabled: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid_and_disabled() {
        let cfg = BackupConfig::default();
        cfg.validate().unwrap();
        assert!(!cfg.enabled);
        assert!(!cfg.remote_enabled);
        assert_eq!(cfg.retention().unwrap().keep_last(), 7);
    }

    #[test]
    fn validate_rejects_zero_retention_and_bad_schedule() {
        let zero = BackupConfig {
            keep_last: 0,
            ..BackupConfig::default()
        };
        assert!(zero.validate().is_err());

        let bad = BackupConfig {
            schedule: "every tuesday-ish".into(),
            ..BackupConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn patch_only_touches_present_fields() {
        let mut cfg = BackupConfig::default();
        cfg.apply(ConfigPatch {
            keep_last: Some(4),
            enabled: Some(true),
            ..ConfigPatch::default()
        });
        assert!(cfg.enabled);
        assert_eq!(cfg.keep_last, 4);
        assert_eq!(cfg.schedule, DEFAULT_SCHEDULE);
        assert!(!cfg.remote_enabled);
    }

    #[test]
    fn patch_deserializes_from_partial_json() {
        let patch: ConfigPatch = serde_json::from_str(r#"{"schedule":"hourly"}"#).unwrap();
        assert_eq!(patch.schedule.as_deref(), Some("hourly"));
        assert_eq!(patch.keep_last, None);
    }

    #[test]
    fn credential_debug_hides_tokens() {
        let cred = RemoteCredential {
            access_token: "ya29.secret".into(),
            refresh_token: Some("1//refresh".into()),
            expiry: None,
        };
        let rendered = format!("{cred:?}");
        assert!(!rendered.contains("secret"));
        assert!(!rendered.contains("1//refresh"));
    }
}
