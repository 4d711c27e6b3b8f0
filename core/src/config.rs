use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::HistoryError;

pub const DEFAULT_FILE_NAME: &str = "history.db";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub data_dir: PathBuf,
    pub file_name: String,
    /// ISO 3166 alpha-2 code used when an account gives no country hint.
    pub country_code: Option<String>,
    pub busy_timeout_ms: u64,
    pub backup_before_migration: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            file_name: DEFAULT_FILE_NAME.to_string(),
            country_code: None,
            busy_timeout_ms: 5000,
            backup_before_migration: true,
        }
    }
}

impl HistoryConfig {
    pub fn in_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_country_code(mut self, country_code: impl Into<String>) -> Self {
        self.country_code = Some(country_code.into());
        self
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(&self.file_name)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, HistoryError> {
        let config: HistoryConfig = serde_json::from_str(raw)?;
        if config.file_name.trim().is_empty() {
            return Err(HistoryError::InvalidArgument("file_name is empty".to_string()));
        }
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, HistoryError> {
        let raw = fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config = HistoryConfig::from_json_str(r#"{"data_dir":"/tmp/chats","country_code":"DE"}"#)
            .expect("config");
        assert_eq!(config.file_name, DEFAULT_FILE_NAME);
        assert_eq!(config.country_code.as_deref(), Some("DE"));
        assert!(config.backup_before_migration);
        assert_eq!(config.db_path(), PathBuf::from("/tmp/chats/history.db"));
    }

    #[test]
    fn empty_file_name_is_rejected() {
        let err = HistoryConfig::from_json_str(r#"{"file_name":"  "}"#).unwrap_err();
        assert!(matches!(err, HistoryError::InvalidArgument(_)));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("history.json");
        fs::write(&path, r#"{"file_name":"chats.db","busy_timeout_ms":250,"backup_before_migration":false}"#)
            .expect("write config");
        let config = HistoryConfig::from_json_file(&path).expect("config");
        assert_eq!(config.file_name, "chats.db");
        assert_eq!(config.busy_timeout_ms, 250);
        assert!(!config.backup_before_migration);

        let err = HistoryConfig::from_json_file(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, HistoryError::Io(_)));
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = HistoryConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, HistoryError::Config(_)));
    }
}
