use std::path::Path;

use serde::{Deserialize, Serialize};
use vor_codec::WriteOptions;

use crate::error::{RepositoryError, RepositoryResult};

/// Repository settings. Every field has a default, so a TOML file only
/// needs the keys it changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Check every assignment against the schema and refuse mismatches.
    pub verify: bool,
    /// Report reference counts from [`RepositoryView::ref_count`](crate::RepositoryView::ref_count).
    pub ref_counted: bool,
    /// Write `SCHEMA` items with embedded attribute names and type ids.
    pub core_schema_self_describing: bool,
    /// Send values of indexed attributes to the full-text sink.
    pub index_text: bool,
    /// zstd level for snapshot files.
    pub snapshot_compression_level: i32,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            verify: false,
            ref_counted: false,
            core_schema_self_describing: true,
            index_text: true,
            snapshot_compression_level: 3,
        }
    }
}

impl RepositoryConfig {
    pub fn from_toml_str(text: &str) -> RepositoryResult<Self> {
        toml::from_str(text).map_err(|e| RepositoryError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> RepositoryResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> RepositoryResult<String> {
        toml::to_string_pretty(self).map_err(|e| RepositoryError::Config(e.to_string()))
    }

    pub fn write_options(&self) -> WriteOptions {
        WriteOptions {
            self_describing: self.core_schema_self_describing,
            index_text: self.index_text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config() {
        let c = RepositoryConfig::default();
        assert!(!c.verify);
        assert!(!c.ref_counted);
        assert!(c.core_schema_self_describing);
        assert!(c.index_text);
        assert_eq!(c.snapshot_compression_level, 3);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c = RepositoryConfig::from_toml_str("verify = true\nsnapshot_compression_level = 9\n")
            .unwrap();
        assert!(c.verify);
        assert_eq!(c.snapshot_compression_level, 9);
        assert!(c.index_text);
    }

    #[test]
    fn bad_toml_is_a_config_error() {
        let err = RepositoryConfig::from_toml_str("verify = \"yes\"").unwrap_err();
        assert!(matches!(err, RepositoryError::Config(_)));
    }

    #[test]
    fn load_from_file_and_back() {
        let c = RepositoryConfig {
            ref_counted: true,
            index_text: false,
            ..RepositoryConfig::default()
        };
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(c.to_toml_string().unwrap().as_bytes()).unwrap();
        assert_eq!(RepositoryConfig::load(file.path()).unwrap(), c);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = RepositoryConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, RepositoryError::Io(_)));
    }

    #[test]
    fn write_options_follow_config() {
        let c = RepositoryConfig {
            core_schema_self_describing: false,
            ..RepositoryConfig::default()
        };
        let options = c.write_options();
        assert!(!options.self_describing);
        assert!(options.index_text);
    }
}
