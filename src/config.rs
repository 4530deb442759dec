//! Hub configuration, loaded once at startup.
//!
//! The configuration is a TOML file. Lookup order: an explicit `--config`
//! path, then `$XDG_CONFIG_HOME/datahub/datahub.toml`, then the bundled
//! default. `DATAHUB_BIND` and `DATAHUB_PORT` override the server address.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::classify::{RuleTable, SetClassifier};
use crate::datatype::{self, IdentifierExtractor};
use crate::error::{ConfigError, HubResult};
use crate::paths::HubPaths;
use crate::resolver::RecordResolver;
use crate::store::{self, Backend};

/// The configuration shipped with the binary.
pub const DEFAULT_CONFIG: &str = include_str!("../data/datahub.toml");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_bind() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: Backend,
    /// Directory of the redb file. Defaults to the XDG data directory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordsConfig {
    #[serde(default = "default_data_type")]
    pub data_type: String,
    /// Page size when a listing gives no limit.
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    /// Largest page size a listing may ask for.
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
}

fn default_data_type() -> String {
    "lido".into()
}
fn default_limit() -> usize {
    5
}
fn default_max_limit() -> usize {
    99
}

impl Default for RecordsConfig {
    fn default() -> Self {
        Self {
            data_type: default_data_type(),
            default_limit: default_limit(),
            max_limit: default_max_limit(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_namespace_uri")]
    pub namespace_uri: String,
    #[serde(default)]
    pub language: Option<String>,
}

fn default_namespace() -> String {
    "lido".into()
}
fn default_namespace_uri() -> String {
    "http://www.lido-schema.org".into()
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            namespace_uri: default_namespace_uri(),
            language: None,
        }
    }
}

/// Complete hub configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub records: RecordsConfig,
    #[serde(default)]
    pub classification: ClassificationConfig,
    /// Set rules in file order.
    #[serde(default)]
    pub sets: RuleTable,
}

impl HubConfig {
    /// Parse and validate TOML. `origin` names the source in errors.
    pub fn from_toml(content: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// The bundled default configuration.
    pub fn bundled() -> Result<Self, ConfigError> {
        Self::from_toml(DEFAULT_CONFIG, "<bundled>")
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml(&content, &path.display().to_string())
    }

    /// Load `explicit` if given, else the XDG config file if it exists, else
    /// the bundled default.
    pub fn resolve(explicit: Option<&Path>, paths: Option<&HubPaths>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        if let Some(file) = paths.map(HubPaths::config_file).filter(|f| f.is_file()) {
            tracing::debug!(path = %file.display(), "loading config");
            return Self::load(&file);
        }
        Self::bundled()
    }

    /// Apply `DATAHUB_BIND` / `DATAHUB_PORT`.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(
            std::env::var("DATAHUB_BIND").ok(),
            std::env::var("DATAHUB_PORT").ok(),
        )
    }

    fn apply_overrides(&mut self, bind: Option<String>, port: Option<String>) -> Result<(), ConfigError> {
        if let Some(bind) = bind {
            self.server.bind = bind;
        }
        if let Some(port) = port {
            self.server.port = port.parse().map_err(|_| ConfigError::Invalid {
                key: "DATAHUB_PORT".into(),
                message: format!("\"{port}\" is not a port number"),
            })?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let records = &self.records;
        if records.max_limit == 0 {
            return Err(ConfigError::Invalid {
                key: "records.max_limit".into(),
                message: "must be at least 1".into(),
            });
        }
        if records.default_limit == 0 || records.default_limit > records.max_limit {
            return Err(ConfigError::Invalid {
                key: "records.default_limit".into(),
                message: format!("must be between 1 and max_limit ({})", records.max_limit),
            });
        }
        if self.classification.namespace.is_empty() || self.classification.namespace.contains(':') {
            return Err(ConfigError::Invalid {
                key: "classification.namespace".into(),
                message: "must be a non-empty prefix without ':'".into(),
            });
        }
        datatype::for_data_type(&records.data_type).map_err(|e| ConfigError::Invalid {
            key: "records.data_type".into(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    /// The configured language, if set and non-empty.
    pub fn language(&self) -> Option<&str> {
        self.classification
            .language
            .as_deref()
            .filter(|l| !l.trim().is_empty())
    }

    /// Compile the set rules.
    pub fn classifier(&self) -> Result<SetClassifier, ConfigError> {
        SetClassifier::new(
            &self.sets,
            &self.classification.namespace,
            &self.classification.namespace_uri,
            self.language(),
        )
    }

    pub fn extractor(&self) -> Result<Arc<dyn IdentifierExtractor>, ConfigError> {
        datatype::for_data_type(&self.records.data_type).map_err(|e| ConfigError::Invalid {
            key: "records.data_type".into(),
            message: e.to_string(),
        })
    }

    /// Directory for the redb store.
    pub fn data_dir(&self, paths: Option<&HubPaths>) -> PathBuf {
        match (&self.storage.data_dir, paths) {
            (Some(dir), _) => dir.clone(),
            (None, Some(paths)) => paths.store_dir(),
            (None, None) => PathBuf::from("datahub-data"),
        }
    }

    /// Open the configured store and assemble a resolver over it.
    pub fn resolver(&self, paths: Option<&HubPaths>) -> HubResult<RecordResolver> {
        let classifier = Arc::new(self.classifier()?);
        let extractor = self.extractor()?;
        let data_dir = self.data_dir(paths);
        if let (Backend::Redb, Some(paths)) = (self.storage.backend, paths) {
            paths.ensure_dirs()?;
        }
        let store = store::open(self.storage.backend, &data_dir)?;
        tracing::info!(
            backend = ?self.storage.backend,
            data_dir = %data_dir.display(),
            data_type = extractor.data_type(),
            rules = classifier.len(),
            "store opened"
        );
        Ok(RecordResolver::new(store, classifier, extractor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_config_is_valid_and_compiles() {
        let config = HubConfig::bundled().unwrap();
        assert_eq!(config.records.default_limit, 5);
        assert_eq!(config.records.max_limit, 99);
        assert_eq!(config.storage.backend, Backend::Redb);
        let keys: Vec<_> = config.sets.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["collection", "object_name", "creator", "classification"]);
        assert_eq!(config.classifier().unwrap().len(), 4);
    }

    #[test]
    fn missing_sections_take_defaults() {
        let config = HubConfig::from_toml("", "<test>").unwrap();
        assert_eq!(config.server, ServerConfig::default());
        assert_eq!(config.records.data_type, "lido");
        assert!(config.sets.is_empty());
    }

    #[test]
    fn invalid_settings_are_rejected() {
        for src in [
            "[records]\ndefault_limit = 0",
            "[records]\ndefault_limit = 50\nmax_limit = 10",
            "[records]\ndata_type = \"marc\"",
            "[classification]\nnamespace = \"\"",
            "[storage]\nbackend = \"mongo\"",
            "[server]\nport = \"eighty\"",
        ] {
            assert!(HubConfig::from_toml(src, "<test>").is_err(), "{src}");
        }
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = HubConfig::default();
        config
            .apply_overrides(Some("0.0.0.0".into()), Some("9000".into()))
            .unwrap();
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.server.port, 9000);
        assert!(config.apply_overrides(None, Some("x".into())).is_err());
    }

    #[test]
    fn blank_language_counts_as_unset() {
        let config = HubConfig::from_toml("[classification]\nlanguage = \"\"", "<test>").unwrap();
        assert_eq!(config.language(), None);
    }

    #[test]
    fn load_reports_the_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("datahub.toml");
        std::fs::write(&path, "[server\n").unwrap();
        let err = HubConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { ref path, .. } if path.ends_with("datahub.toml")));
        assert!(matches!(
            HubConfig::load(&dir.path().join("missing.toml")),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn durable_backend_creates_the_xdg_dirs() {
        let root = tempfile::TempDir::new().unwrap();
        let paths = HubPaths {
            config_dir: root.path().join("config/datahub"),
            data_dir: root.path().join("share/datahub"),
        };
        let mut config = HubConfig::bundled().unwrap();
        config.storage.backend = Backend::Memory;
        config.resolver(Some(&paths)).unwrap();
        assert!(!paths.data_dir.exists());

        config.storage.backend = Backend::Redb;
        config.resolver(Some(&paths)).unwrap();
        assert!(paths.config_dir.is_dir());
        assert!(paths.store_dir().join("datahub.redb").is_file());
    }

    #[test]
    fn memory_backend_builds_a_working_resolver() {
        let mut config = HubConfig::bundled().unwrap();
        config.storage.backend = Backend::Memory;
        let resolver = config.resolver(None).unwrap();
        assert_eq!(resolver.classifier().len(), 4);
        assert_eq!(resolver.store().count_records(None).unwrap(), 0);
    }

    #[test]
    fn data_dir_prefers_explicit_setting() {
        let mut config = HubConfig::default();
        let paths = HubPaths {
            config_dir: PathBuf::from("/cfg"),
            data_dir: PathBuf::from("/data"),
        };
        assert_eq!(config.data_dir(Some(&paths)), PathBuf::from("/data/store"));
        config.storage.data_dir = Some(PathBuf::from("/srv/hub"));
        assert_eq!(config.data_dir(Some(&paths)), PathBuf::from("/srv/hub"));
    }
}
