//! XDG-compliant path resolution for the datahub.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Errors from path resolution.
#[derive(Debug, Error, Diagnostic)]
pub enum PathError {
    #[error("cannot determine home directory")]
    #[diagnostic(
        code(datahub::paths::no_home),
        help("Set the HOME environment variable or pass --config and --data-dir explicitly.")
    )]
    NoHome,

    #[error("failed to create directory: {path}")]
    #[diagnostic(
        code(datahub::paths::create_dir),
        help("Check that the parent directory exists and you have write permissions.")
    )]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type PathResult<T> = std::result::Result<T, PathError>;

const APP_DIR: &str = "datahub";

/// Global XDG-compliant directories.
#[derive(Debug, Clone)]
pub struct HubPaths {
    /// `$XDG_CONFIG_HOME/datahub/`
    pub config_dir: PathBuf,
    /// `$XDG_DATA_HOME/datahub/`
    pub data_dir: PathBuf,
}

impl HubPaths {
    /// Resolve XDG directories from environment variables with standard fallbacks.
    pub fn resolve() -> PathResult<Self> {
        let home = std::env::var("HOME")
            .map(PathBuf::from)
            .map_err(|_| PathError::NoHome)?;

        let config_dir = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join(".config"))
            .join(APP_DIR);

        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join(".local/share"))
            .join(APP_DIR);

        Ok(Self {
            config_dir,
            data_dir,
        })
    }

    /// Create the base directories. Idempotent.
    pub fn ensure_dirs(&self) -> PathResult<()> {
        for dir in [&self.config_dir, &self.data_dir] {
            std::fs::create_dir_all(dir).map_err(|e| PathError::CreateDir {
                path: dir.display().to_string(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// `config_dir/datahub.toml`
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("datahub.toml")
    }

    /// Where the redb store lives unless configured otherwise.
    pub fn store_dir(&self) -> PathBuf {
        self.data_dir.join("store")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolved_paths_use_app_dir() {
        // Reads the environment without mutating it (unsafe in edition 2024).
        let Ok(paths) = HubPaths::resolve() else {
            return;
        };
        assert!(paths.config_dir.ends_with(APP_DIR));
        assert!(paths.data_dir.ends_with(APP_DIR));
    }

    #[test]
    fn files_derive_from_dirs() {
        let paths = HubPaths {
            config_dir: PathBuf::from("/cfg/datahub"),
            data_dir: PathBuf::from("/data/datahub"),
        };
        assert_eq!(paths.config_file(), PathBuf::from("/cfg/datahub/datahub.toml"));
        assert_eq!(paths.store_dir(), PathBuf::from("/data/datahub/store"));
    }

    #[test]
    fn ensure_dirs_is_idempotent() {
        let tmp = tempfile::TempDir::new().unwrap();
        let paths = HubPaths {
            config_dir: tmp.path().join("cfg"),
            data_dir: tmp.path().join("data"),
        };
        paths.ensure_dirs().unwrap();
        paths.ensure_dirs().unwrap();
        assert!(paths.config_dir.is_dir());
        assert!(paths.data_dir.is_dir());
    }
}
