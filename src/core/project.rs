//! Project discovery and structure

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::core::store::DB_FILE;
use crate::core::Config;

/// Represents an MES project
#[derive(Debug)]
pub struct Project {
    /// Root directory of the project (parent of .mes/)
    root: PathBuf,
}

impl Project {
    /// Find project root by walking up from the current directory
    pub fn discover() -> Result<Self, ProjectError> {
        let current = std::env::current_dir().map_err(|e| ProjectError::IoError(e.to_string()))?;
        Self::discover_from(&current)
    }

    /// Find project root by walking up from the given directory
    pub fn discover_from(start: &Path) -> Result<Self, ProjectError> {
        let mut current = start
            .canonicalize()
            .map_err(|e| ProjectError::IoError(e.to_string()))?;

        loop {
            if current.join(".mes").is_dir() {
                return Ok(Self { root: current });
            }

            if !current.pop() {
                return Err(ProjectError::NotFound {
                    searched_from: start.to_path_buf(),
                });
            }
        }
    }

    /// Create a new project at the given path
    pub fn init(path: &Path) -> Result<Self, ProjectError> {
        let root = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if root.join(".mes").exists() {
            return Err(ProjectError::AlreadyExists(root));
        }
        Self::init_force(&root)
    }

    /// Initialize even if .mes/ exists; an existing database is kept
    pub fn init_force(path: &Path) -> Result<Self, ProjectError> {
        let root = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let mes_dir = root.join(".mes");

        std::fs::create_dir_all(mes_dir.join("media"))
            .map_err(|e| ProjectError::IoError(e.to_string()))?;

        let config_path = mes_dir.join("config.yaml");
        if !config_path.exists() {
            std::fs::write(&config_path, Self::default_config())
                .map_err(|e| ProjectError::IoError(e.to_string()))?;
        }

        Ok(Self { root })
    }

    fn default_config() -> &'static str {
        r#"# MES Project Configuration

# Operator recorded on new production logs (default: $USER)
# operator: ""

# Database file relative to the project root (default: .mes/mes.db)
# database: .mes/mes.db

# Default output format (auto, yaml, json, csv, tsv, md, id)
# default_format: auto

# Log filter when RUST_LOG is unset (error, warn, info, debug, trace)
# log_level: warn
"#
    }

    /// Get the project root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the .mes configuration directory
    pub fn mes_dir(&self) -> PathBuf {
        self.root.join(".mes")
    }

    /// Project config file
    pub fn config_path(&self) -> PathBuf {
        self.mes_dir().join("config.yaml")
    }

    /// Directory step media paths are resolved against
    pub fn media_dir(&self) -> PathBuf {
        self.mes_dir().join("media")
    }

    /// Database location, honoring the `database` config key
    pub fn database_path(&self) -> PathBuf {
        self.database_path_with(&Config::load(Some(self)))
    }

    /// Database location for an already loaded config
    pub fn database_path_with(&self, config: &Config) -> PathBuf {
        match config.database {
            Some(ref path) if path.is_absolute() => path.clone(),
            Some(ref path) => self.root.join(path),
            None => self.root.join(DB_FILE),
        }
    }
}

/// Errors that can occur during project operations
#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("not an MES project (searched from {searched_from:?}). Run 'mes init' to create one.")]
    NotFound { searched_from: PathBuf },

    #[error("MES project already exists at {0:?}")]
    AlreadyExists(PathBuf),

    #[error("IO error: {0}")]
    IoError(String),
}
