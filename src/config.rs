//! Pipeline configuration, read from YAML
//!
//! ```yaml
//! family: edr
//! consolidate_edges: true
//! log_level: debug
//! root_process:
//!   image: sample.exe
//!   image_path: C:\Temp
//! ```

use crate::graph::{EdgeMode, Process};
use crate::transform::Family;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// A root process named in configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RootProcessConfig {
    pub image: String,
    #[serde(default)]
    pub image_path: String,
    #[serde(default)]
    pub process_id: Option<u32>,
    #[serde(default)]
    pub command_line: String,
}

impl RootProcessConfig {
    pub fn to_process(&self) -> Process {
        let mut process = Process::new(&self.image, &self.image_path)
            .with_command_line(&self.command_line);
        process.process_id = self.process_id;
        process
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub family: Family,
    /// One edge per (source, kind, target) instead of one per occurrence
    pub consolidate_edges: bool,
    /// `tracing` filter directive; `RUST_LOG` takes precedence
    pub log_level: String,
    pub root_process: Option<RootProcessConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            family: Family::Generic,
            consolidate_edges: false,
            log_level: "info".to_string(),
            root_process: None,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load from the default location, or fall back to defaults when no
    /// file exists there
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    /// `<config dir>/trailgraph/config.yaml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("trailgraph").join("config.yaml"))
    }

    pub fn edge_mode(&self) -> EdgeMode {
        if self.consolidate_edges {
            EdgeMode::Consolidated
        } else {
            EdgeMode::PerOccurrence
        }
    }

    pub fn root_process(&self) -> Option<Process> {
        self.root_process.as_ref().map(RootProcessConfig::to_process)
    }
}
