//! Run configuration loaded from `qail-synth.toml`.
//!
//! ```toml
//! [run]
//! seed = 7
//! random_choice = false
//! log_level = "info"
//!
//! [files]
//! tables = "data/tables.json"
//! specs = "out/specs.json"
//! output = "out/queries.json"
//!
//! [expand]
//! spec_count = 200
//! ```

use crate::error::{SynthError, SynthResult};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "qail-synth.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SynthConfig {
    pub run: RunConfig,
    pub files: FilesConfig,
    pub expand: ExpandConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub seed: u64,
    pub random_choice: bool,
    pub log_level: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            random_choice: false,
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    pub tables: Option<PathBuf>,
    pub specs: Option<PathBuf>,
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ExpandConfig {
    pub spec_count: usize,
}

impl Default for ExpandConfig {
    fn default() -> Self {
        Self { spec_count: 100 }
    }
}

impl SynthConfig {
    pub fn from_toml(content: &str) -> SynthResult<Self> {
        toml::from_str(content).map_err(|e| SynthError::Config(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> SynthResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| SynthError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    /// Load `explicit` if given, else the first existing default location.
    ///
    /// Lookup order: `./qail-synth.toml`, then
    /// `<config dir>/qail-synth/config.toml`. Missing files yield defaults;
    /// a missing explicit file is an error.
    pub fn load(explicit: Option<&Path>) -> SynthResult<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match Self::default_locations().into_iter().find(|p| p.exists()) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading configuration");
                Self::from_file(path)
            }
            None => Ok(Self::default()),
        }
    }

    fn default_locations() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("qail-synth").join("config.toml"));
        }
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = SynthConfig::from_toml(
            r#"
[run]
seed = 42

[files]
tables = "tables.json"
"#,
        )
        .unwrap();
        assert_eq!(config.run.seed, 42);
        assert_eq!(config.run.log_level, "info");
        assert_eq!(config.files.tables, Some(PathBuf::from("tables.json")));
        assert_eq!(config.expand.spec_count, 100);
    }

    #[test]
    fn test_invalid_toml() {
        let err = SynthConfig::from_toml("[run\nseed = ").unwrap_err();
        assert!(matches!(err, SynthError::Config(_)));
    }

    #[test]
    fn test_missing_explicit_file() {
        assert!(SynthConfig::load(Some(Path::new("/nonexistent/qail-synth.toml"))).is_err());
    }
}
