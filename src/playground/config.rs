//! Playground configuration

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "splitlab";

/// Directory scanned for definition units when none is configured.
pub const DEFAULT_LOAD_PATH: &str = "experiments";

/// Settings for a [`Playground`](super::Playground).
///
/// ```toml
/// namespace = "myapp"
/// load_path = "config/experiments"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlaygroundConfig {
    /// Prefix of every store key.
    pub namespace: String,
    /// Directory holding definition unit files.
    pub load_path: PathBuf,
}

impl Default for PlaygroundConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            load_path: PathBuf::from(DEFAULT_LOAD_PATH),
        }
    }
}

impl PlaygroundConfig {
    /// Parse TOML configuration; missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] for malformed or invalid content.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML configuration file.
    ///
    /// # Errors
    ///
    /// IO errors, or as [`Self::from_toml_str`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    /// Check the namespace can prefix store keys.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] for an empty namespace or one containing `:` or
    /// whitespace.
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(Error::Config("namespace must not be empty".to_string()));
        }
        if self
            .namespace
            .chars()
            .any(|c| c == ':' || c.is_whitespace())
        {
            return Err(Error::Config(format!(
                "namespace {:?} must not contain ':' or whitespace",
                self.namespace
            )));
        }
        Ok(())
    }
}
