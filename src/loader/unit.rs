//! Definition unit files (TOML or JSON)
//!
//! ```toml
//! name = "Signup Button"
//! type = "ab_test"
//! description = "Big red or small blue?"
//! depends_on = ["pricing"]
//!
//! [options]
//! alternatives = ["red", "blue"]
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{DefinitionContext, DefinitionUnit};
use crate::experiment::Options;
use crate::{Error, Result};

/// Declarative definition of one experiment, parsed from a unit file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileUnit {
    /// Explicit id; the file stem is used when absent.
    #[serde(default)]
    pub id: Option<String>,
    /// Human-readable name.
    pub name: String,
    /// Experiment type tag.
    #[serde(rename = "type")]
    pub type_tag: String,
    /// Free-text description.
    #[serde(default)]
    pub description: Option<String>,
    /// Options handed to the kind factory.
    #[serde(default)]
    pub options: Options,
    /// Units that must be loaded before this one.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl FileUnit {
    /// Read and parse a unit file, picking the format from its extension.
    ///
    /// # Errors
    ///
    /// IO errors, [`Error::ParseError`] for malformed content or an
    /// unsupported extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_str(&contents),
            Some("json") => Self::from_json_str(&contents),
            _ => Err(Error::ParseError(format!(
                "unsupported definition unit {}",
                path.display()
            ))),
        }
    }

    /// Parse TOML content.
    ///
    /// # Errors
    ///
    /// [`Error::ParseError`] for malformed content.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::ParseError(e.to_string()))
    }

    /// Parse JSON content.
    ///
    /// # Errors
    ///
    /// [`Error::ParseError`] for malformed content.
    pub fn from_json_str(contents: &str) -> Result<Self> {
        serde_json::from_str(contents).map_err(|e| Error::ParseError(e.to_string()))
    }

    /// Id declared inside the file, if any.
    #[must_use]
    pub fn declared_id(&self) -> Option<&str> {
        self.id.as_deref()
    }
}

impl DefinitionUnit for FileUnit {
    fn evaluate(&self, ctx: &mut DefinitionContext<'_>) -> Result<()> {
        for dependency in &self.depends_on {
            ctx.depends_on(dependency)?;
        }
        ctx.define_with_options(&self.name, &self.type_tag, self.options.clone(), |experiment| {
            if let Some(description) = &self.description {
                experiment.set_description(description.clone());
            }
            Ok(())
        })?;
        Ok(())
    }
}
