//! Experiments and their persisted lifecycle.
//!
//! ## Lifecycle
//!
//! ```text
//! Unpersisted ──save()──> Active ──complete()──> Completed
//!      ^                    │                        │
//!      └────────────── destroy() ────────────────────┘
//! ```
//!
//! Timestamps live in the playground's store under
//! `<namespace>:<id>:created_at` and `<namespace>:<id>:completed_at`. Every
//! write goes through `set_if_absent`, so concurrent processes converge on
//! whichever write the store accepted first.
//!
//! ## Usage
//!
//! ```rust
//! use splitlab::experiment::{AbTest, ExperimentState};
//! use splitlab::Playground;
//!
//! # fn example() -> splitlab::Result<()> {
//! let playground = Playground::default();
//! let experiment = playground.define("signup_button", "Signup Button", "ab_test", |exp| {
//!     exp.set_description("Big red or small blue?");
//!     Ok(())
//! })?;
//!
//! assert_eq!(experiment.state(), ExperimentState::Active);
//! let ab = experiment.kind::<AbTest>().expect("ab_test kind");
//! let _ = ab.choose(&experiment, Some(&"user-1"))?;
//!
//! experiment.complete();
//! assert!(!experiment.is_active());
//! # Ok(())
//! # }
//! ```

mod base;
mod types;

pub use ab_test::AbTest;
pub use base::{CompletePredicate, Experiment, ExperimentState};
pub use types::{ExperimentKind, KindFactory, Options, TypeRegistry, TypeTag};

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Symbolic experiment identifier, unique within a playground.
///
/// Ids are normalized: lowercase, with every character outside
/// `[a-z0-9_]` replaced by `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExperimentId(String);

impl ExperimentId {
    /// Normalize `raw` into an id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDefinition`] when `raw` is empty.
    pub fn new(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::InvalidDefinition(
                "experiment id must not be empty".to_string(),
            ));
        }
        let normalized = raw
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        Ok(Self(normalized))
    }

    /// Id derived from a definition unit's base name (`Signup Button.toml`
    /// becomes `signup_button`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDefinition`] when the path has no file stem.
    pub fn from_unit_path(path: &Path) -> Result<Self> {
        let stem = path.file_stem().and_then(|s| s.to_str()).ok_or_else(|| {
            Error::InvalidDefinition(format!("cannot derive an id from {}", path.display()))
        })?;
        Self::new(stem)
    }

    /// Borrow the id as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExperimentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ExperimentId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(&value)
    }
}

impl From<ExperimentId> for String {
    fn from(id: ExperimentId) -> Self {
        id.0
    }
}

impl PartialEq<str> for ExperimentId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for ExperimentId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}
