//! Error types for splitlab
//!
//! Loader errors carry the experiment id and the unit path so a failed
//! startup points straight at the offending definition.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Why an identity could not be resolved for a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityError {
    /// No per-call context was supplied
    NoContext,
    /// The context cannot produce an identity
    NoAccessor,
    /// The context produced an empty identity
    Empty,
}

impl std::fmt::Display for IdentityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Self::NoContext => "no context available to resolve an identity",
            Self::NoAccessor => "context does not expose an identity accessor",
            Self::Empty => "context returned an empty identity",
        };
        f.write_str(msg)
    }
}

/// splitlab error types
#[derive(Error, Debug)]
pub enum Error {
    /// An experiment with this id is already registered
    #[error("Experiment :{id} already defined in this playground")]
    DuplicateDefinition {
        /// Id that was defined twice
        id: String,
    },

    /// A definition unit re-entered its own load
    #[error("Circular dependency detected: {chain}")]
    CircularDependency {
        /// Load chain, outermost first, ending with the re-entered unit
        chain: String,
    },

    /// A unit evaluated cleanly but defined nothing under its id
    #[error("Expected {path} to define experiment :{id}")]
    MissingDefinition {
        /// Id the unit was expected to define
        id: String,
        /// Unit path
        path: PathBuf,
    },

    /// Evaluation of a definition unit failed
    #[error("Failed to load experiment :{id} from {path}: {source}")]
    Definition {
        /// Id of the unit being loaded
        id: String,
        /// Unit path
        path: PathBuf,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// Identity resolution failed
    #[error("Identity resolution failed: {0}")]
    Identity(IdentityError),

    /// Store connection is down
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A completion predicate failed while being evaluated
    #[error("Completion check failed: {0}")]
    CompletionPredicate(String),

    /// No factory registered for this type tag
    #[error("Unknown experiment type :{0}")]
    UnknownExperimentType(String),

    /// Lookup of an unregistered experiment
    #[error("No experiment :{0}")]
    ExperimentNotFound(String),

    /// Malformed definition (bad options, set-once violated, ...)
    #[error("Invalid definition: {0}")]
    InvalidDefinition(String),

    /// Definition unit could not be parsed
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Innermost error beneath any `Definition` wrappers.
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        let mut current = self;
        while let Self::Definition { source, .. } = current {
            current = source;
        }
        current
    }

    /// Whether this error means the store could not be reached.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

impl From<IdentityError> for Error {
    fn from(err: IdentityError) -> Self {
        Self::Identity(err)
    }
}
