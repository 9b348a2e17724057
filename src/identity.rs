//! Identity resolution: the stable per-subject key used to bucket and track
//! participation.
//!
//! A host passes an [`ExperimentContext`] into each call that needs an
//! identity. The context may or may not expose an [`IdentitySource`]; the
//! default resolver treats a missing context, a missing source and an empty
//! value as three distinct failures.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::IdentityError;
use crate::Result;

/// Stable identifier of a subject (user, session, device...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    /// Wrap a non-empty value.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Empty`] for empty or whitespace-only values.
    pub fn new(value: impl Into<String>) -> std::result::Result<Self, IdentityError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(IdentityError::Empty);
        }
        Ok(Self(value))
    }

    /// Borrow the raw value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Identity {
    type Error = IdentityError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.0
    }
}

/// Capability to produce an identity value.
pub trait IdentitySource {
    /// Identity of the current subject, if known.
    fn identity(&self) -> Option<String>;
}

/// Per-call context handed to experiments by the host application.
pub trait ExperimentContext {
    /// Identity accessor, when this context has one.
    fn identity_source(&self) -> Option<&dyn IdentitySource> {
        None
    }
}

impl<T: IdentitySource> ExperimentContext for T {
    fn identity_source(&self) -> Option<&dyn IdentitySource> {
        Some(self)
    }
}

impl IdentitySource for &str {
    fn identity(&self) -> Option<String> {
        Some((*self).to_string())
    }
}

impl IdentitySource for String {
    fn identity(&self) -> Option<String> {
        Some(self.clone())
    }
}

impl IdentitySource for Identity {
    fn identity(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Context without an identity accessor (e.g. a background job).
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousContext;

impl ExperimentContext for AnonymousContext {}

/// Function resolving an identity from the per-call context.
pub type IdentifyFn =
    dyn Fn(Option<&dyn ExperimentContext>) -> Result<Identity> + Send + Sync + 'static;

/// Resolver used when an experiment installs no custom `identify` function.
///
/// # Errors
///
/// [`IdentityError::NoContext`] without a context,
/// [`IdentityError::NoAccessor`] when the context has no identity source,
/// [`IdentityError::Empty`] when the source returns nothing usable.
pub fn default_identity(context: Option<&dyn ExperimentContext>) -> Result<Identity> {
    let context = context.ok_or(IdentityError::NoContext)?;
    let source = context.identity_source().ok_or(IdentityError::NoAccessor)?;
    let value = source.identity().ok_or(IdentityError::Empty)?;
    Ok(Identity::new(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    struct Session {
        user_id: Option<String>,
    }

    impl IdentitySource for Session {
        fn identity(&self) -> Option<String> {
            self.user_id.clone()
        }
    }

    #[test]
    fn test_default_identity_from_source() {
        let session = Session {
            user_id: Some("user-42".to_string()),
        };
        let identity = default_identity(Some(&session)).unwrap();
        assert_eq!(identity.as_str(), "user-42");
    }

    #[test]
    fn test_default_identity_without_context() {
        let err = default_identity(None).unwrap_err();
        assert!(matches!(err, Error::Identity(IdentityError::NoContext)));
    }

    #[test]
    fn test_default_identity_without_accessor() {
        let err = default_identity(Some(&AnonymousContext)).unwrap_err();
        assert!(matches!(err, Error::Identity(IdentityError::NoAccessor)));
    }

    #[test]
    fn test_default_identity_empty_value() {
        let missing = Session { user_id: None };
        let blank = Session {
            user_id: Some("  ".to_string()),
        };

        for session in [missing, blank] {
            let err = default_identity(Some(&session)).unwrap_err();
            assert!(matches!(err, Error::Identity(IdentityError::Empty)));
        }
    }

    #[test]
    fn test_identity_serde_rejects_empty() {
        let ok: Identity = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(ok.as_str(), "abc");
        assert!(serde_json::from_str::<Identity>("\"\"").is_err());
    }
}
