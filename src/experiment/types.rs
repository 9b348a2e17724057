//! Experiment kinds and the registry resolving type tags to them.
//!
//! A definition names its kind with a tag such as `"ab_test"`. Tags are
//! normalized to snake case, so `"AbTest"`, `"ab-test"` and `"ab test"` all
//! resolve to the same factory.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::warn;

use super::ab_test::AbTest;
use super::Experiment;
use crate::{Error, Result};

/// Opaque configuration bag supplied at definition time.
pub type Options = serde_json::Map<String, Value>;

/// Subtype-specific state and behavior attached to an [`Experiment`].
///
/// Kinds persist their own data under [`Experiment::key`] and call
/// [`Experiment::check_completion`] after every state-changing operation.
pub trait ExperimentKind: Any + Send + Sync + fmt::Debug {
    /// Tag identifying this kind.
    fn type_tag(&self) -> TypeTag;

    /// Upcast for typed access through [`Experiment::kind`].
    fn as_any(&self) -> &dyn Any;

    /// Upcast for typed access through [`Experiment::kind_mut`].
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Remove kind-owned keys when the experiment is destroyed.
    ///
    /// # Errors
    ///
    /// Store failures; the caller logs them.
    fn on_destroy(&self, _experiment: &Experiment) -> Result<()> {
        Ok(())
    }
}

/// Builds a kind from the definition's options.
pub type KindFactory = dyn Fn(&Options) -> Result<Box<dyn ExperimentKind>> + Send + Sync;

/// Normalized experiment type tag (`ab_test`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeTag(String);

impl TypeTag {
    /// Normalize `raw` to snake case.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDefinition`] when nothing alphanumeric remains.
    pub fn new(raw: &str) -> Result<Self> {
        let normalized = normalize_tag(raw);
        if normalized.is_empty() {
            return Err(Error::InvalidDefinition(format!("invalid experiment type {raw:?}")));
        }
        Ok(Self(normalized))
    }

    /// Tag from a literal already in normalized form.
    pub(crate) fn from_normalized(tag: &'static str) -> Self {
        debug_assert_eq!(normalize_tag(tag), tag);
        Self(tag.to_string())
    }

    /// Borrow the tag.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Implementation name by convention: split on `_`, capitalize each
    /// segment, concatenate (`ab_test` becomes `AbTest`).
    #[must_use]
    pub fn class_name(&self) -> String {
        self.0
            .split('_')
            .filter(|segment| !segment.is_empty())
            .map(|segment| {
                let mut chars = segment.chars();
                chars.next().map_or_else(String::new, |first| {
                    first.to_ascii_uppercase().to_string() + chars.as_str()
                })
            })
            .collect()
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<&str> for TypeTag {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

fn normalize_tag(raw: &str) -> String {
    let chars: Vec<char> = raw.trim().trim_start_matches(':').chars().collect();
    let mut out = String::with_capacity(chars.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_ascii_alphanumeric() {
            if c.is_ascii_uppercase() && i > 0 {
                let prev = chars[i - 1];
                let next_lower = chars.get(i + 1).is_some_and(char::is_ascii_lowercase);
                let boundary = prev.is_ascii_lowercase()
                    || prev.is_ascii_digit()
                    || (prev.is_ascii_uppercase() && next_lower);
                if boundary && !out.ends_with('_') {
                    out.push('_');
                }
            }
            out.push(c.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

/// Maps type tags to kind factories.
#[derive(Clone, Default)]
pub struct TypeRegistry {
    factories: FxHashMap<TypeTag, Arc<KindFactory>>,
}

impl TypeRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the kinds shipped by this crate (`ab_test`).
    #[must_use]
    pub fn with_builtin_types() -> Self {
        let mut registry = Self::new();
        registry.register(AbTest::type_tag_static(), |options: &Options| {
            Ok(Box::new(AbTest::from_options(options)?) as Box<dyn ExperimentKind>)
        });
        registry
    }

    /// Register (or replace) the factory for `tag`.
    pub fn register<F>(&mut self, tag: TypeTag, factory: F)
    where
        F: Fn(&Options) -> Result<Box<dyn ExperimentKind>> + Send + Sync + 'static,
    {
        if self.factories.insert(tag.clone(), Arc::new(factory)).is_some() {
            warn!(type_tag = %tag, "replaced experiment type factory");
        }
    }

    /// Whether a factory exists for `tag`.
    #[must_use]
    pub fn contains(&self, tag: &TypeTag) -> bool {
        self.factories.contains_key(tag)
    }

    /// Factory registered for `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownExperimentType`] when none is registered.
    pub fn resolve(&self, tag: &TypeTag) -> Result<Arc<KindFactory>> {
        self.factories
            .get(tag)
            .cloned()
            .ok_or_else(|| Error::UnknownExperimentType(tag.to_string()))
    }

    /// Registered tags, sorted.
    #[must_use]
    pub fn tags(&self) -> Vec<TypeTag> {
        let mut tags: Vec<TypeTag> = self.factories.keys().cloned().collect();
        tags.sort();
        tags
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("tags", &self.tags())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tag_normalization() {
        for raw in ["ab_test", "AbTest", "ab-test", "ab test", ":ab_test", "ABTest", "Ab__Test"] {
            assert_eq!(TypeTag::new(raw).unwrap(), "ab_test", "input {raw:?}");
        }
        assert_eq!(TypeTag::new("FeatureFlagV2").unwrap(), "feature_flag_v2");
    }

    #[test]
    fn test_type_tag_rejects_empty() {
        assert!(TypeTag::new("").is_err());
        assert!(TypeTag::new(" -- ").is_err());
    }

    #[test]
    fn test_class_name() {
        assert_eq!(TypeTag::new("ab_test").unwrap().class_name(), "AbTest");
        assert_eq!(TypeTag::new("feature_flag").unwrap().class_name(), "FeatureFlag");
    }

    #[test]
    fn test_builtin_registry_resolves_ab_test() {
        let registry = TypeRegistry::with_builtin_types();
        let tag = TypeTag::new("AbTest").unwrap();

        assert!(registry.contains(&tag));
        let factory = registry.resolve(&tag).unwrap();
        let kind = factory(&Options::new()).unwrap();
        assert_eq!(kind.type_tag(), "ab_test");
    }

    #[test]
    fn test_unknown_type() {
        let registry = TypeRegistry::new();
        let tag = TypeTag::new("multivariate").unwrap();

        assert!(matches!(
            registry.resolve(&tag),
            Err(Error::UnknownExperimentType(t)) if t == "multivariate"
        ));
    }
}
