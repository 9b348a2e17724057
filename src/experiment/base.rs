//! Experiment - the lifecycle state machine shared by every kind

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::types::{ExperimentKind, Options, TypeTag};
use super::ExperimentId;
use crate::clock::Clock;
use crate::identity::{default_identity, ExperimentContext, Identity, IdentifyFn};
use crate::kv::{decode_i64, encode_i64, KvStore};
use crate::playground::Playground;
use crate::{Error, Result};

const CREATED_AT: &str = "created_at";
const COMPLETED_AT: &str = "completed_at";

/// Completion predicate, evaluated against the experiment it belongs to.
pub type CompletePredicate = dyn Fn(&Experiment) -> Result<bool> + Send + Sync + 'static;

/// Lifecycle state as observed in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExperimentState {
    /// Never saved, or destroyed.
    Unpersisted,
    /// Saved and not completed.
    Active,
    /// Completion timestamp persisted.
    Completed,
    /// The store could not be reached; state unknown.
    Unavailable,
}

#[derive(Debug, Default)]
struct Timestamps {
    created_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

/// A named, typed experiment whose lifecycle is persisted in the
/// playground's store.
///
/// Store outages never surface as errors from lifecycle operations: they are
/// logged and reported through `false` / `None` return values.
pub struct Experiment {
    id: ExperimentId,
    name: String,
    type_tag: TypeTag,
    options: Options,
    namespace: String,
    description: Option<String>,
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    timestamps: Mutex<Timestamps>,
    identify_fn: Option<Box<IdentifyFn>>,
    complete_predicate: Option<Box<CompletePredicate>>,
    kind: Box<dyn ExperimentKind>,
}

impl Experiment {
    /// Build an unpersisted experiment bound to `playground`.
    ///
    /// Nothing touches the store until [`Self::save`].
    #[must_use]
    pub fn new(
        playground: &Playground,
        id: ExperimentId,
        name: impl Into<String>,
        options: Options,
        kind: Box<dyn ExperimentKind>,
    ) -> Self {
        Self {
            namespace: format!("{}:{}", playground.namespace(), id),
            id,
            name: name.into(),
            type_tag: kind.type_tag(),
            options,
            description: None,
            store: Arc::clone(playground.store()),
            clock: Arc::clone(playground.clock()),
            timestamps: Mutex::new(Timestamps::default()),
            identify_fn: None,
            complete_predicate: None,
            kind,
        }
    }

    /// Experiment id.
    #[must_use]
    pub const fn id(&self) -> &ExperimentId {
        &self.id
    }

    /// Human-readable name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Kind tag.
    #[must_use]
    pub const fn type_tag(&self) -> &TypeTag {
        &self.type_tag
    }

    /// Options supplied at definition time.
    #[must_use]
    pub const fn options(&self) -> &Options {
        &self.options
    }

    /// Key prefix for everything this experiment stores.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Store key `<namespace>:<id>:<suffix>`.
    #[must_use]
    pub fn key(&self, suffix: &str) -> String {
        format!("{}:{suffix}", self.namespace)
    }

    /// Store this experiment persists through.
    #[must_use]
    pub fn store(&self) -> &dyn KvStore {
        self.store.as_ref()
    }

    /// Free-text description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Replace the description.
    pub fn set_description(&mut self, text: impl Into<String>) {
        self.description = Some(text.into());
    }

    /// Typed access to the kind.
    #[must_use]
    pub fn kind<K: ExperimentKind>(&self) -> Option<&K> {
        self.kind.as_any().downcast_ref::<K>()
    }

    /// Mutable typed access to the kind, for definition blocks.
    #[must_use]
    pub fn kind_mut<K: ExperimentKind>(&mut self) -> Option<&mut K> {
        self.kind.as_any_mut().downcast_mut::<K>()
    }

    /// Install a custom identity function, replacing the default resolver
    /// for this experiment only.
    pub fn identify<F>(&mut self, identify: F)
    where
        F: Fn(Option<&dyn ExperimentContext>) -> Result<Identity> + Send + Sync + 'static,
    {
        self.identify_fn = Some(Box::new(identify));
    }

    /// Install the completion predicate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDefinition`] if a predicate is already set.
    pub fn complete_if<F>(&mut self, predicate: F) -> Result<()>
    where
        F: Fn(&Self) -> Result<bool> + Send + Sync + 'static,
    {
        if self.complete_predicate.is_some() {
            return Err(Error::InvalidDefinition(format!(
                "experiment :{} already has a completion condition",
                self.id
            )));
        }
        self.complete_predicate = Some(Box::new(predicate));
        Ok(())
    }

    /// Whether a completion predicate is installed.
    #[must_use]
    pub fn has_completion_condition(&self) -> bool {
        self.complete_predicate.is_some()
    }

    /// Persist the creation time unless some process already did, then
    /// adopt the stored value.
    ///
    /// Returns `false` (and logs) when the store is unreachable.
    pub fn save(&self) -> bool {
        if !self.store.is_connected() {
            warn!(experiment = %self.id, "store unavailable, experiment not saved");
            return false;
        }
        match self.persist_once(CREATED_AT) {
            Ok((created_at, written)) => {
                self.timestamps().created_at = Some(created_at);
                if written {
                    info!(experiment = %self.id, %created_at, "experiment created");
                }
                true
            }
            Err(error) => {
                warn!(experiment = %self.id, %error, "failed to save experiment");
                false
            }
        }
    }

    /// Creation time: cached value, otherwise a one-shot read from the store.
    #[must_use]
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.cached_or_stored(CREATED_AT, |ts| &mut ts.created_at)
    }

    /// Completion time.
    ///
    /// Absent while active, and whenever the store is unreachable.
    #[must_use]
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        if !self.store.is_connected() {
            return None;
        }
        self.cached_or_stored(COMPLETED_AT, |ts| &mut ts.completed_at)
    }

    /// True iff the store holds no completion time. An unreachable store
    /// reads as inactive; see [`Self::state`] to tell the two apart.
    #[must_use]
    pub fn is_active(&self) -> bool {
        if !self.store.is_connected() {
            return false;
        }
        match self.store.exists(&self.key(COMPLETED_AT)) {
            Ok(completed) => !completed,
            Err(error) => {
                warn!(experiment = %self.id, %error, "failed to read completion state");
                false
            }
        }
    }

    /// Lifecycle state read straight from the store.
    #[must_use]
    pub fn state(&self) -> ExperimentState {
        if !self.store.is_connected() {
            return ExperimentState::Unavailable;
        }
        let completed = self.store.exists(&self.key(COMPLETED_AT));
        let created = self.store.exists(&self.key(CREATED_AT));
        match (created, completed) {
            (_, Ok(true)) => ExperimentState::Completed,
            (Ok(true), Ok(false)) => ExperimentState::Active,
            (Ok(false), Ok(false)) => ExperimentState::Unpersisted,
            (Err(_), _) | (_, Err(_)) => ExperimentState::Unavailable,
        }
    }

    /// Mark the experiment completed. Idempotent: the first accepted
    /// completion time is kept.
    ///
    /// Returns `false` (and logs) when the store is unreachable.
    pub fn complete(&self) -> bool {
        if !self.store.is_connected() {
            warn!(experiment = %self.id, "store unavailable, cannot complete experiment");
            return false;
        }
        match self.persist_once(COMPLETED_AT) {
            Ok((completed_at, written)) => {
                self.timestamps().completed_at = Some(completed_at);
                if written {
                    info!(experiment = %self.id, %completed_at, "experiment completed");
                }
                true
            }
            Err(error) => {
                warn!(experiment = %self.id, %error, "failed to complete experiment");
                false
            }
        }
    }

    /// Remove both timestamps and any kind-owned data, returning the
    /// experiment to the unpersisted state.
    ///
    /// Returns `false` (and logs) when the store is unreachable.
    pub fn destroy(&self) -> bool {
        if !self.store.is_connected() {
            warn!(experiment = %self.id, "store unavailable, cannot destroy experiment");
            return false;
        }
        let result = self
            .store
            .delete(&self.key(CREATED_AT))
            .and_then(|()| self.store.delete(&self.key(COMPLETED_AT)))
            .and_then(|()| self.kind.on_destroy(self));
        match result {
            Ok(()) => {
                *self.timestamps() = Timestamps::default();
                info!(experiment = %self.id, "experiment destroyed");
                true
            }
            Err(error) => {
                warn!(experiment = %self.id, %error, "failed to destroy experiment");
                false
            }
        }
    }

    /// Resolve the identity for this call, through the custom `identify`
    /// function if one is installed.
    ///
    /// # Errors
    ///
    /// [`Error::Identity`] when no identity can be produced.
    pub fn identity(&self, context: Option<&dyn ExperimentContext>) -> Result<Identity> {
        match &self.identify_fn {
            Some(identify) => identify(context),
            None => default_identity(context),
        }
    }

    /// Evaluate the completion predicate and complete on `true`.
    ///
    /// Kinds call this after every state-changing operation. A failing or
    /// panicking predicate is logged and counts as "not yet".
    pub fn check_completion(&self) {
        let Some(predicate) = &self.complete_predicate else {
            return;
        };
        let outcome = catch_unwind(AssertUnwindSafe(|| predicate(self)))
            .unwrap_or_else(|_| Err(Error::CompletionPredicate("predicate panicked".to_string())));
        match outcome {
            Ok(true) => {
                self.complete();
            }
            Ok(false) => {}
            Err(error) => {
                warn!(experiment = %self.id, %error, "completion check failed");
            }
        }
    }

    fn timestamps(&self) -> MutexGuard<'_, Timestamps> {
        self.timestamps.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist_once(&self, suffix: &str) -> Result<(DateTime<Utc>, bool)> {
        let key = self.key(suffix);
        let now = self.clock.now();
        let written = self.store.set_if_absent(&key, encode_i64(now.timestamp()))?;
        let stored = self.read_timestamp(&key)?.unwrap_or(now);
        Ok((stored, written))
    }

    fn read_timestamp(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .store
            .get(key)?
            .and_then(|bytes| decode_i64(&bytes))
            .and_then(|secs| DateTime::from_timestamp(secs, 0)))
    }

    fn cached_or_stored(
        &self,
        suffix: &str,
        slot: impl Fn(&mut Timestamps) -> &mut Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        let mut timestamps = self.timestamps();
        let cached = slot(&mut *timestamps);
        if cached.is_none() && self.store.is_connected() {
            match self.read_timestamp(&self.key(suffix)) {
                Ok(stored) => *cached = stored,
                Err(error) => {
                    warn!(experiment = %self.id, %error, "failed to read {suffix}");
                }
            }
        }
        *cached
    }
}

impl fmt::Debug for Experiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Experiment")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("type_tag", &self.type_tag)
            .field("namespace", &self.namespace)
            .field("description", &self.description)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
