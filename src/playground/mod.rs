//! Playground: the registry of experiments sharing one namespace and one
//! store connection.

mod config;

pub use config::{PlaygroundConfig, DEFAULT_LOAD_PATH, DEFAULT_NAMESPACE};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::experiment::{Experiment, ExperimentId, ExperimentKind, Options, TypeRegistry, TypeTag};
use crate::kv::{KvStore, MemoryKvStore};
use crate::loader::{self, DefinitionUnit, LoadStack};
use crate::{Error, Result};

/// Composition root for a set of experiments.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use splitlab::kv::MemoryKvStore;
/// use splitlab::Playground;
///
/// # fn example() -> splitlab::Result<()> {
/// let store = Arc::new(MemoryKvStore::new());
/// let playground = Playground::builder()
///     .namespace("shop")
///     .store(store)
///     .build()?;
///
/// let exp = playground.define("signup_button", "Signup Button", "ab_test", |_| Ok(()))?;
/// assert_eq!(exp.namespace(), "shop:signup_button");
/// assert!(exp.is_active());
/// # Ok(())
/// # }
/// ```
pub struct Playground {
    namespace: String,
    load_path: PathBuf,
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    types: TypeRegistry,
    experiments: DashMap<ExperimentId, Arc<Experiment>>,
}

impl Playground {
    /// Playground with default configuration over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        let config = PlaygroundConfig::default();
        Self {
            namespace: config.namespace,
            load_path: config.load_path,
            store,
            clock: Arc::new(SystemClock),
            types: TypeRegistry::with_builtin_types(),
            experiments: DashMap::new(),
        }
    }

    /// Create a new playground builder
    #[must_use]
    pub fn builder() -> PlaygroundBuilder {
        PlaygroundBuilder::default()
    }

    /// Playground configured by `config` over `store`.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if the configuration is invalid.
    pub fn from_config(config: PlaygroundConfig, store: Arc<dyn KvStore>) -> Result<Self> {
        Self::builder().config(config).store(store).build()
    }

    /// Key prefix shared by all experiments.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Directory scanned by [`Self::load_experiments`].
    #[must_use]
    pub fn load_path(&self) -> &Path {
        &self.load_path
    }

    /// Shared store handle.
    #[must_use]
    pub const fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    /// Time source for lifecycle timestamps.
    #[must_use]
    pub const fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Registered experiment kinds.
    #[must_use]
    pub const fn types(&self) -> &TypeRegistry {
        &self.types
    }

    /// Whether the store is reachable.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.store.is_connected()
    }

    /// Registered experiment, if any.
    #[must_use]
    pub fn get(&self, id: &ExperimentId) -> Option<Arc<Experiment>> {
        self.experiments.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Whether `id` is registered.
    #[must_use]
    pub fn contains(&self, id: &ExperimentId) -> bool {
        self.experiments.contains_key(id)
    }

    /// Number of registered experiments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.experiments.len()
    }

    /// True when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.experiments.is_empty()
    }

    /// Snapshot of all registered experiments, sorted by id.
    #[must_use]
    pub fn experiments(&self) -> Vec<Arc<Experiment>> {
        let mut experiments: Vec<Arc<Experiment>> = self
            .experiments
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        experiments.sort_by(|a, b| a.id().cmp(b.id()));
        experiments
    }

    /// Register a fully built experiment.
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateDefinition`] if the id is already registered.
    pub fn insert(&self, experiment: Experiment) -> Result<Arc<Experiment>> {
        match self.experiments.entry(experiment.id().clone()) {
            Entry::Occupied(_) => Err(Error::DuplicateDefinition {
                id: experiment.id().to_string(),
            }),
            Entry::Vacant(slot) => {
                let experiment = Arc::new(experiment);
                slot.insert(Arc::clone(&experiment));
                Ok(experiment)
            }
        }
    }

    /// Define an experiment in code: shorthand for a one-off unit that calls
    /// `define(name, type_tag, block)`.
    ///
    /// # Errors
    ///
    /// As [`loader::load_unit`].
    pub fn define<F>(
        &self,
        id: &str,
        name: &str,
        type_tag: &str,
        block: F,
    ) -> Result<Arc<Experiment>>
    where
        F: FnOnce(&mut Experiment) -> Result<()>,
    {
        self.define_with_options(id, name, type_tag, Options::new(), block)
    }

    /// As [`Self::define`], with options for the kind factory.
    ///
    /// # Errors
    ///
    /// As [`loader::load_unit`].
    pub fn define_with_options<F>(
        &self,
        id: &str,
        name: &str,
        type_tag: &str,
        options: Options,
        block: F,
    ) -> Result<Arc<Experiment>>
    where
        F: FnOnce(&mut Experiment) -> Result<()>,
    {
        let id = ExperimentId::new(id)?;
        let path = PathBuf::from(id.as_str());
        loader::evaluate(self, &mut LoadStack::new(), &path, &id, |ctx| {
            ctx.define_with_options(name, type_tag, options, block).map(drop)
        })
    }

    /// Evaluate a programmatic definition unit as the definition of `id`.
    ///
    /// # Errors
    ///
    /// As [`loader::load_unit`].
    pub fn load_unit<U>(&self, id: &ExperimentId, unit: &U) -> Result<Arc<Experiment>>
    where
        U: DefinitionUnit + ?Sized,
    {
        let path = PathBuf::from(id.as_str());
        loader::load_unit(self, &mut LoadStack::new(), &path, id, unit)
    }

    /// Load one unit file.
    ///
    /// # Errors
    ///
    /// As [`loader::load`].
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Arc<Experiment>> {
        loader::load(self, &mut LoadStack::new(), path.as_ref())
    }

    /// Load every unit file in the load path, in file name order. Units
    /// already pulled in as dependencies are skipped. A missing directory
    /// loads nothing.
    ///
    /// # Errors
    ///
    /// The first loading failure; loading is fail-fast.
    pub fn load_experiments(&self) -> Result<Vec<Arc<Experiment>>> {
        if !self.load_path.is_dir() {
            debug!(path = %self.load_path.display(), "no experiments directory");
            return Ok(Vec::new());
        }
        let mut paths: Vec<PathBuf> = fs::read_dir(&self.load_path)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| loader::is_unit_file(path))
            .collect();
        paths.sort();

        let mut loaded = Vec::with_capacity(paths.len());
        for path in paths {
            if loader::loaded_from(self, &path).is_some() {
                continue;
            }
            loaded.push(self.load_file(&path)?);
        }
        info!(count = loaded.len(), path = %self.load_path.display(), "loaded experiments");
        Ok(loaded)
    }

    /// Registered experiment, autoloading `<load_path>/<id>.{toml,json}`
    /// when it is not registered yet.
    ///
    /// # Errors
    ///
    /// [`Error::ExperimentNotFound`] if no unit exists for `id`, or any
    /// loading failure.
    pub fn experiment(&self, id: &str) -> Result<Arc<Experiment>> {
        let id = ExperimentId::new(id)?;
        if let Some(experiment) = self.get(&id) {
            return Ok(experiment);
        }
        let path = loader::resolve_unit_path(&self.load_path, id.as_str())?;
        let experiment = self.load_file(path)?;
        if experiment.id() == &id {
            Ok(experiment)
        } else {
            Err(Error::ExperimentNotFound(id.to_string()))
        }
    }

    /// Forget every in-memory experiment and load the load path again.
    /// Persisted state is untouched.
    ///
    /// # Errors
    ///
    /// As [`Self::load_experiments`].
    pub fn reload(&self) -> Result<Vec<Arc<Experiment>>> {
        self.experiments.clear();
        self.load_experiments()
    }
}

impl Default for Playground {
    fn default() -> Self {
        Self::new(Arc::new(MemoryKvStore::new()))
    }
}

impl std::fmt::Debug for Playground {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Playground")
            .field("namespace", &self.namespace)
            .field("load_path", &self.load_path)
            .field("types", &self.types)
            .field("experiments", &self.experiments.len())
            .finish_non_exhaustive()
    }
}

/// Playground builder
#[derive(Default)]
pub struct PlaygroundBuilder {
    config: PlaygroundConfig,
    store: Option<Arc<dyn KvStore>>,
    clock: Option<Arc<dyn Clock>>,
    types: Option<TypeRegistry>,
}

impl PlaygroundBuilder {
    /// Replace the whole configuration
    #[must_use]
    pub fn config(mut self, config: PlaygroundConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the key namespace
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config.namespace = namespace.into();
        self
    }

    /// Set the directory holding definition units
    #[must_use]
    pub fn load_path(mut self, load_path: impl Into<PathBuf>) -> Self {
        self.config.load_path = load_path.into();
        self
    }

    /// Set the store (defaults to a fresh [`MemoryKvStore`])
    #[must_use]
    pub fn store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the time source (defaults to [`SystemClock`])
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Replace the type registry (defaults to the built-in kinds)
    #[must_use]
    pub fn types(mut self, types: TypeRegistry) -> Self {
        self.types = Some(types);
        self
    }

    /// Register an additional experiment kind
    #[must_use]
    pub fn register_type<F>(mut self, tag: TypeTag, factory: F) -> Self
    where
        F: Fn(&Options) -> Result<Box<dyn ExperimentKind>> + Send + Sync + 'static,
    {
        self.types
            .get_or_insert_with(TypeRegistry::with_builtin_types)
            .register(tag, factory);
        self
    }

    /// Build the playground
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if the configuration is invalid.
    pub fn build(self) -> Result<Playground> {
        self.config.validate()?;
        Ok(Playground {
            namespace: self.config.namespace,
            load_path: self.config.load_path,
            store: self
                .store
                .unwrap_or_else(|| Arc::new(MemoryKvStore::new())),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            types: self.types.unwrap_or_else(TypeRegistry::with_builtin_types),
            experiments: DashMap::new(),
        })
    }
}
