//! Definition loading
//!
//! A definition unit declares exactly one experiment. Units are evaluated
//! against a [`DefinitionContext`] bound to a playground and an id; the
//! context's only capabilities are [`DefinitionContext::define`] and
//! [`DefinitionContext::depends_on`].
//!
//! Loading keeps a [`LoadStack`] of the units currently being evaluated.
//! A unit that (transitively) depends on itself fails with
//! [`Error::CircularDependency`], and every exit path pops the stack.
//!
//! ```text
//! load(a.toml) ──push a──> evaluate a ──depends_on(b)──> load(b.toml)
//!                                                            │
//!                          CircularDependency <──depends_on(a)┘
//! ```

mod unit;

pub use unit::FileUnit;

use std::fs;
use std::iter;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::experiment::{Experiment, ExperimentId, Options, TypeTag};
use crate::playground::Playground;
use crate::{Error, Result};

/// Extensions recognized as definition unit files, in lookup order.
pub const UNIT_EXTENSIONS: [&str; 2] = ["toml", "json"];

/// Something that can define an experiment when evaluated.
pub trait DefinitionUnit {
    /// Evaluate against `ctx`, calling [`DefinitionContext::define`] once.
    ///
    /// # Errors
    ///
    /// Any failure; the loader wraps it with the unit's id and path.
    fn evaluate(&self, ctx: &mut DefinitionContext<'_>) -> Result<()>;
}

impl<F> DefinitionUnit for F
where
    F: Fn(&mut DefinitionContext<'_>) -> Result<()>,
{
    fn evaluate(&self, ctx: &mut DefinitionContext<'_>) -> Result<()> {
        self(ctx)
    }
}

/// Units currently being loaded, outermost first.
#[derive(Debug, Default)]
pub struct LoadStack {
    entries: Vec<PathBuf>,
}

impl LoadStack {
    /// Empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of units being loaded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no load is in progress.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `path` is being loaded.
    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.entries.iter().any(|entry| entry == path)
    }

    /// Units being loaded, outermost first.
    #[must_use]
    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    /// Push `path`, returning a guard that pops it when dropped.
    ///
    /// # Errors
    ///
    /// [`Error::CircularDependency`] if `path` is already on the stack.
    pub fn enter(&mut self, path: &Path) -> Result<StackGuard<'_>> {
        if self.contains(path) {
            return Err(Error::CircularDependency {
                chain: self.chain_to(path),
            });
        }
        self.entries.push(path.to_path_buf());
        Ok(StackGuard { stack: self })
    }

    fn chain_to(&self, path: &Path) -> String {
        self.entries
            .iter()
            .map(PathBuf::as_path)
            .chain(iter::once(path))
            .map(|entry| entry.display().to_string())
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

/// Pops its entry off the [`LoadStack`] on drop, including during unwinding.
#[derive(Debug)]
pub struct StackGuard<'s> {
    stack: &'s mut LoadStack,
}

impl Deref for StackGuard<'_> {
    type Target = LoadStack;

    fn deref(&self) -> &LoadStack {
        self.stack
    }
}

impl DerefMut for StackGuard<'_> {
    fn deref_mut(&mut self) -> &mut LoadStack {
        self.stack
    }
}

impl Drop for StackGuard<'_> {
    fn drop(&mut self) {
        self.stack.entries.pop();
    }
}

/// Capabilities handed to a unit while it is evaluated.
pub struct DefinitionContext<'a> {
    playground: &'a Playground,
    id: &'a ExperimentId,
    path: &'a Path,
    stack: &'a mut LoadStack,
}

impl DefinitionContext<'_> {
    /// Id the unit must define.
    #[must_use]
    pub const fn id(&self) -> &ExperimentId {
        self.id
    }

    /// Path of the unit being evaluated.
    #[must_use]
    pub const fn path(&self) -> &Path {
        self.path
    }

    /// Define the experiment with no options.
    ///
    /// # Errors
    ///
    /// See [`Self::define_with_options`].
    pub fn define<F>(&mut self, name: &str, type_tag: &str, block: F) -> Result<Arc<Experiment>>
    where
        F: FnOnce(&mut Experiment) -> Result<()>,
    {
        self.define_with_options(name, type_tag, Options::new(), block)
    }

    /// Resolve `type_tag`, build the experiment, run `block` on it, save it
    /// and register it under this unit's id.
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateDefinition`] if the id is taken,
    /// [`Error::UnknownExperimentType`] for an unregistered tag, or whatever
    /// the kind factory and `block` return.
    pub fn define_with_options<F>(
        &mut self,
        name: &str,
        type_tag: &str,
        options: Options,
        block: F,
    ) -> Result<Arc<Experiment>>
    where
        F: FnOnce(&mut Experiment) -> Result<()>,
    {
        if self.playground.contains(self.id) {
            return Err(Error::DuplicateDefinition {
                id: self.id.to_string(),
            });
        }
        let tag = TypeTag::new(type_tag)?;
        let factory = self.playground.types().resolve(&tag)?;
        let kind = factory(&options)?;
        let mut experiment = Experiment::new(self.playground, self.id.clone(), name, options, kind);
        block(&mut experiment)?;
        experiment.save();
        self.playground.insert(experiment)
    }

    /// Make sure the experiment defined by `unit` is loaded, loading it
    /// through the current stack if needed.
    ///
    /// `unit` is a unit name (`signup_button`) looked up next to the current
    /// unit, or a path with an extension.
    ///
    /// # Errors
    ///
    /// [`Error::CircularDependency`] when `unit` is already being loaded, or
    /// any error from loading it.
    pub fn depends_on(&mut self, unit: &str) -> Result<Arc<Experiment>> {
        let base = self
            .path
            .parent()
            .filter(|dir| dir.is_dir())
            .unwrap_or_else(|| self.playground.load_path());
        let path = resolve_unit_path(base, unit)?;
        if let Some(experiment) = loaded_from(self.playground, &path) {
            return Ok(experiment);
        }
        load(self.playground, self.stack, &path)
    }
}

/// Load the unit file at `path` into `playground`.
///
/// The id is the one the file declares, otherwise the normalized file stem.
///
/// # Errors
///
/// [`Error::CircularDependency`] if `path` is already on `stack`,
/// [`Error::Definition`] wrapping any evaluation failure,
/// [`Error::MissingDefinition`] if the unit defined nothing.
pub fn load(playground: &Playground, stack: &mut LoadStack, path: &Path) -> Result<Arc<Experiment>> {
    let path = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let fallback = ExperimentId::from_unit_path(&path)?;
    if stack.contains(&path) {
        return Err(Error::CircularDependency {
            chain: stack.chain_to(&path),
        });
    }
    let unit = match FileUnit::from_path(&path) {
        Ok(unit) => unit,
        Err(source) => {
            return Err(Error::Definition {
                id: fallback.to_string(),
                path,
                source: Box::new(source),
            })
        }
    };
    let id = match unit.declared_id() {
        Some(declared) => ExperimentId::new(declared)?,
        None => fallback,
    };
    load_unit(playground, stack, &path, &id, &unit)
}

/// Id the unit file at `path` defines: the declared one, otherwise the
/// normalized file stem.
///
/// # Errors
///
/// IO and parse errors from reading the unit.
pub fn unit_id(path: &Path) -> Result<ExperimentId> {
    match FileUnit::from_path(path)?.declared_id() {
        Some(declared) => ExperimentId::new(declared),
        None => ExperimentId::from_unit_path(path),
    }
}

/// Experiment already registered for the unit file at `path`, if any.
///
/// Unreadable units report `None` so that [`load`] surfaces the error with
/// its id and path.
pub fn loaded_from(playground: &Playground, path: &Path) -> Option<Arc<Experiment>> {
    unit_id(path).ok().and_then(|id| playground.get(&id))
}

/// Evaluate `unit` as the definition of `id`.
///
/// `path` identifies the unit on the load stack and in errors.
///
/// # Errors
///
/// As [`load`].
pub fn load_unit<U>(
    playground: &Playground,
    stack: &mut LoadStack,
    path: &Path,
    id: &ExperimentId,
    unit: &U,
) -> Result<Arc<Experiment>>
where
    U: DefinitionUnit + ?Sized,
{
    evaluate(playground, stack, path, id, |ctx| unit.evaluate(ctx))
}

/// Run `body` as the evaluation of the unit at `path` defining `id`: push
/// the stack, wrap failures, and check something was registered.
///
/// # Errors
///
/// As [`load`].
pub fn evaluate<F>(
    playground: &Playground,
    stack: &mut LoadStack,
    path: &Path,
    id: &ExperimentId,
    body: F,
) -> Result<Arc<Experiment>>
where
    F: FnOnce(&mut DefinitionContext<'_>) -> Result<()>,
{
    let mut guard = stack.enter(path)?;
    debug!(experiment = %id, path = %path.display(), depth = guard.len(), "loading definition");

    let mut ctx = DefinitionContext {
        playground,
        id,
        path,
        stack: &mut *guard,
    };
    if let Err(source) = body(&mut ctx) {
        return Err(Error::Definition {
            id: id.to_string(),
            path: path.to_path_buf(),
            source: Box::new(source),
        });
    }

    playground.get(id).ok_or_else(|| Error::MissingDefinition {
        id: id.to_string(),
        path: path.to_path_buf(),
    })
}

/// Find the unit file for `unit` under `dir`.
///
/// # Errors
///
/// [`Error::ExperimentNotFound`] if no candidate file exists.
pub fn resolve_unit_path(dir: &Path, unit: &str) -> Result<PathBuf> {
    let direct = dir.join(unit);
    if direct.extension().is_some() && direct.is_file() {
        return Ok(direct);
    }
    UNIT_EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{unit}.{ext}")))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| Error::ExperimentNotFound(unit.to_string()))
}

/// Whether `path` looks like a definition unit file.
#[must_use]
pub fn is_unit_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| UNIT_EXTENSIONS.contains(&ext))
}
