//! # splitlab: experiment definitions and a persisted lifecycle
//!
//! splitlab loads named experiments (A/B tests and similar) from isolated
//! definition units and tracks each experiment's lifecycle (created, active,
//! completed) in a shared key-value store, so every process pointed at the
//! same store sees the same state.
//!
//! ## Design Principles
//!
//! - **The store is authoritative**: timestamps are written with an atomic
//!   set-if-absent; in-process caches only ever adopt what the store holds
//! - **Outages degrade, never crash**: lifecycle calls against an unreachable
//!   store log and return `false` / `None`
//! - **Fail-fast loading**: a broken unit aborts startup with its id, path
//!   and the underlying error chain
//!
//! ## Example Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use splitlab::kv::MemoryKvStore;
//! use splitlab::Playground;
//!
//! # fn example() -> splitlab::Result<()> {
//! let store = Arc::new(MemoryKvStore::new());
//! let playground = Playground::builder().namespace("shop").store(store).build()?;
//!
//! let exp = playground.define("signup_button", "Signup Button", "ab_test", |exp| {
//!     exp.complete_if(|_| Ok(false))
//! })?;
//!
//! assert!(exp.is_active());
//! assert!(exp.completed_at().is_none());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod clock;
pub mod error;
pub mod experiment;
pub mod identity;
pub mod kv;
pub mod loader;
pub mod playground;

pub use error::{Error, IdentityError, Result};
pub use experiment::{Experiment, ExperimentId, ExperimentState};
pub use playground::{Playground, PlaygroundBuilder, PlaygroundConfig};
