//! Definition loader tests
//!
//! Unit files are written to a temporary directory and loaded through the
//! public `Playground` / `loader` API.

use std::fs;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;
use splitlab::experiment::{AbTest, ExperimentKind, Options, TypeTag};
use splitlab::kv::MemoryKvStore;
use splitlab::loader::{self, DefinitionContext, LoadStack};
use splitlab::{Error, ExperimentId, ExperimentState, Playground};
use tempfile::TempDir;

fn write_unit(dir: &Path, file: &str, contents: &str) -> PathBuf {
    let path = dir.join(file);
    fs::write(&path, contents).expect("write unit");
    path
}

fn playground_in(dir: &Path) -> Playground {
    Playground::builder()
        .namespace("test")
        .load_path(dir)
        .store(Arc::new(MemoryKvStore::new()))
        .build()
        .expect("playground")
}

// =============================================================================
// Basic loading
// =============================================================================

#[test]
fn test_signup_button_scenario() {
    let dir = TempDir::new().unwrap();
    let path = write_unit(
        dir.path(),
        "signup_button.toml",
        "name = \"Signup Button\"\ntype = \"ab_test\"\n",
    );
    let playground = playground_in(dir.path());

    let exp = playground.load_file(&path).unwrap();

    assert_eq!(exp.id(), &ExperimentId::new("signup_button").unwrap());
    assert_eq!(exp.name(), "Signup Button");
    assert_eq!(exp.type_tag(), &TypeTag::new("ab_test").unwrap());
    assert!(exp.is_active());
    assert!(exp.completed_at().is_none());
    assert!(exp.created_at().is_some());
    assert_eq!(exp.state(), ExperimentState::Active);
}

#[test]
fn test_id_derived_from_base_name() {
    let dir = TempDir::new().unwrap();
    let path = write_unit(
        dir.path(),
        "Checkout-Flow.v2.toml",
        "name = \"Checkout\"\ntype = \"ab_test\"\n",
    );
    let playground = playground_in(dir.path());

    let exp = playground.load_file(&path).unwrap();

    assert_eq!(exp.id().as_str(), "checkout_flow_v2");
}

#[test]
fn test_declared_id_takes_precedence() {
    let dir = TempDir::new().unwrap();
    let path = write_unit(
        dir.path(),
        "whatever.toml",
        "id = \"pricing_page\"\nname = \"Pricing\"\ntype = \"ab_test\"\n",
    );
    let playground = playground_in(dir.path());

    let exp = playground.load_file(&path).unwrap();

    assert_eq!(exp.id().as_str(), "pricing_page");
    assert!(playground.contains(&ExperimentId::new("pricing_page").unwrap()));
}

#[test]
fn test_json_unit_with_options() {
    let dir = TempDir::new().unwrap();
    let path = write_unit(
        dir.path(),
        "colors.json",
        r#"{
            "name": "Button Color",
            "type": "AbTest",
            "description": "Which color converts best",
            "options": {"alternatives": ["red", "green", "blue"]}
        }"#,
    );
    let playground = playground_in(dir.path());

    let exp = playground.load_file(&path).unwrap();
    let ab = exp.kind::<AbTest>().unwrap();

    assert_eq!(exp.description(), Some("Which color converts best"));
    assert_eq!(ab.alternatives(), &[json!("red"), json!("green"), json!("blue")]);
    assert_eq!(exp.options()["alternatives"], json!(["red", "green", "blue"]));
}

// =============================================================================
// Failure modes
// =============================================================================

#[test]
fn test_loading_twice_is_duplicate_definition() {
    let dir = TempDir::new().unwrap();
    let path = write_unit(
        dir.path(),
        "signup_button.toml",
        "name = \"Signup Button\"\ntype = \"ab_test\"\n",
    );
    let playground = playground_in(dir.path());

    playground.load_file(&path).unwrap();
    let err = playground.load_file(&path).unwrap_err();

    assert!(matches!(err, Error::Definition { ref id, .. } if id == "signup_button"));
    assert!(matches!(
        err.root_cause(),
        Error::DuplicateDefinition { id } if id == "signup_button"
    ));
    assert_eq!(playground.len(), 1);
}

#[test]
fn test_circular_dependency_names_full_chain() {
    let dir = TempDir::new().unwrap();
    let a = write_unit(
        dir.path(),
        "a.toml",
        "name = \"A\"\ntype = \"ab_test\"\ndepends_on = [\"b\"]\n",
    );
    write_unit(
        dir.path(),
        "b.toml",
        "name = \"B\"\ntype = \"ab_test\"\ndepends_on = [\"a\"]\n",
    );
    let playground = playground_in(dir.path());
    let mut stack = LoadStack::new();

    let err = loader::load(&playground, &mut stack, &a).unwrap_err();

    let Error::CircularDependency { chain } = err.root_cause() else {
        panic!("expected circular dependency, got {err}");
    };
    let hops: Vec<&str> = chain.split(" -> ").collect();
    assert_eq!(hops.len(), 3, "chain: {chain}");
    assert!(hops[0].ends_with("a.toml"));
    assert!(hops[1].ends_with("b.toml"));
    assert!(hops[2].ends_with("a.toml"));

    assert!(stack.is_empty());
    assert!(playground.is_empty());
}

#[test]
fn test_self_dependency_is_circular() {
    let dir = TempDir::new().unwrap();
    let path = write_unit(
        dir.path(),
        "loop.toml",
        "name = \"Loop\"\ntype = \"ab_test\"\ndepends_on = [\"loop\"]\n",
    );
    let playground = playground_in(dir.path());

    let err = playground.load_file(&path).unwrap_err();

    assert!(matches!(err.root_cause(), Error::CircularDependency { .. }));
}

#[test]
fn test_nested_failure_keeps_trace_and_clears_stack() {
    let dir = TempDir::new().unwrap();
    let outer = write_unit(
        dir.path(),
        "outer.toml",
        "name = \"Outer\"\ntype = \"ab_test\"\ndepends_on = [\"inner\"]\n",
    );
    write_unit(dir.path(), "inner.toml", "name = \"Inner\"\ntype = \"multivariate\"\n");
    let playground = playground_in(dir.path());
    let mut stack = LoadStack::new();

    let err = loader::load(&playground, &mut stack, &outer).unwrap_err();

    let Error::Definition { id, source, .. } = &err else {
        panic!("expected wrapped error, got {err}");
    };
    assert_eq!(id, "outer");
    assert!(matches!(source.as_ref(), Error::Definition { id, .. } if id == "inner"));
    assert!(matches!(
        err.root_cause(),
        Error::UnknownExperimentType(tag) if tag == "multivariate"
    ));
    assert!(err.to_string().contains("outer"));
    assert!(stack.is_empty());
    assert!(playground.is_empty());
}

#[test]
fn test_parse_error_is_wrapped_with_id() {
    let dir = TempDir::new().unwrap();
    let path = write_unit(dir.path(), "broken.toml", "name = \n");
    let playground = playground_in(dir.path());

    let err = playground.load_file(&path).unwrap_err();

    assert!(matches!(err, Error::Definition { ref id, .. } if id == "broken"));
    assert!(matches!(err.root_cause(), Error::ParseError(_)));
}

#[test]
fn test_unit_defining_nothing_is_missing_definition() {
    let playground = Playground::default();
    let id = ExperimentId::new("ghost").unwrap();

    let unit = |_: &mut DefinitionContext<'_>| -> splitlab::Result<()> { Ok(()) };
    let err = playground.load_unit(&id, &unit).unwrap_err();

    assert!(matches!(
        err,
        Error::MissingDefinition { ref id, ref path } if id == "ghost" && path == Path::new("ghost")
    ));
}

#[test]
fn test_panicking_unit_still_pops_stack() {
    let playground = Playground::default();
    let id = ExperimentId::new("panicky").unwrap();
    let mut stack = LoadStack::new();

    let unit = |_: &mut DefinitionContext<'_>| -> splitlab::Result<()> { panic!("unit bug") };
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        loader::load_unit(&playground, &mut stack, Path::new("panicky"), &id, &unit)
    }));

    assert!(outcome.is_err());
    assert!(stack.is_empty());
}

// =============================================================================
// Directory loading and autoload
// =============================================================================

#[test]
fn test_load_experiments_resolves_dependencies_once() {
    let dir = TempDir::new().unwrap();
    write_unit(
        dir.path(),
        "a_checkout.toml",
        "name = \"Checkout\"\ntype = \"ab_test\"\ndepends_on = [\"z_pricing\"]\n",
    );
    write_unit(dir.path(), "z_pricing.toml", "name = \"Pricing\"\ntype = \"ab_test\"\n");
    write_unit(dir.path(), "notes.txt", "not a unit");
    let playground = playground_in(dir.path());

    let loaded = playground.load_experiments().unwrap();

    assert_eq!(loaded.len(), 1);
    assert_eq!(playground.len(), 2);
    let ids: Vec<String> = playground.experiments().iter().map(|e| e.id().to_string()).collect();
    assert_eq!(ids, ["a_checkout", "z_pricing"]);
}

#[test]
fn test_load_experiments_skips_dependency_with_declared_id() {
    let dir = TempDir::new().unwrap();
    write_unit(
        dir.path(),
        "a.toml",
        "name = \"A\"\ntype = \"ab_test\"\ndepends_on = [\"c\"]\n",
    );
    write_unit(
        dir.path(),
        "c.toml",
        "id = \"charlie\"\nname = \"C\"\ntype = \"ab_test\"\n",
    );
    let playground = playground_in(dir.path());

    let loaded = playground.load_experiments().unwrap();

    assert_eq!(loaded.len(), 1);
    assert_eq!(playground.len(), 2);
    assert!(playground.contains(&ExperimentId::new("charlie").unwrap()));
    assert!(!playground.contains(&ExperimentId::new("c").unwrap()));
}

#[test]
fn test_shared_dependency_with_declared_id_loads_once() {
    let dir = TempDir::new().unwrap();
    for unit in ["a", "b"] {
        write_unit(
            dir.path(),
            &format!("{unit}.toml"),
            &format!("name = \"{unit}\"\ntype = \"ab_test\"\ndepends_on = [\"c\"]\n"),
        );
    }
    write_unit(
        dir.path(),
        "c.toml",
        "id = \"charlie\"\nname = \"C\"\ntype = \"ab_test\"\n",
    );
    let playground = playground_in(dir.path());

    let a = playground.load_file(dir.path().join("a.toml")).unwrap();
    let b = playground.load_file(dir.path().join("b.toml")).unwrap();

    assert_eq!(a.id().as_str(), "a");
    assert_eq!(b.id().as_str(), "b");
    assert_eq!(playground.len(), 3);
    let ids: Vec<String> = playground.experiments().iter().map(|e| e.id().to_string()).collect();
    assert_eq!(ids, ["a", "b", "charlie"]);
}

#[test]
fn test_unit_id_prefers_declared_id() {
    let dir = TempDir::new().unwrap();
    let declared = write_unit(
        dir.path(),
        "c.toml",
        "id = \"charlie\"\nname = \"C\"\ntype = \"ab_test\"\n",
    );
    let plain = write_unit(dir.path(), "Delta Test.toml", "name = \"D\"\ntype = \"ab_test\"\n");

    assert_eq!(loader::unit_id(&declared).unwrap().as_str(), "charlie");
    assert_eq!(loader::unit_id(&plain).unwrap().as_str(), "delta_test");
}

#[test]
fn test_experiment_autoloads_unit() {
    let dir = TempDir::new().unwrap();
    write_unit(dir.path(), "onboarding.toml", "name = \"Onboarding\"\ntype = \"ab_test\"\n");
    let playground = playground_in(dir.path());

    let first = playground.experiment("onboarding").unwrap();
    let second = playground.experiment("onboarding").unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(playground.len(), 1);
}

#[test]
fn test_reload_keeps_persisted_state() {
    let dir = TempDir::new().unwrap();
    write_unit(dir.path(), "banner.toml", "name = \"Banner\"\ntype = \"ab_test\"\n");
    let playground = playground_in(dir.path());

    playground.load_experiments().unwrap();
    let before = playground.experiment("banner").unwrap();
    before.complete();

    let reloaded = playground.reload().unwrap();

    assert_eq!(reloaded.len(), 1);
    let after = playground.experiment("banner").unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    assert!(!after.is_active());
    assert_eq!(after.created_at(), before.created_at());
}

// =============================================================================
// Custom kinds
// =============================================================================

#[derive(Debug)]
struct FeatureFlag {
    rollout: u64,
}

impl ExperimentKind for FeatureFlag {
    fn type_tag(&self) -> TypeTag {
        TypeTag::new("feature_flag").unwrap()
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[test]
fn test_registered_kind_resolves_from_unit() {
    let dir = TempDir::new().unwrap();
    let path = write_unit(
        dir.path(),
        "new_search.toml",
        "name = \"New Search\"\ntype = \"FeatureFlag\"\n[options]\nrollout = 25\n",
    );
    let playground = Playground::builder()
        .load_path(dir.path())
        .register_type(TypeTag::new("feature_flag").unwrap(), |options: &Options| {
            let rollout = options
                .get("rollout")
                .and_then(serde_json::Value::as_u64)
                .unwrap_or(0);
            Ok(Box::new(FeatureFlag { rollout }) as Box<dyn ExperimentKind>)
        })
        .build()
        .unwrap();

    let exp = playground.load_file(&path).unwrap();

    assert_eq!(exp.type_tag().class_name(), "FeatureFlag");
    assert_eq!(exp.kind::<FeatureFlag>().unwrap().rollout, 25);
    assert!(exp.kind::<AbTest>().is_none());
    assert!(playground.types().contains(&TypeTag::new("ab_test").unwrap()));
}
