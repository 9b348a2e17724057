//! Experiment Lifecycle: definitions, shared state, completion
//!
//! Two playgrounds share one store, the way two app servers share one
//! key-value backend. A definition unit is loaded from disk, participants
//! are assigned, and a completion condition closes the experiment for
//! both processes.
//!
//! Run with: cargo run --example experiment_lifecycle
//! Logs:     RUST_LOG=splitlab=debug cargo run --example experiment_lifecycle

use std::fs;
use std::sync::Arc;

use anyhow::Context;
use splitlab::experiment::AbTest;
use splitlab::kv::MemoryKvStore;
use splitlab::Playground;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== splitlab: Experiment Lifecycle ===\n");

    let dir = tempfile::tempdir()?;
    fs::write(
        dir.path().join("signup_button.toml"),
        r#"name = "Signup Button"
type = "ab_test"
description = "Does a green button convert better?"

[options]
alternatives = ["blue", "green"]
"#,
    )?;

    let store = Arc::new(MemoryKvStore::new());
    let web = Playground::builder()
        .namespace("demo")
        .load_path(dir.path())
        .store(store.clone())
        .build()?;
    let worker = Playground::builder()
        .namespace("demo")
        .load_path(dir.path())
        .store(store.clone())
        .build()?;

    println!("1. Loading definitions");
    let loaded = web.load_experiments().context("loading experiments")?;
    for exp in &loaded {
        println!("   :{} ({}) - {}", exp.id(), exp.type_tag().class_name(), exp.name());
    }

    let exp = web.experiment("signup_button")?;
    let ab = exp
        .kind::<AbTest>()
        .context("signup_button is not an A/B test")?;

    println!("\n2. Assigning participants");
    for user in ["alice", "bob", "carol", "dave"] {
        let index = ab.choose(&exp, Some(&user))?;
        println!("   {user:<6} -> {}", ab.alternatives()[index]);
    }
    ab.convert(&exp, Some(&"carol"))?;
    for (index, alternative) in ab.alternatives().iter().enumerate() {
        println!(
            "   {alternative}: {} participants, {} conversions",
            ab.participants(&exp, index).unwrap_or_default(),
            ab.conversions(&exp, index).unwrap_or_default()
        );
    }

    println!("\n3. Second process sees the same experiment");
    let remote = worker.experiment("signup_button")?;
    println!("   created_at (web):    {:?}", exp.created_at());
    println!("   created_at (worker): {:?}", remote.created_at());

    println!("\n4. Completing from the worker");
    remote.complete();
    println!("   web sees active:  {}", exp.is_active());
    println!("   web sees state:   {:?}", exp.state());
    println!("   completed_at:     {:?}", exp.completed_at());

    println!("\n5. Store outage");
    store.disconnect();
    println!("   save() while down: {}", exp.save());
    println!("   state while down:  {:?}", exp.state());
    store.reconnect();
    println!("   state after:       {:?}", exp.state());

    println!("\n6. Destroying");
    exp.destroy();
    println!("   state: {:?}", exp.state());

    Ok(())
}
