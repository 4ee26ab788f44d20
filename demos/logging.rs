//! Example demonstrating the registry's log events
//!
//! Run with JSON logging (production):
//! ```bash
//! cargo run --example logging --features logging-json
//! ```
//!
//! Run with pretty logging (development):
//! ```bash
//! cargo run --example logging --features logging-pretty
//! ```

use di_registry::{ProvideOptions, Registry, func, instance, wire};
use std::sync::Arc;

#[allow(dead_code)]
struct Database {
    url: String,
}

#[allow(dead_code)]
struct UserService {
    db: Arc<Database>,
}

trait Exporter: Send + Sync {}

struct Stdout;
impl Exporter for Stdout {}

struct Left;
struct Right;

fn main() {
    di_registry::logging::builder().trace().registry_only().init();

    println!("=== di-registry Logging Demo ===\n");

    // logs: "Creating new registry"
    let registry = Registry::new();

    // logs: "Registering builder"
    registry
        .provide::<Database, _>(
            instance(Database {
                url: "postgres://localhost/mydb".into(),
            }),
            ProvideOptions::new(),
        )
        .unwrap();
    registry
        .provide::<UserService, _>(
            wire(|db: Arc<Database>| {
                println!("  [App] UserService being built...");
                Ok(Arc::new(UserService { db }))
            }),
            ProvideOptions::new(),
        )
        .unwrap();
    for name in ["stdout", "broken"] {
        registry
            .provide::<dyn Exporter, _>(
                func(move |_| match name {
                    "broken" => Err("exporter endpoint unreachable".into()),
                    _ => Ok(Arc::new(Stdout) as Arc<dyn Exporter>),
                }),
                ProvideOptions::new().name(name),
            )
            .unwrap();
    }
    registry
        .provide::<Left, _>(wire(|_: Arc<Right>| Ok(Arc::new(Left))), ProvideOptions::new())
        .unwrap();
    registry
        .provide::<Right, _>(wire(|_: Arc<Left>| Ok(Arc::new(Right))), ProvideOptions::new())
        .unwrap();

    // logs: "Registry locked", "Building instance", "Instance built and memoized"
    let _users = registry.must::<UserService>();

    // logs: "Resolved memoized instance" (TRACE)
    let _users = registry.must::<UserService>();

    // logs: "Skipping instance that failed to build"
    let exporters = registry.build_all_with::<dyn Exporter, _>(|name, err| {
        println!("  [App] exporter {name} unavailable: {err}");
    });
    println!("  [App] {} exporter(s) ready", exporters.map_or(0, |e| e.len()));

    // logs: "Dependency cycle detected"
    if let Err(err) = registry.build::<Left>() {
        println!("  [App] {err}");
    }

    println!("\n=== Demo Complete ===");
    println!("\nTip: Use --features logging-json for production (JSON output)");
    println!("     Use --features logging-pretty for development (colorful output)");
}
