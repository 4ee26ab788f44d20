//! Example demonstrating #[derive(Options)] and flag-bound builders
//!
//! Run with:
//!   cargo run --example derive --features derive -- --port 9090 --db-url postgres://db/app

use di_registry::flag::{FlagSet, FlagWatcher};
use di_registry::{Options, ProvideOptions, Registry, inject, wire_inject};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Clone, Debug, Default, Options)]
struct DbOptions {
    #[flag(required, usage = "connection url")]
    url: String,
    #[flag(default = "8", usage = "pool size")]
    max_conns: usize,
}

#[derive(Clone, Debug, Default, Options)]
struct HttpOptions {
    #[flag(default = "8080", usage = "listen port")]
    port: u16,
    #[flag(name = "idle-timeout", default = "90s")]
    idle: Duration,
    #[flag(default = "localhost", usage = "allowed origins")]
    origins: Vec<String>,
}

#[allow(dead_code)]
struct Database {
    url: String,
    pool: AtomicUsize,
}

struct HttpServer {
    db: Arc<Database>,
    options: HttpOptions,
}

/// `--name value` pairs; anything else is ignored.
fn parse_args(args: &[String]) -> Vec<(String, String)> {
    args.chunks(2)
        .filter_map(|pair| match pair {
            [name, value] => name
                .strip_prefix("--")
                .map(|name| (name.to_string(), value.clone())),
            _ => None,
        })
        .collect()
}

fn main() {
    println!("=== di-registry Derive Demo ===\n");

    let registry = Registry::new();
    let mut flags = FlagSet::new("demo");

    registry
        .provide::<Database, _>(
            inject(|_, opts: DbOptions| {
                Ok(Arc::new(Database {
                    url: opts.url,
                    pool: AtomicUsize::new(opts.max_conns),
                }))
            })
            .on_retrofit(|db: &Arc<Database>, opts: &DbOptions| {
                db.pool.store(opts.max_conns, Ordering::SeqCst);
                Ok(())
            }),
            ProvideOptions::new().flags(&mut flags).flag_prefix("db"),
        )
        .unwrap();
    registry
        .provide::<HttpServer, _>(
            wire_inject(|db: Arc<Database>, options: HttpOptions| {
                Ok(Arc::new(HttpServer { db, options }))
            }),
            ProvideOptions::new().flags(&mut flags),
        )
        .unwrap();

    println!("Flags:\n{}", flags.usage());

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut items = parse_args(&args);
    if !items.iter().any(|(name, _)| name == "db-url") {
        items.push(("db-url".into(), "postgres://localhost/demo".into()));
    }
    if let Err(err) = flags.apply(items) {
        eprintln!("{err}");
        std::process::exit(2);
    }

    let mut watcher = FlagWatcher::watch(&flags);
    let server = match registry.build::<HttpServer>() {
        Ok(server) => server,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };
    println!(
        "HttpServer on :{} (idle {:?}, origins {:?}) using {}",
        server.options.port,
        server.options.idle,
        server.options.origins,
        server.db.url
    );

    // runtime reconfiguration reaches the already-built database
    registry
        .reconfigure(&mut flags, [("db-max-conns", "32")])
        .unwrap_or_else(|err| eprintln!("{err}"));
    println!(
        "changed since start: {:?}, pool now {}",
        watcher.changed_flags(&flags),
        server.db.pool.load(Ordering::SeqCst)
    );

    println!("\n=== Demo Complete ===");
}
