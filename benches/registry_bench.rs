//! Benchmarks for the registry

use criterion::{BatchSize, Criterion, Throughput, criterion_group, criterion_main};
use di_registry::flag::{Binder, FlagSet, FlagSpec, Options};
use di_registry::{ProvideOptions, Registry, func, inject, instance, wire};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

#[allow(dead_code)]
struct Config {
    url: String,
}

#[allow(dead_code)]
struct Database {
    config: Arc<Config>,
}

#[allow(dead_code)]
struct Cache {
    config: Arc<Config>,
}

#[allow(dead_code)]
struct UserService {
    db: Arc<Database>,
    cache: Arc<Cache>,
}

#[derive(Clone, Default)]
struct ServerOptions {
    port: u16,
    timeout: Duration,
    hosts: Vec<String>,
}

impl Options for ServerOptions {
    fn bind<R: Send + Sync + 'static>(b: &mut Binder<'_, R, Self>) -> di_registry::Result<()> {
        b.field(FlagSpec::new("port").default_value("8080"), |o| &mut o.port)?;
        b.field(FlagSpec::new("timeout").default_value("30s"), |o| &mut o.timeout)?;
        b.field(FlagSpec::new("hosts").default_value("a,b"), |o| &mut o.hosts)
    }
}

#[allow(dead_code)]
struct Server {
    port: u16,
}

fn graph() -> Registry {
    let registry = Registry::new();
    registry
        .provide::<Config, _>(
            instance(Config {
                url: "postgres://localhost".into(),
            }),
            ProvideOptions::new(),
        )
        .unwrap();
    registry
        .provide::<Database, _>(
            wire(|config: Arc<Config>| Ok(Arc::new(Database { config }))),
            ProvideOptions::new(),
        )
        .unwrap();
    registry
        .provide::<Cache, _>(
            wire(|config: Arc<Config>| Ok(Arc::new(Cache { config }))),
            ProvideOptions::new(),
        )
        .unwrap();
    registry
        .provide::<UserService, _>(
            wire(|(db, cache): (Arc<Database>, Arc<Cache>)| {
                Ok(Arc::new(UserService { db, cache }))
            }),
            ProvideOptions::new(),
        )
        .unwrap();
    registry
}

fn bench_registration(c: &mut Criterion) {
    let mut group = c.benchmark_group("registration");

    group.bench_function("instance", |b| {
        b.iter(|| {
            let registry = Registry::new();
            registry
                .provide::<Config, _>(
                    instance(Config { url: "x".into() }),
                    ProvideOptions::new(),
                )
                .unwrap();
            black_box(registry)
        })
    });

    group.bench_function("graph_4", |b| b.iter(|| black_box(graph())));

    group.bench_function("options_with_flags", |b| {
        b.iter(|| {
            let registry = Registry::new();
            let mut flags = FlagSet::new("bench");
            registry
                .provide::<Server, _>(
                    inject(|_, opts: ServerOptions| Ok(Arc::new(Server { port: opts.port }))),
                    ProvideOptions::new().flags(&mut flags).flag_prefix("http"),
                )
                .unwrap();
            black_box((registry, flags))
        })
    });

    group.finish();
}

fn bench_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolution");
    group.throughput(Throughput::Elements(1));

    let registry = graph();
    let _ = registry.must::<UserService>();

    group.bench_function("memoized", |b| {
        b.iter(|| black_box(registry.must::<UserService>()))
    });

    group.bench_function("exists", |b| {
        b.iter(|| black_box(registry.exists::<UserService>()))
    });

    group.bench_function("first_build_graph_4", |b| {
        b.iter_batched(
            graph,
            |registry| black_box(registry.must::<UserService>()),
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

fn bench_bulk(c: &mut Criterion) {
    let mut group = c.benchmark_group("bulk");

    let registry = Registry::new();
    for i in 0..16 {
        registry
            .provide::<Config, _>(
                func(move |_| Ok(Arc::new(Config { url: format!("db-{i}") }))),
                ProvideOptions::new().name(format!("shard-{i:02}")),
            )
            .unwrap();
    }
    let _ = registry.must_all::<Config>();

    group.throughput(Throughput::Elements(16));
    group.bench_function("build_all_16", |b| {
        b.iter(|| black_box(registry.must_all::<Config>()))
    });

    group.finish();
}

fn bench_flags(c: &mut Criterion) {
    let mut group = c.benchmark_group("flags");

    let registry = Registry::new();
    let mut flags = FlagSet::new("bench");
    registry
        .provide::<Server, _>(
            inject(|_, opts: ServerOptions| Ok(Arc::new(Server { port: opts.port }))),
            ProvideOptions::new().flags(&mut flags),
        )
        .unwrap();

    group.bench_function("set_scalar", |b| {
        b.iter(|| flags.set("port", black_box("9090")).unwrap())
    });

    group.bench_function("set_duration", |b| {
        b.iter(|| flags.set("timeout", black_box("1m30s")).unwrap())
    });

    group.bench_function("validate", |b| {
        b.iter(|| black_box(registry.validate_flags()))
    });

    group.finish();
}

fn bench_concurrent(c: &mut Criterion) {
    use std::thread;

    let mut group = c.benchmark_group("concurrent");

    group.bench_function("concurrent_reads_4", |b| {
        let registry = graph();
        let _ = registry.must::<UserService>();

        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let r = registry.clone();
                    thread::spawn(move || {
                        for _ in 0..100 {
                            let _ = r.must::<UserService>();
                        }
                    })
                })
                .collect();

            for h in handles {
                h.join().unwrap();
            }
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_registration,
    bench_resolution,
    bench_bulk,
    bench_flags,
    bench_concurrent,
);

criterion_main!(benches);
