#![no_main]

//! Fuzz target for registration and resolution
//!
//! Builds a registry from an arbitrary dependency graph over a fixed set of
//! node types, then resolves nodes. Resolution may fail (cycles, missing
//! names, failing builders) but must never panic, and a node that built must
//! have run its builder exactly once.
//!
//! Two threads entering a cycle from opposite ends block each other, so the
//! concurrent mode only generates edges from lower to higher nodes.

use arbitrary::Arbitrary;
use di_registry::{Context, DiError, ProvideOptions, Registry, func};
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

struct Node<const N: usize>;

#[derive(Debug, Arbitrary)]
struct Edge {
    from: u8,
    to: u8,
    named: bool,
}

#[derive(Debug, Arbitrary)]
struct Graph {
    concurrent: bool,
    edges: Vec<Edge>,
    failing: u8,
    requests: Vec<u8>,
}

const NODES: usize = 6;

fn request(ctx: &Context, node: usize, named: bool) -> Result<(), DiError> {
    let name = if named { "alt" } else { "" };
    match node {
        0 => ctx.build_named::<Node<0>>(name).map(drop),
        1 => ctx.build_named::<Node<1>>(name).map(drop),
        2 => ctx.build_named::<Node<2>>(name).map(drop),
        3 => ctx.build_named::<Node<3>>(name).map(drop),
        4 => ctx.build_named::<Node<4>>(name).map(drop),
        _ => ctx.build_named::<Node<5>>(name).map(drop),
    }
}

fn provide<const N: usize>(
    registry: &Registry,
    deps: Vec<(usize, bool)>,
    fails: bool,
    counter: Arc<AtomicUsize>,
) {
    registry
        .provide::<Node<N>, _>(
            func(move |ctx| {
                counter.fetch_add(1, Ordering::SeqCst);
                for &(dep, named) in &deps {
                    request(ctx, dep, named)?;
                }
                if fails {
                    return Err("node failed".into());
                }
                Ok(Arc::new(Node::<N>))
            }),
            ProvideOptions::new(),
        )
        .unwrap();
}

fuzz_target!(|graph: Graph| {
    let registry = Registry::new();
    let counters: Vec<_> = (0..NODES).map(|_| Arc::new(AtomicUsize::new(0))).collect();
    let mut deps = vec![Vec::new(); NODES];
    for edge in graph.edges.iter().take(32) {
        let (from, to) = (edge.from as usize % NODES, edge.to as usize % NODES);
        if graph.concurrent && from >= to {
            continue;
        }
        deps[from].push((to, edge.named));
    }
    let failing = graph.failing as usize % (NODES + 1);

    let mut deps = deps.into_iter();
    let mut next = || deps.next().unwrap_or_default();
    provide::<0>(&registry, next(), failing == 0, Arc::clone(&counters[0]));
    provide::<1>(&registry, next(), failing == 1, Arc::clone(&counters[1]));
    provide::<2>(&registry, next(), failing == 2, Arc::clone(&counters[2]));
    provide::<3>(&registry, next(), failing == 3, Arc::clone(&counters[3]));
    provide::<4>(&registry, next(), failing == 4, Arc::clone(&counters[4]));
    provide::<5>(&registry, next(), failing == 5, Arc::clone(&counters[5]));

    let threads = if graph.concurrent { 4 } else { 1 };
    let handles: Vec<_> = graph
        .requests
        .chunks(graph.requests.len().div_ceil(threads).max(1))
        .map(|chunk| {
            let registry = registry.clone();
            let chunk = chunk.to_vec();
            thread::spawn(move || {
                for node in chunk {
                    let _ = build(&registry, node as usize % NODES);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    // whether a node builds does not depend on the order of requests, so a
    // node that builds now never failed before
    for (node, counter) in counters.iter().enumerate() {
        if build(&registry, node).is_ok() {
            assert_eq!(counter.load(Ordering::SeqCst), 1);
        }
    }
});

fn build(registry: &Registry, node: usize) -> Result<(), DiError> {
    match node {
        0 => registry.build::<Node<0>>().map(drop),
        1 => registry.build::<Node<1>>().map(drop),
        2 => registry.build::<Node<2>>().map(drop),
        3 => registry.build::<Node<3>>().map(drop),
        4 => registry.build::<Node<4>>().map(drop),
        _ => registry.build::<Node<5>>().map(drop),
    }
}
