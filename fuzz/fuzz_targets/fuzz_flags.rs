#![no_main]

//! Fuzz target for flag parsing
//!
//! Feeds arbitrary strings to every built-in codec through a bound option
//! struct. Setting a flag may fail, but must never panic, and an accepted
//! integer, boolean or string must render back into an accepted value.

use arbitrary::Arbitrary;
use di_registry::flag::{Binder, FlagSet, FlagSpec, Options};
use di_registry::{ProvideOptions, Registry, inject};
use libfuzzer_sys::fuzz_target;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Default)]
struct Everything {
    int: i64,
    uint: u8,
    float: f64,
    flag: bool,
    text: String,
    letter: char,
    wait: Duration,
    list: Vec<String>,
    numbers: Vec<u32>,
    labels: HashMap<String, String>,
}

impl Options for Everything {
    fn bind<R: Send + Sync + 'static>(b: &mut Binder<'_, R, Self>) -> di_registry::Result<()> {
        b.field(FlagSpec::new("int"), |o| &mut o.int)?;
        b.field(FlagSpec::new("uint"), |o| &mut o.uint)?;
        b.field(FlagSpec::new("float"), |o| &mut o.float)?;
        b.field(FlagSpec::new("flag"), |o| &mut o.flag)?;
        b.field(FlagSpec::new("text"), |o| &mut o.text)?;
        b.field(FlagSpec::new("letter"), |o| &mut o.letter)?;
        b.field(FlagSpec::new("wait"), |o| &mut o.wait)?;
        b.field(FlagSpec::new("list"), |o| &mut o.list)?;
        b.field(FlagSpec::new("numbers"), |o| &mut o.numbers)?;
        b.field(FlagSpec::new("labels"), |o| &mut o.labels)
    }
}

struct Sink;

const NAMES: [&str; 10] = [
    "int", "uint", "float", "flag", "text", "letter", "wait", "list", "numbers", "labels",
];

const ROUND_TRIP: [&str; 4] = ["int", "uint", "flag", "text"];

#[derive(Debug, Arbitrary)]
struct Assignment {
    flag: u8,
    value: String,
}

fuzz_target!(|assignments: Vec<Assignment>| {
    let registry = Registry::new();
    let mut flags = FlagSet::new("fuzz");
    registry
        .provide::<Sink, _>(
            inject(|_, _: Everything| Ok(Arc::new(Sink))),
            ProvideOptions::new().flags(&mut flags),
        )
        .unwrap();

    for assignment in assignments.into_iter().take(64) {
        let name = NAMES[assignment.flag as usize % NAMES.len()];
        if flags.set(name, &assignment.value).is_ok() && ROUND_TRIP.contains(&name) {
            let rendered = flags.get(name).unwrap();
            flags.set(name, &rendered).unwrap();
            assert_eq!(flags.get(name).unwrap(), rendered);
        }
    }

    let _ = flags.usage();
    let _ = registry.build::<Sink>();
});
