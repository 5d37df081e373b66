#![allow(dead_code, unused_imports)]

use bundle_cache::prelude::*;
use std::{fs::File, sync::Arc, time::Instant};

#[cfg(feature = "profiling")]
use tracing_subscriber::{self, prelude::*};

const ASSETS: usize = 2_000;

struct Props;

impl Instantiator for Props {
    type Object = Vec<u8>;

    fn instantiate(&mut self, _fingerprint: Fingerprint, payload: &Payload) -> Option<Vec<u8>> {
        payload.downcast_ref::<Vec<u8>>().cloned()
    }

    fn park(&mut self, _object: &mut Vec<u8>, _reparent: bool) {}

    fn activate(&mut self, _object: &mut Vec<u8>) {}

    fn destroy(&mut self, _object: Vec<u8>) {}
}

fn build_context() -> AssetContext<Props> {
    let mut store = MemoryBundleStore::new().with_async_latency(2);
    let mut manifest = Vec::with_capacity(ASSETS);
    for i in 0..ASSETS {
        let container = format!("bundle_{}", i % 64);
        let name = format!("prop_{i}");
        store = store.with_asset(container.as_str(), name.as_str(), vec![0u8; 256]);
        manifest.push(ManifestEntry::new(
            format!("Assets/Props/{name}.prefab"),
            container,
            name,
            [ContainerId::from("shared")],
        ));
    }
    store = store.with_container("shared");

    match AssetContext::init(&manifest, Arc::new(store), Props, AssetConfig::default()) {
        Ok(context) => context,
        Err(err) => {
            eprintln!("failed to initialise asset context: {err}");
            std::process::exit(1);
        }
    }
}

#[cfg(feature = "profiling")]
#[tracing::instrument(skip(context))]
fn profile_loads(context: &mut AssetContext<Props>, count: usize) {
    let _span = tracing::info_span!("load_loop", count = count).entered();
    let (tx, rx) = crossbeam::channel::unbounded::<Payload>();
    for i in 0..count {
        if i % 500 == 0 {
            tracing::info!("Loading asset {}/{}", i, count);
        }
        let path = format!("Assets/Props/prop_{i}.prefab");
        let tx = tx.clone();
        context.load_async(&path, LoadPriority::Medium, move |outcome| match outcome.result {
            Ok(asset) => {
                let _ = tx.send(asset.into_payload());
            }
            Err(err) => tracing::error!("load failed: {err}"),
        });
    }
    while !context.scheduler().is_idle() {
        context.update();
    }

    for payload in rx.try_iter() {
        if let Err(err) = context.release_payload(&payload, false) {
            tracing::error!("release failed: {err}");
        }
    }
}

#[cfg(feature = "profiling")]
#[tracing::instrument(skip(context))]
fn profile_spawns(context: &mut AssetContext<Props>, count: usize) {
    let _span = tracing::info_span!("spawn_loop", count = count).entered();
    let mut spawned = Vec::with_capacity(count);
    for i in 0..count {
        let path = format!("Assets/Props/prop_{}.prefab", i % 64);
        if let Some(id) = context.spawn_instance(&path, true) {
            spawned.push(id);
        }
    }
    for id in spawned {
        if let Err(err) = context.release_instance(id, None, false) {
            tracing::error!("release failed: {err}");
        }
    }
}

#[cfg(feature = "profiling")]
fn main() {
    // Set up tracing subscriber to write to a file
    let file = match File::create("trace.json") {
        Ok(file) => file,
        Err(err) => {
            eprintln!("cannot create trace.json: {err}");
            return;
        }
    };
    let (non_blocking, _guard) = tracing_appender::non_blocking(file);
    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_max_level(tracing::Level::TRACE)
        .init();

    let mut context = build_context();

    println!("Profiling {ASSETS} async loads...");
    let start = Instant::now();
    profile_loads(&mut context, ASSETS);
    println!("Async loads complete in: {:?}", start.elapsed());

    println!("Profiling 10k pooled spawns...");
    let start = Instant::now();
    profile_spawns(&mut context, 10_000);
    println!("Spawns complete in: {:?}", start.elapsed());

    let report = context.shutdown();
    println!("Shutdown: {report:?}");
}

#[cfg(not(feature = "profiling"))]
fn main() {
    println!("profile_loads binary requires --features profiling");
}
