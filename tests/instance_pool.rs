use bundle_cache::prelude::*;
use std::sync::Arc;

#[derive(Debug, PartialEq)]
struct Unit {
    hp: u32,
    active: bool,
}

#[derive(Default)]
struct Barracks {
    built: usize,
    destroyed: usize,
}

impl Instantiator for Barracks {
    type Object = Unit;

    fn instantiate(&mut self, _fingerprint: Fingerprint, payload: &Payload) -> Option<Unit> {
        let hp = *payload.downcast_ref::<u32>()?;
        self.built += 1;
        Some(Unit { hp, active: true })
    }

    fn park(&mut self, object: &mut Unit, _reparent: bool) {
        object.active = false;
    }

    fn activate(&mut self, object: &mut Unit) {
        object.active = true;
    }

    fn destroy(&mut self, _object: Unit) {
        self.destroyed += 1;
    }
}

fn context(config: AssetConfig) -> (Arc<MemoryBundleStore>, AssetContext<Barracks>) {
    let store = Arc::new(
        MemoryBundleStore::new()
            .with_asset("units", "knight", 120u32)
            .with_asset("units", "archer", 80u32),
    );
    let manifest = vec![
        ManifestEntry::new("Assets/Units/knight.prefab", "units", "knight", []),
        ManifestEntry::new("Assets/Units/archer.prefab", "units", "archer", []),
    ];
    let context = AssetContext::init(&manifest, store.clone(), Barracks::default(), config).unwrap();
    (store, context)
}

const KNIGHT: &str = "Assets/Units/knight.prefab";

#[test]
fn test_pool_of_two_keeps_two_destroys_third() {
    let (_store, mut context) = context(AssetConfig::default());
    let ids: Vec<InstanceId> = (0..3).map(|_| context.spawn_instance(KNIGHT, true).unwrap()).collect();
    assert_eq!(context.cache().ref_count(Fingerprint::of(KNIGHT)), Some(3));

    let outcomes: Vec<InstanceRelease> = ids
        .iter()
        .map(|&id| context.release_instance(id, Some(2), false).unwrap())
        .collect();
    assert_eq!(
        outcomes,
        vec![InstanceRelease::Parked, InstanceRelease::Parked, InstanceRelease::Destroyed]
    );
    assert_eq!(context.pool().pooled_count(Fingerprint::of(KNIGHT)), 2);
    assert_eq!(context.pool().instantiator().destroyed, 1);
    assert_eq!(context.cache().ref_count(Fingerprint::of(KNIGHT)), Some(0));
}

#[test]
fn test_respawn_reuses_without_second_container_load() {
    let (store, mut context) = context(AssetConfig::default());
    let id = context.spawn_instance(KNIGHT, true).unwrap();
    context.release_instance(id, None, false).unwrap();
    assert_eq!(context.instance(id).map(|u| u.active), Some(false));

    let again = context.spawn_instance(KNIGHT, true).unwrap();
    assert_eq!(again, id);
    assert_eq!(context.instance(again), Some(&Unit { hp: 120, active: true }));
    assert_eq!(store.counters().loads_of(&ContainerId::from("units")), 1);
    assert_eq!(context.pool().instantiator().built, 1);
}

#[test]
fn test_destroy_release_evicts_decoded_asset() {
    let (store, mut context) = context(AssetConfig::default());
    let id = context.spawn_instance(KNIGHT, true).unwrap();
    assert_eq!(
        context.release_instance(id, None, true).unwrap(),
        InstanceRelease::Destroyed
    );
    assert!(!context.is_loaded(KNIGHT));
    assert_eq!(store.counters().unloads_of(&ContainerId::from("units")), 1);
}

#[test]
fn test_configured_pool_size_applies_by_default() {
    let mut config = AssetConfig::default();
    config.pool.max_pool_size = Some(1);
    let (_store, mut context) = context(config);
    let first = context.spawn_instance(KNIGHT, true).unwrap();
    let second = context.spawn_instance(KNIGHT, true).unwrap();
    assert_eq!(context.release_instance(first, None, false).unwrap(), InstanceRelease::Parked);
    assert_eq!(context.release_instance(second, None, false).unwrap(), InstanceRelease::Destroyed);
}

#[test]
fn test_double_release_reported() {
    let (_store, mut context) = context(AssetConfig::default());
    let id = context.spawn_instance(KNIGHT, true).unwrap();
    context.release_instance(id, None, false).unwrap();
    let err = context.release_instance(id, None, false).unwrap_err();
    assert!(matches!(err, AssetError::PoolOwnership(_)));
    assert!(!err.is_recoverable());
}

#[test]
fn test_spawn_async_then_scene_clear() {
    let (_store, mut context) = context(AssetConfig::default());
    let spawned = std::rc::Rc::new(std::cell::Cell::new(None));
    let sink = spawned.clone();
    context.spawn_instance_async("Assets/Units/archer.prefab", LoadPriority::Medium, true, move |result| {
        sink.set(result.ok());
    });
    context.update();
    let id = spawned.get().unwrap();
    context.release_instance(id, None, false).unwrap();

    let cleared = context.clear_scene_scoped();
    assert_eq!(cleared, SceneClear { instances: 1, assets: 1 });
    assert!(context.instance(id).is_none());
    assert!(context.shutdown().is_clean());
}

#[test]
fn test_forced_asset_release_takes_parked_instances() {
    let (store, mut context) = context(AssetConfig::default());
    let knight = Fingerprint::of(KNIGHT);
    let id = context.spawn_instance(KNIGHT, true).unwrap();
    context.release_instance(id, None, false).unwrap();
    assert!(context.load_sync(KNIGHT).is_some());

    assert_eq!(context.release(KNIGHT, true).unwrap(), ReleaseOutcome::Destroyed);
    assert!(!context.is_loaded(KNIGHT));
    assert_eq!(context.pool().pooled_count(knight), 0);
    assert!(context.instance(id).is_none());
    assert_eq!(context.pool().instantiator().destroyed, 1);
    assert_eq!(store.counters().unloads_of(&ContainerId::from("units")), 1);
}

#[test]
fn test_forced_payload_release_takes_parked_instances() {
    let (_store, mut context) = context(AssetConfig::default());
    let archer = "Assets/Units/archer.prefab";
    let id = context.spawn_instance(archer, true).unwrap();
    context.release_instance(id, None, false).unwrap();
    let payload = context.load_sync(archer).unwrap();

    assert_eq!(context.release_payload(&payload, true).unwrap(), ReleaseOutcome::Destroyed);
    assert_eq!(context.pool().pooled_count(Fingerprint::of(archer)), 0);
    assert!(context.shutdown().is_clean());
}

#[test]
fn test_unforced_eviction_keeps_parked_instances() {
    let mut config = AssetConfig::default();
    config.cache.max_idle_assets = Some(0);
    let (store, mut context) = context(config);
    let ids: Vec<InstanceId> = (0..3).map(|_| context.spawn_instance(KNIGHT, true).unwrap()).collect();
    for &id in &ids {
        context.release_instance(id, Some(2), false).unwrap();
    }
    assert!(!context.is_loaded(KNIGHT));
    assert_eq!(context.pool().pooled_count(Fingerprint::of(KNIGHT)), 2);

    assert_eq!(context.spawn_instance(KNIGHT, true), Some(ids[1]));
    assert_eq!(store.counters().loads_of(&ContainerId::from("units")), 2);
}
