//! Dynamic filter dispatch: the plugin protocol, verdict merging, and
//! frame-delta processing.

use purview_core::{BitSet, ConnectionId, FilterHandle, ObjectIndex};
use purview_engine::{EngineConfig, ScopeEngine};
use purview_filter::{
    AddObjectParams, FilterDefinition, FilterInitParams, FilterParams, ObjectFilter,
};
use purview_filters::{RadiusFilter, RadiusFilterConfig, ZoneFilter};
use purview_test_utils::{ScriptHandle, ScriptedFilter, TestWorld};

const MAX_OBJECTS: u32 = 128;
const MAX_CONNECTIONS: u32 = 8;

fn config_with(filters: Vec<FilterDefinition>) -> EngineConfig {
    EngineConfig {
        max_connections: MAX_CONNECTIONS,
        initial_max_objects: MAX_OBJECTS,
        filters,
        ..EngineConfig::default()
    }
}

fn setup_scripted() -> (ScopeEngine, TestWorld, ScriptHandle) {
    let (filter, script) = ScriptedFilter::new();
    let engine = ScopeEngine::new(config_with(vec![FilterDefinition::new(
        "scripted",
        Box::new(filter),
    )]))
    .unwrap();
    (engine, TestWorld::new(MAX_OBJECTS, MAX_CONNECTIONS), script)
}

#[test]
fn verdicts_follow_the_script_per_tick() {
    let (mut engine, mut world, script) = setup_scripted();
    world.add_object(ObjectIndex(1));
    world.connect(&mut engine, ConnectionId(1));
    world.run_tick(&mut engine);

    let handle = engine.filter_handle("scripted").unwrap();
    assert!(engine
        .set_filter(&world.ctx(), ObjectIndex(1), handle, None)
        .unwrap());
    world.run_tick(&mut engine);
    assert!(engine.is_object_in_scope(ObjectIndex(1), ConnectionId(1)));

    script.lock().unwrap().set_allowed(ObjectIndex(1), false);
    world.run_tick(&mut engine);
    assert!(!engine.is_object_in_scope(ObjectIndex(1), ConnectionId(1)));

    script.lock().unwrap().set_allowed(ObjectIndex(1), true);
    world.run_tick(&mut engine);
    assert!(engine.is_object_in_scope(ObjectIndex(1), ConnectionId(1)));
}

#[test]
fn verdicts_are_independent_per_connection() {
    let (mut engine, mut world, script) = setup_scripted();
    world.add_object(ObjectIndex(1));
    world.connect(&mut engine, ConnectionId(1));
    world.connect(&mut engine, ConnectionId(2));
    world.run_tick(&mut engine);

    let handle = engine.filter_handle("scripted").unwrap();
    engine
        .set_filter(&world.ctx(), ObjectIndex(1), handle, None)
        .unwrap();
    script
        .lock()
        .unwrap()
        .set_allowed_for(ConnectionId(2), ObjectIndex(1), false);
    world.run_tick(&mut engine);

    assert!(engine.is_object_in_scope(ObjectIndex(1), ConnectionId(1)));
    assert!(!engine.is_object_in_scope(ObjectIndex(1), ConnectionId(2)));
}

#[test]
fn protocol_lifecycle_calls_are_made() {
    let (mut engine, mut world, script) = setup_scripted();
    world.add_object(ObjectIndex(1));
    world.connect(&mut engine, ConnectionId(1));
    world.run_tick(&mut engine);

    let handle = engine.filter_handle("scripted").unwrap();
    engine
        .set_filter(&world.ctx(), ObjectIndex(1), handle, None)
        .unwrap();
    assert_eq!(script.lock().unwrap().add_calls, 1);

    world.run_tick(&mut engine);
    {
        let state = script.lock().unwrap();
        assert_eq!(state.pre_filter_calls, 1);
        assert_eq!(state.post_filter_calls, 1);
    }

    engine
        .set_filter(&world.ctx(), ObjectIndex(1), FilterHandle::NONE, None)
        .unwrap();
    assert_eq!(script.lock().unwrap().remove_calls, 1);
}

#[test]
fn dirty_objects_reach_the_filter_in_batches() {
    let (mut engine, mut world, script) = setup_scripted();
    world.add_object(ObjectIndex(1));
    world.add_object(ObjectIndex(2));
    world.connect(&mut engine, ConnectionId(1));
    world.run_tick(&mut engine);

    let handle = engine.filter_handle("scripted").unwrap();
    engine
        .set_filter(&world.ctx(), ObjectIndex(1), handle, None)
        .unwrap();
    engine
        .set_filter(&world.ctx(), ObjectIndex(2), handle, None)
        .unwrap();

    engine.mark_object_dirty(ObjectIndex(1));
    engine.mark_object_dirty(ObjectIndex(2));
    world.run_tick(&mut engine);

    {
        let state = script.lock().unwrap();
        assert_eq!(state.update_calls, 1);
        assert_eq!(
            state.updated_objects,
            vec![ObjectIndex(1), ObjectIndex(2)]
        );
    }
    assert_eq!(engine.metrics().dirty_object_batches, 1);

    // Dirtiness is consumed; the next tick dispatches nothing.
    world.run_tick(&mut engine);
    assert_eq!(script.lock().unwrap().update_calls, 1);
}

#[test]
fn declined_objects_end_up_with_no_filter() {
    let (mut engine, mut world, script) = setup_scripted();
    world.add_object(ObjectIndex(1));
    world.connect(&mut engine, ConnectionId(1));
    world.run_tick(&mut engine);

    script.lock().unwrap().reject_add = true;
    let handle = engine.filter_handle("scripted").unwrap();
    let accepted = engine
        .set_filter(&world.ctx(), ObjectIndex(1), handle, None)
        .unwrap();
    assert!(!accepted);
    assert_eq!(engine.object_filter(ObjectIndex(1)), FilterHandle::NONE);

    // The unfiltered object replicates normally.
    world.run_tick(&mut engine);
    assert!(engine.is_object_in_scope(ObjectIndex(1), ConnectionId(1)));
}

#[test]
fn sub_objects_inherit_the_root_dynamic_verdict() {
    let (mut engine, mut world, script) = setup_scripted();
    world.add_object(ObjectIndex(1));
    world.add_sub_object(ObjectIndex(1), ObjectIndex(2));
    world.connect(&mut engine, ConnectionId(1));
    world.run_tick(&mut engine);

    let handle = engine.filter_handle("scripted").unwrap();
    engine
        .set_filter(&world.ctx(), ObjectIndex(1), handle, None)
        .unwrap();

    // Subobjects cannot carry their own dynamic filter.
    let err = engine
        .set_filter(&world.ctx(), ObjectIndex(2), handle, None)
        .unwrap_err();
    assert!(matches!(
        err,
        purview_core::FilterError::SubObjectNotFilterable { .. }
    ));

    script.lock().unwrap().set_allowed(ObjectIndex(1), false);
    world.run_tick(&mut engine);
    assert!(!engine.is_object_in_scope(ObjectIndex(1), ConnectionId(1)));
    assert!(!engine.is_object_in_scope(ObjectIndex(2), ConnectionId(1)));

    script.lock().unwrap().set_allowed(ObjectIndex(1), true);
    world.run_tick(&mut engine);
    assert!(engine.is_object_in_scope(ObjectIndex(2), ConnectionId(1)));
}

/// A filter that produces no verdict at all: every member object reads
/// as filtered out, and no other object may be affected.
struct DenyAllFilter {
    members: BitSet,
}

impl ObjectFilter for DenyAllFilter {
    fn init(&mut self, params: &FilterInitParams) {
        self.members.set_num_bits(params.max_object_index);
    }

    fn add_object(&mut self, object: ObjectIndex, _params: AddObjectParams<'_>) -> bool {
        self.members.set(object.0);
        true
    }

    fn remove_object(
        &mut self,
        object: ObjectIndex,
        _info: &mut purview_filter::FilterObjectInfo,
    ) {
        self.members.clear(object.0);
    }

    fn filter(&mut self, _params: FilterParams<'_>) {}

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[test]
fn a_filter_only_speaks_for_its_own_members() {
    let (scripted, script) = ScriptedFilter::new();
    let mut engine = ScopeEngine::new(config_with(vec![
        FilterDefinition::new(
            "deny_all",
            Box::new(DenyAllFilter {
                members: BitSet::empty(),
            }),
        ),
        FilterDefinition::new("scripted", Box::new(scripted)),
    ]))
    .unwrap();
    let mut world = TestWorld::new(MAX_OBJECTS, MAX_CONNECTIONS);

    world.add_object(ObjectIndex(1));
    world.add_object(ObjectIndex(2));
    world.connect(&mut engine, ConnectionId(1));
    world.run_tick(&mut engine);

    let deny_all = engine.filter_handle("deny_all").unwrap();
    let scripted = engine.filter_handle("scripted").unwrap();
    engine
        .set_filter(&world.ctx(), ObjectIndex(1), deny_all, None)
        .unwrap();
    engine
        .set_filter(&world.ctx(), ObjectIndex(2), scripted, None)
        .unwrap();
    script.lock().unwrap().set_allowed(ObjectIndex(2), true);
    world.run_tick(&mut engine);

    // deny_all filters its member out but leaves the other filter's
    // member alone.
    assert!(!engine.is_object_in_scope(ObjectIndex(1), ConnectionId(1)));
    assert!(engine.is_object_in_scope(ObjectIndex(2), ConnectionId(1)));

    assert!(engine.objects_in_filter("deny_all").unwrap().get(1));
    assert!(engine.objects_in_filter("scripted").unwrap().get(2));
}

#[test]
fn switching_filters_moves_the_object() {
    let (scripted_a, script_a) = ScriptedFilter::new();
    let (scripted_b, script_b) = ScriptedFilter::new();
    let mut engine = ScopeEngine::new(config_with(vec![
        FilterDefinition::new("a", Box::new(scripted_a)),
        FilterDefinition::new("b", Box::new(scripted_b)),
    ]))
    .unwrap();
    let mut world = TestWorld::new(MAX_OBJECTS, MAX_CONNECTIONS);

    world.add_object(ObjectIndex(1));
    world.connect(&mut engine, ConnectionId(1));
    world.run_tick(&mut engine);

    let handle_a = engine.filter_handle("a").unwrap();
    let handle_b = engine.filter_handle("b").unwrap();
    engine
        .set_filter(&world.ctx(), ObjectIndex(1), handle_a, None)
        .unwrap();
    engine
        .set_filter(&world.ctx(), ObjectIndex(1), handle_b, None)
        .unwrap();

    assert_eq!(script_a.lock().unwrap().remove_calls, 1);
    assert_eq!(script_b.lock().unwrap().add_calls, 1);
    assert!(!engine.objects_in_filter("a").unwrap().get(1));
    assert!(engine.objects_in_filter("b").unwrap().get(1));

    // Filter B denies; the verdict now comes from B.
    script_b.lock().unwrap().set_allowed(ObjectIndex(1), false);
    world.run_tick(&mut engine);
    assert!(!engine.is_object_in_scope(ObjectIndex(1), ConnectionId(1)));
}

#[test]
fn radius_filter_scopes_by_distance() {
    let radius = RadiusFilter::new(RadiusFilterConfig { radius: 50.0 });
    let mut engine = ScopeEngine::new(config_with(vec![FilterDefinition::new(
        "radius",
        Box::new(radius),
    )]))
    .unwrap();
    let mut world = TestWorld::new(MAX_OBJECTS, MAX_CONNECTIONS);

    world.add_object(ObjectIndex(1));
    world.connect(&mut engine, ConnectionId(1));
    world.set_view_position(ConnectionId(1), [0.0, 0.0, 0.0]);
    world.run_tick(&mut engine);

    let handle = engine.filter_handle("radius").unwrap();
    engine
        .set_filter(&world.ctx(), ObjectIndex(1), handle, None)
        .unwrap();
    engine
        .filter_mut("radius")
        .unwrap()
        .as_any_mut()
        .downcast_mut::<RadiusFilter>()
        .unwrap()
        .set_object_position(ObjectIndex(1), [10.0, 0.0, 0.0]);
    world.run_tick(&mut engine);
    assert!(engine.is_object_in_scope(ObjectIndex(1), ConnectionId(1)));

    engine
        .filter_mut("radius")
        .unwrap()
        .as_any_mut()
        .downcast_mut::<RadiusFilter>()
        .unwrap()
        .set_object_position(ObjectIndex(1), [500.0, 0.0, 0.0]);
    engine.mark_object_dirty(ObjectIndex(1));
    world.run_tick(&mut engine);
    assert!(!engine.is_object_in_scope(ObjectIndex(1), ConnectionId(1)));
}

#[test]
fn zone_filter_reads_its_blob_state() {
    let zone = ZoneFilter::new();
    let mut engine = ScopeEngine::new(config_with(vec![FilterDefinition::new(
        "zone",
        Box::new(zone),
    )]))
    .unwrap();
    let mut world = TestWorld::new(MAX_OBJECTS, MAX_CONNECTIONS);

    world.add_object(ObjectIndex(1));
    world.connect(&mut engine, ConnectionId(1));
    world.run_tick(&mut engine);

    {
        let zone = engine
            .filter_mut("zone")
            .unwrap()
            .as_any_mut()
            .downcast_mut::<ZoneFilter>()
            .unwrap();
        zone.set_object_zone(ObjectIndex(1), 3);
        zone.set_connection_zone(ConnectionId(1), 3);
    }
    let handle = engine.filter_handle("zone").unwrap();
    engine
        .set_filter(&world.ctx(), ObjectIndex(1), handle, None)
        .unwrap();
    world.run_tick(&mut engine);
    assert!(engine.is_object_in_scope(ObjectIndex(1), ConnectionId(1)));

    // Move the object to another zone through the dirty-update path.
    engine
        .filter_mut("zone")
        .unwrap()
        .as_any_mut()
        .downcast_mut::<ZoneFilter>()
        .unwrap()
        .set_object_zone(ObjectIndex(1), 4);
    engine.mark_object_dirty(ObjectIndex(1));
    world.run_tick(&mut engine);
    assert!(!engine.is_object_in_scope(ObjectIndex(1), ConnectionId(1)));
}
