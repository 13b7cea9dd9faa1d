//! Exclusion, inclusion, and sub-object filter group behavior.

use purview_core::{BitSet, ConnectionId, FilterStatus, GroupHandle, ObjectIndex};
use purview_engine::{ConnectionSelection, EngineConfig, ScopeEngine};
use purview_filter::FilterDefinition;
use purview_test_utils::{ScriptHandle, ScriptedFilter, TestWorld};

const MAX_OBJECTS: u32 = 128;
const MAX_CONNECTIONS: u32 = 8;

fn setup() -> (ScopeEngine, TestWorld) {
    let config = EngineConfig {
        max_connections: MAX_CONNECTIONS,
        initial_max_objects: MAX_OBJECTS,
        ..EngineConfig::default()
    };
    (
        ScopeEngine::new(config).unwrap(),
        TestWorld::new(MAX_OBJECTS, MAX_CONNECTIONS),
    )
}

fn setup_with_filter() -> (ScopeEngine, TestWorld, ScriptHandle) {
    let (filter, script) = ScriptedFilter::new();
    let config = EngineConfig {
        max_connections: MAX_CONNECTIONS,
        initial_max_objects: MAX_OBJECTS,
        filters: vec![FilterDefinition::new("scripted", Box::new(filter))],
        ..EngineConfig::default()
    };
    (
        ScopeEngine::new(config).unwrap(),
        TestWorld::new(MAX_OBJECTS, MAX_CONNECTIONS),
        script,
    )
}

#[test]
fn exclusion_group_filters_members_out_by_default() {
    let (mut engine, mut world) = setup();
    world.add_object(ObjectIndex(1));
    world.add_sub_object(ObjectIndex(1), ObjectIndex(2));
    world.add_object(ObjectIndex(3));
    world.connect(&mut engine, ConnectionId(1));
    world.run_tick(&mut engine);

    let group = world.create_group("hidden");
    engine
        .add_exclusion_filter_group(&world.ctx(), group)
        .unwrap();
    world.add_to_group(&mut engine, group, ObjectIndex(1));
    world.run_tick(&mut engine);

    assert!(!engine.is_object_in_scope(ObjectIndex(1), ConnectionId(1)));
    assert!(!engine.is_object_in_scope(ObjectIndex(2), ConnectionId(1)));
    assert!(engine.is_object_in_scope(ObjectIndex(3), ConnectionId(1)));
}

#[test]
fn exclusion_status_allow_lifts_the_filter_per_connection() {
    let (mut engine, mut world) = setup();
    world.add_object(ObjectIndex(1));
    world.connect(&mut engine, ConnectionId(1));
    world.connect(&mut engine, ConnectionId(2));
    world.run_tick(&mut engine);

    let group = world.create_group("hidden");
    engine
        .add_exclusion_filter_group(&world.ctx(), group)
        .unwrap();
    world.add_to_group(&mut engine, group, ObjectIndex(1));
    world.run_tick(&mut engine);

    engine
        .set_group_filter_status(
            &world.ctx(),
            group,
            ConnectionSelection::One(ConnectionId(1)),
            FilterStatus::Allow,
        )
        .unwrap();
    world.run_tick(&mut engine);

    assert!(engine.is_object_in_scope(ObjectIndex(1), ConnectionId(1)));
    assert!(!engine.is_object_in_scope(ObjectIndex(1), ConnectionId(2)));
    assert_eq!(
        engine.group_filter_status(group, ConnectionId(1)),
        Some(FilterStatus::Allow)
    );
}

#[test]
fn exclusion_dominates_dynamic_allow() {
    let (mut engine, mut world, script) = setup_with_filter();
    world.add_object(ObjectIndex(1));
    world.connect(&mut engine, ConnectionId(1));
    world.run_tick(&mut engine);

    let handle = engine.filter_handle("scripted").unwrap();
    assert!(engine
        .set_filter(&world.ctx(), ObjectIndex(1), handle, None)
        .unwrap());
    script.lock().unwrap().set_allowed(ObjectIndex(1), true);

    let group = world.create_group("hidden");
    engine
        .add_exclusion_filter_group(&world.ctx(), group)
        .unwrap();
    world.add_to_group(&mut engine, group, ObjectIndex(1));
    world.run_tick(&mut engine);

    assert!(!engine.is_object_in_scope(ObjectIndex(1), ConnectionId(1)));
}

#[test]
fn new_connections_inherit_exclusion_automatically() {
    let (mut engine, mut world) = setup();
    world.add_object(ObjectIndex(1));
    world.connect(&mut engine, ConnectionId(1));
    world.run_tick(&mut engine);

    let group = world.create_group("hidden");
    engine
        .add_exclusion_filter_group(&world.ctx(), group)
        .unwrap();
    world.add_to_group(&mut engine, group, ObjectIndex(1));
    world.run_tick(&mut engine);

    world.connect(&mut engine, ConnectionId(2));
    world.run_tick(&mut engine);
    assert!(!engine.is_object_in_scope(ObjectIndex(1), ConnectionId(2)));
}

#[test]
fn member_removal_takes_effect_immediately_next_tick() {
    let (mut engine, mut world) = setup();
    world.add_object(ObjectIndex(1));
    world.connect(&mut engine, ConnectionId(1));
    world.run_tick(&mut engine);

    let group = world.create_group("hidden");
    engine
        .add_exclusion_filter_group(&world.ctx(), group)
        .unwrap();
    world.add_to_group(&mut engine, group, ObjectIndex(1));
    world.run_tick(&mut engine);
    assert!(!engine.is_object_in_scope(ObjectIndex(1), ConnectionId(1)));

    world.remove_from_group(&mut engine, group, ObjectIndex(1));
    world.run_tick(&mut engine);
    assert!(engine.is_object_in_scope(ObjectIndex(1), ConnectionId(1)));
}

#[test]
fn overlapping_exclusion_groups_keep_objects_filtered() {
    let (mut engine, mut world) = setup();
    world.add_object(ObjectIndex(1));
    world.connect(&mut engine, ConnectionId(1));
    world.run_tick(&mut engine);

    let group_a = world.create_group("a");
    let group_b = world.create_group("b");
    engine
        .add_exclusion_filter_group(&world.ctx(), group_a)
        .unwrap();
    engine
        .add_exclusion_filter_group(&world.ctx(), group_b)
        .unwrap();
    world.add_to_group(&mut engine, group_a, ObjectIndex(1));
    world.add_to_group(&mut engine, group_b, ObjectIndex(1));
    world.run_tick(&mut engine);
    assert!(!engine.is_object_in_scope(ObjectIndex(1), ConnectionId(1)));

    // Leaving one group is not enough while the other still excludes.
    world.remove_from_group(&mut engine, group_a, ObjectIndex(1));
    world.run_tick(&mut engine);
    assert!(!engine.is_object_in_scope(ObjectIndex(1), ConnectionId(1)));

    world.remove_from_group(&mut engine, group_b, ObjectIndex(1));
    world.run_tick(&mut engine);
    assert!(engine.is_object_in_scope(ObjectIndex(1), ConnectionId(1)));
}

#[test]
fn removing_the_group_filter_restores_members() {
    let (mut engine, mut world) = setup();
    world.add_object(ObjectIndex(1));
    world.connect(&mut engine, ConnectionId(1));
    world.run_tick(&mut engine);

    let group = world.create_group("hidden");
    engine
        .add_exclusion_filter_group(&world.ctx(), group)
        .unwrap();
    world.add_to_group(&mut engine, group, ObjectIndex(1));
    world.run_tick(&mut engine);
    assert!(!engine.is_object_in_scope(ObjectIndex(1), ConnectionId(1)));

    engine.remove_group_filter(&world.ctx(), group).unwrap();
    world.run_tick(&mut engine);
    assert!(engine.is_object_in_scope(ObjectIndex(1), ConnectionId(1)));
    assert_eq!(engine.group_filter_status(group, ConnectionId(1)), None);
}

#[test]
fn inclusion_overrides_dynamic_deny_but_not_static_filters() {
    let (mut engine, mut world, script) = setup_with_filter();
    world.add_object(ObjectIndex(1));
    world.add_object(ObjectIndex(2));
    world.connect(&mut engine, ConnectionId(1));
    world.run_tick(&mut engine);

    // Object 1: dynamically denied, then force-included.
    let handle = engine.filter_handle("scripted").unwrap();
    assert!(engine
        .set_filter(&world.ctx(), ObjectIndex(1), handle, None)
        .unwrap());
    script.lock().unwrap().set_allowed(ObjectIndex(1), false);

    // Object 2: statically denied for everyone.
    engine.set_connection_filter(
        ObjectIndex(2),
        &BitSet::new(MAX_CONNECTIONS + 1),
        FilterStatus::Allow,
    );

    let group = world.create_group("vip");
    engine
        .add_inclusion_filter_group(&world.ctx(), group)
        .unwrap();
    world.add_to_group(&mut engine, group, ObjectIndex(1));
    world.add_to_group(&mut engine, group, ObjectIndex(2));
    engine
        .set_group_filter_status(
            &world.ctx(),
            group,
            ConnectionSelection::One(ConnectionId(1)),
            FilterStatus::Allow,
        )
        .unwrap();
    world.run_tick(&mut engine);

    // Dynamic deny overridden; static deny untouched.
    assert!(engine.is_object_in_scope(ObjectIndex(1), ConnectionId(1)));
    assert!(!engine.is_object_in_scope(ObjectIndex(2), ConnectionId(1)));
}

#[test]
fn dropping_inclusion_restores_the_dynamic_verdict() {
    let (mut engine, mut world, script) = setup_with_filter();
    world.add_object(ObjectIndex(1));
    world.connect(&mut engine, ConnectionId(1));
    world.run_tick(&mut engine);

    let handle = engine.filter_handle("scripted").unwrap();
    assert!(engine
        .set_filter(&world.ctx(), ObjectIndex(1), handle, None)
        .unwrap());
    script.lock().unwrap().set_allowed(ObjectIndex(1), false);

    let group = world.create_group("vip");
    engine
        .add_inclusion_filter_group(&world.ctx(), group)
        .unwrap();
    world.add_to_group(&mut engine, group, ObjectIndex(1));
    engine
        .set_group_filter_status(
            &world.ctx(),
            group,
            ConnectionSelection::One(ConnectionId(1)),
            FilterStatus::Allow,
        )
        .unwrap();
    world.run_tick(&mut engine);
    assert!(engine.is_object_in_scope(ObjectIndex(1), ConnectionId(1)));

    engine
        .set_group_filter_status(
            &world.ctx(),
            group,
            ConnectionSelection::One(ConnectionId(1)),
            FilterStatus::Disallow,
        )
        .unwrap();
    world.run_tick(&mut engine);
    assert!(!engine.is_object_in_scope(ObjectIndex(1), ConnectionId(1)));
}

#[test]
fn group_status_mask_applies_opposite_status_to_unlisted() {
    let (mut engine, mut world) = setup();
    world.add_object(ObjectIndex(1));
    world.connect(&mut engine, ConnectionId(1));
    world.connect(&mut engine, ConnectionId(2));
    world.run_tick(&mut engine);

    let group = world.create_group("hidden");
    engine
        .add_exclusion_filter_group(&world.ctx(), group)
        .unwrap();
    world.add_to_group(&mut engine, group, ObjectIndex(1));
    world.run_tick(&mut engine);

    let mut listed = BitSet::new(MAX_CONNECTIONS + 1);
    listed.set(1);
    engine
        .set_group_filter_status(
            &world.ctx(),
            group,
            ConnectionSelection::Mask(&listed),
            FilterStatus::Allow,
        )
        .unwrap();
    world.run_tick(&mut engine);

    assert!(engine.is_object_in_scope(ObjectIndex(1), ConnectionId(1)));
    assert!(!engine.is_object_in_scope(ObjectIndex(1), ConnectionId(2)));
}

#[test]
fn reserved_and_foreign_groups_are_rejected() {
    let (mut engine, mut world) = setup();
    let err = engine
        .add_exclusion_filter_group(&world.ctx(), GroupHandle::RESERVED)
        .unwrap_err();
    assert!(matches!(err, purview_core::FilterError::ReservedGroup { .. }));

    let err = engine
        .add_exclusion_filter_group(&world.ctx(), GroupHandle(17))
        .unwrap_err();
    assert!(matches!(err, purview_core::FilterError::InvalidGroup { .. }));

    let group = world.create_group("once");
    engine
        .add_exclusion_filter_group(&world.ctx(), group)
        .unwrap();
    let err = engine
        .add_inclusion_filter_group(&world.ctx(), group)
        .unwrap_err();
    assert!(matches!(
        err,
        purview_core::FilterError::GroupAlreadyFiltering { .. }
    ));
}

#[test]
fn disconnect_resets_group_status_to_default() {
    let (mut engine, mut world) = setup();
    world.add_object(ObjectIndex(1));
    world.connect(&mut engine, ConnectionId(1));
    world.connect(&mut engine, ConnectionId(2));
    world.run_tick(&mut engine);

    let group = world.create_group("hidden");
    engine
        .add_exclusion_filter_group(&world.ctx(), group)
        .unwrap();
    world.add_to_group(&mut engine, group, ObjectIndex(1));
    engine
        .set_group_filter_status(
            &world.ctx(),
            group,
            ConnectionSelection::One(ConnectionId(2)),
            FilterStatus::Allow,
        )
        .unwrap();
    world.run_tick(&mut engine);
    assert!(engine.is_object_in_scope(ObjectIndex(1), ConnectionId(2)));

    world.disconnect(&mut engine, ConnectionId(2));
    world.run_tick(&mut engine);

    // A fresh connection reusing the id starts from the default status.
    world.connect(&mut engine, ConnectionId(2));
    world.run_tick(&mut engine);
    assert!(!engine.is_object_in_scope(ObjectIndex(1), ConnectionId(2)));
}

#[test]
fn subobject_filter_groups_gate_per_connection() {
    let (mut engine, mut world) = setup();
    world.connect(&mut engine, ConnectionId(1));
    world.run_tick(&mut engine);

    let group = world.create_group("attachments");
    engine.add_subobject_filter(&world.ctx(), group).unwrap();
    assert_eq!(
        engine.subobject_filter_status(group, ConnectionId(1)),
        Some(FilterStatus::Disallow)
    );

    engine
        .set_subobject_filter_status(group, ConnectionId(1), FilterStatus::Allow)
        .unwrap();
    assert_eq!(
        engine.subobject_filter_status(group, ConnectionId(1)),
        Some(FilterStatus::Allow)
    );
}

#[test]
fn empty_subobject_filter_groups_are_collected() {
    let (mut engine, mut world) = setup();
    world.connect(&mut engine, ConnectionId(1));
    world.run_tick(&mut engine);

    let group = world.create_group("attachments");
    engine.add_subobject_filter(&world.ctx(), group).unwrap();
    engine
        .set_subobject_filter_status(group, ConnectionId(1), FilterStatus::Allow)
        .unwrap();
    world.run_tick(&mut engine);
    assert!(engine.take_retired_groups().is_empty());

    // No members and no allowing connection: collectable.
    engine
        .set_subobject_filter_status(group, ConnectionId(1), FilterStatus::Disallow)
        .unwrap();
    world.run_tick(&mut engine);

    assert_eq!(engine.take_retired_groups(), vec![group]);
    assert_eq!(engine.subobject_filter_status(group, ConnectionId(1)), None);
}
