//! Test utilities and mock collaborators for Purview development.
//!
//! Provides [`TestWorld`], an in-memory implementation of the three
//! registry contracts the engine consumes, and [`ScriptedFilter`], a
//! dynamic filter whose verdicts are driven from the outside through a
//! shared [`ScriptHandle`].

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use purview_core::{
    BitSet, ConnectionId, ConnectionRegistry, GroupHandle, GroupRegistry, ObjectIndex,
    ObjectRegistry, ReplicationView, WorldContext,
};
use purview_engine::ScopeEngine;
use purview_filter::{
    AddObjectParams, FilterInitParams, FilterObjectInfo, FilterParams, FilterTraits, ObjectFilter,
    PreFilterParams, UpdateObjectsParams,
};

// ── TestWorld ──────────────────────────────────────────────────────

struct GroupRecord {
    exists: bool,
    name: String,
    members: Vec<ObjectIndex>,
}

/// In-memory object, connection, and group registries for tests.
///
/// Object index 0 and connection id 0 are reserved, matching the
/// engine's index space. The world tracks current and previous frame
/// scopable sets; [`run_tick`](TestWorld::run_tick) executes one engine
/// tick and then promotes the current set to the previous one.
pub struct TestWorld {
    max_object_index: u32,
    current_scopable: BitSet,
    prev_scopable: BitSet,
    sub_object_indices: BitSet,
    dependent_indices: BitSet,
    sub_objects: Vec<Vec<ObjectIndex>>,
    roots: Vec<Option<ObjectIndex>>,
    parents: Vec<Vec<ObjectIndex>>,
    groups: Vec<GroupRecord>,
    object_groups: Vec<Vec<GroupHandle>>,
    max_connections: u32,
    valid_connections: BitSet,
    views: Vec<ReplicationView>,
}

impl TestWorld {
    pub fn new(max_object_index: u32, max_connections: u32) -> Self {
        Self {
            max_object_index,
            current_scopable: BitSet::new(max_object_index),
            prev_scopable: BitSet::new(max_object_index),
            sub_object_indices: BitSet::new(max_object_index),
            dependent_indices: BitSet::new(max_object_index),
            sub_objects: (0..max_object_index).map(|_| Vec::new()).collect(),
            roots: vec![None; max_object_index as usize],
            parents: (0..max_object_index).map(|_| Vec::new()).collect(),
            groups: Vec::new(),
            object_groups: (0..max_object_index).map(|_| Vec::new()).collect(),
            max_connections,
            valid_connections: BitSet::new(max_connections + 1),
            views: vec![ReplicationView::empty(); max_connections as usize + 1],
        }
    }

    /// Bundles the registries for one engine call.
    pub fn ctx(&self) -> WorldContext<'_> {
        WorldContext {
            objects: self,
            connections: self,
            groups: self,
        }
    }

    /// Executes one engine tick against this world, then promotes the
    /// current scopable set to the previous-frame set.
    pub fn run_tick(&mut self, engine: &mut ScopeEngine) {
        engine.execute_tick(&self.ctx());
        self.prev_scopable.copy_from(&self.current_scopable);
    }

    // Object management.

    /// Makes `object` scopable this frame.
    pub fn add_object(&mut self, object: ObjectIndex) {
        self.current_scopable.set(object.0);
    }

    /// Removes `object` (and its subobjects) from the scopable set.
    pub fn remove_object(&mut self, object: ObjectIndex) {
        self.current_scopable.clear(object.0);
        let subs = self.sub_objects[object.0 as usize].clone();
        for sub in subs {
            self.current_scopable.clear(sub.0);
        }
    }

    /// Adds `sub` as a scopable subobject of `root`.
    pub fn add_sub_object(&mut self, root: ObjectIndex, sub: ObjectIndex) {
        self.current_scopable.set(sub.0);
        self.sub_object_indices.set(sub.0);
        self.sub_objects[root.0 as usize].push(sub);
        self.roots[sub.0 as usize] = Some(root);
    }

    /// Declares `child` dependent on `parent`.
    pub fn add_dependency(&mut self, child: ObjectIndex, parent: ObjectIndex) {
        self.parents[child.0 as usize].push(parent);
        self.dependent_indices.set(child.0);
    }

    /// Removes the `child` → `parent` dependency edge.
    pub fn remove_dependency(&mut self, child: ObjectIndex, parent: ObjectIndex) {
        self.parents[child.0 as usize].retain(|p| *p != parent);
        if self.parents[child.0 as usize].is_empty() {
            self.dependent_indices.clear(child.0);
        }
    }

    // Connection management.

    /// Marks `connection` valid in the registry and registers it with
    /// the engine.
    pub fn connect(&mut self, engine: &mut ScopeEngine, connection: ConnectionId) {
        self.valid_connections.set(connection.0);
        engine
            .add_connection(connection)
            .expect("test connection id out of range");
    }

    /// Invalidates `connection` and retires it from the engine.
    pub fn disconnect(&mut self, engine: &mut ScopeEngine, connection: ConnectionId) {
        self.valid_connections.clear(connection.0);
        engine
            .remove_connection(connection)
            .expect("test connection id out of range");
    }

    /// Places the single viewer of `connection` at `position`.
    pub fn set_view_position(&mut self, connection: ConnectionId, position: [f32; 3]) {
        self.views[connection.0 as usize] = ReplicationView::from_position(position);
    }

    // Group management.

    /// Creates a group in the registry and returns its handle.
    pub fn create_group(&mut self, name: &str) -> GroupHandle {
        // Index 0 is reserved.
        if self.groups.is_empty() {
            self.groups.push(GroupRecord {
                exists: false,
                name: String::new(),
                members: Vec::new(),
            });
        }
        let index = self.groups.len() as u16;
        self.groups.push(GroupRecord {
            exists: true,
            name: name.to_string(),
            members: Vec::new(),
        });
        GroupHandle(index)
    }

    /// Destroys a group, dropping its membership records.
    pub fn destroy_group(&mut self, group: GroupHandle) {
        if let Some(record) = self.groups.get_mut(group.index()) {
            record.exists = false;
            let members = std::mem::take(&mut record.members);
            for member in members {
                self.object_groups[member.0 as usize].retain(|g| *g != group);
            }
        }
    }

    /// Current members of `group`.
    pub fn group_members(&self, group: GroupHandle) -> &[ObjectIndex] {
        self.groups
            .get(group.index())
            .map(|record| record.members.as_slice())
            .unwrap_or(&[])
    }

    /// Adds `object` to `group` in the registry and notifies `engine`.
    pub fn add_to_group(
        &mut self,
        engine: &mut ScopeEngine,
        group: GroupHandle,
        object: ObjectIndex,
    ) {
        self.groups[group.index()].members.push(object);
        self.object_groups[object.0 as usize].push(group);
        engine.notify_object_added_to_group(group, object);
    }

    /// Removes `object` from `group` in the registry and notifies
    /// `engine` afterwards, as the contract requires.
    pub fn remove_from_group(
        &mut self,
        engine: &mut ScopeEngine,
        group: GroupHandle,
        object: ObjectIndex,
    ) {
        self.groups[group.index()].members.retain(|m| *m != object);
        self.object_groups[object.0 as usize].retain(|g| *g != group);
        engine.notify_object_removed_from_group(&self.ctx(), group, object);
    }
}

impl ObjectRegistry for TestWorld {
    fn max_object_index(&self) -> u32 {
        self.max_object_index
    }

    fn current_scopable(&self) -> &BitSet {
        &self.current_scopable
    }

    fn prev_scopable(&self) -> &BitSet {
        &self.prev_scopable
    }

    fn sub_objects(&self, root: ObjectIndex) -> &[ObjectIndex] {
        &self.sub_objects[root.0 as usize]
    }

    fn root_of(&self, object: ObjectIndex) -> Option<ObjectIndex> {
        self.roots[object.0 as usize]
    }

    fn sub_object_indices(&self) -> &BitSet {
        &self.sub_object_indices
    }

    fn dependent_parents(&self, object: ObjectIndex) -> &[ObjectIndex] {
        &self.parents[object.0 as usize]
    }

    fn dependent_indices(&self) -> &BitSet {
        &self.dependent_indices
    }
}

impl ConnectionRegistry for TestWorld {
    fn max_connection_count(&self) -> u32 {
        self.max_connections
    }

    fn is_valid(&self, connection: ConnectionId) -> bool {
        self.valid_connections.get(connection.0)
    }

    fn view(&self, connection: ConnectionId) -> &ReplicationView {
        &self.views[connection.0 as usize]
    }
}

impl GroupRegistry for TestWorld {
    fn is_valid_group(&self, group: GroupHandle) -> bool {
        self.groups
            .get(group.index())
            .map(|record| record.exists)
            .unwrap_or(false)
    }

    fn members_of(&self, group: GroupHandle) -> &[ObjectIndex] {
        self.groups
            .get(group.index())
            .map(|record| record.members.as_slice())
            .unwrap_or(&[])
    }

    fn groups_of(&self, object: ObjectIndex) -> &[GroupHandle] {
        &self.object_groups[object.0 as usize]
    }

    fn group_name(&self, group: GroupHandle) -> Option<&str> {
        self.groups
            .get(group.index())
            .filter(|record| record.exists)
            .map(|record| record.name.as_str())
    }
}

// ── ScriptedFilter ─────────────────────────────────────────────────

/// Externally scriptable verdict state for a [`ScriptedFilter`].
#[derive(Default)]
pub struct ScriptState {
    /// Per-object verdict; objects without an entry default to allowed.
    allowed: HashMap<u32, bool>,
    /// Per-connection override, keyed by `(connection, object)`.
    per_connection: HashMap<(u32, u32), bool>,
    /// When set, `add_object` declines new members.
    pub reject_add: bool,
    pub add_calls: u32,
    pub remove_calls: u32,
    pub update_calls: u32,
    pub updated_objects: Vec<ObjectIndex>,
    pub pre_filter_calls: u32,
    pub post_filter_calls: u32,
}

impl ScriptState {
    /// Sets the verdict for `object` on every connection.
    pub fn set_allowed(&mut self, object: ObjectIndex, allowed: bool) {
        self.allowed.insert(object.0, allowed);
    }

    /// Overrides the verdict for `object` on one connection.
    pub fn set_allowed_for(&mut self, connection: ConnectionId, object: ObjectIndex, allowed: bool) {
        self.per_connection.insert((connection.0, object.0), allowed);
    }

    fn verdict(&self, connection: u32, object: u32) -> bool {
        self.per_connection
            .get(&(connection, object))
            .or_else(|| self.allowed.get(&object))
            .copied()
            .unwrap_or(true)
    }
}

/// Shared handle through which tests drive a [`ScriptedFilter`] that is
/// already owned by the engine.
pub type ScriptHandle = Arc<Mutex<ScriptState>>;

/// A dynamic filter whose verdicts come from a [`ScriptState`].
///
/// Declares the `needs_update` trait so the batched dirty-object path
/// is exercised; every protocol call is counted on the script state for
/// assertions.
pub struct ScriptedFilter {
    members: BitSet,
    state: ScriptHandle,
}

impl ScriptedFilter {
    /// Creates a filter and the handle that scripts it.
    pub fn new() -> (Self, ScriptHandle) {
        let state: ScriptHandle = Arc::default();
        (
            Self {
                members: BitSet::empty(),
                state: Arc::clone(&state),
            },
            state,
        )
    }
}

impl ObjectFilter for ScriptedFilter {
    fn init(&mut self, params: &FilterInitParams) {
        self.members.set_num_bits(params.max_object_index);
    }

    fn traits(&self) -> FilterTraits {
        FilterTraits {
            needs_update: true,
            spatial: false,
        }
    }

    fn on_max_object_index_increased(&mut self, new_max: u32) {
        self.members.set_num_bits(new_max);
    }

    fn add_object(&mut self, object: ObjectIndex, _params: AddObjectParams<'_>) -> bool {
        let mut state = self.state.lock().unwrap();
        state.add_calls += 1;
        if state.reject_add {
            return false;
        }
        self.members.set(object.0);
        true
    }

    fn remove_object(&mut self, object: ObjectIndex, _info: &mut FilterObjectInfo) {
        self.members.clear(object.0);
        self.state.lock().unwrap().remove_calls += 1;
    }

    fn update_objects(&mut self, params: UpdateObjectsParams<'_>) {
        let mut state = self.state.lock().unwrap();
        state.update_calls += 1;
        state.updated_objects.extend_from_slice(params.objects);
    }

    fn pre_filter(&mut self, _params: PreFilterParams<'_>) {
        self.state.lock().unwrap().pre_filter_calls += 1;
    }

    fn filter(&mut self, params: FilterParams<'_>) {
        let state = self.state.lock().unwrap();
        let mut allowed = std::mem::take(params.allowed);
        self.members.for_each_set(|object| {
            if state.verdict(params.connection.0, object) {
                allowed.set(object);
            }
        });
        *params.allowed = allowed;
    }

    fn post_filter(&mut self) {
        self.state.lock().unwrap().post_filter_calls += 1;
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}
