//! The [`ScopeEngine`] state block, lifecycle, queries, and the
//! per-tick pipeline entry point.

use std::time::Instant;

use indexmap::IndexMap;
use log::debug;

use purview_core::{
    BitSet, ConnectionId, FilterError, FilterHandle, GroupHandle, ObjectIndex, WorldContext,
};
use purview_filter::{FilterInitParams, FilterObjectInfo, FilterTraits, ObjectFilter};
use purview_mask::{MaskHandle, MaskPool};

use crate::config::EngineConfig;
use crate::connection::ConnectionState;
use crate::hysteresis::HysteresisState;
use crate::metrics::FilterMetrics;

/// Sentinel in the per-object filter index array: no dynamic filter.
pub(crate) const INVALID_FILTER_INDEX: u8 = u8::MAX;

/// One registered dynamic filter and its engine-side bookkeeping.
pub(crate) struct FilterSlot {
    pub name: String,
    pub filter: Box<dyn ObjectFilter>,
    pub traits: FilterTraits,
    pub object_count: u32,
    /// Member objects of this filter; the merge pass masks verdicts by
    /// this set so a filter can only speak for objects it owns.
    pub members: BitSet,
}

/// The per-tick scope computation engine.
///
/// One engine instance serves one replication domain. Construct it with
/// [`new`](Self::new), feed it connection and object lifecycle events,
/// and call [`execute_tick`](Self::execute_tick) once per server tick;
/// afterwards [`is_object_in_scope`](Self::is_object_in_scope) and
/// [`relevant_objects`](Self::relevant_objects) describe the tick's
/// result until the next call.
pub struct ScopeEngine {
    // Configuration.
    pub(crate) max_connection_count: u32,
    pub(crate) cull_non_relevant: bool,
    pub(crate) validate_scope_consistency_enabled: bool,
    pub(crate) default_hysteresis_frames: u8,
    pub(crate) hysteresis_profiles: IndexMap<String, u8>,

    pub(crate) frame_index: u64,
    pub(crate) max_object_index: u32,

    // Stage gating flags.
    pub(crate) has_new_connection: bool,
    pub(crate) has_removed_connection: bool,
    pub(crate) has_dirty_owner: bool,
    pub(crate) has_dirty_connection_filter: bool,
    pub(crate) has_dirty_exclusion_group: bool,
    pub(crate) has_dirty_inclusion_group: bool,
    pub(crate) has_filters_with_update_trait: bool,

    // Connections.
    pub(crate) valid_connections: BitSet,
    pub(crate) new_connections: BitSet,
    pub(crate) connections: Vec<ConnectionState>,

    // Per-object static filter state.
    pub(crate) objects_with_dirty_owner: BitSet,
    pub(crate) objects_with_dirty_connection_filter: BitSet,
    pub(crate) objects_with_owner_filter: BitSet,
    pub(crate) objects_with_connection_mask: BitSet,
    pub(crate) all_connection_filtered: BitSet,
    pub(crate) dynamic_filter_enabled: BitSet,
    pub(crate) objects_requiring_dynamic_update: BitSet,
    pub(crate) dirty_objects: BitSet,
    pub(crate) object_owner: Vec<u16>,
    pub(crate) object_mask_handles: Vec<MaskHandle>,
    pub(crate) object_filter_index: Vec<u8>,
    pub(crate) hysteresis_frame_counts: Vec<u8>,
    pub(crate) filter_object_infos: Vec<FilterObjectInfo>,

    // Mask pool shared by connection filters and group filters.
    pub(crate) mask_pool: MaskPool,

    // Group filter state, indexed by group index.
    pub(crate) group_state: Vec<MaskHandle>,
    pub(crate) exclusion_groups: BitSet,
    pub(crate) inclusion_groups: BitSet,
    pub(crate) dirty_exclusion_groups: BitSet,
    pub(crate) dirty_inclusion_groups: BitSet,
    pub(crate) subobject_groups: BitSet,
    pub(crate) dirty_subobject_groups: BitSet,
    pub(crate) retired_groups: Vec<GroupHandle>,

    // Dynamic filters.
    pub(crate) filters: Vec<FilterSlot>,
    pub(crate) scratch_allowed: BitSet,

    // Hysteresis.
    pub(crate) hysteresis: HysteresisState,

    // Output.
    pub(crate) relevant_objects: BitSet,
    pub(crate) metrics: FilterMetrics,
}

impl ScopeEngine {
    /// Constructs an engine from `config`, consuming the registered
    /// filter definitions and calling
    /// [`init`](purview_filter::ObjectFilter::init) on each filter.
    pub fn new(mut config: EngineConfig) -> Result<Self, crate::config::ConfigError> {
        config.validate()?;

        let definitions = std::mem::take(&mut config.filters);
        let num_objects = config.initial_max_objects;
        let connection_slots = config.max_connections + 1;
        let group_slots = config.max_groups as u32;

        let init_params = FilterInitParams {
            max_object_index: num_objects,
            max_connection_count: config.max_connections,
        };
        let mut filters = Vec::with_capacity(definitions.len());
        let mut has_filters_with_update_trait = false;
        for definition in definitions {
            let mut filter = definition.filter;
            filter.init(&init_params);
            let traits = filter.traits();
            has_filters_with_update_trait |= traits.needs_update;
            filters.push(FilterSlot {
                name: definition.name,
                filter,
                traits,
                object_count: 0,
                members: BitSet::new(num_objects),
            });
        }

        let hysteresis_profiles = config
            .hysteresis
            .profiles
            .iter()
            .map(|p| (p.name.clone(), p.frame_count))
            .collect();

        Ok(Self {
            max_connection_count: config.max_connections,
            cull_non_relevant: config.cull_non_relevant,
            validate_scope_consistency_enabled: config.validate_scope_consistency,
            default_hysteresis_frames: config.hysteresis.default_frame_count,
            hysteresis_profiles,

            frame_index: 0,
            max_object_index: num_objects,

            has_new_connection: false,
            has_removed_connection: false,
            has_dirty_owner: false,
            has_dirty_connection_filter: false,
            has_dirty_exclusion_group: false,
            has_dirty_inclusion_group: false,
            has_filters_with_update_trait,

            valid_connections: BitSet::new(connection_slots),
            new_connections: BitSet::new(connection_slots),
            connections: (0..connection_slots)
                .map(|_| ConnectionState::default())
                .collect(),

            objects_with_dirty_owner: BitSet::new(num_objects),
            objects_with_dirty_connection_filter: BitSet::new(num_objects),
            objects_with_owner_filter: BitSet::new(num_objects),
            objects_with_connection_mask: BitSet::new(num_objects),
            all_connection_filtered: BitSet::new(num_objects),
            dynamic_filter_enabled: BitSet::new(num_objects),
            objects_requiring_dynamic_update: BitSet::new(num_objects),
            dirty_objects: BitSet::new(num_objects),
            object_owner: vec![0; num_objects as usize],
            object_mask_handles: vec![MaskHandle::INVALID; num_objects as usize],
            object_filter_index: vec![INVALID_FILTER_INDEX; num_objects as usize],
            hysteresis_frame_counts: vec![0; num_objects as usize],
            filter_object_infos: vec![FilterObjectInfo::default(); num_objects as usize],

            mask_pool: MaskPool::new(config.max_connections),

            group_state: vec![MaskHandle::INVALID; group_slots as usize],
            exclusion_groups: BitSet::new(group_slots),
            inclusion_groups: BitSet::new(group_slots),
            dirty_exclusion_groups: BitSet::new(group_slots),
            dirty_inclusion_groups: BitSet::new(group_slots),
            subobject_groups: BitSet::new(group_slots),
            dirty_subobject_groups: BitSet::new(group_slots),
            retired_groups: Vec::new(),

            filters,
            scratch_allowed: BitSet::new(num_objects),

            hysteresis: HysteresisState::new(&config.hysteresis, num_objects),

            relevant_objects: BitSet::new(num_objects),
            metrics: FilterMetrics::default(),
        })
    }

    /// Tears the engine down, giving every dynamic filter its
    /// [`deinit`](purview_filter::ObjectFilter::deinit) call and
    /// releasing per-connection storage.
    pub fn deinit(&mut self) {
        for slot in &mut self.filters {
            slot.filter.deinit();
        }
        for state in &mut self.connections {
            state.reset();
        }
        self.valid_connections.clear_all();
        self.new_connections.clear_all();
    }

    // ── Connection lifecycle ───────────────────────────────────────

    /// Registers a newly valid connection. Its full scope is computed
    /// from current global state during the next tick.
    pub fn add_connection(&mut self, connection: ConnectionId) -> Result<(), FilterError> {
        self.check_connection_range(connection)?;
        self.has_new_connection = true;
        self.valid_connections.set(connection.0);
        self.new_connections.set(connection.0);
        self.connections[connection.0 as usize].init(self.max_object_index);
        for slot in &mut self.filters {
            slot.filter.add_connection(connection);
        }
        self.metrics.connections_initialized += 1;
        debug!("scope engine: connection {connection} added");
        Ok(())
    }

    /// Retires a disconnected connection, releasing its scope state and
    /// reverting its sub-object filter group statuses.
    pub fn remove_connection(&mut self, connection: ConnectionId) -> Result<(), FilterError> {
        self.check_connection_range(connection)?;
        self.has_removed_connection = true;
        self.valid_connections.clear(connection.0);
        // The connection may go away before it was ever initialized.
        self.new_connections.clear(connection.0);
        self.connections[connection.0 as usize].reset();
        for slot in &mut self.filters {
            slot.filter.remove_connection(connection);
        }
        for group_index in self.subobject_groups.to_indices() {
            let handle = self.group_state[group_index as usize];
            self.mask_pool
                .set_status(handle, connection, purview_core::FilterStatus::Disallow);
            self.dirty_subobject_groups.set(group_index);
        }
        debug!("scope engine: connection {connection} removed");
        Ok(())
    }

    fn check_connection_range(&mut self, connection: ConnectionId) -> Result<(), FilterError> {
        if !connection.is_valid() || connection.0 > self.max_connection_count {
            self.metrics.rejected_mutations += 1;
            log::warn!("scope engine: connection {connection} is out of range");
            return Err(FilterError::InvalidConnection { connection });
        }
        Ok(())
    }

    // ── Object index space ─────────────────────────────────────────

    /// Grows every per-object list to cover `new_max` indices. Called
    /// automatically by [`execute_tick`](Self::execute_tick) when the
    /// object registry reports a larger bound.
    pub fn on_max_object_index_increased(&mut self, new_max: u32) {
        if new_max <= self.max_object_index {
            return;
        }
        self.max_object_index = new_max;

        self.objects_with_dirty_owner.set_num_bits(new_max);
        self.objects_with_dirty_connection_filter.set_num_bits(new_max);
        self.objects_with_owner_filter.set_num_bits(new_max);
        self.objects_with_connection_mask.set_num_bits(new_max);
        self.all_connection_filtered.set_num_bits(new_max);
        self.dynamic_filter_enabled.set_num_bits(new_max);
        self.objects_requiring_dynamic_update.set_num_bits(new_max);
        self.dirty_objects.set_num_bits(new_max);
        self.scratch_allowed.set_num_bits(new_max);
        self.relevant_objects.set_num_bits(new_max);

        self.object_owner.resize(new_max as usize, 0);
        self.object_mask_handles
            .resize(new_max as usize, MaskHandle::INVALID);
        self.object_filter_index
            .resize(new_max as usize, INVALID_FILTER_INDEX);
        self.hysteresis_frame_counts.resize(new_max as usize, 0);
        self.filter_object_infos
            .resize(new_max as usize, FilterObjectInfo::default());

        self.hysteresis.resize(new_max);

        for connection in self.valid_connections.to_indices() {
            self.connections[connection as usize].resize(new_max);
        }
        for slot in &mut self.filters {
            slot.members.set_num_bits(new_max);
            slot.filter.on_max_object_index_increased(new_max);
        }
    }

    /// The object registry freed these indices; owner records are
    /// cleared immediately so recycled indices start unowned.
    pub fn on_object_indices_freed(&mut self, indices: &[ObjectIndex]) {
        for index in indices {
            self.object_owner[index.0 as usize] = 0;
        }
    }

    // ── Dirty-object and dependent notifications ───────────────────

    /// Marks an object's replicated state dirty; filters with the
    /// `needs_update` trait receive it in the next tick's batched
    /// [`update_objects`](purview_filter::ObjectFilter::update_objects).
    pub fn mark_object_dirty(&mut self, object: ObjectIndex) {
        self.dirty_objects.set(object.0);
    }

    /// An object gained a dependent-parent edge; it must be
    /// re-evaluated by the dynamic pass.
    pub fn notify_added_dependent_object(&mut self, object: ObjectIndex) {
        if !self.dynamic_filter_enabled.get(object.0) {
            debug!(
                "scope engine: object {object} has no dynamic filter; a dependency on it will not change when it replicates"
            );
        }
        self.objects_requiring_dynamic_update.set(object.0);
    }

    /// An object lost a dependent-parent edge; it must be re-evaluated
    /// by the dynamic pass.
    pub fn notify_removed_dependent_object(&mut self, object: ObjectIndex) {
        self.objects_requiring_dynamic_update.set(object.0);
    }

    // ── Per-tick entry point ───────────────────────────────────────

    /// Runs the full filtering pipeline for one tick.
    ///
    /// Stage order is fixed: retired connections, new connections,
    /// added/removed object reconciliation, group exclusion, group
    /// inclusion, owner/connection filters, sub-object group collection,
    /// hysteresis pre-pass, dynamic filtering (or a direct copy of the
    /// pre-dynamic scope when no filters are registered), and finally
    /// the global relevant-object union. Each stage is a no-op if its
    /// dirty flag is clear.
    pub fn execute_tick(&mut self, world: &WorldContext<'_>) {
        let tick_start = Instant::now();
        self.frame_index += 1;

        let world_max = world.objects.max_object_index();
        if world_max > self.max_object_index {
            self.on_max_object_index_increased(world_max);
        }

        self.reset_removed_connections();
        self.init_new_connections(world);
        self.update_objects_in_scope(world);
        self.update_group_exclusion_filtering(world);
        self.update_group_inclusion_filtering(world);
        self.update_owner_and_connection_filtering(world);
        self.update_subobject_filters(world);
        self.pre_update_hysteresis();

        if self.filters.is_empty() {
            // The dynamic pass is responsible for producing the final
            // scope; without filters the pre-dynamic scope is final.
            self.dirty_objects.clear_all();
            for connection in self.valid_connections.to_indices() {
                let state = &mut self.connections[connection as usize];
                state.scope.copy_from(&state.pre_dynamic_scope);
            }
            self.metrics.dynamic_filtering_us = 0;
        } else {
            let dynamic_start = Instant::now();
            self.notify_filters_of_dirty_objects();
            self.pre_filter_pass();
            self.update_dynamic_filtering(world);
            self.post_filter_pass();
            self.metrics.dynamic_filtering_us = dynamic_start.elapsed().as_micros() as u64;
        }

        self.objects_requiring_dynamic_update.clear_all();
        self.post_update_hysteresis();
        self.build_relevant_objects(world);
        if self.validate_scope_consistency_enabled {
            self.validate_scope_consistency(world);
        }

        self.metrics.active_hysteresis_count = self
            .valid_connections
            .to_indices()
            .iter()
            .map(|&c| self.connections[c as usize].hysteresis.active_count())
            .sum();
        self.metrics.total_us = tick_start.elapsed().as_micros() as u64;
    }

    fn pre_update_hysteresis(&mut self) {
        if self.hysteresis.enabled {
            self.hysteresis.start_id = (self.frame_index % u64::from(self.hysteresis.stride)) as u32;
        }
        if self.hysteresis.objects_to_clear_count > 0 {
            for connection in self.valid_connections.to_indices() {
                let state = &mut self.connections[connection as usize];
                state.hysteresis.remove_set(&self.hysteresis.objects_to_clear);
            }
        }
    }

    fn post_update_hysteresis(&mut self) {
        self.hysteresis.objects_to_clear_count = 0;
        self.hysteresis.objects_to_clear.clear_all();
        self.hysteresis.exempt.clear_all();
    }

    // ── Queries ────────────────────────────────────────────────────

    /// Whether `object` was in scope for `connection` after the last
    /// tick.
    pub fn is_object_in_scope(&self, object: ObjectIndex, connection: ConnectionId) -> bool {
        self.valid_connections.get(connection.0)
            && self.connections[connection.0 as usize].scope.get(object.0)
    }

    /// The final scope of `connection` after the last tick, if the
    /// connection is valid.
    pub fn connection_scope(&self, connection: ConnectionId) -> Option<&BitSet> {
        self.valid_connections
            .get(connection.0)
            .then(|| &self.connections[connection.0 as usize].scope)
    }

    /// The set of objects relevant to at least one connection after the
    /// last tick, for the I/O layer.
    pub fn relevant_objects(&self) -> &BitSet {
        &self.relevant_objects
    }

    /// The connection recorded as owning `object`
    /// ([`ConnectionId::NONE`] when unowned).
    pub fn owning_connection(&self, object: ObjectIndex) -> ConnectionId {
        ConnectionId(u32::from(self.object_owner[object.0 as usize]))
    }

    /// Whether `object` currently carries an owner filter.
    pub fn has_owner_filter(&self, object: ObjectIndex) -> bool {
        self.objects_with_owner_filter.get(object.0)
    }

    /// Whether `object` currently carries a connection filter mask.
    pub fn has_connection_filter(&self, object: ObjectIndex) -> bool {
        self.objects_with_connection_mask.get(object.0)
    }

    /// The filter currently assigned to `object`.
    pub fn object_filter(&self, object: ObjectIndex) -> FilterHandle {
        let index = self.object_filter_index[object.0 as usize];
        if index != INVALID_FILTER_INDEX {
            FilterHandle::dynamic(u32::from(index))
        } else if self.has_owner_filter(object) {
            FilterHandle::TO_OWNER
        } else if self.has_connection_filter(object) {
            FilterHandle::TO_CONNECTION
        } else {
            FilterHandle::NONE
        }
    }

    /// Resolves a registered dynamic filter name to its handle.
    pub fn filter_handle(&self, name: &str) -> Option<FilterHandle> {
        self.filters
            .iter()
            .position(|slot| slot.name == name)
            .map(|index| FilterHandle::dynamic(index as u32))
    }

    /// Mutable access to a registered dynamic filter, for hosts that
    /// need to reach the concrete implementation.
    pub fn filter_mut(&mut self, name: &str) -> Option<&mut dyn ObjectFilter> {
        self.filters
            .iter_mut()
            .find(|slot| slot.name == name)
            .map(|slot| &mut *slot.filter)
    }

    /// The member set of a registered dynamic filter.
    pub fn objects_in_filter(&self, name: &str) -> Option<&BitSet> {
        self.filters
            .iter()
            .find(|slot| slot.name == name)
            .map(|slot| &slot.members)
    }

    /// Drains the sub-object filter groups retired by the last tick.
    /// The caller should destroy them in its group registry.
    pub fn take_retired_groups(&mut self) -> Vec<GroupHandle> {
        std::mem::take(&mut self.retired_groups)
    }

    /// Metrics from the last tick plus cumulative counters.
    pub fn metrics(&self) -> &FilterMetrics {
        &self.metrics
    }

    // ── Shared internals ───────────────────────────────────────────

    /// Number of storage words in every object-indexed bit set.
    pub(crate) fn object_word_count(&self) -> usize {
        self.relevant_objects.num_words()
    }

    /// The hysteresis frame count for a profile name, falling back to
    /// the configured default.
    pub(crate) fn profile_frame_count(&self, profile: Option<&str>) -> u8 {
        profile
            .and_then(|name| self.hysteresis_profiles.get(name).copied())
            .unwrap_or(self.default_hysteresis_frames)
    }

    /// Allocates (or fetches) the connection mask of `object`. Fresh
    /// masks default to allow-everyone.
    pub(crate) fn mask_handle_or_alloc(&mut self, object: ObjectIndex) -> MaskHandle {
        let handle = self.object_mask_handles[object.0 as usize];
        if handle.is_valid() {
            return handle;
        }
        let handle = self.mask_pool.alloc();
        self.mask_pool.fill(handle, purview_core::FilterStatus::Allow);
        self.object_mask_handles[object.0 as usize] = handle;
        self.objects_with_connection_mask.set(object.0);
        handle
    }

    /// Frees the connection mask of `object`, if it has one.
    pub(crate) fn free_mask_for_object(&mut self, object: ObjectIndex) {
        let handle = self.object_mask_handles[object.0 as usize];
        if handle.is_valid() {
            self.mask_pool.free(handle);
            self.object_mask_handles[object.0 as usize] = MaskHandle::INVALID;
            self.objects_with_connection_mask.clear(object.0);
        }
    }
}
