//! Group filtering: exclusion groups, inclusion groups, and sub-object
//! filter groups.

use log::{debug, warn};

use purview_core::bitset::for_each_set_combined;
use purview_core::{
    BitSet, ConnectionId, FilterError, FilterStatus, GroupHandle, ObjectIndex, WordOp,
    WorldContext,
};
use purview_mask::MaskHandle;

use crate::engine::ScopeEngine;

/// Selects which connections a group filter status applies to.
#[derive(Clone, Copy, Debug)]
pub enum ConnectionSelection<'a> {
    /// Every connection id, including ids not currently valid, so
    /// future connections inherit the status.
    All,
    /// A single connection id.
    One(ConnectionId),
    /// The listed connections get the given status; every other id gets
    /// the opposite status.
    Mask(&'a BitSet),
}

impl ScopeEngine {
    // ── Group filter registration ──────────────────────────────────

    /// Turns `group` into an exclusion group: members are filtered out
    /// for every connection whose group status is `Disallow`, which is
    /// the initial status for all connections.
    pub fn add_exclusion_filter_group(
        &mut self,
        world: &WorldContext<'_>,
        group: GroupHandle,
    ) -> Result<(), FilterError> {
        self.check_group_addable(world, group)?;
        let group_index = u32::from(group.0);

        self.exclusion_groups.set(group_index);
        self.dirty_exclusion_groups.set(group_index);
        self.has_dirty_exclusion_group = true;

        let handle = self.mask_pool.alloc();
        self.mask_pool.fill(handle, FilterStatus::Disallow);
        self.group_state[group.index()] = handle;

        debug!("scope engine: group {group} is now an exclusion filter group");
        Ok(())
    }

    /// Turns `group` into an inclusion group: members are forced into
    /// scope, overriding dynamic filter verdicts only, for every
    /// connection whose group status is `Allow`. The initial status is
    /// `Disallow` (do not override) for all connections.
    pub fn add_inclusion_filter_group(
        &mut self,
        world: &WorldContext<'_>,
        group: GroupHandle,
    ) -> Result<(), FilterError> {
        self.check_group_addable(world, group)?;
        let group_index = u32::from(group.0);

        self.inclusion_groups.set(group_index);
        self.dirty_inclusion_groups.set(group_index);
        self.has_dirty_inclusion_group = true;

        let handle = self.mask_pool.alloc();
        self.mask_pool.fill(handle, FilterStatus::Disallow);
        self.group_state[group.index()] = handle;

        debug!("scope engine: group {group} is now an inclusion filter group");
        Ok(())
    }

    /// Removes the exclusion or inclusion role from `group`, clearing
    /// its effects for every valid connection.
    pub fn remove_group_filter(
        &mut self,
        world: &WorldContext<'_>,
        group: GroupHandle,
    ) -> Result<(), FilterError> {
        if !world.groups.is_valid_group(group) {
            self.metrics.rejected_mutations += 1;
            return Err(FilterError::InvalidGroup { group });
        }
        let group_index = u32::from(group.0);

        if self.exclusion_groups.get(group_index) {
            self.dirty_exclusion_groups.clear(group_index);
            for connection in self.valid_connections.to_indices() {
                self.set_exclusion_group_status(
                    world,
                    group,
                    ConnectionId(connection),
                    FilterStatus::Allow,
                );
            }
            self.exclusion_groups.clear(group_index);
            let handle = std::mem::replace(&mut self.group_state[group.index()], MaskHandle::INVALID);
            self.mask_pool.free(handle);
            debug!("scope engine: exclusion filter removed from group {group}");
            Ok(())
        } else if self.inclusion_groups.get(group_index) {
            self.dirty_inclusion_groups.clear(group_index);
            for connection in self.valid_connections.to_indices() {
                self.set_inclusion_group_status(
                    world,
                    group,
                    ConnectionId(connection),
                    FilterStatus::Disallow,
                );
            }
            self.inclusion_groups.clear(group_index);
            let handle = std::mem::replace(&mut self.group_state[group.index()], MaskHandle::INVALID);
            self.mask_pool.free(handle);
            debug!("scope engine: inclusion filter removed from group {group}");
            Ok(())
        } else {
            self.metrics.rejected_mutations += 1;
            Err(FilterError::NotAFilterGroup { group })
        }
    }

    fn check_group_addable(
        &mut self,
        world: &WorldContext<'_>,
        group: GroupHandle,
    ) -> Result<(), FilterError> {
        if !group.is_valid() {
            self.metrics.rejected_mutations += 1;
            warn!("scope engine: reserved group {group} cannot be used for filtering");
            return Err(FilterError::ReservedGroup { group });
        }
        if !world.groups.is_valid_group(group) || u32::from(group.0) >= self.exclusion_groups.num_bits()
        {
            self.metrics.rejected_mutations += 1;
            warn!("scope engine: invalid group {group}");
            return Err(FilterError::InvalidGroup { group });
        }
        let group_index = u32::from(group.0);
        if self.exclusion_groups.get(group_index)
            || self.inclusion_groups.get(group_index)
            || self.subobject_groups.get(group_index)
        {
            self.metrics.rejected_mutations += 1;
            warn!("scope engine: group {group} is already used for filtering");
            return Err(FilterError::GroupAlreadyFiltering { group });
        }
        Ok(())
    }

    // ── Group filter status ────────────────────────────────────────

    /// Sets the filter status of an exclusion or inclusion group for
    /// the selected connections.
    ///
    /// Statuses are recorded for not-yet-valid connection ids too, so
    /// connections joining later inherit them.
    pub fn set_group_filter_status(
        &mut self,
        world: &WorldContext<'_>,
        group: GroupHandle,
        selection: ConnectionSelection<'_>,
        status: FilterStatus,
    ) -> Result<(), FilterError> {
        if !group.is_valid() {
            self.metrics.rejected_mutations += 1;
            warn!("scope engine: cannot set filter status on reserved group {group}");
            return Err(FilterError::ReservedGroup { group });
        }
        let group_index = u32::from(group.0);
        let is_exclusion = self.exclusion_groups.get(group_index);
        let is_inclusion = self.inclusion_groups.get(group_index);
        if !is_exclusion && !is_inclusion {
            self.metrics.rejected_mutations += 1;
            warn!("scope engine: group {group} has no exclusion or inclusion role");
            return Err(FilterError::NotAFilterGroup { group });
        }

        let connection_bits = self.valid_connections.num_bits();
        match selection {
            ConnectionSelection::One(connection) => {
                if !connection.is_valid() || connection.0 >= connection_bits {
                    self.metrics.rejected_mutations += 1;
                    return Err(FilterError::InvalidConnection { connection });
                }
                self.apply_group_status(world, group, is_exclusion, connection, status);
            }
            ConnectionSelection::All => {
                for id in 1..connection_bits {
                    self.apply_group_status(world, group, is_exclusion, ConnectionId(id), status);
                }
            }
            ConnectionSelection::Mask(connections) => {
                if connections.num_bits() > connection_bits {
                    self.metrics.rejected_mutations += 1;
                    return Err(FilterError::ConnectionSetTooLarge {
                        bits: connections.num_bits(),
                        max: connection_bits,
                    });
                }
                for id in 1..connection_bits {
                    let listed = connections.get(id);
                    let to_set = if listed {
                        status
                    } else if status.is_allowed() {
                        FilterStatus::Disallow
                    } else {
                        FilterStatus::Allow
                    };
                    self.apply_group_status(world, group, is_exclusion, ConnectionId(id), to_set);
                }
            }
        }
        Ok(())
    }

    /// The filter status of an exclusion or inclusion group for one
    /// valid connection.
    pub fn group_filter_status(
        &self,
        group: GroupHandle,
        connection: ConnectionId,
    ) -> Option<FilterStatus> {
        let group_index = u32::from(group.0);
        if !self.valid_connections.get(connection.0) {
            return None;
        }
        if !self.exclusion_groups.get(group_index) && !self.inclusion_groups.get(group_index) {
            return None;
        }
        Some(self.mask_pool.status(self.group_state[group.index()], connection))
    }

    fn apply_group_status(
        &mut self,
        world: &WorldContext<'_>,
        group: GroupHandle,
        is_exclusion: bool,
        connection: ConnectionId,
        status: FilterStatus,
    ) {
        if is_exclusion {
            self.set_exclusion_group_status(world, group, connection, status);
        } else {
            self.set_inclusion_group_status(world, group, connection, status);
        }
    }

    fn set_exclusion_group_status(
        &mut self,
        world: &WorldContext<'_>,
        group: GroupHandle,
        connection: ConnectionId,
        status: FilterStatus,
    ) {
        let handle = self.group_state[group.index()];
        if self.mask_pool.status(handle, connection) == status {
            return;
        }
        self.mask_pool.set_status(handle, connection, status);
        debug!(
            "scope engine: exclusion group {group} status for connection {connection} is now {status}"
        );

        // Connections that are not initialized yet get the effect when
        // their scope is first computed.
        if !self.valid_connections.get(connection.0) || self.new_connections.get(connection.0) {
            return;
        }

        if status == FilterStatus::Disallow {
            let scopable = world.objects.current_scopable();
            let members = world.groups.members_of(group);
            let state = &mut self.connections[connection.0 as usize];
            for &member in members {
                state.group_excluded.set(member.0);
                state.pre_dynamic_scope.clear(member.0);
                for &sub in world.objects.sub_objects(member) {
                    state.group_excluded.set_value(sub.0, scopable.get(sub.0));
                    state.pre_dynamic_scope.clear(sub.0);
                }
            }
        } else {
            for &member in world.groups.members_of(group) {
                self.clear_group_exclusion_effects(world, member, connection);
            }
        }
    }

    fn set_inclusion_group_status(
        &mut self,
        world: &WorldContext<'_>,
        group: GroupHandle,
        connection: ConnectionId,
        status: FilterStatus,
    ) {
        let handle = self.group_state[group.index()];
        if self.mask_pool.status(handle, connection) == status {
            return;
        }
        self.mask_pool.set_status(handle, connection, status);
        debug!(
            "scope engine: inclusion group {group} status for connection {connection} is now {status}"
        );

        if !self.valid_connections.get(connection.0) || self.new_connections.get(connection.0) {
            return;
        }

        if status == FilterStatus::Allow {
            let scopable = world.objects.current_scopable();
            let sub_indices = world.objects.sub_object_indices();
            let members = world.groups.members_of(group);
            let state = &mut self.connections[connection.0 as usize];
            for &member in members {
                // Subobjects follow their root's membership.
                if sub_indices.get(member.0) {
                    continue;
                }
                state.group_included.set_value(member.0, scopable.get(member.0));
                for &sub in world.objects.sub_objects(member) {
                    state.group_included.set_value(sub.0, scopable.get(sub.0));
                }
            }
        } else {
            for &member in world.groups.members_of(group) {
                self.clear_group_inclusion_effects(world, member, connection);
            }
        }
    }

    // ── Per-object effect clearing ─────────────────────────────────

    /// Whether some exclusion group still excludes `object` for
    /// `connection`.
    pub(crate) fn is_excluded_by_any_group(
        &self,
        world: &WorldContext<'_>,
        object: ObjectIndex,
        connection: ConnectionId,
    ) -> bool {
        world.groups.groups_of(object).iter().any(|&group| {
            self.exclusion_groups.get(u32::from(group.0))
                && !self
                    .mask_pool
                    .status(self.group_state[group.index()], connection)
                    .is_allowed()
        })
    }

    /// Whether some inclusion group still force-includes `object` for
    /// `connection`.
    pub(crate) fn is_included_by_any_group(
        &self,
        world: &WorldContext<'_>,
        object: ObjectIndex,
        connection: ConnectionId,
    ) -> bool {
        world.groups.groups_of(object).iter().any(|&group| {
            self.inclusion_groups.get(u32::from(group.0))
                && self
                    .mask_pool
                    .status(self.group_state[group.index()], connection)
                    .is_allowed()
        })
    }

    /// Clears the exclusion effect on `object` (and subobjects) for
    /// `connection`, unless another group still excludes it.
    pub(crate) fn clear_group_exclusion_effects(
        &mut self,
        world: &WorldContext<'_>,
        object: ObjectIndex,
        connection: ConnectionId,
    ) {
        if self.is_excluded_by_any_group(world, object, connection) {
            return;
        }
        {
            let state = &mut self.connections[connection.0 as usize];
            state.group_excluded.clear(object.0);
            let filtered = state.connection_filtered.get(object.0);
            state.pre_dynamic_scope.set_value(object.0, filtered);
        }
        for &sub in world.objects.sub_objects(object) {
            if self.is_excluded_by_any_group(world, sub, connection) {
                continue;
            }
            let state = &mut self.connections[connection.0 as usize];
            state.group_excluded.clear(sub.0);
            let filtered = state.connection_filtered.get(sub.0);
            state.pre_dynamic_scope.set_value(sub.0, filtered);
        }
    }

    /// Clears the inclusion effect on `object` (and subobjects) for
    /// `connection`, unless another group still includes it.
    pub(crate) fn clear_group_inclusion_effects(
        &mut self,
        world: &WorldContext<'_>,
        object: ObjectIndex,
        connection: ConnectionId,
    ) {
        // Inclusion groups override dynamic filters, which only operate
        // on root objects; subobjects follow their root.
        if world.objects.sub_object_indices().get(object.0) {
            return;
        }
        if self.is_included_by_any_group(world, object, connection) {
            return;
        }
        if self.hysteresis.enabled && self.dynamic_filter_enabled.get(object.0) {
            // The object may still be in scope yet dynamically filtered
            // out; force a pass so hysteresis can kick in.
            self.objects_requiring_dynamic_update.set(object.0);
        }
        let state = &mut self.connections[connection.0 as usize];
        state.group_included.clear(object.0);
        for &sub in world.objects.sub_objects(object) {
            state.group_included.clear(sub.0);
        }
    }

    // ── Deferred dirty-group cascades ──────────────────────────────

    /// Applies pending exclusion-group membership changes for every
    /// disallowed connection.
    pub(crate) fn update_group_exclusion_filtering(&mut self, world: &WorldContext<'_>) {
        if !self.has_dirty_exclusion_group {
            return;
        }
        for group_index in self.dirty_exclusion_groups.to_indices() {
            let group = GroupHandle(group_index as u16);
            let handle = self.group_state[group.index()];
            for connection in self.valid_connections.to_indices() {
                if self
                    .mask_pool
                    .status(handle, ConnectionId(connection))
                    .is_allowed()
                {
                    continue;
                }
                let scopable = world.objects.current_scopable();
                let members = world.groups.members_of(group);
                let state = &mut self.connections[connection as usize];
                for &member in members {
                    state.group_excluded.set(member.0);
                    state.pre_dynamic_scope.clear(member.0);
                    for &sub in world.objects.sub_objects(member) {
                        state.group_excluded.set_value(sub.0, scopable.get(sub.0));
                        state.pre_dynamic_scope.clear(sub.0);
                    }
                }
            }
        }
        self.has_dirty_exclusion_group = false;
        self.dirty_exclusion_groups.clear_all();
    }

    /// Applies pending inclusion-group membership changes for every
    /// allowed connection.
    pub(crate) fn update_group_inclusion_filtering(&mut self, world: &WorldContext<'_>) {
        if !self.has_dirty_inclusion_group {
            return;
        }
        for group_index in self.dirty_inclusion_groups.to_indices() {
            let group = GroupHandle(group_index as u16);
            let handle = self.group_state[group.index()];
            for connection in self.valid_connections.to_indices() {
                if !self
                    .mask_pool
                    .status(handle, ConnectionId(connection))
                    .is_allowed()
                {
                    continue;
                }
                let sub_indices = world.objects.sub_object_indices();
                let members = world.groups.members_of(group);
                let state = &mut self.connections[connection as usize];
                for &member in members {
                    if sub_indices.get(member.0) {
                        continue;
                    }
                    state.group_included.set(member.0);
                    for &sub in world.objects.sub_objects(member) {
                        state.group_included.set(sub.0);
                    }
                }
            }
        }
        self.has_dirty_inclusion_group = false;
        self.dirty_inclusion_groups.clear_all();
    }

    // ── Membership notifications ───────────────────────────────────

    /// The group registry added `object` to `group`. Adding only flags
    /// the group dirty; the cascade is batched into the next tick to
    /// avoid a filter-update storm when many objects join one by one.
    pub fn notify_object_added_to_group(&mut self, group: GroupHandle, object: ObjectIndex) {
        let group_index = u32::from(group.0);
        if group_index >= self.exclusion_groups.num_bits() {
            return;
        }
        if self.subobject_groups.get(group_index) {
            debug!("scope engine: object {object} joined sub-object filter group {group}");
        } else if self.exclusion_groups.get(group_index) {
            let handle = self.group_state[group.index()];
            // If no connection is disallowed the filter has no effect.
            if self.mask_pool.any_disallowed(handle) {
                self.dirty_exclusion_groups.set(group_index);
                self.has_dirty_exclusion_group = true;
            }
        } else if self.inclusion_groups.get(group_index) {
            let handle = self.group_state[group.index()];
            if self.mask_pool.any_allowed(handle) {
                self.dirty_inclusion_groups.set(group_index);
                self.has_dirty_inclusion_group = true;
            }
        }
    }

    /// The group registry removed `object` from `group`. Removal takes
    /// effect immediately for that single object, honoring any other
    /// groups it remains in. Must be called after the registry mutation.
    pub fn notify_object_removed_from_group(
        &mut self,
        world: &WorldContext<'_>,
        group: GroupHandle,
        object: ObjectIndex,
    ) {
        let group_index = u32::from(group.0);
        if group_index >= self.exclusion_groups.num_bits() {
            return;
        }
        if self.subobject_groups.get(group_index) {
            self.dirty_subobject_groups.set(group_index);
            return;
        }

        let mut initialized = Vec::new();
        for_each_set_combined(
            &self.valid_connections,
            &self.new_connections,
            WordOp::AndNot,
            |connection| initialized.push(connection),
        );

        if self.exclusion_groups.get(group_index) {
            let handle = self.group_state[group.index()];
            for connection in initialized {
                if !self
                    .mask_pool
                    .status(handle, ConnectionId(connection))
                    .is_allowed()
                {
                    self.clear_group_exclusion_effects(world, object, ConnectionId(connection));
                }
            }
        } else if self.inclusion_groups.get(group_index) {
            let handle = self.group_state[group.index()];
            for connection in initialized {
                if self
                    .mask_pool
                    .status(handle, ConnectionId(connection))
                    .is_allowed()
                {
                    self.clear_group_inclusion_effects(world, object, ConnectionId(connection));
                }
            }
        }
    }

    // ── Sub-object filter groups ───────────────────────────────────

    /// Turns `group` into a sub-object filter group: a pure
    /// per-connection gate with no exclusion/inclusion semantics,
    /// starting as `Disallow` for every connection.
    pub fn add_subobject_filter(
        &mut self,
        world: &WorldContext<'_>,
        group: GroupHandle,
    ) -> Result<(), FilterError> {
        self.check_group_addable(world, group)?;
        let group_index = u32::from(group.0);

        self.subobject_groups.set(group_index);
        let handle = self.mask_pool.alloc();
        self.mask_pool.fill(handle, FilterStatus::Disallow);
        self.group_state[group.index()] = handle;

        debug!("scope engine: group {group} is now a sub-object filter group");
        Ok(())
    }

    /// Removes the sub-object filter role from `group`. A no-op when
    /// the group has no such role.
    pub fn remove_subobject_filter(&mut self, group: GroupHandle) {
        let group_index = u32::from(group.0);
        if group.is_valid()
            && group_index < self.subobject_groups.num_bits()
            && self.subobject_groups.get(group_index)
        {
            self.subobject_groups.clear(group_index);
            let handle = std::mem::replace(&mut self.group_state[group.index()], MaskHandle::INVALID);
            self.mask_pool.free(handle);
            debug!("scope engine: sub-object filter removed from group {group}");
        }
    }

    /// Sets the sub-object filter status of `group` for one valid
    /// connection.
    pub fn set_subobject_filter_status(
        &mut self,
        group: GroupHandle,
        connection: ConnectionId,
        status: FilterStatus,
    ) -> Result<(), FilterError> {
        if !group.is_valid() {
            self.metrics.rejected_mutations += 1;
            warn!("scope engine: cannot set sub-object filter status on reserved group {group}");
            return Err(FilterError::ReservedGroup { group });
        }
        let group_index = u32::from(group.0);
        if group_index >= self.subobject_groups.num_bits()
            || !self.subobject_groups.get(group_index)
        {
            self.metrics.rejected_mutations += 1;
            return Err(FilterError::NotAFilterGroup { group });
        }
        if !self.valid_connections.get(connection.0) {
            self.metrics.rejected_mutations += 1;
            return Err(FilterError::InvalidConnection { connection });
        }

        let handle = self.group_state[group.index()];
        self.mask_pool.set_status(handle, connection, status);
        debug!(
            "scope engine: sub-object filter group {group} status for connection {connection} is now {status}"
        );
        if !self.mask_pool.any_allowed(handle) {
            // The group may now be collectable.
            self.dirty_subobject_groups.set(group_index);
        }
        Ok(())
    }

    /// The sub-object filter status of `group` for one valid connection.
    pub fn subobject_filter_status(
        &self,
        group: GroupHandle,
        connection: ConnectionId,
    ) -> Option<FilterStatus> {
        let group_index = u32::from(group.0);
        if !self.valid_connections.get(connection.0)
            || group_index >= self.subobject_groups.num_bits()
            || !self.subobject_groups.get(group_index)
        {
            return None;
        }
        Some(self.mask_pool.status(self.group_state[group.index()], connection))
    }

    /// Collects sub-object filter groups that have no members and no
    /// allowing connection, dropping the engine-side state and queueing
    /// the handle for the caller to destroy in its registry.
    pub(crate) fn update_subobject_filters(&mut self, world: &WorldContext<'_>) {
        let mut candidates = Vec::new();
        for_each_set_combined(
            &self.dirty_subobject_groups,
            &self.subobject_groups,
            WordOp::And,
            |group_index| candidates.push(group_index),
        );
        for group_index in candidates {
            let group = GroupHandle(group_index as u16);
            if !world.groups.is_valid_group(group) || !world.groups.members_of(group).is_empty() {
                continue;
            }
            let handle = self.group_state[group.index()];
            if self.mask_pool.any_allowed(handle) {
                continue;
            }
            debug!("scope engine: retiring empty sub-object filter group {group}");
            self.remove_subobject_filter(group);
            self.retired_groups.push(group);
        }
        self.dirty_subobject_groups.clear_all();
    }
}
