//! Owner and connection filtering: mutators plus the per-tick
//! recomputation for dirty objects.

use log::{debug, warn};

use purview_core::{
    BitSet, ConnectionId, FilterError, FilterHandle, FilterStatus, ObjectIndex, WorldContext,
};
use purview_filter::AddObjectParams;

use crate::engine::{ScopeEngine, INVALID_FILTER_INDEX};

impl ScopeEngine {
    /// Records `connection` as the owner of `object`.
    ///
    /// Id 0 clears ownership, preventing the object from replicating to
    /// anyone while it carries an owner filter. Any other id must be a
    /// currently valid connection. Ownership propagates to subobjects
    /// during the next tick.
    pub fn set_owning_connection(
        &mut self,
        world: &WorldContext<'_>,
        object: ObjectIndex,
        connection: ConnectionId,
    ) -> Result<(), FilterError> {
        if connection.is_valid() && !world.connections.is_valid(connection) {
            self.metrics.rejected_mutations += 1;
            warn!("scope engine: cannot set unknown owning connection {connection} on object {object}");
            return Err(FilterError::InvalidConnection { connection });
        }

        let old = self.object_owner[object.0 as usize];
        self.object_owner[object.0 as usize] = connection.0 as u16;
        if connection.0 as u16 != old {
            self.has_dirty_owner = true;
            self.objects_with_dirty_owner.set(object.0);
            if self.objects_with_owner_filter.get(object.0) {
                self.has_dirty_connection_filter = true;
                self.objects_with_dirty_connection_filter.set(object.0);
            }
        }
        Ok(())
    }

    /// Assigns a filter to `object`.
    ///
    /// `handle` may be [`FilterHandle::NONE`] (no filtering),
    /// [`FilterHandle::TO_OWNER`], or a dynamic filter handle resolved
    /// through [`filter_handle`](Self::filter_handle); `profile` selects
    /// a named hysteresis profile for dynamic assignments. Whatever
    /// filter the object carried before is cleared first.
    ///
    /// Returns `Ok(true)` on success and `Ok(false)` when a dynamic
    /// filter's `add_object` declined the object, which leaves the
    /// object without any dynamic filter and is a normal outcome.
    pub fn set_filter(
        &mut self,
        world: &WorldContext<'_>,
        object: ObjectIndex,
        handle: FilterHandle,
        profile: Option<&str>,
    ) -> Result<bool, FilterError> {
        if handle == FilterHandle::TO_CONNECTION {
            self.metrics.rejected_mutations += 1;
            warn!("scope engine: use set_connection_filter to enable connection filtering");
            return Err(FilterError::InvalidFilterHandle { handle });
        }
        let new_filter_index = match handle.dynamic_index() {
            Some(index) if (index as usize) < self.filters.len() => Some(index as u8),
            Some(_) => {
                self.metrics.rejected_mutations += 1;
                warn!("scope engine: unknown dynamic filter handle {handle}");
                return Err(FilterError::InvalidFilterHandle { handle });
            }
            None => {
                if handle != FilterHandle::NONE && handle != FilterHandle::TO_OWNER {
                    self.metrics.rejected_mutations += 1;
                    warn!("scope engine: unknown static filter handle {handle}");
                    return Err(FilterError::InvalidFilterHandle { handle });
                }
                None
            }
        };
        // Subobjects are filtered like their root.
        if new_filter_index.is_some() && world.objects.root_of(object).is_some() {
            self.metrics.rejected_mutations += 1;
            warn!("scope engine: cannot set a dynamic filter on subobject {object}");
            return Err(FilterError::SubObjectNotFilterable { object });
        }

        debug!("scope engine: setting filter {handle} on object {object}");

        let old_filter_index = self.object_filter_index[object.0 as usize];
        if old_filter_index != INVALID_FILTER_INDEX {
            self.remove_from_dynamic_filter(object, old_filter_index);
            if new_filter_index.is_none() {
                // The new static verdict must be recomputed for every
                // connection; a switch away from a dynamic filter never
                // goes through hysteresis.
                self.has_dirty_connection_filter = true;
                self.objects_with_dirty_connection_filter.set(object.0);
            }
        } else {
            self.has_dirty_connection_filter = true;
            self.objects_with_owner_filter.clear(object.0);
            self.objects_with_dirty_connection_filter.set(object.0);
            self.free_mask_for_object(object);
        }

        if let Some(index) = new_filter_index {
            let accepted = self.try_set_dynamic_filter(object, index, profile);
            if !accepted {
                debug!(
                    "scope engine: filter '{}' does not support object {object}",
                    self.filters[index as usize].name
                );
            }
            Ok(accepted)
        } else if handle == FilterHandle::TO_OWNER {
            self.objects_with_owner_filter.set(object.0);
            Ok(true)
        } else {
            Ok(true)
        }
    }

    fn try_set_dynamic_filter(
        &mut self,
        object: ObjectIndex,
        filter_index: u8,
        profile: Option<&str>,
    ) -> bool {
        let frame_count = self.profile_frame_count(profile);
        self.filter_object_infos[object.0 as usize] = Default::default();

        let accepted = {
            let info = &mut self.filter_object_infos[object.0 as usize];
            let slot = &mut self.filters[filter_index as usize];
            slot.filter.add_object(object, AddObjectParams { info, profile })
        };
        if accepted {
            let slot = &mut self.filters[filter_index as usize];
            slot.object_count += 1;
            slot.members.set(object.0);
            self.object_filter_index[object.0 as usize] = filter_index;
            self.dynamic_filter_enabled.set(object.0);
            self.hysteresis_frame_counts[object.0 as usize] = frame_count;
        }
        accepted
    }

    /// Removes `object` from its dynamic filter and cancels any
    /// in-flight hysteresis countdown for it.
    pub(crate) fn remove_from_dynamic_filter(&mut self, object: ObjectIndex, filter_index: u8) {
        debug!(
            "scope engine: removing object {object} from dynamic filter '{}'",
            self.filters[filter_index as usize].name
        );
        self.object_filter_index[object.0 as usize] = INVALID_FILTER_INDEX;
        {
            let info = &mut self.filter_object_infos[object.0 as usize];
            let slot = &mut self.filters[filter_index as usize];
            slot.object_count -= 1;
            slot.members.clear(object.0);
            slot.filter.remove_object(object, info);
        }
        self.dynamic_filter_enabled.clear(object.0);
        self.objects_requiring_dynamic_update.set(object.0);
        self.hysteresis.clear_from(object.0);
    }

    /// Enables connection filtering for `object` with an explicit mask.
    ///
    /// `status` applies to the connections listed in `connections`; all
    /// other connections get the opposite status. The mask may be
    /// narrower than the engine's connection space; missing bits read
    /// as unlisted. Owner filtering and any dynamic filter on the
    /// object are cleared.
    pub fn set_connection_filter(
        &mut self,
        object: ObjectIndex,
        connections: &BitSet,
        status: FilterStatus,
    ) {
        if self.objects_with_owner_filter.get(object.0) {
            self.objects_with_owner_filter.clear(object.0);
        }
        let filter_index = self.object_filter_index[object.0 as usize];
        if filter_index != INVALID_FILTER_INDEX {
            self.remove_from_dynamic_filter(object, filter_index);
        }

        self.has_dirty_connection_filter = true;
        self.objects_with_dirty_connection_filter.set(object.0);

        let handle = self.mask_handle_or_alloc(object);
        let invert = if status.is_allowed() { 0u32 } else { !0u32 };
        let input_words = connections.words();
        let mask_words = self.mask_pool.mask_words_mut(handle);
        for (offset, word) in mask_words.iter_mut().enumerate() {
            let input = input_words.get(offset).copied().unwrap_or(0);
            *word = input ^ invert;
        }
    }

    /// Recomputes every connection's scope bit for objects whose owner
    /// or connection filter changed, propagating the result to their
    /// subobjects in the same pass.
    pub(crate) fn update_owner_and_connection_filtering(&mut self, world: &WorldContext<'_>) {
        if !self.has_dirty_owner && !self.has_dirty_connection_filter {
            return;
        }

        if self.has_dirty_owner {
            for object in self.objects_with_dirty_owner.to_indices() {
                let owner = self.object_owner[object as usize];
                for &sub in world.objects.sub_objects(ObjectIndex(object)) {
                    self.object_owner[sub.0 as usize] = owner;
                }
            }
        }

        if self.has_dirty_connection_filter {
            let dirty = self.objects_with_dirty_connection_filter.to_indices();
            for &object in &dirty {
                self.all_connection_filtered
                    .set_value(object, self.objects_with_connection_mask.get(object));
            }

            let scopable = world.objects.current_scopable();
            for connection in self.valid_connections.to_indices() {
                for &object in &dirty {
                    let mut in_scope = true;
                    if self.objects_with_owner_filter.get(object) {
                        in_scope = u32::from(self.object_owner[object as usize]) == connection;
                    } else if self.objects_with_connection_mask.get(object) {
                        let handle = self.object_mask_handles[object as usize];
                        in_scope = self
                            .mask_pool
                            .status(handle, ConnectionId(connection))
                            .is_allowed();
                    }

                    let state = &mut self.connections[connection as usize];
                    let group_enabled = !state.group_excluded.get(object);
                    state.connection_filtered.set_value(object, in_scope);
                    state
                        .pre_dynamic_scope
                        .set_value(object, in_scope && group_enabled);

                    // Subobjects follow suit.
                    for &sub in world.objects.sub_objects(ObjectIndex(object)) {
                        let enable = in_scope && scopable.get(sub.0);
                        let sub_group_enabled = !state.group_excluded.get(sub.0);
                        state.connection_filtered.set_value(sub.0, enable);
                        state
                            .pre_dynamic_scope
                            .set_value(sub.0, enable && sub_group_enabled);
                    }
                }
            }
        }

        self.has_dirty_owner = false;
        self.has_dirty_connection_filter = false;
        self.objects_with_dirty_owner.clear_all();
        self.objects_with_dirty_connection_filter.clear_all();
    }
}
