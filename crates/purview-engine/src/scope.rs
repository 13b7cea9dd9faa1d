//! Scope reconciliation: added/removed objects and connections, the
//! global relevant-object set, and the optional consistency validation
//! pass.

use log::error;

use purview_core::{ConnectionId, GroupHandle, ObjectIndex, WorldContext, WORD_BITS};

use crate::engine::{ScopeEngine, INVALID_FILTER_INDEX};

impl ScopeEngine {
    /// Computes the full scope of every connection added since the last
    /// tick from current global state. This cannot be skipped: a new
    /// connection has no prior-frame state to diff against.
    pub(crate) fn init_new_connections(&mut self, world: &WorldContext<'_>) {
        if !self.has_new_connection {
            return;
        }
        self.has_new_connection = false;

        for connection in self.new_connections.to_indices() {
            self.init_connection_scope(world, connection);
        }
        self.new_connections.clear_all();
    }

    fn init_connection_scope(&mut self, world: &WorldContext<'_>, connection: u32) {
        let scopable = world.objects.current_scopable();
        {
            let state = &mut self.connections[connection as usize];
            state.resize(self.max_object_index);
            state.connection_filtered.copy_from(scopable);
            state.connection_filtered.clear(ObjectIndex::INVALID.0);
        }

        // Exclusion groups the connection is disallowed by apply to the
        // fresh scope immediately.
        for group_index in self.exclusion_groups.to_indices() {
            let handle = self.group_state[group_index as usize];
            if self
                .mask_pool
                .status(handle, ConnectionId(connection))
                .is_allowed()
            {
                continue;
            }
            let members = world.groups.members_of(GroupHandle(group_index as u16));
            let state = &mut self.connections[connection as usize];
            for &member in members {
                state.group_excluded.set(member.0);
                for &sub in world.objects.sub_objects(member) {
                    state.group_excluded.set(sub.0);
                }
            }
        }

        // Inclusion groups the connection is allowed by.
        for group_index in self.inclusion_groups.to_indices() {
            let handle = self.group_state[group_index as usize];
            if !self
                .mask_pool
                .status(handle, ConnectionId(connection))
                .is_allowed()
            {
                continue;
            }
            let sub_indices = world.objects.sub_object_indices();
            let members = world.groups.members_of(GroupHandle(group_index as u16));
            let state = &mut self.connections[connection as usize];
            for &member in members {
                // Subobjects follow their root's membership.
                if sub_indices.get(member.0) {
                    continue;
                }
                state.group_included.set(member.0);
                for &sub in world.objects.sub_objects(member) {
                    state.group_included.set(sub.0);
                }
            }
        }

        // Owner filtering.
        for object in self.objects_with_owner_filter.to_indices() {
            let is_owner = u32::from(self.object_owner[object as usize]) == connection;
            let state = &mut self.connections[connection as usize];
            state.connection_filtered.set_value(object, is_owner);
            for &sub in world.objects.sub_objects(ObjectIndex(object)) {
                state.connection_filtered.set_value(sub.0, is_owner);
            }
        }

        // Connection mask filtering.
        for object in self.objects_with_connection_mask.to_indices() {
            let handle = self.object_mask_handles[object as usize];
            let allowed = self
                .mask_pool
                .status(handle, ConnectionId(connection))
                .is_allowed();
            let state = &mut self.connections[connection as usize];
            state.connection_filtered.set_value(object, allowed);
            for &sub in world.objects.sub_objects(ObjectIndex(object)) {
                state.connection_filtered.set_value(sub.0, allowed);
            }
        }

        // Combine connection and group exclusion filtering.
        let state = &mut self.connections[connection as usize];
        state.pre_dynamic_scope.copy_from(&state.connection_filtered);
        state.pre_dynamic_scope.and_not_assign(&state.group_excluded);
    }

    /// Restores the default group filter status for connections removed
    /// since the last tick, so a future connection reusing the id
    /// starts from the defaults.
    pub(crate) fn reset_removed_connections(&mut self) {
        if !self.has_removed_connection {
            return;
        }
        self.has_removed_connection = false;

        let mut groups = Vec::new();
        purview_core::bitset::for_each_set_combined(
            &self.exclusion_groups,
            &self.inclusion_groups,
            purview_core::WordOp::Or,
            |group_index| groups.push(group_index),
        );
        for group_index in groups {
            let handle = self.group_state[group_index as usize];
            self.mask_pool.retain_valid(handle, &self.valid_connections);
        }
    }

    /// Reconciles added and removed objects against every per-object
    /// and per-connection list, walking changed storage words only.
    pub(crate) fn update_objects_in_scope(&mut self, world: &WorldContext<'_>) {
        let scopable = world.objects.current_scopable();
        let prev_scopable = world.objects.prev_scopable();
        let word_count = self.object_word_count();
        debug_assert_eq!(scopable.num_words(), word_count);
        debug_assert_eq!(prev_scopable.num_words(), word_count);

        // Find changed words. An object can be created, filtered, and
        // destroyed within the same frame; such objects show up in the
        // dirty lists without appearing in either scopable frame, and
        // are treated as if they existed last frame so their filtering
        // data gets torn down.
        let mut modified: Vec<(usize, u32)> = Vec::new();
        {
            let scope_words = scopable.words();
            let prev_words = prev_scopable.words();
            let dirty_filter_words = self.objects_with_dirty_connection_filter.words();
            let dirty_owner_words = self.objects_with_dirty_owner.words();
            for w in 0..word_count {
                let current = scope_words[w];
                let prev = prev_words[w];
                let same_frame_removed =
                    !(current | prev) & (dirty_filter_words[w] | dirty_owner_words[w]);
                let fake_prev = prev | same_frame_removed;
                if (current ^ prev) | same_frame_removed != 0 {
                    modified.push((w, fake_prev));
                }
            }
        }
        if modified.is_empty() {
            return;
        }

        // Clear per-object state words and collect per-object work.
        let mut deleted: Vec<u32> = Vec::new();
        let mut added_subobjects: Vec<u32> = Vec::new();
        {
            let scope_words = scopable.words();
            let sub_words = world.objects.sub_object_indices().words();
            for &(w, fake_prev) in &modified {
                let existing = scope_words[w];

                // Deleted objects can't be dirty and can't carry filters.
                self.objects_with_dirty_connection_filter.words_mut()[w] &= existing;
                self.objects_with_owner_filter.words_mut()[w] &= existing;
                self.objects_with_dirty_owner.words_mut()[w] &= existing;

                let base = w as u32 * WORD_BITS;
                let mut deleted_bits = fake_prev & !existing;
                while deleted_bits != 0 {
                    let low = deleted_bits & deleted_bits.wrapping_neg();
                    deleted_bits ^= low;
                    deleted.push(base + low.trailing_zeros());
                }

                let added = existing & !fake_prev;
                // Objects that just entered scope must not linger
                // through hysteresis when immediately filtered out.
                self.hysteresis.exempt.words_mut()[w] |= added;

                let mut added_subs = added & sub_words[w];
                while added_subs != 0 {
                    let low = added_subs & added_subs.wrapping_neg();
                    added_subs ^= low;
                    added_subobjects.push(base + low.trailing_zeros());
                }
            }
        }

        // Tear down filtering state of deleted objects.
        for object in deleted {
            self.free_mask_for_object(ObjectIndex(object));
            let filter_index = self.object_filter_index[object as usize];
            if filter_index != INVALID_FILTER_INDEX {
                self.remove_from_dynamic_filter(ObjectIndex(object), filter_index);
            }
        }

        // Subobjects added after their root need the root re-evaluated
        // so they inherit its filter status, and the root's group
        // filters refreshed to cover them.
        let mut prev_root = ObjectIndex::INVALID;
        for sub in added_subobjects {
            let Some(root) = world.objects.root_of(ObjectIndex(sub)) else {
                continue;
            };
            if root == prev_root {
                continue;
            }
            prev_root = root;

            self.objects_requiring_dynamic_update.set(root.0);

            for &group in world.groups.groups_of(root) {
                let group_index = u32::from(group.0);
                if self.exclusion_groups.get(group_index) {
                    self.dirty_exclusion_groups.set(group_index);
                    self.has_dirty_exclusion_group = true;
                } else if self.inclusion_groups.get(group_index) {
                    self.dirty_inclusion_groups.set(group_index);
                    self.has_dirty_inclusion_group = true;
                }
            }

            // A root added this frame will be fully initialized anyway.
            if !prev_scopable.get(root.0) {
                continue;
            }
            if self.object_owner[root.0 as usize] != 0 {
                self.has_dirty_owner = true;
                self.objects_with_dirty_owner.set(root.0);
            }
            if self.objects_with_owner_filter.get(root.0)
                || self.objects_with_connection_mask.get(root.0)
            {
                self.has_dirty_connection_filter = true;
                // Updating the root updates all its subobjects.
                self.objects_with_dirty_connection_filter.set(root.0);
            }
        }

        // Reconcile every valid connection on the modified words: admit
        // brand new objects, mask off deleted ones.
        let scope_words = scopable.words();
        for connection in self.valid_connections.to_indices() {
            let state = &mut self.connections[connection as usize];
            for &(w, fake_prev) in &modified {
                let existing = scope_words[w];
                let new_objects = existing & !fake_prev;

                let filtered = (state.connection_filtered.words()[w] | new_objects) & existing;
                state.connection_filtered.words_mut()[w] = filtered;

                let excluded = state.group_excluded.words()[w] & existing;
                state.group_excluded.words_mut()[w] = excluded;

                let included = state.group_included.words()[w] & existing;
                state.group_included.words_mut()[w] = included;

                // Exclusion groups apply here; inclusion groups only
                // override dynamic filtering later.
                state.pre_dynamic_scope.words_mut()[w] = filtered & !excluded;

                // New objects may have been subobjects of dynamically
                // filtered roots in a previous life; reset their verdicts.
                state.dynamic_filtered_out.words_mut()[w] &= !new_objects;
                state.effective_filtered_out.words_mut()[w] &= !new_objects;
            }
        }
    }

    /// Builds the global "any connection cares about this object" set.
    pub(crate) fn build_relevant_objects(&mut self, world: &WorldContext<'_>) {
        let scopable = world.objects.current_scopable();
        if !self.cull_non_relevant {
            self.relevant_objects.copy_from(scopable);
            self.metrics.relevant_object_count = self.relevant_objects.count_ones();
            return;
        }

        let word_count = self.object_word_count();

        // Objects touched by any exclusion group, for the always-relevant
        // carve-out below.
        self.scratch_allowed.clear_all();
        for group_index in self.exclusion_groups.to_indices() {
            let members = world.groups.members_of(GroupHandle(group_index as u16));
            for &member in members {
                self.scratch_allowed.set(member.0);
                for &sub in world.objects.sub_objects(member) {
                    self.scratch_allowed.set(sub.0);
                }
            }
        }

        // Always-relevant objects: scopable and touched by no filter.
        {
            let scope_words = scopable.words();
            let owner_words = self.objects_with_owner_filter.words();
            let mask_words = self.all_connection_filtered.words();
            let dynamic_words = self.dynamic_filter_enabled.words();
            let group_words = self.scratch_allowed.words();
            let out = self.relevant_objects.words_mut();
            for w in 0..word_count {
                out[w] = scope_words[w]
                    & !(owner_words[w] | mask_words[w] | dynamic_words[w] | group_words[w]);
            }
        }

        // Union in every connection's final scope.
        for connection in self.valid_connections.to_indices() {
            let scope = &self.connections[connection as usize].scope;
            for (out, word) in self
                .relevant_objects
                .words_mut()
                .iter_mut()
                .zip(scope.words())
            {
                *out |= word;
            }
        }

        self.metrics.relevant_object_count = self.relevant_objects.count_ones();
    }

    /// Reports subobjects in scope whose root is filtered out. A hit is
    /// a pipeline bug; it is logged and counted, never silently fixed.
    pub(crate) fn validate_scope_consistency(&mut self, world: &WorldContext<'_>) {
        for connection in self.valid_connections.to_indices() {
            let scope = &self.connections[connection as usize].scope;
            let mut faults = 0u64;
            scope.for_each_set(|object| {
                if let Some(root) = world.objects.root_of(ObjectIndex(object)) {
                    if !scope.get(root.0) {
                        error!(
                            "scope consistency fault: subobject {object} in scope for connection {connection} while root {root} is not"
                        );
                        faults += 1;
                    }
                }
            });
            self.metrics.scope_consistency_faults += faults;
        }
    }
}
