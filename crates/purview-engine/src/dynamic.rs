//! Dynamic filter dispatch: per-connection verdict collection, frame
//! delta processing, hysteresis application, and dependent-object
//! resolution.
//!
//! Per connection, every populated filter produces an allowed-set over
//! its member objects. Verdicts are merged so a filter can only speak
//! for objects it owns, then diffed against the previous frame: only
//! objects whose status changed, objects with dependents, and objects
//! flagged for mandatory re-evaluation proceed to the expensive
//! per-object handling, which bounds per-tick cost to the delta.

use purview_core::{BitSet, ConnectionId, ObjectIndex, WorldContext, WORD_BITS};
use purview_filter::{FilterParams, PreFilterParams, UpdateObjectsParams};

use crate::engine::{ScopeEngine, INVALID_FILTER_INDEX};

/// Upper bound on objects per `update_objects` batch.
const MAX_OBJECTS_PER_BATCH: usize = 512;

/// Whether `object` may replicate given the connection scope: allowed
/// if its own scope bit is set, or, recursively, if any of its
/// dependent parents is allowed. An already-resolved in-scope parent
/// short-circuits the walk. The parent graph must be acyclic.
fn dependent_scope_allowed(world: &WorldContext<'_>, scope: &BitSet, object: ObjectIndex) -> bool {
    for &parent in world.objects.dependent_parents(object) {
        if dependent_scope_allowed(world, scope, parent) {
            return true;
        }
    }
    scope.get(object.0)
}

fn set_with_sub_objects(bits: &mut BitSet, world: &WorldContext<'_>, object: u32, value: bool) {
    bits.set_value(object, value);
    for &sub in world.objects.sub_objects(ObjectIndex(object)) {
        bits.set_value(sub.0, value);
    }
}

impl ScopeEngine {
    /// Dispatches batched `update_objects` calls for objects the host
    /// marked dirty, grouped by owning filter.
    pub(crate) fn notify_filters_of_dirty_objects(&mut self) {
        if !self.has_filters_with_update_trait || !self.dirty_objects.any_set() {
            self.dirty_objects.clear_all();
            return;
        }
        let dirty = self.dirty_objects.to_indices();
        self.dirty_objects.clear_all();

        let mut per_filter: Vec<Vec<ObjectIndex>> = vec![Vec::new(); self.filters.len()];
        for chunk in dirty.chunks(MAX_OBJECTS_PER_BATCH) {
            for list in &mut per_filter {
                list.clear();
            }
            for &object in chunk {
                let filter_index = self.object_filter_index[object as usize];
                if filter_index != INVALID_FILTER_INDEX {
                    per_filter[filter_index as usize].push(ObjectIndex(object));
                }
            }
            self.metrics.dirty_object_batches += 1;
            for (filter_index, objects) in per_filter.iter().enumerate() {
                if objects.is_empty() {
                    continue;
                }
                let infos = &mut self.filter_object_infos;
                let slot = &mut self.filters[filter_index];
                slot.filter.update_objects(UpdateObjectsParams { objects, infos });
            }
        }
    }

    /// Gives every populated filter its per-tick setup call.
    pub(crate) fn pre_filter_pass(&mut self) {
        for slot in &mut self.filters {
            if slot.object_count == 0 {
                continue;
            }
            slot.filter.pre_filter(PreFilterParams {
                valid_connections: &self.valid_connections,
                infos: &self.filter_object_infos,
            });
        }
    }

    /// Gives every populated filter its per-tick cleanup call.
    pub(crate) fn post_filter_pass(&mut self) {
        for slot in &mut self.filters {
            if slot.object_count == 0 {
                continue;
            }
            slot.filter.post_filter();
        }
    }

    /// Runs the full dynamic filtering pass for every valid connection
    /// and produces each connection's final scope.
    pub(crate) fn update_dynamic_filtering(&mut self, world: &WorldContext<'_>) {
        let word_count = self.object_word_count();
        let stride = self.hysteresis.stride;
        let start_id = self.hysteresis.start_id;

        let mut filtered_out: Vec<u32> = Vec::new();
        let mut filtered_out_dependents: Vec<u32> = Vec::new();
        let mut filtered_in: Vec<u32> = Vec::new();
        let mut expired: Vec<u32> = Vec::new();

        for connection in self.valid_connections.to_indices() {
            let connection_index = connection as usize;

            // Collect and merge verdicts from every populated filter.
            self.connections[connection_index]
                .in_progress_filtered_out
                .clear_all();
            for filter_index in 0..self.filters.len() {
                if self.filters[filter_index].object_count == 0 {
                    continue;
                }
                self.scratch_allowed.clear_all();
                {
                    let slot = &mut self.filters[filter_index];
                    slot.filter.filter(FilterParams {
                        connection: ConnectionId(connection),
                        view: world.connections.view(ConnectionId(connection)),
                        allowed: &mut self.scratch_allowed,
                        infos: &self.filter_object_infos,
                    });
                }
                let members = self.filters[filter_index].members.words();
                let allowed = self.scratch_allowed.words();
                let merged = self.connections[connection_index]
                    .in_progress_filtered_out
                    .words_mut();
                for w in 0..word_count {
                    // Keep verdicts for objects outside this filter's
                    // member set; add this filter's filtered-out objects.
                    merged[w] = (merged[w] & !members[w]) | (!allowed[w] & members[w]);
                }
            }

            // Frame delta: only changed objects, objects with dependents,
            // and objects flagged for re-evaluation proceed.
            filtered_out.clear();
            filtered_out_dependents.clear();
            filtered_in.clear();
            {
                let dependent_words = world.objects.dependent_indices().words();
                let enabled_words = self.dynamic_filter_enabled.words();
                let requiring_words = self.objects_requiring_dynamic_update.words();
                let state = &mut self.connections[connection_index];
                let current_src = &state.in_progress_filtered_out;
                let included = &state.group_included;
                let previous = &mut state.dynamic_filtered_out;
                for w in 0..word_count {
                    let dependents = dependent_words[w];
                    // Group-included objects are masked off here so a no
                    // longer included object is also subject to hysteresis.
                    let current = current_src.words()[w] & !included.words()[w];
                    let prev = previous.words()[w];
                    let modified = prev ^ current;
                    let to_process =
                        ((modified | dependents) & enabled_words[w]) | requiring_words[w];
                    if to_process == 0 {
                        continue;
                    }
                    previous.words_mut()[w] = current;

                    let base = w as u32 * WORD_BITS;
                    let mut disabled = current & to_process;
                    while disabled != 0 {
                        let low = disabled & disabled.wrapping_neg();
                        disabled ^= low;
                        let object = base + low.trailing_zeros();
                        if dependents & low != 0 {
                            filtered_out_dependents.push(object);
                        } else {
                            filtered_out.push(object);
                        }
                    }
                    let mut enabled = !current & to_process;
                    while enabled != 0 {
                        let low = enabled & enabled.wrapping_neg();
                        enabled ^= low;
                        filtered_in.push(base + low.trailing_zeros());
                    }
                }
            }

            // Frames until this connection's next countdown update; 0
            // means the update runs later this same tick.
            let phase = (connection % stride + stride - start_id) % stride;

            if self.hysteresis.enabled {
                // Re-allowed objects drop out of hysteresis immediately.
                self.connections[connection_index]
                    .hysteresis
                    .remove_list(&filtered_in);
                for &object in &filtered_in {
                    let state = &mut self.connections[connection_index];
                    set_with_sub_objects(&mut state.effective_filtered_out, world, object, false);
                }

                for &object in &filtered_out {
                    let frame_count = u16::from(self.hysteresis_frame_counts[object as usize]);
                    let already_out = self.connections[connection_index]
                        .effective_filtered_out
                        .get(object);
                    // An already filtered-out object cannot re-enter
                    // hysteresis; this happens when a subobject was added
                    // and the root was flagged for processing.
                    let eligible = !already_out
                        && frame_count > 0
                        && self.dynamic_filter_enabled.get(object)
                        && !self.hysteresis.exempt.get(object);
                    if eligible {
                        let total = frame_count + stride as u16 - phase as u16;
                        self.connections[connection_index]
                            .hysteresis
                            .set_frame_count(object, total);
                    } else {
                        let state = &mut self.connections[connection_index];
                        set_with_sub_objects(&mut state.effective_filtered_out, world, object, true);
                    }
                }

                if phase == 0 {
                    expired.clear();
                    self.connections[connection_index]
                        .hysteresis
                        .update(stride as u16, &mut expired);
                    self.metrics.hysteresis_evictions += expired.len() as u64;
                    for &object in &expired {
                        let state = &mut self.connections[connection_index];
                        set_with_sub_objects(&mut state.effective_filtered_out, world, object, true);
                    }
                }
            } else {
                for &object in &filtered_in {
                    let state = &mut self.connections[connection_index];
                    set_with_sub_objects(&mut state.effective_filtered_out, world, object, false);
                }
                for &object in &filtered_out {
                    let state = &mut self.connections[connection_index];
                    set_with_sub_objects(&mut state.effective_filtered_out, world, object, true);
                }
            }

            // The connection's scope, before dependent resolution.
            {
                let state = &mut self.connections[connection_index];
                let pre = &state.pre_dynamic_scope;
                let out = &state.effective_filtered_out;
                let scope = &mut state.scope;
                for w in 0..word_count {
                    scope.words_mut()[w] = pre.words()[w] & !out.words()[w];
                }
                // Dependent objects start filtered out so the parent
                // walk below sees their own verdict.
                for &object in &filtered_out_dependents {
                    scope.clear(object);
                }
            }

            // Dependent objects may only leave scope if every parent
            // chain is out too; they get their own hysteresis.
            if self.hysteresis.enabled {
                let next_phase = if phase == 0 { stride } else { phase };
                for &object in &filtered_out_dependents {
                    let allow = dependent_scope_allowed(
                        world,
                        &self.connections[connection_index].scope,
                        ObjectIndex(object),
                    );
                    if allow {
                        let state = &mut self.connections[connection_index];
                        state.hysteresis.remove(object);
                        state.effective_filtered_out.clear(object);
                        state.scope.set(object);
                        for &sub in world.objects.sub_objects(ObjectIndex(object)) {
                            state.effective_filtered_out.clear(sub.0);
                            let in_pre = state.pre_dynamic_scope.get(sub.0);
                            state.scope.set_value(sub.0, in_pre);
                        }
                    } else {
                        let frame_count = u16::from(self.hysteresis_frame_counts[object as usize]);
                        let state = &mut self.connections[connection_index];
                        let mut is_out = state.effective_filtered_out.get(object);
                        if !is_out {
                            // A countdown already in flight keeps running;
                            // otherwise start one, or evict right away if
                            // the object has no hysteresis budget.
                            if !state.hysteresis.is_active(object) {
                                if frame_count > 0 {
                                    let total = frame_count + stride as u16 - next_phase as u16;
                                    state.hysteresis.set_frame_count(object, total);
                                } else {
                                    is_out = true;
                                }
                            }
                            state.scope.set_value(object, !is_out);
                            for &sub in world.objects.sub_objects(ObjectIndex(object)) {
                                state.effective_filtered_out.set_value(sub.0, is_out);
                                let in_pre = state.pre_dynamic_scope.get(sub.0);
                                state.scope.set_value(sub.0, !is_out && in_pre);
                            }
                        } else {
                            state.effective_filtered_out.set(object);
                            state.scope.clear(object);
                            for &sub in world.objects.sub_objects(ObjectIndex(object)) {
                                state.effective_filtered_out.set(sub.0);
                                state.scope.clear(sub.0);
                            }
                        }
                    }
                }
            } else {
                for &object in &filtered_out_dependents {
                    let allow = dependent_scope_allowed(
                        world,
                        &self.connections[connection_index].scope,
                        ObjectIndex(object),
                    );
                    let state = &mut self.connections[connection_index];
                    state.scope.set_value(object, allow);
                    for &sub in world.objects.sub_objects(ObjectIndex(object)) {
                        let in_pre = state.pre_dynamic_scope.get(sub.0);
                        state.scope.set_value(sub.0, allow && in_pre);
                    }
                }
            }
        }
    }
}
