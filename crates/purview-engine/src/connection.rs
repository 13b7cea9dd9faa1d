//! Per-connection scope state.

use purview_core::BitSet;

use crate::hysteresis::HysteresisUpdater;

/// Parallel bit sets tracking one connection's scope computation.
///
/// Allocated when the connection becomes valid and released on
/// disconnect. All sets are sized to the engine's object index bound.
#[derive(Default)]
pub(crate) struct ConnectionState {
    /// Objects surviving owner and connection filtering.
    pub connection_filtered: BitSet,
    /// Objects excluded by at least one exclusion group.
    pub group_excluded: BitSet,
    /// Objects force-included by an inclusion group, overriding dynamic
    /// filter verdicts only.
    pub group_included: BitSet,
    /// Combined pre-dynamic scope: `connection_filtered & !group_excluded`.
    pub pre_dynamic_scope: BitSet,
    /// The final scope after dynamic filtering, hysteresis, and
    /// dependent resolution.
    pub scope: BitSet,
    /// Raw dynamic-filter verdicts of the previous completed pass, used
    /// for frame-delta detection.
    pub dynamic_filtered_out: BitSet,
    /// Scratch accumulator for the current pass's merged verdicts.
    pub in_progress_filtered_out: BitSet,
    /// Dynamic filtered-out set after hysteresis adjustment; objects
    /// held by a countdown are absent here even though their raw
    /// verdict says filtered out.
    pub effective_filtered_out: BitSet,
    /// Hysteresis countdowns for this connection.
    pub hysteresis: HysteresisUpdater,
}

impl ConnectionState {
    /// (Re)initializes all sets, cleared, for `num_objects` indices.
    pub fn init(&mut self, num_objects: u32) {
        self.reset();
        self.resize(num_objects);
    }

    /// Grows all sets to cover `num_objects` indices.
    pub fn resize(&mut self, num_objects: u32) {
        self.connection_filtered.set_num_bits(num_objects);
        self.group_excluded.set_num_bits(num_objects);
        self.group_included.set_num_bits(num_objects);
        self.pre_dynamic_scope.set_num_bits(num_objects);
        self.scope.set_num_bits(num_objects);
        self.dynamic_filtered_out.set_num_bits(num_objects);
        self.in_progress_filtered_out.set_num_bits(num_objects);
        self.effective_filtered_out.set_num_bits(num_objects);
        self.hysteresis.resize(num_objects);
    }

    /// Releases all storage on disconnect.
    pub fn reset(&mut self) {
        self.connection_filtered = BitSet::empty();
        self.group_excluded = BitSet::empty();
        self.group_included = BitSet::empty();
        self.pre_dynamic_scope = BitSet::empty();
        self.scope = BitSet::empty();
        self.dynamic_filtered_out = BitSet::empty();
        self.in_progress_filtered_out = BitSet::empty();
        self.effective_filtered_out = BitSet::empty();
        self.hysteresis.reset();
    }
}
