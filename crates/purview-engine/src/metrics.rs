//! Per-tick metrics for the scope engine.
//!
//! [`FilterMetrics`] captures timing and counter data for telemetry and
//! profiling. Per-tick fields are overwritten each tick; cumulative
//! fields count since engine construction.

/// Timing and counter metrics collected by the engine.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilterMetrics {
    /// Wall-clock time of the last tick, in microseconds.
    pub total_us: u64,
    /// Time spent in the dynamic filtering pass of the last tick, in
    /// microseconds.
    pub dynamic_filtering_us: u64,
    /// Size of the global relevant-object set after the last tick.
    pub relevant_object_count: u32,
    /// Hysteresis countdowns in flight after the last tick, summed over
    /// all connections.
    pub active_hysteresis_count: u32,
    /// Cumulative number of connections added.
    pub connections_initialized: u64,
    /// Cumulative number of objects evicted by an expired hysteresis
    /// countdown.
    pub hysteresis_evictions: u64,
    /// Cumulative number of mutator calls rejected with an error.
    pub rejected_mutations: u64,
    /// Cumulative number of dirty-object batches dispatched to filters.
    pub dirty_object_batches: u64,
    /// Cumulative number of consistency faults reported by the optional
    /// validation pass.
    pub scope_consistency_faults: u64,
}
