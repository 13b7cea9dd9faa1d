//! Hysteresis countdowns and the engine-global throttle state.
//!
//! When an object is freshly filtered out by a dynamic filter, a
//! per-connection countdown keeps it in scope for its profile's frame
//! count. Connections are processed in a round-robin throttle: with a
//! throttle stride of `T`, a connection only ticks its countdowns on
//! frames where `connection % T == frame % T`, decrementing by `T` at
//! once. Countdown values are pre-adjusted at assignment so that, for a
//! profile of `N` frames, eviction lands between `N` and `N + T - 1`
//! ticks after the disallow verdict regardless of where in the cycle
//! the countdown started:
//!
//! `total = N + T - phase`, where `phase` is the number of frames until
//! the connection's next countdown update (0 when the update runs later
//! this same frame).

use purview_core::BitSet;

use crate::config::HysteresisConfig;

/// Per-connection countdown table.
///
/// A countdown is active while its object's bit is set in `active`;
/// counts for inactive objects are meaningless.
#[derive(Default)]
pub(crate) struct HysteresisUpdater {
    counts: Vec<u16>,
    active: BitSet,
}

impl HysteresisUpdater {
    /// Grows (or initializes) the countdown table to cover `num_objects`
    /// object indices.
    pub fn resize(&mut self, num_objects: u32) {
        self.counts.resize(num_objects as usize, 0);
        self.active.set_num_bits(num_objects);
    }

    /// Drops all countdowns and storage.
    pub fn reset(&mut self) {
        self.counts = Vec::new();
        self.active = BitSet::empty();
    }

    /// Starts or restarts a countdown of `total` update-adjusted frames.
    pub fn set_frame_count(&mut self, object: u32, total: u16) {
        debug_assert!(total > 0);
        self.counts[object as usize] = total;
        self.active.set(object);
    }

    /// Cancels the countdown for `object`, if any.
    pub fn remove(&mut self, object: u32) {
        if self.active.get(object) {
            self.active.clear(object);
            self.counts[object as usize] = 0;
        }
    }

    /// Cancels countdowns for every object in `objects`.
    pub fn remove_set(&mut self, objects: &BitSet) {
        for (word, cancel) in self.active.words_mut().iter_mut().zip(objects.words()) {
            *word &= !cancel;
        }
    }

    /// Cancels countdowns for every listed object.
    pub fn remove_list(&mut self, objects: &[u32]) {
        for &object in objects {
            self.remove(object);
        }
    }

    /// Whether `object` has a countdown in flight.
    pub fn is_active(&self, object: u32) -> bool {
        self.active.get(object)
    }

    /// Number of countdowns in flight.
    pub fn active_count(&self) -> u32 {
        self.active.count_ones()
    }

    /// Ticks every active countdown down by `decrement`, appending the
    /// objects whose countdown ran out to `expired`.
    pub fn update(&mut self, decrement: u16, expired: &mut Vec<u32>) {
        for word_index in 0..self.active.num_words() {
            let mut word = self.active.words()[word_index];
            if word == 0 {
                continue;
            }
            let mut remaining = word;
            while remaining != 0 {
                let low = remaining & remaining.wrapping_neg();
                remaining ^= low;
                let object = word_index as u32 * 32 + low.trailing_zeros();
                let count = self.counts[object as usize];
                if count <= decrement {
                    self.counts[object as usize] = 0;
                    word ^= low;
                    expired.push(object);
                } else {
                    self.counts[object as usize] = count - decrement;
                }
            }
            self.active.words_mut()[word_index] = word;
        }
    }
}

/// Engine-global hysteresis state shared by all connections.
pub(crate) struct HysteresisState {
    /// Whether hysteresis processing is enabled at all.
    pub enabled: bool,
    /// Connection round-robin period.
    pub stride: u32,
    /// This frame's update slot: connections with
    /// `connection % stride == start_id` tick their countdowns.
    pub start_id: u32,
    /// Objects whose countdowns must be cancelled on every connection
    /// during the next pre-pass (e.g. objects leaving their dynamic
    /// filter).
    pub objects_to_clear: BitSet,
    /// Set-bit count of `objects_to_clear`, kept to skip the pre-pass
    /// cheaply.
    pub objects_to_clear_count: u32,
    /// Objects exempt from receiving a countdown this tick: freshly
    /// added objects must not linger through hysteresis.
    pub exempt: BitSet,
}

impl HysteresisState {
    pub fn new(config: &HysteresisConfig, num_objects: u32) -> Self {
        Self {
            enabled: config.enabled,
            stride: u32::from(config.update_throttle.max(1)),
            start_id: 0,
            objects_to_clear: BitSet::new(num_objects),
            objects_to_clear_count: 0,
            exempt: BitSet::new(num_objects),
        }
    }

    pub fn resize(&mut self, num_objects: u32) {
        self.objects_to_clear.set_num_bits(num_objects);
        self.exempt.set_num_bits(num_objects);
    }

    /// Queues `object` for countdown cancellation on every connection.
    pub fn clear_from(&mut self, object: u32) {
        self.objects_to_clear.set(object);
        self.objects_to_clear_count += 1;
    }
}
