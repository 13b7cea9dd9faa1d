//! Pooled per-connection bit masks.
//!
//! Any object or group that needs an explicit allow/deny bit per
//! connection allocates a fixed-stride mask from [`MaskPool`]: one bit
//! per connection id, rounded up to whole storage words. Slots are
//! addressed by a small [`MaskHandle`] and recycled through a used-slot
//! bit set that grows on exhaustion, so the pool never hands out
//! dangling references and owners can be stored as plain integers in
//! flat per-object arrays.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

use purview_core::{BitSet, ConnectionId, FilterStatus, WORD_BITS};

/// Number of slots the pool grows by when exhausted.
const SLOT_GROW_COUNT: u32 = 64;

/// Handle addressing one mask slot in a [`MaskPool`].
///
/// Handle 0 is reserved as the invalid handle; it is never returned by
/// [`MaskPool::alloc`], so zero-initialized handle arrays read as
/// "no mask".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct MaskHandle(pub u16);

impl MaskHandle {
    /// The reserved invalid handle.
    pub const INVALID: MaskHandle = MaskHandle(0);

    /// Whether this handle addresses an allocated slot.
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

/// Growable arena of fixed-stride per-connection masks.
pub struct MaskPool {
    /// Words per mask slot.
    stride: usize,
    /// Addressable connection bits per mask (connection ids `0..bits`).
    connection_bits: u32,
    /// Backing storage, `stride` words per slot.
    storage: Vec<u32>,
    /// Allocation state per slot; bit 0 is always set so handle 0 is
    /// never handed out.
    used: BitSet,
}

impl MaskPool {
    /// Creates a pool whose masks cover connection ids
    /// `0..=max_connections`.
    pub fn new(max_connections: u32) -> Self {
        let connection_bits = max_connections + 1;
        let stride = connection_bits.div_ceil(WORD_BITS) as usize;
        let mut used = BitSet::new(SLOT_GROW_COUNT);
        used.set(0);
        Self {
            stride,
            connection_bits,
            storage: vec![0; stride * SLOT_GROW_COUNT as usize],
            used,
        }
    }

    /// Words per mask slot.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Addressable connection bits per mask.
    pub fn connection_bits(&self) -> u32 {
        self.connection_bits
    }

    /// Number of live allocations.
    pub fn allocated_count(&self) -> u32 {
        // Slot 0 is a sentinel, not an allocation.
        self.used.count_ones() - 1
    }

    /// Allocates a mask slot, growing the pool if every slot is in use.
    /// The returned mask's bits are all clear (`Disallow` everywhere).
    ///
    /// # Panics
    ///
    /// Panics if the pool exhausts the 16-bit handle space.
    pub fn alloc(&mut self) -> MaskHandle {
        let index = match self.used.find_first_zero() {
            Some(index) => index,
            None => {
                let index = self.used.num_bits();
                assert!(
                    index + SLOT_GROW_COUNT <= u16::MAX as u32 + 1,
                    "mask pool handle space exhausted"
                );
                self.used.set_num_bits(index + SLOT_GROW_COUNT);
                self.storage
                    .resize(self.stride * self.used.num_bits() as usize, 0);
                index
            }
        };
        self.used.set(index);
        let handle = MaskHandle(index as u16);
        self.mask_words_mut(handle).fill(0);
        handle
    }

    /// Returns a slot to the pool.
    pub fn free(&mut self, handle: MaskHandle) {
        debug_assert!(self.is_allocated(handle), "freeing unallocated mask {handle:?}");
        if handle.is_valid() {
            self.used.clear(handle.0 as u32);
        }
    }

    /// Whether `handle` addresses a live allocation.
    pub fn is_allocated(&self, handle: MaskHandle) -> bool {
        handle.is_valid() && self.used.get(handle.0 as u32)
    }

    /// The storage words of a mask.
    pub fn mask_words(&self, handle: MaskHandle) -> &[u32] {
        let start = handle.0 as usize * self.stride;
        &self.storage[start..start + self.stride]
    }

    /// The mutable storage words of a mask.
    pub fn mask_words_mut(&mut self, handle: MaskHandle) -> &mut [u32] {
        let start = handle.0 as usize * self.stride;
        &mut self.storage[start..start + self.stride]
    }

    /// Sets every connection bit of the mask to `status`.
    pub fn fill(&mut self, handle: MaskHandle, status: FilterStatus) {
        let word = if status.is_allowed() { !0 } else { 0 };
        self.mask_words_mut(handle).fill(word);
    }

    /// Sets the bit for `connection` to `status`.
    pub fn set_status(&mut self, handle: MaskHandle, connection: ConnectionId, status: FilterStatus) {
        debug_assert!(connection.0 < self.connection_bits);
        let words = self.mask_words_mut(handle);
        let bit = 1u32 << (connection.0 % WORD_BITS);
        let word = &mut words[(connection.0 / WORD_BITS) as usize];
        if status.is_allowed() {
            *word |= bit;
        } else {
            *word &= !bit;
        }
    }

    /// The status recorded for `connection`.
    pub fn status(&self, handle: MaskHandle, connection: ConnectionId) -> FilterStatus {
        debug_assert!(connection.0 < self.connection_bits);
        let words = self.mask_words(handle);
        let bit = words[(connection.0 / WORD_BITS) as usize] & (1 << (connection.0 % WORD_BITS));
        FilterStatus::from_bit(bit != 0)
    }

    /// Whether any real connection (id >= 1) is `Allow` in the mask.
    pub fn any_allowed(&self, handle: MaskHandle) -> bool {
        self.scan(handle, |word| word)
    }

    /// Whether any real connection (id >= 1) is `Disallow` in the mask.
    pub fn any_disallowed(&self, handle: MaskHandle) -> bool {
        self.scan(handle, |word| !word)
    }

    /// Clears mask bits for connections not present in `valid`.
    pub fn retain_valid(&mut self, handle: MaskHandle, valid: &BitSet) {
        let start = handle.0 as usize * self.stride;
        for (offset, word) in self.storage[start..start + self.stride].iter_mut().enumerate() {
            *word &= valid.words().get(offset).copied().unwrap_or(0);
        }
    }

    /// Scans connection bits `1..connection_bits` of the mask through
    /// `transform`, reporting whether any transformed bit is set.
    fn scan(&self, handle: MaskHandle, transform: impl Fn(u32) -> u32) -> bool {
        let words = self.mask_words(handle);
        let last = self.stride - 1;
        for (i, &word) in words.iter().enumerate() {
            let mut bits = transform(word);
            if i == 0 {
                // Connection id 0 is the "no connection" sentinel.
                bits &= !1;
            }
            if i == last {
                let rem = self.connection_bits % WORD_BITS;
                if rem != 0 {
                    bits &= (1u32 << rem) - 1;
                }
            }
            if bits != 0 {
                return true;
            }
        }
        false
    }
}
