//! Strongly-typed identifiers for objects, connections, groups and filters.

use std::fmt;

/// Dense index identifying a replicated object.
///
/// Indices are owned and recycled by the external object registry; this
/// engine only keys secondary state off them. Index 0 is reserved as the
/// invalid index and never refers to a real object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectIndex(pub u32);

impl ObjectIndex {
    /// The reserved invalid index.
    pub const INVALID: ObjectIndex = ObjectIndex(0);

    /// Whether this index refers to a real object.
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for ObjectIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ObjectIndex {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Identifier for one connected peer.
///
/// Connection ids are 1-based; id 0 is reserved as "no connection" and
/// is used to mark objects without an owning connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u32);

impl ConnectionId {
    /// The reserved "no connection" id.
    pub const NONE: ConnectionId = ConnectionId(0);

    /// Whether this id could refer to a real connection.
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ConnectionId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Handle identifying a named object group.
///
/// Group identity and membership are owned by the external group
/// registry. Index 0 is reserved; filter mutators reject it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupHandle(pub u16);

impl GroupHandle {
    /// The reserved invalid/"system" group index.
    pub const RESERVED: GroupHandle = GroupHandle(0);

    /// Whether this handle refers to a non-reserved group.
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// The dense index of this group.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for GroupHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-connection replication verdict.
///
/// The discriminants are load-bearing: `Allow` maps to a set bit in
/// connection masks and `Disallow` to a cleared bit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FilterStatus {
    /// Replication is not allowed.
    #[default]
    Disallow,
    /// Replication is allowed.
    Allow,
}

impl FilterStatus {
    /// Maps a mask bit to a status.
    pub fn from_bit(bit: bool) -> Self {
        if bit {
            FilterStatus::Allow
        } else {
            FilterStatus::Disallow
        }
    }

    /// Whether this status allows replication.
    pub fn is_allowed(self) -> bool {
        matches!(self, FilterStatus::Allow)
    }
}

impl fmt::Display for FilterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterStatus::Allow => write!(f, "allow"),
            FilterStatus::Disallow => write!(f, "disallow"),
        }
    }
}

/// Handle identifying a filter an object can be assigned to.
///
/// The most significant bit classifies the handle: clear for the static
/// filters (none, to-owner, to-connection), set for dynamic filters
/// where the low bits carry the dynamic filter index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FilterHandle(u32);

impl FilterHandle {
    const DYNAMIC_FLAG: u32 = 1 << 31;

    /// No filtering: the object replicates to every connection.
    pub const NONE: FilterHandle = FilterHandle(0);
    /// Owner filtering: the object replicates only to its owning connection.
    pub const TO_OWNER: FilterHandle = FilterHandle(1);
    /// Connection filtering: explicit per-connection allow/deny mask.
    ///
    /// This handle exists for queries and diagnostics only; enabling a
    /// connection filter goes through a dedicated mutator that also
    /// carries the mask.
    pub const TO_CONNECTION: FilterHandle = FilterHandle(2);

    /// Builds the handle for the dynamic filter at `index`.
    pub fn dynamic(index: u32) -> Self {
        FilterHandle(Self::DYNAMIC_FLAG | index)
    }

    /// Whether this handle refers to a dynamic filter.
    pub fn is_dynamic(self) -> bool {
        self.0 & Self::DYNAMIC_FLAG != 0
    }

    /// Whether this handle refers to a static filter (including none).
    pub fn is_static(self) -> bool {
        !self.is_dynamic()
    }

    /// The dynamic filter index, if this is a dynamic handle.
    pub fn dynamic_index(self) -> Option<u32> {
        self.is_dynamic().then_some(self.0 & !Self::DYNAMIC_FLAG)
    }

    /// The raw handle value.
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for FilterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            FilterHandle::NONE => write!(f, "no-filter"),
            FilterHandle::TO_OWNER => write!(f, "to-owner"),
            FilterHandle::TO_CONNECTION => write!(f, "to-connection"),
            other => match other.dynamic_index() {
                Some(index) => write!(f, "dynamic:{index}"),
                None => write!(f, "static:{:#x}", other.0),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_ids_are_invalid() {
        assert!(!ObjectIndex::INVALID.is_valid());
        assert!(!ConnectionId::NONE.is_valid());
        assert!(!GroupHandle::RESERVED.is_valid());
        assert!(ObjectIndex(1).is_valid());
        assert!(ConnectionId(1).is_valid());
        assert!(GroupHandle(1).is_valid());
    }

    #[test]
    fn filter_handle_classification() {
        assert!(FilterHandle::NONE.is_static());
        assert!(FilterHandle::TO_OWNER.is_static());
        assert!(FilterHandle::TO_CONNECTION.is_static());
        assert_eq!(FilterHandle::NONE.dynamic_index(), None);

        let dynamic = FilterHandle::dynamic(3);
        assert!(dynamic.is_dynamic());
        assert!(!dynamic.is_static());
        assert_eq!(dynamic.dynamic_index(), Some(3));
    }

    #[test]
    fn filter_handle_display() {
        assert_eq!(FilterHandle::NONE.to_string(), "no-filter");
        assert_eq!(FilterHandle::TO_OWNER.to_string(), "to-owner");
        assert_eq!(FilterHandle::dynamic(7).to_string(), "dynamic:7");
    }

    #[test]
    fn status_bit_mapping() {
        assert_eq!(FilterStatus::from_bit(true), FilterStatus::Allow);
        assert_eq!(FilterStatus::from_bit(false), FilterStatus::Disallow);
        assert!(FilterStatus::Allow.is_allowed());
        assert!(!FilterStatus::Disallow.is_allowed());
    }
}
