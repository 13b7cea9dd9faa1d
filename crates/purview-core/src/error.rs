//! Error types shared across the Purview workspace.

use std::error::Error;
use std::fmt;

use crate::id::{ConnectionId, FilterHandle, GroupHandle, ObjectIndex};

/// Errors from scope-engine mutators.
///
/// All variants are recoverable rejections: the call leaves prior state
/// intact and the engine keeps running. Conditions that indicate a bug
/// in a filter plugin or in the pipeline itself are surfaced through
/// the optional consistency validation pass instead, never through this
/// type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterError {
    /// A filter handle that names no known static or dynamic filter.
    InvalidFilterHandle {
        /// The offending handle.
        handle: FilterHandle,
    },
    /// A connection id that is neither 0 nor currently valid.
    InvalidConnection {
        /// The offending connection id.
        connection: ConnectionId,
    },
    /// A group handle the group registry does not recognize.
    InvalidGroup {
        /// The offending group handle.
        group: GroupHandle,
    },
    /// The reserved group handle was passed to a mutator.
    ReservedGroup {
        /// The offending group handle.
        group: GroupHandle,
    },
    /// The group is already used by another filtering role.
    GroupAlreadyFiltering {
        /// The offending group handle.
        group: GroupHandle,
    },
    /// The group has no filtering role, so the operation has no target.
    NotAFilterGroup {
        /// The offending group handle.
        group: GroupHandle,
    },
    /// Dynamic filters cannot be assigned to subobjects; they always
    /// follow their root object's verdict.
    SubObjectNotFilterable {
        /// The subobject the caller tried to filter.
        object: ObjectIndex,
    },
    /// A connection bit set wider than the engine's connection space.
    ConnectionSetTooLarge {
        /// Number of bits in the rejected set.
        bits: u32,
        /// Maximum accepted number of bits.
        max: u32,
    },
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidFilterHandle { handle } => {
                write!(f, "unknown filter handle {handle}")
            }
            Self::InvalidConnection { connection } => {
                write!(f, "connection {connection} is not valid")
            }
            Self::InvalidGroup { group } => write!(f, "group {group} is not valid"),
            Self::ReservedGroup { group } => {
                write!(f, "group {group} is reserved and cannot be filtered")
            }
            Self::GroupAlreadyFiltering { group } => {
                write!(f, "group {group} is already used for filtering")
            }
            Self::NotAFilterGroup { group } => {
                write!(f, "group {group} has no filtering role")
            }
            Self::SubObjectNotFilterable { object } => {
                write!(f, "object {object} is a subobject and cannot carry a dynamic filter")
            }
            Self::ConnectionSetTooLarge { bits, max } => {
                write!(f, "connection set of {bits} bits exceeds the maximum of {max}")
            }
        }
    }
}

impl Error for FilterError {}
