//! Collaborator contracts the scope engine consumes.
//!
//! The engine owns no object, connection, or group identities. It reads
//! them through these traits, bundled per call into a [`WorldContext`]
//! so every pipeline stage receives its collaborators explicitly.

use crate::bitset::BitSet;
use crate::id::{ConnectionId, GroupHandle, ObjectIndex};
use crate::view::ReplicationView;

/// Read access to the external object registry.
///
/// Object indices are dense and recycled by the registry. The registry
/// is also the source of truth for subobject and dependent-parent
/// relationships; the engine only derives scope from them.
pub trait ObjectRegistry {
    /// Exclusive upper bound on object indices currently in use.
    ///
    /// Every per-object list in the engine is sized to this bound. It
    /// may only grow; the registry signals growth before the next tick.
    fn max_object_index(&self) -> u32;

    /// Objects that can be replicated this frame.
    fn current_scopable(&self) -> &BitSet;

    /// Objects that could be replicated the previous frame.
    fn prev_scopable(&self) -> &BitSet;

    /// Subobject indices bound to `root`, in registry order.
    fn sub_objects(&self, root: ObjectIndex) -> &[ObjectIndex];

    /// The root object of `object`, if `object` is a subobject.
    fn root_of(&self, object: ObjectIndex) -> Option<ObjectIndex>;

    /// The set of all indices that are subobjects.
    fn sub_object_indices(&self) -> &BitSet;

    /// Parent objects `object` depends on, in registry order.
    fn dependent_parents(&self, object: ObjectIndex) -> &[ObjectIndex];

    /// The set of all indices that declare at least one dependent parent.
    fn dependent_indices(&self) -> &BitSet;
}

/// Read access to the external connection registry.
pub trait ConnectionRegistry {
    /// Maximum number of simultaneously valid connections.
    fn max_connection_count(&self) -> u32;

    /// Whether `connection` is currently live.
    fn is_valid(&self, connection: ConnectionId) -> bool;

    /// The replication view for `connection`, handed through to dynamic
    /// filters unchanged.
    fn view(&self, connection: ConnectionId) -> &ReplicationView;
}

/// Read access to the external group registry.
pub trait GroupRegistry {
    /// Whether `group` names a live group.
    fn is_valid_group(&self, group: GroupHandle) -> bool;

    /// Member objects of `group`, in registry order.
    fn members_of(&self, group: GroupHandle) -> &[ObjectIndex];

    /// Groups `object` is a member of, in registry order.
    fn groups_of(&self, object: ObjectIndex) -> &[GroupHandle];

    /// Human-readable group name for diagnostics.
    fn group_name(&self, group: GroupHandle) -> Option<&str> {
        let _ = group;
        None
    }
}

/// The collaborators for one engine call, passed by reference into
/// every pipeline stage.
#[derive(Clone, Copy)]
pub struct WorldContext<'a> {
    /// The object registry.
    pub objects: &'a dyn ObjectRegistry,
    /// The connection registry.
    pub connections: &'a dyn ConnectionRegistry,
    /// The group registry.
    pub groups: &'a dyn GroupRegistry,
}
