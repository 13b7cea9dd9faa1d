//! Parameter structs passed through the filter lifecycle.

use purview_core::{BitSet, ConnectionId, ObjectIndex, ReplicationView};

/// Opaque per-object state a filter may keep inside the engine.
///
/// The engine owns one info per object index and hands it to the
/// owning filter in [`add_object`](crate::ObjectFilter::add_object),
/// [`update_objects`](crate::ObjectFilter::update_objects) and
/// [`remove_object`](crate::ObjectFilter::remove_object). The layout of
/// `data` is entirely up to the filter; the engine zeroes it before
/// `add_object` and never interprets it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FilterObjectInfo {
    /// Filter-defined payload.
    pub data: [u16; 4],
}

/// Parameters for [`init`](crate::ObjectFilter::init).
#[derive(Clone, Copy, Debug)]
pub struct FilterInitParams {
    /// Exclusive upper bound on object indices at init time. Growth is
    /// signaled through
    /// [`on_max_object_index_increased`](crate::ObjectFilter::on_max_object_index_increased).
    pub max_object_index: u32,
    /// Maximum number of simultaneously valid connections.
    pub max_connection_count: u32,
}

/// Parameters for [`add_object`](crate::ObjectFilter::add_object).
pub struct AddObjectParams<'a> {
    /// The object's info blob, zeroed by the engine. The filter fills
    /// it as needed and owns its meaning from here on.
    pub info: &'a mut FilterObjectInfo,
    /// Configuration profile requested by the caller, if any.
    pub profile: Option<&'a str>,
}

/// Parameters for [`update_objects`](crate::ObjectFilter::update_objects).
///
/// Delivered in batches once per tick for member objects the host
/// marked dirty, so filters can refresh internal state incrementally
/// instead of being re-evaluated in full.
pub struct UpdateObjectsParams<'a> {
    /// Dirty member objects of this filter.
    pub objects: &'a [ObjectIndex],
    /// All object info blobs, indexed by object index.
    pub infos: &'a mut [FilterObjectInfo],
}

/// Parameters for [`pre_filter`](crate::ObjectFilter::pre_filter).
pub struct PreFilterParams<'a> {
    /// Currently valid connections.
    pub valid_connections: &'a BitSet,
    /// All object info blobs, indexed by object index.
    pub infos: &'a [FilterObjectInfo],
}

/// Parameters for [`filter`](crate::ObjectFilter::filter).
pub struct FilterParams<'a> {
    /// The connection being filtered.
    pub connection: ConnectionId,
    /// The connection's replication view.
    pub view: &'a ReplicationView,
    /// Output verdict set, cleared by the engine before the call.
    ///
    /// The filter must set the bit of every member object it allows for
    /// this connection. Bits outside the filter's member set carry no
    /// verdict: the engine masks the result by the member set, so a
    /// filter can only speak for objects it owns.
    pub allowed: &'a mut BitSet,
    /// All object info blobs, indexed by object index.
    pub infos: &'a [FilterObjectInfo],
}
