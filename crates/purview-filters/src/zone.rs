//! Zone gating filter.

use purview_core::{BitSet, ConnectionId, ObjectIndex};
use purview_filter::{
    AddObjectParams, FilterInitParams, FilterObjectInfo, FilterParams, FilterTraits, ObjectFilter,
    UpdateObjectsParams,
};

/// Allows a member object for connections assigned to the same zone.
///
/// The object's zone lives in the engine-owned info blob (`data[0]`),
/// written when the object joins the filter and refreshed through the
/// batched dirty-object path, so `filter` runs off the blob alone.
/// Connections without a zone assignment see no zone-filtered objects.
#[derive(Default)]
pub struct ZoneFilter {
    members: BitSet,
    /// Staged zone per object, copied into the info blob on add/update.
    object_zones: Vec<u16>,
    /// Zone per connection id.
    connection_zones: Vec<Option<u16>>,
}

impl ZoneFilter {
    /// Creates an empty zone filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages the zone for `object`. Takes effect when the object is
    /// added to the filter or marked dirty on the engine.
    pub fn set_object_zone(&mut self, object: ObjectIndex, zone: u16) {
        if let Some(slot) = self.object_zones.get_mut(object.0 as usize) {
            *slot = zone;
        }
    }

    /// Assigns `connection` to `zone`.
    pub fn set_connection_zone(&mut self, connection: ConnectionId, zone: u16) {
        if let Some(slot) = self.connection_zones.get_mut(connection.0 as usize) {
            *slot = Some(zone);
        }
    }

    /// Removes the zone assignment of `connection`.
    pub fn clear_connection_zone(&mut self, connection: ConnectionId) {
        if let Some(slot) = self.connection_zones.get_mut(connection.0 as usize) {
            *slot = None;
        }
    }
}

impl ObjectFilter for ZoneFilter {
    fn init(&mut self, params: &FilterInitParams) {
        self.members.set_num_bits(params.max_object_index);
        self.object_zones.resize(params.max_object_index as usize, 0);
        self.connection_zones
            .resize(params.max_connection_count as usize + 1, None);
    }

    fn traits(&self) -> FilterTraits {
        FilterTraits {
            needs_update: true,
            spatial: false,
        }
    }

    fn on_max_object_index_increased(&mut self, new_max: u32) {
        self.members.set_num_bits(new_max);
        self.object_zones.resize(new_max as usize, 0);
    }

    fn remove_connection(&mut self, connection: ConnectionId) {
        self.clear_connection_zone(connection);
    }

    fn add_object(&mut self, object: ObjectIndex, params: AddObjectParams<'_>) -> bool {
        self.members.set(object.0);
        params.info.data[0] = self.object_zones[object.0 as usize];
        true
    }

    fn remove_object(&mut self, object: ObjectIndex, info: &mut FilterObjectInfo) {
        self.members.clear(object.0);
        *info = FilterObjectInfo::default();
    }

    fn update_objects(&mut self, params: UpdateObjectsParams<'_>) {
        for &object in params.objects {
            params.infos[object.0 as usize].data[0] = self.object_zones[object.0 as usize];
        }
    }

    fn filter(&mut self, params: FilterParams<'_>) {
        let Some(zone) = self
            .connection_zones
            .get(params.connection.0 as usize)
            .copied()
            .flatten()
        else {
            return;
        };
        let mut allowed = std::mem::take(params.allowed);
        self.members.for_each_set(|object| {
            if params.infos[object as usize].data[0] == zone {
                allowed.set(object);
            }
        });
        *params.allowed = allowed;
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}
