//! Spatial distance filter.

use purview_core::{BitSet, ObjectIndex};
use purview_filter::{
    AddObjectParams, FilterInitParams, FilterObjectInfo, FilterParams, FilterTraits, ObjectFilter,
    UpdateObjectsParams,
};

/// Configuration for [`RadiusFilter`].
#[derive(Clone, Copy, Debug)]
pub struct RadiusFilterConfig {
    /// Cull distance: a member object is allowed for a connection when
    /// any of the connection's viewers is within this distance.
    pub radius: f32,
}

impl Default for RadiusFilterConfig {
    fn default() -> Self {
        Self { radius: 150.0 }
    }
}

/// Allows member objects within a cull radius of any viewer of the
/// connection being filtered.
///
/// Object positions are pushed by the host through
/// [`set_object_position`](RadiusFilter::set_object_position); position
/// changes should be accompanied by marking the object dirty on the
/// engine so spatial state stays fresh through the batched update path.
pub struct RadiusFilter {
    config: RadiusFilterConfig,
    members: BitSet,
    positions: Vec<[f32; 3]>,
}

impl RadiusFilter {
    /// Creates a filter with the given configuration.
    pub fn new(config: RadiusFilterConfig) -> Self {
        Self {
            config,
            members: BitSet::empty(),
            positions: Vec::new(),
        }
    }

    /// Records the world position of `object`.
    pub fn set_object_position(&mut self, object: ObjectIndex, position: [f32; 3]) {
        if let Some(slot) = self.positions.get_mut(object.0 as usize) {
            *slot = position;
        }
    }

    /// The recorded position of `object`.
    pub fn object_position(&self, object: ObjectIndex) -> [f32; 3] {
        self.positions
            .get(object.0 as usize)
            .copied()
            .unwrap_or_default()
    }

    fn in_range(&self, position: [f32; 3], view: &purview_core::ReplicationView) -> bool {
        let radius_sq = self.config.radius * self.config.radius;
        view.views.iter().any(|viewer| {
            let dx = viewer.position[0] - position[0];
            let dy = viewer.position[1] - position[1];
            let dz = viewer.position[2] - position[2];
            dx * dx + dy * dy + dz * dz <= radius_sq
        })
    }
}

impl ObjectFilter for RadiusFilter {
    fn init(&mut self, params: &FilterInitParams) {
        self.members.set_num_bits(params.max_object_index);
        self.positions
            .resize(params.max_object_index as usize, [0.0; 3]);
    }

    fn traits(&self) -> FilterTraits {
        FilterTraits {
            needs_update: true,
            spatial: true,
        }
    }

    fn on_max_object_index_increased(&mut self, new_max: u32) {
        self.members.set_num_bits(new_max);
        self.positions.resize(new_max as usize, [0.0; 3]);
    }

    fn add_object(&mut self, object: ObjectIndex, _params: AddObjectParams<'_>) -> bool {
        self.members.set(object.0);
        true
    }

    fn remove_object(&mut self, object: ObjectIndex, _info: &mut FilterObjectInfo) {
        self.members.clear(object.0);
        self.positions[object.0 as usize] = [0.0; 3];
    }

    fn update_objects(&mut self, _params: UpdateObjectsParams<'_>) {
        // Positions are pushed through set_object_position; the dirty
        // batch only tells us a refresh happened.
    }

    fn filter(&mut self, params: FilterParams<'_>) {
        let mut allowed = std::mem::take(params.allowed);
        self.members.for_each_set(|object| {
            let position = self.positions[object as usize];
            if self.in_range(position, params.view) {
                allowed.set(object);
            }
        });
        *params.allowed = allowed;
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use purview_core::{ConnectionId, ReplicationView};

    fn filter_with(radius: f32, max_objects: u32) -> RadiusFilter {
        let mut filter = RadiusFilter::new(RadiusFilterConfig { radius });
        filter.init(&FilterInitParams {
            max_object_index: max_objects,
            max_connection_count: 4,
        });
        filter
    }

    fn run(filter: &mut RadiusFilter, view: &ReplicationView, max_objects: u32) -> BitSet {
        let mut allowed = BitSet::new(max_objects);
        filter.filter(FilterParams {
            connection: ConnectionId(1),
            view,
            allowed: &mut allowed,
            infos: &[],
        });
        allowed
    }

    #[test]
    fn objects_inside_radius_are_allowed() {
        let mut filter = filter_with(10.0, 8);
        let mut info = FilterObjectInfo::default();
        assert!(filter.add_object(
            ObjectIndex(1),
            AddObjectParams {
                info: &mut info,
                profile: None
            }
        ));
        filter.set_object_position(ObjectIndex(1), [3.0, 4.0, 0.0]);

        let view = ReplicationView::from_position([0.0, 0.0, 0.0]);
        let allowed = run(&mut filter, &view, 8);
        assert!(allowed.get(1));
    }

    #[test]
    fn objects_outside_radius_are_denied() {
        let mut filter = filter_with(10.0, 8);
        let mut info = FilterObjectInfo::default();
        filter.add_object(
            ObjectIndex(1),
            AddObjectParams {
                info: &mut info,
                profile: None,
            },
        );
        filter.set_object_position(ObjectIndex(1), [20.0, 0.0, 0.0]);

        let view = ReplicationView::from_position([0.0, 0.0, 0.0]);
        let allowed = run(&mut filter, &view, 8);
        assert!(!allowed.get(1));
    }

    #[test]
    fn any_viewer_within_range_suffices() {
        let mut filter = filter_with(5.0, 8);
        let mut info = FilterObjectInfo::default();
        filter.add_object(
            ObjectIndex(2),
            AddObjectParams {
                info: &mut info,
                profile: None,
            },
        );
        filter.set_object_position(ObjectIndex(2), [100.0, 0.0, 0.0]);

        let mut view = ReplicationView::from_position([0.0, 0.0, 0.0]);
        view.views
            .push(purview_core::ViewLocation::at([99.0, 0.0, 0.0]));
        let allowed = run(&mut filter, &view, 8);
        assert!(allowed.get(2));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn verdict_matches_the_distance_oracle(
                positions in proptest::collection::vec(
                    (-200.0f32..200.0, -200.0f32..200.0, -200.0f32..200.0),
                    1..16,
                ),
                viewer in (-200.0f32..200.0, -200.0f32..200.0, -200.0f32..200.0),
                radius in 1.0f32..300.0,
            ) {
                let max_objects = positions.len() as u32 + 1;
                let mut filter = filter_with(radius, max_objects);
                let mut info = FilterObjectInfo::default();
                for (i, &(x, y, z)) in positions.iter().enumerate() {
                    let object = ObjectIndex(i as u32 + 1);
                    filter.add_object(
                        object,
                        AddObjectParams { info: &mut info, profile: None },
                    );
                    filter.set_object_position(object, [x, y, z]);
                }

                let view = ReplicationView::from_position([viewer.0, viewer.1, viewer.2]);
                let allowed = run(&mut filter, &view, max_objects);

                for (i, &(x, y, z)) in positions.iter().enumerate() {
                    let dx = x - viewer.0;
                    let dy = y - viewer.1;
                    let dz = z - viewer.2;
                    let within = dx * dx + dy * dy + dz * dz <= radius * radius;
                    prop_assert_eq!(allowed.get(i as u32 + 1), within);
                }
            }
        }
    }

    #[test]
    fn removed_objects_produce_no_verdict() {
        let mut filter = filter_with(1000.0, 8);
        let mut info = FilterObjectInfo::default();
        filter.add_object(
            ObjectIndex(3),
            AddObjectParams {
                info: &mut info,
                profile: None,
            },
        );
        filter.remove_object(ObjectIndex(3), &mut info);

        let view = ReplicationView::from_position([0.0, 0.0, 0.0]);
        let allowed = run(&mut filter, &view, 8);
        assert!(!allowed.get(3));
    }
}
