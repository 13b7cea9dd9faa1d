//! The [`ObjectFilter`] trait and filter registration types.

use std::any::Any;

use purview_core::{ConnectionId, ObjectIndex};

use crate::params::{
    AddObjectParams, FilterInitParams, FilterObjectInfo, FilterParams, PreFilterParams,
    UpdateObjectsParams,
};

/// Behavioral traits a filter declares at registration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FilterTraits {
    /// The filter wants batched
    /// [`update_objects`](ObjectFilter::update_objects) calls for dirty
    /// member objects each tick.
    pub needs_update: bool,
    /// The filter's verdicts derive from spatial queries against the
    /// connection view.
    pub spatial: bool,
}

/// A pluggable, stateful per-connection object filter.
///
/// # Contract
///
/// - A filter owns a subset of root objects, assigned through
///   [`add_object`](Self::add_object); subobjects always inherit their
///   root's verdict and are never added to a filter.
/// - All calls happen on the single filtering thread, between
///   [`init`](Self::init) and [`deinit`](Self::deinit).
/// - [`filter`](Self::filter) must produce a verdict for every member
///   object; indexing outside the declared object capacity is a
///   programming error in the plugin.
///
/// # Object safety
///
/// This trait is object-safe; the engine stores filters as
/// `Vec<Box<dyn ObjectFilter>>`.
///
/// # Examples
///
/// A filter that allows its members on even connection ids only:
///
/// ```
/// use purview_filter::{AddObjectParams, FilterParams, ObjectFilter};
/// use purview_core::{BitSet, ObjectIndex};
///
/// struct EvenConnectionsFilter {
///     members: BitSet,
/// }
///
/// impl ObjectFilter for EvenConnectionsFilter {
///     fn add_object(&mut self, object: ObjectIndex, _params: AddObjectParams<'_>) -> bool {
///         self.members.set(object.0);
///         true
///     }
///
///     fn remove_object(&mut self, object: ObjectIndex, _info: &mut purview_filter::FilterObjectInfo) {
///         self.members.clear(object.0);
///     }
///
///     fn filter(&mut self, params: FilterParams<'_>) {
///         if params.connection.0 % 2 == 0 {
///             params.allowed.or_assign(&self.members);
///         }
///     }
///
///     fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
///         self
///     }
/// }
///
/// let mut filter = EvenConnectionsFilter { members: BitSet::new(8) };
/// let mut info = purview_filter::FilterObjectInfo::default();
/// assert!(filter.add_object(
///     ObjectIndex(3),
///     AddObjectParams { info: &mut info, profile: None },
/// ));
/// ```
pub trait ObjectFilter: Send + 'static {
    /// Called once before any other method.
    fn init(&mut self, params: &FilterInitParams) {
        let _ = params;
    }

    /// Called once at engine teardown.
    fn deinit(&mut self) {}

    /// Behavioral traits of this filter.
    fn traits(&self) -> FilterTraits {
        FilterTraits::default()
    }

    /// The object index space grew; internal per-object storage must
    /// cover `new_max` indices afterwards.
    fn on_max_object_index_increased(&mut self, new_max: u32) {
        let _ = new_max;
    }

    /// A connection became valid.
    fn add_connection(&mut self, connection: ConnectionId) {
        let _ = connection;
    }

    /// A connection went away.
    fn remove_connection(&mut self, connection: ConnectionId) {
        let _ = connection;
    }

    /// An object adopts this filter. Returns whether the filter accepts
    /// it; on `false` the object ends up with no dynamic filter, which
    /// is a normal outcome rather than an error.
    fn add_object(&mut self, object: ObjectIndex, params: AddObjectParams<'_>) -> bool;

    /// A member object leaves the filter (re-assignment, deletion or
    /// filter switch). Must release whatever `info` refers to.
    fn remove_object(&mut self, object: ObjectIndex, info: &mut FilterObjectInfo) {
        let _ = (object, info);
    }

    /// Batched refresh for dirty member objects. Only called when
    /// [`traits`](Self::traits) declares `needs_update`.
    fn update_objects(&mut self, params: UpdateObjectsParams<'_>) {
        let _ = params;
    }

    /// Per-tick setup, called once before the per-connection
    /// [`filter`](Self::filter) calls. Only called while the filter has
    /// members.
    fn pre_filter(&mut self, params: PreFilterParams<'_>) {
        let _ = params;
    }

    /// Produce allow/deny verdicts over the member set for one
    /// connection.
    fn filter(&mut self, params: FilterParams<'_>);

    /// Per-tick cleanup, called once after all connections were
    /// filtered.
    fn post_filter(&mut self) {}

    /// Downcast access for hosts that need to reach a concrete filter
    /// behind the registry.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// A named filter implementation handed to the engine at construction.
///
/// The name is the key callers use to resolve a filter handle; the
/// engine assigns dynamic filter indices in registration order.
pub struct FilterDefinition {
    /// Unique filter name.
    pub name: String,
    /// The filter implementation.
    pub filter: Box<dyn ObjectFilter>,
}

impl FilterDefinition {
    /// Creates a definition for `filter` under `name`.
    pub fn new(name: impl Into<String>, filter: Box<dyn ObjectFilter>) -> Self {
        Self {
            name: name.into(),
            filter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use purview_core::BitSet;

    struct NullFilter;

    impl ObjectFilter for NullFilter {
        fn add_object(&mut self, _object: ObjectIndex, _params: AddObjectParams<'_>) -> bool {
            true
        }

        fn filter(&mut self, _params: FilterParams<'_>) {}

        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    }

    #[test]
    fn trait_is_object_safe() {
        let filters: Vec<Box<dyn ObjectFilter>> = vec![Box::new(NullFilter)];
        assert_eq!(filters.len(), 1);
    }

    #[test]
    fn default_traits_are_inert() {
        let traits = NullFilter.traits();
        assert!(!traits.needs_update);
        assert!(!traits.spatial);
    }

    #[test]
    fn downcast_reaches_concrete_filter() {
        let mut boxed: Box<dyn ObjectFilter> = Box::new(NullFilter);
        assert!(boxed.as_any_mut().downcast_mut::<NullFilter>().is_some());
        let _ = BitSet::new(1);
    }
}
