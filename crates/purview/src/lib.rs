//! Purview: a replication relevance engine.
//!
//! Purview decides, once per server tick and independently per
//! connected peer, which subset of a server's replicated objects is in
//! scope for that peer. Visibility combines owner filtering, explicit
//! per-connection masks, named exclusion/inclusion groups, pluggable
//! dynamic filters (e.g. spatial relevance), temporal hysteresis, and
//! dependent-object propagation — all executed synchronously as bit-set
//! algebra inside a tight per-tick budget.
//!
//! This is the top-level facade crate re-exporting the public API from
//! all Purview sub-crates. For most users, adding `purview` as a single
//! dependency is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use purview::prelude::*;
//! use purview_test_utils::TestWorld;
//!
//! let mut engine = ScopeEngine::new(EngineConfig::default()).unwrap();
//! let mut world = TestWorld::new(1024, 32);
//!
//! // One replicated object, one peer.
//! world.add_object(ObjectIndex(1));
//! world.connect(&mut engine, ConnectionId(1));
//! world.run_tick(&mut engine);
//! assert!(engine.is_object_in_scope(ObjectIndex(1), ConnectionId(1)));
//!
//! // Owner filtering with no owner set hides the object from everyone.
//! engine
//!     .set_filter(&world.ctx(), ObjectIndex(1), FilterHandle::TO_OWNER, None)
//!     .unwrap();
//! world.run_tick(&mut engine);
//! assert!(!engine.is_object_in_scope(ObjectIndex(1), ConnectionId(1)));
//! ```
//!
//! # Modules
//!
//! Each module corresponds to a sub-crate:
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `purview-core` | IDs, `BitSet`, collaborator traits, errors |
//! | [`mask`] | `purview-mask` | Pooled per-connection masks |
//! | [`filter`] | `purview-filter` | The dynamic filter plugin protocol |
//! | [`engine`] | `purview-engine` | The scope engine and its configuration |
//! | [`filters`] | `purview-filters` | Reference dynamic filters |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Core types, traits, and IDs (`purview-core`).
pub use purview_core as types;

/// Pooled per-connection masks (`purview-mask`).
pub use purview_mask as mask;

/// Dynamic filter plugin protocol (`purview-filter`).
///
/// The [`filter::ObjectFilter`] trait is the main extension point for
/// user-defined relevance logic.
pub use purview_filter as filter;

/// The scope engine (`purview-engine`).
pub use purview_engine as engine;

/// Reference dynamic filters (`purview-filters`).
///
/// Includes [`filters::RadiusFilter`] and [`filters::ZoneFilter`].
pub use purview_filters as filters;

/// Common imports for typical Purview usage.
///
/// ```rust
/// use purview::prelude::*;
/// ```
pub mod prelude {
    // Core types and traits.
    pub use purview_core::{
        BitSet, ConnectionId, ConnectionRegistry, FilterHandle, FilterStatus, GroupHandle,
        GroupRegistry, ObjectIndex, ObjectRegistry, ReplicationView, ViewLocation, WorldContext,
    };

    // Errors.
    pub use purview_core::FilterError;
    pub use purview_engine::ConfigError;

    // Plugin protocol.
    pub use purview_filter::{
        AddObjectParams, FilterDefinition, FilterInitParams, FilterObjectInfo, FilterParams,
        FilterTraits, ObjectFilter, PreFilterParams, UpdateObjectsParams,
    };

    // Engine.
    pub use purview_engine::{
        ConnectionSelection, EngineConfig, FilterMetrics, HysteresisConfig, HysteresisProfile,
        ScopeEngine,
    };

    // Reference filters.
    pub use purview_filters::{RadiusFilter, RadiusFilterConfig, ZoneFilter};
}
