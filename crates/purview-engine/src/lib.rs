//! Per-tick scope computation engine.
//!
//! [`ScopeEngine`] decides, once per tick and independently per
//! connection, which replicated objects are in scope for that
//! connection. Visibility is gated by owner identity, per-connection
//! allow/deny masks, named groups, pluggable dynamic filters, and a
//! hysteresis mechanism that smooths visibility flapping.
//!
//! The engine owns no object, connection, or group identities; it reads
//! them through the collaborator traits in `purview-core`, bundled per
//! call into a [`WorldContext`](purview_core::WorldContext). All state
//! lives in flat bit sets and arrays keyed by dense indices, and the
//! per-tick passes run synchronously on a single thread in a fixed
//! stage order.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod config;
pub mod metrics;

mod connection;
mod dynamic;
mod engine;
mod groups;
mod hysteresis;
mod scope;
mod statics;

pub use config::{ConfigError, EngineConfig, HysteresisConfig, HysteresisProfile};
pub use engine::ScopeEngine;
pub use groups::ConnectionSelection;
pub use metrics::FilterMetrics;
