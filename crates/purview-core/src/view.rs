//! Per-connection replication view passed through to dynamic filters.

use smallvec::SmallVec;

/// A single viewer location within a connection's view.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ViewLocation {
    /// World-space position of the viewer.
    pub position: [f32; 3],
}

impl ViewLocation {
    /// Creates a location at `position`.
    pub fn at(position: [f32; 3]) -> Self {
        Self { position }
    }
}

/// The view the server holds for one connection.
///
/// Opaque to the engine: it is handed to dynamic filters unchanged so
/// spatial filters can score objects against the peer's viewers. A
/// connection usually has one viewer; split-screen peers have more, so
/// the list stays inline for small counts.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReplicationView {
    /// Viewer locations for this connection.
    pub views: SmallVec<[ViewLocation; 1]>,
}

impl ReplicationView {
    /// A view with no viewers.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A view with a single viewer at `position`.
    pub fn from_position(position: [f32; 3]) -> Self {
        let mut views = SmallVec::new();
        views.push(ViewLocation::at(position));
        Self { views }
    }
}
