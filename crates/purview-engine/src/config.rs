//! Engine configuration, validation, and error types.
//!
//! [`EngineConfig`] is the builder-input for constructing a
//! [`ScopeEngine`](crate::ScopeEngine). [`EngineConfig::validate`]
//! checks structural invariants at startup so the per-tick passes can
//! rely on them unconditionally.

use std::error::Error;
use std::fmt;

use purview_filter::FilterDefinition;

/// Named hysteresis profile mapping a profile name to a frame count.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HysteresisProfile {
    /// Profile name, matched against the profile given to
    /// [`set_filter`](crate::ScopeEngine::set_filter).
    pub name: String,
    /// Frames a filtered-out object stays in scope.
    pub frame_count: u8,
}

/// Configuration of the hysteresis scheduler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HysteresisConfig {
    /// Whether filtered-out objects linger in scope at all.
    pub enabled: bool,
    /// Frame count for objects whose profile names no registered
    /// profile. Zero disables smoothing for those objects.
    pub default_frame_count: u8,
    /// Connection round-robin period: on any tick only `1/throttle` of
    /// the connections tick their countdowns down. Must be in `1..=128`.
    pub update_throttle: u8,
    /// Named profiles.
    pub profiles: Vec<HysteresisProfile>,
}

impl Default for HysteresisConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            default_frame_count: 0,
            update_throttle: 1,
            profiles: Vec::new(),
        }
    }
}

/// Configuration for a [`ScopeEngine`](crate::ScopeEngine).
pub struct EngineConfig {
    /// Maximum number of simultaneously valid connections. Connection
    /// ids run `1..=max_connections`.
    pub max_connections: u32,
    /// Number of addressable group indices (index 0 is reserved).
    pub max_groups: u16,
    /// Initial exclusive upper bound on object indices. The bound may
    /// grow later through
    /// [`on_max_object_index_increased`](crate::ScopeEngine::on_max_object_index_increased).
    pub initial_max_objects: u32,
    /// When set, the global relevant-object set is the precise union of
    /// per-connection scopes plus unfiltered objects. When clear, it is
    /// a cheap copy of everything scopable.
    pub cull_non_relevant: bool,
    /// Enables the per-tick consistency validation pass that reports
    /// subobjects in scope with a filtered-out root. Diagnostic only.
    pub validate_scope_consistency: bool,
    /// Hysteresis scheduler configuration.
    pub hysteresis: HysteresisConfig,
    /// Dynamic filters, registered in order; registration order defines
    /// the dynamic filter indices.
    pub filters: Vec<FilterDefinition>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_connections: 32,
            max_groups: 256,
            initial_max_objects: 1024,
            cull_non_relevant: true,
            validate_scope_consistency: false,
            hysteresis: HysteresisConfig::default(),
            filters: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Checks structural invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::NoConnections);
        }
        // Owning connections are stored as u16 per object.
        if self.max_connections > u16::MAX as u32 - 1 {
            return Err(ConfigError::ConnectionCountOverflow {
                value: self.max_connections,
            });
        }
        if self.max_groups == 0 {
            return Err(ConfigError::InvalidGroupCapacity { value: self.max_groups });
        }
        if self.initial_max_objects == 0 {
            return Err(ConfigError::InvalidObjectCapacity {
                value: self.initial_max_objects,
            });
        }
        // Filter assignments are stored as u8 per object, with u8::MAX
        // reserved as "no filter".
        if self.filters.len() > 255 {
            return Err(ConfigError::TooManyFilters {
                count: self.filters.len(),
            });
        }
        for (i, def) in self.filters.iter().enumerate() {
            if def.name.is_empty() {
                return Err(ConfigError::EmptyFilterName { index: i });
            }
            if self.filters[..i].iter().any(|other| other.name == def.name) {
                return Err(ConfigError::DuplicateFilterName {
                    name: def.name.clone(),
                });
            }
        }
        if !(1..=128).contains(&self.hysteresis.update_throttle) {
            return Err(ConfigError::ThrottleOutOfRange {
                value: self.hysteresis.update_throttle,
            });
        }
        for (i, profile) in self.hysteresis.profiles.iter().enumerate() {
            if self.hysteresis.profiles[..i]
                .iter()
                .any(|other| other.name == profile.name)
            {
                return Err(ConfigError::DuplicateProfileName {
                    name: profile.name.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Errors detected during [`EngineConfig::validate`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// `max_connections` is zero.
    NoConnections,
    /// `max_connections` exceeds the storable connection id range.
    ConnectionCountOverflow {
        /// The configured value.
        value: u32,
    },
    /// `max_groups` is zero.
    InvalidGroupCapacity {
        /// The configured value.
        value: u16,
    },
    /// `initial_max_objects` is zero.
    InvalidObjectCapacity {
        /// The configured value.
        value: u32,
    },
    /// More dynamic filters than the per-object filter index can address.
    TooManyFilters {
        /// The configured filter count.
        count: usize,
    },
    /// A filter was registered with an empty name.
    EmptyFilterName {
        /// Registration index of the unnamed filter.
        index: usize,
    },
    /// Two filters share a name.
    DuplicateFilterName {
        /// The duplicated name.
        name: String,
    },
    /// `update_throttle` is outside `1..=128`.
    ThrottleOutOfRange {
        /// The configured value.
        value: u8,
    },
    /// Two hysteresis profiles share a name.
    DuplicateProfileName {
        /// The duplicated name.
        name: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoConnections => write!(f, "max_connections must be at least 1"),
            Self::ConnectionCountOverflow { value } => {
                write!(f, "max_connections {value} exceeds the storable range")
            }
            Self::InvalidGroupCapacity { value } => {
                write!(f, "max_groups must be at least 1, got {value}")
            }
            Self::InvalidObjectCapacity { value } => {
                write!(f, "initial_max_objects must be at least 1, got {value}")
            }
            Self::TooManyFilters { count } => {
                write!(f, "{count} dynamic filters exceed the maximum of 255")
            }
            Self::EmptyFilterName { index } => {
                write!(f, "filter at registration index {index} has an empty name")
            }
            Self::DuplicateFilterName { name } => {
                write!(f, "duplicate filter name '{name}'")
            }
            Self::ThrottleOutOfRange { value } => {
                write!(f, "update_throttle {value} is outside 1..=128")
            }
            Self::DuplicateProfileName { name } => {
                write!(f, "duplicate hysteresis profile name '{name}'")
            }
        }
    }
}

impl Error for ConfigError {}
