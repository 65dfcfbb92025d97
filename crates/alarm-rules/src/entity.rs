//! Entities that rules apply to and alarms attach to.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::EntityId;

/// The kind of a managed entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    /// A device that reports telemetry.
    Device,
    /// A logical asset grouping devices.
    Asset,
}

impl EntityKind {
    /// Returns the kind as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Device => "DEVICE",
            Self::Asset => "ASSET",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a rule repository knows about an entity when selecting rules for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityInfo {
    /// Entity id.
    pub id: EntityId,
    /// Device or asset.
    pub kind: EntityKind,
    /// Name of the device or asset profile.
    pub profile: String,
}

impl EntityInfo {
    /// Creates a device entry.
    pub fn device(id: EntityId, profile: impl Into<String>) -> Self {
        Self {
            id,
            kind: EntityKind::Device,
            profile: profile.into(),
        }
    }

    /// Creates an asset entry.
    pub fn asset(id: EntityId, profile: impl Into<String>) -> Self {
        Self {
            id,
            kind: EntityKind::Asset,
            profile: profile.into(),
        }
    }
}

/// Selects the entities a rule applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityFilter {
    /// Exactly one entity.
    Single {
        /// The entity.
        entity: EntityId,
    },
    /// Any of the listed entities.
    List {
        /// The entities.
        entities: Vec<EntityId>,
    },
    /// Every device.
    AllDevices,
    /// Every asset.
    AllAssets,
    /// Devices with one of the given profiles.
    DeviceProfile {
        /// Profile names.
        profiles: Vec<String>,
    },
    /// Assets with one of the given profiles.
    AssetProfile {
        /// Profile names.
        profiles: Vec<String>,
    },
}

impl EntityFilter {
    /// Returns true if `entity` is selected by this filter.
    #[must_use]
    pub fn matches(&self, entity: &EntityInfo) -> bool {
        match self {
            Self::Single { entity: id } => *id == entity.id,
            Self::List { entities } => entities.contains(&entity.id),
            Self::AllDevices => entity.kind == EntityKind::Device,
            Self::AllAssets => entity.kind == EntityKind::Asset,
            Self::DeviceProfile { profiles } => {
                entity.kind == EntityKind::Device && profiles.contains(&entity.profile)
            }
            Self::AssetProfile { profiles } => {
                entity.kind == EntityKind::Asset && profiles.contains(&entity.profile)
            }
        }
    }
}

/// The entity an alarm is raised on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmTarget {
    /// The entity whose data was evaluated.
    #[default]
    Originator,
    /// A fixed entity.
    Specified {
        /// The entity.
        entity: EntityId,
    },
    /// Entities related to the originator by `relation_type`, resolved by
    /// the alarm lifecycle service.
    Related {
        /// Relation type, e.g. "Contains".
        relation_type: String,
    },
}

impl AlarmTarget {
    /// Returns the concrete entity for this target, if it can be determined
    /// without a relation lookup.
    #[must_use]
    pub const fn resolve(&self, originator: EntityId) -> Option<EntityId> {
        match self {
            Self::Originator => Some(originator),
            Self::Specified { entity } => Some(*entity),
            Self::Related { .. } => None,
        }
    }
}
