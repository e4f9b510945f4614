//! Part catalog types - definitions and serialized instances

use serde::{Deserialize, Serialize};

use crate::core::identity::{PartDefinitionId, SerializablePartId};

/// A kind of part, identified by its number and name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartDefinition {
    pub id: PartDefinitionId,

    /// Part number
    pub number: String,

    /// Descriptive name
    pub name: String,
}

impl std::fmt::Display for PartDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.number, self.name)
    }
}

/// A concrete part instance, with or without a serial number
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializablePart {
    pub id: SerializablePartId,

    pub part_definition_id: PartDefinitionId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,

    /// Loaded definition (populated on read)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_definition: Option<PartDefinition>,
}

impl SerializablePart {
    pub fn is_serialized(&self) -> bool {
        self.serial_number.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// Serial number or a placeholder for display
    pub fn serial_display(&self) -> &str {
        self.serial_number
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or("(unserialized)")
    }
}

/// Normalize user-entered serial numbers: trimmed, empty becomes `None`
pub fn normalize_serial(serial: Option<&str>) -> Option<String> {
    serial
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}
