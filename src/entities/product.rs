//! Product entity type - sellable items built by work instructions

use serde::{Deserialize, Serialize};

use crate::core::identity::{PartDefinitionId, ProductId, WorkInstructionId};
use crate::entities::part::PartDefinition;

/// A produced item, identified by the part it results in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,

    pub part_definition_id: PartDefinitionId,

    /// Loaded definition (populated on read)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_definition: Option<PartDefinition>,

    /// Inactive products are hidden from new production logs
    pub is_active: bool,

    /// Associated work instructions (every version that was linked)
    #[serde(default)]
    pub work_instructions: Vec<WorkInstructionId>,
}

impl Product {
    /// Display label: part number and name when loaded, else the id
    pub fn label(&self) -> String {
        match &self.part_definition {
            Some(def) => def.to_string(),
            None => self.id.to_string(),
        }
    }
}
