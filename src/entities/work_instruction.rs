//! Work Instruction entity type - versioned operator procedures
//!
//! A work instruction is an ordered list of nodes. A node is either a
//! [`Step`] the operator performs or a [`PartNode`] naming a part that must
//! be installed. Every instruction belongs to a version chain identified by
//! `original_id.unwrap_or(id)`.

use serde::{Deserialize, Serialize};

use crate::core::identity::{NodeId, PartDefinitionId, ProductId, WorkInstructionId};
use crate::entities::part::PartDefinition;

/// Discriminant stored in the `node_type` column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Step,
    Part,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Step => "step",
            NodeType::Part => "part",
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "step" => Ok(NodeType::Step),
            "part" | "part_node" => Ok(NodeType::Part),
            _ => Err(format!("Invalid node type: {}. Use step or part", s)),
        }
    }
}

/// How the operator identifies the part for a part node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartInputType {
    /// Operator scans or types the serial number
    #[default]
    SerialNumber,
    /// Operator enters the production log that produced the part
    ProductionLogId,
}

impl PartInputType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartInputType::SerialNumber => "serial_number",
            PartInputType::ProductionLogId => "production_log_id",
        }
    }
}

impl std::fmt::Display for PartInputType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PartInputType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "serial_number" | "serial" | "serialnumber" => Ok(PartInputType::SerialNumber),
            "production_log_id" | "log" | "productionlogid" => Ok(PartInputType::ProductionLogId),
            _ => Err(format!(
                "Invalid part input type: {}. Use serial_number or production_log_id",
                s
            )),
        }
    }
}

/// Procedure step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Short step name
    pub name: String,

    /// Instruction text shown to the operator
    #[serde(default)]
    pub body: String,

    /// Expanded instruction text
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detailed_body: String,

    /// Primary media files (paths relative to the media directory)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub primary_media: Vec<String>,

    /// Secondary media files
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secondary_media: Vec<String>,
}

/// Required part
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartNode {
    /// Part definition that must be installed
    pub part_definition_id: PartDefinitionId,

    /// Loaded definition (populated on read)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_definition: Option<PartDefinition>,

    /// How the part is identified at the station
    #[serde(default)]
    pub input_type: PartInputType,

    /// Number of parts this node requires
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

impl PartNode {
    pub fn new(part_definition_id: PartDefinitionId) -> Self {
        Self {
            part_definition_id,
            part_definition: None,
            input_type: PartInputType::default(),
            quantity: 1,
        }
    }
}

/// Node payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node_type", rename_all = "snake_case")]
pub enum NodeKind {
    Step(Step),
    Part(PartNode),
}

impl NodeKind {
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeKind::Step(_) => NodeType::Step,
            NodeKind::Part(_) => NodeType::Part,
        }
    }
}

/// A stored node with its position in the instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkInstructionNode {
    pub id: NodeId,

    /// Zero-based execution order
    pub position: u32,

    #[serde(flatten)]
    pub kind: NodeKind,
}

impl WorkInstructionNode {
    pub fn as_step(&self) -> Option<&Step> {
        match &self.kind {
            NodeKind::Step(step) => Some(step),
            NodeKind::Part(_) => None,
        }
    }

    pub fn as_part(&self) -> Option<&PartNode> {
        match &self.kind {
            NodeKind::Part(part) => Some(part),
            NodeKind::Step(_) => None,
        }
    }
}

/// One version of a work instruction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkInstruction {
    pub id: WorkInstructionId,

    pub title: String,

    /// Free-form version label (e.g. "1", "2.1")
    pub version: String,

    /// Released for production use
    pub is_active: bool,

    /// Newest version of its chain
    pub is_latest: bool,

    /// Chain root, `None` for the first version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_id: Option<WorkInstructionId>,

    pub should_generate_qr_code: bool,

    pub part_produced_is_serialized: bool,

    /// Part definition this instruction produces
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_produced_id: Option<PartDefinitionId>,

    /// Nodes ordered by position
    #[serde(default)]
    pub nodes: Vec<WorkInstructionNode>,

    /// Products built with this instruction
    #[serde(default)]
    pub products: Vec<ProductId>,
}

impl WorkInstruction {
    /// Identity shared by every version of the chain
    pub fn chain_id(&self) -> WorkInstructionId {
        self.original_id.unwrap_or(self.id)
    }

    /// Step nodes in execution order
    pub fn steps(&self) -> impl Iterator<Item = (&WorkInstructionNode, &Step)> {
        self.nodes
            .iter()
            .filter_map(|node| node.as_step().map(|step| (node, step)))
    }

    /// Part nodes in execution order
    pub fn part_nodes(&self) -> impl Iterator<Item = (&WorkInstructionNode, &PartNode)> {
        self.nodes
            .iter()
            .filter_map(|node| node.as_part().map(|part| (node, part)))
    }

    /// Total number of parts required by all part nodes
    pub fn required_part_count(&self) -> u32 {
        self.part_nodes().map(|(_, part)| part.quantity).sum()
    }
}

/// Input for creating a work instruction or a new version
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewWorkInstruction {
    pub title: String,

    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub should_generate_qr_code: bool,

    #[serde(default)]
    pub part_produced_is_serialized: bool,

    #[serde(default)]
    pub part_produced_id: Option<PartDefinitionId>,

    /// Nodes in execution order; positions are assigned from the index
    #[serde(default)]
    pub nodes: Vec<NodeKind>,

    #[serde(default)]
    pub products: Vec<ProductId>,
}

impl From<&WorkInstruction> for NewWorkInstruction {
    fn from(wi: &WorkInstruction) -> Self {
        Self {
            title: wi.title.clone(),
            version: wi.version.clone(),
            should_generate_qr_code: wi.should_generate_qr_code,
            part_produced_is_serialized: wi.part_produced_is_serialized,
            part_produced_id: wi.part_produced_id,
            nodes: wi.nodes.iter().map(|n| n.kind.clone()).collect(),
            products: wi.products.clone(),
        }
    }
}

/// Derive the version label for the next version in a chain
///
/// A trailing number is incremented ("3" -> "4", "1.9" -> "1.10"); anything
/// else gets ".1" appended. An empty label starts at "2".
pub fn next_version_label(current: &str) -> String {
    let current = current.trim();
    if current.is_empty() {
        return "2".to_string();
    }

    let digits_start = current
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i);

    match digits_start {
        Some(start) => match current[start..].parse::<u64>() {
            Ok(n) => format!("{}{}", &current[..start], n + 1),
            Err(_) => format!("{}.1", current),
        },
        None => format!("{}.1", current),
    }
}
