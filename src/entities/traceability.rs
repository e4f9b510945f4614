//! Traceability ledger types - install/produce/remove records and lineage

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::identity::{ProductionLogId, SerializablePartId};
use crate::entities::part::SerializablePart;

/// What happened to a part in a production log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartOperation {
    Installed,
    Produced,
    Removed,
}

impl PartOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartOperation::Installed => "installed",
            PartOperation::Produced => "produced",
            PartOperation::Removed => "removed",
        }
    }

    pub fn all() -> &'static [PartOperation] {
        &[
            PartOperation::Installed,
            PartOperation::Produced,
            PartOperation::Removed,
        ]
    }
}

impl std::fmt::Display for PartOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PartOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "installed" | "install" => Ok(PartOperation::Installed),
            "produced" | "produce" => Ok(PartOperation::Produced),
            "removed" | "remove" => Ok(PartOperation::Removed),
            _ => Err(format!(
                "Invalid part operation: {}. Use installed, produced, or removed",
                s
            )),
        }
    }
}

/// One ledger row. Rows are inserted and never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductionLogPart {
    pub production_log_id: ProductionLogId,
    pub serializable_part_id: SerializablePartId,
    pub operation_type: PartOperation,
}

/// A ledger row joined with its part and log time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub production_log_id: ProductionLogId,
    pub operation_type: PartOperation,
    pub part: SerializablePart,
    pub logged_on: DateTime<Utc>,
}

/// Genealogy of a part: the log that produced it and what went into it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineageNode {
    pub part: SerializablePart,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub produced_by: Option<ProductionLogId>,

    /// Parts installed (and not removed) when this part was produced
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<LineageNode>,
}

impl LineageNode {
    /// Total parts in the tree, this one included
    pub fn part_count(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(LineageNode::part_count)
            .sum::<usize>()
    }

    /// Depth-first walk yielding (depth, node)
    pub fn walk(&self) -> Vec<(usize, &LineageNode)> {
        let mut out = Vec::new();
        let mut stack = vec![(0usize, self)];
        while let Some((depth, node)) = stack.pop() {
            out.push((depth, node));
            for child in node.children.iter().rev() {
                stack.push((depth + 1, child));
            }
        }
        out
    }
}
