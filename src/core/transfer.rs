//! Work instruction transfer as YAML documents
//!
//! Documents reference parts by number and name rather than database ids,
//! so an instruction exported from one line can be imported into another.
//! Part definitions missing on import are added.

use std::path::Path;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::identity::WorkInstructionId;
use crate::core::store::{Store, StoreError};
use crate::entities::work_instruction::{
    next_version_label, NewWorkInstruction, NodeKind, PartInputType, PartNode, Step,
    WorkInstruction,
};
use crate::yaml::{parse_yaml_str, YamlSyntaxError};

/// Portable form of one work instruction version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkInstructionDocument {
    pub title: String,

    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub should_generate_qr_code: bool,

    /// Part built by the instruction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_produced: Option<PartReference>,

    #[serde(default)]
    pub part_produced_is_serialized: bool,

    #[serde(default)]
    pub nodes: Vec<DocumentNode>,
}

/// Part definition by number and name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartReference {
    pub part_number: String,

    #[serde(default)]
    pub part_name: String,
}

/// Node of a document, in execution order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node_type", rename_all = "snake_case")]
pub enum DocumentNode {
    Step(Step),
    Part {
        part_number: String,
        #[serde(default)]
        part_name: String,
        #[serde(default)]
        input_type: PartInputType,
        #[serde(default = "default_quantity")]
        quantity: u32,
    },
}

fn default_quantity() -> u32 {
    1
}

/// Where an imported document lands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportTarget {
    /// Start a new chain
    NewChain,
    /// Add a version to the chain containing this instruction
    VersionOf(WorkInstructionId),
}

/// Import failures
#[derive(Debug, Error, Diagnostic)]
pub enum ImportError {
    #[error("cannot read {path}: {source}")]
    #[diagnostic(code(mes::transfer::io))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Format(#[from] YamlSyntaxError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Database(#[from] StoreError),
}

impl ImportError {
    /// Short description of what went wrong, for operators
    pub fn category(&self) -> &'static str {
        match self {
            ImportError::Io { .. } => "the file could not be read",
            ImportError::Format(_) => "the file is not a valid work instruction document",
            ImportError::Database(_) => "the database rejected the work instruction",
        }
    }
}

impl WorkInstructionDocument {
    /// Parse a document, reporting the failing line
    pub fn from_yaml(source: &str, filename: &str) -> Result<Self, ImportError> {
        Ok(parse_yaml_str(source, filename)?)
    }

    /// Read a document from a file
    pub fn read(path: &Path) -> Result<Self, ImportError> {
        let source = std::fs::read_to_string(path).map_err(|e| ImportError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_yaml(&source, &path.display().to_string())
    }

    pub fn to_yaml(&self) -> Result<String, serde_yml::Error> {
        serde_yml::to_string(self)
    }

    /// Parts required per run, summed over part nodes
    pub fn required_part_count(&self) -> u32 {
        self.nodes
            .iter()
            .map(|n| match n {
                DocumentNode::Part { quantity, .. } => *quantity,
                DocumentNode::Step(_) => 0,
            })
            .sum()
    }
}

/// Build the portable document for a stored version
pub fn export_work_instruction(
    store: &Store,
    id: WorkInstructionId,
) -> Result<WorkInstructionDocument, StoreError> {
    let wi = store
        .get_work_instruction(id)
        .ok_or_else(|| StoreError::not_found("work instruction", id))?;

    let part_produced = match wi.part_produced_id {
        Some(def) => {
            let def = store
                .get_part_definition(def)
                .ok_or_else(|| StoreError::not_found("part definition", def))?;
            Some(PartReference {
                part_number: def.number,
                part_name: def.name,
            })
        }
        None => None,
    };

    let mut nodes = Vec::with_capacity(wi.nodes.len());
    for node in &wi.nodes {
        nodes.push(match &node.kind {
            NodeKind::Step(step) => DocumentNode::Step(step.clone()),
            NodeKind::Part(part) => {
                let def = match part.part_definition.clone() {
                    Some(def) => def,
                    None => store
                        .get_part_definition(part.part_definition_id)
                        .ok_or_else(|| {
                            StoreError::not_found("part definition", part.part_definition_id)
                        })?,
                };
                DocumentNode::Part {
                    part_number: def.number,
                    part_name: def.name,
                    input_type: part.input_type,
                    quantity: part.quantity,
                }
            }
        });
    }

    Ok(WorkInstructionDocument {
        title: wi.title,
        version: wi.version,
        should_generate_qr_code: wi.should_generate_qr_code,
        part_produced,
        part_produced_is_serialized: wi.part_produced_is_serialized,
        nodes,
    })
}

/// Resolve a document's part references into an insertable version
///
/// Part definitions missing from the catalog are added.
pub fn resolve_document(
    store: &mut Store,
    doc: &WorkInstructionDocument,
) -> Result<NewWorkInstruction, StoreError> {
    let part_produced_id = match doc.part_produced {
        Some(ref part) => Some(
            store
                .get_or_add_part_definition(&part.part_number, &part.part_name)?
                .id,
        ),
        None => None,
    };

    let mut nodes = Vec::with_capacity(doc.nodes.len());
    for node in &doc.nodes {
        nodes.push(match node {
            DocumentNode::Step(step) => NodeKind::Step(step.clone()),
            DocumentNode::Part {
                part_number,
                part_name,
                input_type,
                quantity,
            } => {
                let def = store.get_or_add_part_definition(part_number, part_name)?;
                let mut part = PartNode::new(def.id);
                part.input_type = *input_type;
                part.quantity = *quantity;
                NodeKind::Part(part)
            }
        });
    }

    Ok(NewWorkInstruction {
        title: doc.title.clone(),
        version: doc.version.clone(),
        should_generate_qr_code: doc.should_generate_qr_code,
        part_produced_is_serialized: doc.part_produced_is_serialized,
        part_produced_id,
        nodes,
        products: Vec::new(),
    })
}

/// Store a document as a new chain or as the next version of a chain
///
/// A new version keeps the product links of the chain's latest version.
pub fn import_work_instruction(
    store: &mut Store,
    doc: &WorkInstructionDocument,
    target: ImportTarget,
) -> Result<WorkInstruction, ImportError> {
    let mut new = resolve_document(store, doc)?;

    let wi = match target {
        ImportTarget::NewChain => store.create_work_instruction(&new)?,
        ImportTarget::VersionOf(id) => {
            let latest = store
                .latest_in_chain(id)
                .ok_or_else(|| StoreError::not_found("work instruction", id))?;
            new.products = latest.products.clone();
            if new.version.trim().is_empty() || new.version.trim() == latest.version {
                new.version = next_version_label(&latest.version);
            }
            store.create_new_version(id, &new)?
        }
    };

    tracing::info!(id = %wi.id, title = %wi.title, nodes = wi.nodes.len(), "imported work instruction");
    Ok(wi)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"
title: Assemble pump
version: "A"
part_produced:
  part_number: "700-100"
  part_name: Pump
part_produced_is_serialized: true
nodes:
  - node_type: step
    name: Seat impeller
    body: Press the impeller onto the shaft
  - node_type: part
    part_number: "710-001"
    part_name: Impeller
  - node_type: part
    part_number: "720-004"
    part_name: Bolt
    quantity: 4
  - node_type: step
    name: Leak test
"#;

    #[test]
    fn test_parse_document() {
        let doc = WorkInstructionDocument::from_yaml(DOC, "pump.yaml").unwrap();
        assert_eq!(doc.title, "Assemble pump");
        assert_eq!(doc.nodes.len(), 4);
        assert_eq!(doc.required_part_count(), 5);
        assert!(matches!(
            doc.nodes[1],
            DocumentNode::Part {
                input_type: PartInputType::SerialNumber,
                quantity: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_bad_node_type_is_format_error() {
        let source = "title: x\nnodes:\n  - node_type: stp\n    name: a\n";
        let err = WorkInstructionDocument::from_yaml(source, "bad.yaml").unwrap_err();
        assert!(matches!(err, ImportError::Format(_)));
        assert_eq!(
            err.category(),
            "the file is not a valid work instruction document"
        );
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = WorkInstructionDocument::read(Path::new("/nonexistent/wi.yaml")).unwrap_err();
        assert!(matches!(err, ImportError::Io { .. }));
    }

    #[test]
    fn test_import_then_export() {
        let mut store = Store::open_in_memory().unwrap();
        let doc = WorkInstructionDocument::from_yaml(DOC, "pump.yaml").unwrap();

        let wi = import_work_instruction(&mut store, &doc, ImportTarget::NewChain).unwrap();
        assert_eq!(wi.required_part_count(), 5);
        assert!(wi.part_produced_is_serialized);
        assert_eq!(store.list_part_definitions(None).len(), 3);

        let exported = export_work_instruction(&store, wi.id).unwrap();
        assert_eq!(exported, doc);
    }

    #[test]
    fn test_import_as_version_reuses_definitions() {
        let mut store = Store::open_in_memory().unwrap();
        let doc = WorkInstructionDocument::from_yaml(DOC, "pump.yaml").unwrap();
        let first = import_work_instruction(&mut store, &doc, ImportTarget::NewChain).unwrap();

        let second =
            import_work_instruction(&mut store, &doc, ImportTarget::VersionOf(first.id)).unwrap();
        assert_eq!(second.chain_id(), first.id);
        assert_eq!(second.version, "A.1");
        assert_eq!(store.list_part_definitions(None).len(), 3);
        assert!(!store.get_work_instruction(first.id).unwrap().is_latest);
    }

    #[test]
    fn test_import_into_missing_chain_is_database_error() {
        let mut store = Store::open_in_memory().unwrap();
        let doc = WorkInstructionDocument::from_yaml(DOC, "pump.yaml").unwrap();
        let err = import_work_instruction(
            &mut store,
            &doc,
            ImportTarget::VersionOf(WorkInstructionId(9)),
        )
        .unwrap_err();
        assert!(matches!(err, ImportError::Database(_)));
        assert_eq!(err.category(), "the database rejected the work instruction");
    }
}
