//! Entity type definitions
//!
//! MES records fall into three groups:
//!
//! **Catalog:**
//! - [`PartDefinition`] - Part number and name
//! - [`SerializablePart`] - A physical part instance, optionally serialized
//! - [`Product`] - A part definition that is built on the floor
//!
//! **Procedures:**
//! - [`WorkInstruction`] - A versioned procedure of step and part nodes
//!
//! **Execution:**
//! - [`ProductionLog`] - One run of a work instruction with step attempts
//! - [`ProductionLogPart`] - Ledger row linking a part to a log

pub mod part;
pub mod product;
pub mod production_log;
pub mod traceability;
pub mod work_instruction;

pub use part::{PartDefinition, SerializablePart};
pub use product::Product;
pub use production_log::{ProductionLog, ProductionLogDraft};
pub use traceability::{PartOperation, ProductionLogPart};
pub use work_instruction::WorkInstruction;
