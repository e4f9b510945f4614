//! Core module - configuration, identity, events and the store

pub mod config;
pub mod events;
pub mod identity;
pub mod project;
pub mod store;
pub mod transfer;

pub use config::Config;
pub use events::{LogEvent, LogEvents};
pub use identity::{IdParseError, RecordPrefix};
pub use project::{Project, ProjectError};
pub use store::{Store, StoreError};
pub use transfer::{ImportError, ImportTarget, WorkInstructionDocument};
