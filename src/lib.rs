//! MES: manufacturing execution toolkit
//!
//! Versioned work instructions, production logs with per-step attempt
//! history and a part traceability ledger, kept in a local SQLite database.

pub mod cli;
pub mod core;
pub mod entities;
pub mod yaml;
