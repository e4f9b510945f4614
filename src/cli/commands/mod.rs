//! CLI command implementations

pub mod completions;
pub mod db;
pub mod init;
pub mod log;
pub mod part;
pub mod product;
pub mod report;
pub mod trace;
pub mod work;
