//! Record identity: typed integer keys with short display prefixes
//!
//! Every table uses an SQLite `INTEGER PRIMARY KEY`. The newtypes below keep
//! the keys of different tables from being mixed up and render as
//! `PREFIX-N` (e.g. `WI-12`) in CLI output.

use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Record type prefixes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordPrefix {
    /// Part definition (catalog entry)
    Pd,
    /// Serializable part instance
    Sp,
    /// Work instruction
    Wi,
    /// Work instruction node (step or part node)
    Node,
    /// Production log
    Log,
    /// Production log step
    Lstep,
    /// Product
    Prd,
}

impl RecordPrefix {
    /// Get the string representation of the prefix
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordPrefix::Pd => "PD",
            RecordPrefix::Sp => "SP",
            RecordPrefix::Wi => "WI",
            RecordPrefix::Node => "NODE",
            RecordPrefix::Log => "LOG",
            RecordPrefix::Lstep => "LSTEP",
            RecordPrefix::Prd => "PRD",
        }
    }

    /// Get all valid prefixes
    pub fn all() -> &'static [RecordPrefix] {
        &[
            RecordPrefix::Pd,
            RecordPrefix::Sp,
            RecordPrefix::Wi,
            RecordPrefix::Node,
            RecordPrefix::Log,
            RecordPrefix::Lstep,
            RecordPrefix::Prd,
        ]
    }
}

impl fmt::Display for RecordPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RecordPrefix {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_uppercase();
        Self::all()
            .iter()
            .copied()
            .find(|p| p.as_str() == upper)
            .ok_or_else(|| IdParseError::InvalidPrefix(s.to_string()))
    }
}

/// Parse `PREFIX-N` or a bare `N` into the numeric key
fn parse_key(s: &str, expected: RecordPrefix) -> Result<i64, IdParseError> {
    let s = s.trim();
    let number = match s.split_once('-') {
        Some((prefix_str, rest)) => {
            let prefix: RecordPrefix = prefix_str.parse()?;
            if prefix != expected {
                return Err(IdParseError::WrongPrefix {
                    expected: expected.as_str(),
                    found: prefix.as_str(),
                });
            }
            rest
        }
        None => s,
    };

    number
        .parse::<i64>()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| IdParseError::InvalidNumber(s.to_string()))
}

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident => $prefix:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub const PREFIX: RecordPrefix = $prefix;

            /// Raw database key
            pub fn get(self) -> i64 {
                self.0
            }

            /// Parse `PREFIX-N` or `N`
            pub fn parse(s: &str) -> Result<Self, IdParseError> {
                s.parse()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", Self::PREFIX, self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_key(s, Self::PREFIX).map(Self)
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.0))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                i64::column_result(value).map(Self)
            }
        }
    };
}

record_id!(
    /// Key of a part definition
    PartDefinitionId => RecordPrefix::Pd
);
record_id!(
    /// Key of a serializable part
    SerializablePartId => RecordPrefix::Sp
);
record_id!(
    /// Key of a work instruction (one version in a chain)
    WorkInstructionId => RecordPrefix::Wi
);
record_id!(
    /// Key of a work instruction node
    NodeId => RecordPrefix::Node
);
record_id!(
    /// Key of a production log
    ProductionLogId => RecordPrefix::Log
);
record_id!(
    /// Key of a production log step
    ProductionLogStepId => RecordPrefix::Lstep
);
record_id!(
    /// Key of a product
    ProductId => RecordPrefix::Prd
);

/// Errors that can occur when parsing record IDs
#[derive(Debug, Error)]
pub enum IdParseError {
    #[error("invalid record prefix: '{0}' (valid: PD, SP, WI, NODE, LOG, LSTEP, PRD)")]
    InvalidPrefix(String),

    #[error("expected a {expected} id, got a {found} id")]
    WrongPrefix {
        expected: &'static str,
        found: &'static str,
    },

    #[error("invalid record number in '{0}'")]
    InvalidNumber(String),
}
