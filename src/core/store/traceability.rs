//! Part traceability ledger
//!
//! `production_log_parts` is insert-only. Corrections are recorded as a
//! `removed` row for the old part plus an `installed` row for its
//! replacement, so the history of every part can be replayed.

use std::collections::HashSet;

use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use super::parts::{fetch_serializable_part, serializable_part_from_row, SERIAL_PART_COLUMNS};
use super::production_logs::require_production_log;
use super::work_instructions::require_work_instruction;
use super::{logged, parse_datetime, Store, StoreError};
use crate::core::events::LogEvent;
use crate::core::identity::{
    PartDefinitionId, ProductionLogId, SerializablePartId, WorkInstructionId,
};
use crate::entities::part::SerializablePart;
use crate::entities::production_log::DraftPart;
use crate::entities::traceability::{LedgerEntry, LineageNode, PartOperation};
use crate::entities::work_instruction::PartInputType;

/// Ledger row joined with part, definition and log time
fn ledger_select() -> String {
    format!(
        "SELECT plp.production_log_id, plp.operation_type, {}, pl.created_on \
         FROM production_log_parts plp \
         JOIN serializable_parts sp ON sp.id = plp.serializable_part_id \
         JOIN part_definitions pd ON pd.id = sp.part_definition_id \
         JOIN production_logs pl ON pl.id = plp.production_log_id",
        SERIAL_PART_COLUMNS
    )
}

fn ledger_entry_from_row(row: &Row<'_>) -> rusqlite::Result<LedgerEntry> {
    let operation: String = row.get(1)?;
    let operation_type = operation
        .parse::<PartOperation>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, e.into()))?;
    Ok(LedgerEntry {
        production_log_id: row.get(0)?,
        operation_type,
        part: serializable_part_from_row(row, 2)?,
        logged_on: parse_datetime(&row.get::<_, String>(7)?),
    })
}

/// Insert a ledger row. Returns false when the identical row exists.
pub(super) fn insert_ledger_row(
    conn: &Connection,
    log: ProductionLogId,
    part: SerializablePartId,
    operation: PartOperation,
) -> Result<bool, StoreError> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO production_log_parts \
            (production_log_id, serializable_part_id, operation_type) \
         VALUES (?1, ?2, ?3)",
        params![log, part, operation.as_str()],
    )?;
    Ok(changed > 0)
}

/// The part a log produced, if any
pub(super) fn produced_part_of(
    conn: &Connection,
    log: ProductionLogId,
) -> Result<Option<SerializablePart>, StoreError> {
    let sql = format!(
        "SELECT {} FROM production_log_parts plp \
         JOIN serializable_parts sp ON sp.id = plp.serializable_part_id \
         JOIN part_definitions pd ON pd.id = sp.part_definition_id \
         WHERE plp.production_log_id = ?1 AND plp.operation_type = 'produced' \
         ORDER BY sp.id LIMIT 1",
        SERIAL_PART_COLUMNS
    );
    let part = conn
        .query_row(&sql, params![log], |row| serializable_part_from_row(row, 0))
        .optional()?;
    Ok(part)
}

/// The log that produced a part, if any
fn producing_log(
    conn: &Connection,
    part: SerializablePartId,
) -> Result<Option<ProductionLogId>, StoreError> {
    let log = conn
        .query_row(
            "SELECT production_log_id FROM production_log_parts \
             WHERE serializable_part_id = ?1 AND operation_type = 'produced' \
             ORDER BY production_log_id LIMIT 1",
            params![part],
            |row| row.get(0),
        )
        .optional()?;
    Ok(log)
}

fn entries_for_log(
    conn: &Connection,
    log: ProductionLogId,
) -> Result<Vec<LedgerEntry>, StoreError> {
    let sql = format!(
        "{} WHERE plp.production_log_id = ?1 ORDER BY plp.operation_type, sp.id",
        ledger_select()
    );
    let mut stmt = conn.prepare(&sql)?;
    let entries = stmt
        .query_map(params![log], ledger_entry_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}

/// Parts installed in a log and not removed from it since
fn effective_installed(
    conn: &Connection,
    log: ProductionLogId,
) -> Result<Vec<SerializablePart>, StoreError> {
    let entries = entries_for_log(conn, log)?;
    let removed: HashSet<SerializablePartId> = entries
        .iter()
        .filter(|e| e.operation_type == PartOperation::Removed)
        .map(|e| e.part.id)
        .collect();
    Ok(entries
        .into_iter()
        .filter(|e| e.operation_type == PartOperation::Installed && !removed.contains(&e.part.id))
        .map(|e| e.part)
        .collect())
}

fn build_lineage(
    conn: &Connection,
    part: SerializablePart,
    visited: &mut HashSet<SerializablePartId>,
) -> Result<LineageNode, StoreError> {
    visited.insert(part.id);
    let produced_by = producing_log(conn, part.id)?;

    let mut children = Vec::new();
    if let Some(log) = produced_by {
        for child in effective_installed(conn, log)? {
            if visited.contains(&child.id) {
                tracing::warn!(part = %child.id, %log, "cycle in part lineage, skipping");
                continue;
            }
            children.push(build_lineage(conn, child, visited)?);
        }
    }

    Ok(LineageNode {
        part,
        produced_by,
        children,
    })
}

impl Store {
    /// Append one ledger row
    pub fn record_part(
        &mut self,
        log: ProductionLogId,
        part: SerializablePartId,
        operation: PartOperation,
    ) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        require_production_log(&tx, log)?;
        fetch_serializable_part(&tx, part)?
            .ok_or_else(|| StoreError::not_found("serializable part", part))?;
        if !insert_ledger_row(&tx, log, part, operation)? {
            return Err(StoreError::Invalid(format!(
                "part {} is already recorded as {} in production log {}",
                part, operation, log
            )));
        }
        tx.commit()?;

        tracing::info!(%log, %part, %operation, "recorded part");
        self.publish(LogEvent::PartRecorded {
            log,
            part,
            operation,
        });
        Ok(())
    }

    /// Ledger rows of one log
    pub fn parts_for_log(&self, log: ProductionLogId) -> Vec<LedgerEntry> {
        logged("parts_for_log", entries_for_log(&self.conn, log))
    }

    /// Installed rows of several logs whose part matches one of the
    /// expected definitions
    pub fn get_installed_for_production_logs(
        &self,
        logs: &[ProductionLogId],
        expected: &[PartDefinitionId],
    ) -> Vec<LedgerEntry> {
        if logs.is_empty() || expected.is_empty() {
            return Vec::new();
        }
        logged(
            "get_installed_for_production_logs",
            self.query_installed(logs, expected),
        )
    }

    fn query_installed(
        &self,
        logs: &[ProductionLogId],
        expected: &[PartDefinitionId],
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let log_marks = vec!["?"; logs.len()].join(", ");
        let def_marks = vec!["?"; expected.len()].join(", ");
        let sql = format!(
            "{} WHERE plp.operation_type = 'installed' \
               AND plp.production_log_id IN ({}) \
               AND sp.part_definition_id IN ({}) \
             ORDER BY plp.production_log_id, sp.id",
            ledger_select(),
            log_marks,
            def_marks
        );
        let values: Vec<i64> = logs
            .iter()
            .map(|l| l.get())
            .chain(expected.iter().map(|d| d.get()))
            .collect();

        let mut stmt = self.conn.prepare(&sql)?;
        let entries = stmt
            .query_map(params_from_iter(values), ledger_entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Part entries for a new log, reusing what a prior log installed
    ///
    /// Each part node takes matching parts from the prior log in order, up
    /// to its quantity. Nodes that take a production log id reference the
    /// log that produced the reused part when there is one.
    pub fn prefill_from_log(
        &self,
        prior: ProductionLogId,
        work_instruction: WorkInstructionId,
    ) -> Result<Vec<DraftPart>, StoreError> {
        let wi = require_work_instruction(&self.conn, work_instruction)?;
        require_production_log(&self.conn, prior)?;
        let mut available = effective_installed(&self.conn, prior)?;

        let mut entries = Vec::new();
        for (node, part_node) in wi.part_nodes() {
            for _ in 0..part_node.quantity {
                let pos = available
                    .iter()
                    .position(|p| p.part_definition_id == part_node.part_definition_id);
                let Some(pos) = pos else {
                    entries.push(DraftPart {
                        node_id: node.id,
                        serial_number: None,
                        source_log: None,
                    });
                    continue;
                };
                let part = available.remove(pos);
                let source_log = match part_node.input_type {
                    PartInputType::ProductionLogId => producing_log(&self.conn, part.id)?,
                    PartInputType::SerialNumber => None,
                };
                entries.push(DraftPart {
                    node_id: node.id,
                    serial_number: part.serial_number,
                    source_log,
                });
            }
        }
        Ok(entries)
    }

    /// Swap an installed part, recording `removed` for the old one and
    /// `installed` for the new one
    pub fn replace_installed_part(
        &mut self,
        log: ProductionLogId,
        old: SerializablePartId,
        new: SerializablePartId,
    ) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        require_production_log(&tx, log)?;

        let installed = effective_installed(&tx, log)?;
        let old_part = installed.iter().find(|p| p.id == old).ok_or_else(|| {
            StoreError::Invalid(format!(
                "part {} is not installed in production log {}",
                old, log
            ))
        })?;
        let new_part = fetch_serializable_part(&tx, new)?
            .ok_or_else(|| StoreError::not_found("serializable part", new))?;
        if new_part.part_definition_id != old_part.part_definition_id {
            return Err(StoreError::Invalid(format!(
                "replacement {} is a {} but {} is a {}",
                new, new_part.part_definition_id, old, old_part.part_definition_id
            )));
        }

        insert_ledger_row(&tx, log, old, PartOperation::Removed)?;
        if !insert_ledger_row(&tx, log, new, PartOperation::Installed)? {
            return Err(StoreError::Invalid(format!(
                "part {} was already installed in production log {}",
                new, log
            )));
        }
        tx.commit()?;

        tracing::info!(%log, %old, %new, "replaced installed part");
        self.publish(LogEvent::PartRecorded {
            log,
            part: old,
            operation: PartOperation::Removed,
        });
        self.publish(LogEvent::PartRecorded {
            log,
            part: new,
            operation: PartOperation::Installed,
        });
        Ok(())
    }

    /// Every ledger row touching a part, oldest log first
    pub fn part_history(&self, part: SerializablePartId) -> Vec<LedgerEntry> {
        logged("part_history", self.query_part_history(part))
    }

    fn query_part_history(&self, part: SerializablePartId) -> Result<Vec<LedgerEntry>, StoreError> {
        let sql = format!(
            "{} WHERE plp.serializable_part_id = ?1 \
             ORDER BY pl.created_on, plp.production_log_id, plp.operation_type",
            ledger_select()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let entries = stmt
            .query_map(params![part], ledger_entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Genealogy tree of a part
    pub fn lineage(&self, part: SerializablePartId) -> Result<LineageNode, StoreError> {
        let root = fetch_serializable_part(&self.conn, part)?
            .ok_or_else(|| StoreError::not_found("serializable part", part))?;
        let mut visited = HashSet::new();
        build_lineage(&self.conn, root, &mut visited)
    }

    /// The part a log produced
    pub fn produced_part(&self, log: ProductionLogId) -> Option<SerializablePart> {
        logged("produced_part", produced_part_of(&self.conn, log))
    }
}
