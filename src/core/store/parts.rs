//! Part definition catalog and serializable part registry

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{logged, Store, StoreError};
use crate::core::identity::{PartDefinitionId, SerializablePartId};
use crate::entities::part::{normalize_serial, PartDefinition, SerializablePart};

/// Column list matching [`serializable_part_from_row`]
pub(super) const SERIAL_PART_COLUMNS: &str =
    "sp.id, sp.part_definition_id, sp.serial_number, pd.number, pd.name";

/// Map `SERIAL_PART_COLUMNS` starting at `offset`
pub(super) fn serializable_part_from_row(
    row: &Row<'_>,
    offset: usize,
) -> rusqlite::Result<SerializablePart> {
    let part_definition_id: PartDefinitionId = row.get(offset + 1)?;
    Ok(SerializablePart {
        id: row.get(offset)?,
        part_definition_id,
        serial_number: row.get(offset + 2)?,
        part_definition: Some(PartDefinition {
            id: part_definition_id,
            number: row.get(offset + 3)?,
            name: row.get(offset + 4)?,
        }),
    })
}

pub(super) fn fetch_part_definition(
    conn: &Connection,
    id: PartDefinitionId,
) -> Result<Option<PartDefinition>, StoreError> {
    let def = conn
        .query_row(
            "SELECT id, number, name FROM part_definitions WHERE id = ?1",
            params![id],
            |row| {
                Ok(PartDefinition {
                    id: row.get(0)?,
                    number: row.get(1)?,
                    name: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(def)
}

pub(super) fn require_part_definition(
    conn: &Connection,
    id: PartDefinitionId,
) -> Result<PartDefinition, StoreError> {
    fetch_part_definition(conn, id)?.ok_or_else(|| StoreError::not_found("part definition", id))
}

/// Application-level uniqueness of (number, name)
pub(super) fn get_or_add_part_definition(
    conn: &Connection,
    number: &str,
    name: &str,
) -> Result<PartDefinition, StoreError> {
    let number = number.trim();
    let name = name.trim();
    if number.is_empty() {
        return Err(StoreError::Invalid("part number must not be empty".into()));
    }

    let existing = conn
        .query_row(
            "SELECT id FROM part_definitions WHERE number = ?1 AND name = ?2 ORDER BY id LIMIT 1",
            params![number, name],
            |row| row.get::<_, PartDefinitionId>(0),
        )
        .optional()?;

    let id = match existing {
        Some(id) => id,
        None => {
            conn.execute(
                "INSERT INTO part_definitions (number, name) VALUES (?1, ?2)",
                params![number, name],
            )?;
            let id = PartDefinitionId(conn.last_insert_rowid());
            tracing::info!(%id, number, name, "added part definition");
            id
        }
    };

    Ok(PartDefinition {
        id,
        number: number.to_string(),
        name: name.to_string(),
    })
}

pub(super) fn fetch_serializable_part(
    conn: &Connection,
    id: SerializablePartId,
) -> Result<Option<SerializablePart>, StoreError> {
    let sql = format!(
        "SELECT {} FROM serializable_parts sp \
         JOIN part_definitions pd ON pd.id = sp.part_definition_id \
         WHERE sp.id = ?1",
        SERIAL_PART_COLUMNS
    );
    let part = conn
        .query_row(&sql, params![id], |row| serializable_part_from_row(row, 0))
        .optional()?;
    Ok(part)
}

/// Parts of a definition carrying the given serial
pub(super) fn find_by_definition_and_serial(
    conn: &Connection,
    definition: PartDefinitionId,
    serial: &str,
) -> Result<Vec<SerializablePart>, StoreError> {
    let sql = format!(
        "SELECT {} FROM serializable_parts sp \
         JOIN part_definitions pd ON pd.id = sp.part_definition_id \
         WHERE sp.part_definition_id = ?1 AND sp.serial_number = ?2 \
         ORDER BY sp.id",
        SERIAL_PART_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let parts = stmt
        .query_map(params![definition, serial], |row| {
            serializable_part_from_row(row, 0)
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(parts)
}

/// Insert a part. Duplicate serials for the same definition are allowed
/// but logged.
pub(super) fn insert_serializable_part(
    conn: &Connection,
    definition: PartDefinitionId,
    serial: Option<&str>,
) -> Result<SerializablePart, StoreError> {
    let def = require_part_definition(conn, definition)?;
    let serial = normalize_serial(serial);

    if let Some(ref s) = serial {
        let duplicates = find_by_definition_and_serial(conn, definition, s)?;
        if !duplicates.is_empty() {
            tracing::warn!(
                part = %def,
                serial = %s,
                existing = duplicates.len(),
                "duplicate serial number"
            );
        }
    }

    conn.execute(
        "INSERT INTO serializable_parts (part_definition_id, serial_number) VALUES (?1, ?2)",
        params![definition, serial],
    )?;
    let id = SerializablePartId(conn.last_insert_rowid());
    tracing::debug!(%id, part = %def, "created serializable part");

    Ok(SerializablePart {
        id,
        part_definition_id: definition,
        serial_number: serial,
        part_definition: Some(def),
    })
}

/// Reuse the part carrying this serial, or create it
pub(super) fn find_or_create_serializable_part(
    conn: &Connection,
    definition: PartDefinitionId,
    serial: Option<&str>,
) -> Result<SerializablePart, StoreError> {
    if let Some(s) = normalize_serial(serial) {
        let mut matches = find_by_definition_and_serial(conn, definition, &s)?;
        if matches.len() > 1 {
            tracing::warn!(
                serial = %s,
                count = matches.len(),
                "serial number matches several parts, using the newest"
            );
        }
        if let Some(part) = matches.pop() {
            return Ok(part);
        }
    }
    insert_serializable_part(conn, definition, serial)
}

impl Store {
    /// Return the definition with this number and name, adding it if missing
    pub fn get_or_add_part_definition(
        &mut self,
        number: &str,
        name: &str,
    ) -> Result<PartDefinition, StoreError> {
        let tx = self.conn.transaction()?;
        let def = get_or_add_part_definition(&tx, number, name)?;
        tx.commit()?;
        Ok(def)
    }

    pub fn get_part_definition(&self, id: PartDefinitionId) -> Option<PartDefinition> {
        logged(
            "get_part_definition",
            fetch_part_definition(&self.conn, id),
        )
    }

    /// Definitions whose number or name contains `search`
    pub fn list_part_definitions(&self, search: Option<&str>) -> Vec<PartDefinition> {
        logged("list_part_definitions", self.query_part_definitions(search))
    }

    fn query_part_definitions(
        &self,
        search: Option<&str>,
    ) -> Result<Vec<PartDefinition>, StoreError> {
        let pattern = format!("%{}%", search.unwrap_or("").trim());
        let mut stmt = self.conn.prepare(
            "SELECT id, number, name FROM part_definitions \
             WHERE number LIKE ?1 OR name LIKE ?1 ORDER BY number, name, id",
        )?;
        let defs = stmt
            .query_map(params![pattern], |row| {
                Ok(PartDefinition {
                    id: row.get(0)?,
                    number: row.get(1)?,
                    name: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(defs)
    }

    /// Delete an unreferenced definition
    pub fn delete_part_definition(&mut self, id: PartDefinitionId) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        require_part_definition(&tx, id)?;

        let references: i64 = tx.query_row(
            "SELECT (SELECT COUNT(*) FROM serializable_parts WHERE part_definition_id = ?1)
                  + (SELECT COUNT(*) FROM products WHERE part_definition_id = ?1)
                  + (SELECT COUNT(*) FROM part_nodes WHERE part_definition_id = ?1)
                  + (SELECT COUNT(*) FROM work_instructions WHERE part_produced_id = ?1)",
            params![id],
            |row| row.get(0),
        )?;
        if references > 0 {
            return Err(StoreError::InUse {
                kind: "part definition",
                id: id.to_string(),
                count: references,
                referenced_by: "parts, products or work instructions",
            });
        }

        tx.execute("DELETE FROM part_definitions WHERE id = ?1", params![id])?;
        tx.commit()?;
        tracing::info!(%id, "deleted part definition");
        Ok(())
    }

    /// Register a part instance (duplicate serials warn, never fail)
    pub fn create_serializable_part(
        &mut self,
        definition: PartDefinitionId,
        serial: Option<&str>,
    ) -> Result<SerializablePart, StoreError> {
        let tx = self.conn.transaction()?;
        let part = insert_serializable_part(&tx, definition, serial)?;
        tx.commit()?;
        Ok(part)
    }

    pub fn get_serializable_part(&self, id: SerializablePartId) -> Option<SerializablePart> {
        logged(
            "get_serializable_part",
            fetch_serializable_part(&self.conn, id),
        )
    }

    /// Part instances, optionally restricted to one definition
    pub fn list_serializable_parts(
        &self,
        definition: Option<PartDefinitionId>,
    ) -> Vec<SerializablePart> {
        logged(
            "list_serializable_parts",
            self.query_serializable_parts(definition),
        )
    }

    fn query_serializable_parts(
        &self,
        definition: Option<PartDefinitionId>,
    ) -> Result<Vec<SerializablePart>, StoreError> {
        let sql = format!(
            "SELECT {} FROM serializable_parts sp \
             JOIN part_definitions pd ON pd.id = sp.part_definition_id \
             WHERE ?1 IS NULL OR sp.part_definition_id = ?1 \
             ORDER BY sp.id",
            SERIAL_PART_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let parts = stmt
            .query_map(params![definition], |row| serializable_part_from_row(row, 0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(parts)
    }

    /// Every part carrying this serial, across definitions
    pub fn find_parts_by_serial(&self, serial: &str) -> Vec<SerializablePart> {
        logged("find_parts_by_serial", self.query_parts_by_serial(serial))
    }

    fn query_parts_by_serial(&self, serial: &str) -> Result<Vec<SerializablePart>, StoreError> {
        let sql = format!(
            "SELECT {} FROM serializable_parts sp \
             JOIN part_definitions pd ON pd.id = sp.part_definition_id \
             WHERE sp.serial_number = ?1 ORDER BY sp.id",
            SERIAL_PART_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let parts = stmt
            .query_map(params![serial.trim()], |row| {
                serializable_part_from_row(row, 0)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(parts)
    }
}
