//! Work instruction versions, nodes and chain invariants
//!
//! A chain is every row sharing `chain_id`. Per chain at most one row is
//! latest and at most one is active, and the active row must be the latest.
//! The methods here keep that true inside each transaction; the partial
//! unique indexes and the CHECK constraint reject anything that slips past.

use rusqlite::{params, Connection, OptionalExtension};

use super::parts::require_part_definition;
use super::{logged, Store, StoreError};
use crate::core::events::LogEvent;
use crate::core::identity::{NodeId, PartDefinitionId, ProductId, WorkInstructionId};
use crate::entities::part::PartDefinition;
use crate::entities::work_instruction::{
    next_version_label, NewWorkInstruction, NodeKind, PartNode, Step,
    WorkInstruction, WorkInstructionNode,
};

/// Filter for listing work instructions
#[derive(Debug, Clone, Default)]
pub struct WorkInstructionFilter {
    /// Only the latest version of each chain
    pub latest_only: bool,
    /// Only active versions
    pub active_only: bool,
    /// Only members of this chain (any member id resolves to the chain)
    pub chain: Option<WorkInstructionId>,
    /// Only versions linked to this product
    pub product: Option<ProductId>,
    /// Title substring (case-insensitive)
    pub search: Option<String>,
}

const WI_COLUMNS: &str = "id, title, version, is_active, is_latest, original_id, \
     should_generate_qr_code, part_produced_is_serialized, part_produced_id";

fn work_instruction_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<WorkInstruction> {
    Ok(WorkInstruction {
        id: row.get(0)?,
        title: row.get(1)?,
        version: row.get(2)?,
        is_active: row.get(3)?,
        is_latest: row.get(4)?,
        original_id: row.get(5)?,
        should_generate_qr_code: row.get(6)?,
        part_produced_is_serialized: row.get(7)?,
        part_produced_id: row.get(8)?,
        nodes: Vec::new(),
        products: Vec::new(),
    })
}

fn fetch_step_media(conn: &Connection, step: NodeId) -> Result<(Vec<String>, Vec<String>), StoreError> {
    let mut stmt = conn.prepare(
        "SELECT slot, path FROM step_media WHERE step_id = ?1 ORDER BY slot, position",
    )?;
    let rows = stmt
        .query_map(params![step], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut primary = Vec::new();
    let mut secondary = Vec::new();
    for (slot, path) in rows {
        if slot == "primary" {
            primary.push(path);
        } else {
            secondary.push(path);
        }
    }
    Ok((primary, secondary))
}

/// Nodes of an instruction ordered by position
pub(super) fn fetch_nodes(
    conn: &Connection,
    id: WorkInstructionId,
) -> Result<Vec<WorkInstructionNode>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT n.id, n.position, n.node_type,
                s.name, s.body, s.detailed_body,
                pn.part_definition_id, pn.input_type, pn.quantity, pd.number, pd.name
         FROM work_instruction_nodes n
         LEFT JOIN steps s ON s.id = n.id
         LEFT JOIN part_nodes pn ON pn.id = n.id
         LEFT JOIN part_definitions pd ON pd.id = pn.part_definition_id
         WHERE n.work_instruction_id = ?1
         ORDER BY n.position, n.id",
    )?;

    let mut nodes = stmt
        .query_map(params![id], |row| {
            let node_type: String = row.get(2)?;
            let kind = if node_type == "part" {
                let part_definition_id: PartDefinitionId = row.get(6)?;
                let input_type: String = row.get(7)?;
                NodeKind::Part(PartNode {
                    part_definition_id,
                    part_definition: Some(PartDefinition {
                        id: part_definition_id,
                        number: row.get(9)?,
                        name: row.get(10)?,
                    }),
                    input_type: input_type.parse().unwrap_or_default(),
                    quantity: row.get(8)?,
                })
            } else {
                NodeKind::Step(Step {
                    name: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                    body: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                    detailed_body: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                    primary_media: Vec::new(),
                    secondary_media: Vec::new(),
                })
            };
            Ok(WorkInstructionNode {
                id: row.get(0)?,
                position: row.get(1)?,
                kind,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for node in &mut nodes {
        let node_id = node.id;
        if let NodeKind::Step(step) = &mut node.kind {
            let (primary, secondary) = fetch_step_media(conn, node_id)?;
            step.primary_media = primary;
            step.secondary_media = secondary;
        }
    }

    Ok(nodes)
}

fn fetch_linked_products(
    conn: &Connection,
    id: WorkInstructionId,
) -> Result<Vec<ProductId>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT product_id FROM work_instruction_products \
         WHERE work_instruction_id = ?1 ORDER BY product_id",
    )?;
    let ids = stmt
        .query_map(params![id], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

pub(super) fn fetch_work_instruction(
    conn: &Connection,
    id: WorkInstructionId,
) -> Result<Option<WorkInstruction>, StoreError> {
    let sql = format!("SELECT {} FROM work_instructions WHERE id = ?1", WI_COLUMNS);
    let wi = conn
        .query_row(&sql, params![id], work_instruction_from_row)
        .optional()?;

    match wi {
        Some(mut wi) => {
            wi.nodes = fetch_nodes(conn, id)?;
            wi.products = fetch_linked_products(conn, id)?;
            Ok(Some(wi))
        }
        None => Ok(None),
    }
}

pub(super) fn require_work_instruction(
    conn: &Connection,
    id: WorkInstructionId,
) -> Result<WorkInstruction, StoreError> {
    fetch_work_instruction(conn, id)?.ok_or_else(|| StoreError::not_found("work instruction", id))
}

/// Chain identity of any member
fn chain_of(conn: &Connection, id: WorkInstructionId) -> Result<WorkInstructionId, StoreError> {
    conn.query_row(
        "SELECT chain_id FROM work_instructions WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("work instruction", id))
}

/// Number of production logs referencing a version
fn production_log_count(conn: &Connection, id: WorkInstructionId) -> Result<i64, StoreError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM production_logs WHERE work_instruction_id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    Ok(count)
}

fn insert_nodes(
    conn: &Connection,
    id: WorkInstructionId,
    nodes: &[NodeKind],
) -> Result<(), StoreError> {
    for (position, kind) in nodes.iter().enumerate() {
        conn.execute(
            "INSERT INTO work_instruction_nodes (work_instruction_id, position, node_type) \
             VALUES (?1, ?2, ?3)",
            params![id, position as i64, kind.node_type().as_str()],
        )?;
        let node_id = NodeId(conn.last_insert_rowid());

        match kind {
            NodeKind::Step(step) => {
                if step.name.trim().is_empty() {
                    return Err(StoreError::Invalid(format!(
                        "step at position {} has no name",
                        position
                    )));
                }
                conn.execute(
                    "INSERT INTO steps (id, name, body, detailed_body) VALUES (?1, ?2, ?3, ?4)",
                    params![node_id, step.name, step.body, step.detailed_body],
                )?;
                let media = step
                    .primary_media
                    .iter()
                    .map(|p| ("primary", p))
                    .enumerate()
                    .chain(
                        step.secondary_media
                            .iter()
                            .map(|p| ("secondary", p))
                            .enumerate(),
                    );
                for (index, (slot, path)) in media {
                    conn.execute(
                        "INSERT INTO step_media (step_id, slot, position, path) VALUES (?1, ?2, ?3, ?4)",
                        params![node_id, slot, index as i64, path],
                    )?;
                }
            }
            NodeKind::Part(part) => {
                require_part_definition(conn, part.part_definition_id)?;
                if part.quantity == 0 {
                    return Err(StoreError::Invalid(format!(
                        "part node at position {} requires a quantity of at least 1",
                        position
                    )));
                }
                conn.execute(
                    "INSERT INTO part_nodes (id, part_definition_id, input_type, quantity) \
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        node_id,
                        part.part_definition_id,
                        part.input_type.as_str(),
                        part.quantity
                    ],
                )?;
            }
        }
    }
    Ok(())
}

fn replace_products(
    conn: &Connection,
    id: WorkInstructionId,
    products: &[ProductId],
) -> Result<(), StoreError> {
    conn.execute(
        "DELETE FROM work_instruction_products WHERE work_instruction_id = ?1",
        params![id],
    )?;
    for product in products {
        super::products::require_product(conn, *product)?;
        conn.execute(
            "INSERT OR IGNORE INTO work_instruction_products (work_instruction_id, product_id) \
             VALUES (?1, ?2)",
            params![id, product],
        )?;
    }
    Ok(())
}

/// Insert a version row plus its nodes and product links
///
/// `original` is `None` for a chain head; the trigger then sets `chain_id`
/// to the new id.
fn insert_version(
    conn: &Connection,
    new: &NewWorkInstruction,
    original: Option<WorkInstructionId>,
) -> Result<WorkInstructionId, StoreError> {
    if new.title.trim().is_empty() {
        return Err(StoreError::Invalid("work instruction title must not be empty".into()));
    }
    if let Some(part) = new.part_produced_id {
        require_part_definition(conn, part)?;
    }

    let version = if new.version.trim().is_empty() {
        "1".to_string()
    } else {
        new.version.trim().to_string()
    };

    conn.execute(
        "INSERT INTO work_instructions
            (title, version, is_active, is_latest, original_id, chain_id,
             should_generate_qr_code, part_produced_is_serialized, part_produced_id)
         VALUES (?1, ?2, 0, 1, ?3, ?3, ?4, ?5, ?6)",
        params![
            new.title.trim(),
            version,
            original,
            new.should_generate_qr_code,
            new.part_produced_is_serialized,
            new.part_produced_id
        ],
    )?;
    let id = WorkInstructionId(conn.last_insert_rowid());

    insert_nodes(conn, id, &new.nodes)?;
    replace_products(conn, id, &new.products)?;
    Ok(id)
}

/// Clear `is_latest` (and with it `is_active`) on every chain member
fn mark_all_versions_not_latest(
    conn: &Connection,
    chain: WorkInstructionId,
) -> Result<usize, StoreError> {
    let changed = conn.execute(
        "UPDATE work_instructions SET is_latest = 0, is_active = 0 WHERE chain_id = ?1",
        params![chain],
    )?;
    Ok(changed)
}

fn mark_other_versions_inactive(
    conn: &Connection,
    id: WorkInstructionId,
) -> Result<usize, StoreError> {
    let chain = chain_of(conn, id)?;
    let changed = conn.execute(
        "UPDATE work_instructions SET is_active = 0 \
         WHERE chain_id = ?1 AND id <> ?2 AND is_active = 1",
        params![chain, id],
    )?;
    Ok(changed)
}

impl Store {
    /// Create the first version of a new chain (latest, not active)
    pub fn create_work_instruction(
        &mut self,
        new: &NewWorkInstruction,
    ) -> Result<WorkInstruction, StoreError> {
        let tx = self.conn.transaction()?;
        let id = insert_version(&tx, new, None)?;
        let wi = require_work_instruction(&tx, id)?;
        tx.commit()?;
        tracing::info!(%id, title = %wi.title, "created work instruction");
        Ok(wi)
    }

    /// Add a version to the chain containing `from`
    ///
    /// Every existing member is demoted in the same transaction that inserts
    /// the new latest row.
    pub fn create_new_version(
        &mut self,
        from: WorkInstructionId,
        new: &NewWorkInstruction,
    ) -> Result<WorkInstruction, StoreError> {
        let tx = self.conn.transaction()?;
        let chain = chain_of(&tx, from)?;
        let demoted = mark_all_versions_not_latest(&tx, chain)?;
        let id = insert_version(&tx, new, Some(chain))?;
        let wi = require_work_instruction(&tx, id)?;
        tx.commit()?;

        tracing::info!(%chain, %id, demoted, version = %wi.version, "created new work instruction version");
        self.publish(LogEvent::WorkInstructionVersioned { chain, version: id });
        Ok(wi)
    }

    /// Demote every member of the chain containing `id`
    pub fn mark_all_versions_not_latest(
        &mut self,
        id: WorkInstructionId,
    ) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        let chain = chain_of(&tx, id)?;
        let changed = mark_all_versions_not_latest(&tx, chain)?;
        tx.commit()?;
        Ok(changed)
    }

    /// Deactivate every chain member except `id`
    pub fn mark_other_versions_inactive(
        &mut self,
        id: WorkInstructionId,
    ) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        let changed = mark_other_versions_inactive(&tx, id)?;
        tx.commit()?;
        Ok(changed)
    }

    /// Make `id` the active version of its chain
    ///
    /// Order matters for the constraints: siblings are deactivated, then
    /// the target is activated, then the transaction commits.
    pub fn activate_work_instruction(
        &mut self,
        id: WorkInstructionId,
    ) -> Result<WorkInstruction, StoreError> {
        let tx = self.conn.transaction()?;
        let wi = require_work_instruction(&tx, id)?;
        if !wi.is_latest {
            return Err(StoreError::NotLatest(id));
        }

        mark_other_versions_inactive(&tx, id)?;
        tx.execute(
            "UPDATE work_instructions SET is_active = 1 WHERE id = ?1",
            params![id],
        )?;
        let wi = require_work_instruction(&tx, id)?;
        tx.commit()?;

        let chain = wi.chain_id();
        tracing::info!(%chain, %id, "activated work instruction");
        self.publish(LogEvent::WorkInstructionActivated { chain, version: id });
        Ok(wi)
    }

    pub fn deactivate_work_instruction(&mut self, id: WorkInstructionId) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        let wi = require_work_instruction(&tx, id)?;
        tx.execute(
            "UPDATE work_instructions SET is_active = 0 WHERE id = ?1",
            params![id],
        )?;
        tx.commit()?;

        let chain = wi.chain_id();
        tracing::info!(%chain, %id, "deactivated work instruction");
        self.publish(LogEvent::WorkInstructionDeactivated { chain, version: id });
        Ok(())
    }

    /// Editable iff no production log references this version
    ///
    /// Lookup failures report "not editable".
    pub fn is_editable(&self, id: WorkInstructionId) -> bool {
        logged(
            "is_editable",
            chain_of(&self.conn, id)
                .and_then(|_| production_log_count(&self.conn, id))
                .map(|count| count == 0),
        )
    }

    /// Replace the content of an editable version in place
    pub fn update_work_instruction(
        &mut self,
        id: WorkInstructionId,
        new: &NewWorkInstruction,
    ) -> Result<WorkInstruction, StoreError> {
        let tx = self.conn.transaction()?;
        let current = require_work_instruction(&tx, id)?;
        if production_log_count(&tx, id)? > 0 {
            return Err(StoreError::NotEditable(id));
        }
        if new.title.trim().is_empty() {
            return Err(StoreError::Invalid("work instruction title must not be empty".into()));
        }
        if let Some(part) = new.part_produced_id {
            require_part_definition(&tx, part)?;
        }

        let version = if new.version.trim().is_empty() {
            current.version.clone()
        } else {
            new.version.trim().to_string()
        };

        tx.execute(
            "UPDATE work_instructions
             SET title = ?2, version = ?3, should_generate_qr_code = ?4,
                 part_produced_is_serialized = ?5, part_produced_id = ?6
             WHERE id = ?1",
            params![
                id,
                new.title.trim(),
                version,
                new.should_generate_qr_code,
                new.part_produced_is_serialized,
                new.part_produced_id
            ],
        )?;
        tx.execute(
            "DELETE FROM work_instruction_nodes WHERE work_instruction_id = ?1",
            params![id],
        )?;
        insert_nodes(&tx, id, &new.nodes)?;
        replace_products(&tx, id, &new.products)?;

        let wi = require_work_instruction(&tx, id)?;
        tx.commit()?;
        tracing::info!(%id, "updated work instruction");
        Ok(wi)
    }

    /// Update in place when editable, otherwise create a new version
    ///
    /// A new version keeps the supplied label unless it equals the label of
    /// the latest version, in which case the next label is derived.
    pub fn save_or_version(
        &mut self,
        id: WorkInstructionId,
        new: &NewWorkInstruction,
    ) -> Result<WorkInstruction, StoreError> {
        if self.is_editable(id) {
            return self.update_work_instruction(id, new);
        }

        let latest = self
            .latest_in_chain(id)
            .ok_or_else(|| StoreError::not_found("work instruction", id))?;
        let mut next = new.clone();
        if next.version.trim().is_empty() || next.version.trim() == latest.version {
            next.version = next_version_label(&latest.version);
        }
        self.create_new_version(id, &next)
    }

    /// Delete an editable version
    ///
    /// A chain head with later versions cannot be deleted. Deleting the
    /// latest version promotes the newest remaining member.
    pub fn delete_work_instruction(&mut self, id: WorkInstructionId) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        let wi = require_work_instruction(&tx, id)?;
        if production_log_count(&tx, id)? > 0 {
            return Err(StoreError::NotEditable(id));
        }

        let dependents: i64 = tx.query_row(
            "SELECT COUNT(*) FROM work_instructions WHERE original_id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        if dependents > 0 {
            return Err(StoreError::InUse {
                kind: "work instruction",
                id: id.to_string(),
                count: dependents,
                referenced_by: "later versions",
            });
        }

        tx.execute("DELETE FROM work_instructions WHERE id = ?1", params![id])?;

        if wi.is_latest {
            tx.execute(
                "UPDATE work_instructions SET is_latest = 1
                 WHERE id = (SELECT MAX(id) FROM work_instructions WHERE chain_id = ?1)",
                params![wi.chain_id()],
            )?;
        }

        tx.commit()?;
        tracing::info!(%id, "deleted work instruction");
        Ok(())
    }

    /// Rewrite node positions as a dense `0..n` sequence
    ///
    /// Returns the number of nodes whose position changed.
    pub fn normalize_positions(&mut self, id: WorkInstructionId) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        let current: Vec<(NodeId, i64)> = {
            let mut stmt = tx.prepare(
                "SELECT id, position FROM work_instruction_nodes \
                 WHERE work_instruction_id = ?1 ORDER BY position, id",
            )?;
            let rows = stmt.query_map(params![id], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let mut changed = 0;
        for (index, (node, position)) in current.iter().enumerate() {
            if *position != index as i64 {
                tx.execute(
                    "UPDATE work_instruction_nodes SET position = ?2 WHERE id = ?1",
                    params![node, index as i64],
                )?;
                changed += 1;
            }
        }
        tx.commit()?;

        if changed > 0 {
            tracing::info!(%id, changed, "normalized node positions");
        }
        Ok(changed)
    }

    pub fn get_work_instruction(&self, id: WorkInstructionId) -> Option<WorkInstruction> {
        logged(
            "get_work_instruction",
            fetch_work_instruction(&self.conn, id),
        )
    }

    pub fn list_work_instructions(&self, filter: &WorkInstructionFilter) -> Vec<WorkInstruction> {
        logged(
            "list_work_instructions",
            self.query_work_instructions(filter),
        )
    }

    fn query_work_instructions(
        &self,
        filter: &WorkInstructionFilter,
    ) -> Result<Vec<WorkInstruction>, StoreError> {
        let chain = match filter.chain {
            Some(member) => Some(chain_of(&self.conn, member)?),
            None => None,
        };
        let search = filter
            .search
            .as_deref()
            .map(|s| format!("%{}%", s.trim()));

        let sql = format!(
            "SELECT {} FROM work_instructions
             WHERE (?1 = 0 OR is_latest = 1)
               AND (?2 = 0 OR is_active = 1)
               AND (?3 IS NULL OR chain_id = ?3)
               AND (?4 IS NULL OR id IN (
                    SELECT work_instruction_id FROM work_instruction_products WHERE product_id = ?4))
               AND (?5 IS NULL OR title LIKE ?5)
             ORDER BY chain_id, id",
            WI_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt
            .query_map(
                params![
                    filter.latest_only,
                    filter.active_only,
                    chain,
                    filter.product,
                    search
                ],
                work_instruction_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        for wi in &mut rows {
            wi.nodes = fetch_nodes(&self.conn, wi.id)?;
            wi.products = fetch_linked_products(&self.conn, wi.id)?;
        }
        Ok(rows)
    }

    /// Every version of the chain containing `id`, oldest first
    pub fn chain_versions(&self, id: WorkInstructionId) -> Vec<WorkInstruction> {
        self.list_work_instructions(&WorkInstructionFilter {
            chain: Some(id),
            ..Default::default()
        })
    }

    pub fn latest_in_chain(&self, id: WorkInstructionId) -> Option<WorkInstruction> {
        self.list_work_instructions(&WorkInstructionFilter {
            chain: Some(id),
            latest_only: true,
            ..Default::default()
        })
        .into_iter()
        .next()
    }

    pub fn active_in_chain(&self, id: WorkInstructionId) -> Option<WorkInstruction> {
        self.list_work_instructions(&WorkInstructionFilter {
            chain: Some(id),
            active_only: true,
            ..Default::default()
        })
        .into_iter()
        .next()
    }

    /// Latest versions linked to a product
    pub fn work_instructions_for_product(&self, product: ProductId) -> Vec<WorkInstruction> {
        self.list_work_instructions(&WorkInstructionFilter {
            product: Some(product),
            latest_only: true,
            ..Default::default()
        })
    }

    /// Number of production logs that reference a version
    pub fn production_log_count(&self, id: WorkInstructionId) -> i64 {
        logged("production_log_count", production_log_count(&self.conn, id))
    }
}
