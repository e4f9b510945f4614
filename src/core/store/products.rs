//! Products and their work instruction associations

use rusqlite::{params, Connection, OptionalExtension};

use super::parts::require_part_definition;
use super::{logged, Store, StoreError};
use crate::core::identity::{PartDefinitionId, ProductId, WorkInstructionId};
use crate::entities::part::PartDefinition;
use crate::entities::product::Product;

fn product_work_instructions(
    conn: &Connection,
    id: ProductId,
) -> Result<Vec<WorkInstructionId>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT work_instruction_id FROM work_instruction_products \
         WHERE product_id = ?1 ORDER BY work_instruction_id",
    )?;
    let ids = stmt
        .query_map(params![id], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

pub(super) fn fetch_product(
    conn: &Connection,
    id: ProductId,
) -> Result<Option<Product>, StoreError> {
    let product = conn
        .query_row(
            "SELECT p.id, p.part_definition_id, p.is_active, pd.number, pd.name \
             FROM products p JOIN part_definitions pd ON pd.id = p.part_definition_id \
             WHERE p.id = ?1",
            params![id],
            |row| {
                let part_definition_id: PartDefinitionId = row.get(1)?;
                Ok(Product {
                    id: row.get(0)?,
                    part_definition_id,
                    part_definition: Some(PartDefinition {
                        id: part_definition_id,
                        number: row.get(3)?,
                        name: row.get(4)?,
                    }),
                    is_active: row.get(2)?,
                    work_instructions: Vec::new(),
                })
            },
        )
        .optional()?;

    match product {
        Some(mut product) => {
            product.work_instructions = product_work_instructions(conn, id)?;
            Ok(Some(product))
        }
        None => Ok(None),
    }
}

pub(super) fn require_product(conn: &Connection, id: ProductId) -> Result<Product, StoreError> {
    fetch_product(conn, id)?.ok_or_else(|| StoreError::not_found("product", id))
}

impl Store {
    /// Create an active product for a part definition
    pub fn create_product(
        &mut self,
        part_definition_id: PartDefinitionId,
    ) -> Result<Product, StoreError> {
        let tx = self.conn.transaction()?;
        require_part_definition(&tx, part_definition_id)?;
        tx.execute(
            "INSERT INTO products (part_definition_id, is_active) VALUES (?1, 1)",
            params![part_definition_id],
        )?;
        let id = ProductId(tx.last_insert_rowid());
        let product = require_product(&tx, id)?;
        tx.commit()?;
        tracing::info!(%id, product = %product.label(), "created product");
        Ok(product)
    }

    pub fn get_product(&self, id: ProductId) -> Option<Product> {
        logged("get_product", fetch_product(&self.conn, id))
    }

    pub fn list_products(&self, active_only: bool) -> Vec<Product> {
        logged("list_products", self.query_products(active_only))
    }

    fn query_products(&self, active_only: bool) -> Result<Vec<Product>, StoreError> {
        let ids: Vec<ProductId> = {
            let mut stmt = self.conn.prepare(
                "SELECT id FROM products WHERE ?1 = 0 OR is_active = 1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![active_only], |row| row.get(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let mut products = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(product) = fetch_product(&self.conn, id)? {
                products.push(product);
            }
        }
        Ok(products)
    }

    pub fn set_product_active(&mut self, id: ProductId, active: bool) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE products SET is_active = ?2 WHERE id = ?1",
            params![id, active],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("product", id));
        }
        tracing::info!(%id, active, "updated product");
        Ok(())
    }

    /// Associate a work instruction version with a product
    pub fn link_work_instruction(
        &mut self,
        product: ProductId,
        work_instruction: WorkInstructionId,
    ) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        require_product(&tx, product)?;
        super::work_instructions::require_work_instruction(&tx, work_instruction)?;
        tx.execute(
            "INSERT OR IGNORE INTO work_instruction_products (work_instruction_id, product_id) \
             VALUES (?1, ?2)",
            params![work_instruction, product],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn unlink_work_instruction(
        &mut self,
        product: ProductId,
        work_instruction: WorkInstructionId,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "DELETE FROM work_instruction_products WHERE work_instruction_id = ?1 AND product_id = ?2",
            params![work_instruction, product],
        )?;
        Ok(())
    }

    /// Delete a product that has no production logs
    pub fn delete_product(&mut self, id: ProductId) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        require_product(&tx, id)?;
        let logs: i64 = tx.query_row(
            "SELECT COUNT(*) FROM production_logs WHERE product_id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        if logs > 0 {
            return Err(StoreError::InUse {
                kind: "product",
                id: id.to_string(),
                count: logs,
                referenced_by: "production logs",
            });
        }
        tx.execute("DELETE FROM products WHERE id = ?1", params![id])?;
        tx.commit()?;
        tracing::info!(%id, "deleted product");
        Ok(())
    }
}
