//! Reporting views, statistics and raw read-only queries

use std::collections::BTreeMap;
use std::fs;

use rusqlite::params;
use rusqlite::types::Value;
use serde::Serialize;

use super::{logged, Store, StoreError};
use crate::core::identity::{NodeId, ProductionLogId, ProductionLogStepId, WorkInstructionId};

/// One row of `production_view`
#[derive(Debug, Clone, Serialize)]
pub struct ProductionRow {
    pub production_log_id: ProductionLogId,
    pub created_on: String,
    pub last_modified_on: String,
    pub operator_id: String,
    pub from_batch_of: u32,
    pub product_number: String,
    pub product_name: String,
    pub work_instruction_id: WorkInstructionId,
    pub work_instruction_title: String,
    pub work_instruction_version: String,
    pub produced_serial: Option<String>,
}

/// One row of `traceability_view`
#[derive(Debug, Clone, Serialize)]
pub struct TraceabilityRow {
    pub production_log_id: ProductionLogId,
    pub operation_type: String,
    pub serial_number: Option<String>,
    pub part_number: String,
    pub part_name: String,
    pub product_number: String,
    pub logged_on: String,
}

/// One row of `fpy_attempts_view`
#[derive(Debug, Clone, Serialize)]
pub struct FpyRow {
    pub production_log_id: ProductionLogId,
    pub production_log_step_id: ProductionLogStepId,
    pub work_instruction_step_id: NodeId,
    pub step_name: String,
    pub work_instruction_id: WorkInstructionId,
    pub attempt_count: i64,
    pub first_attempt_success: Option<bool>,
    pub ever_succeeded: bool,
}

/// First-pass yield of one step across logs
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepYield {
    pub work_instruction_step_id: NodeId,
    pub step_name: String,
    /// Log steps with at least one attempt
    pub attempted: usize,
    pub first_pass: usize,
    pub eventually_passed: usize,
}

impl StepYield {
    /// Fraction passing on the first attempt, `None` when never attempted
    pub fn first_pass_yield(&self) -> Option<f64> {
        (self.attempted > 0).then(|| self.first_pass as f64 / self.attempted as f64)
    }
}

/// Aggregate FPY rows per step, in first-seen order
pub fn summarize_yield(rows: &[FpyRow]) -> Vec<StepYield> {
    let mut out: Vec<StepYield> = Vec::new();
    for row in rows {
        let idx = match out
            .iter()
            .position(|s| s.work_instruction_step_id == row.work_instruction_step_id)
        {
            Some(idx) => idx,
            None => {
                out.push(StepYield {
                    work_instruction_step_id: row.work_instruction_step_id,
                    step_name: row.step_name.clone(),
                    attempted: 0,
                    first_pass: 0,
                    eventually_passed: 0,
                });
                out.len() - 1
            }
        };
        if row.attempt_count == 0 {
            continue;
        }
        let entry = &mut out[idx];
        entry.attempted += 1;
        if row.first_attempt_success == Some(true) {
            entry.first_pass += 1;
        }
        if row.ever_succeeded {
            entry.eventually_passed += 1;
        }
    }
    out
}

/// Database statistics
#[derive(Debug, Default, Serialize)]
pub struct StoreStats {
    pub part_definitions: usize,
    pub serializable_parts: usize,
    pub products: usize,
    pub work_instructions: usize,
    pub work_instruction_chains: usize,
    pub production_logs: usize,
    pub ledger_rows: BTreeMap<String, usize>,
    pub db_size_bytes: u64,
}

impl Store {
    /// `production_view`, newest first
    pub fn production_report(&self, work_instruction: Option<WorkInstructionId>) -> Vec<ProductionRow> {
        logged("production_report", self.query_production(work_instruction))
    }

    fn query_production(
        &self,
        work_instruction: Option<WorkInstructionId>,
    ) -> Result<Vec<ProductionRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT production_log_id, created_on, last_modified_on, operator_id, from_batch_of,
                    product_number, product_name, work_instruction_id, work_instruction_title,
                    work_instruction_version, produced_serial
             FROM production_view
             WHERE ?1 IS NULL OR work_instruction_id = ?1
             ORDER BY created_on DESC, production_log_id DESC",
        )?;
        let rows = stmt
            .query_map(params![work_instruction], |row| {
                Ok(ProductionRow {
                    production_log_id: row.get(0)?,
                    created_on: row.get(1)?,
                    last_modified_on: row.get(2)?,
                    operator_id: row.get(3)?,
                    from_batch_of: row.get(4)?,
                    product_number: row.get(5)?,
                    product_name: row.get(6)?,
                    work_instruction_id: row.get(7)?,
                    work_instruction_title: row.get(8)?,
                    work_instruction_version: row.get(9)?,
                    produced_serial: row.get(10)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// `traceability_view`, optionally narrowed to a serial or a log
    pub fn traceability_report(
        &self,
        serial: Option<&str>,
        log: Option<ProductionLogId>,
    ) -> Vec<TraceabilityRow> {
        logged("traceability_report", self.query_traceability(serial, log))
    }

    fn query_traceability(
        &self,
        serial: Option<&str>,
        log: Option<ProductionLogId>,
    ) -> Result<Vec<TraceabilityRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT production_log_id, operation_type, serial_number, part_number, part_name,
                    product_number, logged_on
             FROM traceability_view
             WHERE (?1 IS NULL OR serial_number = ?1)
               AND (?2 IS NULL OR production_log_id = ?2)
             ORDER BY logged_on, production_log_id, operation_type",
        )?;
        let rows = stmt
            .query_map(params![serial.map(str::trim), log], |row| {
                Ok(TraceabilityRow {
                    production_log_id: row.get(0)?,
                    operation_type: row.get(1)?,
                    serial_number: row.get(2)?,
                    part_number: row.get(3)?,
                    part_name: row.get(4)?,
                    product_number: row.get(5)?,
                    logged_on: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// `fpy_attempts_view` in log and step order
    pub fn fpy_report(&self, work_instruction: Option<WorkInstructionId>) -> Vec<FpyRow> {
        logged("fpy_report", self.query_fpy(work_instruction))
    }

    fn query_fpy(&self, work_instruction: Option<WorkInstructionId>) -> Result<Vec<FpyRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT f.production_log_id, f.production_log_step_id, f.work_instruction_step_id,
                    f.step_name, f.work_instruction_id, f.attempt_count,
                    f.first_attempt_success, f.ever_succeeded
             FROM fpy_attempts_view f
             JOIN work_instruction_nodes n ON n.id = f.work_instruction_step_id
             WHERE ?1 IS NULL OR f.work_instruction_id = ?1
             ORDER BY f.production_log_id, n.position",
        )?;
        let rows = stmt
            .query_map(params![work_instruction], |row| {
                Ok(FpyRow {
                    production_log_id: row.get(0)?,
                    production_log_step_id: row.get(1)?,
                    work_instruction_step_id: row.get(2)?,
                    step_name: row.get(3)?,
                    work_instruction_id: row.get(4)?,
                    attempt_count: row.get(5)?,
                    first_attempt_success: row.get(6)?,
                    ever_succeeded: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Row counts per table and database size
    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let count = |sql: &str| -> Result<usize, StoreError> {
            Ok(self.conn.query_row(sql, [], |row| row.get::<_, i64>(0))? as usize)
        };

        let mut ledger_rows = BTreeMap::new();
        {
            let mut stmt = self.conn.prepare(
                "SELECT operation_type, COUNT(*) FROM production_log_parts GROUP BY operation_type",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (operation, n) = row?;
                ledger_rows.insert(operation, n as usize);
            }
        }

        let db_size_bytes = self
            .path
            .as_ref()
            .and_then(|p| fs::metadata(p).ok())
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(StoreStats {
            part_definitions: count("SELECT COUNT(*) FROM part_definitions")?,
            serializable_parts: count("SELECT COUNT(*) FROM serializable_parts")?,
            products: count("SELECT COUNT(*) FROM products")?,
            work_instructions: count("SELECT COUNT(*) FROM work_instructions")?,
            work_instruction_chains: count(
                "SELECT COUNT(DISTINCT chain_id) FROM work_instructions",
            )?,
            production_logs: count("SELECT COUNT(*) FROM production_logs")?,
            ledger_rows,
            db_size_bytes,
        })
    }

    /// Execute a read-only SQL statement
    pub fn query_raw(&self, sql: &str) -> Result<Vec<Vec<String>>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        if !stmt.readonly() {
            return Err(StoreError::ReadOnlyQuery);
        }
        let column_count = stmt.column_count();

        let rows = stmt
            .query_map([], |row| {
                let mut values = Vec::with_capacity(column_count);
                for i in 0..column_count {
                    let value = match row.get::<_, Value>(i)? {
                        Value::Null => "NULL".to_string(),
                        Value::Integer(i) => i.to_string(),
                        Value::Real(f) => f.to_string(),
                        Value::Text(s) => s,
                        Value::Blob(_) => "<blob>".to_string(),
                    };
                    values.push(value);
                }
                Ok(values)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Column names of a read-only statement
    pub fn query_columns(&self, sql: &str) -> Result<Vec<String>, StoreError> {
        let stmt = self.conn.prepare(sql)?;
        if !stmt.readonly() {
            return Err(StoreError::ReadOnlyQuery);
        }
        Ok(stmt.column_names().iter().map(|s| s.to_string()).collect())
    }
}
