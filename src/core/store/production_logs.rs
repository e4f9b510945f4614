//! Production logs, log steps and attempts
//!
//! Attempts are appended, never rewritten, with one exception kept from the
//! shop-floor behaviour: unselecting a step clears the submit time of its
//! newest attempt while the recorded success stays as it was.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use super::parts::{find_or_create_serializable_part, insert_serializable_part};
use super::products::require_product;
use super::traceability::{insert_ledger_row, produced_part_of};
use super::work_instructions::require_work_instruction;
use super::{format_datetime, logged, parse_datetime, Store, StoreError};
use crate::core::events::LogEvent;
use crate::core::identity::{
    NodeId, ProductId, ProductionLogId, ProductionLogStepId, WorkInstructionId,
};
use crate::entities::part::{normalize_serial, SerializablePart};
use crate::entities::production_log::{
    DraftAttempt, DraftPart, DraftStep, LogState, NewProductionLog, ProductionLog,
    ProductionLogDraft, ProductionLogStep, ProductionLogStepAttempt, SubmissionCheck,
};
use crate::entities::traceability::PartOperation;
use crate::entities::work_instruction::{PartNode, WorkInstruction};

fn fetch_attempts(
    conn: &Connection,
    step: ProductionLogStepId,
) -> Result<Vec<ProductionLogStepAttempt>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, success, notes, submit_time FROM production_log_step_attempts \
         WHERE production_log_step_id = ?1 ORDER BY id",
    )?;
    let attempts = stmt
        .query_map(params![step], |row| {
            let submit_time: Option<String> = row.get(3)?;
            Ok(ProductionLogStepAttempt {
                id: Some(row.get(0)?),
                success: row.get(1)?,
                notes: row.get(2)?,
                submit_time: submit_time.as_deref().map(parse_datetime),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(attempts)
}

fn fetch_log_steps(
    conn: &Connection,
    log: ProductionLogId,
) -> Result<Vec<ProductionLogStep>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT pls.id, pls.work_instruction_step_id
         FROM production_log_steps pls
         JOIN work_instruction_nodes n ON n.id = pls.work_instruction_step_id
         WHERE pls.production_log_id = ?1
         ORDER BY n.position, pls.id",
    )?;
    let mut steps = stmt
        .query_map(params![log], |row| {
            Ok(ProductionLogStep {
                id: row.get(0)?,
                work_instruction_step_id: row.get(1)?,
                attempts: Vec::new(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for step in &mut steps {
        step.attempts = fetch_attempts(conn, step.id)?;
    }
    Ok(steps)
}

pub(super) fn fetch_production_log(
    conn: &Connection,
    id: ProductionLogId,
) -> Result<Option<ProductionLog>, StoreError> {
    let log = conn
        .query_row(
            "SELECT id, product_id, work_instruction_id, operator_id, from_batch_of, \
                    created_on, last_modified_on \
             FROM production_logs WHERE id = ?1",
            params![id],
            |row| {
                Ok(ProductionLog {
                    id: row.get(0)?,
                    product_id: row.get(1)?,
                    work_instruction_id: row.get(2)?,
                    operator_id: row.get(3)?,
                    from_batch_of: row.get(4)?,
                    log_steps: Vec::new(),
                    created_on: parse_datetime(&row.get::<_, String>(5)?),
                    last_modified_on: parse_datetime(&row.get::<_, String>(6)?),
                })
            },
        )
        .optional()?;

    match log {
        Some(mut log) => {
            log.log_steps = fetch_log_steps(conn, id)?;
            Ok(Some(log))
        }
        None => Ok(None),
    }
}

pub(super) fn require_production_log(
    conn: &Connection,
    id: ProductionLogId,
) -> Result<ProductionLog, StoreError> {
    fetch_production_log(conn, id)?.ok_or_else(|| StoreError::not_found("production log", id))
}

/// Log owning a log step
fn log_of_step(
    conn: &Connection,
    step: ProductionLogStepId,
) -> Result<ProductionLogId, StoreError> {
    conn.query_row(
        "SELECT production_log_id FROM production_log_steps WHERE id = ?1",
        params![step],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("production log step", step))
}

fn touch(conn: &Connection, log: ProductionLogId) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE production_logs SET last_modified_on = ?2 WHERE id = ?1",
        params![log, format_datetime(&Utc::now())],
    )?;
    Ok(())
}

fn step_node_ids(wi: &WorkInstruction) -> Vec<NodeId> {
    wi.steps().map(|(node, _)| node.id).collect()
}

/// Create one log step per step node
fn insert_log_steps(
    conn: &Connection,
    log: ProductionLogId,
    wi: &WorkInstruction,
) -> Result<(), StoreError> {
    for node in step_node_ids(wi) {
        conn.execute(
            "INSERT INTO production_log_steps (production_log_id, work_instruction_step_id) \
             VALUES (?1, ?2)",
            params![log, node],
        )?;
    }
    Ok(())
}

/// Insert the log header and its steps
/// Header rules shared by creation and save
fn validate_header(operator: &str, from_batch_of: u32) -> Result<(), StoreError> {
    if operator.trim().is_empty() {
        return Err(StoreError::Invalid("operator must not be empty".into()));
    }
    if from_batch_of == 0 {
        return Err(StoreError::Invalid("batch size must be at least 1".into()));
    }
    Ok(())
}

fn insert_log(
    conn: &Connection,
    product: ProductId,
    wi: &WorkInstruction,
    operator: &str,
    from_batch_of: u32,
) -> Result<ProductionLogId, StoreError> {
    let product = require_product(conn, product)?;
    if !product.is_active {
        return Err(StoreError::Invalid(format!(
            "product {} is inactive",
            product.id
        )));
    }
    validate_header(operator, from_batch_of)?;

    let now = format_datetime(&Utc::now());
    conn.execute(
        "INSERT INTO production_logs \
            (product_id, work_instruction_id, operator_id, from_batch_of, created_on, last_modified_on) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![product.id, wi.id, operator.trim(), from_batch_of, now],
    )?;
    let id = ProductionLogId(conn.last_insert_rowid());
    insert_log_steps(conn, id, wi)?;
    Ok(id)
}

fn insert_attempt(
    conn: &Connection,
    step: ProductionLogStepId,
    attempt: &ProductionLogStepAttempt,
) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO production_log_step_attempts \
            (production_log_step_id, success, notes, submit_time) \
         VALUES (?1, ?2, ?3, ?4)",
        params![
            step,
            attempt.success,
            attempt.notes,
            attempt.submit_time.as_ref().map(format_datetime)
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Attempt as stored from a draft: a selected answer without a time is
/// stamped now, an unselected one stays unset.
fn attempt_from_draft(draft: &DraftAttempt) -> ProductionLogStepAttempt {
    let submit_time = draft
        .submit_time
        .or_else(|| draft.success.map(|_| Utc::now()));
    ProductionLogStepAttempt {
        id: None,
        success: draft.success,
        notes: draft.notes.clone(),
        submit_time,
    }
}

/// Resolve the part a draft entry refers to
fn resolve_draft_part(
    conn: &Connection,
    node: &PartNode,
    entry: &DraftPart,
) -> Result<SerializablePart, StoreError> {
    if let Some(source) = entry.source_log {
        let part = produced_part_of(conn, source)?.ok_or_else(|| {
            StoreError::Invalid(format!("production log {} did not produce a part", source))
        })?;
        if part.part_definition_id != node.part_definition_id {
            return Err(StoreError::Invalid(format!(
                "production log {} produced {} but node {} requires {}",
                source, part.part_definition_id, entry.node_id, node.part_definition_id
            )));
        }
        return Ok(part);
    }

    let serial = normalize_serial(entry.serial_number.as_deref()).ok_or_else(|| {
        StoreError::Invalid(format!(
            "part entry for node {} has neither a serial nor a source log",
            entry.node_id
        ))
    })?;
    find_or_create_serializable_part(conn, node.part_definition_id, Some(serial.as_str()))
}

impl Store {
    /// Start an empty log with one step per step node
    pub fn create_production_log(
        &mut self,
        new: &NewProductionLog,
    ) -> Result<ProductionLog, StoreError> {
        let tx = self.conn.transaction()?;
        let wi = require_work_instruction(&tx, new.work_instruction_id)?;
        let id = insert_log(
            &tx,
            new.product_id,
            &wi,
            &new.operator_id,
            new.from_batch_of,
        )?;
        let log = require_production_log(&tx, id)?;
        tx.commit()?;

        tracing::info!(%id, work_instruction = %wi.id, operator = %log.operator_id, "created production log");
        self.publish(LogEvent::LogCreated { log: id });
        Ok(log)
    }

    pub fn get_production_log(&self, id: ProductionLogId) -> Option<ProductionLog> {
        logged("get_production_log", fetch_production_log(&self.conn, id))
    }

    /// Logs, newest first, optionally filtered
    pub fn list_production_logs(
        &self,
        work_instruction: Option<WorkInstructionId>,
        product: Option<ProductId>,
    ) -> Vec<ProductionLog> {
        logged(
            "list_production_logs",
            self.query_production_logs(work_instruction, product),
        )
    }

    fn query_production_logs(
        &self,
        work_instruction: Option<WorkInstructionId>,
        product: Option<ProductId>,
    ) -> Result<Vec<ProductionLog>, StoreError> {
        let ids: Vec<ProductionLogId> = {
            let mut stmt = self.conn.prepare(
                "SELECT id FROM production_logs \
                 WHERE (?1 IS NULL OR work_instruction_id = ?1) \
                   AND (?2 IS NULL OR product_id = ?2) \
                 ORDER BY created_on DESC, id DESC",
            )?;
            let rows = stmt.query_map(params![work_instruction, product], |row| row.get(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let mut logs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(log) = fetch_production_log(&self.conn, id)? {
                logs.push(log);
            }
        }
        Ok(logs)
    }

    /// Persist an edited log, last writer wins
    ///
    /// Header fields are overwritten and attempts without an id are
    /// appended. Product and work instruction may only change while no
    /// attempt has been recorded.
    pub fn save_production_log(
        &mut self,
        log: &ProductionLog,
    ) -> Result<ProductionLog, StoreError> {
        validate_header(&log.operator_id, log.from_batch_of)?;
        let tx = self.conn.transaction()?;
        let stored = require_production_log(&tx, log.id)?;

        let identity_changed = stored.product_id != log.product_id
            || stored.work_instruction_id != log.work_instruction_id;
        if identity_changed {
            let attempted = stored.log_steps.iter().any(|s| !s.attempts.is_empty());
            if attempted {
                return Err(StoreError::Invalid(format!(
                    "production log {} already has attempts; product and work instruction are fixed",
                    log.id
                )));
            }
            require_product(&tx, log.product_id)?;
            let wi = require_work_instruction(&tx, log.work_instruction_id)?;
            tx.execute(
                "DELETE FROM production_log_steps WHERE production_log_id = ?1",
                params![log.id],
            )?;
            insert_log_steps(&tx, log.id, &wi)?;
        }

        tx.execute(
            "UPDATE production_logs
             SET product_id = ?2, work_instruction_id = ?3, operator_id = ?4,
                 from_batch_of = ?5, last_modified_on = ?6
             WHERE id = ?1",
            params![
                log.id,
                log.product_id,
                log.work_instruction_id,
                log.operator_id.trim(),
                log.from_batch_of,
                format_datetime(&Utc::now())
            ],
        )?;

        if !identity_changed {
            for step in &log.log_steps {
                let known = stored.log_steps.iter().any(|s| s.id == step.id);
                if !known {
                    return Err(StoreError::Invalid(format!(
                        "step {} does not belong to production log {}",
                        step.id, log.id
                    )));
                }
                for attempt in step.attempts.iter().filter(|a| a.id.is_none()) {
                    insert_attempt(&tx, step.id, attempt)?;
                }
            }
        }

        let saved = require_production_log(&tx, log.id)?;
        tx.commit()?;

        tracing::debug!(id = %log.id, "saved production log");
        self.publish(LogEvent::LogSaved { log: log.id });
        Ok(saved)
    }

    /// Append an attempt stamped with the current time
    pub fn record_attempt(
        &mut self,
        step: ProductionLogStepId,
        success: Option<bool>,
        notes: &str,
    ) -> Result<ProductionLogStepAttempt, StoreError> {
        let tx = self.conn.transaction()?;
        let log = log_of_step(&tx, step)?;
        let mut attempt = ProductionLogStepAttempt::now(success, notes);
        attempt.id = Some(insert_attempt(&tx, step, &attempt)?);
        touch(&tx, log)?;
        tx.commit()?;

        tracing::debug!(%log, %step, ?success, "recorded attempt");
        self.publish(LogEvent::AttemptRecorded { log, step, success });
        Ok(attempt)
    }

    /// Undo the newest attempt's submission
    ///
    /// The submit time is reset to unset and `success` keeps its value.
    pub fn unselect_step(
        &mut self,
        step: ProductionLogStepId,
    ) -> Result<ProductionLogStepAttempt, StoreError> {
        let tx = self.conn.transaction()?;
        let log = log_of_step(&tx, step)?;
        let latest = fetch_attempts(&tx, step)?
            .pop()
            .ok_or_else(|| StoreError::not_found("attempt for step", step))?;
        let attempt_id = latest.id.unwrap_or_default();

        tx.execute(
            "UPDATE production_log_step_attempts SET submit_time = NULL WHERE id = ?1",
            params![attempt_id],
        )?;
        touch(&tx, log)?;
        tx.commit()?;

        tracing::debug!(%log, %step, attempt = attempt_id, "unselected step");
        self.publish(LogEvent::StepUnselected { log, step });
        Ok(ProductionLogStepAttempt {
            submit_time: None,
            ..latest
        })
    }

    /// Progress of a log against its instruction
    pub fn log_state(&self, id: ProductionLogId) -> Option<LogState> {
        let log = self.get_production_log(id)?;
        let wi = self.get_work_instruction(log.work_instruction_id)?;
        Some(log.state(&step_node_ids(&wi)))
    }

    /// Every step node has an attempt with a submit time
    pub fn is_complete(&self, id: ProductionLogId) -> bool {
        self.log_state(id) == Some(LogState::Completed)
    }

    /// Compare distinct logged parts against what the part nodes require
    pub fn check_submission(
        &self,
        draft: &ProductionLogDraft,
    ) -> Result<SubmissionCheck, StoreError> {
        let wi = require_work_instruction(&self.conn, draft.work_instruction_id)?;
        Ok(SubmissionCheck::evaluate(
            draft.logged_part_count(),
            wi.required_part_count() as usize,
        ))
    }

    /// Record a complete run in one transaction
    ///
    /// A part shortfall fails with [`StoreError::ConfirmationRequired`]
    /// unless `confirmed` is set.
    pub fn submit_production_log(
        &mut self,
        draft: &ProductionLogDraft,
        confirmed: bool,
    ) -> Result<ProductionLog, StoreError> {
        let tx = self.conn.transaction()?;
        let wi = require_work_instruction(&tx, draft.work_instruction_id)?;

        let check = SubmissionCheck::evaluate(
            draft.logged_part_count(),
            wi.required_part_count() as usize,
        );
        if let SubmissionCheck::Shortfall { logged, required } = check {
            if !confirmed {
                return Err(StoreError::ConfirmationRequired { logged, required });
            }
            tracing::warn!(logged, required, "submitting production log with missing parts");
        }

        let id = insert_log(
            &tx,
            draft.product_id,
            &wi,
            &draft.operator_id,
            draft.from_batch_of,
        )?;
        let log = require_production_log(&tx, id)?;

        for draft_step in &draft.steps {
            let step = log.step_for_node(draft_step.node_id).ok_or_else(|| {
                StoreError::Invalid(format!(
                    "node {} is not a step of work instruction {}",
                    draft_step.node_id, wi.id
                ))
            })?;
            for attempt in &draft_step.attempts {
                insert_attempt(&tx, step.id, &attempt_from_draft(attempt))?;
            }
        }

        let mut recorded = Vec::new();
        for entry in &draft.parts {
            let node = wi
                .part_nodes()
                .find(|(n, _)| n.id == entry.node_id)
                .map(|(_, part)| part)
                .ok_or_else(|| {
                    StoreError::Invalid(format!(
                        "node {} is not a part node of work instruction {}",
                        entry.node_id, wi.id
                    ))
                })?;
            // Blank entries are what the shortfall gate counted as missing
            if entry.is_blank() {
                continue;
            }
            let part = resolve_draft_part(&tx, node, entry)?;
            if insert_ledger_row(&tx, id, part.id, PartOperation::Installed)? {
                recorded.push((part.id, PartOperation::Installed));
            } else {
                tracing::warn!(part = %part.id, "part entered twice in one log");
            }
        }

        match wi.part_produced_id {
            Some(definition) => {
                let serial = normalize_serial(draft.produced_serial.as_deref());
                if wi.part_produced_is_serialized && serial.is_none() {
                    let part = super::parts::require_part_definition(&tx, definition)?;
                    return Err(StoreError::MissingSerial {
                        part: part.to_string(),
                    });
                }
                let produced = insert_serializable_part(&tx, definition, serial.as_deref())?;
                insert_ledger_row(&tx, id, produced.id, PartOperation::Produced)?;
                recorded.push((produced.id, PartOperation::Produced));
            }
            None => {
                if draft.produced_serial.is_some() {
                    tracing::warn!(work_instruction = %wi.id, "ignoring produced serial, instruction produces no part");
                }
            }
        }

        let log = require_production_log(&tx, id)?;
        tx.commit()?;

        tracing::info!(%id, work_instruction = %wi.id, parts = recorded.len(), "submitted production log");
        for (part, operation) in recorded {
            self.publish(LogEvent::PartRecorded {
                log: id,
                part,
                operation,
            });
        }
        self.publish(LogEvent::LogSubmitted {
            log: id,
            confirmed_shortfall: check.needs_confirmation(),
        });
        Ok(log)
    }

    /// Delete a log with its steps, attempts and ledger rows
    pub fn delete_production_log(&mut self, id: ProductionLogId) -> Result<(), StoreError> {
        let changed = self
            .conn
            .execute("DELETE FROM production_logs WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(StoreError::not_found("production log", id));
        }
        tracing::info!(%id, "deleted production log");
        self.publish(LogEvent::LogDeleted { log: id });
        Ok(())
    }

    /// Empty draft for an instruction: one step per step node and one part
    /// entry per required part
    pub fn draft_for(
        &self,
        work_instruction: WorkInstructionId,
        product: ProductId,
        operator: &str,
    ) -> Result<ProductionLogDraft, StoreError> {
        let wi = require_work_instruction(&self.conn, work_instruction)?;
        let steps = wi
            .steps()
            .map(|(node, step)| DraftStep {
                node_id: node.id,
                name: Some(step.name.clone()),
                attempts: Vec::new(),
            })
            .collect();
        let parts = wi
            .part_nodes()
            .flat_map(|(node, part)| {
                (0..part.quantity).map(move |_| DraftPart {
                    node_id: node.id,
                    serial_number: None,
                    source_log: None,
                })
            })
            .collect();

        Ok(ProductionLogDraft {
            product_id: product,
            work_instruction_id: wi.id,
            operator_id: operator.to_string(),
            from_batch_of: 1,
            steps,
            parts,
            produced_serial: None,
        })
    }
}
