use rusqlite::params;
use tempfile::tempdir;

use super::*;
use crate::core::events::drain;
use crate::core::identity::{NodeId, PartDefinitionId, ProductId, ProductionLogId};
use crate::entities::part::PartDefinition;
use crate::entities::production_log::{
    DraftAttempt, DraftPart, DraftStep, NewProductionLog, ProductionLogDraft,
    ProductionLogStepAttempt, StepState, SubmissionCheck,
};
use crate::entities::traceability::PartOperation;
use crate::entities::work_instruction::{
    NewWorkInstruction, NodeKind, PartInputType, PartNode, Step, WorkInstruction,
};

fn store() -> Store {
    Store::open_in_memory().unwrap()
}

fn step(name: &str) -> NodeKind {
    NodeKind::Step(Step {
        name: name.to_string(),
        body: format!("{} carefully", name),
        ..Default::default()
    })
}

fn part(def: &PartDefinition, quantity: u32) -> NodeKind {
    let mut node = PartNode::new(def.id);
    node.quantity = quantity;
    NodeKind::Part(node)
}

fn instruction(title: &str, nodes: Vec<NodeKind>) -> NewWorkInstruction {
    NewWorkInstruction {
        title: title.to_string(),
        version: "1".to_string(),
        nodes,
        ..Default::default()
    }
}

/// Product plus a simple two-step instruction with no parts
fn simple_setup(store: &mut Store) -> (ProductId, WorkInstruction) {
    let def = store.get_or_add_part_definition("100-001", "Housing").unwrap();
    let product = store.create_product(def.id).unwrap();
    let wi = store
        .create_work_instruction(&instruction(
            "Assemble housing",
            vec![step("Prepare"), step("Inspect")],
        ))
        .unwrap();
    (product.id, wi)
}

fn step_nodes(wi: &WorkInstruction) -> Vec<NodeId> {
    wi.steps().map(|(n, _)| n.id).collect()
}

fn part_nodes(wi: &WorkInstruction) -> Vec<NodeId> {
    wi.part_nodes().map(|(n, _)| n.id).collect()
}

fn draft(product: ProductId, wi: &WorkInstruction) -> ProductionLogDraft {
    ProductionLogDraft {
        product_id: product,
        work_instruction_id: wi.id,
        operator_id: "jdoe".to_string(),
        from_batch_of: 1,
        steps: step_nodes(wi)
            .into_iter()
            .map(|node_id| DraftStep {
                node_id,
                name: None,
                attempts: vec![DraftAttempt {
                    success: Some(true),
                    notes: String::new(),
                    submit_time: None,
                }],
            })
            .collect(),
        parts: Vec::new(),
        produced_serial: None,
    }
}

fn serial_entry(node_id: NodeId, serial: &str) -> DraftPart {
    DraftPart {
        node_id,
        serial_number: Some(serial.to_string()),
        source_log: None,
    }
}

fn new_log(product: ProductId, wi: &WorkInstruction) -> NewProductionLog {
    NewProductionLog {
        product_id: product,
        work_instruction_id: wi.id,
        operator_id: "jdoe".to_string(),
        from_batch_of: 1,
    }
}

// ===== Versioning =====

#[test]
fn test_first_version_heads_its_own_chain() {
    let mut store = store();
    let (_, wi) = simple_setup(&mut store);

    assert!(wi.is_latest);
    assert!(!wi.is_active);
    assert_eq!(wi.original_id, None);
    assert_eq!(wi.chain_id(), wi.id);
    assert_eq!(wi.steps().count(), 2);
    assert!(store.is_editable(wi.id));
}

#[test]
fn test_new_version_joins_chain_and_demotes_previous() {
    let mut store = store();
    let (_, v1) = simple_setup(&mut store);

    let mut next = NewWorkInstruction::from(&v1);
    next.version = "2".to_string();
    let v2 = store.create_new_version(v1.id, &next).unwrap();

    assert_eq!(v2.original_id, Some(v1.id));
    assert_eq!(v2.chain_id(), v1.id);
    assert!(v2.is_latest);

    let v1 = store.get_work_instruction(v1.id).unwrap();
    assert!(!v1.is_latest);
    assert!(!v1.is_active);

    // A version of a later version still points at the chain head
    let v3 = store.create_new_version(v2.id, &next).unwrap();
    assert_eq!(v3.original_id, Some(v1.id));
    assert_eq!(store.chain_versions(v3.id).len(), 3);
    assert_eq!(store.latest_in_chain(v1.id).unwrap().id, v3.id);
}

#[test]
fn test_database_rejects_second_latest_in_chain() {
    let mut store = store();
    let (_, v1) = simple_setup(&mut store);
    let v2 = store
        .create_new_version(v1.id, &NewWorkInstruction::from(&v1))
        .unwrap();
    assert!(v2.is_latest);

    let result = store.conn.execute(
        "UPDATE work_instructions SET is_latest = 1 WHERE id = ?1",
        params![v1.id],
    );
    assert!(result.is_err());
}

#[test]
fn test_database_rejects_active_non_latest() {
    let mut store = store();
    let (_, v1) = simple_setup(&mut store);
    store
        .create_new_version(v1.id, &NewWorkInstruction::from(&v1))
        .unwrap();

    let result = store.conn.execute(
        "UPDATE work_instructions SET is_active = 1 WHERE id = ?1",
        params![v1.id],
    );
    assert!(result.is_err());
}

#[test]
fn test_activate_only_latest() {
    let mut store = store();
    let (_, v1) = simple_setup(&mut store);
    let v2 = store
        .create_new_version(v1.id, &NewWorkInstruction::from(&v1))
        .unwrap();

    let err = store.activate_work_instruction(v1.id).unwrap_err();
    assert!(matches!(err, StoreError::NotLatest(id) if id == v1.id));

    let active = store.activate_work_instruction(v2.id).unwrap();
    assert!(active.is_active);
    assert_eq!(store.active_in_chain(v1.id).unwrap().id, v2.id);

    // Activating again is idempotent
    store.activate_work_instruction(v2.id).unwrap();
    let active: Vec<_> = store
        .chain_versions(v1.id)
        .into_iter()
        .filter(|wi| wi.is_active)
        .collect();
    assert_eq!(active.len(), 1);
}

#[test]
fn test_versioning_clears_active_flag() {
    let mut store = store();
    let (_, v1) = simple_setup(&mut store);
    store.activate_work_instruction(v1.id).unwrap();

    let v2 = store
        .create_new_version(v1.id, &NewWorkInstruction::from(&v1))
        .unwrap();
    assert!(!v2.is_active);
    assert!(store.active_in_chain(v1.id).is_none());
}

#[test]
fn test_version_with_logs_is_not_editable() {
    let mut store = store();
    let (product, wi) = simple_setup(&mut store);
    store.create_production_log(&new_log(product, &wi)).unwrap();

    assert!(!store.is_editable(wi.id));
    let err = store
        .update_work_instruction(wi.id, &NewWorkInstruction::from(&wi))
        .unwrap_err();
    assert!(matches!(err, StoreError::NotEditable(_)));
}

#[test]
fn test_save_or_version_edits_in_place_then_versions() {
    let mut store = store();
    let (product, wi) = simple_setup(&mut store);

    let mut edit = NewWorkInstruction::from(&wi);
    edit.title = "Assemble housing (rev)".to_string();
    let edited = store.save_or_version(wi.id, &edit).unwrap();
    assert_eq!(edited.id, wi.id);
    assert_eq!(edited.title, "Assemble housing (rev)");

    store
        .create_production_log(&new_log(product, &edited))
        .unwrap();

    let versioned = store.save_or_version(wi.id, &edit).unwrap();
    assert_ne!(versioned.id, wi.id);
    assert_eq!(versioned.version, "2");
    assert_eq!(versioned.chain_id(), wi.id);
}

#[test]
fn test_is_editable_false_for_missing_instruction() {
    let store = store();
    assert!(!store.is_editable(WorkInstructionId(42)));
}

#[test]
fn test_delete_latest_promotes_previous() {
    let mut store = store();
    let (_, v1) = simple_setup(&mut store);
    let v2 = store
        .create_new_version(v1.id, &NewWorkInstruction::from(&v1))
        .unwrap();

    store.delete_work_instruction(v2.id).unwrap();
    let v1 = store.get_work_instruction(v1.id).unwrap();
    assert!(v1.is_latest);
}

#[test]
fn test_delete_chain_head_with_versions_is_rejected() {
    let mut store = store();
    let (_, v1) = simple_setup(&mut store);
    store
        .create_new_version(v1.id, &NewWorkInstruction::from(&v1))
        .unwrap();

    let err = store.delete_work_instruction(v1.id).unwrap_err();
    assert!(matches!(err, StoreError::InUse { .. }));
}

#[test]
fn test_normalize_positions_closes_gaps() {
    let mut store = store();
    let def = store.get_or_add_part_definition("200-010", "Board").unwrap();
    let wi = store
        .create_work_instruction(&instruction(
            "Sparse",
            vec![step("Prepare"), part(&def, 1), step("Inspect")],
        ))
        .unwrap();
    let before: Vec<NodeId> = wi.nodes.iter().map(|n| n.id).collect();

    store
        .conn
        .execute(
            "UPDATE work_instruction_nodes SET position = position * 10 + 5 \
             WHERE work_instruction_id = ?1",
            params![wi.id],
        )
        .unwrap();

    assert_eq!(store.normalize_positions(wi.id).unwrap(), 3);
    let wi = store.get_work_instruction(wi.id).unwrap();
    let positions: Vec<u32> = wi.nodes.iter().map(|n| n.position).collect();
    assert_eq!(positions, vec![0, 1, 2]);
    let after: Vec<NodeId> = wi.nodes.iter().map(|n| n.id).collect();
    assert_eq!(after, before);

    assert_eq!(store.normalize_positions(wi.id).unwrap(), 0);
}

#[test]
fn test_list_latest_only() {
    let mut store = store();
    let (_, v1) = simple_setup(&mut store);
    store
        .create_new_version(v1.id, &NewWorkInstruction::from(&v1))
        .unwrap();

    let all = store.list_work_instructions(&WorkInstructionFilter::default());
    assert_eq!(all.len(), 2);

    let latest = store.list_work_instructions(&WorkInstructionFilter {
        latest_only: true,
        ..Default::default()
    });
    assert_eq!(latest.len(), 1);
    assert!(latest[0].is_latest);
}

// ===== Production logs =====

#[test]
fn test_create_log_has_one_step_per_step_node() {
    let mut store = store();
    let (product, wi) = simple_setup(&mut store);
    let log = store.create_production_log(&new_log(product, &wi)).unwrap();

    assert_eq!(log.log_steps.len(), 2);
    assert_eq!(store.log_state(log.id), Some(StepState::NotStarted));
    assert!(!store.is_complete(log.id));
}

#[test]
fn test_attempts_drive_log_state() {
    let mut store = store();
    let (product, wi) = simple_setup(&mut store);
    let log = store.create_production_log(&new_log(product, &wi)).unwrap();
    let first = log.log_steps[0].id;
    let second = log.log_steps[1].id;

    store.record_attempt(first, Some(false), "misaligned").unwrap();
    store.record_attempt(first, Some(true), "").unwrap();
    assert_eq!(store.log_state(log.id), Some(StepState::InProgress));

    store.record_attempt(second, Some(true), "").unwrap();
    assert!(store.is_complete(log.id));

    let log = store.get_production_log(log.id).unwrap();
    assert_eq!(log.log_steps[0].attempts.len(), 2);
    assert_eq!(log.log_steps[0].attempts[0].success, Some(false));
}

#[test]
fn test_unselect_clears_submit_time_keeps_success() {
    let mut store = store();
    let (product, wi) = simple_setup(&mut store);
    let log = store.create_production_log(&new_log(product, &wi)).unwrap();
    let step = log.log_steps[0].id;

    store.record_attempt(step, Some(true), "").unwrap();
    let attempt = store.unselect_step(step).unwrap();
    assert_eq!(attempt.submit_time, None);
    assert_eq!(attempt.success, Some(true));

    let log = store.get_production_log(log.id).unwrap();
    assert_eq!(log.log_steps[0].state(), StepState::InProgress);
    assert_eq!(log.log_steps[0].attempts.len(), 1);
}

#[test]
fn test_unselect_without_attempts_fails() {
    let mut store = store();
    let (product, wi) = simple_setup(&mut store);
    let log = store.create_production_log(&new_log(product, &wi)).unwrap();

    let err = store.unselect_step(log.log_steps[0].id).unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));
}

#[test]
fn test_save_log_appends_new_attempts() {
    let mut store = store();
    let (product, wi) = simple_setup(&mut store);
    let mut log = store.create_production_log(&new_log(product, &wi)).unwrap();

    log.operator_id = "asmith".to_string();
    log.from_batch_of = 4;
    log.log_steps[1]
        .attempts
        .push(ProductionLogStepAttempt::now(Some(true), "ok"));
    let saved = store.save_production_log(&log).unwrap();

    assert_eq!(saved.operator_id, "asmith");
    assert_eq!(saved.from_batch_of, 4);
    assert_eq!(saved.log_steps[1].attempts.len(), 1);
    assert!(saved.log_steps[1].attempts[0].id.is_some());
}

#[test]
fn test_save_log_validates_header() {
    let mut store = store();
    let (product, wi) = simple_setup(&mut store);
    let log = store.create_production_log(&new_log(product, &wi)).unwrap();

    let mut empty_batch = log.clone();
    empty_batch.from_batch_of = 0;
    let err = store.save_production_log(&empty_batch).unwrap_err();
    assert!(matches!(err, StoreError::Invalid(_)));

    let mut blank_operator = log.clone();
    blank_operator.operator_id = "  ".to_string();
    let err = store.save_production_log(&blank_operator).unwrap_err();
    assert!(matches!(err, StoreError::Invalid(_)));

    let stored = store.get_production_log(log.id).unwrap();
    assert_eq!(stored.operator_id, "jdoe");
    assert_eq!(stored.from_batch_of, 1);
}

#[test]
fn test_log_for_inactive_product_is_rejected() {
    let mut store = store();
    let (product, wi) = simple_setup(&mut store);
    store.set_product_active(product, false).unwrap();

    let err = store
        .create_production_log(&new_log(product, &wi))
        .unwrap_err();
    assert!(matches!(err, StoreError::Invalid(_)));
}

// ===== Submission =====

/// Two part nodes requiring three parts in total
fn parts_setup(store: &mut Store) -> (ProductId, WorkInstruction) {
    let board = store.get_or_add_part_definition("200-010", "Board").unwrap();
    let screw = store.get_or_add_part_definition("300-002", "Screw").unwrap();
    let product_def = store.get_or_add_part_definition("100-001", "Housing").unwrap();
    let product = store.create_product(product_def.id).unwrap();

    let mut new = instruction(
        "Final assembly",
        vec![step("Fit board"), part(&board, 1), part(&screw, 2)],
    );
    new.part_produced_id = Some(product_def.id);
    new.part_produced_is_serialized = true;
    let wi = store.create_work_instruction(&new).unwrap();
    (product.id, wi)
}

#[test]
fn test_shortfall_requires_confirmation() {
    let mut store = store();
    let (product, wi) = parts_setup(&mut store);
    let nodes = part_nodes(&wi);

    let mut draft = draft(product, &wi);
    draft.parts = vec![serial_entry(nodes[0], "B-1"), serial_entry(nodes[1], "S-1")];
    draft.produced_serial = Some("H-1".to_string());

    assert_eq!(
        store.check_submission(&draft).unwrap(),
        SubmissionCheck::Shortfall {
            logged: 2,
            required: 3
        }
    );

    let err = store.submit_production_log(&draft, false).unwrap_err();
    assert!(matches!(
        err,
        StoreError::ConfirmationRequired {
            logged: 2,
            required: 3
        }
    ));
    assert!(store.list_production_logs(None, None).is_empty());

    let log = store.submit_production_log(&draft, true).unwrap();
    assert!(store.is_complete(log.id));
}

#[test]
fn test_blank_part_entries_are_not_recorded() {
    let mut store = store();
    let (product, wi) = parts_setup(&mut store);

    let mut draft = store.draft_for(wi.id, product, "jdoe").unwrap();
    for step in &mut draft.steps {
        step.attempts.push(DraftAttempt {
            success: Some(true),
            notes: String::new(),
            submit_time: None,
        });
    }
    assert_eq!(draft.parts.len(), 3);
    draft.parts[0].serial_number = Some("B-1".to_string());
    draft.parts[1].serial_number = Some("S-1".to_string());
    draft.produced_serial = Some("H-1".to_string());

    assert_eq!(
        store.check_submission(&draft).unwrap(),
        SubmissionCheck::Shortfall {
            logged: 2,
            required: 3
        }
    );
    let log = store.submit_production_log(&draft, true).unwrap();

    let entries = store.parts_for_log(log.id);
    let installed: Vec<_> = entries
        .iter()
        .filter(|e| e.operation_type == PartOperation::Installed)
        .collect();
    assert_eq!(installed.len(), 2);
    assert!(installed.iter().all(|e| e.part.serial_number.is_some()));
    let produced = entries
        .iter()
        .filter(|e| e.operation_type == PartOperation::Produced)
        .count();
    assert_eq!(produced, 1);
}

#[test]
fn test_submit_records_installed_and_produced() {
    let mut store = store();
    let (product, wi) = parts_setup(&mut store);
    let nodes = part_nodes(&wi);

    let mut draft = draft(product, &wi);
    draft.parts = vec![
        serial_entry(nodes[0], "B-1"),
        serial_entry(nodes[1], "S-1"),
        serial_entry(nodes[1], "S-2"),
    ];
    draft.produced_serial = Some("  H-1 ".to_string());

    assert_eq!(store.check_submission(&draft).unwrap(), SubmissionCheck::Ready);
    let log = store.submit_production_log(&draft, false).unwrap();

    let entries = store.parts_for_log(log.id);
    let installed = entries
        .iter()
        .filter(|e| e.operation_type == PartOperation::Installed)
        .count();
    assert_eq!(installed, 3);

    let produced = store.produced_part(log.id).unwrap();
    assert_eq!(produced.serial_number.as_deref(), Some("H-1"));
}

#[test]
fn test_submit_stamps_selected_attempts() {
    let mut store = store();
    let (product, wi) = simple_setup(&mut store);
    let mut draft = draft(product, &wi);
    draft.steps[1].attempts[0].success = None;

    let log = store.submit_production_log(&draft, false).unwrap();
    assert!(log.log_steps[0].attempts[0].submit_time.is_some());
    assert!(log.log_steps[1].attempts[0].submit_time.is_none());
    assert_eq!(store.log_state(log.id), Some(StepState::InProgress));
}

#[test]
fn test_missing_produced_serial_aborts_submission() {
    let mut store = store();
    let (product, wi) = parts_setup(&mut store);
    let nodes = part_nodes(&wi);

    let mut draft = draft(product, &wi);
    draft.parts = vec![
        serial_entry(nodes[0], "B-1"),
        serial_entry(nodes[1], "S-1"),
        serial_entry(nodes[1], "S-2"),
    ];
    draft.produced_serial = Some("   ".to_string());

    let err = store.submit_production_log(&draft, false).unwrap_err();
    assert!(matches!(err, StoreError::MissingSerial { .. }));
    assert!(store.list_production_logs(None, None).is_empty());
    assert!(store.find_parts_by_serial("B-1").is_empty());
}

#[test]
fn test_existing_serial_is_reused() {
    let mut store = store();
    let (product, wi) = parts_setup(&mut store);
    let nodes = part_nodes(&wi);
    let board = wi.part_nodes().next().unwrap().1.part_definition_id;
    let existing = store.create_serializable_part(board, Some("B-7")).unwrap();

    let mut draft = draft(product, &wi);
    draft.parts = vec![
        serial_entry(nodes[0], "B-7"),
        serial_entry(nodes[1], "S-1"),
        serial_entry(nodes[1], "S-2"),
    ];
    draft.produced_serial = Some("H-1".to_string());
    let log = store.submit_production_log(&draft, false).unwrap();

    let entries = store.parts_for_log(log.id);
    assert!(entries.iter().any(|e| e.part.id == existing.id));
    assert_eq!(store.find_parts_by_serial("B-7").len(), 1);
}

#[test]
fn test_delete_log_removes_its_rows() {
    let mut store = store();
    let (product, wi) = parts_setup(&mut store);
    let nodes = part_nodes(&wi);

    let mut draft = draft(product, &wi);
    draft.parts = vec![
        serial_entry(nodes[0], "B-1"),
        serial_entry(nodes[1], "S-1"),
        serial_entry(nodes[1], "S-2"),
    ];
    draft.produced_serial = Some("H-1".to_string());
    let log = store.submit_production_log(&draft, false).unwrap();
    store.delete_production_log(log.id).unwrap();

    let count = |sql: &str| -> i64 {
        store
            .conn
            .query_row(sql, params![log.id], |row| row.get(0))
            .unwrap()
    };
    assert_eq!(
        count("SELECT COUNT(*) FROM production_log_steps WHERE production_log_id = ?1"),
        0
    );
    assert_eq!(
        count(
            "SELECT COUNT(*) FROM production_log_step_attempts a \
             JOIN production_log_steps s ON s.id = a.production_log_step_id \
             WHERE s.production_log_id = ?1"
        ),
        0
    );
    assert_eq!(
        count("SELECT COUNT(*) FROM production_log_parts WHERE production_log_id = ?1"),
        0
    );
    let orphans: i64 = store
        .conn
        .query_row(
            "SELECT COUNT(*) FROM production_log_step_attempts a \
             LEFT JOIN production_log_steps s ON s.id = a.production_log_step_id \
             WHERE s.id IS NULL",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(orphans, 0);

    // Parts outlive the log that recorded them
    let parts: i64 = store
        .conn
        .query_row("SELECT COUNT(*) FROM serializable_parts", [], |row| row.get(0))
        .unwrap();
    assert_eq!(parts, 4);
    assert!(store.get_production_log(log.id).is_none());
}

// ===== Ledger =====

#[test]
fn test_ledger_rejects_updates() {
    let mut store = store();
    let (product, wi) = parts_setup(&mut store);
    let nodes = part_nodes(&wi);
    let mut draft = draft(product, &wi);
    draft.parts = vec![serial_entry(nodes[0], "B-1")];
    draft.produced_serial = Some("H-1".to_string());
    store.submit_production_log(&draft, true).unwrap();

    let result = store.conn.execute(
        "UPDATE production_log_parts SET operation_type = 'removed'",
        [],
    );
    let err = result.unwrap_err().to_string();
    assert!(err.contains("append-only"), "unexpected error: {}", err);
}

#[test]
fn test_get_installed_filters_by_definition() {
    let mut store = store();
    let (product, wi) = parts_setup(&mut store);
    let nodes = part_nodes(&wi);
    let screw = wi.part_nodes().nth(1).unwrap().1.part_definition_id;

    let mut draft = draft(product, &wi);
    draft.parts = vec![
        serial_entry(nodes[0], "B-1"),
        serial_entry(nodes[1], "S-1"),
        serial_entry(nodes[1], "S-2"),
    ];
    draft.produced_serial = Some("H-1".to_string());
    let log = store.submit_production_log(&draft, false).unwrap();

    let screws = store.get_installed_for_production_logs(&[log.id], &[screw]);
    assert_eq!(screws.len(), 2);
    assert!(screws.iter().all(|e| e.part.part_definition_id == screw));
    assert!(screws
        .iter()
        .all(|e| e.operation_type == PartOperation::Installed));

    assert!(store
        .get_installed_for_production_logs(&[log.id], &[])
        .is_empty());
    assert!(store
        .get_installed_for_production_logs(&[ProductionLogId(99)], &[screw])
        .is_empty());
}

#[test]
fn test_replace_installed_part_appends_rows() {
    let mut store = store();
    let (product, wi) = parts_setup(&mut store);
    let nodes = part_nodes(&wi);
    let board = wi.part_nodes().next().unwrap().1.part_definition_id;

    let mut draft = draft(product, &wi);
    draft.parts = vec![serial_entry(nodes[0], "B-1")];
    draft.produced_serial = Some("H-1".to_string());
    let log = store.submit_production_log(&draft, true).unwrap();

    let old = store.find_parts_by_serial("B-1")[0].id;
    let new = store.create_serializable_part(board, Some("B-2")).unwrap().id;
    store.replace_installed_part(log.id, old, new).unwrap();

    let history = store.part_history(old);
    let ops: Vec<_> = history.iter().map(|e| e.operation_type).collect();
    assert!(ops.contains(&PartOperation::Installed));
    assert!(ops.contains(&PartOperation::Removed));

    // The removed part cannot be replaced twice
    let err = store.replace_installed_part(log.id, old, new).unwrap_err();
    assert!(matches!(err, StoreError::Invalid(_)));
}

#[test]
fn test_record_part_duplicate_is_invalid() {
    let mut store = store();
    let (product, wi) = simple_setup(&mut store);
    let log = store.create_production_log(&new_log(product, &wi)).unwrap();
    let def = store.get_or_add_part_definition("900-1", "Label").unwrap();
    let part = store.create_serializable_part(def.id, Some("L-1")).unwrap();

    store
        .record_part(log.id, part.id, PartOperation::Installed)
        .unwrap();
    let err = store
        .record_part(log.id, part.id, PartOperation::Installed)
        .unwrap_err();
    assert!(matches!(err, StoreError::Invalid(_)));
}

#[test]
fn test_lineage_follows_produced_parts() {
    let mut store = store();
    let cell = store.get_or_add_part_definition("400-1", "Cell").unwrap();
    let pack = store.get_or_add_part_definition("500-1", "Pack").unwrap();
    let unit = store.get_or_add_part_definition("600-1", "Unit").unwrap();
    let pack_product = store.create_product(pack.id).unwrap();
    let unit_product = store.create_product(unit.id).unwrap();

    // Sub-assembly: cell -> pack
    let mut sub = instruction("Build pack", vec![step("Weld"), part(&cell, 1)]);
    sub.part_produced_id = Some(pack.id);
    sub.part_produced_is_serialized = true;
    let sub = store.create_work_instruction(&sub).unwrap();

    let mut sub_draft = draft(pack_product.id, &sub);
    sub_draft.parts = vec![serial_entry(part_nodes(&sub)[0], "C-1")];
    sub_draft.produced_serial = Some("P-1".to_string());
    let sub_log = store.submit_production_log(&sub_draft, false).unwrap();

    // Final assembly installs the pack by its production log
    let mut pack_node = PartNode::new(pack.id);
    pack_node.input_type = PartInputType::ProductionLogId;
    let mut fin = instruction("Build unit", vec![step("Mount"), NodeKind::Part(pack_node)]);
    fin.part_produced_id = Some(unit.id);
    fin.part_produced_is_serialized = true;
    let fin = store.create_work_instruction(&fin).unwrap();

    let mut fin_draft = draft(unit_product.id, &fin);
    fin_draft.parts = vec![DraftPart {
        node_id: part_nodes(&fin)[0],
        serial_number: None,
        source_log: Some(sub_log.id),
    }];
    fin_draft.produced_serial = Some("U-1".to_string());
    let fin_log = store.submit_production_log(&fin_draft, false).unwrap();

    let unit_part = store.produced_part(fin_log.id).unwrap();
    let tree = store.lineage(unit_part.id).unwrap();
    assert_eq!(tree.produced_by, Some(fin_log.id));
    assert_eq!(tree.part_count(), 3);
    assert_eq!(tree.children[0].part.serial_number.as_deref(), Some("P-1"));
    assert_eq!(
        tree.children[0].children[0].part.serial_number.as_deref(),
        Some("C-1")
    );

    // Reuse: prefill from the final log references the sub-assembly log
    let prefill = store.prefill_from_log(fin_log.id, fin.id).unwrap();
    assert_eq!(prefill.len(), 1);
    assert_eq!(prefill[0].source_log, Some(sub_log.id));
}

#[test]
fn test_source_log_without_produced_part_is_invalid() {
    let mut store = store();
    let (product, plain) = simple_setup(&mut store);
    let plain_log = store.create_production_log(&new_log(product, &plain)).unwrap();

    let def = store.get_or_add_part_definition("500-1", "Pack").unwrap();
    let mut node = PartNode::new(def.id);
    node.input_type = PartInputType::ProductionLogId;
    let wi = store
        .create_work_instruction(&instruction("Mount", vec![step("Mount"), NodeKind::Part(node)]))
        .unwrap();

    let mut draft = draft(product, &wi);
    draft.parts = vec![DraftPart {
        node_id: part_nodes(&wi)[0],
        serial_number: None,
        source_log: Some(plain_log.id),
    }];
    let err = store.submit_production_log(&draft, false).unwrap_err();
    assert!(matches!(err, StoreError::Invalid(_)));
}

// ===== Catalog =====

#[test]
fn test_get_or_add_part_definition_is_idempotent() {
    let mut store = store();
    let a = store.get_or_add_part_definition(" 100-001 ", "Housing").unwrap();
    let b = store.get_or_add_part_definition("100-001", "Housing").unwrap();
    assert_eq!(a.id, b.id);
    assert_eq!(store.list_part_definitions(None).len(), 1);
    assert_eq!(store.list_part_definitions(Some("hous")).len(), 1);
}

#[test]
fn test_duplicate_serials_are_allowed() {
    let mut store = store();
    let def = store.get_or_add_part_definition("100-001", "Housing").unwrap();
    store.create_serializable_part(def.id, Some("X")).unwrap();
    store.create_serializable_part(def.id, Some("X")).unwrap();
    assert_eq!(store.find_parts_by_serial("X").len(), 2);
}

#[test]
fn test_referenced_definition_cannot_be_deleted() {
    let mut store = store();
    let (_, _) = simple_setup(&mut store);
    let def = store.list_part_definitions(None)[0].id;
    let err = store.delete_part_definition(def).unwrap_err();
    assert!(matches!(err, StoreError::InUse { .. }));

    let unused = store.get_or_add_part_definition("999", "Spare").unwrap();
    store.delete_part_definition(unused.id).unwrap();
    assert!(store.get_part_definition(unused.id).is_none());
}

#[test]
fn test_product_links_and_delete_restriction() {
    let mut store = store();
    let (product, wi) = simple_setup(&mut store);
    store.link_work_instruction(product, wi.id).unwrap();
    assert_eq!(store.work_instructions_for_product(product).len(), 1);

    store.create_production_log(&new_log(product, &wi)).unwrap();
    let err = store.delete_product(product).unwrap_err();
    assert!(matches!(err, StoreError::InUse { .. }));
}

#[test]
fn test_part_definition_lookup_missing() {
    let store = store();
    assert!(store.get_part_definition(PartDefinitionId(5)).is_none());
}

// ===== Reports =====

#[test]
fn test_reports_reflect_submissions() {
    let mut store = store();
    let (product, wi) = parts_setup(&mut store);
    let nodes = part_nodes(&wi);
    let mut draft = draft(product, &wi);
    draft.parts = vec![
        serial_entry(nodes[0], "B-1"),
        serial_entry(nodes[1], "S-1"),
        serial_entry(nodes[1], "S-2"),
    ];
    draft.produced_serial = Some("H-1".to_string());
    store.submit_production_log(&draft, false).unwrap();

    let production = store.production_report(None);
    assert_eq!(production.len(), 1);
    assert_eq!(production[0].produced_serial.as_deref(), Some("H-1"));
    assert_eq!(production[0].product_number, "100-001");

    let trace = store.traceability_report(Some("S-2"), None);
    assert_eq!(trace.len(), 1);
    assert_eq!(trace[0].operation_type, "installed");

    let fpy = store.fpy_report(Some(wi.id));
    assert_eq!(fpy.len(), 1);
    assert_eq!(fpy[0].first_attempt_success, Some(true));

    let stats = store.stats().unwrap();
    assert_eq!(stats.production_logs, 1);
    assert_eq!(stats.ledger_rows.get("installed"), Some(&3));
}

#[test]
fn test_query_raw_is_read_only() {
    let store = store();
    let rows = store.query_raw("SELECT 1, 'a', NULL").unwrap();
    assert_eq!(rows, vec![vec!["1".to_string(), "a".to_string(), "NULL".to_string()]]);

    let err = store.query_raw("DELETE FROM products").unwrap_err();
    assert!(matches!(err, StoreError::ReadOnlyQuery));
}

// ===== Events =====

#[test]
fn test_store_publishes_log_events() {
    let mut store = store();
    let (product, wi) = simple_setup(&mut store);
    let mut rx = store.events().subscribe();

    let log = store.create_production_log(&new_log(product, &wi)).unwrap();
    let step = log.log_steps[0].id;
    store.record_attempt(step, Some(true), "").unwrap();
    store.unselect_step(step).unwrap();
    store.delete_production_log(log.id).unwrap();

    let events = drain(&mut rx);
    assert_eq!(
        events,
        vec![
            LogEvent::LogCreated { log: log.id },
            LogEvent::AttemptRecorded {
                log: log.id,
                step,
                success: Some(true)
            },
            LogEvent::StepUnselected { log: log.id, step },
            LogEvent::LogDeleted { log: log.id },
        ]
    );
}

#[test]
fn test_deactivate_publishes_event() {
    let mut store = store();
    let (_, wi) = simple_setup(&mut store);
    store.activate_work_instruction(wi.id).unwrap();
    let mut rx = store.events().subscribe();

    store.deactivate_work_instruction(wi.id).unwrap();
    assert!(!store.get_work_instruction(wi.id).unwrap().is_active);
    assert_eq!(
        drain(&mut rx),
        vec![LogEvent::WorkInstructionDeactivated {
            chain: wi.id,
            version: wi.id
        }]
    );

    let missing = WorkInstructionId(9999);
    let err = store.deactivate_work_instruction(missing).unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));
    assert!(drain(&mut rx).is_empty());
}

#[test]
fn test_failed_submission_publishes_nothing() {
    let mut store = store();
    let (product, wi) = parts_setup(&mut store);
    let mut rx = store.events().subscribe();

    let draft = draft(product, &wi);
    assert!(store.submit_production_log(&draft, false).is_err());
    assert!(drain(&mut rx).is_empty());
}

#[test]
fn test_shared_notifier_sees_both_stores() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("mes.db");
    let events = LogEvents::default();
    let mut rx = events.subscribe();

    let mut station = Store::open_path(&path).unwrap().with_events(events.clone());
    let (product, wi) = simple_setup(&mut station);
    let log = station.create_production_log(&new_log(product, &wi)).unwrap();

    let mut office = Store::open_path(&path).unwrap().with_events(events);
    office.delete_production_log(log.id).unwrap();

    let events = drain(&mut rx);
    assert!(events.contains(&LogEvent::LogCreated { log: log.id }));
    assert_eq!(events.last(), Some(&LogEvent::LogDeleted { log: log.id }));
}

// ===== Schema =====

#[test]
fn test_reopen_file_database() {
    let dir = tempdir().unwrap();
    let path = dir.path().join(".mes").join("mes.db");
    {
        let mut store = Store::open_path(&path).unwrap();
        store.get_or_add_part_definition("1", "One").unwrap();
    }
    let store = Store::open_path(&path).unwrap();
    assert_eq!(store.list_part_definitions(None).len(), 1);
    assert!(store.stats().unwrap().db_size_bytes > 0);
}

#[test]
fn test_schema_mismatch_is_an_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("mes.db");
    {
        let store = Store::open_path(&path).unwrap();
        store
            .conn
            .execute("UPDATE schema_version SET version = 99", [])
            .unwrap();
    }
    match Store::open_path(&path) {
        Err(StoreError::SchemaMismatch { found, expected }) => {
            assert_eq!(found, 99);
            assert_eq!(expected, SCHEMA_VERSION);
        }
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("expected a schema mismatch"),
    }
}
