//! Integration tests for the mes CLI
//!
//! These tests exercise the CLI commands end-to-end using assert_cmd.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

const PUMP_INSTRUCTION: &str = r#"
title: Assemble pump
version: "A"
part_produced:
  part_number: "700-100"
  part_name: Pump
part_produced_is_serialized: true
nodes:
  - node_type: step
    name: Seat impeller
    body: Press the impeller onto the shaft
  - node_type: part
    part_number: "710-001"
    part_name: Impeller
  - node_type: step
    name: Leak test
"#;

/// Helper to get an mes command isolated from the user's config
fn mes(tmp: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("mes").unwrap();
    cmd.current_dir(tmp.path())
        .env("XDG_CONFIG_HOME", tmp.path().join("xdg"))
        .env("HOME", tmp.path())
        .env("MES_OPERATOR", "tester")
        .env("NO_COLOR", "1")
        .env_remove("MES_DATABASE")
        .env_remove("MES_LOG")
        .env_remove("RUST_LOG");
    cmd
}

/// Helper to create a test project in a temp directory
fn setup_test_project() -> TempDir {
    let tmp = TempDir::new().unwrap();
    mes(&tmp).arg("init").assert().success();
    tmp
}

/// Run a command with `--format id` and return the printed ID
fn create_id(tmp: &TempDir, args: &[&str]) -> String {
    let output = mes(tmp).args(["--format", "id"]).args(args).output().unwrap();
    assert!(
        output.status.success(),
        "command {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Project with the pump instruction imported, activated and linked to its product
fn setup_pump_line() -> TempDir {
    let tmp = setup_test_project();
    fs::write(tmp.path().join("pump.yaml"), PUMP_INSTRUCTION).unwrap();
    let product = create_id(&tmp, &["product", "new", "700-100", "--name", "Pump"]);
    assert_eq!(product, "PRD-1");
    let wi = create_id(&tmp, &["work", "import", "pump.yaml", "--product", "PRD-1"]);
    assert_eq!(wi, "WI-1");
    mes(&tmp).args(["work", "activate", "WI-1"]).assert().success();
    tmp
}

/// Draft for WI-1: nodes 1 and 3 are steps, node 2 takes the impeller serial
fn pump_draft(impeller: Option<&str>, produced: &str) -> String {
    let parts = match impeller {
        Some(serial) => format!("parts:\n  - node_id: 2\n    serial_number: {}\n", serial),
        None => "parts: []\n".to_string(),
    };
    format!(
        "product_id: 1\n\
         work_instruction_id: 1\n\
         operator_id: tester\n\
         steps:\n\
         \x20 - node_id: 1\n\
         \x20   attempts:\n\
         \x20     - success: true\n\
         \x20 - node_id: 3\n\
         \x20   attempts:\n\
         \x20     - success: false\n\
         \x20       notes: leak at seal\n\
         \x20     - success: true\n\
         {}\
         produced_serial: {}\n",
        parts, produced
    )
}

// ============================================================================
// CLI Basic Tests
// ============================================================================

#[test]
fn test_help_displays() {
    let tmp = TempDir::new().unwrap();
    mes(&tmp)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Work instruction versions"))
        .stdout(predicate::str::contains("Production logs"));
}

#[test]
fn test_version_displays() {
    let tmp = TempDir::new().unwrap();
    mes(&tmp)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("mes"));
}

#[test]
fn test_completions_bash() {
    let tmp = TempDir::new().unwrap();
    mes(&tmp)
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("mes"));
}

// ============================================================================
// Project Tests
// ============================================================================

#[test]
fn test_init_creates_project_and_database() {
    let tmp = TempDir::new().unwrap();
    mes(&tmp)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized MES project"));

    assert!(tmp.path().join(".mes/config.yaml").exists());
    assert!(tmp.path().join(".mes/mes.db").exists());
}

#[test]
fn test_init_twice_reports_existing_project() {
    let tmp = setup_test_project();
    mes(&tmp)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists"));
}

#[test]
fn test_commands_outside_project_fail() {
    let tmp = TempDir::new().unwrap();
    mes(&tmp)
        .args(["work", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not an MES project"));
}

#[test]
fn test_project_flag_from_other_directory() {
    let tmp = setup_test_project();
    let elsewhere = TempDir::new().unwrap();
    mes(&elsewhere)
        .args(["--project"])
        .arg(tmp.path())
        .args(["part", "add", "710-001", "Impeller"])
        .assert()
        .success();

    mes(&tmp)
        .args(["part", "list", "--format", "csv"])
        .assert()
        .success()
        .stdout(predicate::str::contains("PD-1,710-001,Impeller"));
}

#[test]
fn test_configured_database_location() {
    let tmp = setup_test_project();
    fs::write(tmp.path().join(".mes/config.yaml"), "database: data/line1.db\n").unwrap();

    mes(&tmp).args(["part", "add", "710-001", "Impeller"]).assert().success();
    assert!(tmp.path().join("data/line1.db").exists());

    mes(&tmp)
        .args(["db", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("line1.db"));
}

// ============================================================================
// Catalog Tests
// ============================================================================

#[test]
fn test_part_register_and_find() {
    let tmp = setup_test_project();
    let def = create_id(&tmp, &["part", "add", "710-001", "Impeller"]);
    assert_eq!(def, "PD-1");
    // Same number and name returns the existing definition
    assert_eq!(create_id(&tmp, &["part", "add", "710-001", "Impeller"]), "PD-1");

    let part = create_id(&tmp, &["part", "register", "PD-1", "--serial", " IMP-7 "]);
    assert_eq!(part, "SP-1");

    mes(&tmp)
        .args(["part", "find", "IMP-7", "--format", "csv"])
        .assert()
        .success()
        .stdout(predicate::str::contains("SP-1,IMP-7,PD-1,710-001,Impeller"));

    mes(&tmp)
        .args(["part", "find", "NOPE"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no part with serial"));
}

#[test]
fn test_part_definition_in_use_cannot_be_deleted() {
    let tmp = setup_test_project();
    create_id(&tmp, &["product", "new", "700-100", "--name", "Pump"]);

    mes(&tmp)
        .args(["part", "rm", "PD-1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("is referenced by"));
}

#[test]
fn test_product_lifecycle() {
    let tmp = setup_test_project();
    create_id(&tmp, &["product", "new", "700-100", "--name", "Pump"]);

    mes(&tmp).args(["product", "deactivate", "PRD-1"]).assert().success();
    mes(&tmp)
        .args(["product", "list", "--format", "id"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
    mes(&tmp)
        .args(["product", "list", "--all", "--format", "id"])
        .assert()
        .success()
        .stdout("PRD-1\n");

    mes(&tmp).args(["product", "rm", "PRD-1"]).assert().success();
    mes(&tmp)
        .args(["product", "show", "PRD-1"])
        .assert()
        .failure();
}

// ============================================================================
// Work Instruction Tests
// ============================================================================

#[test]
fn test_work_import_show_and_export() {
    let tmp = setup_pump_line();

    mes(&tmp)
        .args(["work", "show", "WI-1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Assemble pump"))
        .stdout(predicate::str::contains("Seat impeller"))
        .stdout(predicate::str::contains("710-001 (Impeller)"));

    let out = tmp.path().join("exported.yaml");
    mes(&tmp)
        .args(["work", "export", "WI-1", "-o"])
        .arg(&out)
        .assert()
        .success();
    let exported = fs::read_to_string(&out).unwrap();
    assert!(exported.contains("title: Assemble pump"));
    assert!(exported.contains("node_type: part"));
    assert!(exported.contains("part_number: 700-100") || exported.contains("part_number: '700-100'"));
}

#[test]
fn test_work_import_reports_yaml_errors() {
    let tmp = setup_test_project();
    fs::write(
        tmp.path().join("bad.yaml"),
        "title: Broken\nnodes:\n  - node_type: stp\n    name: x\n",
    )
    .unwrap();

    mes(&tmp)
        .args(["work", "import", "bad.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown variant"));
}

#[test]
fn test_work_versions_and_activation() {
    let tmp = setup_pump_line();

    let v2 = create_id(&tmp, &["work", "import", "pump.yaml", "--version-of", "WI-1"]);
    assert_eq!(v2, "WI-2");

    mes(&tmp)
        .args(["work", "versions", "WI-2", "--format", "csv"])
        .assert()
        .success()
        .stdout(predicate::str::contains("WI-1,Assemble pump,A,WI-1,no,no"))
        .stdout(predicate::str::contains("WI-2,Assemble pump,A.1,WI-1,yes,no"));

    mes(&tmp)
        .args(["work", "activate", "WI-1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not the latest version"));

    mes(&tmp).args(["work", "activate", "WI-2"]).assert().success();
    mes(&tmp)
        .args(["work", "list", "--active", "--format", "id"])
        .assert()
        .success()
        .stdout("WI-2\n");

    // The new version keeps the product link
    mes(&tmp)
        .args(["work", "list", "--product", "PRD-1", "--latest", "--format", "id"])
        .assert()
        .success()
        .stdout("WI-2\n");
}

#[test]
fn test_work_save_versions_when_logged() {
    let tmp = setup_pump_line();
    fs::write(
        tmp.path().join("draft.yaml"),
        pump_draft(Some("IMP-001"), "PUMP-001"),
    )
    .unwrap();
    mes(&tmp).args(["log", "submit", "draft.yaml"]).assert().success();

    mes(&tmp)
        .args(["work", "save", "WI-1", "pump.yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("saved as new version WI-2"));

    mes(&tmp)
        .args(["work", "rm", "WI-1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("has production logs"));
}

// ============================================================================
// Production Log Tests
// ============================================================================

#[test]
fn test_log_attempts_and_state() {
    let tmp = setup_pump_line();
    let log = create_id(
        &tmp,
        &["log", "start", "--work", "WI-1", "--product", "PRD-1"],
    );
    assert_eq!(log, "LOG-1");

    mes(&tmp)
        .args(["log", "list", "--format", "csv"])
        .assert()
        .success()
        .stdout(predicate::str::contains("LOG-1,WI-1,PRD-1,tester,1,not_started"));

    mes(&tmp)
        .args(["log", "attempt", "LSTEP-1", "--fail", "-n", "misaligned"])
        .assert()
        .success();
    mes(&tmp)
        .args(["log", "attempt", "LSTEP-1", "--pass"])
        .assert()
        .success();
    mes(&tmp)
        .args(["log", "attempt", "LSTEP-2", "--pass"])
        .assert()
        .success();

    mes(&tmp)
        .args(["log", "show", "LOG-1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("State: completed"))
        .stdout(predicate::str::contains("misaligned"));

    mes(&tmp).args(["log", "unselect", "LSTEP-2"]).assert().success();
    mes(&tmp)
        .args(["log", "list", "--format", "csv"])
        .assert()
        .success()
        .stdout(predicate::str::contains("in_progress"));
}

#[test]
fn test_log_start_rejects_inactive_product() {
    let tmp = setup_pump_line();
    mes(&tmp).args(["product", "deactivate", "PRD-1"]).assert().success();

    mes(&tmp)
        .args(["log", "start", "--work", "WI-1", "--product", "PRD-1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("inactive"));
}

#[test]
fn test_log_template_lists_steps_and_parts() {
    let tmp = setup_pump_line();
    mes(&tmp)
        .args(["log", "template", "--work", "WI-1", "--product", "PRD-1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("name: Seat impeller"))
        .stdout(predicate::str::contains("operator_id: tester"))
        .stdout(predicate::str::contains("node_id: 2"));
}

#[test]
fn test_submit_records_parts_and_lineage() {
    let tmp = setup_pump_line();
    fs::write(
        tmp.path().join("draft.yaml"),
        pump_draft(Some("IMP-001"), "PUMP-001"),
    )
    .unwrap();

    mes(&tmp)
        .args(["log", "submit", "draft.yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Submitted LOG-1 (completed)"))
        .stdout(predicate::str::contains("PUMP-001"));

    mes(&tmp)
        .args(["trace", "log", "LOG-1", "--format", "csv"])
        .assert()
        .success()
        .stdout(predicate::str::contains("installed"))
        .stdout(predicate::str::contains("IMP-001"))
        .stdout(predicate::str::contains("produced"));

    mes(&tmp)
        .args(["trace", "lineage", "PUMP-001"])
        .assert()
        .success()
        .stdout(predicate::str::contains("IMP-001"))
        .stdout(predicate::str::contains("2 part(s) in genealogy."));

    mes(&tmp)
        .args(["report", "production", "--format", "csv"])
        .assert()
        .success()
        .stdout(predicate::str::contains("LOG-1"))
        .stdout(predicate::str::contains("PUMP-001"));

    mes(&tmp)
        .args(["report", "fpy", "--format", "csv"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Seat impeller,1,1,1,100.0"))
        .stdout(predicate::str::contains("Leak test,1,0,1,0.0"));
}

#[test]
fn test_submit_shortfall_needs_confirmation() {
    let tmp = setup_pump_line();
    fs::write(tmp.path().join("draft.yaml"), pump_draft(None, "PUMP-002")).unwrap();

    mes(&tmp)
        .args(["log", "submit", "draft.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("required parts were logged"));

    mes(&tmp)
        .args(["log", "list", "--format", "id"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    mes(&tmp)
        .args(["log", "submit", "draft.yaml", "--yes"])
        .assert()
        .success();
}

#[test]
fn test_submit_requires_produced_serial() {
    let tmp = setup_pump_line();
    fs::write(
        tmp.path().join("draft.yaml"),
        pump_draft(Some("IMP-001"), "\"\""),
    )
    .unwrap();

    mes(&tmp)
        .args(["log", "submit", "draft.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("serial number is required"));
}

#[test]
fn test_replace_installed_part() {
    let tmp = setup_pump_line();
    fs::write(
        tmp.path().join("draft.yaml"),
        pump_draft(Some("IMP-001"), "PUMP-001"),
    )
    .unwrap();
    mes(&tmp).args(["log", "submit", "draft.yaml"]).assert().success();

    // SP-1 is IMP-001, SP-2 is PUMP-001; register a spare impeller
    let spare = create_id(&tmp, &["part", "register", "PD-2", "--serial", "IMP-002"]);
    assert_eq!(spare, "SP-3");

    mes(&tmp)
        .args(["trace", "replace", "LOG-1", "SP-1", "SP-3"])
        .assert()
        .success();

    mes(&tmp)
        .args(["trace", "installed", "--log", "LOG-1", "--format", "csv"])
        .assert()
        .success()
        .stdout(predicate::str::contains("IMP-002"))
        .stdout(predicate::str::contains("IMP-001").not());

    mes(&tmp)
        .args(["trace", "history", "IMP-001", "--format", "csv"])
        .assert()
        .success()
        .stdout(predicate::str::contains("removed"));
}

// ============================================================================
// Database Tests
// ============================================================================

#[test]
fn test_db_status_json() {
    let tmp = setup_pump_line();
    mes(&tmp)
        .args(["db", "status", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"products\": 1"))
        .stdout(predicate::str::contains("\"work_instructions\": 1"));
}

#[test]
fn test_db_query_is_read_only() {
    let tmp = setup_pump_line();
    mes(&tmp)
        .args(["db", "query", "SELECT title, version FROM work_instructions", "--format", "csv"])
        .assert()
        .success()
        .stdout("title,version\nAssemble pump,A\n");

    mes(&tmp)
        .args(["db", "query", "DELETE FROM products"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("only SELECT statements"));
}
