//! `mes log` command - production logs and step attempts
//!
//! Interactive stations record attempts one at a time (`start`, `attempt`,
//! `unselect`). Batch entry fills in a draft from `template` and records
//! the whole run with `submit`.

use clap::Subcommand;
use console::style;
use dialoguer::Confirm;
use miette::{IntoDiagnostic, Result};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::cli::helpers::{
    outcome_label, print_structured, read_input, report_events, success, table_config,
    watch_events, write_output, Session,
};
use crate::cli::table::{CellValue, ColumnDef, TableFormatter, TableRow};
use crate::cli::{GlobalOpts, OutputFormat};
use crate::core::identity::{
    NodeId, ProductId, ProductionLogId, ProductionLogStepId, WorkInstructionId,
};
use crate::entities::production_log::{
    NewProductionLog, ProductionLog, ProductionLogDraft, SubmissionCheck,
};
use crate::yaml::parse_yaml_str;

#[derive(Subcommand, Debug)]
pub enum LogCommands {
    /// List production logs
    List {
        /// Only logs of this work instruction version
        #[arg(long)]
        work: Option<WorkInstructionId>,

        /// Only logs of this product
        #[arg(long)]
        product: Option<ProductId>,
    },

    /// Show a log with its steps, attempts and parts
    Show {
        id: ProductionLogId,
    },

    /// Start an empty log to record attempts against
    Start {
        #[arg(long)]
        work: WorkInstructionId,

        #[arg(long)]
        product: ProductId,

        /// Operator (default: config `operator`, then $USER)
        #[arg(long)]
        operator: Option<String>,

        /// Size of the batch this unit is built in
        #[arg(long, default_value_t = 1)]
        batch: u32,
    },

    /// Change the operator or batch size of a log
    Update {
        id: ProductionLogId,

        #[arg(long)]
        operator: Option<String>,

        #[arg(long)]
        batch: Option<u32>,
    },

    /// Record an attempt at a log step
    Attempt {
        /// Log step ID (LSTEP-N, see `mes log show`)
        step: ProductionLogStepId,

        /// The step passed
        #[arg(long, conflicts_with = "fail")]
        pass: bool,

        /// The step failed
        #[arg(long)]
        fail: bool,

        #[arg(long, short = 'n', default_value = "")]
        notes: String,
    },

    /// Withdraw the submission of a step's newest attempt
    Unselect {
        step: ProductionLogStepId,
    },

    /// Print a draft to fill in and submit
    Template {
        #[arg(long)]
        work: WorkInstructionId,

        #[arg(long)]
        product: ProductId,

        /// Prefill part entries from what a prior log installed
        #[arg(long)]
        from: Option<ProductionLogId>,

        #[arg(long)]
        operator: Option<String>,

        /// Output file (default: stdout)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Submit a filled-in draft (YAML, `-` for stdin)
    Submit {
        file: PathBuf,

        /// Submit even when fewer parts were logged than required
        #[arg(long, short = 'y')]
        yes: bool,
    },

    /// Delete a log with its attempts and ledger rows
    Rm {
        id: ProductionLogId,

        /// Skip the confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },
}

const LOG_COLUMNS: &[ColumnDef] = &[
    ColumnDef::new("work", "WORK INSTR.", 12),
    ColumnDef::new("product", "PRODUCT", 10),
    ColumnDef::new("operator", "OPERATOR", 16),
    ColumnDef::new("batch", "BATCH", 6),
    ColumnDef::new("state", "STATE", 12),
    ColumnDef::new("modified", "MODIFIED", 18),
];

pub fn run(cmd: LogCommands, global: &GlobalOpts) -> Result<()> {
    let mut session = Session::open(global)?;
    match cmd {
        LogCommands::List { work, product } => {
            let logs = session.store.list_production_logs(work, product);
            output_list(&session, &logs, global)
        }
        LogCommands::Show { id } => run_show(&session, id, global),
        LogCommands::Start {
            work,
            product,
            operator,
            batch,
        } => {
            let new = NewProductionLog {
                product_id: product,
                work_instruction_id: work,
                operator_id: operator.unwrap_or_else(|| session.config.operator()),
                from_batch_of: batch,
            };
            let mut rx = watch_events(&session.store);
            let log = session.store.create_production_log(&new)?;
            report_events(&mut rx, global);

            if global.format == OutputFormat::Id {
                println!("{}", log.id);
            } else {
                success(
                    global,
                    format!(
                        "Started {} with {} step(s)",
                        style(log.id).cyan(),
                        log.log_steps.len()
                    ),
                );
            }
            Ok(())
        }
        LogCommands::Update {
            id,
            operator,
            batch,
        } => {
            let mut log = session
                .store
                .get_production_log(id)
                .ok_or_else(|| miette::miette!("production log {} not found", id))?;
            if let Some(operator) = operator {
                log.operator_id = operator;
            }
            if let Some(batch) = batch {
                log.from_batch_of = batch;
            }
            let mut rx = watch_events(&session.store);
            session.store.save_production_log(&log)?;
            report_events(&mut rx, global);
            success(global, format!("Updated {}", style(id).cyan()));
            Ok(())
        }
        LogCommands::Attempt {
            step,
            pass,
            fail,
            notes,
        } => {
            let outcome = match (pass, fail) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            let mut rx = watch_events(&session.store);
            session.store.record_attempt(step, outcome, &notes)?;
            report_events(&mut rx, global);
            success(
                global,
                format!("Recorded {} for {}", outcome_label(outcome), style(step).cyan()),
            );
            Ok(())
        }
        LogCommands::Unselect { step } => {
            let mut rx = watch_events(&session.store);
            session.store.unselect_step(step)?;
            report_events(&mut rx, global);
            success(global, format!("Unselected {}", style(step).cyan()));
            Ok(())
        }
        LogCommands::Template {
            work,
            product,
            from,
            operator,
            output,
        } => {
            let operator = operator.unwrap_or_else(|| session.config.operator());
            let mut draft = session.store.draft_for(work, product, &operator)?;
            if let Some(prior) = from {
                draft.parts = session.store.prefill_from_log(prior, work)?;
            }
            let body = match session.format(global, OutputFormat::Yaml) {
                OutputFormat::Json => serde_json::to_string_pretty(&draft).into_diagnostic()? + "\n",
                _ => serde_yml::to_string(&draft).into_diagnostic()?,
            };
            write_output(&body, output)
        }
        LogCommands::Submit { file, yes } => run_submit(&mut session, file, yes, global),
        LogCommands::Rm { id, yes } => {
            if !yes && console::user_attended() {
                let confirmed = Confirm::new()
                    .with_prompt(format!("Delete {} and its ledger rows?", id))
                    .default(false)
                    .interact()
                    .into_diagnostic()?;
                if !confirmed {
                    println!("Cancelled.");
                    return Ok(());
                }
            }
            let mut rx = watch_events(&session.store);
            session.store.delete_production_log(id)?;
            report_events(&mut rx, global);
            success(global, format!("Deleted {}", style(id).cyan()));
            Ok(())
        }
    }
}

fn output_list(session: &Session, logs: &[ProductionLog], global: &GlobalOpts) -> Result<()> {
    match session.format(global, OutputFormat::Tsv) {
        f @ (OutputFormat::Json | OutputFormat::Yaml) => print_structured(&logs, f),
        f => {
            if logs.is_empty() && f == OutputFormat::Tsv {
                println!("No production logs found.");
                return Ok(());
            }
            let rows = logs.iter().map(|log| {
                let state = session.store.log_state(log.id).unwrap_or_default();
                TableRow::new(log.id)
                    .cell("work", CellValue::Id(log.work_instruction_id.to_string()))
                    .cell("product", CellValue::Id(log.product_id.to_string()))
                    .cell("operator", CellValue::Text(log.operator_id.clone()))
                    .cell("batch", CellValue::Number(i64::from(log.from_batch_of)))
                    .cell("state", CellValue::State(state))
                    .cell("modified", CellValue::DateTime(log.last_modified_on))
            });
            TableFormatter::new(LOG_COLUMNS, "production log")
                .with_config(table_config(global))
                .output(rows, f);
            Ok(())
        }
    }
}

fn run_show(session: &Session, id: ProductionLogId, global: &GlobalOpts) -> Result<()> {
    let log = session
        .store
        .get_production_log(id)
        .ok_or_else(|| miette::miette!("production log {} not found", id))?;

    match session.format(global, OutputFormat::Tsv) {
        f @ (OutputFormat::Json | OutputFormat::Yaml) => return print_structured(&log, f),
        OutputFormat::Id => {
            println!("{}", log.id);
            return Ok(());
        }
        _ => {}
    }

    let wi = session.store.get_work_instruction(log.work_instruction_id);
    let step_names: HashMap<NodeId, String> = wi
        .as_ref()
        .map(|wi| {
            wi.steps()
                .map(|(node, step)| (node.id, step.name.clone()))
                .collect()
        })
        .unwrap_or_default();
    let state = session.store.log_state(id).unwrap_or_default();

    println!("{}", style("─".repeat(60)).dim());
    println!("{}: {}", style("ID").bold(), style(log.id).cyan());
    match wi {
        Some(ref wi) => println!(
            "{}: {} {} v{}",
            style("Work Instruction").bold(),
            style(wi.id).cyan(),
            wi.title,
            wi.version
        ),
        None => println!(
            "{}: {}",
            style("Work Instruction").bold(),
            log.work_instruction_id
        ),
    }
    let product = session
        .store
        .get_product(log.product_id)
        .map(|p| p.label())
        .unwrap_or_else(|| log.product_id.to_string());
    println!("{}: {}", style("Product").bold(), product);
    println!("{}: {}", style("Operator").bold(), log.operator_id);
    println!("{}: {}", style("Batch of").bold(), log.from_batch_of);
    println!("{}: {}", style("State").bold(), CellValue::State(state).raw());
    println!("{}", style("─".repeat(60)).dim());

    println!();
    println!("{} ({}):", style("Steps").bold(), log.log_steps.len());
    for step in &log.log_steps {
        let name = step_names
            .get(&step.work_instruction_step_id)
            .map(String::as_str)
            .unwrap_or("(removed step)");
        println!(
            "  {} {} {}",
            style(step.id).cyan(),
            name,
            CellValue::State(step.state()).format_tsv(0)
        );
        for attempt in &step.attempts {
            let submitted = attempt
                .submit_time
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "not submitted".to_string());
            let notes = if attempt.notes.is_empty() {
                String::new()
            } else {
                format!(" - {}", attempt.notes)
            };
            println!(
                "      {} {}{}",
                CellValue::Outcome(attempt.success).format_tsv(10),
                style(submitted).dim(),
                notes
            );
        }
    }

    let parts = session.store.parts_for_log(id);
    if !parts.is_empty() {
        println!();
        println!("{} ({}):", style("Parts").bold(), parts.len());
        for entry in &parts {
            let label = entry
                .part
                .part_definition
                .as_ref()
                .map(|d| d.to_string())
                .unwrap_or_default();
            println!(
                "  {} {} {} {}",
                CellValue::Operation(entry.operation_type).format_tsv(9),
                style(entry.part.id).cyan(),
                entry.part.serial_display(),
                style(label).dim()
            );
        }
    }
    Ok(())
}

fn run_submit(session: &mut Session, file: PathBuf, yes: bool, global: &GlobalOpts) -> Result<()> {
    let (source, name) = read_input(&file)?;
    let draft: ProductionLogDraft = parse_yaml_str(&source, &name)?;

    let confirmed = match session.store.check_submission(&draft)? {
        SubmissionCheck::Ready => false,
        SubmissionCheck::Shortfall { .. } if yes => true,
        SubmissionCheck::Shortfall { logged, required } if console::user_attended() => {
            let confirmed = Confirm::new()
                .with_prompt(format!(
                    "Only {} of {} required parts were logged. Submit anyway?",
                    logged, required
                ))
                .default(false)
                .interact()
                .into_diagnostic()?;
            if !confirmed {
                println!("Submission cancelled.");
                return Ok(());
            }
            true
        }
        SubmissionCheck::Shortfall { .. } => false,
    };

    let mut rx = watch_events(&session.store);
    let log = session.store.submit_production_log(&draft, confirmed)?;
    report_events(&mut rx, global);

    if global.format == OutputFormat::Id {
        println!("{}", log.id);
        return Ok(());
    }

    let state = session.store.log_state(log.id).unwrap_or_default();
    success(
        global,
        format!(
            "Submitted {} ({})",
            style(log.id).cyan(),
            CellValue::State(state).raw()
        ),
    );
    if let Some(part) = session.store.produced_part(log.id) {
        if !global.quiet {
            println!(
                "  produced {} {}",
                style(part.id).cyan(),
                part.serial_display()
            );
        }
    }
    Ok(())
}
