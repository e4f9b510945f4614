//! `mes trace` command - part ledger and genealogy

use clap::Subcommand;
use console::style;
use miette::Result;
use std::collections::HashSet;

use crate::cli::helpers::{
    print_structured, report_events, success, table_config, watch_events, Session,
};
use crate::cli::table::{CellValue, ColumnDef, TableFormatter, TableRow};
use crate::cli::{GlobalOpts, OutputFormat};
use crate::core::identity::{PartDefinitionId, ProductionLogId, SerializablePartId};
use crate::core::Store;
use crate::entities::part::SerializablePart;
use crate::entities::traceability::{LedgerEntry, PartOperation};

#[derive(Subcommand, Debug)]
pub enum TraceCommands {
    /// Every ledger row for a part (SP-N or serial number)
    History {
        part: String,
    },

    /// Genealogy tree: what went into a part, recursively
    Lineage {
        /// Part ID (SP-N) or serial number
        part: String,
    },

    /// Parts installed, produced or removed by a log
    Log {
        id: ProductionLogId,
    },

    /// Parts still installed across logs, optionally by definition
    Installed {
        /// Logs to search (repeatable)
        #[arg(long = "log", required = true)]
        logs: Vec<ProductionLogId>,

        /// Only these definitions (repeatable)
        #[arg(long = "definition")]
        definitions: Vec<PartDefinitionId>,
    },

    /// Append a ledger row by hand
    Record {
        log: ProductionLogId,
        part: SerializablePartId,
        /// installed, produced or removed
        operation: PartOperation,
    },

    /// Swap an installed part for another of the same definition
    Replace {
        log: ProductionLogId,
        old: SerializablePartId,
        new: SerializablePartId,
    },
}

const LEDGER_COLUMNS: &[ColumnDef] = &[
    ColumnDef::new("operation", "OPERATION", 10),
    ColumnDef::new("part", "PART", 10),
    ColumnDef::new("serial", "SERIAL", 24),
    ColumnDef::new("number", "NUMBER", 16),
    ColumnDef::new("name", "NAME", 28),
    ColumnDef::new("logged", "LOGGED", 18),
];

pub fn run(cmd: TraceCommands, global: &GlobalOpts) -> Result<()> {
    let mut session = Session::open(global)?;
    match cmd {
        TraceCommands::History { part } => {
            let parts = resolve_parts(&session.store, &part)?;
            let entries: Vec<LedgerEntry> = parts
                .iter()
                .flat_map(|p| session.store.part_history(p.id))
                .collect();
            output_ledger(&session, &entries, global)
        }
        TraceCommands::Lineage { part } => {
            let parts = resolve_parts(&session.store, &part)?;
            // Serials may repeat; the newest instance is the one in service
            let part = parts
                .last()
                .ok_or_else(|| miette::miette!("no part matching '{}'", part))?;
            if parts.len() > 1 {
                tracing::warn!(count = parts.len(), serial = %part.serial_display(), "serial is shared, tracing newest part");
            }
            let tree = session.store.lineage(part.id)?;

            match session.format(global, OutputFormat::Tsv) {
                f @ (OutputFormat::Json | OutputFormat::Yaml) => print_structured(&tree, f),
                OutputFormat::Id => {
                    for (_, node) in tree.walk() {
                        println!("{}", node.part.id);
                    }
                    Ok(())
                }
                _ => {
                    for (depth, node) in tree.walk() {
                        let label = node
                            .part
                            .part_definition
                            .as_ref()
                            .map(|d| d.to_string())
                            .unwrap_or_default();
                        let produced = node
                            .produced_by
                            .map(|log| format!(" <- {}", log))
                            .unwrap_or_default();
                        let branch = if depth == 0 { "" } else { "└─ " };
                        println!(
                            "{}{}{} {} {}{}",
                            "   ".repeat(depth.saturating_sub(1)),
                            branch,
                            style(node.part.id).cyan(),
                            node.part.serial_display(),
                            style(label).dim(),
                            style(produced).dim()
                        );
                    }
                    if !global.quiet {
                        println!();
                        println!("{} part(s) in genealogy.", style(tree.part_count()).cyan());
                    }
                    Ok(())
                }
            }
        }
        TraceCommands::Log { id } => {
            if session.store.get_production_log(id).is_none() {
                return Err(miette::miette!("production log {} not found", id));
            }
            let entries = session.store.parts_for_log(id);
            output_ledger(&session, &entries, global)
        }
        TraceCommands::Installed { logs, definitions } => {
            let touched: Vec<LedgerEntry> = logs
                .iter()
                .flat_map(|log| session.store.parts_for_log(*log))
                .collect();
            let definitions = if definitions.is_empty() {
                let mut all: Vec<PartDefinitionId> =
                    touched.iter().map(|e| e.part.part_definition_id).collect();
                all.sort();
                all.dedup();
                all
            } else {
                definitions
            };
            let removed: HashSet<(ProductionLogId, SerializablePartId)> = touched
                .iter()
                .filter(|e| e.operation_type == PartOperation::Removed)
                .map(|e| (e.production_log_id, e.part.id))
                .collect();

            let entries: Vec<LedgerEntry> = session
                .store
                .get_installed_for_production_logs(&logs, &definitions)
                .into_iter()
                .filter(|e| !removed.contains(&(e.production_log_id, e.part.id)))
                .collect();
            output_ledger(&session, &entries, global)
        }
        TraceCommands::Record {
            log,
            part,
            operation,
        } => {
            let mut rx = watch_events(&session.store);
            session.store.record_part(log, part, operation)?;
            report_events(&mut rx, global);
            success(
                global,
                format!(
                    "Recorded {} {} in {}",
                    operation,
                    style(part).cyan(),
                    style(log).cyan()
                ),
            );
            Ok(())
        }
        TraceCommands::Replace { log, old, new } => {
            let mut rx = watch_events(&session.store);
            session.store.replace_installed_part(log, old, new)?;
            report_events(&mut rx, global);
            success(
                global,
                format!(
                    "Replaced {} with {} in {}",
                    style(old).cyan(),
                    style(new).cyan(),
                    style(log).cyan()
                ),
            );
            Ok(())
        }
    }
}

/// Parts named by an SP-N id or carrying a serial number
fn resolve_parts(store: &Store, input: &str) -> Result<Vec<SerializablePart>> {
    if let Ok(id) = SerializablePartId::parse(input) {
        if input.contains('-') {
            return store
                .get_serializable_part(id)
                .map(|p| vec![p])
                .ok_or_else(|| miette::miette!("part {} not found", id));
        }
    }
    let parts = store.find_parts_by_serial(input);
    if parts.is_empty() {
        return Err(miette::miette!("no part with id or serial '{}'", input.trim()));
    }
    Ok(parts)
}

fn output_ledger(session: &Session, entries: &[LedgerEntry], global: &GlobalOpts) -> Result<()> {
    match session.format(global, OutputFormat::Tsv) {
        f @ (OutputFormat::Json | OutputFormat::Yaml) => print_structured(&entries, f),
        f => {
            if entries.is_empty() && f == OutputFormat::Tsv {
                println!("No ledger entries found.");
                return Ok(());
            }
            let rows = entries.iter().map(|e| {
                let (number, name) = e
                    .part
                    .part_definition
                    .as_ref()
                    .map(|d| (d.number.clone(), d.name.clone()))
                    .unwrap_or_default();
                TableRow::new(e.production_log_id)
                    .cell("operation", CellValue::Operation(e.operation_type))
                    .cell("part", CellValue::Id(e.part.id.to_string()))
                    .cell("serial", CellValue::Text(e.part.serial_display().to_string()))
                    .cell("number", CellValue::Text(number))
                    .cell("name", CellValue::Text(name))
                    .cell("logged", CellValue::DateTime(e.logged_on))
            });
            TableFormatter::new(LEDGER_COLUMNS, "ledger row")
                .with_config(table_config(global))
                .output(rows, f);
            Ok(())
        }
    }
}
