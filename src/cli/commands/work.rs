//! `mes work` command - work instruction versions and chains

use clap::Subcommand;
use console::style;
use miette::{IntoDiagnostic, Result};
use std::path::PathBuf;

use crate::cli::helpers::{
    print_structured, read_input, report_events, success, table_config, watch_events,
    write_output, Session,
};
use crate::cli::table::{CellValue, ColumnDef, TableFormatter, TableRow};
use crate::cli::{GlobalOpts, OutputFormat};
use crate::core::identity::{ProductId, WorkInstructionId};
use crate::core::store::WorkInstructionFilter;
use crate::core::transfer::{
    export_work_instruction, import_work_instruction, resolve_document, ImportTarget,
    WorkInstructionDocument,
};
use crate::entities::work_instruction::{NodeKind, PartInputType, WorkInstruction};

#[derive(Subcommand, Debug)]
pub enum WorkCommands {
    /// List work instructions
    List(ListArgs),

    /// Show a work instruction version with its nodes
    Show {
        id: WorkInstructionId,
    },

    /// Import a work instruction document (YAML, `-` for stdin)
    Import {
        file: PathBuf,

        /// Add the document as the next version of this instruction's chain
        #[arg(long)]
        version_of: Option<WorkInstructionId>,

        /// Link the imported version to a product
        #[arg(long)]
        product: Option<ProductId>,
    },

    /// Export a version as a portable YAML document
    Export {
        id: WorkInstructionId,

        /// Output file (default: stdout)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Save a document over a version, or as a new version when it has production logs
    Save {
        id: WorkInstructionId,

        /// Document file (YAML, `-` for stdin)
        file: PathBuf,
    },

    /// List every version in the chain of an instruction
    Versions {
        id: WorkInstructionId,
    },

    /// Make a version the active one of its chain (must be the latest)
    Activate {
        id: WorkInstructionId,
    },

    /// Deactivate a version
    Deactivate {
        id: WorkInstructionId,
    },

    /// Delete a version without production logs
    Rm {
        id: WorkInstructionId,
    },

    /// Renumber node positions densely from 0
    Normalize {
        id: WorkInstructionId,
    },
}

#[derive(clap::Args, Debug)]
pub struct ListArgs {
    /// Only the latest version of each chain
    #[arg(long)]
    pub latest: bool,

    /// Only active versions
    #[arg(long)]
    pub active: bool,

    /// Only versions linked to this product
    #[arg(long)]
    pub product: Option<ProductId>,

    /// Title substring
    #[arg(long, short = 's')]
    pub search: Option<String>,

    /// Show count only
    #[arg(long)]
    pub count: bool,
}

const WORK_COLUMNS: &[ColumnDef] = &[
    ColumnDef::new("title", "TITLE", 36),
    ColumnDef::new("version", "VERSION", 10),
    ColumnDef::new("chain", "CHAIN", 8),
    ColumnDef::new("latest", "LATEST", 8),
    ColumnDef::new("active", "ACTIVE", 8),
    ColumnDef::new("nodes", "NODES", 6),
];

pub fn run(cmd: WorkCommands, global: &GlobalOpts) -> Result<()> {
    let mut session = Session::open(global)?;
    match cmd {
        WorkCommands::List(args) => run_list(&session, args, global),
        WorkCommands::Show { id } => run_show(&session, id, global),
        WorkCommands::Import {
            file,
            version_of,
            product,
        } => run_import(&mut session, file, version_of, product, global),
        WorkCommands::Export { id, output } => {
            let doc = export_work_instruction(&session.store, id)?;
            let yaml = doc.to_yaml().into_diagnostic()?;
            write_output(&yaml, output)
        }
        WorkCommands::Save { id, file } => run_save(&mut session, id, file, global),
        WorkCommands::Versions { id } => {
            let versions = session.store.chain_versions(id);
            if versions.is_empty() {
                return Err(miette::miette!("work instruction {} not found", id));
            }
            output_list(&session, &versions, global)
        }
        WorkCommands::Activate { id } => {
            let mut rx = watch_events(&session.store);
            let wi = session.store.activate_work_instruction(id)?;
            report_events(&mut rx, global);
            success(
                global,
                format!(
                    "Activated {} v{} of chain {}",
                    style(wi.id).cyan(),
                    wi.version,
                    style(wi.chain_id()).cyan()
                ),
            );
            Ok(())
        }
        WorkCommands::Deactivate { id } => {
            session.store.deactivate_work_instruction(id)?;
            success(global, format!("Deactivated {}", style(id).cyan()));
            Ok(())
        }
        WorkCommands::Rm { id } => {
            session.store.delete_work_instruction(id)?;
            success(global, format!("Deleted {}", style(id).cyan()));
            Ok(())
        }
        WorkCommands::Normalize { id } => {
            let changed = session.store.normalize_positions(id)?;
            success(
                global,
                format!("Renumbered {} node(s) of {}", changed, style(id).cyan()),
            );
            Ok(())
        }
    }
}

fn run_list(session: &Session, args: ListArgs, global: &GlobalOpts) -> Result<()> {
    let filter = WorkInstructionFilter {
        latest_only: args.latest,
        active_only: args.active,
        chain: None,
        product: args.product,
        search: args.search,
    };
    let instructions = session.store.list_work_instructions(&filter);

    if args.count {
        println!("{}", instructions.len());
        return Ok(());
    }
    output_list(session, &instructions, global)
}

fn output_list(
    session: &Session,
    instructions: &[WorkInstruction],
    global: &GlobalOpts,
) -> Result<()> {
    match session.format(global, OutputFormat::Tsv) {
        f @ (OutputFormat::Json | OutputFormat::Yaml) => print_structured(&instructions, f),
        f => {
            if instructions.is_empty() && f == OutputFormat::Tsv {
                println!("No work instructions found.");
                return Ok(());
            }
            let rows = instructions.iter().map(|wi| {
                TableRow::new(wi.id)
                    .cell("title", CellValue::Text(wi.title.clone()))
                    .cell("version", CellValue::Text(wi.version.clone()))
                    .cell("chain", CellValue::Id(wi.chain_id().to_string()))
                    .cell("latest", CellValue::Flag(wi.is_latest))
                    .cell("active", CellValue::Flag(wi.is_active))
                    .cell("nodes", CellValue::Number(wi.nodes.len() as i64))
            });
            TableFormatter::new(WORK_COLUMNS, "work instruction")
                .with_config(table_config(global))
                .output(rows, f);
            Ok(())
        }
    }
}

fn run_show(session: &Session, id: WorkInstructionId, global: &GlobalOpts) -> Result<()> {
    let wi = session
        .store
        .get_work_instruction(id)
        .ok_or_else(|| miette::miette!("work instruction {} not found", id))?;

    match session.format(global, OutputFormat::Tsv) {
        f @ (OutputFormat::Json | OutputFormat::Yaml) => print_structured(&wi, f),
        OutputFormat::Id => {
            println!("{}", wi.id);
            Ok(())
        }
        _ => {
            println!("{}", style("─".repeat(60)).dim());
            println!("{}: {}", style("ID").bold(), style(wi.id).cyan());
            println!("{}: {}", style("Title").bold(), style(&wi.title).yellow());
            println!("{}: {}", style("Version").bold(), wi.version);
            println!("{}: {}", style("Chain").bold(), style(wi.chain_id()).cyan());
            println!(
                "{}: latest={} active={}",
                style("State").bold(),
                wi.is_latest,
                wi.is_active
            );
            if let Some(def) = wi.part_produced_id {
                let label = session
                    .store
                    .get_part_definition(def)
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| def.to_string());
                let serialized = if wi.part_produced_is_serialized {
                    " (serialized)"
                } else {
                    ""
                };
                println!("{}: {}{}", style("Produces").bold(), label, serialized);
            }
            println!(
                "{}: {}",
                style("Production logs").bold(),
                session.store.production_log_count(wi.id)
            );
            println!("{}", style("─".repeat(60)).dim());

            if !wi.nodes.is_empty() {
                println!();
                println!("{} ({}):", style("Nodes").bold(), wi.nodes.len());
                for node in &wi.nodes {
                    match &node.kind {
                        NodeKind::Step(step) => {
                            println!(
                                "  {:>3}. {} {}",
                                node.position,
                                style(node.id).dim(),
                                step.name
                            );
                            if !step.body.is_empty() {
                                println!("       {}", style(&step.body).dim());
                            }
                        }
                        NodeKind::Part(part) => {
                            let label = part
                                .part_definition
                                .as_ref()
                                .map(|d| d.to_string())
                                .unwrap_or_else(|| part.part_definition_id.to_string());
                            let input = match part.input_type {
                                PartInputType::SerialNumber => "serial",
                                PartInputType::ProductionLogId => "log",
                            };
                            println!(
                                "  {:>3}. {} {} x{} [{}]",
                                node.position,
                                style(node.id).dim(),
                                style(label).cyan(),
                                part.quantity,
                                input
                            );
                        }
                    }
                }
            }
            Ok(())
        }
    }
}

fn run_import(
    session: &mut Session,
    file: PathBuf,
    version_of: Option<WorkInstructionId>,
    product: Option<ProductId>,
    global: &GlobalOpts,
) -> Result<()> {
    let (source, name) = read_input(&file)?;
    let doc = WorkInstructionDocument::from_yaml(&source, &name)?;

    let target = match version_of {
        Some(id) => ImportTarget::VersionOf(id),
        None => ImportTarget::NewChain,
    };

    let mut rx = watch_events(&session.store);
    let wi = import_work_instruction(&mut session.store, &doc, target)?;
    if let Some(product) = product {
        session.store.link_work_instruction(product, wi.id)?;
    }
    report_events(&mut rx, global);

    if global.format == OutputFormat::Id {
        println!("{}", wi.id);
    } else {
        success(
            global,
            format!(
                "Imported {} \"{}\" v{} ({} node(s))",
                style(wi.id).cyan(),
                wi.title,
                wi.version,
                wi.nodes.len()
            ),
        );
    }
    Ok(())
}

fn run_save(
    session: &mut Session,
    id: WorkInstructionId,
    file: PathBuf,
    global: &GlobalOpts,
) -> Result<()> {
    let current = session
        .store
        .get_work_instruction(id)
        .ok_or_else(|| miette::miette!("work instruction {} not found", id))?;

    let (source, name) = read_input(&file)?;
    let doc = WorkInstructionDocument::from_yaml(&source, &name)?;
    let mut new = resolve_document(&mut session.store, &doc)?;
    new.products = current.products.clone();

    let mut rx = watch_events(&session.store);
    let saved = session.store.save_or_version(id, &new)?;
    report_events(&mut rx, global);

    if global.format == OutputFormat::Id {
        println!("{}", saved.id);
    } else if saved.id == id {
        success(global, format!("Updated {} in place", style(id).cyan()));
    } else {
        success(
            global,
            format!(
                "{} has production logs; saved as new version {} v{}",
                style(id).cyan(),
                style(saved.id).cyan(),
                saved.version
            ),
        );
    }
    Ok(())
}
