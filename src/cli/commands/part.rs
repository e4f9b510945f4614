//! `mes part` command - part definitions and serialized instances

use clap::Subcommand;
use console::style;
use miette::Result;

use crate::cli::helpers::{print_structured, success, table_config, Session};
use crate::cli::table::{CellValue, ColumnDef, TableFormatter, TableRow};
use crate::cli::{GlobalOpts, OutputFormat};
use crate::core::identity::PartDefinitionId;
use crate::entities::part::{PartDefinition, SerializablePart};

#[derive(Subcommand, Debug)]
pub enum PartCommands {
    /// Add a part definition (returns the existing one for a known number and name)
    Add {
        /// Part number
        number: String,

        /// Descriptive name
        #[arg(default_value = "")]
        name: String,
    },

    /// List part definitions
    List {
        /// Number or name substring
        #[arg(long, short = 's')]
        search: Option<String>,
    },

    /// Delete a part definition nothing refers to
    Rm {
        /// Definition ID (PD-N)
        id: PartDefinitionId,
    },

    /// Register a part instance
    Register {
        /// Definition ID (PD-N)
        definition: PartDefinitionId,

        /// Serial number (omit for an unserialized part)
        #[arg(long)]
        serial: Option<String>,
    },

    /// List part instances
    Serials {
        /// Only instances of this definition
        #[arg(long)]
        definition: Option<PartDefinitionId>,
    },

    /// Find part instances by serial number
    Find {
        serial: String,
    },
}

const DEFINITION_COLUMNS: &[ColumnDef] = &[
    ColumnDef::new("number", "NUMBER", 24),
    ColumnDef::new("name", "NAME", 40),
];

const PART_COLUMNS: &[ColumnDef] = &[
    ColumnDef::new("serial", "SERIAL", 24),
    ColumnDef::new("definition", "DEFINITION", 12),
    ColumnDef::new("number", "NUMBER", 20),
    ColumnDef::new("name", "NAME", 32),
];

pub fn run(cmd: PartCommands, global: &GlobalOpts) -> Result<()> {
    let mut session = Session::open(global)?;
    match cmd {
        PartCommands::Add { number, name } => {
            let def = session.store.get_or_add_part_definition(&number, &name)?;
            if global.format == OutputFormat::Id {
                println!("{}", def.id);
            } else {
                success(global, format!("{} {}", style(def.id).cyan(), def));
            }
            Ok(())
        }
        PartCommands::List { search } => {
            let defs = session.store.list_part_definitions(search.as_deref());
            output_definitions(&session, &defs, global)
        }
        PartCommands::Rm { id } => {
            session.store.delete_part_definition(id)?;
            success(global, format!("Deleted {}", style(id).cyan()));
            Ok(())
        }
        PartCommands::Register { definition, serial } => {
            let part = session
                .store
                .create_serializable_part(definition, serial.as_deref())?;
            if global.format == OutputFormat::Id {
                println!("{}", part.id);
            } else {
                success(
                    global,
                    format!(
                        "Registered {} {}",
                        style(part.id).cyan(),
                        part.serial_display()
                    ),
                );
            }
            Ok(())
        }
        PartCommands::Serials { definition } => {
            let parts = session.store.list_serializable_parts(definition);
            output_parts(&session, &parts, global)
        }
        PartCommands::Find { serial } => {
            let parts = session.store.find_parts_by_serial(&serial);
            if parts.is_empty() {
                return Err(miette::miette!("no part with serial '{}'", serial.trim()));
            }
            output_parts(&session, &parts, global)
        }
    }
}

fn output_definitions(
    session: &Session,
    defs: &[PartDefinition],
    global: &GlobalOpts,
) -> Result<()> {
    match session.format(global, OutputFormat::Tsv) {
        f @ (OutputFormat::Json | OutputFormat::Yaml) => print_structured(&defs, f),
        f => {
            if defs.is_empty() && f == OutputFormat::Tsv {
                println!("No part definitions found.");
                return Ok(());
            }
            let rows = defs.iter().map(|d| {
                TableRow::new(d.id)
                    .cell("number", CellValue::Text(d.number.clone()))
                    .cell("name", CellValue::Text(d.name.clone()))
            });
            TableFormatter::new(DEFINITION_COLUMNS, "part definition")
                .with_config(table_config(global))
                .output(rows, f);
            Ok(())
        }
    }
}

fn output_parts(session: &Session, parts: &[SerializablePart], global: &GlobalOpts) -> Result<()> {
    match session.format(global, OutputFormat::Tsv) {
        f @ (OutputFormat::Json | OutputFormat::Yaml) => print_structured(&parts, f),
        f => {
            if parts.is_empty() && f == OutputFormat::Tsv {
                println!("No parts found.");
                return Ok(());
            }
            let rows = parts.iter().map(|p| {
                let (number, name) = p
                    .part_definition
                    .as_ref()
                    .map(|d| (d.number.clone(), d.name.clone()))
                    .unwrap_or_default();
                TableRow::new(p.id)
                    .cell("serial", CellValue::Text(p.serial_display().to_string()))
                    .cell("definition", CellValue::Id(p.part_definition_id.to_string()))
                    .cell("number", CellValue::Text(number))
                    .cell("name", CellValue::Text(name))
            });
            TableFormatter::new(PART_COLUMNS, "part")
                .with_config(table_config(global))
                .output(rows, f);
            Ok(())
        }
    }
}
