//! `mes product` command - products and their work instructions

use clap::Subcommand;
use console::style;
use miette::Result;

use crate::cli::helpers::{print_structured, success, table_config, Session};
use crate::cli::table::{CellValue, ColumnDef, TableFormatter, TableRow};
use crate::cli::{GlobalOpts, OutputFormat};
use crate::core::identity::{ProductId, WorkInstructionId};

#[derive(Subcommand, Debug)]
pub enum ProductCommands {
    /// Create a product for a part number (the definition is added if missing)
    New {
        /// Part number the product results in
        number: String,

        /// Part name, used when the definition is new
        #[arg(long, default_value = "")]
        name: String,
    },

    /// List products
    List {
        /// Include inactive products
        #[arg(long, short = 'a')]
        all: bool,
    },

    /// Show a product and its work instructions
    Show {
        id: ProductId,
    },

    /// Allow new production logs for a product
    Activate {
        id: ProductId,
    },

    /// Hide a product from new production logs
    Deactivate {
        id: ProductId,
    },

    /// Associate a work instruction version with a product
    Link {
        product: ProductId,
        work_instruction: WorkInstructionId,
    },

    /// Remove a product/work instruction association
    Unlink {
        product: ProductId,
        work_instruction: WorkInstructionId,
    },

    /// Delete a product that has no production logs
    Rm {
        id: ProductId,
    },
}

const PRODUCT_COLUMNS: &[ColumnDef] = &[
    ColumnDef::new("number", "NUMBER", 20),
    ColumnDef::new("name", "NAME", 32),
    ColumnDef::new("active", "ACTIVE", 8),
    ColumnDef::new("work", "WORK INSTR.", 12),
];

pub fn run(cmd: ProductCommands, global: &GlobalOpts) -> Result<()> {
    let mut session = Session::open(global)?;
    match cmd {
        ProductCommands::New { number, name } => {
            let def = session.store.get_or_add_part_definition(&number, &name)?;
            let product = session.store.create_product(def.id)?;
            if global.format == OutputFormat::Id {
                println!("{}", product.id);
            } else {
                success(
                    global,
                    format!("Created {} {}", style(product.id).cyan(), product.label()),
                );
            }
            Ok(())
        }
        ProductCommands::List { all } => {
            let products = session.store.list_products(!all);
            match session.format(global, OutputFormat::Tsv) {
                f @ (OutputFormat::Json | OutputFormat::Yaml) => print_structured(&products, f),
                f => {
                    if products.is_empty() && f == OutputFormat::Tsv {
                        println!("No products found.");
                        return Ok(());
                    }
                    let rows = products.iter().map(|p| {
                        let (number, name) = p
                            .part_definition
                            .as_ref()
                            .map(|d| (d.number.clone(), d.name.clone()))
                            .unwrap_or_default();
                        TableRow::new(p.id)
                            .cell("number", CellValue::Text(number))
                            .cell("name", CellValue::Text(name))
                            .cell("active", CellValue::Flag(p.is_active))
                            .cell("work", CellValue::Number(p.work_instructions.len() as i64))
                    });
                    TableFormatter::new(PRODUCT_COLUMNS, "product")
                        .with_config(table_config(global))
                        .output(rows, f);
                    Ok(())
                }
            }
        }
        ProductCommands::Show { id } => {
            let product = session
                .store
                .get_product(id)
                .ok_or_else(|| miette::miette!("product {} not found", id))?;
            match session.format(global, OutputFormat::Tsv) {
                f @ (OutputFormat::Json | OutputFormat::Yaml) => print_structured(&product, f),
                OutputFormat::Id => {
                    println!("{}", product.id);
                    Ok(())
                }
                _ => {
                    println!("{}: {}", style("ID").bold(), style(product.id).cyan());
                    println!("{}: {}", style("Part").bold(), product.label());
                    println!(
                        "{}: {}",
                        style("Active").bold(),
                        if product.is_active { "yes" } else { "no" }
                    );
                    let instructions = session.store.work_instructions_for_product(id);
                    if !instructions.is_empty() {
                        println!();
                        println!("{} ({}):", style("Work Instructions").bold(), instructions.len());
                        for wi in &instructions {
                            let mut flags = Vec::new();
                            if wi.is_latest {
                                flags.push("latest");
                            }
                            if wi.is_active {
                                flags.push("active");
                            }
                            println!(
                                "  {} {} v{} {}",
                                style(wi.id).cyan(),
                                wi.title,
                                wi.version,
                                style(flags.join(", ")).dim()
                            );
                        }
                    }
                    Ok(())
                }
            }
        }
        ProductCommands::Activate { id } => {
            session.store.set_product_active(id, true)?;
            success(global, format!("Activated {}", style(id).cyan()));
            Ok(())
        }
        ProductCommands::Deactivate { id } => {
            session.store.set_product_active(id, false)?;
            success(global, format!("Deactivated {}", style(id).cyan()));
            Ok(())
        }
        ProductCommands::Link {
            product,
            work_instruction,
        } => {
            session
                .store
                .link_work_instruction(product, work_instruction)?;
            success(
                global,
                format!(
                    "Linked {} to {}",
                    style(work_instruction).cyan(),
                    style(product).cyan()
                ),
            );
            Ok(())
        }
        ProductCommands::Unlink {
            product,
            work_instruction,
        } => {
            session
                .store
                .unlink_work_instruction(product, work_instruction)?;
            success(
                global,
                format!(
                    "Unlinked {} from {}",
                    style(work_instruction).cyan(),
                    style(product).cyan()
                ),
            );
            Ok(())
        }
        ProductCommands::Rm { id } => {
            session.store.delete_product(id)?;
            success(global, format!("Deleted {}", style(id).cyan()));
            Ok(())
        }
    }
}
