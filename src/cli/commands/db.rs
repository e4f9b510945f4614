//! `mes db` command - database status and read-only SQL

use clap::Subcommand;
use console::style;
use miette::Result;

use crate::cli::commands::report::{render_grid, Grid};
use crate::cli::helpers::{print_structured, Session};
use crate::cli::{GlobalOpts, OutputFormat};

#[derive(Subcommand, Debug)]
pub enum DbCommands {
    /// Record counts and database size
    Status,

    /// Print the database file location
    Path,

    /// Run a read-only SQL statement (views: production_view, traceability_view, fpy_attempts_view)
    Query {
        sql: String,
    },
}

pub fn run(cmd: DbCommands, global: &GlobalOpts) -> Result<()> {
    let session = Session::open(global)?;
    match cmd {
        DbCommands::Status => {
            let stats = session.store.stats()?;
            match session.format(global, OutputFormat::Tsv) {
                f @ (OutputFormat::Json | OutputFormat::Yaml) => print_structured(&stats, f),
                _ => {
                    let path = session
                        .store
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default();
                    println!("{}", style("MES Database").bold());
                    println!("  {}: {}", style("Project").dim(), session.project.root().display());
                    println!("  {}: {}", style("Database").dim(), path);
                    println!("  {}: {} KB", style("Size").dim(), stats.db_size_bytes / 1024);
                    println!();
                    println!("  Part definitions:     {}", stats.part_definitions);
                    println!("  Serializable parts:   {}", stats.serializable_parts);
                    println!("  Products:             {}", stats.products);
                    println!(
                        "  Work instructions:    {} ({} chain(s))",
                        stats.work_instructions, stats.work_instruction_chains
                    );
                    println!("  Production logs:      {}", stats.production_logs);
                    if !stats.ledger_rows.is_empty() {
                        println!();
                        println!("  {}:", style("Ledger").bold());
                        for (operation, count) in &stats.ledger_rows {
                            println!("    {:<10} {}", operation, count);
                        }
                    }
                    Ok(())
                }
            }
        }
        DbCommands::Path => {
            match session.store.path() {
                Some(path) => println!("{}", path.display()),
                None => println!("(in memory)"),
            }
            Ok(())
        }
        DbCommands::Query { sql } => {
            let columns = session.store.query_columns(&sql)?;
            let rows = session.store.query_raw(&sql)?;
            tracing::debug!(rows = rows.len(), "raw query");

            let headers: Vec<&str> = columns.iter().map(String::as_str).collect();
            let mut grid = Grid::new(&headers);
            grid.rows = rows;

            let format = session.format(global, OutputFormat::Auto);
            let content = match format {
                OutputFormat::Json | OutputFormat::Yaml => {
                    let records: Vec<serde_json::Map<String, serde_json::Value>> = grid
                        .rows
                        .iter()
                        .map(|row| {
                            columns
                                .iter()
                                .cloned()
                                .zip(row.iter().cloned().map(serde_json::Value::String))
                                .collect()
                        })
                        .collect();
                    return print_structured(&records, format);
                }
                other => render_grid(&grid, other)?,
            };
            print!("{}", content);
            Ok(())
        }
    }
}
