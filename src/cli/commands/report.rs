//! `mes report` command - production, traceability and yield reports

use clap::Subcommand;
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use std::path::PathBuf;
use tabled::{builder::Builder, settings::Style};

use crate::cli::helpers::{write_output, Session};
use crate::cli::{GlobalOpts, OutputFormat};
use crate::core::identity::{ProductionLogId, WorkInstructionId};
use crate::core::store::{summarize_yield, FpyRow, ProductionRow, StepYield, TraceabilityRow};

#[derive(Subcommand, Debug)]
pub enum ReportCommands {
    /// Production logs with product, instruction and produced serial
    Production {
        /// Only logs of this work instruction version
        #[arg(long)]
        work: Option<WorkInstructionId>,

        /// Output to file instead of stdout
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Ledger rows joined with part and product
    #[clap(alias = "trace")]
    Traceability {
        /// Only rows for this serial number
        #[arg(long)]
        serial: Option<String>,

        /// Only rows of this production log
        #[arg(long)]
        log: Option<ProductionLogId>,

        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// First-pass yield per step
    Fpy {
        #[arg(long)]
        work: Option<WorkInstructionId>,

        /// One row per log step instead of per-step totals
        #[arg(long)]
        detail: bool,

        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },
}

pub fn run(cmd: ReportCommands, global: &GlobalOpts) -> Result<()> {
    let session = Session::open(global)?;
    let format = session.format(global, OutputFormat::Auto);

    match cmd {
        ReportCommands::Production { work, output } => {
            let rows = session.store.production_report(work);
            let content = render(&production_grid(&rows), &rows, format)?;
            write_output(&content, output)
        }
        ReportCommands::Traceability {
            serial,
            log,
            output,
        } => {
            let rows = session.store.traceability_report(serial.as_deref(), log);
            let content = render(&traceability_grid(&rows), &rows, format)?;
            write_output(&content, output)
        }
        ReportCommands::Fpy {
            work,
            detail,
            output,
        } => {
            let rows = session.store.fpy_report(work);
            let content = if detail {
                render(&fpy_detail_grid(&rows), &rows, format)?
            } else {
                let summary = summarize_yield(&rows);
                render(&fpy_summary_grid(&summary), &summary, format)?
            };
            write_output(&content, output)
        }
    }
}

/// Header plus string cells, ready for any tabular format
pub(crate) struct Grid {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Grid {
    pub(crate) fn new(headers: &[&str]) -> Self {
        Self {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
        }
    }
}

/// Render a report; structured formats serialize `records` directly
pub(crate) fn render<T: Serialize>(grid: &Grid, records: &T, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(records).into_diagnostic()? + "\n"),
        OutputFormat::Yaml => serde_yml::to_string(records).into_diagnostic(),
        other => render_grid(grid, other),
    }
}

/// Render a grid as a table, CSV, TSV, Markdown or first-column IDs
pub(crate) fn render_grid(grid: &Grid, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Csv => {
            let mut writer = csv::Writer::from_writer(Vec::new());
            writer.write_record(&grid.headers).into_diagnostic()?;
            for row in &grid.rows {
                writer.write_record(row).into_diagnostic()?;
            }
            let bytes = writer.into_inner().into_diagnostic()?;
            String::from_utf8(bytes).into_diagnostic()
        }
        OutputFormat::Tsv => {
            let mut out = grid.headers.join("\t");
            out.push('\n');
            for row in &grid.rows {
                out.push_str(&row.join("\t"));
                out.push('\n');
            }
            Ok(out)
        }
        OutputFormat::Id => Ok(grid
            .rows
            .iter()
            .filter_map(|r| r.first())
            .map(|id| format!("{}\n", id))
            .collect()),
        OutputFormat::Md => {
            let table = builder_for(grid);
            Ok(table.build().with(Style::markdown()).to_string() + "\n")
        }
        _ => {
            if grid.rows.is_empty() {
                return Ok("No rows.\n".to_string());
            }
            let table = builder_for(grid);
            Ok(format!(
                "{}\n{} row(s)\n",
                table.build().with(Style::rounded()),
                grid.rows.len()
            ))
        }
    }
}

fn builder_for(grid: &Grid) -> Builder {
    let mut builder = Builder::default();
    builder.push_record(grid.headers.clone());
    for row in &grid.rows {
        builder.push_record(row.clone());
    }
    builder
}

fn production_grid(rows: &[ProductionRow]) -> Grid {
    let mut grid = Grid::new(&[
        "log", "created", "operator", "batch", "product", "work instruction", "version",
        "produced serial",
    ]);
    for r in rows {
        grid.rows.push(vec![
            r.production_log_id.to_string(),
            r.created_on.clone(),
            r.operator_id.clone(),
            r.from_batch_of.to_string(),
            format!("{} {}", r.product_number, r.product_name).trim().to_string(),
            format!("{} {}", r.work_instruction_id, r.work_instruction_title),
            r.work_instruction_version.clone(),
            r.produced_serial.clone().unwrap_or_default(),
        ]);
    }
    grid
}

fn traceability_grid(rows: &[TraceabilityRow]) -> Grid {
    let mut grid = Grid::new(&[
        "log", "operation", "serial", "part number", "part name", "product", "logged",
    ]);
    for r in rows {
        grid.rows.push(vec![
            r.production_log_id.to_string(),
            r.operation_type.clone(),
            r.serial_number.clone().unwrap_or_default(),
            r.part_number.clone(),
            r.part_name.clone(),
            r.product_number.clone(),
            r.logged_on.clone(),
        ]);
    }
    grid
}

fn fpy_detail_grid(rows: &[FpyRow]) -> Grid {
    let mut grid = Grid::new(&[
        "log", "step", "name", "attempts", "first attempt", "ever passed",
    ]);
    for r in rows {
        grid.rows.push(vec![
            r.production_log_id.to_string(),
            r.production_log_step_id.to_string(),
            r.step_name.clone(),
            r.attempt_count.to_string(),
            match r.first_attempt_success {
                Some(true) => "pass",
                Some(false) => "fail",
                None => "-",
            }
            .to_string(),
            if r.ever_succeeded { "yes" } else { "no" }.to_string(),
        ]);
    }
    grid
}

fn fpy_summary_grid(summary: &[StepYield]) -> Grid {
    let mut grid = Grid::new(&[
        "node", "step", "attempted", "first pass", "eventually passed", "fpy %",
    ]);
    for s in summary {
        grid.rows.push(vec![
            s.work_instruction_step_id.to_string(),
            s.step_name.clone(),
            s.attempted.to_string(),
            s.first_pass.to_string(),
            s.eventually_passed.to_string(),
            s.first_pass_yield()
                .map(|y| format!("{:.1}", y * 100.0))
                .unwrap_or_else(|| "-".to_string()),
        ]);
    }
    grid
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> Grid {
        let mut grid = Grid::new(&["log", "name"]);
        grid.rows.push(vec!["LOG-1".to_string(), "Seat, press".to_string()]);
        grid.rows.push(vec!["LOG-2".to_string(), "Leak test".to_string()]);
        grid
    }

    #[test]
    fn test_csv_grid() {
        let out = render_grid(&grid(), OutputFormat::Csv).unwrap();
        assert_eq!(out, "log,name\nLOG-1,\"Seat, press\"\nLOG-2,Leak test\n");
    }

    #[test]
    fn test_tsv_and_ids() {
        let out = render_grid(&grid(), OutputFormat::Tsv).unwrap();
        assert_eq!(out.lines().next(), Some("log\tname"));
        let ids = render_grid(&grid(), OutputFormat::Id).unwrap();
        assert_eq!(ids, "LOG-1\nLOG-2\n");
    }

    #[test]
    fn test_table_mentions_rows() {
        let out = render_grid(&grid(), OutputFormat::Auto).unwrap();
        assert!(out.contains("Leak test"));
        assert!(out.ends_with("2 row(s)\n"));

        let empty = render_grid(&Grid::new(&["log"]), OutputFormat::Auto).unwrap();
        assert_eq!(empty, "No rows.\n");
    }

    #[test]
    fn test_markdown_grid() {
        let out = render_grid(&grid(), OutputFormat::Md).unwrap();
        assert!(out.contains("| log "));
        assert!(out.contains("LOG-2"));
    }
}
