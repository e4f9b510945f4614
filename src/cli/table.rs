//! Table formatting utilities for CLI list commands
//!
//! List commands build [`TableRow`]s of typed [`CellValue`]s and hand them to
//! a [`TableFormatter`], which renders TSV (colored on a terminal), CSV,
//! Markdown or bare IDs.

use chrono::{DateTime, Local, Utc};
use console::style;

use crate::cli::helpers::truncate_str;
use crate::cli::OutputFormat;
use crate::entities::production_log::StepState;
use crate::entities::traceability::PartOperation;

/// Configuration for table output
#[derive(Debug, Clone)]
pub struct TableConfig {
    /// Show summary line after table (e.g., "5 production log(s) found")
    pub show_summary: bool,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self { show_summary: true }
    }
}

impl TableConfig {
    /// Create config optimized for piping (no summary)
    pub fn for_pipe() -> Self {
        Self {
            show_summary: false,
        }
    }
}

/// A typed cell value with semantic meaning for formatting
#[derive(Debug, Clone)]
pub enum CellValue {
    /// Record ID (cyan)
    Id(String),
    /// Plain text, truncated to the column width
    Text(String),
    /// Yes/no flag (yes=green, no=dim)
    Flag(bool),
    /// Step or log progress
    State(StepState),
    /// Attempt outcome (pass=green, fail=red, unselected=dim)
    Outcome(Option<bool>),
    /// Ledger operation
    Operation(PartOperation),
    /// DateTime displayed with time
    DateTime(DateTime<Utc>),
    /// Numeric value
    Number(i64),
}

impl CellValue {
    /// Format for TSV output (with colors if terminal)
    pub fn format_tsv(&self, width: usize) -> String {
        match self {
            CellValue::Id(id) => format!("{:<width$}", style(id).cyan(), width = width),
            CellValue::Text(s) => {
                let truncated = truncate_str(s, width.saturating_sub(2).max(4));
                format!("{:<width$}", truncated, width = width)
            }
            CellValue::Flag(b) => {
                let styled = if *b {
                    style("yes").green()
                } else {
                    style("no").dim()
                };
                format!("{:<width$}", styled, width = width)
            }
            CellValue::State(state) => {
                let s = state.to_string();
                let styled = match state {
                    StepState::NotStarted => style(s).dim(),
                    StepState::InProgress => style(s).yellow(),
                    StepState::Completed => style(s).green(),
                };
                format!("{:<width$}", styled, width = width)
            }
            CellValue::Outcome(outcome) => {
                let styled = match outcome {
                    Some(true) => style("pass").green(),
                    Some(false) => style("fail").red().bold(),
                    None => style("unselected").dim(),
                };
                format!("{:<width$}", styled, width = width)
            }
            CellValue::Operation(op) => {
                let styled = match op {
                    PartOperation::Installed => style(op.as_str()).cyan(),
                    PartOperation::Produced => style(op.as_str()).green(),
                    PartOperation::Removed => style(op.as_str()).red(),
                };
                format!("{:<width$}", styled, width = width)
            }
            CellValue::DateTime(dt) => {
                let local: DateTime<Local> = dt.with_timezone(&Local);
                format!("{:<width$}", local.format("%Y-%m-%d %H:%M"), width = width)
            }
            CellValue::Number(n) => format!("{:>width$}", n, width = width),
        }
    }

    /// Format for Markdown output (no colors, escaped pipes)
    pub fn format_md(&self) -> String {
        self.raw().replace('|', "\\|")
    }

    /// Get raw string value (no formatting, used for CSV and IDs)
    pub fn raw(&self) -> String {
        match self {
            CellValue::Id(id) => id.clone(),
            CellValue::Text(s) => s.clone(),
            CellValue::Flag(b) => if *b { "yes" } else { "no" }.to_string(),
            CellValue::State(state) => state.to_string(),
            CellValue::Outcome(Some(true)) => "pass".to_string(),
            CellValue::Outcome(Some(false)) => "fail".to_string(),
            CellValue::Outcome(None) => "unselected".to_string(),
            CellValue::Operation(op) => op.as_str().to_string(),
            CellValue::DateTime(dt) => {
                let local: DateTime<Local> = dt.with_timezone(&Local);
                local.format("%Y-%m-%dT%H:%M:%S").to_string()
            }
            CellValue::Number(n) => n.to_string(),
        }
    }

    /// Get the display width of this cell's content (for dynamic column sizing)
    pub fn display_width(&self) -> usize {
        match self {
            CellValue::Flag(_) => 3,
            CellValue::DateTime(_) => 16, // "YYYY-MM-DD HH:MM"
            other => other.raw().chars().count(),
        }
    }
}

/// Column definition with header label and maximum width
#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub key: &'static str,
    pub header: &'static str,
    pub width: usize,
}

impl ColumnDef {
    pub const fn new(key: &'static str, header: &'static str, width: usize) -> Self {
        Self { key, header, width }
    }
}

/// A row of cell values for table output
pub struct TableRow {
    pub id: String,
    pub cells: Vec<(&'static str, CellValue)>,
}

impl TableRow {
    pub fn new(id: impl ToString) -> Self {
        Self {
            id: id.to_string(),
            cells: Vec::new(),
        }
    }

    pub fn cell(mut self, key: &'static str, value: CellValue) -> Self {
        self.cells.push((key, value));
        self
    }

    pub fn get(&self, key: &str) -> Option<&CellValue> {
        self.cells.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }
}

/// Table formatter that outputs rows in various formats
pub struct TableFormatter<'a> {
    columns: &'a [ColumnDef],
    record_name: &'static str,
    config: TableConfig,
}

impl<'a> TableFormatter<'a> {
    pub fn new(columns: &'a [ColumnDef], record_name: &'static str) -> Self {
        Self {
            columns,
            record_name,
            config: TableConfig::default(),
        }
    }

    /// Configure the formatter with custom settings
    pub fn with_config(mut self, config: TableConfig) -> Self {
        self.config = config;
        self
    }

    /// Output rows in the specified format
    pub fn output<I>(&self, rows: I, format: OutputFormat)
    where
        I: IntoIterator<Item = TableRow>,
    {
        let rows: Vec<TableRow> = rows.into_iter().collect();
        print!("{}", self.render(&rows, format));
    }

    /// Render rows in the specified format
    pub fn render(&self, rows: &[TableRow], format: OutputFormat) -> String {
        match format {
            OutputFormat::Csv => self.render_csv(rows),
            OutputFormat::Md => self.render_md(rows),
            OutputFormat::Id => rows.iter().map(|r| format!("{}\n", r.id)).collect(),
            _ => self.render_tsv(rows),
        }
    }

    /// Calculate column widths from content, capped at each column's width
    fn calculate_widths(&self, rows: &[TableRow]) -> Vec<usize> {
        let id_width = rows
            .iter()
            .map(|r| r.id.len())
            .max()
            .unwrap_or(2)
            .max(2);

        let mut widths = vec![id_width];
        for col in self.columns {
            let max_content = rows
                .iter()
                .filter_map(|r| r.get(col.key))
                .map(CellValue::display_width)
                .max()
                .unwrap_or(0);
            let natural = col.header.len().max(max_content.saturating_add(2));
            widths.push(natural.min(col.width).max(col.header.len()));
        }
        widths
    }

    fn render_tsv(&self, rows: &[TableRow]) -> String {
        let widths = self.calculate_widths(rows);
        let mut out = String::new();

        let mut header = vec![format!("{:<width$}", style("ID").bold(), width = widths[0])];
        for (col, width) in self.columns.iter().zip(&widths[1..]) {
            header.push(format!("{:<width$}", style(col.header).bold(), width = width));
        }
        out.push_str(header.join(" ").trim_end());
        out.push('\n');

        let total_width: usize = widths.iter().sum::<usize>() + widths.len() - 1;
        out.push_str(&"-".repeat(total_width));
        out.push('\n');

        for row in rows {
            let mut parts = vec![format!("{:<width$}", style(&row.id).cyan(), width = widths[0])];
            for (col, width) in self.columns.iter().zip(&widths[1..]) {
                match row.get(col.key) {
                    Some(value) => parts.push(value.format_tsv(*width)),
                    None => parts.push(format!("{:<width$}", "-", width = width)),
                }
            }
            out.push_str(parts.join(" ").trim_end());
            out.push('\n');
        }

        if self.config.show_summary {
            out.push('\n');
            out.push_str(&format!(
                "{} {}(s) found.\n",
                style(rows.len()).cyan(),
                self.record_name
            ));
        }
        out
    }

    fn render_csv(&self, rows: &[TableRow]) -> String {
        let mut writer = csv::Writer::from_writer(Vec::new());

        let mut headers = vec!["id"];
        headers.extend(self.columns.iter().map(|c| c.key));
        // Writing to a Vec cannot fail
        let _ = writer.write_record(&headers);

        for row in rows {
            let mut record = vec![row.id.clone()];
            for col in self.columns {
                record.push(row.get(col.key).map(CellValue::raw).unwrap_or_default());
            }
            let _ = writer.write_record(&record);
        }

        writer
            .into_inner()
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .unwrap_or_default()
    }

    fn render_md(&self, rows: &[TableRow]) -> String {
        let mut out = String::new();

        let mut headers = vec!["ID"];
        headers.extend(self.columns.iter().map(|c| c.header));
        out.push_str(&format!("| {} |\n", headers.join(" | ")));
        let separators: Vec<&str> = headers.iter().map(|_| "---").collect();
        out.push_str(&format!("|{}|\n", separators.join("|")));

        for row in rows {
            let mut values = vec![row.id.clone()];
            for col in self.columns {
                values.push(
                    row.get(col.key)
                        .map(CellValue::format_md)
                        .unwrap_or_else(|| "-".to_string()),
                );
            }
            out.push_str(&format!("| {} |\n", values.join(" | ")));
        }
        out
    }
}
