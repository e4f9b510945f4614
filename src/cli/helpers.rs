//! Shared helper functions for CLI commands
//!
//! This module contains utility functions that are used across multiple
//! command modules to avoid code duplication.

use console::style;
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;

use crate::cli::table::TableConfig;
use crate::cli::{GlobalOpts, OutputFormat};
use crate::core::events::{drain, Envelope};
use crate::core::{Config, Project, Store};

/// Everything a command needs: the discovered project, its config and the open database
pub struct Session {
    pub project: Project,
    pub config: Config,
    pub store: Store,
}

impl Session {
    /// Discover the project (honoring `--project`) and open its database
    pub fn open(global: &GlobalOpts) -> Result<Self> {
        let project = match global.project {
            Some(ref root) => Project::discover_from(root),
            None => Project::discover(),
        }
        .map_err(|e| miette::miette!("{}", e))?;

        let config = Config::load(Some(&project));
        let path = project.database_path_with(&config);
        tracing::debug!(db = %path.display(), "opening database");
        let store = Store::open_path(&path)?;

        Ok(Self {
            project,
            config,
            store,
        })
    }

    /// Output format after applying `auto` and the configured default
    pub fn format(&self, global: &GlobalOpts, fallback: OutputFormat) -> OutputFormat {
        global
            .format
            .resolve(self.config.default_format.as_deref(), fallback)
    }
}

/// Table settings for this invocation; `--quiet` drops the summary line
pub fn table_config(global: &GlobalOpts) -> TableConfig {
    if global.quiet {
        TableConfig::for_pipe()
    } else {
        TableConfig::default()
    }
}

/// Listen for store events while a command runs
pub fn watch_events(store: &Store) -> broadcast::Receiver<Envelope> {
    store.events().subscribe()
}

/// Report the events a command produced; shown with `--verbose`
pub fn report_events(rx: &mut broadcast::Receiver<Envelope>, global: &GlobalOpts) {
    for event in drain(rx) {
        tracing::info!(?event, "store event");
        if global.verbose && !global.quiet {
            if let Ok(json) = serde_json::to_string(&event) {
                eprintln!("{} {}", style("event").dim(), json);
            }
        }
    }
}

/// Print a success line unless `--quiet`
pub fn success(global: &GlobalOpts, message: impl std::fmt::Display) {
    if !global.quiet {
        println!("{} {}", style("✓").green(), message);
    }
}

/// Print a value as YAML or JSON
pub fn print_structured<T: Serialize>(value: &T, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value).into_diagnostic()?;
            println!("{}", json);
        }
        _ => {
            let yaml = serde_yml::to_string(value).into_diagnostic()?;
            print!("{}", yaml);
        }
    }
    Ok(())
}

/// Read a document from a file, or stdin when the path is `-`
pub fn read_input(path: &Path) -> Result<(String, String)> {
    if path.as_os_str() == "-" {
        let mut content = String::new();
        std::io::stdin()
            .read_to_string(&mut content)
            .into_diagnostic()?;
        return Ok((content, "<stdin>".to_string()));
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| miette::miette!("cannot read {}: {}", path.display(), e))?;
    Ok((content, path.display().to_string()))
}

/// Write content to a file, or stdout when no path is given
pub fn write_output(content: &str, output_path: Option<PathBuf>) -> Result<()> {
    match output_path {
        Some(path) => {
            let file = File::create(&path).into_diagnostic()?;
            let mut writer = BufWriter::new(file);
            writer.write_all(content.as_bytes()).into_diagnostic()?;
            writer.flush().into_diagnostic()?;
            eprintln!("Written to: {}", style(path.display()).cyan());
        }
        None => {
            print!("{}", content);
        }
    }
    Ok(())
}

/// Truncate a string to max_len, adding "..." if truncated
///
/// Useful for table columns that need fixed-width output.
pub fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Render a pass/fail selection the way operators see it
pub fn outcome_label(success: Option<bool>) -> &'static str {
    match success {
        Some(true) => "pass",
        Some(false) => "fail",
        None => "unselected",
    }
}
