//! YAML error diagnostics pointing at the offending line

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// YAML document error with source location
#[derive(Debug, Error, Diagnostic)]
#[error("{message}")]
#[diagnostic(code(mes::yaml::syntax))]
pub struct YamlSyntaxError {
    #[source_code]
    src: NamedSource<String>,

    #[label("here")]
    span: SourceSpan,

    #[help]
    help: Option<String>,

    /// The underlying error message
    message: String,
}

impl YamlSyntaxError {
    /// Create a syntax error from a serde_yml error
    pub fn from_serde_error(err: &serde_yml::Error, source: &str, filename: &str) -> Self {
        let (line, column) = err
            .location()
            .map(|loc| (loc.line(), loc.column()))
            .unwrap_or((1, 1));

        let offset = line_col_to_offset(source, line, column);
        let message = err.to_string();
        let help = generate_help(&message);

        Self {
            src: NamedSource::new(filename, source.to_string()),
            span: SourceSpan::from(offset..offset.saturating_add(1)),
            help,
            message,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Convert a 1-based line/column to a byte offset, clamped to the source
fn line_col_to_offset(source: &str, line: usize, column: usize) -> usize {
    let line_start: usize = source
        .split_inclusive('\n')
        .take(line.saturating_sub(1))
        .map(str::len)
        .sum();
    let line_len = source[line_start.min(source.len())..]
        .split('\n')
        .next()
        .map(str::len)
        .unwrap_or(0);
    (line_start + column.saturating_sub(1).min(line_len)).min(source.len())
}

/// Suggestions for the mistakes operators make in hand-edited documents
fn generate_help(message: &str) -> Option<String> {
    let msg = message.to_lowercase();

    if msg.contains("tab") {
        return Some("YAML requires spaces for indentation, not tabs.".to_string());
    }
    if msg.contains("node_type") || msg.contains("unknown variant") {
        return Some("Each node needs `node_type: step` or `node_type: part`.".to_string());
    }
    if msg.contains("missing field") {
        return Some(
            "Steps need a `name`; part nodes need `part_number`. Run the export command for a complete example."
                .to_string(),
        );
    }
    if msg.contains("invalid type") && msg.contains("integer") {
        return Some("Ids are written as plain numbers, e.g. `7` for NODE-7.".to_string());
    }
    if msg.contains("duplicate key") {
        return Some("Each key can only appear once. Remove or rename the duplicate key.".to_string());
    }
    if msg.contains("mapping values are not allowed") {
        return Some("You may be missing a space after ':' or have incorrect indentation.".to_string());
    }

    None
}
