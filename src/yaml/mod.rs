//! YAML documents read from disk or stdin

pub mod diagnostics;

pub use diagnostics::YamlSyntaxError;

use serde::de::DeserializeOwned;

/// Parse a YAML document, mapping failures to a located diagnostic
pub fn parse_yaml_str<T: DeserializeOwned + 'static>(
    source: &str,
    filename: &str,
) -> Result<T, YamlSyntaxError> {
    serde_yml::from_str(source).map_err(|e| YamlSyntaxError::from_serde_error(&e, source, filename))
}
