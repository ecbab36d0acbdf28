//! Format selection for gate-tree files.

use crate::error::{GateError, Result};
use crate::gatingml::{gate_trees_to_gatingml, gatingml_to_gate_trees};
use crate::json::{gate_trees_from_json, gate_trees_to_json};
use crate::trees::GateTrees;
use std::path::Path;
use strum_macros::Display;
use tracing::info;

/// Text encodings a gate tree can be stored in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display)]
pub enum GateTreesFormat {
    #[default]
    #[strum(to_string = "json")]
    Json,
    #[strum(to_string = "gatingml")]
    GatingMl,
}

impl GateTreesFormat {
    /// # Errors
    /// Returns `GateError::InvalidArgument` for anything but `json`, `gatingml` or `xml`
    pub fn from_keyword_str(keyword: &str) -> Result<Self> {
        match keyword.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "gatingml" | "gating-ml" | "xml" => Ok(Self::GatingMl),
            other => Err(GateError::invalid_argument(format!("unknown gate tree format '{other}'"))),
        }
    }

    /// Guess the format from the first non-whitespace character
    pub fn detect(text: &str) -> Self {
        if text.trim_start().starts_with('<') {
            Self::GatingMl
        } else {
            Self::Json
        }
    }

    /// Guess the format from a file extension, falling back to `None` when unknown
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "json" => Some(Self::Json),
            "xml" | "gatingml" => Some(Self::GatingMl),
            _ => None,
        }
    }

    /// # Errors
    /// Returns the codec's error for malformed input
    pub fn parse(&self, text: &str) -> Result<GateTrees> {
        match self {
            Self::Json => gate_trees_from_json(text),
            Self::GatingMl => gatingml_to_gate_trees(text),
        }
    }

    /// # Errors
    /// Returns the codec's error if writing fails
    pub fn write(&self, trees: &GateTrees) -> Result<String> {
        match self {
            Self::Json => gate_trees_to_json(trees),
            Self::GatingMl => gate_trees_to_gatingml(trees),
        }
    }
}

/// Read a gate-tree file, choosing the codec from the extension or the content
/// # Errors
/// Returns an error on I/O failure or if the file cannot be parsed
pub fn read_gate_trees_from_path(path: impl AsRef<Path>) -> Result<(GateTrees, GateTreesFormat)> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    let format = GateTreesFormat::from_path(path).unwrap_or_else(|| GateTreesFormat::detect(&text));
    info!("Reading {format} gate trees from {}", path.display());
    let trees = format
        .parse(&text)
        .map_err(|e| e.with_context(path.display().to_string()))?;
    Ok((trees, format))
}

/// Write a gate-tree file in the given format
/// # Errors
/// Returns an error on I/O failure or if encoding fails
pub fn write_gate_trees_to_path(path: impl AsRef<Path>, trees: &GateTrees, format: GateTreesFormat) -> Result<()> {
    let path = path.as_ref();
    info!("Writing {} gates as {format} to {}", trees.number_of_gates(), path.display());
    std::fs::write(path, format.write(trees)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords_and_detection() {
        assert_eq!(GateTreesFormat::from_keyword_str("XML").unwrap(), GateTreesFormat::GatingMl);
        assert_eq!(GateTreesFormat::GatingMl.to_string(), "gatingml");
        assert!(GateTreesFormat::from_keyword_str("yaml").is_err());
        assert_eq!(GateTreesFormat::detect("  <?xml"), GateTreesFormat::GatingMl);
        assert_eq!(GateTreesFormat::detect("{}"), GateTreesFormat::Json);
        assert_eq!(GateTreesFormat::from_path(Path::new("gates.XML")), Some(GateTreesFormat::GatingMl));
        assert_eq!(GateTreesFormat::from_path(Path::new("gates.txt")), None);
    }
}
