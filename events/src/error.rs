use thiserror::Error;

/// Errors raised while building, reading, or transforming event tables.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("Parameter '{0}' not found in event table")]
    ParameterNotFound(String),

    #[error("Duplicate parameter name '{0}'")]
    DuplicateParameter(String),

    #[error("Column length mismatch for '{parameter}': expected {expected} events, got {actual}")]
    LengthMismatch {
        parameter: String,
        expected: usize,
        actual: usize,
    },

    #[error("Got {names} parameter names for {columns} columns")]
    ParameterCountMismatch { names: usize, columns: usize },

    #[error("Numeric width mismatch: table stores {table} values, got {requested}")]
    WidthMismatch {
        table: crate::NumericWidth,
        requested: crate::NumericWidth,
    },

    #[error("Unknown numeric width '{0}'")]
    UnknownWidth(String),

    #[error("Invalid {kind} transform: {message}")]
    InvalidTransform { kind: &'static str, message: String },

    #[error("Unknown transform '{0}'")]
    UnknownTransform(String),

    #[error("Parse error on line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EventError {
    pub fn invalid_transform(kind: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidTransform {
            kind,
            message: message.into(),
        }
    }

    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EventError>;
