//! Error type for gating caches, the engine, and the binary cache codec.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatingError {
    /// A caller-supplied value or call order the engine rejects
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error(transparent)]
    Event(#[from] flow_events::EventError),

    #[error(transparent)]
    Gate(#[from] flow_gates::GateError),

    /// The run was stopped through its cancellation flag
    #[error("Gating was cancelled")]
    Cancelled,

    /// A malformed, truncated, or unsupported cache file
    #[error("Invalid gating cache: {message}")]
    Format { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatingError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn format(message: impl Into<String>) -> Self {
        Self::Format {
            message: message.into(),
        }
    }

    /// True for errors caused by a rejected argument, including those raised while
    /// building or parsing gates
    pub fn is_invalid_argument(&self) -> bool {
        match self {
            Self::InvalidArgument { .. } => true,
            Self::Gate(err) => err.is_invalid_argument(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, GatingError>;

#[cfg(test)]
mod tests {
    use super::*;
    use flow_gates::GateError;

    #[test]
    fn test_invalid_argument_class() {
        assert!(GatingError::invalid_argument("two roots").is_invalid_argument());
        assert!(GatingError::from(GateError::UnknownGatingMethod("x".into())).is_invalid_argument());
        assert!(!GatingError::Cancelled.is_invalid_argument());
        assert!(!GatingError::format("bad magic").is_invalid_argument());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            GatingError::format("truncated header").to_string(),
            "Invalid gating cache: truncated header"
        );
    }
}
