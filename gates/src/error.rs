//! Errors raised while building gates, editing gate trees, and reading or writing the
//! JSON and Gating-ML gate codecs.

use std::error::Error as StdError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GateError {
    /// A shape whose geometry cannot be evaluated (too few vertices, NaN bounds, ...)
    #[error("Invalid geometry: {message}")]
    InvalidGeometry { message: String },

    /// A gate or codec value that breaks a structural rule
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Invalid argument: unknown gating method '{0}'")]
    UnknownGatingMethod(String),

    /// A dimension names a transform the gate trees do not hold
    #[error("Unknown transform reference '{0}'")]
    UnknownTransform(String),

    /// Stale gate ids and bad parent links
    #[error("Hierarchy error: {message}")]
    HierarchyError { message: String },

    #[error(transparent)]
    Transform(#[from] flow_events::EventError),

    #[error("JSON error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An error from the XML codec, or any error wrapped by [`GateError::with_context`]
    #[error("{message}")]
    Other {
        message: String,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },
}

impl GateError {
    pub fn invalid_geometry(message: impl Into<String>) -> Self {
        Self::InvalidGeometry {
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn hierarchy_error(message: impl Into<String>) -> Self {
        Self::HierarchyError {
            message: message.into(),
        }
    }

    /// True for the errors that reject a caller-supplied value
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument { .. } | Self::InvalidGeometry { .. } | Self::UnknownGatingMethod(_)
        )
    }

    /// Prefix the message with `context`, keeping the variant where it carries a message
    pub fn with_context(self, context: impl Into<String>) -> Self {
        let context = context.into();
        let prefixed = |message: String| format!("{context}: {message}");
        match self {
            Self::InvalidGeometry { message } => Self::InvalidGeometry {
                message: prefixed(message),
            },
            Self::InvalidArgument { message } => Self::InvalidArgument {
                message: prefixed(message),
            },
            Self::HierarchyError { message } => Self::HierarchyError {
                message: prefixed(message),
            },
            Self::Other { message, source } => Self::Other {
                message: prefixed(message),
                source,
            },
            other => Self::Other {
                message: prefixed(other.to_string()),
                source: Some(Box::new(other)),
            },
        }
    }
}

impl From<anyhow::Error> for GateError {
    fn from(err: anyhow::Error) -> Self {
        // the alternate format already renders the whole context chain
        Self::Other {
            message: format!("{err:#}"),
            source: None,
        }
    }
}

pub type Result<T> = std::result::Result<T, GateError>;
