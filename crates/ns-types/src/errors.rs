use thiserror::Error;

/// Main error type for the ns search system
#[derive(Error, Debug)]
pub enum NsError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A remote evaluator stopped answering: connection reset, closed by the
    /// peer, or no reply within the configured timeout.
    #[error("Evaluator unavailable{}: {message}", fmt_slot(.client_index))]
    EvaluatorUnavailable {
        client_index: Option<usize>,
        message: String,
    },

    #[error("Failed to spawn evaluator process {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

fn fmt_slot(client_index: &Option<usize>) -> String {
    match client_index {
        Some(index) => format!(" (client {index})"),
        None => String::new(),
    }
}

impl NsError {
    /// Build an [`NsError::EvaluatorUnavailable`] for a transport failure.
    pub fn unavailable(client_index: Option<usize>, message: impl Into<String>) -> Self {
        Self::EvaluatorUnavailable {
            client_index,
            message: message.into(),
        }
    }

    /// Attach a worker slot to an evaluator failure that was raised without one.
    pub fn with_client_index(self, index: usize) -> Self {
        match self {
            Self::EvaluatorUnavailable {
                client_index: None,
                message,
            } => Self::EvaluatorUnavailable {
                client_index: Some(index),
                message,
            },
            other => other,
        }
    }

    pub fn is_evaluator_unavailable(&self) -> bool {
        matches!(self, Self::EvaluatorUnavailable { .. })
    }
}

/// Result type alias for ns operations
pub type NsResult<T> = Result<T, NsError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::NsError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::NsError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::NsError::Config(format!($($arg)*))
    };
}
