//! Core error types for ORDO.

use std::fmt;

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Invalid encoding
    InvalidEncoding,

    /// Proposal state moved backwards or skipped a required step
    InvalidTransition {
        /// State the proposal was in
        from: String,
        /// State that was requested
        to: String,
    },

    /// Invalid configuration value
    InvalidConfig {
        /// Offending field
        field: String,
        /// Why the value was rejected
        reason: String,
    },

    /// Validation error
    Validation {
        /// Field that failed validation
        field: String,
        /// Failure reason
        reason: String,
    },

    /// Not found
    NotFound {
        /// Kind of entity
        kind: String,
        /// Identifier that was looked up
        id: String,
    },
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEncoding => write!(f, "Invalid encoding"),
            Self::InvalidTransition { from, to } => {
                write!(f, "Invalid state transition: {} -> {}", from, to)
            }
            Self::InvalidConfig { field, reason } => {
                write!(f, "Invalid configuration for {}: {}", field, reason)
            }
            Self::Validation { field, reason } => {
                write!(f, "Validation failed for {}: {}", field, reason)
            }
            Self::NotFound { kind, id } => write!(f, "{} not found: {}", kind, id),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<serde_json::Error> for CoreError {
    fn from(_err: serde_json::Error) -> Self {
        Self::InvalidEncoding
    }
}

impl From<postcard::Error> for CoreError {
    fn from(_: postcard::Error) -> Self {
        Self::InvalidEncoding
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::InvalidEncoding;
        assert_eq!(format!("{}", err), "Invalid encoding");

        let err = CoreError::NotFound {
            kind: "Proposal".to_string(),
            id: "7".to_string(),
        };
        assert_eq!(format!("{}", err), "Proposal not found: 7");
    }

    #[test]
    fn test_transition_error() {
        let err = CoreError::InvalidTransition {
            from: "Executed".to_string(),
            to: "Approved".to_string(),
        };
        let s = format!("{}", err);
        assert!(s.contains("Executed"));
        assert!(s.contains("Approved"));
    }

    #[test]
    fn test_config_error() {
        let err = CoreError::InvalidConfig {
            field: "world_size".to_string(),
            reason: "must be at least 1".to_string(),
        };
        assert_eq!(
            format!("{}", err),
            "Invalid configuration for world_size: must be at least 1"
        );
    }

    #[test]
    fn test_postcard_error_maps_to_encoding() {
        let err: CoreError = postcard::Error::DeserializeUnexpectedEnd.into();
        assert_eq!(err, CoreError::InvalidEncoding);
    }
}
