//! Error taxonomy for flag administration and resolution.
//!
//! Each variant carries a stable `FFD-Exxx` code so operators and the admin
//! UI can key remediation docs off it:
//!
//! | Code     | Variant               | Surfaced as            |
//! |----------|-----------------------|------------------------|
//! | FFD-E001 | Validation            | 400 Bad Request        |
//! | FFD-E002 | Conflict              | 409 Conflict           |
//! | FFD-E003 | NotFound              | 404 Not Found          |
//! | FFD-E004 | ConfirmationRequired  | 428 Precondition Req.  |
//! | FFD-E005 | ImmutableField        | 400 Bad Request        |
//! | FFD-E100 | Configuration         | 500 (programming bug)  |
//! | FFD-E200 | Storage               | 500                    |

use thiserror::Error;

/// All failures the engine and admin operations can surface.
#[derive(Debug, Error)]
pub enum FlagError {
    /// Input failed write-time validation (bad key format, out-of-range
    /// percentage, mutation of a terminal flag, ...).
    #[error("validation failed for {field}: {message}")]
    Validation { field: String, message: String },

    /// The mutation conflicts with existing state (duplicate key, kill of a
    /// flag that is not a kill switch).
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// Flag or override does not exist.
    #[error("{what} not found")]
    NotFound { what: String },

    /// Toggle requires explicit confirmation and none was given.
    #[error("flag '{key}' requires confirmation to toggle")]
    ConfirmationRequired { key: String },

    /// Attempt to change a field that is immutable after creation.
    #[error("field '{field}' is immutable after creation")]
    ImmutableField { field: String },

    /// Internal invariant violation; a defect, not a user error.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Persistence layer failure.
    #[error("storage error: {message}")]
    Storage { message: String },
}

impl FlagError {
    /// Stable error code for this variant.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "FFD-E001",
            Self::Conflict { .. } => "FFD-E002",
            Self::NotFound { .. } => "FFD-E003",
            Self::ConfirmationRequired { .. } => "FFD-E004",
            Self::ImmutableField { .. } => "FFD-E005",
            Self::Configuration { .. } => "FFD-E100",
            Self::Storage { .. } => "FFD-E200",
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(FlagError::validation("x", "y").code(), "FFD-E001");
        assert_eq!(FlagError::conflict("dup").code(), "FFD-E002");
        assert_eq!(FlagError::not_found("flag 'z'").code(), "FFD-E003");
        assert_eq!(
            FlagError::ConfirmationRequired { key: "k".into() }.code(),
            "FFD-E004"
        );
        assert_eq!(
            FlagError::ImmutableField {
                field: "flag_key".into()
            }
            .code(),
            "FFD-E005"
        );
    }

    #[test]
    fn display_includes_context() {
        let err = FlagError::validation("flag_key", "must start with a lowercase letter");
        assert!(err.to_string().contains("flag_key"));
    }
}
