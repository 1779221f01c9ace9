//! Error types for the authorization core

use thiserror::Error;

/// Reasons a permission string fails to parse
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermissionError {
    /// Fewer than four `::`-delimited parts
    #[error("incomplete permission, expected Service::OwnershipLevel::Action::{{ResourceHierarchy}}")]
    Incomplete,

    /// Ownership level segment is neither RO nor RL
    #[error("ownership level needs to be RO or RL, got '{0}'")]
    InvalidOwnershipLevel(String),

    /// A segment between separators is empty
    #[error("no permission part can be empty")]
    EmptySegment,
}

/// Authorization core errors
#[derive(Debug, Error)]
pub enum IamError {
    /// Permission string could not be parsed
    #[error("Malformed permission: {0}")]
    MalformedPermission(#[from] PermissionError),

    /// Lookup miss for a role, service account, service, permission or token
    #[error("{entity} {id} not found")]
    EntityNotFound { entity: &'static str, id: String },

    /// Evaluator denied the request
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Refresh lock not acquired within the retry budget
    #[error("Lock {name} not acquired after {attempts} attempts")]
    LockTimeout { name: String, attempts: u32 },

    /// Peer AM call failed or timed out
    #[error("AM delegation to {service} failed: {reason}")]
    Delegation { service: String, reason: String },

    /// A step inside a multi-step write failed; nothing was persisted
    #[error("Transaction rolled back: {0}")]
    Transaction(String),

    /// Credentials missing, malformed or rejected
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// OAuth2 provider rejected the request or was unreachable
    #[error("OAuth2 error: {0}")]
    OAuth2(String),

    /// Invalid input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IamError {
    /// Shorthand for a lookup miss
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::EntityNotFound {
            entity,
            id: id.into(),
        }
    }

    /// Whether this error is a lookup miss
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::EntityNotFound { .. })
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for IamError {
    fn from(err: sqlx::Error) -> Self {
        IamError::Database(err.to_string())
    }
}

/// Result type for authorization core operations
pub type Result<T> = std::result::Result<T, IamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = IamError::not_found("role", "r-1");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "role r-1 not found");
    }

    #[test]
    fn test_permission_error_converts() {
        let err: IamError = PermissionError::InvalidOwnershipLevel("RX".to_string()).into();
        assert!(matches!(
            err,
            IamError::MalformedPermission(PermissionError::InvalidOwnershipLevel(_))
        ));
    }
}
