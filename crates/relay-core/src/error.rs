//! Error taxonomy for storage and domain operations.

use thiserror::Error;

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors produced by storage and domain-level operations.
///
/// Database errors are classified on construction so callers can react to
/// constraint violations and availability problems without inspecting
/// driver-specific details.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Underlying database failure that has no more specific classification.
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),

    /// A uniqueness, foreign-key, or check constraint was violated.
    #[error("constraint violation: {message}")]
    ConstraintViolation {
        /// Description of the violated constraint.
        message: String,
    },

    /// The requested entity does not exist.
    #[error("{entity} not found")]
    NotFound {
        /// Entity kind that was looked up.
        entity: &'static str,
    },

    /// Input failed domain validation before reaching the database.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// Description of the rejected input.
        message: String,
    },

    /// The storage backend is unreachable or refused the operation.
    #[error("storage unavailable: {message}")]
    Unavailable {
        /// Description of the availability failure.
        message: String,
    },
}

impl CoreError {
    /// Creates a not-found error for the given entity kind.
    pub fn not_found(entity: &'static str) -> Self {
        Self::NotFound { entity }
    }

    /// Creates an invalid-input error with the given description.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput { message: message.into() }
    }

    /// Creates an unavailable error with the given description.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable { message: message.into() }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation()
                || db_err.is_foreign_key_violation()
                || db_err.is_check_violation()
            {
                return Self::ConstraintViolation { message: db_err.message().to_owned() };
            }
        }

        match err {
            sqlx::Error::RowNotFound => Self::NotFound { entity: "row" },
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                Self::Unavailable { message: "connection pool exhausted".into() }
            }
            other => Self::Database(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_not_found_maps_to_not_found() {
        let err = CoreError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, CoreError::NotFound { entity: "row" }));
    }

    #[test]
    fn pool_exhaustion_maps_to_unavailable() {
        let err = CoreError::from(sqlx::Error::PoolClosed);
        assert!(matches!(err, CoreError::Unavailable { .. }));
    }

    #[test]
    fn constructors_render_messages() {
        assert_eq!(CoreError::not_found("account").to_string(), "account not found");
        assert_eq!(
            CoreError::invalid_input("empty token").to_string(),
            "invalid input: empty token"
        );
        assert_eq!(
            CoreError::unavailable("connection refused").to_string(),
            "storage unavailable: connection refused"
        );
    }
}
