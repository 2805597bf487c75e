use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DbError {
    #[error("Table '{0}' already exists")]
    TableExists(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Column '{0}' not found in table '{1}'")]
    ColumnNotFound(String, String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Lock error: {0}")]
    LockError(String),

    /// A definition does not describe a buildable type.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The runtime type (or the definition behind it) is gone.
    #[error("Obsolete type: {0}")]
    Obsolete(String),

    #[error("Definition not found: {0}")]
    DefinitionNotFound(String),

    /// Transient failure while broadcasting checksum state.
    #[error("Propagation error: {0}")]
    Propagation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DbError {
    /// Errors raised by the storage backend while applying a structural change.
    pub fn is_structural_conflict(&self) -> bool {
        matches!(
            self,
            Self::TableExists(_)
                | Self::TableNotFound(_)
                | Self::ColumnNotFound(_, _)
                | Self::TypeMismatch(_)
                | Self::ConstraintViolation(_)
                | Self::ExecutionError(_)
        )
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    pub fn is_obsolete(&self) -> bool {
        matches!(self, Self::Obsolete(_))
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
