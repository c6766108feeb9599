use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Expected at most one '{entity}' instance, found {count}")]
    MultipleResults { entity: String, count: usize },

    #[error("Entity type '{0}' is not registered")]
    UnknownEntity(String),

    #[error("Attribute '{attribute}' not declared on entity type '{entity}'")]
    UnknownAttribute { entity: String, attribute: String },

    #[error("Relationship '{relationship}' not declared on entity type '{entity}'")]
    UnknownRelationship { entity: String, relationship: String },

    #[error("Attribute '{0}' given more than once")]
    DuplicateAttribute(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Sequence '{0}' not found")]
    SequenceNotFound(String),

    #[error("Instance of '{0}' was invalidated by a flush or clear")]
    InvalidatedInstance(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CacheError>;

impl<T> From<std::sync::PoisonError<T>> for CacheError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Lock(err.to_string())
    }
}
