use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Unknown field: {0}")]
    UnknownField(String),
}

pub type RecordResult<T> = Result<T, RecordError>;
