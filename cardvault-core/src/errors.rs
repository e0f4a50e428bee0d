use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Structural damage to the collection file. Fatal to the current
    /// handle; the caller decides whether to restore from backup. The
    /// on-disk file is never deleted or recreated on this path.
    #[error("collection file is corrupt: {0}")]
    CorruptDatabase(String),
    /// A constraint failed inside a transaction. The transaction has been
    /// rolled back and the handle remains usable.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    /// `transaction` was called while another transaction was open.
    #[error("a transaction is already in progress")]
    NestedTransaction,
    /// The source file for `add_file` exists but has zero bytes.
    #[error("refusing to add empty media file: {0}")]
    EmptyMedia(String),
    /// The incoming package's model differs in field or template count
    /// and the caller did not confirm the schema change.
    #[error("import rejected: incoming note type '{0}' changes the schema")]
    SchemaChangeRejected(String),
    /// A filename contains characters from the illegal set.
    #[error("illegal filename: {0}")]
    IllegalFilename(String),
    #[error("not found: {0}")]
    NotFound(&'static str),
    #[error("invalid input: {0}")]
    Invalid(&'static str),
    #[error("operation cancelled")]
    Cancelled,
    #[error("storage error: {0}")]
    Storage(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("bad json blob: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
