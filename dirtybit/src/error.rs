use std::sync::PoisonError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {

    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serde error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not saveable struct: {0}")]
    NotSaveableStruct(String),

    #[error("not saveable: {0}")]
    NotSaveable(String),

    #[error("unsupported type: {0}")]
    UnsupportedType(String),

    #[error("unsupported key type: {0}")]
    UnsupportedKeyType(String),

    #[error("type not match: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("slice element type error: {0}")]
    SliceElemType(String),

    #[error("array length error: expected {expected}, found {found}")]
    ArrayLen { expected: usize, found: usize },

    #[error("conversion error: {0}")]
    Conversion(String),

    #[error("dynamic map needs a bytes map loader: {0}")]
    DynamicMap(String),

    #[error("unknown discriminator: {0}")]
    UnknownDiscriminator(String),

    #[error("duplicate key: {0}")]
    DuplicateKey(i64),

    #[error("entity not found: {0}")]
    EntityNotFound(i64),

    #[error("document path error: {0}")]
    DocumentPath(String),

    #[error("WRONGTYPE operation against key {0} holding the wrong kind of value")]
    WrongType(String),

    #[error("duplicate component: {0}")]
    DuplicateComponent(String),

    #[error("invalid component: {0}")]
    InvalidComponent(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl AppError {
    pub fn type_mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        AppError::TypeMismatch { expected: expected.into(), found: found.into() }
    }
}

impl<T> From<PoisonError<T>> for AppError
{
    fn from(e: PoisonError<T>) -> Self {
        AppError::Custom(format!("Poison error: {:?}", e.to_string()))
    }
}
