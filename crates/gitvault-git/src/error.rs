//! Error types for gitvault-git

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    #[error("reference not found: {0}")]
    RefNotFound(String),

    #[error("reference changed concurrently: {0}")]
    RefConflict(String),

    #[error("invalid reference name: {0}")]
    InvalidRefName(String),

    #[error("malformed object: {0}")]
    BadObject(String),

    #[error("unknown object type: {0}")]
    UnknownObjectType(String),

    #[error("malformed config: {0}")]
    BadConfig(String),

    #[error("malformed index: {0}")]
    BadIndex(String),

    #[error("pack error: {0}")]
    Pack(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
