//! Error variants shared by the runtime and the reader pipeline

use thiserror::Error;
use vernier_transit::{AttrType, TransitError};

#[derive(Error, Debug)]
pub enum Error {
    /// Value conversion and decoding failures (`InvalidType`,
    /// `OutOfRange`, `TruncatedInput`).
    #[error(transparent)]
    Value(#[from] TransitError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("attribute {name} redefined with type {new_type}, keeping {existing_type}")]
    Duplicate {
        name: String,
        existing_type: AttrType,
        new_type: AttrType,
    },

    #[error("unbalanced region: {0}")]
    StackMismatch(String),

    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("record cites unknown id {0}")]
    DanglingReference(u64),

    #[error("attribute {name}: stream has type {incoming}, database has {existing}")]
    TypeConflict {
        name: String,
        existing: AttrType,
        incoming: AttrType,
    },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error at offset {pos}: {msg}")]
    Parse { pos: usize, msg: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("context tree arena is full")]
    OutOfMemory,
}

pub type Result<T> = std::result::Result<T, Error>;
