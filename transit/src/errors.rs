//! Error types for value conversions and decoding

use crate::types::AttrType;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitError {
    #[error("operation not defined for values of type {0}")]
    InvalidType(AttrType),
    #[error("value does not fit the target type")]
    OutOfRange,
    #[error("unexpected end of input")]
    TruncatedInput,
}

pub type Result<T> = std::result::Result<T, TransitError>;
