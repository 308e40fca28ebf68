use thiserror::Error;
use zarrs::{
    array::{ArrayCreateError, ArrayError},
    group::GroupCreateError,
    storage::StorageError,
};

use crate::attribute::AttributeType;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    StorageError(#[from] StorageError),
    #[error(transparent)]
    ArrayError(#[from] ArrayError),
    #[error(transparent)]
    ArrayCreateError(#[from] ArrayCreateError),
    #[error(transparent)]
    GroupCreateError(#[from] GroupCreateError),
    #[error(transparent)]
    JSONError(#[from] serde_json::Error),
    #[error(transparent)]
    ShapeError(#[from] ndarray::ShapeError),
    #[error(transparent)]
    IOError(#[from] std::io::Error),
    #[error("Node {0} does not exist")]
    NotFound(String),
    #[error("Node {0} is not a dataset")]
    NotADataset(String),
    #[error("Node {0} already exists with a different type")]
    NodeConflict(String),
    #[error("Parent group of {0} does not exist")]
    ParentMissing(String),
    #[error("Unsupported element type {0}")]
    UnsupportedElementType(String),
    #[error("Unsupported compression {0}")]
    UnsupportedCompression(String),
    #[error("Attribute {0} is structural and cannot be set directly")]
    StructuralAttribute(String),
    #[error("Attribute {key} of type {attribute_type} is not supported by this backend")]
    UnsupportedAttribute {
        key: String,
        attribute_type: AttributeType,
    },
    #[error("Attribute {key} has type {actual}, expected {expected}")]
    AttributeTypeMismatch {
        key: String,
        expected: AttributeType,
        actual: AttributeType,
    },
    #[error("Node {0} is read only")]
    ReadOnly(String),
    #[error("Concurrent writes to {0} are not supported by this backend")]
    ConcurrentWrite(String),
    #[error("Invalid dataset attributes: {0}")]
    InvalidDatasetAttributes(String),
    #[error("Grid position {0:?} is outside of the block grid")]
    InvalidGridPosition(Vec<u64>),
    #[error("Invalid subset: {0}")]
    InvalidSubset(String),
    #[error("Block has {actual} bytes, expected {expected}")]
    InvalidBlockLength { expected: usize, actual: usize },
    #[error("Invalid path: {0}")]
    InvalidPath(String),
    #[error("Unsupported container {0}")]
    UnsupportedContainer(String),
    #[error("Invalid block {0}")]
    InvalidBlock(String),
}
