use thiserror::Error;

/// Failures reported by [`AvlTree`](crate::AvlTree) operations.
///
/// Every failing call leaves the tree exactly as it was.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AvlError {
    #[error("key {0} is already present")]
    DuplicateKey(i64),
    #[error("key {0} not found")]
    KeyNotFound(i64),
}

pub type Result<T> = std::result::Result<T, AvlError>;
