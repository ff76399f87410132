//! Error types for Project Shopfloor.

use thiserror::Error;

/// Errors raised by the shared types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShopError {
    /// A version string is not `major[.minor[.patch]]`
    #[error("Invalid version: {0:?}")]
    InvalidVersion(String),
}

/// Result type alias for Shopfloor operations.
pub type ShopResult<T> = Result<T, ShopError>;
