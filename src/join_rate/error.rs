//! # Error Types
//!
//! Every fallible operation in the crate returns [`JoinRateError`]. Storage
//! adapters report their own [`StoreError`], which converts into
//! `JoinRateError::Store` through `?`.
//!
//! ```text
//!     Error Sources:
//!
//!     Operator input ──► InvalidArgument / Syntax   (nothing mutated)
//!     Early arrival  ──► UninitializedDefault      (event dropped, fail-closed)
//!     Builder        ──► InvalidConfig
//!     Storage port   ──► Store(StoreError)
//! ```

use std::io;

/// Errors raised by a [`PolicyStore`](super::store::PolicyStore) adapter.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing medium could not be read or written.
    #[error("policy store i/o error: {0}")]
    Io(#[from] io::Error),

    /// Stored records could not be encoded or decoded.
    #[error("policy store format error: {0}")]
    Format(#[from] serde_json::Error),
}

/// Error type for this crate.
#[derive(Debug, thiserror::Error)]
pub enum JoinRateError {
    /// Malformed admin input: a missing or unparseable rate/window.
    #[error("{0}")]
    InvalidArgument(String),

    /// The admin command does not have the expected shape.
    #[error("syntax: {0}")]
    Syntax(&'static str),

    /// A policy was resolved before the default policy was installed.
    ///
    /// This is an ordering defect in the host: arrivals must not be
    /// delivered before the store-loaded signal.
    #[error("default policy has not been initialized")]
    UninitializedDefault,

    /// Engine configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// The storage port failed; in-memory state was left untouched.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = JoinRateError> = std::result::Result<T, E>;
