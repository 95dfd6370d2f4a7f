//! Crate-wide error and result types.

use std::io;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors produced by the storage engine and the layers built on it.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// On-disk bytes could not be decoded as a valid structure.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// The cipher rejected the key or the ciphertext.
    #[error("cipher failure: {0}")]
    Cipher(&'static str),
    /// A value cannot be represented by the identifier encoding.
    #[error("identifier capacity exceeded: {0}")]
    Capacity(&'static str),
    /// A caller-supplied argument was rejected.
    #[error("invalid argument: {0}")]
    Invalid(String),
    /// The configuration file was missing, malformed, or inconsistent.
    #[error("configuration error: {0}")]
    Config(String),
    /// Bulk ingestion input could not be parsed.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}
