//! Error types for the mores core library.
//!
//! Only the I/O and parsing boundaries return errors. Compilation, masking,
//! sampling, evaluation and effect application degrade instead of failing.

use thiserror::Error;

/// Top-level error type for all mores operations that can fail.
#[derive(Error, Debug)]
pub enum MoresError {
    /// Configuration could not be parsed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A definition file could not be parsed.
    #[error("Definition error in {source_name}: {message}")]
    Definition {
        /// File name or other label of the authored source.
        source_name: String,
        /// Parser message.
        message: String,
    },

    /// Serialization or deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A baked library blob is corrupt or from an incompatible format.
    #[error("Baked library rejected: {reason}")]
    Bake {
        /// Why the blob was rejected.
        reason: String,
    },

    /// Entity not known to the host.
    #[error("Entity not found: {0}")]
    UnknownEntity(crate::EntityId),

    /// Signal id not present in the compiled library.
    #[error("Unknown signal: {0}")]
    UnknownSignal(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, MoresError>;
