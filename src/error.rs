//! Error types and result handling for mysql-replay.
//!
//! This module defines the main error type [`Error`] and a convenience
//! [`Result`] type alias used throughout the crate.

use thiserror::Error;

/// The main error type for mysql-replay operations.
///
/// This enum represents all possible errors that can occur during
/// replication, from configuration issues to runtime failures.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error from the YAML file or environment overrides.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// I/O error, typically from checkpoint file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// MySQL client or protocol error, from either the binlog source or
    /// the target connection.
    #[error("MySQL error: {0}")]
    Mysql(#[from] mysql_async::Error),

    /// A column value cannot be rendered as a SQL literal
    /// (e.g., a byte value that is not valid UTF-8).
    #[error("Encoding error: {message}")]
    Encoding {
        /// Description of the value that could not be encoded
        message: String,
    },

    /// A binlog event cannot be interpreted as a change event
    /// (e.g., missing table metadata, column count mismatch).
    #[error("Decoding error: {message}")]
    Decoding {
        /// Description of what could not be decoded
        message: String,
    },
}

impl Error {
    pub(crate) fn encoding(message: impl Into<String>) -> Self {
        Error::Encoding {
            message: message.into(),
        }
    }

    pub(crate) fn decoding(message: impl Into<String>) -> Self {
        Error::Decoding {
            message: message.into(),
        }
    }
}

/// A convenient Result type alias for mysql-replay operations.
pub type Result<T> = std::result::Result<T, Error>;
