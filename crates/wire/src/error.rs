//! Wire codec error types

use std::io;

/// Wire codec result type
pub type Result<T> = std::result::Result<T, CodecError>;

/// Wire codec errors
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Invalid frame: {0}")]
    Frame(String),
}
