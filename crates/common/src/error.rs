//! Error types for emudbg

use thiserror::Error;

/// Result type alias using the emudbg Error
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
