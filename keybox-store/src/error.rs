use std::path::PathBuf;

use thiserror::Error;

/// Store and job errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Document is not well-formed XML: {0}")]
    NotXml(String),

    #[error("Path is outside the store: {}", .0.display())]
    OutsideStore(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
