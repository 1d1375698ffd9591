use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SkyqError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("Persist: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("Cannot map {path}: {source}")]
    Map { path: PathBuf, source: std::io::Error },

    #[error("Bad index manifest {path}: {msg}")]
    BadManifest { path: PathBuf, msg: String },

    #[error("{path}: expected {expected} bytes, found {found}")]
    SizeMismatch { path: PathBuf, expected: u64, found: u64 },

    #[error("{path}: checksum mismatch")]
    ChecksumMismatch { path: PathBuf },

    #[error("{path}: missing required columns ({need})")]
    MissingColumns { path: PathBuf, need: String },

    #[error("{0}: no table header")]
    NoTableHeader(PathBuf),

    /// Bad or missing values in one catalog record; the record is skipped.
    #[error("Bad record {offset} in {path}: {msg}")]
    Record { path: PathBuf, offset: u64, msg: String },

    #[error("WCS: {0}")]
    Wcs(String),

    #[error("Index is read-only in attach mode")]
    ReadOnlyIndex,

    #[error("Unknown catalog: {0}")]
    UnknownCatalog(String),

    #[error("No search region specified")]
    NoActiveRegion,

    #[error("{0}")]
    Usage(String),
}

pub type Result<T> = std::result::Result<T, SkyqError>;
