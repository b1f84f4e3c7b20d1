//! Error types for LatticeDB.

use thiserror::Error;

/// Result type alias using LatticeError.
pub type Result<T> = std::result::Result<T, LatticeError>;

/// Errors that can occur in LatticeDB operations.
#[derive(Debug, Error)]
pub enum LatticeError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File already exists: {0}")]
    FileExists(String),

    // Storage errors
    #[error("Page not found: {page_no} in file {file}")]
    PageNotFound { file: String, page_no: u32 },

    #[error("Page corrupted: {page_no}, reason: {reason}")]
    PageCorrupted { page_no: u32, reason: String },

    #[error("Buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    #[error("Page full, unable to insert record")]
    PageFull,

    #[error("Record too large: {size} bytes (max {max})")]
    RecordTooLarge { size: usize, max: usize },

    #[error("End of file reached")]
    EndOfFile,

    // Index errors
    #[error("Index meta mismatch: {0}")]
    BadIndexInfo(String),

    #[error("Bad scan opcodes")]
    BadOpcodes,

    #[error("Bad scan range: low {low} > high {high}")]
    BadScanRange { low: i32, high: i32 },

    #[error("No key in the index satisfies the scan bounds")]
    NoSuchKeyFound,

    #[error("Scan not initialized")]
    ScanNotInitialized,

    #[error("Index scan completed")]
    IndexScanCompleted,

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}
