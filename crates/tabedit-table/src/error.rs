//! Error types for tables and snapshots

/// Table construction and mutation errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TableError {
    /// Column name appears twice
    #[error("duplicate column: {0}")]
    DuplicateColumn(String),

    /// Column not in the table
    #[error("unknown column: {0}")]
    UnknownColumn(String),

    /// Row index past the end
    #[error("row {index} out of range (table has {len} rows)")]
    RowOutOfRange { index: usize, len: usize },

    /// Column position past the end
    #[error("column position {position} out of range (table has {len} columns)")]
    ColumnPositionOutOfRange { position: usize, len: usize },

    /// Wire payload could not be decoded
    #[error("invalid table payload: {0}")]
    InvalidPayload(String),
}

impl From<serde_json::Error> for TableError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidPayload(err.to_string())
    }
}

/// Snapshot history errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotError {
    /// Version was never committed or has been evicted
    #[error("unknown table version: {0}")]
    UnknownVersion(u64),

    /// Nothing older than the current version to return to
    #[error("no earlier version to roll back to")]
    NothingToUndo,
}

/// Fingerprint parsing errors
#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    /// Invalid length
    #[error("invalid fingerprint length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// Hex encoding error
    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),
}
