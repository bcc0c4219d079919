use vor_types::Version;

/// Errors from persistence operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A record that must exist was not found.
    #[error("record not found: {0}")]
    NotFound(String),

    /// Another commit was published (or is pending) since `base`.
    #[error("version conflict: commit based on {base}, repository is at {current}")]
    VersionConflict { base: Version, current: Version },

    /// `publish` or `abort` for a version that is not pending.
    #[error("no pending commit for version {0}")]
    NoPendingCommit(Version),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the underlying storage.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid snapshot magic: expected {expected}, got {actual}")]
    InvalidMagic { expected: String, actual: String },

    #[error("unsupported snapshot version: {0}")]
    UnsupportedVersion(u32),

    #[error("CRC32 mismatch: expected {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { expected: u32, computed: u32 },

    #[error("compression error: {0}")]
    Compression(String),

    /// The data is malformed or truncated.
    #[error("corrupt snapshot: {0}")]
    Corrupt(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
