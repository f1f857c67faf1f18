/// Result type for DbError
pub type DbResult<T, E = DbError> = std::result::Result<T, E>;

/// Errors that can occur while loading or saving the databases.
///
/// All of these are handled locally by the engine: a broken file is skipped,
/// a broken entry is dropped, and loading continues from the remaining
/// sources. Nothing here is ever surfaced to callers as a panic.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum DbError {
    /// Missing header, magic mismatch, or a version newer than this build
    /// understands. The whole file is skipped.
    #[error("invalid database {path}: {reason}")]
    InvalidDatabase { path: String, reason: String },

    /// The file version is older than the current one. It is still read
    /// (with all version gating applied) after a timestamped backup copy.
    #[error("stale database version {found} < {current}")]
    StaleVersion { found: u32, current: u32 },

    /// A single entry failed to parse and was skipped.
    #[error("corrupt entry: {0}")]
    CorruptEntry(String),

    /// EOF in the middle of a record. Entries read so far are retained.
    #[error("truncated file at offset {0}")]
    TruncatedFile(u64),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("binary read error: {0}")]
    Binary(#[from] crate::db::binary::Error),

    /// Cooperative cancellation. Not a failure; the loader cleans up its
    /// partial state and returns to idle.
    #[error("load cancelled")]
    Cancelled,
}
