use std::path::PathBuf;

use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MorfxErr>;

/// Everything that can go wrong inside the engine. Each variant maps to a
/// stable JSON-RPC error code via [`MorfxErr::code`]; protocol-reserved
/// codes (`-32700..-32600`) are owned by the server crate.
#[derive(Error, Debug)]
pub enum MorfxErr {
    #[error("no provider registered for language: {0}")]
    LanguageNotFound(String),

    #[error("no matches for target: {target}")]
    NoMatches { target: String },

    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("transform failed: {0}")]
    TransformFailed(String),

    #[error("{context}: {source}")]
    FileSystem {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("file too large: {} is {size} bytes (limit {limit})", path.display())]
    FileTooLarge {
        path: PathBuf,
        size: u64,
        limit: u64,
    },

    #[error("too many files: {count} (limit {limit})")]
    TooManyFiles { count: usize, limit: usize },

    #[error("total size too large: {total} bytes (limit {limit})")]
    TotalSizeTooLarge { total: u64, limit: u64 },

    #[error("file modified since staging: {} (expected {expected}, actual {actual})", path.display())]
    FileModified {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("file already locked: {}", path.display())]
    FileLocked { path: PathBuf },

    #[error("timed out waiting for lock on {}", path.display())]
    LockTimeout { path: PathBuf },

    #[error("confidence {score:.2} below per-file threshold {threshold:.2} for {}", path.display())]
    PerFileConfidenceLow {
        path: PathBuf,
        score: f64,
        threshold: f64,
    },

    #[error("confidence {score:.2} below global threshold {threshold:.2}")]
    ConfidenceTooLow { score: f64, threshold: f64 },

    #[error("atomic write failed for {}: {reason}", path.display())]
    AtomicWriteFailed { path: PathBuf, reason: String },

    #[error("backup failed for {}: {source}", path.display())]
    BackupFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("pending stage limit reached for session {session_id} (limit {limit})")]
    StageLimitExceeded { session_id: String, limit: i64 },

    #[error("apply limit reached for session {session_id} (limit {limit})")]
    ApplyLimitExceeded { session_id: String, limit: i64 },

    #[error("stage not found: {0}")]
    StageNotFound(String),

    #[error("stage {id} is {status}, not pending")]
    StageNotPending { id: String, status: String },

    #[error("stage {0} has expired")]
    StageExpired(String),

    #[error("request cancelled: {0}")]
    Cancelled(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error(transparent)]
    Storage(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl MorfxErr {
    /// Shorthand for wrapping an I/O failure with context.
    pub fn fs(context: impl Into<String>, source: std::io::Error) -> Self {
        MorfxErr::FileSystem {
            context: context.into(),
            source,
        }
    }

    /// The JSON-RPC error code for this error.
    pub fn code(&self) -> i64 {
        match self {
            MorfxErr::LanguageNotFound(_) => -32010,
            MorfxErr::NoMatches { .. } => -32011,
            MorfxErr::Syntax(_) => -32012,
            MorfxErr::TransformFailed(_) => -32013,
            MorfxErr::FileSystem { .. } => -32014,
            MorfxErr::FileTooLarge { .. } => -32020,
            MorfxErr::TooManyFiles { .. } => -32021,
            MorfxErr::TotalSizeTooLarge { .. } => -32022,
            MorfxErr::FileModified { .. } => -32023,
            MorfxErr::FileLocked { .. } => -32024,
            MorfxErr::LockTimeout { .. } => -32025,
            MorfxErr::PerFileConfidenceLow { .. } => -32026,
            MorfxErr::ConfidenceTooLow { .. } => -32027,
            MorfxErr::AtomicWriteFailed { .. } => -32028,
            MorfxErr::BackupFailed { .. } => -32029,
            MorfxErr::StageLimitExceeded { .. } => -32030,
            MorfxErr::ApplyLimitExceeded { .. } => -32031,
            MorfxErr::Cancelled(_) => -32800,
            MorfxErr::StageNotFound(_)
            | MorfxErr::StageNotPending { .. }
            | MorfxErr::StageExpired(_)
            | MorfxErr::InvalidParams(_) => -32602,
            MorfxErr::Storage(_) | MorfxErr::Internal(_) => -32603,
        }
    }

    /// Structured payload for the `data` field of a tool error, when the
    /// variant carries more than its message.
    pub fn data(&self) -> Option<serde_json::Value> {
        match self {
            MorfxErr::FileModified {
                path,
                expected,
                actual,
            } => Some(json!({
                "path": path,
                "expected": expected,
                "actual": actual,
            })),
            MorfxErr::FileTooLarge { path, size, limit } => Some(json!({
                "path": path,
                "size": size,
                "limit": limit,
            })),
            MorfxErr::PerFileConfidenceLow {
                path,
                score,
                threshold,
            } => Some(json!({
                "path": path,
                "score": score,
                "threshold": threshold,
            })),
            MorfxErr::ConfidenceTooLow { score, threshold } => Some(json!({
                "score": score,
                "threshold": threshold,
            })),
            MorfxErr::Cancelled(detail) => Some(json!({ "detail": detail })),
            _ => None,
        }
    }
}
