use std::fmt;

use backtrace::Backtrace;

/// Crate-wide error type.
///
/// Mirrors the taxonomy a page/buffer-pool/lock-manager implementation
/// actually needs to distinguish: precondition violations on a single page,
/// disk failures, and the two abort signals the lock manager can raise.
#[derive(Debug)]
pub enum DbError {
    Io(std::io::Error),
    PageFull,
    SlotEmpty,
    WrongPage,
    SchemaMismatch,
    DeadlockAborted,
    TimeoutAborted,
    AllPagesDirty,
    NotFound(String),
    Other(String),
}

impl DbError {
    pub fn other(msg: impl Into<String>) -> Self {
        let e = DbError::Other(msg.into());
        log::error!("{}\n{:?}", e, Backtrace::new());
        e
    }

    /// Either of the two ways a transaction is forced to abort.
    pub fn is_abort(&self) -> bool {
        matches!(self, DbError::DeadlockAborted | DbError::TimeoutAborted)
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DbError::Io(e) => write!(f, "io failure: {}", e),
            DbError::PageFull => write!(f, "page has no free slot"),
            DbError::SlotEmpty => write!(f, "slot already empty"),
            DbError::WrongPage => write!(f, "tuple does not belong to this page"),
            DbError::SchemaMismatch => write!(f, "tuple desc does not match page desc"),
            DbError::DeadlockAborted => write!(f, "transaction aborted: deadlock detected"),
            DbError::TimeoutAborted => write!(f, "transaction aborted: lock acquisition timed out"),
            DbError::AllPagesDirty => write!(f, "buffer pool exhausted: all pages dirty"),
            DbError::NotFound(what) => write!(f, "not found: {}", what),
            DbError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for DbError {}

impl From<std::io::Error> for DbError {
    fn from(e: std::io::Error) -> Self {
        DbError::Io(e)
    }
}

pub type DbResult<T> = Result<T, DbError>;
