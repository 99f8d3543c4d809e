use crate::context::Phase;

pub type BackendResult<T> = Result<T, BackendError>;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("key-value store error: {0}")]
    Kv(#[from] redb::Error),
    #[cfg(feature = "duckdb")]
    #[error("duckdb error: {0}")]
    DuckDb(#[from] duckdb::Error),
    #[error("record codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("backend `{0}` is not set up")]
    NotSetUp(String),
    #[error("{0} phase cancelled")]
    Cancelled(Phase),
    #[error("{0} phase exceeded its deadline")]
    DeadlineExceeded(Phase),
    #[error("driver thread unavailable: {0}")]
    Driver(String),
    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl BackendError {
    /// True when the phase stopped because its deadline passed.
    pub fn is_deadline(&self) -> bool {
        matches!(self, BackendError::DeadlineExceeded(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, BackendError::Cancelled(_))
    }
}

// redb splits its failures across one type per operation kind.
macro_rules! kv_error_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for BackendError {
                fn from(err: $ty) -> Self {
                    BackendError::Kv(redb::Error::from(err))
                }
            }
        )*
    };
}

kv_error_from!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);
