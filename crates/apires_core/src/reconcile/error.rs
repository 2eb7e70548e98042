//! Error surface of resource reconciliation and the operations around it.
//!
//! Every variant maps to a stable [`ErrorKind`] code that callers translate
//! into transport responses and that log lines carry as `error_code`.

use crate::db::DbError;
use crate::gate::GateError;
use crate::model::resource::{ResourceId, RowId};
use crate::model::validation::ResourceValidationError;
use crate::repo::resource_repo::RepoError;
use rusqlite::ErrorCode;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Child collection kinds owned by a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChildCollection {
    Claims,
    Secrets,
    Scopes,
}

impl ChildCollection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Claims => "claims",
            Self::Secrets => "secrets",
            Self::Scopes => "scopes",
        }
    }

    pub(crate) fn table(self) -> &'static str {
        match self {
            Self::Claims => "api_claims",
            Self::Secrets => "api_secrets",
            Self::Scopes => "api_scopes",
        }
    }
}

/// Stable error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    ValidationFailed,
    ReferenceError,
    ConstraintViolation,
    StorageUnavailable,
    TransactionAborted,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::ValidationFailed => "validation_failed",
            Self::ReferenceError => "reference_error",
            Self::ConstraintViolation => "constraint_violation",
            Self::StorageUnavailable => "storage_unavailable",
            Self::TransactionAborted => "transaction_aborted",
        }
    }
}

/// Failure of a resource operation. Any variant raised after the
/// transaction opened means the transaction was rolled back.
#[derive(Debug)]
pub enum ReconcileError {
    /// Resource is absent or not owned by the acting principal.
    NotFound(ResourceId),
    /// Desired state failed structural checks; nothing was opened.
    ValidationFailed(ResourceValidationError),
    /// Desired state names a child id the resource does not have.
    ReferenceError {
        collection: ChildCollection,
        id: RowId,
    },
    /// Storage rejected a write, e.g. a duplicate scope name.
    ConstraintViolation(rusqlite::Error),
    /// Database is busy, locked or unreachable.
    StorageUnavailable(StorageFault),
    /// Any other failure after the transaction opened.
    TransactionAborted(StorageFault),
}

/// Underlying failure carried by the storage-level variants.
#[derive(Debug)]
pub enum StorageFault {
    Sqlite(rusqlite::Error),
    Db(DbError),
    Repo(RepoError),
    Gate(GateError),
}

impl StorageFault {
    fn as_error(&self) -> &(dyn Error + 'static) {
        match self {
            Self::Sqlite(err) => err,
            Self::Db(err) => err,
            Self::Repo(err) => err,
            Self::Gate(err) => err,
        }
    }
}

impl Display for StorageFault {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self.as_error(), f)
    }
}

impl ReconcileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::ValidationFailed(_) => ErrorKind::ValidationFailed,
            Self::ReferenceError { .. } => ErrorKind::ReferenceError,
            Self::ConstraintViolation(_) => ErrorKind::ConstraintViolation,
            Self::StorageUnavailable(_) => ErrorKind::StorageUnavailable,
            Self::TransactionAborted(_) => ErrorKind::TransactionAborted,
        }
    }

    /// Classifies a SQLite failure.
    pub fn from_sqlite(err: rusqlite::Error) -> Self {
        let code = match &err {
            rusqlite::Error::SqliteFailure(failure, _) => Some(failure.code),
            _ => None,
        };
        match code {
            Some(ErrorCode::ConstraintViolation) => Self::ConstraintViolation(err),
            Some(
                ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure
                | ErrorCode::DiskFull
                | ErrorCode::ReadOnly,
            ) => Self::StorageUnavailable(StorageFault::Sqlite(err)),
            _ => Self::TransactionAborted(StorageFault::Sqlite(err)),
        }
    }
}

impl Display for ReconcileError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "api resource not found: {id}"),
            Self::ValidationFailed(err) => write!(f, "{err}"),
            Self::ReferenceError { collection, id } => write!(
                f,
                "{} id {id} does not belong to this resource",
                collection.as_str()
            ),
            Self::ConstraintViolation(err) => write!(f, "constraint violation: {err}"),
            Self::StorageUnavailable(fault) => write!(f, "storage unavailable: {fault}"),
            Self::TransactionAborted(fault) => write!(f, "transaction aborted: {fault}"),
        }
    }
}

impl Error for ReconcileError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::ValidationFailed(err) => Some(err),
            Self::ConstraintViolation(err) => Some(err),
            Self::StorageUnavailable(fault) | Self::TransactionAborted(fault) => {
                Some(fault.as_error())
            }
            Self::NotFound(_) | Self::ReferenceError { .. } => None,
        }
    }
}

impl From<ResourceValidationError> for ReconcileError {
    fn from(value: ResourceValidationError) -> Self {
        Self::ValidationFailed(value)
    }
}

impl From<rusqlite::Error> for ReconcileError {
    fn from(value: rusqlite::Error) -> Self {
        Self::from_sqlite(value)
    }
}

impl From<DbError> for ReconcileError {
    fn from(value: DbError) -> Self {
        match value {
            DbError::Sqlite(err) => Self::from_sqlite(err),
            other => Self::StorageUnavailable(StorageFault::Db(other)),
        }
    }
}

impl From<RepoError> for ReconcileError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::Db(err) => err.into(),
            RepoError::NotFound(id) => Self::NotFound(id),
            RepoError::Validation(err) => Self::ValidationFailed(err),
            other => Self::TransactionAborted(StorageFault::Repo(other)),
        }
    }
}

impl From<GateError> for ReconcileError {
    fn from(value: GateError) -> Self {
        Self::StorageUnavailable(StorageFault::Gate(value))
    }
}

#[cfg(test)]
mod tests {
    use super::{ErrorKind, ReconcileError};
    use crate::gate::GateError;
    use rusqlite::Connection;
    use std::error::Error;

    #[test]
    fn unique_failure_is_a_constraint_violation() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (name TEXT UNIQUE); INSERT INTO t VALUES ('a');")
            .unwrap();
        let err = conn
            .execute("INSERT INTO t VALUES ('a');", [])
            .unwrap_err();

        let err = ReconcileError::from_sqlite(err);
        assert_eq!(err.kind(), ErrorKind::ConstraintViolation);
        let source = err.source().expect("constraint violation keeps its cause");
        assert!(source.downcast_ref::<rusqlite::Error>().is_some());
    }

    #[test]
    fn gate_failure_is_kept_as_the_source() {
        let err = ReconcileError::from(GateError::new("disk gone"));

        assert_eq!(err.kind(), ErrorKind::StorageUnavailable);
        let source = err.source().expect("storage failure keeps its cause");
        assert!(source.downcast_ref::<GateError>().is_some());
        assert!(err.to_string().contains("disk gone"));
    }

    #[test]
    fn other_sqlite_failures_abort_the_transaction() {
        let conn = Connection::open_in_memory().unwrap();
        let err = conn.execute("INSERT INTO missing VALUES (1);", []).unwrap_err();

        let err = ReconcileError::from_sqlite(err);
        assert_eq!(err.kind(), ErrorKind::TransactionAborted);
        assert!(err
            .source()
            .and_then(|source| source.downcast_ref::<rusqlite::Error>())
            .is_some());
    }
}
