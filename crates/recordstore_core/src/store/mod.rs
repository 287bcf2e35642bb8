//! Record store contract, error taxonomy and the SQLite implementation.
//!
//! # Responsibility
//! - Define the primitives repositories build on: fetch, insert, stage,
//!   delete, commit and discard against one working context.
//! - Classify store failures as configuration, query or commit errors.
//!
//! # Invariants
//! - Records are only staged or deleted through the context that issued
//!   them (`StoreError::ForeignRecord` otherwise).
//! - `commit` leaves the working context empty whether it succeeds or not.
//! - Fetches observe committed state only.

use crate::db::DbError;
use crate::entity::{ContextId, Entity, Managed, RecordId};
use std::error::Error;
use std::fmt::{Display, Formatter};

mod context;
mod query;
mod sqlite;

pub use query::{
    Comparison, FetchRequest, Predicate, SortDescriptor, SortDirection, SortSpec, Value,
};
pub use sqlite::SqliteStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Failure of a fetch.
#[derive(Debug)]
pub enum QueryError {
    /// Entity name is not registered with the store.
    UnknownEntity(String),
    /// Request entity differs from the record type being decoded.
    EntityMismatch { requested: String, expected: String },
    /// Attribute path is not a dotted identifier.
    InvalidAttribute(String),
    /// Predicate operand cannot be compared, e.g. a NaN real.
    InvalidValue { attribute: String, reason: String },
    /// Stored body no longer decodes into the record type.
    InvalidData(String),
    Db(DbError),
}

impl Display for QueryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownEntity(name) => write!(f, "unknown entity `{name}`"),
            Self::EntityMismatch {
                requested,
                expected,
            } => write!(
                f,
                "fetch request targets `{requested}` but records decode as `{expected}`"
            ),
            Self::InvalidAttribute(attribute) => {
                write!(f, "invalid attribute path `{attribute}`")
            }
            Self::InvalidValue { attribute, reason } => {
                write!(f, "invalid value for `{attribute}`: {reason}")
            }
            Self::InvalidData(message) => write!(f, "invalid stored record: {message}"),
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for QueryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for QueryError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Failure of a commit. Pending edits are already discarded when this is
/// returned.
#[derive(Debug)]
pub enum CommitError {
    Validation {
        entity: String,
        record: RecordId,
        message: String,
    },
    /// An updated record no longer exists in durable storage.
    Conflict { entity: String, record: RecordId },
    Db(DbError),
}

impl Display for CommitError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation {
                entity,
                record,
                message,
            } => write!(f, "{entity} {record} failed validation: {message}"),
            Self::Conflict { entity, record } => {
                write!(f, "{entity} {record} was removed before commit")
            }
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for CommitError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for CommitError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Error surfaced by stores and repositories.
#[derive(Debug)]
pub enum StoreError {
    /// Entity or store configuration cannot be resolved. Not retryable.
    Configuration(String),
    QueryFailed(QueryError),
    CommitFailed(CommitError),
    /// Record was issued by a different working context.
    ForeignRecord {
        record: RecordId,
        expected: ContextId,
        actual: ContextId,
    },
    /// Record is pending deletion in this context.
    DeletedRecord(RecordId),
    Serialization(String),
    /// Opening or bootstrapping the backing database failed.
    Db(DbError),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration(message) => write!(f, "store configuration error: {message}"),
            Self::QueryFailed(err) => write!(f, "query failed: {err}"),
            Self::CommitFailed(err) => write!(f, "commit failed: {err}"),
            Self::ForeignRecord {
                record,
                expected,
                actual,
            } => write!(
                f,
                "record {record} belongs to context {actual}, not {expected}"
            ),
            Self::DeletedRecord(record) => write!(f, "record {record} is pending deletion"),
            Self::Serialization(message) => write!(f, "record serialization failed: {message}"),
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::QueryFailed(err) => Some(err),
            Self::CommitFailed(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<QueryError> for StoreError {
    fn from(value: QueryError) -> Self {
        Self::QueryFailed(value)
    }
}

impl From<CommitError> for StoreError {
    fn from(value: CommitError) -> Self {
        Self::CommitFailed(value)
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

/// Transactional record store with one working context.
///
/// Implementations are single-threaded: callers serialize access.
pub trait Store {
    fn context_id(&self) -> ContextId;

    /// Whether `name` resolves to a registered entity schema.
    fn has_entity(&self, name: &str) -> bool;

    fn fetch<T: Entity>(&self, request: &FetchRequest) -> StoreResult<Vec<Managed<T>>>;

    /// Hands out a blank record staged for insertion.
    fn insert<T: Entity + Default>(&self) -> StoreResult<Managed<T>>;

    /// Records the current value of `record` as a pending change.
    fn stage<T: Entity>(&self, record: &Managed<T>) -> StoreResult<()>;

    fn delete<T: Entity>(&self, record: &Managed<T>) -> StoreResult<()>;

    fn has_changes(&self) -> bool;

    /// Flushes every pending change atomically. A context without changes
    /// commits trivially.
    fn commit(&self) -> StoreResult<()>;

    /// Drops every pending change.
    fn discard(&self);
}
