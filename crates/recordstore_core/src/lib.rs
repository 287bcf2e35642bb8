//! Typed record repositories over a transactional store.
//!
//! One `SqliteStore` is opened at the application root and passed by
//! reference to a `RecordRepository` per entity type.

pub mod config;
pub mod db;
pub mod entity;
pub mod logging;
pub mod repo;
pub mod store;

pub use config::{AppConfig, ConfigError, LoggingConfig, StoreConfig};
pub use entity::{ContextId, Entity, Managed, RecordId};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use repo::record_repo::RecordRepository;
pub use store::{
    CommitError, Comparison, FetchRequest, Predicate, QueryError, SortDirection, SortSpec,
    SqliteStore, Store, StoreError, StoreResult, Value,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
