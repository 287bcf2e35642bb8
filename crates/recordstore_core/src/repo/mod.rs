//! Entity-typed repositories over a record store.
//!
//! # Responsibility
//! - Expose add/query/update/delete for one entity type with implicit commit.
//! - Keep store primitives and commit bookkeeping out of caller code.
//!
//! # Invariants
//! - Store failures surface as `StoreError`; repositories never panic on them.

pub mod record_repo;
