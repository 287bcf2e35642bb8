//! Typed CRUD facade over a record store.
//!
//! # Responsibility
//! - Turn predicate-driven add/query/update/delete into store primitives
//!   followed by a single commit.
//! - Resolve the entity schema once, at construction.
//!
//! # Invariants
//! - Every mutating call either commits all of its edits or leaves the
//!   working context empty.
//! - Zero matches: `update_*` report `false`, `delete_all` reports `true`.
//!   Neither commits.

use crate::entity::{is_valid_entity_name, Entity, Managed, RecordId};
use crate::store::{
    FetchRequest, Predicate, SortSpec, SqliteStore, Store, StoreError, StoreResult,
};
use log::debug;
use std::marker::PhantomData;

/// Repository for records of one entity type.
pub struct RecordRepository<'s, T, S: Store = SqliteStore> {
    store: &'s S,
    _entity: PhantomData<fn() -> T>,
}

impl<'s, T: Entity, S: Store> RecordRepository<'s, T, S> {
    /// Binds a repository to `store`.
    ///
    /// # Errors
    /// - `StoreError::Configuration` when `T::ENTITY_NAME` is malformed or
    ///   not registered with the store.
    pub fn try_new(store: &'s S) -> StoreResult<Self> {
        if !is_valid_entity_name(T::ENTITY_NAME) {
            return Err(StoreError::Configuration(format!(
                "invalid entity name `{}`",
                T::ENTITY_NAME
            )));
        }
        if !store.has_entity(T::ENTITY_NAME) {
            return Err(StoreError::Configuration(format!(
                "entity `{}` is not registered",
                T::ENTITY_NAME
            )));
        }
        Ok(Self {
            store,
            _entity: PhantomData,
        })
    }

    /// Fetch request bound to this repository's entity, matching everything.
    pub fn fetch_request(&self) -> FetchRequest {
        FetchRequest::new(T::ENTITY_NAME)
    }

    /// Inserts a blank record, lets `mutate` populate it, then commits.
    ///
    /// On failure nothing is persisted and the returned id must not be
    /// assumed to exist.
    pub fn add<F>(&self, mutate: F) -> StoreResult<RecordId>
    where
        T: Default,
        F: FnOnce(&mut T),
    {
        let mut record = self.store.insert::<T>()?;
        mutate(&mut *record);
        let id = record.id();
        self.commit_staged(|| self.store.stage(&record))?;
        Ok(id)
    }

    /// Fetches every match, ordered by `sort` then natural order.
    pub fn query(
        &self,
        predicate: &Predicate,
        sort: Option<&SortSpec>,
    ) -> StoreResult<Vec<Managed<T>>> {
        let mut request = self.fetch_request().with_predicate(predicate.clone());
        if let Some(sort) = sort {
            request = request.with_sort(sort.clone());
        }
        self.store.fetch(&request)
    }

    /// Applies `mutate` to the first match in natural order and commits.
    ///
    /// Returns `Ok(false)` when nothing matches.
    pub fn update_first<F>(&self, predicate: &Predicate, mutate: F) -> StoreResult<bool>
    where
        F: FnOnce(&mut T),
    {
        let request = self
            .fetch_request()
            .with_predicate(predicate.clone())
            .with_limit(1);
        let Some(mut record) = self.store.fetch::<T>(&request)?.into_iter().next() else {
            debug!(
                "event=repo_update module=repo status=miss entity={} mode=first",
                T::ENTITY_NAME
            );
            return Ok(false);
        };

        mutate(&mut *record);
        self.commit_staged(|| self.store.stage(&record))?;
        Ok(true)
    }

    /// Applies `mutate` to every match and commits once.
    ///
    /// Returns `Ok(false)` when nothing matches.
    pub fn update_all<F>(&self, predicate: &Predicate, mut mutate: F) -> StoreResult<bool>
    where
        F: FnMut(&mut T),
    {
        let mut records = self.query(predicate, None)?;
        if records.is_empty() {
            debug!(
                "event=repo_update module=repo status=miss entity={} mode=all",
                T::ENTITY_NAME
            );
            return Ok(false);
        }

        for record in &mut records {
            mutate(&mut **record);
        }
        self.commit_staged(|| {
            records
                .iter()
                .try_for_each(|record| self.store.stage(record))
        })?;
        Ok(true)
    }

    /// Deletes every match and commits once.
    ///
    /// Returns `Ok(true)` when nothing matches; there is nothing to fail.
    pub fn delete_all(&self, predicate: &Predicate) -> StoreResult<bool> {
        let records = self.query(predicate, None)?;
        if records.is_empty() {
            return Ok(true);
        }

        self.commit_staged(|| {
            records
                .iter()
                .try_for_each(|record| self.store.delete(record))
        })?;
        Ok(true)
    }

    /// Commits whatever is pending in the shared working context.
    pub fn save(&self) -> StoreResult<()> {
        self.store.commit()
    }

    fn commit_staged<F>(&self, stage: F) -> StoreResult<()>
    where
        F: FnOnce() -> StoreResult<()>,
    {
        if let Err(err) = stage() {
            self.store.discard();
            return Err(err);
        }
        self.store.commit()
    }
}
