//! SQLite-backed record store.
//!
//! # Responsibility
//! - Persist records of every registered entity as JSON documents.
//! - Own the working context and flush it in one transaction per commit.
//!
//! # Invariants
//! - Only registered entities can be fetched or written.
//! - A failed commit rolls back the SQLite transaction and empties the
//!   working context.
//! - Log events carry entity names, ids and counts, never record bodies.

use super::context::{ChangeKind, PendingChange, StageOutcome, WorkingContext};
use super::query::{compile_fetch, FetchRequest};
use super::{CommitError, QueryError, Store, StoreError, StoreResult};
use crate::config::StoreConfig;
use crate::db::{open_db, open_db_in_memory};
use crate::entity::{is_valid_entity_name, ContextId, Entity, Managed, RecordId};
use log::{debug, error, info, warn};
use rusqlite::{params, params_from_iter, Connection};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::time::Instant;
use uuid::Uuid;

/// Record store over one SQLite connection.
///
/// Not `Sync`: share it by reference within one thread.
pub struct SqliteStore {
    name: String,
    conn: Connection,
    context_id: ContextId,
    context: RefCell<WorkingContext>,
    entities: RefCell<BTreeSet<String>>,
}

impl SqliteStore {
    /// Opens the configured database and registers `config.entities`.
    ///
    /// # Errors
    /// - `Configuration` for invalid settings or entity names.
    /// - `Db` when the database cannot be opened or migrated.
    pub fn open(config: &StoreConfig) -> StoreResult<Self> {
        config
            .validate()
            .map_err(|err| StoreError::Configuration(err.to_string()))?;

        let conn = match &config.path {
            Some(path) => open_db(path, config.busy_timeout())?,
            None => open_db_in_memory(config.busy_timeout())?,
        };

        let entities = load_entities(&conn)?;
        let store = Self {
            name: config.name.clone(),
            conn,
            context_id: Uuid::new_v4(),
            context: RefCell::new(WorkingContext::default()),
            entities: RefCell::new(entities),
        };
        for entity in &config.entities {
            store.register_entity(entity)?;
        }

        info!(
            "event=store_open module=store status=ok store={} context={} entities={}",
            store.name,
            store.context_id,
            store.entities.borrow().len()
        );
        Ok(store)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers `T::ENTITY_NAME`. Idempotent.
    pub fn register<T: Entity>(&self) -> StoreResult<()> {
        self.register_entity(T::ENTITY_NAME)
    }

    /// Registers an entity schema name. Idempotent.
    pub fn register_entity(&self, name: &str) -> StoreResult<()> {
        if !is_valid_entity_name(name) {
            return Err(StoreError::Configuration(format!(
                "invalid entity name `{name}`"
            )));
        }
        if self.entities.borrow().contains(name) {
            return Ok(());
        }

        self.conn
            .execute(
                "INSERT OR IGNORE INTO entities (name) VALUES (?1);",
                [name],
            )
            .map_err(|err| StoreError::Db(err.into()))?;
        self.entities.borrow_mut().insert(name.to_string());

        info!("event=entity_register module=store status=ok entity={name}");
        Ok(())
    }

    /// Registered entity names, sorted.
    pub fn entity_names(&self) -> Vec<String> {
        self.entities.borrow().iter().cloned().collect()
    }

    /// Number of pending changes in the working context.
    pub fn pending_changes(&self) -> usize {
        self.context.borrow().len()
    }

    fn check_owner<T>(&self, record: &Managed<T>) -> StoreResult<()> {
        if record.context_id() != self.context_id {
            return Err(StoreError::ForeignRecord {
                record: record.id(),
                expected: self.context_id,
                actual: record.context_id(),
            });
        }
        Ok(())
    }

    fn apply(&self, changes: &[(RecordId, PendingChange)]) -> Result<(), CommitError> {
        if let Some((id, change)) = changes.iter().find(|(_, change)| change.invalid.is_some()) {
            return Err(CommitError::Validation {
                entity: change.entity.clone(),
                record: *id,
                message: change.invalid.clone().unwrap_or_default(),
            });
        }

        // Dropping `tx` on any early return rolls the transaction back.
        let tx = self.conn.unchecked_transaction()?;
        for (id, change) in changes {
            let id_text = id.to_string();
            match change.kind {
                ChangeKind::Insert => {
                    tx.execute(
                        "INSERT INTO records (id, entity, body) VALUES (?1, ?2, ?3);",
                        params![id_text, change.entity, change.body],
                    )?;
                }
                ChangeKind::Update => {
                    let updated = tx.execute(
                        "UPDATE records
                         SET
                            body = ?3,
                            updated_at = (strftime('%s', 'now') * 1000)
                         WHERE id = ?1
                           AND entity = ?2;",
                        params![id_text, change.entity, change.body],
                    )?;
                    if updated == 0 {
                        return Err(CommitError::Conflict {
                            entity: change.entity.clone(),
                            record: *id,
                        });
                    }
                }
                ChangeKind::Delete => {
                    let deleted = tx.execute(
                        "DELETE FROM records WHERE id = ?1 AND entity = ?2;",
                        params![id_text, change.entity],
                    )?;
                    if deleted == 0 {
                        warn!(
                            "event=store_commit module=store status=skip entity={} record={} reason=already_deleted",
                            change.entity, id
                        );
                    }
                }
            }
        }
        tx.commit()?;
        Ok(())
    }
}

impl Store for SqliteStore {
    fn context_id(&self) -> ContextId {
        self.context_id
    }

    fn has_entity(&self, name: &str) -> bool {
        self.entities.borrow().contains(name)
    }

    fn fetch<T: Entity>(&self, request: &FetchRequest) -> StoreResult<Vec<Managed<T>>> {
        let started_at = Instant::now();
        if request.entity != T::ENTITY_NAME {
            return Err(QueryError::EntityMismatch {
                requested: request.entity.clone(),
                expected: T::ENTITY_NAME.to_string(),
            }
            .into());
        }
        if !self.has_entity(&request.entity) {
            return Err(QueryError::UnknownEntity(request.entity.clone()).into());
        }

        let result = (|| -> Result<Vec<Managed<T>>, QueryError> {
            let compiled = compile_fetch(request)?;
            let mut stmt = self.conn.prepare(&compiled.sql)?;
            let mut rows = stmt.query(params_from_iter(compiled.params))?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                let id_text: String = row.get("id")?;
                let id = Uuid::parse_str(&id_text).map_err(|_| {
                    QueryError::InvalidData(format!("invalid record id `{id_text}`"))
                })?;
                let body: String = row.get("body")?;
                let value = serde_json::from_str::<T>(&body)
                    .map_err(|err| decode_error::<T>(id, &err))?;
                records.push(Managed::new(id, self.context_id, value));
            }
            Ok(records)
        })();

        match result {
            Ok(records) => {
                debug!(
                    "event=store_fetch module=store status=ok entity={} rows={} duration_ms={}",
                    T::ENTITY_NAME,
                    records.len(),
                    started_at.elapsed().as_millis()
                );
                Ok(records)
            }
            Err(err) => {
                error!(
                    "event=store_fetch module=store status=error entity={} duration_ms={} error_code=query_failed error={}",
                    T::ENTITY_NAME,
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err.into())
            }
        }
    }

    fn insert<T: Entity + Default>(&self) -> StoreResult<Managed<T>> {
        if !self.has_entity(T::ENTITY_NAME) {
            return Err(StoreError::Configuration(format!(
                "entity `{}` is not registered with store `{}`",
                T::ENTITY_NAME,
                self.name
            )));
        }
        let record = Managed::new(Uuid::new_v4(), self.context_id, T::default());
        let body = encode(&*record)?;
        self.context
            .borrow_mut()
            .stage_insert(record.id(), T::ENTITY_NAME, body);
        Ok(record)
    }

    fn stage<T: Entity>(&self, record: &Managed<T>) -> StoreResult<()> {
        self.check_owner(record)?;
        let body = encode(&**record)?;
        let invalid = record.validate().err();
        match self
            .context
            .borrow_mut()
            .stage_body(record.id(), T::ENTITY_NAME, body, invalid)
        {
            StageOutcome::Staged => Ok(()),
            StageOutcome::PendingDelete => Err(StoreError::DeletedRecord(record.id())),
        }
    }

    fn delete<T: Entity>(&self, record: &Managed<T>) -> StoreResult<()> {
        self.check_owner(record)?;
        self.context
            .borrow_mut()
            .stage_delete(record.id(), T::ENTITY_NAME);
        Ok(())
    }

    fn has_changes(&self) -> bool {
        self.context.borrow().has_changes()
    }

    fn commit(&self) -> StoreResult<()> {
        let changes = self.context.borrow_mut().drain();
        if changes.is_empty() {
            return Ok(());
        }

        let started_at = Instant::now();
        match self.apply(&changes) {
            Ok(()) => {
                info!(
                    "event=store_commit module=store status=ok store={} changes={} duration_ms={}",
                    self.name,
                    changes.len(),
                    started_at.elapsed().as_millis()
                );
                Ok(())
            }
            Err(err) => {
                error!(
                    "event=store_commit module=store status=error store={} changes={} duration_ms={} error_code=commit_failed error={}",
                    self.name,
                    changes.len(),
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(StoreError::CommitFailed(err))
            }
        }
    }

    fn discard(&self) {
        let mut context = self.context.borrow_mut();
        if context.has_changes() {
            debug!(
                "event=store_discard module=store status=ok store={} changes={}",
                self.name,
                context.len()
            );
        }
        context.clear();
    }
}

/// Describes a body that no longer decodes, without echoing any of it.
fn decode_error<T: Entity>(id: RecordId, err: &serde_json::Error) -> QueryError {
    QueryError::InvalidData(format!(
        "{} {id}: {:?} error at line {} column {}",
        T::ENTITY_NAME,
        err.classify(),
        err.line(),
        err.column()
    ))
}

fn encode<T: Entity>(value: &T) -> StoreResult<String> {
    serde_json::to_string(value)
        .map_err(|err| StoreError::Serialization(format!("{}: {err}", T::ENTITY_NAME)))
}

fn load_entities(conn: &Connection) -> StoreResult<BTreeSet<String>> {
    let load = || -> rusqlite::Result<BTreeSet<String>> {
        let mut stmt = conn.prepare("SELECT name FROM entities;")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<BTreeSet<String>>>()?;
        Ok(names)
    };
    load().map_err(|err| StoreError::Db(err.into()))
}

#[cfg(test)]
mod tests {
    use super::SqliteStore;
    use crate::config::StoreConfig;
    use crate::entity::Entity;
    use crate::store::{FetchRequest, QueryError, Store, StoreError};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Memo {
        text: String,
    }

    impl Entity for Memo {
        const ENTITY_NAME: &'static str = "Memo";
    }

    fn open_store() -> SqliteStore {
        SqliteStore::open(&StoreConfig::in_memory("unit").with_entity("Memo")).unwrap()
    }

    #[test]
    fn commit_without_changes_is_a_noop() {
        let store = open_store();
        assert!(!store.has_changes());
        store.commit().unwrap();
    }

    #[test]
    fn pending_insert_is_invisible_until_commit() {
        let store = open_store();
        let mut memo = store.insert::<Memo>().unwrap();
        memo.text = "draft".to_string();
        store.stage(&memo).unwrap();

        let request = FetchRequest::new("Memo");
        assert!(store.fetch::<Memo>(&request).unwrap().is_empty());

        store.commit().unwrap();
        let fetched = store.fetch::<Memo>(&request).unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].id(), memo.id());
        assert_eq!(fetched[0].text, "draft");
    }

    #[test]
    fn discard_drops_pending_insert() {
        let store = open_store();
        store.insert::<Memo>().unwrap();
        assert_eq!(store.pending_changes(), 1);

        store.discard();
        store.commit().unwrap();
        assert!(store.fetch::<Memo>(&FetchRequest::new("Memo")).unwrap().is_empty());
    }

    #[test]
    fn fetch_rejects_mismatched_request_entity() {
        let store = open_store();
        let err = store
            .fetch::<Memo>(&FetchRequest::new("Other"))
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::QueryFailed(QueryError::EntityMismatch { .. })
        ));
    }

    #[test]
    fn register_entity_rejects_malformed_names() {
        let store = open_store();
        let err = store.register_entity("Bad.Name").unwrap_err();
        assert!(matches!(err, StoreError::Configuration(_)));

        store.register_entity("Memo").unwrap();
        store.register_entity("Tag").unwrap();
        assert_eq!(store.entity_names(), vec!["Memo", "Tag"]);
    }
}
