//! Working context: pending edits staged between commits.
//!
//! # Invariants
//! - At most one pending change per record; later staging overwrites the
//!   body but never turns an insert into an update.
//! - Changes drain in first-staged order.
//! - Deleting a pending insert forgets the record entirely.

use crate::entity::RecordId;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PendingChange {
    pub(crate) entity: String,
    pub(crate) kind: ChangeKind,
    /// Serialized record; `None` for deletes.
    pub(crate) body: Option<String>,
    /// Validation failure recorded at staging time.
    pub(crate) invalid: Option<String>,
}

/// Outcome of trying to stage a body for a record.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum StageOutcome {
    Staged,
    PendingDelete,
}

#[derive(Debug, Default)]
pub(crate) struct WorkingContext {
    order: Vec<RecordId>,
    changes: HashMap<RecordId, PendingChange>,
}

impl WorkingContext {
    pub(crate) fn stage_insert(&mut self, id: RecordId, entity: &str, body: String) {
        self.put(
            id,
            PendingChange {
                entity: entity.to_string(),
                kind: ChangeKind::Insert,
                body: Some(body),
                invalid: None,
            },
        );
    }

    pub(crate) fn stage_body(
        &mut self,
        id: RecordId,
        entity: &str,
        body: String,
        invalid: Option<String>,
    ) -> StageOutcome {
        let kind = match self.changes.get(&id).map(|change| change.kind) {
            Some(ChangeKind::Delete) => return StageOutcome::PendingDelete,
            Some(ChangeKind::Insert) => ChangeKind::Insert,
            Some(ChangeKind::Update) | None => ChangeKind::Update,
        };
        self.put(
            id,
            PendingChange {
                entity: entity.to_string(),
                kind,
                body: Some(body),
                invalid,
            },
        );
        StageOutcome::Staged
    }

    pub(crate) fn stage_delete(&mut self, id: RecordId, entity: &str) {
        if matches!(
            self.changes.get(&id).map(|change| change.kind),
            Some(ChangeKind::Insert)
        ) {
            self.changes.remove(&id);
            self.order.retain(|pending| *pending != id);
            return;
        }
        self.put(
            id,
            PendingChange {
                entity: entity.to_string(),
                kind: ChangeKind::Delete,
                body: None,
                invalid: None,
            },
        );
    }

    pub(crate) fn has_changes(&self) -> bool {
        !self.order.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    /// Removes and returns every pending change in staging order.
    pub(crate) fn drain(&mut self) -> Vec<(RecordId, PendingChange)> {
        let order = std::mem::take(&mut self.order);
        let mut changes = std::mem::take(&mut self.changes);
        order
            .into_iter()
            .filter_map(|id| changes.remove(&id).map(|change| (id, change)))
            .collect()
    }

    pub(crate) fn clear(&mut self) {
        self.order.clear();
        self.changes.clear();
    }

    fn put(&mut self, id: RecordId, change: PendingChange) {
        if self.changes.insert(id, change).is_none() {
            self.order.push(id);
        }
    }
}
