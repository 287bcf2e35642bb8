//! Entity contract and managed record handles.
//!
//! # Responsibility
//! - Map a Rust type to its schema name once, at compile time.
//! - Carry the identity of a record and the working context it belongs to.
//!
//! # Invariants
//! - `ENTITY_NAME` is stable for the lifetime of stored data; renaming it
//!   orphans existing records.
//! - A `Managed<T>` is only accepted by the store whose context issued it.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::ops::{Deref, DerefMut};
use uuid::Uuid;

/// Stable identifier assigned to a record on insert.
pub type RecordId = Uuid;

/// Identifier of one store working context.
pub type ContextId = Uuid;

/// A domain type persisted through a record store.
///
/// Records are stored in their serde JSON form, so every field reachable by
/// a [`crate::Predicate`] attribute path must serialize to a JSON scalar.
pub trait Entity: Serialize + DeserializeOwned {
    /// Schema name for this type. Must be non-empty and made of ASCII
    /// alphanumerics, `_` or `-`.
    const ENTITY_NAME: &'static str;

    /// Checked for every staged record before commit. Returning `Err`
    /// fails the whole commit with a validation error.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// A record bound to the working context that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Managed<T> {
    id: RecordId,
    context_id: ContextId,
    value: T,
}

impl<T> Managed<T> {
    pub(crate) fn new(id: RecordId, context_id: ContextId, value: T) -> Self {
        Self {
            id,
            context_id,
            value,
        }
    }

    pub fn id(&self) -> RecordId {
        self.id
    }

    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    /// Detaches the value from its context.
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> Deref for Managed<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for Managed<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

/// Returns whether `name` is usable as an entity name.
pub fn is_valid_entity_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
}
