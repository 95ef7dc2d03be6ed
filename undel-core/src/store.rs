/*!
Persistence ports for undo events and the transaction boundary.

Following the same port/adapter split as the storage layer: the manager only
sees these traits, and hosts plug in whatever database they run on.
[`crate::memory::MemoryDatabase`] is the reference adapter.
*/

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::entity::EntityStore;
use crate::event::UndoEvent;
use crate::Result;

/// Storage of [`UndoEvent`] records
pub trait UndoEventStore {
    /// Persist a new event
    ///
    /// # Errors
    /// * `UndoError::Uniqueness` - If an event with the same token exists
    fn insert_event(&mut self, event: UndoEvent) -> Result<()>;

    /// Load an event by token
    fn find_event(&self, token: Uuid) -> Result<Option<UndoEvent>>;

    /// Overwrite an existing event
    ///
    /// # Errors
    /// * `UndoError::NotFound` - If no event has this token
    fn update_event(&mut self, event: &UndoEvent) -> Result<()>;

    /// Scheduled events whose deadline is at or before `now`
    fn due_events(&self, now: DateTime<Utc>) -> Result<Vec<UndoEvent>>;

    /// Every stored event, oldest first
    fn all_events(&self) -> Result<Vec<UndoEvent>>;
}

/// Transaction boundary spanning entity rows and undo events.
///
/// `transaction` must run the closure in isolation from other transactions and
/// commit only if it returns `Ok`; an `Err` discards every write it made.
/// Reads performed inside the closure are protected by the same lock as the
/// writes, which is what makes check-then-transition on an event atomic.
pub trait Database: Send + Sync {
    type Tx: EntityStore + UndoEventStore;

    fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self::Tx) -> Result<T>;
}
