/*!
# Undel Core Engine

Deletion undo for relational entity graphs.

Before an entity is destroyed, the engine captures a cycle-safe snapshot of it
and of everything its cascade relationships would remove with it, stores the
snapshot behind a time-limited token, and on request rebuilds the whole graph
with foreign keys written in a valid order.

## Architecture

- [`registry`]: the closed set of entity types, their fields and relationships
- [`snapshot`]: the builder (capture) and restorer (rebuild)
- [`event`]: undo events and their `scheduled → restored | expired | failed`
  lifecycle
- [`manager`]: `schedule`, `restore` and `finalize_expired`
- [`store`] / [`entity::EntityStore`]: persistence ports implemented by the
  host; [`memory`] is the reference adapter
- [`archive`]: compressed, hash-verified export of the event log through the
  [`storage`] and [`compression`] adapters

## Usage

```rust
use std::sync::Arc;
use undel_core::{
    DeletionUndoManager, EntityStore, EntityType, FieldDescriptor, MemoryDatabase, Record,
    RelationshipDescriptor, ScheduleRequest, TypeRegistry, Database,
};

let registry = Arc::new(
    TypeRegistry::new()
        .with_type(
            EntityType::new("Pest")
                .with_field(FieldDescriptor::text("name"))
                .with_relationship(RelationshipDescriptor::has_many(
                    "control_methods", "ControlMethod", "pest_id",
                )),
        )
        .with_type(
            EntityType::new("ControlMethod")
                .with_field(FieldDescriptor::reference("pest_id", "Pest"))
                .with_field(FieldDescriptor::text("name")),
        ),
);
let manager = DeletionUndoManager::new(Arc::clone(&registry), MemoryDatabase::new(registry));

let pest = manager
    .database()
    .transaction(|tx| tx.save(Record::new("Pest").with("name", "Aphid")))?;

let event = manager.schedule(ScheduleRequest::new(pest).actor("user:1"))?;
let restored = manager.restore(&event.token())?;
assert_eq!(restored.state.as_str(), "restored");
# Ok::<(), undel_core::UndoError>(())
```
*/

pub mod archive;
pub mod compression;
pub mod config;
pub mod entity;
pub mod error;
pub mod event;
pub mod manager;
pub mod memory;
pub mod metadata;
pub mod observability;
pub mod registry;
pub mod snapshot;
pub mod storage;
pub mod store;
pub mod value;

pub use archive::EventArchive;
pub use compression::{CompressionAdapter, GzipCompressor, NoCompression};
pub use config::UndoConfig;
pub use entity::{EntityId, EntityKey, EntityStore, Record};
pub use error::{Result, UndoError};
pub use event::{ScheduleReceipt, UndoEvent, UndoMetadata, UndoState};
pub use manager::{DeletionUndoManager, ScheduleRequest};
pub use memory::{MemoryDatabase, MemoryState};
pub use metadata::ArchiveMetadata;
pub use observability::init_observability;
pub use registry::{
    Cardinality, EntityType, FieldDescriptor, FieldKind, OnDestroy, RelationshipDescriptor,
    TypeRegistry,
};
pub use snapshot::{Snapshot, SnapshotBuilder, SnapshotRelation, SnapshotRestorer};
pub use storage::{LocalFileStorage, StorageAdapter};
pub use store::{Database, UndoEventStore};
pub use value::ScalarValue;
