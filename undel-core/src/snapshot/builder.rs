/*!
Snapshot capture.
*/

use std::collections::{BTreeMap, HashSet};

use serde_json::Value;
use tracing::debug;

use super::{Snapshot, SnapshotRelation};
use crate::entity::{EntityKey, EntityStore, Record};
use crate::registry::{Cardinality, TypeRegistry};
use crate::{Result, UndoError};

/// Walks a record and its cascade-owned relationships into a [`Snapshot`].
///
/// Only relationships the destroy will remove are traversed: nullified
/// relationships and reference fields pointing at owners are left alone.
pub struct SnapshotBuilder<'a, S: ?Sized> {
    registry: &'a TypeRegistry,
    store: &'a S,
}

impl<'a, S> SnapshotBuilder<'a, S>
where
    S: EntityStore + ?Sized,
{
    pub fn new(registry: &'a TypeRegistry, store: &'a S) -> Self {
        Self { registry, store }
    }

    /// Capture `record` and everything it cascade-owns.
    ///
    /// # Errors
    /// * `UndoError::Argument` - If the record has no identity (never persisted)
    /// * `UndoError::UnknownType` - If a visited type is not registered
    /// * `UndoError::ReferenceConstraint` - If a singular relationship holds
    ///   more than one row
    pub fn build(&self, record: &Record) -> Result<Snapshot> {
        if !record.is_persisted() {
            return Err(UndoError::argument(format!(
                "cannot snapshot an unsaved {}",
                record.entity_type
            )));
        }

        let mut visited = HashSet::new();
        let snapshot = self.build_node(record, &mut visited)?;
        debug!(
            entity_type = %record.entity_type,
            nodes = visited.len(),
            "Snapshot captured"
        );
        Ok(snapshot)
    }

    fn build_node(&self, record: &Record, visited: &mut HashSet<EntityKey>) -> Result<Snapshot> {
        let entity_type = self.registry.get(&record.entity_type)?;
        let key = record.key().ok_or_else(|| {
            UndoError::argument(format!(
                "related {} row has no identity",
                record.entity_type
            ))
        })?;

        if visited.contains(&key) {
            return Ok(Snapshot::reference(
                entity_type.name.clone(),
                &entity_type.identity_field,
                key.id,
            ));
        }
        visited.insert(key.clone());

        let mut attributes = BTreeMap::new();
        attributes.insert(entity_type.identity_field.clone(), Value::from(key.id));
        for field in &entity_type.fields {
            attributes.insert(field.name.clone(), record.get(&field.name).to_portable());
        }

        let mut relationships = BTreeMap::new();
        for relationship in entity_type.cascade_relationships() {
            let children = self.store.related(record, relationship)?;
            if children.is_empty() {
                continue;
            }

            let value = match relationship.cardinality {
                Cardinality::One => {
                    // destroy cascades to every row holding the key, so all of them must fit
                    let [child] = children.as_slice() else {
                        return Err(UndoError::ReferenceConstraint(format!(
                            "{key} has {} rows in singular relationship {}",
                            children.len(),
                            relationship.name
                        )));
                    };
                    SnapshotRelation::One(Box::new(self.build_node(child, visited)?))
                }
                Cardinality::Many => SnapshotRelation::Many(
                    children
                        .iter()
                        .map(|child| self.build_node(child, visited))
                        .collect::<Result<Vec<_>>>()?,
                ),
            };
            relationships.insert(relationship.name.clone(), value);
        }

        Ok(Snapshot {
            entity_type: entity_type.name.clone(),
            attributes,
            relationships,
            reference_only: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryState;
    use crate::registry::{EntityType, FieldDescriptor, RelationshipDescriptor};
    use std::sync::Arc;

    fn registry() -> Arc<TypeRegistry> {
        Arc::new(
            TypeRegistry::new()
                .with_type(
                    EntityType::new("Task")
                        .with_field(FieldDescriptor::text("name"))
                        .with_field(FieldDescriptor::reference("parent_id", "Task"))
                        .with_relationship(RelationshipDescriptor::has_many(
                            "subtasks", "Task", "parent_id",
                        ))
                        .with_relationship(
                            RelationshipDescriptor::has_many("notes", "Note", "task_id").nullify(),
                        ),
                )
                .with_type(
                    EntityType::new("Note")
                        .with_field(FieldDescriptor::reference("task_id", "Task")),
                ),
        )
    }

    #[test]
    fn test_cycle_produces_reference_stub() {
        let mut state = MemoryState::new(registry());
        let first = state.save(Record::new("Task").with("name", "plough")).unwrap();
        let second = state
            .save(
                Record::new("Task")
                    .with("name", "sow")
                    .with("parent_id", first.id.unwrap()),
            )
            .unwrap();
        let mut first = first;
        first.assign("parent_id", second.id.unwrap());
        let first = state.save(first).unwrap();

        let snapshot = SnapshotBuilder::new(state.registry(), &state)
            .build(&first)
            .unwrap();

        assert_eq!(snapshot.node_count(), 3);
        let child = snapshot.relationship("subtasks").unwrap().nodes()[0];
        assert_eq!(child.attributes["name"], Value::from("sow"));
        let stub = child.relationship("subtasks").unwrap().nodes()[0];
        assert!(stub.reference_only);
        assert_eq!(stub.attributes.len(), 1);
        assert_eq!(stub.identity("id"), first.id);
    }

    #[test]
    fn test_nullify_relationships_not_captured() {
        let mut state = MemoryState::new(registry());
        let task = state.save(Record::new("Task").with("name", "weed")).unwrap();
        state
            .save(Record::new("Note").with("task_id", task.id.unwrap()))
            .unwrap();

        let snapshot = SnapshotBuilder::new(state.registry(), &state)
            .build(&task)
            .unwrap();
        assert!(snapshot.relationships.is_empty());
        assert_eq!(snapshot.attributes["parent_id"], Value::Null);
    }

    #[test]
    fn test_unsaved_record_rejected() {
        let state = MemoryState::new(registry());
        let result = SnapshotBuilder::new(state.registry(), &state).build(&Record::new("Task"));
        assert!(matches!(result, Err(UndoError::Argument(_))));
    }

    #[test]
    fn test_singular_relationship_with_duplicates_rejected() {
        let registry = Arc::new(
            TypeRegistry::new()
                .with_type(EntityType::new("Pest").with_relationship(
                    RelationshipDescriptor::has_one("profile", "Profile", "pest_id"),
                ))
                .with_type(
                    EntityType::new("Profile").with_field(FieldDescriptor::reference("pest_id", "Pest")),
                ),
        );
        let mut state = MemoryState::new(registry);
        let pest = state.save(Record::new("Pest")).unwrap();
        state
            .save(Record::new("Profile").with("pest_id", pest.id.unwrap()))
            .unwrap();
        let single = SnapshotBuilder::new(state.registry(), &state)
            .build(&pest)
            .unwrap();
        assert!(matches!(
            single.relationship("profile"),
            Some(SnapshotRelation::One(_))
        ));

        state
            .save(Record::new("Profile").with("pest_id", pest.id.unwrap()))
            .unwrap();
        let result = SnapshotBuilder::new(state.registry(), &state).build(&pest);
        assert!(matches!(result, Err(UndoError::ReferenceConstraint(_))));
    }
}
