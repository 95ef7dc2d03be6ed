/*!
Snapshot restoration.

Rows are rebuilt top-down. Within one node, relationships are split into
*independent* ones and *dependent* ones: a relationship is dependent when its
target type carries a reference field pointing at the target type of a sibling
relationship of the same node. Independent children are persisted first
(without their own relationships), then their relationships are restored, and
only then are dependent relationships restored. Siblings a dependent child
points at therefore already exist as rows when it is written.

That ordering only covers one level of sibling dependency. Reference values
whose target row is still missing when a node is written are stored as null
and recorded as deferred links, applied once the whole tree exists. The same
mechanism attaches reference-only stubs, so cyclic graphs and deeper
dependency chains come back intact.
*/

use tracing::{debug, warn};

use super::Snapshot;
use crate::entity::{EntityKey, EntityStore, Record};
use crate::registry::{Cardinality, EntityType, RelationshipDescriptor, TypeRegistry};
use crate::value::ScalarValue;
use crate::{Result, UndoError};

/// Reference assignment postponed until every row of the tree exists
#[derive(Debug, Clone, PartialEq)]
struct DeferredLink {
    key: EntityKey,
    field: String,
    value: ScalarValue,
}

type ParentLink<'p, 'r> = Option<(&'p Record, &'r RelationshipDescriptor)>;

/// Rebuilds rows from a [`Snapshot`] through an [`EntityStore`].
///
/// Writes go through [`EntityStore::save_unvalidated`]: snapshots are only
/// produced by the engine itself from rows that were valid when destroyed, and
/// must restore even if validation rules changed since. The caller owns the
/// transaction; a failed restore leaves partial writes for it to roll back.
pub struct SnapshotRestorer<'a, S: ?Sized> {
    registry: &'a TypeRegistry,
    store: &'a mut S,
    restored: usize,
}

impl<'a, S> SnapshotRestorer<'a, S>
where
    S: EntityStore + ?Sized,
{
    pub fn new(registry: &'a TypeRegistry, store: &'a mut S) -> Self {
        Self {
            registry,
            store,
            restored: 0,
        }
    }

    /// Number of rows written by the last [`restore`](Self::restore) call
    pub fn restored_count(&self) -> usize {
        self.restored
    }

    /// Rebuild the snapshot's root and everything it owns.
    ///
    /// # Returns
    /// The root record as stored after all deferred links were applied
    ///
    /// # Errors
    /// * `UndoError::InvalidFormat` - If the root is a reference-only stub or an
    ///   attribute cannot be decoded
    /// * `UndoError::UnknownType` - If a node names an unregistered type
    /// * `UndoError::Uniqueness` / `UndoError::ReferenceConstraint` - Store conflicts
    pub fn restore(&mut self, snapshot: &Snapshot) -> Result<Record> {
        if snapshot.reference_only {
            return Err(UndoError::invalid_format(
                "cannot restore from a reference-only snapshot",
            ));
        }

        self.restored = 0;
        let mut deferred = Vec::new();
        let root = self.restore_node(snapshot, None, &mut deferred, false)?;
        let deferred_count = deferred.len();
        self.apply_deferred(deferred)?;

        debug!(
            entity_type = %snapshot.entity_type,
            rows = self.restored,
            deferred_links = deferred_count,
            "Snapshot restored"
        );

        match root.key() {
            Some(key) => Ok(self.store.find(&key.entity_type, key.id)?.unwrap_or(root)),
            None => Ok(root),
        }
    }

    fn restore_node(
        &mut self,
        node: &Snapshot,
        parent: ParentLink<'_, '_>,
        deferred: &mut Vec<DeferredLink>,
        skip_relationships: bool,
    ) -> Result<Record> {
        let registry = self.registry;
        let entity_type = registry.get(&node.entity_type)?;

        if node.reference_only {
            return self.restore_reference(node, entity_type, parent, deferred);
        }

        let identity = node.identity(&entity_type.identity_field);
        let mut record = match identity {
            Some(id) => self.store.find(&entity_type.name, id)?,
            None => None,
        }
        .unwrap_or_else(|| {
            let mut fresh = Record::new(entity_type.name.clone());
            fresh.id = identity;
            fresh
        });

        let mut pending = Vec::new();
        for (name, value) in &node.attributes {
            if *name == entity_type.identity_field {
                continue;
            }
            let Some(field) = entity_type.field(name) else {
                debug!(
                    entity_type = %entity_type.name,
                    field = %name,
                    "Skipping attribute no longer in schema"
                );
                continue;
            };

            let scalar = ScalarValue::from_portable(&field.kind, value)?;
            if let (Some(target), Some(target_id)) = (field.reference_target(), scalar.as_i64()) {
                if self.store.find(target, target_id)?.is_none() {
                    record.assign(name.clone(), ScalarValue::Null);
                    pending.push((name.clone(), scalar));
                    continue;
                }
            }
            record.assign(name.clone(), scalar);
        }

        if let Some((owner, relationship)) = parent {
            let owner_id = owner_identity(owner)?;
            if relationship.cardinality == Cardinality::One {
                self.replace_singular(owner, relationship, identity)?;
            }
            pending.retain(|(field, _)| *field != relationship.foreign_key);
            record.assign(relationship.foreign_key.clone(), ScalarValue::Integer(owner_id));
        }

        let record = self.store.save_unvalidated(record)?;
        self.restored += 1;

        if !pending.is_empty() {
            let key = record
                .key()
                .ok_or_else(|| UndoError::storage("store returned a row without identity"))?;
            deferred.extend(pending.into_iter().map(|(field, value)| DeferredLink {
                key: key.clone(),
                field,
                value,
            }));
        }

        if !skip_relationships {
            self.restore_relationships(node, &record, deferred)?;
        }
        Ok(record)
    }

    fn restore_relationships(
        &mut self,
        node: &Snapshot,
        record: &Record,
        deferred: &mut Vec<DeferredLink>,
    ) -> Result<()> {
        if node.relationships.is_empty() {
            return Ok(());
        }

        let registry = self.registry;
        let entity_type = registry.get(&node.entity_type)?;
        for name in node.relationships.keys() {
            if entity_type.relationship(name).is_none() {
                warn!(
                    entity_type = %entity_type.name,
                    relationship = %name,
                    "Snapshot relationship no longer in schema; skipped"
                );
            }
        }

        let (independent, dependent) = self.partition(entity_type, node)?;

        let mut persisted = Vec::new();
        for &relationship in &independent {
            for child in related_nodes(node, relationship) {
                let row = self.restore_node(child, Some((record, relationship)), deferred, true)?;
                persisted.push((child, row));
            }
        }
        for (child, row) in persisted {
            if !child.reference_only {
                self.restore_relationships(child, &row, deferred)?;
            }
        }

        for &relationship in &dependent {
            for child in related_nodes(node, relationship) {
                self.restore_node(child, Some((record, relationship)), deferred, false)?;
            }
        }
        Ok(())
    }

    /// Split the node's relationships, in declaration order, into
    /// independent and dependent groups.
    fn partition<'r>(
        &self,
        entity_type: &'r EntityType,
        node: &Snapshot,
    ) -> Result<(Vec<&'r RelationshipDescriptor>, Vec<&'r RelationshipDescriptor>)> {
        let present: Vec<&RelationshipDescriptor> = entity_type
            .relationships
            .iter()
            .filter(|r| node.relationships.contains_key(&r.name))
            .collect();

        let mut independent = Vec::new();
        let mut dependent = Vec::new();
        for relationship in &present {
            let target = self.registry.get(&relationship.target)?;
            let points_at_sibling = target.reference_fields().any(|field| {
                present.iter().any(|sibling| {
                    sibling.name != relationship.name
                        && field.reference_target() == Some(sibling.target.as_str())
                })
            });

            if points_at_sibling {
                dependent.push(*relationship);
            } else {
                independent.push(*relationship);
            }
        }
        Ok((independent, dependent))
    }

    fn restore_reference(
        &mut self,
        node: &Snapshot,
        entity_type: &EntityType,
        parent: ParentLink<'_, '_>,
        deferred: &mut Vec<DeferredLink>,
    ) -> Result<Record> {
        let id = node.identity(&entity_type.identity_field).ok_or_else(|| {
            UndoError::invalid_format(format!(
                "reference-only {} snapshot has no identity",
                entity_type.name
            ))
        })?;
        let key = EntityKey::new(entity_type.name.clone(), id);

        if let Some((owner, relationship)) = parent {
            deferred.push(DeferredLink {
                key: key.clone(),
                field: relationship.foreign_key.clone(),
                value: ScalarValue::Integer(owner_identity(owner)?),
            });
        }

        Ok(self
            .store
            .find(&key.entity_type, key.id)?
            .unwrap_or_else(|| Record::new(key.entity_type.clone()).with_id(key.id)))
    }

    /// Destroy whatever currently occupies a singular relationship, unless it
    /// is the row about to be restored into it.
    fn replace_singular(
        &mut self,
        owner: &Record,
        relationship: &RelationshipDescriptor,
        keep: Option<i64>,
    ) -> Result<()> {
        for current in self.store.related(owner, relationship)? {
            if current.id != keep {
                debug!(
                    relationship = %relationship.name,
                    replaced = ?current.key(),
                    "Replacing singular relationship target"
                );
                self.store.destroy(&current)?;
            }
        }
        Ok(())
    }

    fn apply_deferred(&mut self, deferred: Vec<DeferredLink>) -> Result<()> {
        for link in deferred {
            let mut record = self
                .store
                .find(&link.key.entity_type, link.key.id)?
                .ok_or_else(|| {
                    UndoError::ReferenceConstraint(format!(
                        "{} is referenced by the snapshot but was never restored",
                        link.key
                    ))
                })?;
            record.assign(link.field, link.value);
            self.store.save_unvalidated(record)?;
        }
        Ok(())
    }
}

fn related_nodes<'n>(node: &'n Snapshot, relationship: &RelationshipDescriptor) -> Vec<&'n Snapshot> {
    node.relationship(&relationship.name)
        .map(|relation| relation.nodes())
        .unwrap_or_default()
}

fn owner_identity(owner: &Record) -> Result<i64> {
    owner.id.ok_or_else(|| {
        UndoError::storage(format!(
            "parent {} was not persisted before its children",
            owner.entity_type
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryState;
    use crate::registry::{FieldDescriptor, FieldKind};
    use serde_json::json;
    use std::sync::Arc;

    fn registry() -> Arc<TypeRegistry> {
        Arc::new(
            TypeRegistry::new()
                .with_type(
                    EntityType::new("Pest")
                        .with_field(FieldDescriptor::text("name"))
                        .with_relationship(RelationshipDescriptor::has_one(
                            "temperature_profile",
                            "TemperatureProfile",
                            "pest_id",
                        )),
                )
                .with_type(
                    EntityType::new("TemperatureProfile")
                        .with_field(FieldDescriptor::reference("pest_id", "Pest"))
                        .with_field(FieldDescriptor::new("base", FieldKind::Float)),
                ),
        )
    }

    fn snapshot(pest_id: i64, profile_id: i64) -> Snapshot {
        let mut profile = Snapshot::new("TemperatureProfile");
        profile.attributes.insert("id".into(), json!(profile_id));
        profile.attributes.insert("pest_id".into(), json!(pest_id));
        profile.attributes.insert("base".into(), json!(10.0));

        let mut pest = Snapshot::new("Pest");
        pest.attributes.insert("id".into(), json!(pest_id));
        pest.attributes.insert("name".into(), json!("Aphid"));
        pest.attributes.insert("legacy_code".into(), json!("AP-1"));
        pest.relationships.insert(
            "temperature_profile".into(),
            super::super::SnapshotRelation::One(Box::new(profile)),
        );
        pest
    }

    #[test]
    fn test_restores_original_identities() {
        let registry = registry();
        let mut state = MemoryState::new(Arc::clone(&registry));

        let mut restorer = SnapshotRestorer::new(&registry, &mut state);
        let root = restorer.restore(&snapshot(4, 9)).unwrap();
        assert_eq!(restorer.restored_count(), 2);

        assert_eq!(root.id, Some(4));
        assert_eq!(root.get("name").as_str(), Some("Aphid"));
        let profile = state.find("TemperatureProfile", 9).unwrap().unwrap();
        assert_eq!(profile.get("pest_id"), &ScalarValue::Integer(4));
        assert_eq!(profile.get("base"), &ScalarValue::Float(10.0));
    }

    #[test]
    fn test_singular_relationship_is_replaced() {
        let registry = registry();
        let mut state = MemoryState::new(Arc::clone(&registry));
        state
            .save(Record::new("Pest").with_id(4).with("name", "Aphid"))
            .unwrap();
        state
            .save(
                Record::new("TemperatureProfile")
                    .with_id(20)
                    .with("pest_id", 4_i64)
                    .with("base", 2.0),
            )
            .unwrap();

        SnapshotRestorer::new(&registry, &mut state)
            .restore(&snapshot(4, 9))
            .unwrap();

        let profiles = state.rows("TemperatureProfile");
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].id, Some(9));
    }

    #[test]
    fn test_existing_row_is_overwritten() {
        let registry = registry();
        let mut state = MemoryState::new(Arc::clone(&registry));
        state
            .save(Record::new("Pest").with_id(4).with("name", "Renamed"))
            .unwrap();

        SnapshotRestorer::new(&registry, &mut state)
            .restore(&snapshot(4, 9))
            .unwrap();

        assert_eq!(state.count("Pest"), 1);
        let pest = state.find("Pest", 4).unwrap().unwrap();
        assert_eq!(pest.get("name").as_str(), Some("Aphid"));
        assert!(pest.get("legacy_code").is_null());
    }

    #[test]
    fn test_reference_only_root_rejected() {
        let registry = registry();
        let mut state = MemoryState::new(Arc::clone(&registry));
        let result =
            SnapshotRestorer::new(&registry, &mut state).restore(&Snapshot::reference("Pest", "id", 1));
        assert!(matches!(result, Err(UndoError::InvalidFormat(_))));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let registry = registry();
        let mut state = MemoryState::new(Arc::clone(&registry));
        let result = SnapshotRestorer::new(&registry, &mut state).restore(&Snapshot::new("Weed"));
        assert!(matches!(result, Err(UndoError::UnknownType(_))));
    }

    #[test]
    fn test_dangling_stub_surfaces_as_reference_error() {
        let registry = registry();
        let mut state = MemoryState::new(Arc::clone(&registry));
        let mut pest = snapshot(4, 9);
        pest.relationships.insert(
            "temperature_profile".into(),
            super::super::SnapshotRelation::One(Box::new(Snapshot::reference(
                "TemperatureProfile",
                "id",
                77,
            ))),
        );

        let result = SnapshotRestorer::new(&registry, &mut state).restore(&pest);
        assert!(matches!(result, Err(UndoError::ReferenceConstraint(_))));
    }

    #[test]
    fn test_reference_into_later_branch_is_deferred() {
        // Season owns plots and harvests; a harvest points at a bed that only
        // exists once the plots' own relationships have been restored.
        let registry = Arc::new(
            TypeRegistry::new()
                .with_type(
                    EntityType::new("Season")
                        .with_relationship(RelationshipDescriptor::has_many(
                            "plots", "Plot", "season_id",
                        ))
                        .with_relationship(RelationshipDescriptor::has_many(
                            "harvests", "Harvest", "season_id",
                        )),
                )
                .with_type(
                    EntityType::new("Plot")
                        .with_field(FieldDescriptor::reference("season_id", "Season"))
                        .with_relationship(RelationshipDescriptor::has_many("beds", "Bed", "plot_id")),
                )
                .with_type(EntityType::new("Bed").with_field(FieldDescriptor::reference("plot_id", "Plot")))
                .with_type(
                    EntityType::new("Harvest")
                        .with_field(FieldDescriptor::reference("season_id", "Season"))
                        .with_field(FieldDescriptor::reference("bed_id", "Bed")),
                ),
        );
        let mut state = MemoryState::new(Arc::clone(&registry));
        let season = state.save(Record::new("Season")).unwrap();
        let plot = state
            .save(Record::new("Plot").with("season_id", season.id.unwrap()))
            .unwrap();
        let bed = state
            .save(Record::new("Bed").with("plot_id", plot.id.unwrap()))
            .unwrap();
        state
            .save(
                Record::new("Harvest")
                    .with("season_id", season.id.unwrap())
                    .with("bed_id", bed.id.unwrap()),
            )
            .unwrap();
        let before = ["Season", "Plot", "Bed", "Harvest"].map(|t| state.rows(t));

        let snapshot = super::super::SnapshotBuilder::new(&registry, &state)
            .build(&season)
            .unwrap();
        state.destroy(&season).unwrap();
        assert_eq!(state.count("Harvest"), 0);

        SnapshotRestorer::new(&registry, &mut state)
            .restore(&snapshot)
            .unwrap();
        assert_eq!(["Season", "Plot", "Bed", "Harvest"].map(|t| state.rows(t)), before);
    }
}
