/*!
In-memory reference database.

Implements every persistence port the engine needs: entity rows with
uniqueness and reference constraints, undo events, and serializable
transactions. Hosts without a database of their own, tests and the CLI use it
directly.
*/

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, SubsecRound, Utc};
use uuid::Uuid;

use crate::entity::{EntityId, EntityKey, EntityStore, Record};
use crate::event::{UndoEvent, UndoState};
use crate::registry::{OnDestroy, RelationshipDescriptor, TypeRegistry};
use crate::store::{Database, UndoEventStore};
use crate::value::ScalarValue;
use crate::{Result, UndoError};

/// Tables and events of one [`MemoryDatabase`]
#[derive(Debug, Clone)]
pub struct MemoryState {
    registry: Arc<TypeRegistry>,
    tables: BTreeMap<String, BTreeMap<EntityId, Record>>,
    sequences: HashMap<String, EntityId>,
    events: BTreeMap<Uuid, UndoEvent>,
}

impl MemoryState {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self {
            registry,
            tables: BTreeMap::new(),
            sequences: HashMap::new(),
            events: BTreeMap::new(),
        }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Number of rows of `entity_type`
    pub fn count(&self, entity_type: &str) -> usize {
        self.tables.get(entity_type).map_or(0, BTreeMap::len)
    }

    /// All rows of `entity_type`, ordered by identity
    pub fn rows(&self, entity_type: &str) -> Vec<Record> {
        self.tables
            .get(entity_type)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default()
    }

    fn next_id(&mut self, entity_type: &str) -> EntityId {
        let next = self.sequences.entry(entity_type.to_string()).or_insert(1);
        let id = *next;
        *next += 1;
        id
    }

    fn bump_sequence(&mut self, entity_type: &str, id: EntityId) {
        let next = self.sequences.entry(entity_type.to_string()).or_insert(1);
        if id >= *next {
            *next = id + 1;
        }
    }

    fn check_unique(&self, record: &Record, id: EntityId) -> Result<()> {
        let entity_type = self.registry.get(&record.entity_type)?;
        let Some(table) = self.tables.get(&record.entity_type) else {
            return Ok(());
        };

        for field in entity_type.fields.iter().filter(|f| f.unique) {
            let value = record.get(&field.name);
            if value.is_null() {
                continue;
            }
            let taken = table
                .values()
                .any(|other| other.id != Some(id) && other.get(&field.name) == value);
            if taken {
                return Err(UndoError::Uniqueness(format!(
                    "{}.{} {} has already been taken",
                    record.entity_type,
                    field.name,
                    value.to_portable()
                )));
            }
        }
        Ok(())
    }

    fn check_references(&self, record: &Record) -> Result<()> {
        let entity_type = self.registry.get(&record.entity_type)?;
        for field in entity_type.reference_fields() {
            let (Some(target), Some(target_id)) =
                (field.reference_target(), record.get(&field.name).as_i64())
            else {
                continue;
            };
            let exists = self
                .tables
                .get(target)
                .is_some_and(|table| table.contains_key(&target_id));
            if !exists {
                return Err(UndoError::ReferenceConstraint(format!(
                    "{}.{} points at missing {target}#{target_id}",
                    record.entity_type, field.name
                )));
            }
        }
        Ok(())
    }

    /// Every row removed by destroying `root`, plus the foreign keys to clear
    /// on surviving rows of nullified relationships.
    fn destroy_plan(&self, root: EntityKey) -> Result<(BTreeSet<EntityKey>, Vec<(EntityKey, String)>)> {
        let mut doomed = BTreeSet::new();
        let mut nullify = Vec::new();
        let mut stack = vec![root];

        while let Some(current) = stack.pop() {
            if !doomed.insert(current.clone()) {
                continue;
            }
            let entity_type = self.registry.get(&current.entity_type)?;
            let owner = Record::new(current.entity_type.clone()).with_id(current.id);
            for relationship in &entity_type.relationships {
                for child in self.related(&owner, relationship)? {
                    let Some(child_key) = child.key() else {
                        continue;
                    };
                    match relationship.on_destroy {
                        OnDestroy::Cascade => stack.push(child_key),
                        OnDestroy::Nullify => {
                            nullify.push((child_key, relationship.foreign_key.clone()))
                        }
                    }
                }
            }
        }

        nullify.retain(|(key, _)| !doomed.contains(key));
        Ok((doomed, nullify))
    }
}

impl EntityStore for MemoryState {
    fn find(&self, entity_type: &str, id: EntityId) -> Result<Option<Record>> {
        self.registry.get(entity_type)?;
        Ok(self
            .tables
            .get(entity_type)
            .and_then(|table| table.get(&id))
            .cloned())
    }

    fn related(
        &self,
        owner: &Record,
        relationship: &RelationshipDescriptor,
    ) -> Result<Vec<Record>> {
        let Some(owner_id) = owner.id else {
            return Ok(Vec::new());
        };
        Ok(self
            .tables
            .get(&relationship.target)
            .map(|table| {
                table
                    .values()
                    .filter(|row| row.get(&relationship.foreign_key).as_i64() == Some(owner_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn save(&mut self, record: Record) -> Result<Record> {
        let entity_type = self.registry.get(&record.entity_type)?;
        let blank: Vec<&str> = entity_type
            .fields
            .iter()
            .filter(|f| f.required && record.get(&f.name).is_null())
            .map(|f| f.name.as_str())
            .collect();
        if !blank.is_empty() {
            return Err(UndoError::validation(format!(
                "{} {} can't be blank",
                record.entity_type,
                blank.join(", ")
            )));
        }
        self.save_unvalidated(record)
    }

    fn save_unvalidated(&mut self, mut record: Record) -> Result<Record> {
        let entity_type = self.registry.get(&record.entity_type)?;
        if let Some(unknown) = record
            .attributes
            .keys()
            .find(|name| entity_type.field(name).is_none())
        {
            return Err(UndoError::argument(format!(
                "unknown attribute {}.{unknown}",
                record.entity_type
            )));
        }

        let id = match record.id {
            Some(id) => id,
            None => self.next_id(&record.entity_type),
        };
        self.check_unique(&record, id)?;
        self.check_references(&record)?;

        // stored precision matches what snapshots carry
        for value in record.attributes.values_mut() {
            if let ScalarValue::Timestamp(ts) = value {
                *ts = ts.trunc_subsecs(6);
            }
        }
        record.id = Some(id);
        self.bump_sequence(&record.entity_type, id);
        self.tables
            .entry(record.entity_type.clone())
            .or_default()
            .insert(id, record.clone());
        Ok(record)
    }

    fn destroy(&mut self, record: &Record) -> Result<()> {
        let key = record.key().ok_or_else(|| {
            UndoError::argument(format!("cannot destroy an unsaved {}", record.entity_type))
        })?;
        if self.find(&key.entity_type, key.id)?.is_none() {
            return Err(UndoError::argument(format!("{key} does not exist")));
        }

        let (doomed, nullify) = self.destroy_plan(key)?;
        let cleared: BTreeSet<(EntityKey, String)> = nullify.iter().cloned().collect();

        for (table_name, table) in &self.tables {
            if !self.registry.contains(table_name) {
                continue;
            }
            let entity_type = self.registry.get(table_name)?;
            for row in table.values() {
                let Some(row_key) = row.key() else { continue };
                if doomed.contains(&row_key) {
                    continue;
                }
                for field in entity_type.reference_fields() {
                    let (Some(target), Some(target_id)) =
                        (field.reference_target(), row.get(&field.name).as_i64())
                    else {
                        continue;
                    };
                    let target_key = EntityKey::new(target, target_id);
                    if doomed.contains(&target_key)
                        && !cleared.contains(&(row_key.clone(), field.name.clone()))
                    {
                        return Err(UndoError::ReferenceConstraint(format!(
                            "{target_key} is still referenced by {row_key}.{}",
                            field.name
                        )));
                    }
                }
            }
        }

        for (key, field) in nullify {
            if let Some(row) = self
                .tables
                .get_mut(&key.entity_type)
                .and_then(|table| table.get_mut(&key.id))
            {
                row.assign(field, ScalarValue::Null);
            }
        }
        for key in &doomed {
            if let Some(table) = self.tables.get_mut(&key.entity_type) {
                table.remove(&key.id);
            }
        }
        Ok(())
    }
}

impl UndoEventStore for MemoryState {
    fn insert_event(&mut self, event: UndoEvent) -> Result<()> {
        if self.events.contains_key(&event.id) {
            return Err(UndoError::Uniqueness(format!(
                "undo token {} already exists",
                event.id
            )));
        }
        self.events.insert(event.id, event);
        Ok(())
    }

    fn find_event(&self, token: Uuid) -> Result<Option<UndoEvent>> {
        Ok(self.events.get(&token).cloned())
    }

    fn update_event(&mut self, event: &UndoEvent) -> Result<()> {
        match self.events.get_mut(&event.id) {
            Some(stored) => {
                *stored = event.clone();
                Ok(())
            }
            None => Err(UndoError::NotFound(event.token())),
        }
    }

    fn due_events(&self, now: DateTime<Utc>) -> Result<Vec<UndoEvent>> {
        let mut due: Vec<UndoEvent> = self
            .events
            .values()
            .filter(|e| e.state == UndoState::Scheduled && e.expires_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|e| e.expires_at);
        Ok(due)
    }

    fn all_events(&self) -> Result<Vec<UndoEvent>> {
        let mut events: Vec<UndoEvent> = self.events.values().cloned().collect();
        events.sort_by_key(|e| e.created_at);
        Ok(events)
    }
}

/// Thread-safe database over a single [`MemoryState`].
///
/// Transactions take the state lock for their whole duration and work on a
/// copy of the state. The copy replaces the committed state only when the
/// closure returns `Ok`, so an `Err` or a panic leaves nothing behind.
#[derive(Debug)]
pub struct MemoryDatabase {
    state: Mutex<MemoryState>,
}

impl MemoryDatabase {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self::from_state(MemoryState::new(registry))
    }

    pub fn from_state(state: MemoryState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    /// Copy of the committed state, for inspection
    pub fn state(&self) -> Result<MemoryState> {
        self.transaction(|state| Ok(state.clone()))
    }

    /// Load previously archived events, skipping tokens already present
    pub fn import_events(&self, events: Vec<UndoEvent>) -> Result<usize> {
        self.transaction(|state| {
            let mut imported = 0;
            for event in events {
                if state.find_event(event.id)?.is_none() {
                    state.insert_event(event)?;
                    imported += 1;
                }
            }
            Ok(imported)
        })
    }
}

impl Database for MemoryDatabase {
    type Tx = MemoryState;

    fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self::Tx) -> Result<T>,
    {
        // a poisoned lock only means a closure panicked before committing
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut working = guard.clone();

        let value = f(&mut working)?;
        *guard = working;
        Ok(value)
    }
}
