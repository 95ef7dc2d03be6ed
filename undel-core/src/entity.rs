/*!
Host entity model boundary.

The engine never talks to a database directly. Everything it needs from the
host (lookup by identity, relationship traversal, validated and unvalidated
saves, cascading destroy) goes through [`EntityStore`].
*/

use std::collections::BTreeMap;
use std::fmt;

use crate::registry::RelationshipDescriptor;
use crate::value::ScalarValue;
use crate::Result;

/// Identity value of a persisted row
pub type EntityId = i64;

/// `(type, identity)` pair that names exactly one row
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    pub entity_type: String,
    pub id: EntityId,
}

impl EntityKey {
    pub fn new<S: Into<String>>(entity_type: S, id: EntityId) -> Self {
        Self {
            entity_type: entity_type.into(),
            id,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity_type, self.id)
    }
}

/// A row of some registered entity type.
///
/// `id` is `None` until the store assigns one on first save. Attributes not
/// present in the map read as null.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub entity_type: String,
    pub id: Option<EntityId>,
    pub attributes: BTreeMap<String, ScalarValue>,
}

impl Record {
    pub fn new<S: Into<String>>(entity_type: S) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_id(mut self, id: EntityId) -> Self {
        self.id = Some(id);
        self
    }

    /// Builder-style attribute assignment
    pub fn with<S: Into<String>, V: Into<ScalarValue>>(mut self, field: S, value: V) -> Self {
        self.assign(field, value);
        self
    }

    /// Set an attribute; assigning null clears it
    pub fn assign<S: Into<String>, V: Into<ScalarValue>>(&mut self, field: S, value: V) {
        let field = field.into();
        match value.into() {
            ScalarValue::Null => {
                self.attributes.remove(&field);
            }
            value => {
                self.attributes.insert(field, value);
            }
        }
    }

    pub fn get(&self, field: &str) -> &ScalarValue {
        self.attributes.get(field).unwrap_or(&ScalarValue::Null)
    }

    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    pub fn key(&self) -> Option<EntityKey> {
        self.id.map(|id| EntityKey::new(self.entity_type.clone(), id))
    }

    /// UI anchor id in the `snake_case_type_id` form, e.g. `pest_control_method_7`.
    pub fn dom_id(&self) -> String {
        let prefix = snake_case(&self.entity_type);
        match self.id {
            Some(id) => format!("{prefix}_{id}"),
            None => format!("new_{prefix}"),
        }
    }

    /// Human-readable label: the `name` attribute when present, else `Type#id`.
    pub fn label(&self) -> String {
        match self.get("name").as_str() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => match self.id {
                Some(id) => format!("{}#{id}", self.entity_type),
                None => self.entity_type.clone(),
            },
        }
    }
}

fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else if c == ':' {
            if !out.ends_with('_') {
                out.push('_');
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Persistence primitives the engine requires from the host.
///
/// Implementations are expected to run inside a transaction owned by a
/// [`crate::store::Database`]; none of these methods commit on their own.
pub trait EntityStore {
    /// Locate a row by type and identity
    fn find(&self, entity_type: &str, id: EntityId) -> Result<Option<Record>>;

    /// Current rows on the far side of `relationship`, ordered by identity
    fn related(&self, owner: &Record, relationship: &RelationshipDescriptor)
        -> Result<Vec<Record>>;

    /// Insert or update with full validation
    fn save(&mut self, record: Record) -> Result<Record>;

    /// Insert or update skipping entity validation rules.
    ///
    /// Storage constraints (uniqueness, reference existence) still apply.
    /// Only snapshot restoration uses this path.
    fn save_unvalidated(&mut self, record: Record) -> Result<Record>;

    /// Destroy a row, cascading along its cascade-owned relationships
    fn destroy(&mut self, record: &Record) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dom_id_and_label() {
        let record = Record::new("PestControlMethod").with_id(7);
        assert_eq!(record.dom_id(), "pest_control_method_7");
        assert_eq!(record.label(), "PestControlMethod#7");

        let named = Record::new("Pest").with_id(3).with("name", "Aphid");
        assert_eq!(named.dom_id(), "pest_3");
        assert_eq!(named.label(), "Aphid");

        assert_eq!(Record::new("Farm").dom_id(), "new_farm");
    }

    #[test]
    fn test_missing_attribute_reads_as_null() {
        let record = Record::new("Field").with("area", 12.5);
        assert!(record.get("name").is_null());
        assert_eq!(record.get("area"), &ScalarValue::Float(12.5));

        let mut cleared = record.clone();
        cleared.assign("area", ScalarValue::Null);
        assert!(cleared.attributes.is_empty());
        assert_eq!(cleared, Record::new("Field"));
    }

    #[test]
    fn test_key_requires_identity() {
        assert!(Record::new("Farm").key().is_none());
        assert_eq!(
            Record::new("Farm").with_id(1).key(),
            Some(EntityKey::new("Farm", 1))
        );
        assert_eq!(EntityKey::new("Farm", 1).to_string(), "Farm#1");
    }
}
