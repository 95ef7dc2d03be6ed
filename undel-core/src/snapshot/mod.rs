/*!
Portable snapshots of entity graphs.

A [`Snapshot`] is a tree: an entity's attributes plus, for every cascade-owned
relationship, the snapshots of the related rows. Cycles in the source graph are
cut with reference-only stubs, so the value itself is always acyclic.
*/

pub mod builder;
pub mod restorer;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::entity::{EntityId, EntityKey};
use crate::Result;

pub use builder::SnapshotBuilder;
pub use restorer::SnapshotRestorer;

/// Captured state of one entity and everything it cascade-owns
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Snapshot {
    #[serde(rename = "type")]
    pub entity_type: String,

    /// Portable attribute values, including the identity field
    pub attributes: BTreeMap<String, Value>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub relationships: BTreeMap<String, SnapshotRelation>,

    /// Stub standing in for an entity captured elsewhere in the same tree
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub reference_only: bool,
}

/// Value of one captured relationship
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum SnapshotRelation {
    One(Box<Snapshot>),
    Many(Vec<Snapshot>),
}

impl SnapshotRelation {
    /// Child snapshots regardless of cardinality
    pub fn nodes(&self) -> Vec<&Snapshot> {
        match self {
            Self::One(node) => vec![node.as_ref()],
            Self::Many(nodes) => nodes.iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::One(_) => 1,
            Self::Many(nodes) => nodes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Snapshot {
    pub fn new<S: Into<String>>(entity_type: S) -> Self {
        Self {
            entity_type: entity_type.into(),
            attributes: BTreeMap::new(),
            relationships: BTreeMap::new(),
            reference_only: false,
        }
    }

    /// Stub carrying only the identity field
    pub fn reference<S: Into<String>>(entity_type: S, identity_field: &str, id: EntityId) -> Self {
        let mut stub = Self::new(entity_type);
        stub.attributes
            .insert(identity_field.to_string(), Value::from(id));
        stub.reference_only = true;
        stub
    }

    /// Identity stored under `identity_field`, if any
    pub fn identity(&self, identity_field: &str) -> Option<EntityId> {
        self.attributes.get(identity_field).and_then(Value::as_i64)
    }

    pub fn key(&self, identity_field: &str) -> Option<EntityKey> {
        self.identity(identity_field)
            .map(|id| EntityKey::new(self.entity_type.clone(), id))
    }

    pub fn relationship(&self, name: &str) -> Option<&SnapshotRelation> {
        self.relationships.get(name)
    }

    /// Number of nodes in the tree, stubs included
    pub fn node_count(&self) -> usize {
        1 + self
            .relationships
            .values()
            .flat_map(SnapshotRelation::nodes)
            .map(Snapshot::node_count)
            .sum::<usize>()
    }

    /// Count of nodes per entity type, stubs excluded
    pub fn type_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        self.accumulate_type_counts(&mut counts);
        counts
    }

    fn accumulate_type_counts(&self, counts: &mut BTreeMap<String, usize>) {
        if !self.reference_only {
            *counts.entry(self.entity_type.clone()).or_insert(0) += 1;
        }
        for relation in self.relationships.values() {
            for node in relation.nodes() {
                node.accumulate_type_counts(counts);
            }
        }
    }

    /// SHA-256 of the canonical JSON encoding.
    ///
    /// Maps are ordered, so equal snapshots always hash the same.
    pub fn digest(&self) -> Result<String> {
        let canonical = serde_json::to_vec(self)?;
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        Ok(format!("{:x}", hasher.finalize()))
    }
}
