/*!
Entity type registry.

The registry is the closed set of entity types the engine can snapshot and
restore. It is populated once at startup; restoration resolves the type tag
stored in a snapshot through it instead of any dynamic lookup.
*/

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Result, UndoError};

/// Default identity field name.
pub const DEFAULT_IDENTITY_FIELD: &str = "id";

/// Storage kind of a persisted field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    Boolean,
    Integer,
    Float,
    Text,
    Timestamp,
    Date,
    Decimal,
    Json,
    /// Foreign key holding the identity of a row of the named type
    Reference(String),
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean => write!(f, "boolean"),
            Self::Integer => write!(f, "integer"),
            Self::Float => write!(f, "float"),
            Self::Text => write!(f, "text"),
            Self::Timestamp => write!(f, "timestamp"),
            Self::Date => write!(f, "date"),
            Self::Decimal => write!(f, "decimal"),
            Self::Json => write!(f, "json"),
            Self::Reference(target) => write!(f, "reference to {target}"),
        }
    }
}

/// A persisted field of an entity type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    /// Rejected as null by validated saves
    pub required: bool,
    /// No two rows of the type may share a non-null value
    pub unique: bool,
}

impl FieldDescriptor {
    pub fn new<S: Into<String>>(name: S, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            unique: false,
        }
    }

    pub fn text<S: Into<String>>(name: S) -> Self {
        Self::new(name, FieldKind::Text)
    }

    pub fn reference<S: Into<String>, T: Into<String>>(name: S, target: T) -> Self {
        Self::new(name, FieldKind::Reference(target.into()))
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Target type when this field is a foreign key
    pub fn reference_target(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::Reference(target) => Some(target),
            _ => None,
        }
    }
}

/// Singular vs. collection relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cardinality {
    One,
    Many,
}

/// What happens to related rows when the owner is destroyed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnDestroy {
    /// Related rows are destroyed with the owner (cascade-owned)
    Cascade,
    /// Related rows survive with their foreign key cleared
    Nullify,
}

/// An owner-to-children relationship, resolved through a foreign key on the target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipDescriptor {
    pub name: String,
    pub target: String,
    pub cardinality: Cardinality,
    /// Reference field on the target type that points back at the owner
    pub foreign_key: String,
    pub on_destroy: OnDestroy,
}

impl RelationshipDescriptor {
    /// Cascade-owned singular relationship
    pub fn has_one<N, T, K>(name: N, target: T, foreign_key: K) -> Self
    where
        N: Into<String>,
        T: Into<String>,
        K: Into<String>,
    {
        Self {
            name: name.into(),
            target: target.into(),
            cardinality: Cardinality::One,
            foreign_key: foreign_key.into(),
            on_destroy: OnDestroy::Cascade,
        }
    }

    /// Cascade-owned collection relationship
    pub fn has_many<N, T, K>(name: N, target: T, foreign_key: K) -> Self
    where
        N: Into<String>,
        T: Into<String>,
        K: Into<String>,
    {
        Self {
            cardinality: Cardinality::Many,
            ..Self::has_one(name, target, foreign_key)
        }
    }

    pub fn nullify(mut self) -> Self {
        self.on_destroy = OnDestroy::Nullify;
        self
    }

    pub fn is_cascade_owned(&self) -> bool {
        self.on_destroy == OnDestroy::Cascade
    }

    pub fn is_collection(&self) -> bool {
        self.cardinality == Cardinality::Many
    }
}

/// Description of one entity type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityType {
    pub name: String,
    pub identity_field: String,
    pub fields: Vec<FieldDescriptor>,
    pub relationships: Vec<RelationshipDescriptor>,
}

impl EntityType {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            identity_field: DEFAULT_IDENTITY_FIELD.to_string(),
            fields: Vec::new(),
            relationships: Vec::new(),
        }
    }

    pub fn with_identity_field<S: Into<String>>(mut self, name: S) -> Self {
        self.identity_field = name.into();
        self
    }

    pub fn with_field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_relationship(mut self, relationship: RelationshipDescriptor) -> Self {
        self.relationships.push(relationship);
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn relationship(&self, name: &str) -> Option<&RelationshipDescriptor> {
        self.relationships.iter().find(|r| r.name == name)
    }

    /// Relationships destroyed together with this type
    pub fn cascade_relationships(&self) -> impl Iterator<Item = &RelationshipDescriptor> {
        self.relationships.iter().filter(|r| r.is_cascade_owned())
    }

    /// Foreign-key fields of this type
    pub fn reference_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.reference_target().is_some())
    }
}

/// Closed mapping from type name to [`EntityType`]
///
/// # Example
/// ```rust
/// use undel_core::{EntityType, FieldDescriptor, RelationshipDescriptor, TypeRegistry};
///
/// let registry = TypeRegistry::new()
///     .with_type(
///         EntityType::new("Farm")
///             .with_field(FieldDescriptor::text("name").required())
///             .with_relationship(RelationshipDescriptor::has_many("fields", "Field", "farm_id")),
///     )
///     .with_type(
///         EntityType::new("Field").with_field(FieldDescriptor::reference("farm_id", "Farm")),
///     );
///
/// registry.validate()?;
/// assert!(registry.get("Farm").is_ok());
/// # Ok::<(), undel_core::UndoError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: HashMap<String, EntityType>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, entity_type: EntityType) {
        self.types.insert(entity_type.name.clone(), entity_type);
    }

    pub fn with_type(mut self, entity_type: EntityType) -> Self {
        self.register(entity_type);
        self
    }

    /// Look up a type by name
    ///
    /// # Errors
    /// * `UndoError::UnknownType` - If the name was never registered
    pub fn get(&self, name: &str) -> Result<&EntityType> {
        self.types
            .get(name)
            .ok_or_else(|| UndoError::UnknownType(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    /// Check that every relationship and reference points at a registered type
    /// and that every relationship's foreign key is a reference field on its
    /// target pointing back at the owner.
    pub fn validate(&self) -> Result<()> {
        for entity_type in self.types.values() {
            if entity_type.field(&entity_type.identity_field).is_some() {
                return Err(UndoError::config(format!(
                    "{}: identity field '{}' must not be declared as a regular field",
                    entity_type.name, entity_type.identity_field
                )));
            }

            for field in entity_type.reference_fields() {
                if let Some(target) = field.reference_target() {
                    if !self.contains(target) {
                        return Err(UndoError::config(format!(
                            "{}.{} references unknown type {target}",
                            entity_type.name, field.name
                        )));
                    }
                }
            }

            for relationship in &entity_type.relationships {
                let target = self.get(&relationship.target).map_err(|_| {
                    UndoError::config(format!(
                        "{}.{} targets unknown type {}",
                        entity_type.name, relationship.name, relationship.target
                    ))
                })?;

                let points_back = target
                    .field(&relationship.foreign_key)
                    .and_then(FieldDescriptor::reference_target)
                    .is_some_and(|owner| owner == entity_type.name);
                if !points_back {
                    return Err(UndoError::config(format!(
                        "{}.{}: {}.{} must be a reference to {}",
                        entity_type.name,
                        relationship.name,
                        relationship.target,
                        relationship.foreign_key,
                        entity_type.name
                    )));
                }
            }
        }
        Ok(())
    }
}
