//! Metadata registries
//!
//! Each registry is a concurrent map keyed by entity type name (or by
//! `(type, field)` for per-field metadata). Registration is idempotent:
//! registering the same value again is a no-op, while registering a
//! different value for an existing key reports a conflict and leaves the
//! first registration in place.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use super::relationship::RelationshipDescriptor;
use crate::error::{OrmError, OrmResult};
use crate::value::Value;

/// Whether a registration added a new entry or matched an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Inserted,
    AlreadyPresent,
}

impl Registration {
    pub fn is_inserted(self) -> bool {
        matches!(self, Self::Inserted)
    }
}

fn register_unique<K, V>(
    map: &DashMap<K, V>,
    key: K,
    value: V,
    entity_type: &str,
    registry: &'static str,
) -> OrmResult<Registration>
where
    K: Eq + Hash + Debug,
    V: PartialEq + Debug,
{
    match map.entry(key) {
        Entry::Occupied(existing) => {
            if *existing.get() == value {
                Ok(Registration::AlreadyPresent)
            } else {
                Err(OrmError::metadata_conflict(
                    entity_type,
                    registry,
                    format!(
                        "{:?} is registered as {:?}, refusing {:?}",
                        existing.key(),
                        existing.get(),
                        value
                    ),
                ))
            }
        }
        Entry::Vacant(slot) => {
            slot.insert(value);
            Ok(Registration::Inserted)
        }
    }
}

fn field_key(entity_type: &str, field: &str) -> (String, String) {
    (entity_type.to_string(), field.to_string())
}

/// Entity type -> ordered primary-key field names
#[derive(Debug, Default)]
pub struct KeyRegistry {
    keys: DashMap<String, Vec<String>>,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_key(&self, entity_type: &str, fields: Vec<String>) -> OrmResult<Registration> {
        if fields.is_empty() {
            return Err(OrmError::Configuration(format!(
                "Primary key for '{}' must name at least one field",
                entity_type
            )));
        }
        register_unique(&self.keys, entity_type.to_string(), fields, entity_type, "key")
    }

    pub fn contains(&self, entity_type: &str) -> bool {
        self.keys.contains_key(entity_type)
    }

    pub fn key_fields(&self, entity_type: &str) -> Option<Vec<String>> {
        self.keys.get(entity_type).map(|fields| fields.clone())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn clear(&self) {
        self.keys.clear();
    }
}

/// A validation constraint attached to a single field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldConstraint {
    MaxLength(usize),
}

/// (entity type, field) -> constraint
#[derive(Debug, Default)]
pub struct ValidationRegistry {
    constraints: DashMap<(String, String), FieldConstraint>,
}

impl ValidationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_max_length(
        &self,
        entity_type: &str,
        field: &str,
        max_length: usize,
    ) -> OrmResult<Registration> {
        register_unique(
            &self.constraints,
            field_key(entity_type, field),
            FieldConstraint::MaxLength(max_length),
            entity_type,
            "validation",
        )
    }

    pub fn contains(&self, entity_type: &str, field: &str) -> bool {
        self.constraints.contains_key(&field_key(entity_type, field))
    }

    pub fn constraint(&self, entity_type: &str, field: &str) -> Option<FieldConstraint> {
        self.constraints
            .get(&field_key(entity_type, field))
            .map(|constraint| *constraint)
    }

    pub fn max_length(&self, entity_type: &str, field: &str) -> Option<usize> {
        match self.constraint(entity_type, field) {
            Some(FieldConstraint::MaxLength(length)) => Some(length),
            None => None,
        }
    }

    /// Check a value against the field's constraint, returning a message on failure
    pub fn validate_field(&self, entity_type: &str, field: &str, value: &Value) -> Option<String> {
        match self.constraint(entity_type, field)? {
            FieldConstraint::MaxLength(max) => {
                let length = value.as_str()?.chars().count();
                if length > max {
                    Some(format!(
                        "{} must be at most {} characters (got {})",
                        field, max, length
                    ))
                } else {
                    None
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn clear(&self) {
        self.constraints.clear();
    }
}

/// (entity type, field) -> default value, already typed to the field
#[derive(Debug, Default)]
pub struct DefaultValueRegistry {
    defaults: DashMap<(String, String), Value>,
}

impl DefaultValueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_default(&self, entity_type: &str, field: &str, value: Value) -> OrmResult<Registration> {
        register_unique(
            &self.defaults,
            field_key(entity_type, field),
            value,
            entity_type,
            "default",
        )
    }

    pub fn contains(&self, entity_type: &str, field: &str) -> bool {
        self.defaults.contains_key(&field_key(entity_type, field))
    }

    pub fn default_value(&self, entity_type: &str, field: &str) -> Option<Value> {
        self.defaults
            .get(&field_key(entity_type, field))
            .map(|value| value.clone())
    }

    /// All registered defaults for one type
    pub fn defaults_for(&self, entity_type: &str) -> Vec<(String, Value)> {
        let mut defaults: Vec<(String, Value)> = self
            .defaults
            .iter()
            .filter(|entry| entry.key().0 == entity_type)
            .map(|entry| (entry.key().1.clone(), entry.value().clone()))
            .collect();
        defaults.sort_by(|a, b| a.0.cmp(&b.0));
        defaults
    }

    pub fn len(&self) -> usize {
        self.defaults.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defaults.is_empty()
    }

    pub fn clear(&self) {
        self.defaults.clear();
    }
}

/// Entity type -> schema name
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: DashMap<String, String>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_schema(&self, entity_type: &str, schema: &str) -> OrmResult<Registration> {
        register_unique(
            &self.schemas,
            entity_type.to_string(),
            schema.to_string(),
            entity_type,
            "schema",
        )
    }

    pub fn contains(&self, entity_type: &str) -> bool {
        self.schemas.contains_key(entity_type)
    }

    pub fn schema_of(&self, entity_type: &str) -> Option<String> {
        self.schemas.get(entity_type).map(|schema| schema.clone())
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    pub fn clear(&self) {
        self.schemas.clear();
    }
}

/// Entity type -> relationships it declares as parent
#[derive(Debug, Default)]
pub struct RelationshipRegistry {
    relationships: DashMap<String, Vec<RelationshipDescriptor>>,
}

impl RelationshipRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_relationships(
        &self,
        entity_type: &str,
        relationships: Vec<RelationshipDescriptor>,
    ) -> OrmResult<Registration> {
        for relationship in &relationships {
            relationship.validate()?;
        }
        register_unique(
            &self.relationships,
            entity_type.to_string(),
            relationships,
            entity_type,
            "relationship",
        )
    }

    pub fn contains(&self, entity_type: &str) -> bool {
        self.relationships.contains_key(entity_type)
    }

    pub fn relationships_of(&self, entity_type: &str) -> Vec<RelationshipDescriptor> {
        self.relationships
            .get(entity_type)
            .map(|relationships| relationships.clone())
            .unwrap_or_default()
    }

    /// Parent types that declare a relationship toward `related_type`
    pub fn parents_of(&self, related_type: &str) -> Vec<(String, RelationshipDescriptor)> {
        let mut parents = Vec::new();
        for entry in self.relationships.iter() {
            for relationship in entry.value() {
                if relationship.related_type == related_type {
                    parents.push((entry.key().clone(), relationship.clone()));
                }
            }
        }
        parents.sort_by(|a, b| a.0.cmp(&b.0));
        parents
    }

    pub fn len(&self) -> usize {
        self.relationships.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relationships.is_empty()
    }

    pub fn clear(&self) {
        self.relationships.clear();
    }
}

/// The full set of metadata registries populated by the scanner
#[derive(Debug, Default)]
pub struct MetadataRegistry {
    pub keys: KeyRegistry,
    pub validation: ValidationRegistry,
    pub defaults: DefaultValueRegistry,
    pub schemas: SchemaRegistry,
    pub relationships: RelationshipRegistry,
}

static GLOBAL_REGISTRY: Lazy<Arc<MetadataRegistry>> = Lazy::new(|| Arc::new(MetadataRegistry::new()));

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry shared by everything that does not supply its own
    pub fn global() -> Arc<MetadataRegistry> {
        Arc::clone(&GLOBAL_REGISTRY)
    }

    pub fn clear(&self) {
        self.keys.clear();
        self.validation.clear();
        self.defaults.clear();
        self.schemas.clear();
        self.relationships.clear();
    }
}
