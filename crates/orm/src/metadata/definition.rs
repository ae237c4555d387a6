//! Entity definitions - the declarative metadata a type carries
//!
//! A definition names the type and lists its fields together with the
//! declarations the metadata scanner consumes: primary key, per-field max
//! length and default value, schema name, and relationships.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use super::relationship::RelationshipDescriptor;
use crate::value::{FieldType, Value};

/// A statically declared field of an entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    pub field_type: FieldType,
    pub max_length: Option<usize>,
    /// Declared default, converted to `field_type` at registration
    pub default_value: Option<Value>,
    /// Hidden from binding consumers
    pub ignore_binding: bool,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            max_length: None,
            default_value: None,
            ignore_binding: false,
        }
    }

    pub fn max_length(mut self, length: usize) -> Self {
        self.max_length = Some(length);
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn ignore_binding(mut self) -> Self {
        self.ignore_binding = true;
        self
    }
}

/// Type definition scanned for entity metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDefinition {
    pub name: String,
    pub fields: Vec<FieldDefinition>,
    pub primary_key: Option<Vec<String>>,
    pub schema: Option<String>,
    pub relationships: Option<Vec<RelationshipDescriptor>>,
}

impl EntityDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            primary_key: None,
            schema: None,
            relationships: None,
        }
    }

    pub fn primary_key<I>(mut self, fields: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.primary_key = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn field(mut self, field: FieldDefinition) -> Self {
        self.fields.push(field);
        self
    }

    pub fn relationships(mut self, relationships: Vec<RelationshipDescriptor>) -> Self {
        self.relationships = Some(relationships);
        self
    }

    pub fn find_field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Implemented by types that describe their own entity metadata
pub trait DescribeEntity {
    fn describe() -> EntityDefinition;
}

static LOADED_TYPES: Lazy<DashMap<String, EntityDefinition>> = Lazy::new(DashMap::new);

/// Process-wide catalog of loaded entity types, scanned when no explicit
/// type list is given
pub struct TypeCatalog;

impl TypeCatalog {
    /// Add or replace a definition by name
    pub fn register(definition: EntityDefinition) {
        LOADED_TYPES.insert(definition.name.clone(), definition);
    }

    pub fn register_type<T: DescribeEntity>() {
        Self::register(T::describe());
    }

    pub fn get(name: &str) -> Option<EntityDefinition> {
        LOADED_TYPES.get(name).map(|entry| entry.clone())
    }

    pub fn loaded_types() -> Vec<EntityDefinition> {
        LOADED_TYPES.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len() -> usize {
        LOADED_TYPES.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ValueKind;

    struct Invoice;

    impl DescribeEntity for Invoice {
        fn describe() -> EntityDefinition {
            EntityDefinition::new("CatalogInvoice")
                .primary_key(["InvoiceID"])
                .field(FieldDefinition::new("InvoiceID", FieldType::new(ValueKind::Int64)))
        }
    }

    #[test]
    fn test_builder() {
        let def = EntityDefinition::new("Order")
            .primary_key(["OrderID"])
            .schema("sales")
            .field(FieldDefinition::new("Notes", FieldType::nullable(ValueKind::String)).max_length(50))
            .field(FieldDefinition::new("Quantity", FieldType::new(ValueKind::Int32)).default_value(0));

        assert_eq!(def.primary_key, Some(vec!["OrderID".to_string()]));
        assert_eq!(def.find_field("Notes").and_then(|f| f.max_length), Some(50));
        assert_eq!(
            def.find_field("Quantity").and_then(|f| f.default_value.clone()),
            Some(Value::Int32(0))
        );
        assert!(def.find_field("Missing").is_none());
    }

    #[test]
    fn test_catalog_registration() {
        TypeCatalog::register_type::<Invoice>();
        let def = TypeCatalog::get("CatalogInvoice").unwrap();
        assert_eq!(def.primary_key, Some(vec!["InvoiceID".to_string()]));
        assert!(TypeCatalog::loaded_types().iter().any(|d| d.name == "CatalogInvoice"));
    }
}
