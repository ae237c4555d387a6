//! Validation errors sourced from the metadata registries

use std::sync::Arc;

use tracked_orm::{MetadataRegistry, Value};

/// Checks field values against the constraints registered for one entity type
#[derive(Debug, Clone)]
pub struct RegistryValidator {
    registry: Arc<MetadataRegistry>,
    entity_type: String,
}

impl RegistryValidator {
    pub fn new(registry: Arc<MetadataRegistry>, entity_type: impl Into<String>) -> Self {
        Self {
            registry,
            entity_type: entity_type.into(),
        }
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn field_error(&self, field: &str, value: &Value) -> Option<String> {
        self.registry
            .validation
            .validate_field(&self.entity_type, field, value)
    }

    /// All field errors joined into one message
    pub fn object_error<'a, I>(&self, values: I) -> Option<String>
    where
        I: IntoIterator<Item = (&'a str, &'a Value)>,
    {
        let errors: Vec<String> = values
            .into_iter()
            .filter_map(|(field, value)| self.field_error(field, value))
            .collect();

        if errors.is_empty() {
            None
        } else {
            Some(errors.join("; "))
        }
    }
}
