//! Property descriptors
//!
//! A descriptor names one property of a wrapper's merged surface and routes
//! reads, writes and resets back through that wrapper.

use std::collections::HashSet;

use tracked_orm::{FieldDefinition, FieldType, OrmResult, Value};

use crate::wrapper::EntityWrapper;

/// Where a property's value lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertySource {
    /// A statically declared field of the wrapped object
    Declared,
    /// A dynamic field of the property bag
    Bag,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDescriptor {
    name: String,
    field_type: FieldType,
    source: PropertySource,
}

impl PropertyDescriptor {
    pub(crate) fn new(name: impl Into<String>, field_type: FieldType, source: PropertySource) -> Self {
        Self {
            name: name.into(),
            field_type,
            source,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    pub fn source(&self) -> PropertySource {
        self.source
    }

    pub fn is_read_only(&self) -> bool {
        false
    }

    pub fn get_value(&self, wrapper: &EntityWrapper) -> OrmResult<Value> {
        wrapper.in_scope(|_| wrapper.get_property_value(&self.name))
    }

    pub fn set_value(&self, wrapper: &EntityWrapper, value: Value) -> OrmResult<bool> {
        wrapper.in_scope(|_| wrapper.set_property_value(&self.name, value))
    }

    /// True when the property differs from its original value
    pub fn can_reset_value(&self, wrapper: &EntityWrapper) -> bool {
        wrapper.is_property_dirty(&self.name)
    }

    /// Restore the original value. Returns whether the value changed.
    pub fn reset_value(&self, wrapper: &EntityWrapper) -> OrmResult<bool> {
        wrapper.in_scope(|_| wrapper.reset_property(&self.name))
    }
}

/// Declared fields (minus those hidden from binding) followed by every bag
/// field not shadowed by a declared field of the same name
pub(crate) fn merge(declared: &[FieldDefinition], bag_fields: Vec<(String, FieldType)>) -> Vec<PropertyDescriptor> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut descriptors = Vec::with_capacity(declared.len() + bag_fields.len());

    for field in declared {
        if !seen.insert(field.name.as_str()) || field.ignore_binding {
            continue;
        }
        descriptors.push(PropertyDescriptor::new(
            field.name.clone(),
            field.field_type,
            PropertySource::Declared,
        ));
    }

    for (name, field_type) in bag_fields {
        if seen.contains(name.as_str()) {
            continue;
        }
        descriptors.push(PropertyDescriptor::new(name, field_type, PropertySource::Bag));
    }

    descriptors
}
