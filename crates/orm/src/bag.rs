//! Property Bag
//!
//! Per-entity storage of dynamic field values. Each field carries its current
//! value, the value it held at the last accept boundary, and its declared type.
//! Writes are coerced to the declared type and mark the field dirty; the
//! notifications they produce are queued for the owning wrapper to raise.

use std::collections::HashMap;

use crate::error::{OrmError, OrmResult};
use crate::value::{coerce, FieldType, Value};

/// Notification produced by a bag mutation, raised later by the bag's owner
#[derive(Debug, Clone, PartialEq)]
pub enum BagNotification {
    PropertyChanged(String),
    DirtyStateChanged { was_dirty: bool, is_dirty: bool },
}

#[derive(Debug, Clone)]
struct BagField {
    name: String,
    current: Value,
    original: Option<Value>,
    field_type: FieldType,
    dirty: bool,
    // Created by a write since the last accept
    created: bool,
}

/// Dynamic field storage owned by exactly one entity
#[derive(Debug, Clone, Default)]
pub struct PropertyBag {
    fields: Vec<BagField>,
    index: HashMap<String, usize>,
    dirty_count: usize,
    auto_create: bool,
    pending: Vec<BagNotification>,
}

impl PropertyBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// A bag whose reads of unknown fields create them as untyped nulls
    pub fn auto_creating() -> Self {
        Self {
            auto_create: true,
            ..Self::default()
        }
    }

    /// Declare a field with an explicit type. A new field starts at the type's
    /// zero value; an existing field has its current value coerced to the new type.
    pub fn declare(&mut self, name: &str, field_type: FieldType) -> OrmResult<()> {
        match self.index.get(name) {
            Some(&idx) => {
                let field = &mut self.fields[idx];
                field.current = coerce(name, field.current.clone(), &field_type)?;
                if let Some(original) = field.original.take() {
                    field.original = Some(coerce(name, original, &field_type)?);
                }
                field.field_type = field_type;
            }
            None => {
                self.insert(name, field_type.zero_value(), field_type);
            }
        }
        Ok(())
    }

    pub fn is_auto_creating(&self) -> bool {
        self.auto_create
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.field(name).map(|f| f.field_type)
    }

    /// Field names in declaration order
    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    /// Current values in declaration order
    pub fn all_values(&self) -> Vec<(String, Value)> {
        self.fields
            .iter()
            .map(|f| (f.name.clone(), f.current.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Read the current value of a field
    pub fn get_value(&mut self, name: &str) -> OrmResult<Value> {
        if let Some(field) = self.field(name) {
            return Ok(field.current.clone());
        }

        if self.auto_create {
            self.insert(name, Value::Null, FieldType::any());
            return Ok(Value::Null);
        }

        Err(OrmError::field_not_found(name))
    }

    /// Read a field without auto-creating it
    pub fn peek_value(&self, name: &str) -> Option<&Value> {
        self.field(name).map(|f| &f.current)
    }

    /// Value at the last accept boundary. Fields created since then have no
    /// original; `use_current_if_missing` then returns the current value, and null otherwise.
    pub fn get_original_value(&self, name: &str, use_current_if_missing: bool) -> OrmResult<Value> {
        let field = self
            .field(name)
            .ok_or_else(|| OrmError::field_not_found(name))?;

        match &field.original {
            Some(original) => Ok(original.clone()),
            None if use_current_if_missing => Ok(field.current.clone()),
            None => Ok(Value::Null),
        }
    }

    /// Write a field, coercing to its declared type. Unknown fields are created
    /// with a type inferred from the value. Returns whether the stored value changed.
    pub fn set_value(&mut self, name: &str, value: Value) -> OrmResult<bool> {
        match self.index.get(name) {
            Some(&idx) => self.write(idx, value),
            None => {
                let field_type = FieldType::infer(&value);
                self.create(name, value, field_type);
                Ok(true)
            }
        }
    }

    /// Write a field, declaring `field_type` first when the field is new
    pub fn set_value_typed(&mut self, name: &str, value: Value, field_type: FieldType) -> OrmResult<bool> {
        match self.index.get(name) {
            Some(&idx) => self.write(idx, value),
            None => {
                let coerced = coerce(name, value, &field_type)?;
                self.create(name, coerced, field_type);
                Ok(true)
            }
        }
    }

    /// Restore a field to its original value. Returns whether the value changed.
    pub fn reset_field(&mut self, name: &str) -> OrmResult<bool> {
        let original = self.get_original_value(name, true)?;
        self.set_value(name, original)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty_count > 0
    }

    pub fn is_field_dirty(&self, name: &str) -> bool {
        self.field(name).map(|f| f.dirty).unwrap_or(false)
    }

    pub fn dirty_fields(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| f.dirty)
            .map(|f| f.name.clone())
            .collect()
    }

    /// Accept boundary: current values become the originals and dirty state clears
    pub fn accept_changes(&mut self) {
        let was_dirty = self.is_dirty();
        for field in &mut self.fields {
            field.original = Some(field.current.clone());
            field.dirty = false;
            field.created = false;
        }
        self.dirty_count = 0;
        self.notify_dirty_transition(was_dirty);
    }

    /// Restore originals; fields created since the last accept are removed
    pub fn reject_changes(&mut self) {
        let was_dirty = self.is_dirty();
        let mut changed = Vec::new();

        self.fields.retain_mut(|field| {
            if field.created {
                changed.push(field.name.clone());
                return false;
            }
            if !field.dirty {
                return true;
            }
            if let Some(original) = field.original.clone() {
                field.current = original;
            }
            field.dirty = false;
            changed.push(field.name.clone());
            true
        });

        self.index = self
            .fields
            .iter()
            .enumerate()
            .map(|(idx, f)| (f.name.clone(), idx))
            .collect();
        self.dirty_count = 0;

        for name in changed {
            self.pending.push(BagNotification::PropertyChanged(name));
        }
        self.notify_dirty_transition(was_dirty);
    }

    /// Drain notifications queued by mutations since the last call
    pub fn take_notifications(&mut self) -> Vec<BagNotification> {
        std::mem::take(&mut self.pending)
    }

    fn field(&self, name: &str) -> Option<&BagField> {
        self.index.get(name).map(|&idx| &self.fields[idx])
    }

    fn insert(&mut self, name: &str, value: Value, field_type: FieldType) {
        self.index.insert(name.to_string(), self.fields.len());
        self.fields.push(BagField {
            name: name.to_string(),
            current: value,
            original: None,
            field_type,
            dirty: false,
            created: false,
        });
    }

    fn create(&mut self, name: &str, value: Value, field_type: FieldType) {
        let was_dirty = self.is_dirty();
        self.insert(name, value, field_type);
        if let Some(field) = self.fields.last_mut() {
            field.dirty = true;
            field.created = true;
        }
        self.dirty_count += 1;
        self.pending.push(BagNotification::PropertyChanged(name.to_string()));
        self.notify_dirty_transition(was_dirty);
    }

    fn write(&mut self, idx: usize, value: Value) -> OrmResult<bool> {
        let was_dirty = self.is_dirty();
        let field = &mut self.fields[idx];
        let coerced = coerce(&field.name, value, &field.field_type)?;

        if coerced == field.current {
            return Ok(false);
        }

        let previous = std::mem::replace(&mut field.current, coerced);
        if field.original.is_none() && !field.created {
            field.original = Some(previous);
        }

        let now_dirty = field.created || field.original.as_ref() != Some(&field.current);
        match (field.dirty, now_dirty) {
            (false, true) => self.dirty_count += 1,
            (true, false) => self.dirty_count -= 1,
            _ => {}
        }
        field.dirty = now_dirty;

        let name = field.name.clone();
        self.pending.push(BagNotification::PropertyChanged(name));
        self.notify_dirty_transition(was_dirty);
        Ok(true)
    }

    fn notify_dirty_transition(&mut self, was_dirty: bool) {
        let is_dirty = self.is_dirty();
        if was_dirty != is_dirty {
            self.pending
                .push(BagNotification::DirtyStateChanged { was_dirty, is_dirty });
        }
    }
}
