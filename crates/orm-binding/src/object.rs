//! Wrapped objects and their optional capabilities
//!
//! An [`EntityObject`] is the plain data-holding object behind a wrapper. It
//! declares its own fields and may additionally publish change
//! notifications, dirty-state notifications and validation errors. The
//! wrapper probes for each capability once, when it is constructed.

use tracked_orm::{
    DirtyStateChangeEvent, EventSource, FieldDefinition, OrmResult, PropertyChangedEvent, Value,
};

/// Validation-error reporting
pub trait DataErrorInfo: Send + Sync {
    /// Whole-object error, if any
    fn error(&self) -> Option<String>;

    /// Error for one field, if any
    fn field_error(&self, field: &str) -> Option<String>;
}

/// A plain object with statically declared fields
pub trait EntityObject: Send + Sync {
    fn type_name(&self) -> &str;

    fn declared_fields(&self) -> Vec<FieldDefinition>;

    fn get_field(&self, name: &str) -> Option<Value>;

    /// Write a declared field, returning whether the value changed
    fn set_field(&self, name: &str, value: Value) -> OrmResult<bool>;

    fn property_changed(&self) -> Option<&EventSource<PropertyChangedEvent>> {
        None
    }

    fn dirty_state_changed(&self) -> Option<&EventSource<DirtyStateChangeEvent>> {
        None
    }

    fn error_info(&self) -> Option<&dyn DataErrorInfo> {
        None
    }
}

/// The optional capabilities an object was found to support
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub change_notification: bool,
    pub dirty_notification: bool,
    pub error_info: bool,
}

impl Capabilities {
    pub fn probe(object: &dyn EntityObject) -> Self {
        Self {
            change_notification: object.property_changed().is_some(),
            dirty_notification: object.dirty_state_changed().is_some(),
            error_info: object.error_info().is_some(),
        }
    }
}
