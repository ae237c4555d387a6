//! Error types for the ORM runtime
//!
//! Provides the error surface for property bag access, value coercion,
//! metadata registration, connection lifecycle and configuration.

use thiserror::Error;

use crate::config::ConfigError;

/// Result type alias for ORM operations
pub type OrmResult<T> = Result<T, OrmError>;

/// Error types for ORM operations
#[derive(Debug, Clone, Error)]
pub enum OrmError {
    /// Field was never declared or set on a property bag
    #[error("Field '{field}' does not exist in the property bag")]
    FieldNotFound { field: String },

    /// Property is absent from both the declared object and the property bag
    #[error("Property '{property}' does not exist on wrapper for '{entity_type}'")]
    PropertyNotFound {
        property: String,
        entity_type: String,
    },

    /// Value cannot be converted to the declared type of a field
    #[error("Cannot convert value of type '{source_type}' to '{target_type}' for field '{field}'")]
    TypeCoercion {
        field: String,
        source_type: String,
        target_type: String,
    },

    /// Re-registration of a type with incompatible metadata
    #[error("Conflicting {registry} metadata for '{entity_type}': {detail}")]
    MetadataConflict {
        entity_type: String,
        registry: &'static str,
        detail: String,
    },

    /// One or more types failed during a metadata scan
    #[error("Metadata scan failed for {} type(s): {}", .0.len(), summarize(.0))]
    MetadataScan(Vec<TypeScanFailure>),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Connection acquisition or release error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Operation attempted on a disposed object
    #[error("Object has been disposed: {0}")]
    Disposed(String),

    /// Operation is not supported by this surface
    #[error("Operation not supported: {0}")]
    NotSupported(String),
}

impl OrmError {
    /// Create a field-not-found error
    pub fn field_not_found(field: impl Into<String>) -> Self {
        Self::FieldNotFound {
            field: field.into(),
        }
    }

    /// Create a property-not-found error
    pub fn property_not_found(property: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self::PropertyNotFound {
            property: property.into(),
            entity_type: entity_type.into(),
        }
    }

    /// Create a coercion error naming the field, source and target types
    pub fn type_coercion(
        field: impl Into<String>,
        source_type: impl Into<String>,
        target_type: impl Into<String>,
    ) -> Self {
        Self::TypeCoercion {
            field: field.into(),
            source_type: source_type.into(),
            target_type: target_type.into(),
        }
    }

    /// Create a metadata conflict error
    pub fn metadata_conflict(
        entity_type: impl Into<String>,
        registry: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        Self::MetadataConflict {
            entity_type: entity_type.into(),
            registry,
            detail: detail.into(),
        }
    }

    /// True for errors that abort initialization when raised by a scan
    pub fn is_metadata_conflict(&self) -> bool {
        match self {
            OrmError::MetadataConflict { .. } => true,
            OrmError::MetadataScan(failures) => failures.iter().any(|f| f.error.is_metadata_conflict()),
            _ => false,
        }
    }
}

/// A failure isolated to one type during a metadata scan
#[derive(Debug, Clone)]
pub struct TypeScanFailure {
    pub entity_type: String,
    pub error: Box<OrmError>,
}

impl TypeScanFailure {
    pub fn new(entity_type: impl Into<String>, error: OrmError) -> Self {
        Self {
            entity_type: entity_type.into(),
            error: Box::new(error),
        }
    }
}

fn summarize(failures: &[TypeScanFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.entity_type, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<ConfigError> for OrmError {
    fn from(err: ConfigError) -> Self {
        OrmError::Configuration(err.to_string())
    }
}
