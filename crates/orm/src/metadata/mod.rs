//! Entity Metadata
//!
//! Declarative entity definitions, the concurrent registries they are
//! scanned into, and the parallel scanner that connects the two.

pub mod definition;
pub mod registry;
pub mod relationship;
pub mod scanner;

pub use definition::{DescribeEntity, EntityDefinition, FieldDefinition, TypeCatalog};
pub use registry::{
    DefaultValueRegistry, FieldConstraint, KeyRegistry, MetadataRegistry, Registration,
    RelationshipRegistry, SchemaRegistry, ValidationRegistry,
};
pub use relationship::{Cardinality, RelationshipDescriptor};
pub use scanner::{scan_into_global, MetadataScanner, ScanSummary};
