//! # tracked-orm: Runtime core for tracked entities
//!
//! Dynamic property bags with change tracking, service scopes that own
//! entity state, concurrent metadata registries populated by a parallel
//! scanner, reference-counted connection handles, and the save-scope
//! configuration consumed by a save executor.

pub mod bag;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod metadata;
pub mod save;
pub mod scope;
pub mod state;
pub mod value;

// Re-export core types
pub use bag::{BagNotification, PropertyBag};
pub use config::{BulkRules, ConfigError, MergeBehavior, OrmConfig, SerializationMode};
pub use connection::{
    ConnectionHandle, ConnectionScope, ConnectionScopeSettings, DatabaseConnection, DatabasePool,
    DatabaseTransaction, PoolError, ScopeMode, WorkGuard,
};
pub use error::{OrmError, OrmResult, TypeScanFailure};
pub use events::{DirtyStateChangeEvent, EventSource, PropertyChangedEvent, SubscriptionId};
pub use metadata::{
    Cardinality, DescribeEntity, EntityDefinition, FieldDefinition, MetadataRegistry, MetadataScanner,
    RelationshipDescriptor, ScanSummary, TypeCatalog,
};
pub use save::{
    BulkInsertPolicy, OperationSet, RowPreview, RowSavePreview, RowSnapshot, SaveOperation,
    SaveScopeConfig, SaveScopeConfigBuilder,
};
pub use scope::{EntityId, ScopeGuard, ServiceScope, ServiceScopeSettings};
pub use state::ObjectState;
pub use value::{FieldType, Value, ValueKind};
