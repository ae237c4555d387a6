//! Settings applicable to service scopes

use std::fmt;
use std::sync::Arc;

use crate::config::{MergeBehavior, OrmConfig, SerializationMode};

/// Audit hook returning the identity recorded as "last updated by"
pub type LastUpdatedByProvider = Arc<dyn Fn() -> String + Send + Sync>;

#[derive(Clone)]
pub struct ServiceScopeSettings {
    pub initialize_null_collections: bool,
    pub serialization_mode: SerializationMode,
    pub merge_behavior: MergeBehavior,
    pub last_updated_by: Option<LastUpdatedByProvider>,
}

impl ServiceScopeSettings {
    pub fn from_config(config: &OrmConfig) -> Self {
        Self {
            initialize_null_collections: config.initialize_null_collections,
            serialization_mode: config.serialization_mode,
            merge_behavior: config.merge_behavior,
            last_updated_by: None,
        }
    }

    pub fn with_last_updated_by<F>(mut self, provider: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.last_updated_by = Some(Arc::new(provider));
        self
    }

    pub fn with_merge_behavior(mut self, merge_behavior: MergeBehavior) -> Self {
        self.merge_behavior = merge_behavior;
        self
    }

    pub fn with_serialization_mode(mut self, serialization_mode: SerializationMode) -> Self {
        self.serialization_mode = serialization_mode;
        self
    }

    /// Identity from the audit hook, if one is installed
    pub fn resolve_last_updated_by(&self) -> Option<String> {
        self.last_updated_by.as_ref().map(|provider| provider())
    }
}

impl Default for ServiceScopeSettings {
    fn default() -> Self {
        Self::from_config(&OrmConfig::default())
    }
}

impl fmt::Debug for ServiceScopeSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceScopeSettings")
            .field("initialize_null_collections", &self.initialize_null_collections)
            .field("serialization_mode", &self.serialization_mode)
            .field("merge_behavior", &self.merge_behavior)
            .field("last_updated_by", &self.last_updated_by.is_some())
            .finish()
    }
}
