//! Save-Scope Configuration
//!
//! The parameters a unit of work hands to the save executor: degree of
//! parallelism, the operations it may perform, the bulk-insert policy, an
//! entity type to skip, and an optional per-row preview hook. A config is
//! immutable once built; all validation happens in [`SaveScopeConfigBuilder::build`].

pub mod policy;

use std::fmt;
use std::sync::Arc;

use crate::config::{BulkRules, ConfigError, OrmConfig};
use crate::error::OrmResult;
use crate::state::ObjectState;
use crate::value::Value;

pub use policy::{BulkInsertPolicy, OperationSet, SaveOperation};

/// Read-only view of a candidate row handed to the save-preview hook
pub trait RowSnapshot {
    fn entity_type(&self) -> String;
    fn state(&self) -> ObjectState;
    fn value(&self, field: &str) -> Option<Value>;
}

/// Outcome of the save-preview hook for one row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowPreview {
    pub can_save: bool,
    /// Treat the row as this state instead of its tracked state
    pub treat_as: Option<ObjectState>,
}

impl RowPreview {
    pub fn save() -> Self {
        Self {
            can_save: true,
            treat_as: None,
        }
    }

    pub fn skip() -> Self {
        Self {
            can_save: false,
            treat_as: None,
        }
    }

    pub fn treat_as(state: ObjectState) -> Self {
        Self {
            can_save: true,
            treat_as: Some(state),
        }
    }
}

/// Predicate invoked by the save executor once per candidate row
pub type RowSavePreview = Arc<dyn Fn(&dyn RowSnapshot) -> RowPreview + Send + Sync>;

/// Save parameters for one unit of work
#[derive(Clone)]
pub struct SaveScopeConfig {
    max_degree_of_parallelism: usize,
    allowed_operations: OperationSet,
    bulk_insert: BulkInsertPolicy,
    ignore_object_type: Option<String>,
    row_save_preview: Option<RowSavePreview>,
}

impl SaveScopeConfig {
    pub fn builder() -> SaveScopeConfigBuilder {
        SaveScopeConfigBuilder::new()
    }

    pub fn max_degree_of_parallelism(&self) -> usize {
        self.max_degree_of_parallelism
    }

    pub fn allowed_operations(&self) -> OperationSet {
        self.allowed_operations
    }

    pub fn bulk_insert_policy(&self) -> &BulkInsertPolicy {
        &self.bulk_insert
    }

    pub fn ignore_object_type(&self) -> Option<&str> {
        self.ignore_object_type.as_deref()
    }

    pub fn row_save_preview(&self) -> Option<&RowSavePreview> {
        self.row_save_preview.as_ref()
    }

    /// True if rows of `entity_type` are excluded from the save
    pub fn ignores(&self, entity_type: &str) -> bool {
        self.ignore_object_type.as_deref() == Some(entity_type)
    }
}

impl fmt::Debug for SaveScopeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaveScopeConfig")
            .field("max_degree_of_parallelism", &self.max_degree_of_parallelism)
            .field("allowed_operations", &self.allowed_operations)
            .field("bulk_insert", &self.bulk_insert)
            .field("ignore_object_type", &self.ignore_object_type)
            .field("row_save_preview", &self.row_save_preview.is_some())
            .finish()
    }
}

/// Builder for [`SaveScopeConfig`], seeded from [`OrmConfig`] defaults
#[derive(Clone)]
pub struct SaveScopeConfigBuilder {
    max_degree_of_parallelism: usize,
    allowed_operations: OperationSet,
    bulk_insert: BulkInsertPolicy,
    ignore_object_type: Option<String>,
    row_save_preview: Option<RowSavePreview>,
}

impl SaveScopeConfigBuilder {
    pub fn new() -> Self {
        Self::from_config(&OrmConfig::default())
    }

    pub fn from_config(config: &OrmConfig) -> Self {
        let bulk_insert = match config.default_bulk_insert_rules {
            BulkRules::Never => BulkInsertPolicy::Never,
            BulkRules::ByThreshold => {
                BulkInsertPolicy::ByRowCountThreshold(config.default_bulk_insert_minimum_rows)
            }
        };

        Self {
            max_degree_of_parallelism: config.default_save_parallelism,
            allowed_operations: OperationSet::ALL,
            bulk_insert,
            ignore_object_type: None,
            row_save_preview: None,
        }
    }

    pub fn max_degree_of_parallelism(mut self, dop: usize) -> Self {
        self.max_degree_of_parallelism = dop;
        self
    }

    pub fn allowed_operations(mut self, operations: OperationSet) -> Self {
        self.allowed_operations = operations;
        self
    }

    pub fn bulk_insert_policy(mut self, policy: BulkInsertPolicy) -> Self {
        self.bulk_insert = policy;
        self
    }

    /// Bulk insert batches of at least `rows` rows
    pub fn bulk_insert_minimum_rows(mut self, rows: usize) -> Self {
        self.bulk_insert = BulkInsertPolicy::ByRowCountThreshold(rows);
        self
    }

    /// Declare bulk-insert eligible types. A non-empty list switches the
    /// policy to [`BulkInsertPolicy::ByType`]; an empty list leaves it unchanged.
    pub fn use_bulk_insert_types<I>(mut self, types: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let types: Vec<String> = types.into_iter().map(Into::into).collect();
        if !types.is_empty() {
            self.bulk_insert = BulkInsertPolicy::by_types(types);
        }
        self
    }

    pub fn ignore_object_type(mut self, entity_type: impl Into<String>) -> Self {
        self.ignore_object_type = Some(entity_type.into());
        self
    }

    pub fn row_save_preview<F>(mut self, preview: F) -> Self
    where
        F: Fn(&dyn RowSnapshot) -> RowPreview + Send + Sync + 'static,
    {
        self.row_save_preview = Some(Arc::new(preview));
        self
    }

    pub fn build(self) -> OrmResult<SaveScopeConfig> {
        if self.max_degree_of_parallelism == 0 {
            return Err(ConfigError::invalid_value(
                "max_degree_of_parallelism",
                "0",
                "a value >= 1",
            )
            .into());
        }

        Ok(SaveScopeConfig {
            max_degree_of_parallelism: self.max_degree_of_parallelism,
            allowed_operations: self.allowed_operations,
            bulk_insert: self.bulk_insert,
            ignore_object_type: self.ignore_object_type,
            row_save_preview: self.row_save_preview,
        })
    }
}

impl Default for SaveScopeConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
