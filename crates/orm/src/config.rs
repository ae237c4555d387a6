//! Runtime Configuration
//!
//! Process-wide defaults consumed when service scopes, connection scopes and
//! save scopes are created without explicit settings.

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use thiserror::Error;

/// Configuration error type
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("Invalid value for field '{field}': '{value}'. Expected: {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },
}

impl ConfigError {
    /// Create an invalid value error
    pub fn invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            expected: expected.into(),
        }
    }
}

/// How entity graphs are serialized by scopes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerializationMode {
    /// Only values that differ from the original
    OnlyChanged,
    /// Every value, including unchanged ones
    IncludeAll,
    /// Values plus object state
    IncludeState,
}

impl FromStr for SerializationMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "only_changed" | "changed" => Ok(SerializationMode::OnlyChanged),
            "include_all" | "all" => Ok(SerializationMode::IncludeAll),
            "include_state" | "state" => Ok(SerializationMode::IncludeState),
            _ => Err(ConfigError::invalid_value(
                "serialization_mode",
                s,
                "only_changed, include_all, or include_state",
            )),
        }
    }
}

/// How incoming rows merge with rows already tracked by a scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeBehavior {
    /// Keep tracked values when the tracked row has unsaved changes
    SilentMerge,
    /// Always overwrite tracked values
    Overwrite,
    /// Fail when a tracked row would be overwritten
    FailIfDifferent,
}

impl FromStr for MergeBehavior {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "silent_merge" | "merge" => Ok(MergeBehavior::SilentMerge),
            "overwrite" => Ok(MergeBehavior::Overwrite),
            "fail_if_different" | "fail" => Ok(MergeBehavior::FailIfDifferent),
            _ => Err(ConfigError::invalid_value(
                "merge_behavior",
                s,
                "silent_merge, overwrite, or fail_if_different",
            )),
        }
    }
}

/// Default bulk-insert rule applied to new save scopes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkRules {
    Never,
    ByThreshold,
}

impl FromStr for BulkRules {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "never" => Ok(BulkRules::Never),
            "by_threshold" | "threshold" => Ok(BulkRules::ByThreshold),
            _ => Err(ConfigError::invalid_value("bulk_insert_rules", s, "never or by_threshold")),
        }
    }
}

/// Process-wide defaults for the ORM runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrmConfig {
    pub default_save_parallelism: usize,
    pub default_bulk_insert_rules: BulkRules,
    pub default_bulk_insert_minimum_rows: usize,
    pub initialize_null_collections: bool,
    pub serialization_mode: SerializationMode,
    pub merge_behavior: MergeBehavior,
    pub default_transactional: bool,
}

impl OrmConfig {
    pub fn new() -> Self {
        Self {
            default_save_parallelism: num_cpus::get().max(1),
            default_bulk_insert_rules: BulkRules::Never,
            default_bulk_insert_minimum_rows: 100_000,
            initialize_null_collections: true,
            serialization_mode: SerializationMode::OnlyChanged,
            merge_behavior: MergeBehavior::SilentMerge,
            default_transactional: true,
        }
    }

    /// Load configuration from `ORM_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new();

        if let Some(dop) = lookup("ORM_SAVE_PARALLELISM") {
            config.default_save_parallelism = dop.parse().map_err(|_| {
                ConfigError::invalid_value("default_save_parallelism", &dop, "a positive integer")
            })?;
        }

        if let Some(rules) = lookup("ORM_BULK_INSERT_RULES") {
            config.default_bulk_insert_rules = rules.parse()?;
        }

        if let Some(rows) = lookup("ORM_BULK_INSERT_MIN_ROWS") {
            config.default_bulk_insert_minimum_rows = rows.parse().map_err(|_| {
                ConfigError::invalid_value("default_bulk_insert_minimum_rows", &rows, "a non-negative integer")
            })?;
        }

        if let Some(flag) = lookup("ORM_INITIALIZE_NULL_COLLECTIONS") {
            config.initialize_null_collections = parse_flag("initialize_null_collections", &flag)?;
        }

        if let Some(mode) = lookup("ORM_SERIALIZATION_MODE") {
            config.serialization_mode = mode.parse()?;
        }

        if let Some(behavior) = lookup("ORM_MERGE_BEHAVIOR") {
            config.merge_behavior = behavior.parse()?;
        }

        if let Some(flag) = lookup("ORM_TRANSACTIONAL") {
            config.default_transactional = parse_flag("default_transactional", &flag)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_save_parallelism == 0 {
            return Err(ConfigError::invalid_value(
                "default_save_parallelism",
                "0",
                "a value >= 1",
            ));
        }
        Ok(())
    }
}

impl Default for OrmConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_flag(field: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid_value(field, value, "true or false")),
    }
}
