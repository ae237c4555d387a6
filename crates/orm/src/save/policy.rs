//! Save operation sets and bulk-insert policy

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A database operation a save may perform on a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SaveOperation {
    Insert,
    Update,
    Delete,
}

impl SaveOperation {
    fn bit(self) -> u8 {
        match self {
            SaveOperation::Insert => 0b001,
            SaveOperation::Update => 0b010,
            SaveOperation::Delete => 0b100,
        }
    }
}

/// Subset of {Insert, Update, Delete}
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationSet(u8);

impl OperationSet {
    pub const NONE: OperationSet = OperationSet(0);
    pub const ALL: OperationSet = OperationSet(0b111);

    pub fn only(operation: SaveOperation) -> Self {
        OperationSet(operation.bit())
    }

    pub fn with(self, operation: SaveOperation) -> Self {
        OperationSet(self.0 | operation.bit())
    }

    pub fn without(self, operation: SaveOperation) -> Self {
        OperationSet(self.0 & !operation.bit())
    }

    pub fn allows(self, operation: SaveOperation) -> bool {
        self.0 & operation.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = SaveOperation> {
        [SaveOperation::Insert, SaveOperation::Update, SaveOperation::Delete]
            .into_iter()
            .filter(move |op| self.allows(*op))
    }
}

impl Default for OperationSet {
    fn default() -> Self {
        Self::ALL
    }
}

impl FromIterator<SaveOperation> for OperationSet {
    fn from_iter<I: IntoIterator<Item = SaveOperation>>(iter: I) -> Self {
        iter.into_iter().fold(Self::NONE, OperationSet::with)
    }
}

impl fmt::Debug for OperationSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Whether a batch of inserts goes row-by-row or through a bulk-loading path
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BulkInsertPolicy {
    #[default]
    Never,
    /// Bulk insert once a batch has at least this many rows
    ByRowCountThreshold(usize),
    /// Bulk insert rows of these entity types
    ByType(BTreeSet<String>),
}

impl BulkInsertPolicy {
    pub fn by_types<I>(types: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        BulkInsertPolicy::ByType(types.into_iter().map(Into::into).collect())
    }

    /// Decide for a batch of `row_count` inserts of `entity_type`
    pub fn should_bulk_insert(&self, entity_type: &str, row_count: usize) -> bool {
        match self {
            BulkInsertPolicy::Never => false,
            BulkInsertPolicy::ByRowCountThreshold(minimum) => row_count >= *minimum,
            BulkInsertPolicy::ByType(types) => types.contains(entity_type),
        }
    }
}
