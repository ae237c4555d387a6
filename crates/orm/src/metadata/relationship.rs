//! Relationship descriptors - parent/child field linkage between entity types

use serde::{Deserialize, Serialize};

use crate::error::{OrmError, OrmResult};

/// Number of related rows on each side of a relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cardinality {
    OneToOne,
    OneToMany,
    ManyToOne,
}

impl Cardinality {
    /// Returns true if the declaring side sees a collection of related rows
    pub fn is_collection(self) -> bool {
        matches!(self, Self::OneToMany)
    }
}

/// Relationship declared on a parent type toward a related type.
///
/// `parent_fields[i]` on the declaring type links to `child_fields[i]` on the related type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipDescriptor {
    pub related_type: String,
    pub parent_fields: Vec<String>,
    pub child_fields: Vec<String>,
    pub cardinality: Cardinality,
    /// Name under which the related rows are exposed on the parent
    pub role_name: Option<String>,
}

impl RelationshipDescriptor {
    pub fn new<P, C>(related_type: &str, parent_fields: P, child_fields: C, cardinality: Cardinality) -> Self
    where
        P: IntoIterator,
        P::Item: Into<String>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Self {
            related_type: related_type.to_string(),
            parent_fields: parent_fields.into_iter().map(Into::into).collect(),
            child_fields: child_fields.into_iter().map(Into::into).collect(),
            cardinality,
            role_name: None,
        }
    }

    pub fn one_to_many<P, C>(related_type: &str, parent_fields: P, child_fields: C) -> Self
    where
        P: IntoIterator,
        P::Item: Into<String>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Self::new(related_type, parent_fields, child_fields, Cardinality::OneToMany)
    }

    pub fn with_role_name(mut self, role_name: impl Into<String>) -> Self {
        self.role_name = Some(role_name.into());
        self
    }

    /// Validate the descriptor for consistency
    pub fn validate(&self) -> OrmResult<()> {
        if self.related_type.trim().is_empty() {
            return Err(OrmError::Configuration(
                "Relationship related type cannot be empty".to_string(),
            ));
        }

        if self.parent_fields.is_empty() || self.child_fields.is_empty() {
            return Err(OrmError::Configuration(format!(
                "Relationship to '{}' must link at least one field on each side",
                self.related_type
            )));
        }

        if self.parent_fields.len() != self.child_fields.len() {
            return Err(OrmError::Configuration(format!(
                "Relationship to '{}' links {} parent field(s) to {} child field(s)",
                self.related_type,
                self.parent_fields.len(),
                self.child_fields.len()
            )));
        }

        Ok(())
    }
}
