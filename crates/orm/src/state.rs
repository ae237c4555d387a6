//! Object State - tracking state of an entity within a service scope

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tracking state of an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ObjectState {
    Unchanged,
    Added,
    Modified,
    Deleted,
    /// Not tracked by the scope
    #[default]
    Detached,
}

impl ObjectState {
    /// State after a value of a tracked entity changes
    pub fn after_write(self) -> Self {
        match self {
            ObjectState::Unchanged => ObjectState::Modified,
            other => other,
        }
    }

    /// State after the entity is saved or its changes are accepted
    pub fn after_accept(self) -> Self {
        match self {
            ObjectState::Deleted | ObjectState::Detached => ObjectState::Detached,
            _ => ObjectState::Unchanged,
        }
    }

    /// True when a save would issue an operation for this state
    pub fn is_pending(self) -> bool {
        matches!(
            self,
            ObjectState::Added | ObjectState::Modified | ObjectState::Deleted
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectState::Unchanged => "unchanged",
            ObjectState::Added => "added",
            ObjectState::Modified => "modified",
            ObjectState::Deleted => "deleted",
            ObjectState::Detached => "detached",
        }
    }
}

impl fmt::Display for ObjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_transitions() {
        assert_eq!(ObjectState::Unchanged.after_write(), ObjectState::Modified);
        assert_eq!(ObjectState::Added.after_write(), ObjectState::Added);
        assert_eq!(ObjectState::Deleted.after_write(), ObjectState::Deleted);
    }

    #[test]
    fn test_accept_transitions() {
        assert_eq!(ObjectState::Added.after_accept(), ObjectState::Unchanged);
        assert_eq!(ObjectState::Modified.after_accept(), ObjectState::Unchanged);
        assert_eq!(ObjectState::Deleted.after_accept(), ObjectState::Detached);
    }

    #[test]
    fn test_pending_states() {
        assert!(ObjectState::Added.is_pending());
        assert!(!ObjectState::Unchanged.is_pending());
        assert!(!ObjectState::Detached.is_pending());
    }
}
