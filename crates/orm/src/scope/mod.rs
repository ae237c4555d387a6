//! Service Scopes
//!
//! A service scope owns the tracking state of the entities created within it
//! and the settings that govern them. One scope can be made ambient on the
//! current thread with [`ServiceScope::activate`]; the returned guard restores
//! the previously active scope when dropped, so activation nests.

pub mod settings;

use dashmap::DashMap;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::trace;
use uuid::Uuid;

use crate::config::OrmConfig;
use crate::state::ObjectState;

pub use settings::{LastUpdatedByProvider, ServiceScopeSettings};

thread_local! {
    static ACTIVE: RefCell<Option<ServiceScope>> = const { RefCell::new(None) };
    static THREAD_DEFAULT: RefCell<Option<ServiceScope>> = const { RefCell::new(None) };
}

/// Identity of a tracked entity within a scope
pub type EntityId = Uuid;

struct ScopeInner {
    id: Uuid,
    settings: ServiceScopeSettings,
    tracked: DashMap<EntityId, ObjectState>,
}

/// Shared handle to a tracking/service context
#[derive(Clone)]
pub struct ServiceScope {
    inner: Arc<ScopeInner>,
}

impl ServiceScope {
    pub fn new(settings: ServiceScopeSettings) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                id: Uuid::new_v4(),
                settings,
                tracked: DashMap::new(),
            }),
        }
    }

    pub fn from_config(config: &OrmConfig) -> Self {
        Self::new(ServiceScopeSettings::from_config(config))
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn settings(&self) -> &ServiceScopeSettings {
        &self.inner.settings
    }

    /// The scope currently active on this thread, if any
    pub fn current() -> Option<ServiceScope> {
        ACTIVE.with(|active| active.borrow().clone())
    }

    /// The active scope, falling back to a per-thread default scope
    pub fn ambient() -> ServiceScope {
        if let Some(scope) = Self::current() {
            return scope;
        }

        THREAD_DEFAULT.with(|default| {
            default
                .borrow_mut()
                .get_or_insert_with(|| ServiceScope::new(ServiceScopeSettings::default()))
                .clone()
        })
    }

    /// Make `scope` ambient until the returned guard is dropped
    pub fn activate(scope: &ServiceScope) -> ScopeGuard {
        let previous = ACTIVE.with(|active| active.borrow_mut().replace(scope.clone()));
        trace!(scope = %scope.id(), "service scope activated");
        ScopeGuard {
            previous,
            _not_send: PhantomData,
        }
    }

    /// Run `f` with `scope` ambient, restoring the previous scope afterwards
    pub fn with_scope<R>(scope: &ServiceScope, f: impl FnOnce() -> R) -> R {
        let _guard = Self::activate(scope);
        f()
    }

    pub fn is_same(&self, other: &ServiceScope) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Start tracking an entity in the given state
    pub fn track(&self, entity: EntityId, state: ObjectState) {
        if state == ObjectState::Detached {
            self.inner.tracked.remove(&entity);
        } else {
            self.inner.tracked.insert(entity, state);
        }
    }

    /// State of an entity relative to this scope; untracked entities are detached
    pub fn state_of(&self, entity: EntityId) -> ObjectState {
        self.inner
            .tracked
            .get(&entity)
            .map(|state| *state)
            .unwrap_or(ObjectState::Detached)
    }

    /// Explicit state transition
    pub fn set_state(&self, entity: EntityId, state: ObjectState) {
        self.track(entity, state);
    }

    /// Record that a tracked entity had a value change
    pub fn mark_written(&self, entity: EntityId) -> ObjectState {
        match self.inner.tracked.get_mut(&entity) {
            Some(mut state) => {
                *state = state.after_write();
                *state
            }
            None => ObjectState::Detached,
        }
    }

    /// Record that an entity was saved or had its changes accepted
    pub fn mark_accepted(&self, entity: EntityId) -> ObjectState {
        let next = self.state_of(entity).after_accept();
        self.track(entity, next);
        next
    }

    pub fn tracked_count(&self) -> usize {
        self.inner.tracked.len()
    }

    /// Entities whose state requires a save operation
    pub fn pending_entities(&self) -> Vec<(EntityId, ObjectState)> {
        self.inner
            .tracked
            .iter()
            .filter(|entry| entry.value().is_pending())
            .map(|entry| (*entry.key(), *entry.value()))
            .collect()
    }
}

impl Default for ServiceScope {
    fn default() -> Self {
        Self::new(ServiceScopeSettings::default())
    }
}

impl std::fmt::Debug for ServiceScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceScope")
            .field("id", &self.inner.id)
            .field("tracked", &self.inner.tracked.len())
            .finish()
    }
}

/// Restores the previously active scope when dropped. Not `Send`: a guard
/// must be released on the thread that created it.
pub struct ScopeGuard {
    previous: Option<ServiceScope>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        ACTIVE.with(|active| *active.borrow_mut() = previous);
    }
}
